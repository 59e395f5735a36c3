//! 工具库：工具映射 + 嵌入索引 + 持久化，三者按同一组 id 同步变更
//!
//! 变更顺序固定：先做可能失败的工作（嵌入、写库），全部成功后再同时更新映射与索引；
//! 任一步失败时内存状态不变。变更由调用方串行化（&mut self）。

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::RepositorySection;
use crate::core::{RepositoryError, ToolError};
use crate::llm::EmbeddingProvider;
use crate::repository::index::{cutoff, DistanceMetric, EmbeddingIndex};
use crate::repository::store::{StoredTool, ToolStore};
use crate::tools::{
    Job, JobResult, RegisteredTool, ScriptLoader, SourceLoader, Tool, ToolDefinition,
    ToolExecutor, ToolId, ToolModule, ToolOptions, ToolOrigin, DEFAULT_TIMEOUT_MESSAGE,
};

/// 一次按 id 的调用请求
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_id: ToolId,
    pub parameters: Value,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, tool_id: ToolId, parameters: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_id,
            parameters,
        }
    }
}

/// 可检索、可增删改的工具库
pub struct ToolRepository {
    tools: BTreeMap<ToolId, Arc<RegisteredTool>>,
    index: EmbeddingIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    loader: Arc<dyn SourceLoader>,
    store: ToolStore,
    executor: ToolExecutor,
    default_timeout: Option<Duration>,
    default_timeout_message: String,
    verbose_ids: bool,
}

impl std::fmt::Debug for ToolRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRepository")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("store", &self.store)
            .field("verbose_ids", &self.verbose_ids)
            .finish()
    }
}

impl ToolRepository {
    pub fn builder(embedder: Arc<dyn EmbeddingProvider>) -> RepositoryBuilder {
        RepositoryBuilder::new(embedder)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn ids(&self) -> Vec<ToolId> {
        self.tools.keys().cloned().collect()
    }

    pub fn get(&self, id: &ToolId) -> Option<Arc<RegisteredTool>> {
        self.tools.get(id).cloned()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<RegisteredTool>> {
        self.tools.values()
    }

    pub fn verbose_ids(&self) -> bool {
        self.verbose_ids
    }

    pub fn loader(&self) -> &Arc<dyn SourceLoader> {
        &self.loader
    }

    pub fn store(&self) -> &ToolStore {
        &self.store
    }

    /// 命名空间（源模块）下的工具数
    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.tools.keys().filter(|id| id.namespace == namespace).count()
    }

    /// 把对 LLM 暴露的名称解析回 id（也接受完整的 namespace__name）
    pub fn resolve_name(&self, name: &str) -> Option<ToolId> {
        let name = name.trim();
        self.tools
            .keys()
            .find(|id| id.display_with(self.verbose_ids) == name)
            .or_else(|| self.tools.keys().find(|id| id.qualified() == name))
            .cloned()
    }

    /// 相似度检索：按距离升序，最多 top_k 个，在第一个距离 ≥ threshold 处截断
    ///
    /// top_k 不小于工具总数且没有阈值时直接返回全部工具，不调用嵌入服务。
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<Arc<RegisteredTool>>, RepositoryError> {
        if threshold.is_none() && top_k >= self.tools.len() {
            return Ok(self.tools.values().cloned().collect());
        }
        Ok(self
            .search_scored(query, top_k, threshold)
            .await?
            .into_iter()
            .map(|(tool, _)| tool)
            .collect())
    }

    /// 同 search，但总是计算距离并一并返回
    pub async fn search_scored(
        &self,
        query: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<(Arc<RegisteredTool>, f32)>, RepositoryError> {
        if top_k == 0 || self.tools.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(RepositoryError::Embedding)?;
        let ranked = cutoff(self.index.rank(&query_vec)?, top_k, threshold);
        let mut out = Vec::with_capacity(ranked.len());
        for (id, distance) in ranked {
            let tool = self.tools.get(&id).cloned().ok_or_else(|| {
                RepositoryError::EmbeddingIndexDesync(format!("{id} indexed but not registered"))
            })?;
            out.push((tool, distance));
        }
        tracing::debug!(
            query,
            hits = ?out.iter().map(|(t, d)| format!("{}={d:.3}", t.id())).collect::<Vec<_>>(),
            "tool search"
        );
        Ok(out)
    }

    /// 注册一个模块下的全部工具；任一工具冲突或嵌入失败则整体不注册
    pub async fn add_module(&mut self, module: ToolModule) -> Result<Vec<ToolId>, RepositoryError> {
        let defs = module.definitions(self.default_timeout, &self.default_timeout_message);
        self.check_new_ids(defs.iter().map(|(d, _)| &d.id))?;
        let prepared = self.prepare(defs).await?;
        let ids = self.commit(prepared)?;
        tracing::info!(namespace = %module.namespace, tools = ids.len(), "tool module added");
        Ok(ids)
    }

    /// 注册单个原生工具
    pub async fn add(
        &mut self,
        namespace: &str,
        tool: Arc<dyn Tool>,
        options: ToolOptions,
    ) -> Result<ToolId, RepositoryError> {
        let mut module = ToolModule::native(namespace);
        module.push(tool, options);
        let mut ids = self.add_module(module).await?;
        ids.pop()
            .ok_or_else(|| RepositoryError::InvalidSource(format!("module {namespace} is empty")))
    }

    /// 从磁盘加载一个脚本模块并注册
    pub async fn add_source(&mut self, path: &Path) -> Result<Vec<ToolId>, RepositoryError> {
        let module = self
            .loader
            .load(path)
            .await
            .map_err(RepositoryError::InvalidSource)?;
        if module.is_empty() {
            return Err(RepositoryError::InvalidSource(format!(
                "{} exposes no tools",
                path.display()
            )));
        }
        self.add_module(module).await
    }

    /// 删除一个工具（映射、索引、持久化记录一起删除）
    pub fn remove(&mut self, id: &ToolId) -> Result<Arc<RegisteredTool>, RepositoryError> {
        if !self.tools.contains_key(id) {
            return Err(RepositoryError::UnknownTool(id.to_string()));
        }
        self.store.delete(id)?;
        self.index.remove(id);
        let removed = self
            .tools
            .remove(id)
            .ok_or_else(|| RepositoryError::UnknownTool(id.to_string()))?;
        tracing::info!(tool = %id, "tool removed");
        Ok(removed)
    }

    /// 用新的原生实现替换工具；只允许单工具模块，身份不变
    pub async fn update(
        &mut self,
        id: &ToolId,
        tool: Arc<dyn Tool>,
        options: ToolOptions,
    ) -> Result<(), RepositoryError> {
        let existing = self.updatable(id)?;
        if tool.name() != id.name {
            return Err(RepositoryError::IdentityMismatch {
                expected: id.name.clone(),
                actual: tool.name().to_string(),
            });
        }
        let module = ToolModule {
            namespace: id.namespace.clone(),
            origin: existing.definition.origin.clone(),
            tools: vec![(tool, options)],
        };
        let defs = module.definitions(self.default_timeout, &self.default_timeout_message);
        let prepared = self.prepare(defs).await?;
        self.commit(prepared)?;
        tracing::info!(tool = %id, "tool updated");
        Ok(())
    }

    /// 用新源码替换脚本工具：先检查源码，写入失败或注册失败时恢复原文件
    pub async fn update_source(&mut self, id: &ToolId, source: &str) -> Result<(), RepositoryError> {
        let existing = self.updatable(id)?;
        let path = match &existing.definition.origin {
            ToolOrigin::Script { path } => path.clone(),
            ToolOrigin::Native => {
                return Err(RepositoryError::InvalidSource(format!(
                    "{id} is a native tool and has no source file"
                )))
            }
        };
        let manifest = self
            .loader
            .check(source)
            .await
            .map_err(RepositoryError::InvalidSource)?;
        if manifest.name != id.name {
            return Err(RepositoryError::IdentityMismatch {
                expected: id.name.clone(),
                actual: manifest.name,
            });
        }

        let previous = tokio::fs::read_to_string(&path).await.ok();
        tokio::fs::write(&path, source).await?;
        let result = self.reload_single(id, &path).await;
        if result.is_err() {
            if let Some(previous) = previous {
                if let Err(e) = tokio::fs::write(&path, previous).await {
                    tracing::error!(path = %path.display(), error = %e, "failed to restore tool source");
                }
            }
        } else {
            tracing::info!(tool = %id, path = %path.display(), "tool source updated");
        }
        result
    }

    async fn reload_single(&mut self, id: &ToolId, path: &Path) -> Result<(), RepositoryError> {
        let module = self
            .loader
            .load(path)
            .await
            .map_err(RepositoryError::InvalidSource)?;
        let defs = module.definitions(self.default_timeout, &self.default_timeout_message);
        match defs.as_slice() {
            [(def, _)] if &def.id == id => {}
            _ => {
                return Err(RepositoryError::IdentityMismatch {
                    expected: id.to_string(),
                    actual: defs
                        .iter()
                        .map(|(d, _)| d.id.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        }
        let prepared = self.prepare(defs).await?;
        self.commit(prepared)?;
        Ok(())
    }

    /// 执行单个调用；未知 id 返回 UnknownTool 结果而不是错误
    pub async fn execute(&self, id: &ToolId, parameters: Value) -> JobResult {
        let mut results = self
            .execute_batch(vec![ToolInvocation::new(id.to_string(), id.clone(), parameters)])
            .await;
        results.remove(0)
    }

    /// 并行执行一批调用，结果顺序与请求顺序一致
    pub async fn execute_batch(&self, calls: Vec<ToolInvocation>) -> Vec<JobResult> {
        let mut slots: Vec<Option<JobResult>> = Vec::with_capacity(calls.len());
        let mut positions = Vec::new();
        let mut jobs = Vec::new();

        for call in calls {
            match self.tools.get(&call.tool_id) {
                Some(tool) => {
                    positions.push(slots.len());
                    slots.push(None);
                    jobs.push(Job::new(call.call_id, tool.clone(), call.parameters));
                }
                None => {
                    tracing::warn!(tool = %call.tool_id, "call to unknown tool");
                    let err = ToolError::UnknownTool(call.tool_id.display_with(self.verbose_ids));
                    slots.push(Some(JobResult {
                        call_id: call.call_id,
                        tool_id: call.tool_id,
                        outcome: Err(err),
                    }));
                }
            }
        }

        let results = self.executor.run(jobs).await;
        for (pos, result) in positions.into_iter().zip(results) {
            slots[pos] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }

    /// 检查映射与索引的 id 集合是否一致
    pub fn verify_consistency(&self) -> Result<(), RepositoryError> {
        let mapped: BTreeSet<&ToolId> = self.tools.keys().collect();
        let indexed: BTreeSet<&ToolId> = self.index.keys().collect();
        if mapped == indexed {
            return Ok(());
        }
        let missing: Vec<String> = mapped.difference(&indexed).map(|i| i.to_string()).collect();
        let orphaned: Vec<String> = indexed.difference(&mapped).map(|i| i.to_string()).collect();
        Err(RepositoryError::EmbeddingIndexDesync(format!(
            "not indexed: [{}]; indexed but not registered: [{}]",
            missing.join(", "),
            orphaned.join(", ")
        )))
    }

    fn updatable(&self, id: &ToolId) -> Result<Arc<RegisteredTool>, RepositoryError> {
        let existing = self
            .tools
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::UnknownTool(id.to_string()))?;
        let count = self.namespace_len(&id.namespace);
        if count != 1 {
            return Err(RepositoryError::ConflictingUpdate {
                namespace: id.namespace.clone(),
                count,
            });
        }
        Ok(existing)
    }

    /// 新 id 不能与已有工具或同批工具冲突；短名称模式下名称也必须唯一
    fn check_new_ids<'a>(&self, ids: impl Iterator<Item = &'a ToolId>) -> Result<(), RepositoryError> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for id in ids {
            let key = id.display_with(self.verbose_ids);
            let clash = self
                .tools
                .keys()
                .any(|existing| existing == id || existing.display_with(self.verbose_ids) == key);
            if clash || !seen.insert(key.clone()) {
                return Err(RepositoryError::DuplicateTool(key));
            }
        }
        Ok(())
    }

    /// 计算嵌入：持久化记录的嵌入键与模型都未变时复用
    async fn prepare(
        &self,
        defs: Vec<(ToolDefinition, Arc<dyn Tool>)>,
    ) -> Result<Vec<(StoredTool, Arc<dyn Tool>)>, RepositoryError> {
        let model = self.embedder.model_id().to_string();
        let mut dims = self.index.dimensions();
        let mut prepared = Vec::with_capacity(defs.len());
        for (definition, handler) in defs {
            let reused = self
                .store
                .get(&definition.id)?
                .filter(|r| r.reusable_for(&definition, &model))
                .map(|r| r.embedding);
            let embedding = match reused {
                Some(v) => {
                    tracing::debug!(tool = %definition.id, "embedding reused from store");
                    v
                }
                None => self
                    .embedder
                    .embed(&definition.embedding_text())
                    .await
                    .map_err(RepositoryError::Embedding)?,
            };
            if embedding.is_empty() {
                return Err(RepositoryError::Embedding(format!(
                    "empty embedding for {}",
                    definition.id
                )));
            }
            match dims {
                Some(d) if d != embedding.len() => {
                    return Err(RepositoryError::Embedding(format!(
                        "dimension mismatch: expected {d}, got {}",
                        embedding.len()
                    )))
                }
                _ => dims = Some(embedding.len()),
            }
            prepared.push((StoredTool::new(definition, &model, embedding), handler));
        }
        Ok(prepared)
    }

    fn commit(&mut self, prepared: Vec<(StoredTool, Arc<dyn Tool>)>) -> Result<Vec<ToolId>, RepositoryError> {
        let records: Vec<StoredTool> = prepared.iter().map(|(r, _)| r.clone()).collect();
        let registered = prepared
            .into_iter()
            .map(|(record, handler)| {
                RegisteredTool::new(record.definition, handler)
                    .map(|tool| (tool, record.embedding))
                    .map_err(RepositoryError::InvalidSource)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.store.upsert_all(&records)?;

        let mut ids = Vec::with_capacity(registered.len());
        for (tool, embedding) in registered {
            let id = tool.id().clone();
            self.index.insert(id.clone(), embedding);
            self.tools.insert(id.clone(), Arc::new(tool));
            tracing::debug!(tool = %id, "tool registered");
            ids.push(id);
        }
        Ok(ids)
    }
}

/// 工具库构建器：打开持久化、注册原生模块、重新加载脚本工具并清理失效记录
pub struct RepositoryBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    loader: Arc<dyn SourceLoader>,
    store_path: Option<PathBuf>,
    executor: ToolExecutor,
    default_timeout: Option<Duration>,
    default_timeout_message: String,
    verbose_ids: bool,
    metric: DistanceMetric,
    modules: Vec<ToolModule>,
}

impl RepositoryBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            loader: Arc::new(ScriptLoader::default()),
            store_path: None,
            executor: ToolExecutor::default(),
            default_timeout: Some(Duration::from_secs(60)),
            default_timeout_message: DEFAULT_TIMEOUT_MESSAGE.to_string(),
            verbose_ids: false,
            metric: DistanceMetric::default(),
            modules: Vec::new(),
        }
    }

    /// 按 [repository] 段配置
    pub fn from_config(section: &RepositorySection, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let metric = DistanceMetric::parse(&section.distance).unwrap_or_else(|| {
            tracing::warn!(distance = %section.distance, "unknown distance metric, using squared_l2");
            DistanceMetric::default()
        });
        Self::new(embedder)
            .with_store_path(section.store_path.clone())
            .with_executor(ToolExecutor::new(section.max_concurrency()))
            .with_default_timeout(section.default_timeout())
            .with_default_timeout_message(&section.default_timeout_message)
            .with_verbose_ids(section.verbose_ids)
            .with_metric(metric)
    }

    pub fn with_loader(mut self, loader: Arc<dyn SourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_store_path(mut self, path: Option<PathBuf>) -> Self {
        self.store_path = path;
        self
    }

    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_timeout_message(mut self, message: &str) -> Self {
        self.default_timeout_message = message.to_string();
        self
    }

    pub fn with_verbose_ids(mut self, verbose: bool) -> Self {
        self.verbose_ids = verbose;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_module(mut self, module: ToolModule) -> Self {
        self.modules.push(module);
        self
    }

    pub async fn build(self) -> Result<ToolRepository, RepositoryError> {
        let store = ToolStore::open(self.store_path.as_deref())?;
        let records = store.load_all()?;

        let mut repo = ToolRepository {
            tools: BTreeMap::new(),
            index: EmbeddingIndex::new(self.metric),
            embedder: self.embedder,
            loader: self.loader,
            store,
            executor: self.executor,
            default_timeout: self.default_timeout,
            default_timeout_message: self.default_timeout_message,
            verbose_ids: self.verbose_ids,
        };

        for module in self.modules {
            repo.add_module(module).await?;
        }

        let mut stale: Vec<ToolId> = Vec::new();
        let mut scripts: BTreeMap<PathBuf, Vec<ToolId>> = BTreeMap::new();
        for record in records {
            let id = record.definition.id;
            match record.definition.origin {
                ToolOrigin::Script { path } => scripts.entry(path).or_default().push(id),
                ToolOrigin::Native if !repo.tools.contains_key(&id) => stale.push(id),
                ToolOrigin::Native => {}
            }
        }

        for (path, ids) in scripts {
            if ids.iter().all(|id| repo.tools.contains_key(id)) {
                continue;
            }
            let module = match repo.loader.load(&path).await {
                Ok(module) => module,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "persisted script tool could not be loaded");
                    stale.extend(ids);
                    continue;
                }
            };
            if let Err(e) = repo.add_module(module).await {
                tracing::warn!(path = %path.display(), error = %e, "persisted script tool could not be registered");
            }
            stale.extend(ids.into_iter().filter(|id| !repo.tools.contains_key(id)));
        }

        for id in stale {
            repo.store.delete(&id)?;
            tracing::info!(tool = %id, "pruned stale tool record");
        }

        repo.verify_consistency()?;
        tracing::info!(tools = repo.len(), "tool repository ready");
        Ok(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::tools::{calculator_module, ArithmeticTool, EchoTool, CALCULATOR_NAMESPACE};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }
    }

    fn counting() -> (Arc<dyn EmbeddingProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(CountingEmbedder {
                inner: HashingEmbedder::new(64),
                calls: calls.clone(),
            }),
            calls,
        )
    }

    async fn calculator_repo() -> ToolRepository {
        ToolRepository::builder(Arc::new(HashingEmbedder::new(64)))
            .with_module(calculator_module())
            .with_module(ToolModule::native("util").with_tool(EchoTool))
            .build()
            .await
            .unwrap()
    }

    fn add_id() -> ToolId {
        ToolId::new(CALCULATOR_NAMESPACE, "add")
    }

    #[tokio::test]
    async fn test_search_is_thresholded_prefix() {
        let repo = calculator_repo().await;
        let full = repo.search_scored("Add 2 and 5", 100, None).await.unwrap();
        assert_eq!(full.len(), 5);
        assert!(full.windows(2).all(|w| w[0].1 <= w[1].1));
        let threshold = full[2].1;
        for top_k in 0..7 {
            let hits = repo.search_scored("Add 2 and 5", top_k, Some(threshold)).await.unwrap();
            assert!(hits.len() <= top_k);
            assert!(hits.iter().all(|(_, d)| *d < threshold));
            for (i, (tool, _)) in hits.iter().enumerate() {
                assert_eq!(tool.id(), full[i].0.id());
            }
        }
    }

    #[tokio::test]
    async fn test_search_short_circuits_to_whole_repository() {
        let (embedder, calls) = counting();
        let repo = ToolRepository::builder(embedder)
            .with_module(calculator_module())
            .build()
            .await
            .unwrap();
        let before = calls.load(Ordering::SeqCst);
        let all = repo.search("anything", 4, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), before);
        repo.search("anything", 3, None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_add_then_remove_restores_ranking() {
        let mut repo = calculator_repo().await;
        let before = repo.search_scored("multiply numbers", 10, None).await.unwrap();
        let id = repo
            .add("extra", Arc::new(ArithmeticTool::multiply()), ToolOptions::default())
            .await;
        // 短名称模式下 multiply 与 calculator 模块冲突
        assert!(matches!(id, Err(RepositoryError::DuplicateTool(_))));

        let id = repo
            .add("extra", Arc::new(EchoToolAlias), ToolOptions::default())
            .await
            .unwrap();
        assert_eq!(repo.len(), 6);
        repo.remove(&id).unwrap();
        let after = repo.search_scored("multiply numbers", 10, None).await.unwrap();
        let names = |v: &Vec<(Arc<RegisteredTool>, f32)>| {
            v.iter().map(|(t, d)| (t.id().clone(), *d)).collect::<Vec<_>>()
        };
        assert_eq!(names(&before), names(&after));
        repo.verify_consistency().unwrap();
        assert!(matches!(repo.remove(&id), Err(RepositoryError::UnknownTool(_))));
    }

    struct EchoToolAlias;

    #[async_trait]
    impl Tool for EchoToolAlias {
        fn name(&self) -> &str {
            "repeat"
        }

        fn description(&self) -> &str {
            "Repeat the given text."
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_update_multi_tool_module_is_rejected_without_mutation() {
        let mut repo = calculator_repo().await;
        let before = repo.get(&add_id()).unwrap().definition.clone();
        let stored_before = repo.store().count().unwrap();
        for _ in 0..2 {
            let err = repo
                .update(&add_id(), Arc::new(ArithmeticTool::add()), ToolOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, RepositoryError::ConflictingUpdate { count: 4, .. }));
        }
        assert_eq!(repo.get(&add_id()).unwrap().definition, before);
        assert_eq!(repo.len(), 5);
        assert_eq!(repo.store().count().unwrap(), stored_before);
        repo.verify_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_update_single_tool_module() {
        let mut repo = calculator_repo().await;
        let id = ToolId::new("util", "echo");
        let err = repo
            .update(&id, Arc::new(EchoToolAlias), ToolOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::IdentityMismatch { .. }));

        repo.update(
            &id,
            Arc::new(EchoTool),
            ToolOptions {
                timeout: Some(Duration::from_secs(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(repo.get(&id).unwrap().definition.timeout, Some(Duration::from_secs(1)));
        assert_eq!(repo.len(), 5);
    }

    #[tokio::test]
    async fn test_verbose_ids_allow_same_name_in_two_namespaces() {
        let mut repo = ToolRepository::builder(Arc::new(HashingEmbedder::new(64)))
            .with_verbose_ids(true)
            .with_module(calculator_module())
            .build()
            .await
            .unwrap();
        let id = repo
            .add("other", Arc::new(ArithmeticTool::add()), ToolOptions::default())
            .await
            .unwrap();
        assert_eq!(repo.resolve_name("other__add"), Some(id));
        assert_eq!(repo.resolve_name("calculator__add"), Some(add_id()));
        assert_eq!(repo.resolve_name("add"), None);
    }

    #[tokio::test]
    async fn test_execute_unknown_and_batch_order() {
        let repo = calculator_repo().await;
        let unknown = repo.execute(&ToolId::new("x", "nope"), json!({})).await;
        assert!(matches!(unknown.error(), Some(ToolError::UnknownTool(_))));

        let results = repo
            .execute_batch(vec![
                ToolInvocation::new("1", add_id(), json!({"a": 2, "b": 5})),
                ToolInvocation::new("2", ToolId::new("x", "nope"), json!({})),
                ToolInvocation::new("3", ToolId::new(CALCULATOR_NAMESPACE, "divide"), json!({"a": 1, "b": 0})),
            ])
            .await;
        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(results[0].value(), Some("7"));
        assert!(results[1].error().is_some());
        assert!(matches!(results[2].error(), Some(ToolError::ExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn test_reload_reuses_embeddings_and_prunes_stale_records() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tools.db");

        let (embedder, calls) = counting();
        let repo = ToolRepository::builder(embedder)
            .with_store_path(Some(db.clone()))
            .with_module(calculator_module())
            .build()
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        drop(repo);

        let (embedder, calls) = counting();
        let repo = ToolRepository::builder(embedder)
            .with_store_path(Some(db.clone()))
            .with_module(calculator_module())
            .build()
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(repo.len(), 4);
        drop(repo);

        let (embedder, _) = counting();
        let repo = ToolRepository::builder(embedder)
            .with_store_path(Some(db))
            .with_module(ToolModule::native("util").with_tool(EchoTool))
            .build()
            .await
            .unwrap();
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.store().count().unwrap(), 1);
    }

    const SHOUT: &str = "#!/bin/sh\n\
# tool: shout\n\
# description: Upper-case the given word.\n\
# param word: string - The word.\n\
echo \"$TOOL_ARG_WORD\" | tr '[:lower:]' '[:upper:]'\n";

    #[tokio::test]
    async fn test_script_tools_persist_update_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tools.db");
        let script = dir.path().join("shout_module.sh");
        std::fs::write(&script, SHOUT).unwrap();

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(64));
        let mut repo = ToolRepository::builder(embedder.clone())
            .with_store_path(Some(db.clone()))
            .build()
            .await
            .unwrap();
        let ids = repo.add_source(&script).await.unwrap();
        let id = ToolId::new("shout_module", "shout");
        assert_eq!(ids, vec![id.clone()]);
        assert_eq!(repo.execute(&id, json!({"word": "abc"})).await.value(), Some("ABC"));

        // 名称不一致的新源码被拒绝，原文件保持不变
        let renamed = SHOUT.replace("# tool: shout", "# tool: yell");
        assert!(matches!(
            repo.update_source(&id, &renamed).await,
            Err(RepositoryError::IdentityMismatch { .. })
        ));
        assert_eq!(std::fs::read_to_string(&script).unwrap(), SHOUT);

        let lower = SHOUT.replace("'[:lower:]' '[:upper:]'", "'[:upper:]' '[:lower:]'");
        repo.update_source(&id, &lower).await.unwrap();
        assert_eq!(repo.execute(&id, json!({"word": "ABC"})).await.value(), Some("abc"));
        drop(repo);

        let repo = ToolRepository::builder(embedder.clone())
            .with_store_path(Some(db.clone()))
            .build()
            .await
            .unwrap();
        assert!(repo.get(&id).is_some());
        drop(repo);

        std::fs::remove_file(&script).unwrap();
        let repo = ToolRepository::builder(embedder)
            .with_store_path(Some(db))
            .build()
            .await
            .unwrap();
        assert!(repo.is_empty());
        assert_eq!(repo.store().count().unwrap(), 0);
    }
}
