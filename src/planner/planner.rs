//! Planner：深度优先、有界、可回溯的任务树求解
//!
//! 每个节点在一个循环里推进：分解 → 递归子任务 → 汇总；或作为叶子检索工具并求解。
//! 叶子找不到工具时依次改写描述（max_paraphrases）、生成新工具（每个节点至多一次）；
//! 子任务失败时重新分解（max_replans）。三个预算保证终止，预算耗尽只写入节点的失败结果。
//! crud 策略下叶子求解还可以调用工具库管理工具（见 library）。

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::config::PlannerSection;
use crate::core::{PlannerError, ToolError};
use crate::planner::library::{library_definitions, LibraryAction};
use crate::planner::reasoner::{
    is_empty_answer, DecompositionContext, Reasoner, SolveContext, SolveStep, ToolExchange,
};
use crate::planner::synthesis::ToolSynthesizer;
use crate::planner::task::{TaskId, TaskResult, TaskTree};
use crate::repository::{ToolInvocation, ToolRepository};
use crate::tools::{strip_code_fence, RegisteredTool, ToolDefinition, ToolId, ToolOrigin};

/// 策略开关；每种 agent 变体（dfs / cot / minimal / tools_only / auto）都是其中一个组合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerStrategy {
    pub decompose: bool,
    pub search_library: bool,
    pub synthesize_tools: bool,
    pub backtrack: bool,
    /// 叶子求解时提供 create_tool / update_tool / delete_tool
    pub crud: bool,
}

impl PlannerStrategy {
    /// 全部开启
    pub fn dfs() -> Self {
        Self {
            decompose: true,
            search_library: true,
            synthesize_tools: true,
            backtrack: true,
            crud: false,
        }
    }

    /// 每个节点只分解一次，不回溯、不生成工具
    pub fn cot() -> Self {
        Self {
            decompose: true,
            search_library: true,
            synthesize_tools: false,
            backtrack: false,
            crud: false,
        }
    }

    /// 只检索工具直接求解
    pub fn minimal() -> Self {
        Self {
            decompose: false,
            search_library: true,
            synthesize_tools: false,
            backtrack: false,
            crud: false,
        }
    }

    /// 不检索：所有工具都是候选
    pub fn tools_only() -> Self {
        Self {
            decompose: false,
            search_library: false,
            synthesize_tools: false,
            backtrack: false,
            crud: false,
        }
    }

    /// 不分解，只检索；求解时可以增删改工具库
    pub fn auto() -> Self {
        Self {
            decompose: false,
            search_library: true,
            synthesize_tools: true,
            backtrack: false,
            crud: true,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dfs" => Some(Self::dfs()),
            "cot" => Some(Self::cot()),
            "minimal" => Some(Self::minimal()),
            "tools_only" | "tools" => Some(Self::tools_only()),
            "auto" | "crud" => Some(Self::auto()),
            _ => None,
        }
    }
}

impl Default for PlannerStrategy {
    fn default() -> Self {
        Self::dfs()
    }
}

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub max_recursion_depth: usize,
    pub max_paraphrases: usize,
    pub max_replans: usize,
    pub top_k: usize,
    pub similarity_threshold: Option<f32>,
    pub api_interaction_limit: usize,
    pub strategy: PlannerStrategy,
    /// 总是附加在检索结果之后的工具；不能通过 update_tool / delete_tool 修改
    pub default_tools: Vec<ToolId>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_recursion_depth: 3,
            max_paraphrases: 1,
            max_replans: 1,
            top_k: 5,
            similarity_threshold: Some(1.25),
            api_interaction_limit: 100,
            strategy: PlannerStrategy::dfs(),
            default_tools: Vec::new(),
        }
    }
}

impl PlannerSettings {
    pub fn from_config(section: &PlannerSection) -> Self {
        let strategy = PlannerStrategy::parse(&section.strategy).unwrap_or_else(|| {
            tracing::warn!(strategy = %section.strategy, "unknown planner strategy, using dfs");
            PlannerStrategy::dfs()
        });
        Self {
            max_recursion_depth: section.max_recursion_depth,
            max_paraphrases: section.max_paraphrases,
            max_replans: section.max_replans,
            top_k: section.top_k,
            similarity_threshold: section.similarity_threshold,
            api_interaction_limit: section.api_interaction_limit,
            strategy,
            default_tools: section.default_tools.iter().map(|s| ToolId::parse(s)).collect(),
        }
    }
}

/// 规划所需的全部协作方，由调用方创建并拥有
pub struct PlannerContext {
    pub reasoner: Arc<dyn Reasoner>,
    pub repository: ToolRepository,
    pub synthesizer: Option<ToolSynthesizer>,
}

impl PlannerContext {
    pub fn new(reasoner: Arc<dyn Reasoner>, repository: ToolRepository) -> Self {
        Self {
            reasoner,
            repository,
            synthesizer: None,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: ToolSynthesizer) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }
}

enum Step {
    Done(TaskResult),
    /// 节点状态已改变（改写、生成工具、重新分解），重新推进同一节点
    Retry,
}

pub struct Planner {
    context: PlannerContext,
    settings: PlannerSettings,
}

impl Planner {
    pub fn new(context: PlannerContext, settings: PlannerSettings) -> Self {
        Self { context, settings }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn repository(&self) -> &ToolRepository {
        &self.context.repository
    }

    pub fn repository_mut(&mut self) -> &mut ToolRepository {
        &mut self.context.repository
    }

    pub fn into_context(self) -> PlannerContext {
        self.context
    }

    /// 求解用户任务，返回完整的任务树；根节点的结果即答案
    pub async fn run(&mut self, prompt: &str) -> Result<TaskTree, PlannerError> {
        let mut tree = TaskTree::new(prompt);
        let root = tree.root();
        tracing::info!(task = prompt, "planning started");
        self.resolve(&mut tree, root, 0).await?;
        self.context.repository.verify_consistency()?;
        tracing::info!(nodes = tree.len(), answer = ?tree.answer(), "planning finished");
        Ok(tree)
    }

    /// 按工具的 predecessor 提示检查最新计划的工具顺序
    pub fn validate_tool_order(&self, tree: &TaskTree) -> Result<bool, String> {
        let repo = &self.context.repository;
        tree.validate_tool_order(tree.root(), &|tool: &ToolId| {
            repo.get(tool).and_then(|t| t.definition.predecessor.clone())
        })
    }

    fn resolve<'a>(
        &'a mut self,
        tree: &'a mut TaskTree,
        id: TaskId,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), PlannerError>> {
        Box::pin(async move {
            // step 只在 depth < max_recursion_depth 时分解，经 run 进入的节点不会超过上限
            let result = if depth > self.settings.max_recursion_depth {
                TaskResult::Failed(
                    PlannerError::RecursionLimitReached(tree.node(id).description.clone()).to_string(),
                )
            } else {
                loop {
                    match self.step(tree, id, depth).await? {
                        Step::Done(result) => break result,
                        Step::Retry => continue,
                    }
                }
            };
            tracing::info!(task = %id, depth, result = %result, "task resolved");
            tree.set_result(id, result);
            Ok(())
        })
    }

    async fn step(&mut self, tree: &mut TaskTree, id: TaskId, depth: usize) -> Result<Step, PlannerError> {
        let strategy = self.settings.strategy;
        let node = tree.node(id);
        let description = node.description.clone();

        let may_decompose = strategy.decompose
            && node.generated_tools.is_empty()
            && depth < self.settings.max_recursion_depth
            && (strategy.backtrack || node.subtasks.is_empty());
        if may_decompose {
            let subtasks = self.decompose(tree, id).await?;
            if subtasks.len() > 1 {
                return self.solve_generation(tree, id, depth, subtasks).await;
            }
            if subtasks.len() == 1 {
                tracing::debug!(task = %id, "single subtask discarded");
            }
        }

        let candidates = self.candidates(tree, id).await?;
        tree.node_mut(id).tool_candidates = candidates.iter().map(|t| t.id().clone()).collect();
        if !candidates.is_empty() {
            return Ok(Step::Done(self.solve_with_tools(tree, id, candidates).await?));
        }

        let node = tree.node(id);
        if strategy.search_library && node.paraphrased_variants.len() < self.settings.max_paraphrases {
            let paraphrased = self
                .context
                .reasoner
                .paraphrase(&description)
                .await
                .map_err(PlannerError::Reasoner)?;
            let paraphrased = if is_empty_answer(&paraphrased) {
                description.clone()
            } else {
                paraphrased.trim().to_string()
            };
            tracing::info!(task = %id, from = %description, to = %paraphrased, "task paraphrased");
            tree.paraphrase(id, paraphrased);
            return Ok(Step::Retry);
        }

        if strategy.synthesize_tools && node.generated_tools.is_empty() {
            let PlannerContext {
                reasoner,
                repository,
                synthesizer,
            } = &mut self.context;
            if let Some(synthesizer) = synthesizer.as_ref() {
                return match synthesizer
                    .synthesize(&description, &**reasoner, repository)
                    .await
                {
                    Ok(tool) => {
                        tree.node_mut(id).generated_tools.push(tool);
                        Ok(Step::Retry)
                    }
                    Err(e @ PlannerError::ToolSynthesisFailed(_)) => {
                        Ok(Step::Done(TaskResult::Failed(e.to_string())))
                    }
                    Err(e) => Err(e),
                };
            }
        }

        Ok(Step::Done(TaskResult::Failed(format!(
            "No suitable tool found for `{description}`."
        ))))
    }

    async fn decompose(&self, tree: &TaskTree, id: TaskId) -> Result<Vec<String>, PlannerError> {
        let node = tree.node(id);
        let verbose = self.context.repository.verbose_ids();
        let tool_names: Vec<String> = self
            .context_tools(&node.description)
            .await?
            .iter()
            .map(|t| t.id().display_with(verbose))
            .collect();
        let failed_plans: Vec<Vec<String>> = node
            .subtasks
            .iter()
            .map(|generation| {
                generation
                    .iter()
                    .map(|c| tree.node(*c).description.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        let context = DecompositionContext {
            tool_names,
            previous: previous_results(tree, id),
            failed_plans,
        };
        let subtasks: Vec<String> = self
            .context
            .reasoner
            .decompose(&node.description, &context)
            .await
            .map_err(PlannerError::Reasoner)?
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        tracing::debug!(task = %id, subtasks = ?subtasks, "task decomposed");
        Ok(subtasks)
    }

    /// 依次递归一代子任务，再按结果回溯或汇总
    async fn solve_generation(
        &mut self,
        tree: &mut TaskTree,
        id: TaskId,
        depth: usize,
        subtasks: Vec<String>,
    ) -> Result<Step, PlannerError> {
        let children = tree.add_generation(id, subtasks);
        for child in &children {
            self.resolve(tree, *child, depth + 1).await?;
        }

        let failed = children
            .iter()
            .find(|c| tree.result(**c).map_or(true, TaskResult::is_failed));
        if let Some(failed) = failed {
            let node = tree.node(id);
            if !self.settings.strategy.backtrack {
                let reason = tree
                    .result(*failed)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                return Ok(Step::Done(TaskResult::Failed(format!(
                    "Subtask `{}` failed: {reason}",
                    tree.node(*failed).description
                ))));
            }
            if node.subtasks.len() > self.settings.max_replans {
                let tried = node
                    .subtasks
                    .iter()
                    .map(|generation| {
                        let plan: Vec<&str> = generation
                            .iter()
                            .map(|c| tree.node(*c).description.as_str())
                            .collect();
                        format!(" - {plan:?}")
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                return Ok(Step::Done(TaskResult::Failed(
                    PlannerError::ReplanLimitReached(tried).to_string(),
                )));
            }
            tracing::info!(task = %id, generation = node.subtasks.len(), "subtask failed, replanning");
            return Ok(Step::Retry);
        }

        let information: Vec<(String, String)> = children
            .iter()
            .map(|c| {
                let node = tree.node(*c);
                let result = node.result.as_ref().map(ToString::to_string).unwrap_or_default();
                (node.description.clone(), result)
            })
            .collect();
        let description = tree.node(id).description.clone();
        let answer = self
            .context
            .reasoner
            .aggregate(&description, &information)
            .await
            .map_err(PlannerError::Reasoner)?;
        if is_empty_answer(&answer) {
            return Ok(Step::Done(TaskResult::Failed(
                "Could not solve the task based on its subtasks' results.".to_string(),
            )));
        }
        Ok(Step::Done(TaskResult::Solved(answer.trim().to_string())))
    }

    /// 分解时参考的工具：不设阈值的检索结果
    async fn context_tools(&self, description: &str) -> Result<Vec<Arc<RegisteredTool>>, PlannerError> {
        let repo = &self.context.repository;
        if !self.settings.strategy.search_library {
            return Ok(repo.tools().cloned().collect());
        }
        let mut tools = repo.search(description, self.settings.top_k, None).await?;
        self.append_default_tools(&mut tools);
        Ok(tools)
    }

    fn append_default_tools(&self, tools: &mut Vec<Arc<RegisteredTool>>) {
        for id in &self.settings.default_tools {
            if tools.iter().any(|t| t.id() == id) {
                continue;
            }
            match self.context.repository.get(id) {
                Some(tool) => tools.push(tool),
                None => tracing::warn!(tool = %id, "default tool not in repository"),
            }
        }
    }

    /// 叶子的候选工具：阈值内的检索结果，加上为该节点生成的工具与默认工具
    async fn candidates(&self, tree: &TaskTree, id: TaskId) -> Result<Vec<Arc<RegisteredTool>>, PlannerError> {
        let repo = &self.context.repository;
        let node = tree.node(id);
        let mut candidates: Vec<Arc<RegisteredTool>> = if self.settings.strategy.search_library {
            let nearest = repo
                .search_scored(&node.description, self.settings.top_k, None)
                .await?;
            tracing::debug!(
                task = %id,
                nearest = ?nearest.iter().map(|(t, d)| format!("{}={d:.3}", t.id())).collect::<Vec<_>>(),
                "nearest tools"
            );
            let threshold = self.settings.similarity_threshold;
            nearest
                .into_iter()
                .take_while(|(_, d)| threshold.map_or(true, |t| *d < t))
                .map(|(tool, _)| tool)
                .collect()
        } else {
            repo.tools().cloned().collect()
        };
        for generated in &node.generated_tools {
            if candidates.iter().all(|t| t.id() != generated) {
                if let Some(tool) = repo.get(generated) {
                    candidates.push(tool);
                }
            }
        }
        if self.settings.strategy.search_library {
            self.append_default_tools(&mut candidates);
        }
        Ok(candidates)
    }

    /// 叶子求解循环：Reasoner 请求工具调用或给出答案，最多 api_interaction_limit 轮
    async fn solve_with_tools(
        &mut self,
        tree: &mut TaskTree,
        id: TaskId,
        mut candidates: Vec<Arc<RegisteredTool>>,
    ) -> Result<TaskResult, PlannerError> {
        let verbose = self.context.repository.verbose_ids();
        let description = tree.node(id).description.clone();
        let library = if self.settings.strategy.crud {
            library_definitions(self.context.synthesizer.is_some())
        } else {
            Vec::new()
        };
        let mut context = SolveContext {
            previous: previous_results(tree, id),
            transcript: Vec::new(),
            verbose_ids: verbose,
        };

        for round in 0..self.settings.api_interaction_limit {
            let definitions: Vec<ToolDefinition> = candidates
                .iter()
                .map(|t| t.definition.clone())
                .chain(library.iter().cloned())
                .collect();
            let step = self
                .context
                .reasoner
                .choose_tools_and_solve(&description, &definitions, &context)
                .await
                .map_err(PlannerError::Reasoner)?;
            let calls = match step {
                SolveStep::Answer(answer) if !is_empty_answer(&answer) => {
                    return Ok(TaskResult::Solved(answer.trim().to_string()));
                }
                SolveStep::Calls(calls) if !calls.is_empty() => calls,
                _ => {
                    let names: Vec<String> = candidates.iter().map(|t| t.id().display_with(verbose)).collect();
                    return Ok(TaskResult::Failed(format!(
                        "Could not solve the task `{description}` with the tools {names:?}."
                    )));
                }
            };

            // 管理调用按出现顺序立即生效；其他名称只能指向候选工具，否则得到 UnknownTool
            let mut outputs: Vec<Option<String>> = vec![None; calls.len()];
            let mut invocations = Vec::new();
            let mut positions = Vec::new();
            for (i, call) in calls.iter().enumerate() {
                let name = call.name.trim();
                if let Some(action) = LibraryAction::parse(&library, name, &call.arguments, verbose) {
                    let output = match action {
                        Ok(action) => self.apply_library_action(tree, id, &mut candidates, action).await?,
                        Err(reason) => ToolError::InvalidArguments {
                            tool: name.to_string(),
                            reason,
                        }
                        .to_feedback(),
                    };
                    outputs[i] = Some(output);
                    continue;
                }
                let target = candidates
                    .iter()
                    .find(|t| t.id().display_with(verbose) == name || t.id().qualified() == name);
                match target {
                    Some(tool) => {
                        let call_id = if call.id.is_empty() {
                            format!("call_{round}_{i}")
                        } else {
                            call.id.clone()
                        };
                        positions.push(i);
                        invocations.push(ToolInvocation::new(call_id, tool.id().clone(), call.arguments.clone()));
                    }
                    None => {
                        tracing::warn!(task = %id, tool = name, "call to a tool outside the candidates");
                        outputs[i] = Some(ToolError::UnknownTool(name.to_string()).to_feedback());
                    }
                }
            }
            let results = self.context.repository.execute_batch(invocations).await;
            for (pos, result) in positions.into_iter().zip(results) {
                outputs[pos] = Some(result.to_feedback());
            }
            for (call, output) in calls.into_iter().zip(outputs) {
                context.transcript.push(ToolExchange {
                    call,
                    output: output.unwrap_or_default(),
                });
            }
        }

        Ok(TaskResult::Failed(format!(
            "Reached API interaction limit of {}.",
            self.settings.api_interaction_limit
        )))
    }

    /// 执行一次工具库管理调用，返回给 Reasoner 的文本；只有 Reasoner 通信失败与致命的工具库错误向上传播
    async fn apply_library_action(
        &mut self,
        tree: &mut TaskTree,
        id: TaskId,
        candidates: &mut Vec<Arc<RegisteredTool>>,
        action: LibraryAction,
    ) -> Result<String, PlannerError> {
        tracing::info!(task = %id, action = ?action, "library action");
        match action {
            LibraryAction::Create { task_description } => {
                let PlannerContext {
                    reasoner,
                    repository,
                    synthesizer,
                } = &mut self.context;
                let Some(synthesizer) = synthesizer.as_ref() else {
                    return Ok(ToolError::UnknownTool("create_tool".to_string()).to_feedback());
                };
                match synthesizer
                    .synthesize(&task_description, &**reasoner, repository)
                    .await
                {
                    Ok(tool_id) => {
                        if let Some(tool) = repository.get(&tool_id) {
                            candidates.push(tool);
                        }
                        let node = tree.node_mut(id);
                        node.generated_tools.push(tool_id.clone());
                        node.tool_candidates.push(tool_id.clone());
                        Ok(format!(
                            "Made tool `{}` available via the tool library.",
                            tool_id.display_with(repository.verbose_ids())
                        ))
                    }
                    Err(e @ PlannerError::ToolSynthesisFailed(_)) => Ok(format!("Error: {e}")),
                    Err(e) => Err(e),
                }
            }
            LibraryAction::Update {
                tool_name,
                instruction,
            } => {
                let tool_id = match self.library_target(&tool_name, "update") {
                    Ok(tool_id) => tool_id,
                    Err(feedback) => return Ok(feedback),
                };
                let path = match self.context.repository.get(&tool_id).map(|t| t.definition.origin.clone()) {
                    Some(ToolOrigin::Script { path }) => path,
                    _ => {
                        return Ok(format!(
                            "Error: Unable to update {tool_name} because it has no source file."
                        ))
                    }
                };
                let source = match tokio::fs::read_to_string(&path).await {
                    Ok(source) => source,
                    Err(e) => return Ok(format!("Error: Failed reading the code for {tool_name}: {e}")),
                };
                let reply = self
                    .context
                    .reasoner
                    .update_code(&source, &instruction)
                    .await
                    .map_err(PlannerError::Reasoner)?;
                match self
                    .context
                    .repository
                    .update_source(&tool_id, &strip_code_fence(&reply))
                    .await
                {
                    Ok(()) => {
                        if let Some(updated) = self.context.repository.get(&tool_id) {
                            for slot in candidates.iter_mut().filter(|t| t.id() == &tool_id) {
                                *slot = updated.clone();
                            }
                        }
                        Ok(format!("Successfully updated `{tool_name}`."))
                    }
                    Err(e) if e.is_fatal() => Err(e.into()),
                    Err(e) => Ok(format!("Error: Failed updating the code for {tool_name}: {e}")),
                }
            }
            LibraryAction::Delete { tool_name } => {
                let tool_id = match self.library_target(&tool_name, "delete") {
                    Ok(tool_id) => tool_id,
                    Err(feedback) => return Ok(feedback),
                };
                match self.context.repository.remove(&tool_id) {
                    Ok(_) => {
                        candidates.retain(|t| t.id() != &tool_id);
                        Ok(format!("Removed tool {tool_name} from the tool library."))
                    }
                    Err(e) if e.is_fatal() => Err(e.into()),
                    Err(e) => Ok(format!("Error: {e}")),
                }
            }
        }
    }

    /// update / delete 的目标：必须在工具库中，且不是默认工具
    fn library_target(&self, tool_name: &str, verb: &str) -> Result<ToolId, String> {
        let Some(tool_id) = self.context.repository.resolve_name(tool_name) else {
            return Err(ToolError::UnknownTool(tool_name.trim().to_string()).to_feedback());
        };
        if self.settings.default_tools.contains(&tool_id) {
            return Err(format!(
                "Error: Unable to {verb} {tool_name} because it is a default tool."
            ));
        }
        Ok(tool_id)
    }
}

/// 已解决的前序任务：(描述, 结果)，由远及近
fn previous_results(tree: &TaskTree, id: TaskId) -> Vec<(String, String)> {
    let mut previous: Vec<(String, String)> = tree
        .predecessors(id, true)
        .into_iter()
        .filter_map(|p| {
            let node = tree.node(p);
            node.result
                .as_ref()
                .map(|r| (node.description.clone(), r.to_string()))
        })
        .collect();
    previous.reverse();
    previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::planner::reasoner::{ScriptedReasoner, ToolCall};
    use crate::tools::calculator_module;
    use serde_json::json;

    async fn calculator_repo() -> ToolRepository {
        ToolRepository::builder(Arc::new(HashingEmbedder::new(64)))
            .with_module(calculator_module())
            .build()
            .await
            .unwrap()
    }

    fn planner(reasoner: Arc<ScriptedReasoner>, repo: ToolRepository, settings: PlannerSettings) -> Planner {
        Planner::new(PlannerContext::new(reasoner, repo), settings)
    }

    #[test]
    fn test_strategy_presets() {
        assert_eq!(PlannerStrategy::parse("DFS"), Some(PlannerStrategy::dfs()));
        assert!(!PlannerStrategy::cot().backtrack);
        assert!(!PlannerStrategy::tools_only().search_library);
        assert_eq!(PlannerStrategy::parse("naive"), None);
        assert_eq!(PlannerStrategy::parse("auto"), Some(PlannerStrategy::auto()));
        assert!(PlannerStrategy::auto().crud && !PlannerStrategy::dfs().crud);
    }

    #[test]
    fn test_settings_from_config_parse_default_tools() {
        let section = PlannerSection {
            default_tools: vec!["calculator__add".to_string()],
            strategy: "auto".to_string(),
            ..Default::default()
        };
        let settings = PlannerSettings::from_config(&section);
        assert_eq!(settings.default_tools, vec![ToolId::new("calculator", "add")]);
        assert_eq!(settings.strategy, PlannerStrategy::auto());
    }

    #[tokio::test]
    async fn test_node_beyond_depth_limit_fails_without_reasoner() {
        let reasoner = Arc::new(ScriptedReasoner::new().with_decomposition(&["a", "b"]));
        let mut planner = planner(reasoner.clone(), calculator_repo().await, PlannerSettings::default());
        let mut tree = TaskTree::new("Add 1 and 2");
        let root = tree.root();
        planner.resolve(&mut tree, root, 4).await.unwrap();

        let result = tree.result(root).unwrap();
        assert!(result.is_failed());
        assert!(result.to_string().contains("Aborting decomposition beyond the level of `Add 1 and 2`"));
        assert!(reasoner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_library_tools_hidden_without_crud() {
        let reasoner = Arc::new(
            ScriptedReasoner::new().with_calls(vec![ToolCall::new("delete_tool", json!({"tool_name": "add"}))]),
        );
        let settings = PlannerSettings {
            strategy: PlannerStrategy::tools_only(),
            ..Default::default()
        };
        let mut planner = planner(reasoner, calculator_repo().await, settings);
        let tree = planner.run("Remove the add tool").await.unwrap();

        assert_eq!(
            tree.answer().as_deref(),
            Some("Error: delete_tool is not a valid tool. Use only the tools available.")
        );
        assert_eq!(planner.repository().len(), 4);
    }

    #[tokio::test]
    async fn test_tools_only_solves_with_calls() {
        let reasoner = Arc::new(
            ScriptedReasoner::new().with_calls(vec![ToolCall::new("add", json!({"a": 2, "b": 5}))]),
        );
        let settings = PlannerSettings {
            strategy: PlannerStrategy::tools_only(),
            ..Default::default()
        };
        let mut planner = planner(reasoner.clone(), calculator_repo().await, settings);
        let tree = planner.run("Add 2 and 5").await.unwrap();

        assert_eq!(tree.answer().as_deref(), Some("7"));
        assert_eq!(tree.root_node().tool_candidates.len(), 4);
        assert_eq!(reasoner.count("decompose"), 0);
        assert_eq!(reasoner.count("solve"), 2);
    }

    #[tokio::test]
    async fn test_unknown_call_is_reported_to_reasoner() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with_calls(vec![ToolCall::new("launch_rocket", json!({}))])
                .with_answer("gave up politely"),
        );
        let settings = PlannerSettings {
            strategy: PlannerStrategy::tools_only(),
            ..Default::default()
        };
        let mut planner = planner(reasoner, calculator_repo().await, settings);
        let tree = planner.run("Launch a rocket").await.unwrap();
        assert_eq!(tree.answer().as_deref(), Some("gave up politely"));
    }

    #[tokio::test]
    async fn test_interaction_limit() {
        let call = || ToolCall::new("add", json!({"a": 1, "b": 1}));
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with_calls(vec![call()])
                .with_calls(vec![call()])
                .with_calls(vec![call()]),
        );
        let settings = PlannerSettings {
            strategy: PlannerStrategy::tools_only(),
            api_interaction_limit: 2,
            ..Default::default()
        };
        let mut planner = planner(reasoner, calculator_repo().await, settings);
        let tree = planner.run("Add 1 and 1 forever").await.unwrap();
        assert_eq!(
            tree.answer().as_deref(),
            Some("Error: Reached API interaction limit of 2.")
        );
    }

    #[tokio::test]
    async fn test_previous_results_oldest_first() {
        let mut tree = TaskTree::new("root");
        let ids = tree.add_generation(tree.root(), vec!["a".into(), "b".into(), "c".into()]);
        tree.set_result(ids[0], TaskResult::Solved("1".into()));
        tree.set_result(ids[1], TaskResult::Solved("2".into()));
        assert_eq!(
            previous_results(&tree, ids[2]),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }
}
