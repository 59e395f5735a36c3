//! 工具生成：让 Reasoner 写脚本，检查通过后落盘并注册进工具库
//!
//! 检查失败（头部缺失、语法错误、文件已存在、名称冲突）时把原因作为反馈重新生成，最多 max_attempts 次。

use std::path::{Path, PathBuf};

use crate::config::SynthesisSection;
use crate::core::PlannerError;
use crate::planner::reasoner::Reasoner;
use crate::repository::ToolRepository;
use crate::tools::{strip_code_fence, ToolId};

#[derive(Debug, Clone)]
pub struct ToolSynthesizer {
    directory: PathBuf,
    max_attempts: usize,
}

impl ToolSynthesizer {
    pub fn new(directory: impl Into<PathBuf>, max_attempts: usize) -> Self {
        Self {
            directory: directory.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(section: &SynthesisSection) -> Self {
        Self::new(section.directory.clone(), section.max_attempts)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 生成、检查、落盘并注册一个工具，返回其 id
    pub async fn synthesize(
        &self,
        task: &str,
        reasoner: &dyn Reasoner,
        repository: &mut ToolRepository,
    ) -> Result<ToolId, PlannerError> {
        let mut feedback: Option<String> = None;
        for attempt in 1..=self.max_attempts {
            let reply = reasoner
                .generate_code(task, feedback.as_deref())
                .await
                .map_err(PlannerError::Reasoner)?;
            let source = strip_code_fence(&reply);

            let manifest = match repository.loader().check(&source).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(task, attempt, error = %e, "generated tool rejected");
                    feedback = Some(e);
                    continue;
                }
            };

            let path = self.directory.join(format!(
                "{}_module.{}",
                manifest.name,
                repository.loader().extension()
            ));
            if path.exists() {
                let msg = format!("a module for tool `{}` already exists; choose another name", manifest.name);
                tracing::warn!(task, attempt, path = %path.display(), "generated tool path taken");
                feedback = Some(msg);
                continue;
            }

            tokio::fs::create_dir_all(&self.directory)
                .await
                .map_err(|e| PlannerError::Repository(e.into()))?;
            tokio::fs::write(&path, &source)
                .await
                .map_err(|e| PlannerError::Repository(e.into()))?;

            match repository.add_source(&path).await {
                Ok(ids) => {
                    if let Some(id) = ids.into_iter().next() {
                        tracing::info!(task, tool = %id, path = %path.display(), "tool generated");
                        return Ok(id);
                    }
                    feedback = Some("the module exposes no tool".to_string());
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(task, attempt, error = %e, "generated tool could not be registered");
                    feedback = Some(e.to_string());
                }
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove rejected tool source");
            }
        }
        Err(PlannerError::ToolSynthesisFailed(format!(
            "no valid tool after {} attempts; last problem: {}",
            self.max_attempts,
            feedback.unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::planner::reasoner::ScriptedReasoner;
    use std::sync::Arc;

    const SQUARE: &str = "```sh\n# tool: square\n# description: Square an integer.\n# param x: integer - value to square\necho $((TOOL_ARG_X * TOOL_ARG_X))\n```";

    async fn empty_repo() -> ToolRepository {
        ToolRepository::builder(Arc::new(HashingEmbedder::new(64)))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_synthesize_after_rejected_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let synth = ToolSynthesizer::new(dir.path(), 3);
        let reasoner = ScriptedReasoner::new().with_code("echo no header").with_code(SQUARE);
        let mut repo = empty_repo().await;

        let id = synth.synthesize("square 7", &reasoner, &mut repo).await.unwrap();
        assert_eq!(id, ToolId::new("square_module", "square"));
        assert!(dir.path().join("square_module.sh").exists());
        assert_eq!(reasoner.count("generate_code"), 2);

        let result = repo.execute(&id, serde_json::json!({"x": 7})).await;
        assert_eq!(result.value(), Some("49"));
    }

    #[tokio::test]
    async fn test_synthesis_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let synth = ToolSynthesizer::new(dir.path(), 2);
        let reasoner = ScriptedReasoner::new();
        let mut repo = empty_repo().await;

        let err = synth.synthesize("anything", &reasoner, &mut repo).await.unwrap_err();
        assert!(matches!(err, PlannerError::ToolSynthesisFailed(_)));
        assert_eq!(reasoner.count("generate_code"), 2);
        assert!(repo.is_empty());
    }
}
