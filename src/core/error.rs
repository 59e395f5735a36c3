//! 错误类型：工具层 / 工具库层 / 规划层
//!
//! 工具层错误由执行器就地恢复为字符串结果交给 Reasoner；规划层的预算耗尽写入节点的失败结果；
//! 只有索引与映射不同步（EmbeddingIndexDesync）被视为不可恢复的内部缺陷。

use std::time::Duration;

use thiserror::Error;

/// 单次工具调用的失败原因（执行器从不自动重试）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid tool call for {tool} - {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{0} is not a valid tool. Use only the tools available.")]
    UnknownTool(String),

    #[error("{message} ({tool} exceeded {timeout:?})")]
    TimeoutExceeded {
        tool: String,
        timeout: Duration,
        message: String,
    },

    #[error("Tool {tool} failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("Tool {tool} panicked: {reason}")]
    ExecutionPanic { tool: String, reason: String },
}

impl ToolError {
    /// 审计日志中的 outcome 字段
    pub fn outcome(&self) -> &'static str {
        match self {
            ToolError::InvalidArguments { .. } => "invalid",
            ToolError::UnknownTool(_) => "unknown",
            ToolError::TimeoutExceeded { .. } => "timeout",
            ToolError::ExecutionFailed { .. } => "error",
            ToolError::ExecutionPanic { .. } => "panic",
        }
    }

    /// 交给 Reasoner 的自然语言形式
    pub fn to_feedback(&self) -> String {
        format!("Error: {self}")
    }
}

/// 工具库错误
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Update is only supported for modules with exactly one tool; {namespace} exposes {count}")]
    ConflictingUpdate { namespace: String, count: usize },

    #[error("Embedding index out of sync with tool mapping: {0}")]
    EmbeddingIndexDesync(String),

    #[error("Tool id clash: {0} is already registered")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid tool source: {0}")]
    InvalidSource(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepositoryError {
    /// 是否为不可恢复的一致性缺陷
    pub fn is_fatal(&self) -> bool {
        matches!(self, RepositoryError::EmbeddingIndexDesync(_))
    }
}

/// 规划错误；预算类错误只会以节点失败结果的形式出现
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Aborting decomposition beyond the level of `{0}`")]
    RecursionLimitReached(String),

    #[error("Reached maximum replans. Invalid subplans tried are:\n{0}")]
    ReplanLimitReached(String),

    #[error("Could not generate code for a suitable tool: {0}")]
    ToolSynthesisFailed(String),

    #[error("Reasoner error: {0}")]
    Reasoner(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
