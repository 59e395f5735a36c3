//! 核心类型：工具层 / 工具库层 / 规划层的错误

pub mod error;

pub use error::{PlannerError, RepositoryError, ToolError};
