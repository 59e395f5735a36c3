//! 工具库：嵌入索引、SQLite 持久化、可检索可变更的工具仓库

pub mod index;
pub mod repository;
pub mod store;

pub use index::{DistanceMetric, EmbeddingIndex};
pub use repository::{RepositoryBuilder, ToolInvocation, ToolRepository};
pub use store::{StoredTool, ToolStore};
