//! treeplan - 工具库规划智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、嵌入、分词
//! - **observability**: tracing 初始化
//! - **planner**: 任务树、Reasoner、工具生成与回溯式 Planner
//! - **repository**: 向量检索 + 持久化的工具库
//! - **tools**: Tool trait、schema、执行器、内置工具与脚本工具

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod planner;
pub mod repository;
pub mod tools;

pub use planner::{Planner, PlannerContext, PlannerSettings, PlannerStrategy, TaskTree};
pub use repository::ToolRepository;
