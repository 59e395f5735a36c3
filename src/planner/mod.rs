//! 规划层：任务树、Reasoner 协作方与提示词、工具生成、工具库管理工具、回溯式 Planner

pub mod library;
pub mod planner;
pub mod prompts;
pub mod reasoner;
pub mod synthesis;
pub mod task;

pub use library::{library_definitions, LibraryAction};
pub use planner::{Planner, PlannerContext, PlannerSettings, PlannerStrategy};
pub use reasoner::{
    extract_json, is_empty_answer, DecompositionContext, LlmReasoner, Reasoner, ReasonerCall,
    ScriptedReasoner, SolveContext, SolveStep, ToolCall, ToolExchange,
};
pub use synthesis::ToolSynthesizer;
pub use task::{TaskId, TaskNode, TaskResult, TaskSnapshot, TaskTree};
