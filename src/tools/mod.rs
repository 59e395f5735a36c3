//! 工具层：Tool trait 与参数 schema、工具模块、执行器、内置工具（calculator / echo）与脚本工具

pub mod calculator;
pub mod echo;
pub mod executor;
pub mod manifest;
pub mod registry;
pub mod schema;
pub mod script;

pub use calculator::{calculator_module, ArithmeticTool, CALCULATOR_NAMESPACE};
pub use echo::EchoTool;
pub use executor::{Job, JobResult, ToolExecutor, DEFAULT_TIMEOUT_MESSAGE};
pub use manifest::{parse_manifest, strip_code_fence, ScriptManifest};
pub use registry::{
    RegisteredTool, Tool, ToolDefinition, ToolId, ToolModule, ToolOptions, ToolOrigin,
};
pub use schema::{reply_schema_json, ArgumentValidator, ParamKind, ParamSpec, ToolSchema};
pub use script::{ScriptLoader, ScriptTool, SourceLoader};
