//! 工具与工具模块
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute）；
//! 同一来源（一个 Rust 类型或一个生成的脚本）的工具组成 ToolModule，模块名即命名空间。
//! 注册进工具库后的工具为 RegisteredTool：不可变的 ToolDefinition + 实际可调用对象。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::schema::{ArgumentValidator, ToolSchema};

/// 工具 trait：名称、描述（供 LLM 理解，也是嵌入的键）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（命名空间内唯一）
    fn name(&self) -> &str;

    /// 工具描述
    fn description(&self) -> &str;

    /// 参数声明，默认无参数
    fn parameters_schema(&self) -> ToolSchema {
        ToolSchema::default()
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具身份：(命名空间, 名称)，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolId {
    pub namespace: String,
    pub name: String,
}

impl ToolId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// 完整 id：namespace__name（模块路径中的 . 替换为 __）
    pub fn qualified(&self) -> String {
        format!("{}__{}", self.namespace.replace('.', "__"), self.name)
    }

    /// 对 LLM 暴露的名称；verbose 时带命名空间
    pub fn display_with(&self, verbose: bool) -> String {
        if verbose {
            self.qualified()
        } else {
            self.name.clone()
        }
    }

    /// 解析 qualified 形式；没有分隔符时视为无命名空间
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once("__") {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Self::new(ns, name),
            _ => Self::new("", s),
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// 工具来源：原生 Rust 实现，或磁盘上的脚本文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolOrigin {
    Native,
    Script { path: PathBuf },
}

impl ToolOrigin {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolOrigin::Native => "native",
            ToolOrigin::Script { .. } => "script",
        }
    }
}

/// 工具库中一条工具的静态描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: ToolId,
    pub description: String,
    pub schema: ToolSchema,
    pub timeout: Option<Duration>,
    pub timeout_message: Option<String>,
    /// 软顺序提示：通常应在该工具之后调用
    pub predecessor: Option<ToolId>,
    /// 软顺序提示：通常应在该工具之前调用
    pub successor: Option<ToolId>,
    pub origin: ToolOrigin,
}

impl ToolDefinition {
    /// 嵌入键：`name:\ndescription`
    pub fn embedding_text(&self) -> String {
        format!("{}:\n{}", self.id.name, self.description)
    }

    /// function-calling 格式的定义，name 用对外名称
    pub fn to_function_json(&self, verbose: bool) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.id.display_with(verbose),
                "description": self.description,
                "parameters": self.schema.to_json_schema(),
            }
        })
    }
}

/// 注册进工具库的工具：定义 + 可调用对象 + 编译好的参数校验器
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn Tool>,
    validator: ArgumentValidator,
}

impl RegisteredTool {
    pub fn new(definition: ToolDefinition, handler: Arc<dyn Tool>) -> Result<Self, String> {
        let validator = ArgumentValidator::compile(&definition.schema)?;
        Ok(Self {
            definition,
            handler,
            validator,
        })
    }

    pub fn id(&self) -> &ToolId {
        &self.definition.id
    }

    pub fn validate_arguments(&self, args: &Value) -> Result<(), String> {
        self.validator.validate(args)
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("id", &self.definition.id)
            .field("origin", &self.definition.origin)
            .finish()
    }
}

/// 单个工具的注册选项（超时、顺序提示）
#[derive(Debug, Clone, Default)]
pub struct ToolOptions {
    pub timeout: Option<Duration>,
    pub timeout_message: Option<String>,
    pub predecessor: Option<ToolId>,
    pub successor: Option<ToolId>,
}

/// 工具模块：同一来源下的一组工具
pub struct ToolModule {
    pub namespace: String,
    pub origin: ToolOrigin,
    pub tools: Vec<(Arc<dyn Tool>, ToolOptions)>,
}

impl ToolModule {
    pub fn native(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            origin: ToolOrigin::Native,
            tools: Vec::new(),
        }
    }

    pub fn script(namespace: impl Into<String>, path: PathBuf) -> Self {
        Self {
            namespace: namespace.into(),
            origin: ToolOrigin::Script { path },
            tools: Vec::new(),
        }
    }

    pub fn with_tool(self, tool: impl Tool + 'static) -> Self {
        self.with_tool_options(tool, ToolOptions::default())
    }

    pub fn with_tool_options(mut self, tool: impl Tool + 'static, options: ToolOptions) -> Self {
        self.tools.push((Arc::new(tool), options));
        self
    }

    pub fn push(&mut self, tool: Arc<dyn Tool>, options: ToolOptions) {
        self.tools.push((tool, options));
    }

    /// 只保留指定名称的工具（None 表示全部保留）
    pub fn select(mut self, names: Option<&[&str]>) -> Self {
        if let Some(names) = names {
            self.tools.retain(|(t, _)| names.contains(&t.name()));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 依据仓库默认超时生成定义（工具未指定时用默认值）
    pub fn definitions(
        &self,
        default_timeout: Option<Duration>,
        default_timeout_message: &str,
    ) -> Vec<(ToolDefinition, Arc<dyn Tool>)> {
        self.tools
            .iter()
            .map(|(tool, opts)| {
                let definition = ToolDefinition {
                    id: ToolId::new(&self.namespace, tool.name()),
                    description: tool.description().to_string(),
                    schema: tool.parameters_schema(),
                    timeout: opts.timeout.or(default_timeout),
                    timeout_message: Some(
                        opts.timeout_message
                            .clone()
                            .unwrap_or_else(|| default_timeout_message.to_string()),
                    ),
                    predecessor: opts.predecessor.clone(),
                    successor: opts.successor.clone(),
                    origin: self.origin.clone(),
                };
                (definition, tool.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn test_tool_id_forms() {
        let id = ToolId::new("plugins.math", "add");
        assert_eq!(id.qualified(), "plugins__math__add");
        assert_eq!(id.display_with(false), "add");
        assert_eq!(ToolId::parse("math__add"), ToolId::new("math", "add"));
        assert_eq!(ToolId::parse("add"), ToolId::new("", "add"));
    }

    #[test]
    fn test_module_definitions_apply_defaults() {
        let module = ToolModule::native("util")
            .with_tool(EchoTool)
            .with_tool_options(
                EchoTool,
                ToolOptions {
                    timeout: Some(Duration::from_millis(5)),
                    timeout_message: Some("slow echo".into()),
                    ..Default::default()
                },
            );
        let defs = module.definitions(Some(Duration::from_secs(60)), "default msg");
        assert_eq!(defs[0].0.timeout, Some(Duration::from_secs(60)));
        assert_eq!(defs[0].0.timeout_message.as_deref(), Some("default msg"));
        assert_eq!(defs[1].0.timeout, Some(Duration::from_millis(5)));
        assert_eq!(defs[1].0.timeout_message.as_deref(), Some("slow echo"));
        assert_eq!(defs[0].0.embedding_text(), format!("echo:\n{}", EchoTool.description()));
    }

    #[test]
    fn test_select_filters_by_name() {
        let module = ToolModule::native("util").with_tool(EchoTool).select(Some(&["other"]));
        assert!(module.is_empty());
    }
}
