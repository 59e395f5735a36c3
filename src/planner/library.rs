//! 工具库管理工具：crud 策略下随候选工具一起提供给叶子求解
//!
//! create_tool / update_tool / delete_tool 不经过执行器，由 Planner 直接作用在工具库上，
//! 结果和普通工具一样以文本反馈给 Reasoner。

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{ParamKind, ParamSpec, ToolDefinition, ToolId, ToolOrigin, ToolSchema};

pub const LIBRARY_NAMESPACE: &str = "library";
pub const CREATE_TOOL: &str = "create_tool";
pub const UPDATE_TOOL: &str = "update_tool";
pub const DELETE_TOOL: &str = "delete_tool";

/// 一次工具库管理调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryAction {
    Create { task_description: String },
    Update { tool_name: String, instruction: String },
    Delete { tool_name: String },
}

#[derive(Deserialize)]
struct CreateArgs {
    task_description: String,
}

#[derive(Deserialize)]
struct UpdateArgs {
    tool_name: String,
    instruction: String,
}

#[derive(Deserialize)]
struct DeleteArgs {
    tool_name: String,
}

fn args<T: DeserializeOwned>(arguments: &Value) -> Result<T, String> {
    serde_json::from_value(arguments.clone()).map_err(|e| e.to_string())
}

impl LibraryAction {
    /// 按对外名称识别管理调用；name 不在 definitions 中时返回 None
    pub fn parse(
        definitions: &[ToolDefinition],
        name: &str,
        arguments: &Value,
        verbose: bool,
    ) -> Option<Result<Self, String>> {
        let definition = definitions
            .iter()
            .find(|d| d.id.display_with(verbose) == name || d.id.qualified() == name)?;
        let action = match definition.id.name.as_str() {
            CREATE_TOOL => args::<CreateArgs>(arguments).map(|a| LibraryAction::Create {
                task_description: a.task_description,
            }),
            UPDATE_TOOL => args::<UpdateArgs>(arguments).map(|a| LibraryAction::Update {
                tool_name: a.tool_name,
                instruction: a.instruction,
            }),
            DELETE_TOOL => args::<DeleteArgs>(arguments).map(|a| LibraryAction::Delete {
                tool_name: a.tool_name,
            }),
            other => Err(format!("{other} is not a library tool")),
        };
        Some(action)
    }
}

fn definition(name: &str, description: &str, params: Vec<ParamSpec>) -> ToolDefinition {
    ToolDefinition {
        id: ToolId::new(LIBRARY_NAMESPACE, name),
        description: description.to_string(),
        schema: ToolSchema::new(params),
        timeout: None,
        timeout_message: None,
        predecessor: None,
        successor: None,
        origin: ToolOrigin::Native,
    }
}

/// 管理工具的定义；没有 ToolSynthesizer 时不提供 create_tool
pub fn library_definitions(with_create: bool) -> Vec<ToolDefinition> {
    let mut definitions = Vec::with_capacity(3);
    if with_create {
        definitions.push(definition(
            CREATE_TOOL,
            "Generate a tool and add it to your tool library.",
            vec![ParamSpec::required(
                "task_description",
                ParamKind::String,
                "A textual description of the task to be solved with the new tool.",
            )],
        ));
    }
    definitions.push(definition(
        UPDATE_TOOL,
        "Update a tool in your tool library. Only tools generated from scripts can be updated.",
        vec![
            ParamSpec::required("tool_name", ParamKind::String, "The tool's name as listed in your tools."),
            ParamSpec::required(
                "instruction",
                ParamKind::String,
                "A textual description of the changes to be made to the tool.",
            ),
        ],
    ));
    definitions.push(definition(
        DELETE_TOOL,
        "Delete a tool from your tool library.",
        vec![ParamSpec::required(
            "tool_name",
            ParamKind::String,
            "The tool's name as listed in your tools.",
        )],
    ));
    definitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definitions_without_synthesizer_skip_create() {
        let names: Vec<String> = library_definitions(false)
            .iter()
            .map(|d| d.id.name.clone())
            .collect();
        assert_eq!(names, vec![UPDATE_TOOL, DELETE_TOOL]);
        assert_eq!(library_definitions(true).len(), 3);
    }

    #[test]
    fn test_parse_library_calls() {
        let defs = library_definitions(true);
        let update = LibraryAction::parse(
            &defs,
            "update_tool",
            &json!({"tool_name": "square", "instruction": "Handle negatives."}),
            false,
        );
        assert_eq!(
            update,
            Some(Ok(LibraryAction::Update {
                tool_name: "square".into(),
                instruction: "Handle negatives.".into(),
            }))
        );
        let delete = LibraryAction::parse(&defs, "library__delete_tool", &json!({"tool_name": "add"}), true);
        assert_eq!(delete, Some(Ok(LibraryAction::Delete { tool_name: "add".into() })));

        assert!(matches!(
            LibraryAction::parse(&defs, "create_tool", &json!({}), false),
            Some(Err(_))
        ));
        assert_eq!(LibraryAction::parse(&defs, "add", &json!({}), false), None);
        assert_eq!(LibraryAction::parse(&[], "delete_tool", &json!({"tool_name": "add"}), false), None);
    }
}
