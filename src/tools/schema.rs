//! 工具参数 Schema：命名、带类型、必填/可选
//!
//! ParamSpec 只用于声明参数；to_json_schema 输出 OpenAI function-calling 兼容结构，
//! 注册时编译成 ArgumentValidator（jsonschema，Draft 7），执行前用它校验 LLM 给出的参数。
//! 回复格式（分解结果、工具调用）的 Schema 由 schemars 自动生成，拼入 prompt。

use jsonschema::{Draft, JSONSchema};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "string" | "str" => Some(ParamKind::String),
            "integer" | "int" => Some(ParamKind::Integer),
            "number" | "float" => Some(ParamKind::Number),
            "boolean" | "bool" => Some(ParamKind::Boolean),
            "array" | "list" => Some(ParamKind::Array),
            "object" | "dict" => Some(ParamKind::Object),
            _ => None,
        }
    }
}

/// 单个参数声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// 工具参数表（保持声明顺序）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema（properties / required / additionalProperties=false）
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind.as_str(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }
}

/// 编译后的参数校验器，每个注册的工具一份
pub struct ArgumentValidator {
    schema: JSONSchema,
}

impl ArgumentValidator {
    pub fn compile(schema: &ToolSchema) -> Result<Self, String> {
        let value = schema.to_json_schema();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&value)
            .map_err(|e| format!("invalid parameter schema: {e}"))?;
        Ok(Self { schema: compiled })
    }

    /// 校验一次调用的参数；缺省（null）按空对象处理
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let empty = Value::Object(Map::new());
        let args = if args.is_null() { &empty } else { args };
        if let Err(errors) = self.schema.validate(args) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(messages.join("; "));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArgumentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ArgumentValidator")
    }
}

/// 返回任意回复结构的 JSON Schema 字符串，可拼入 prompt
pub fn reply_schema_json<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
