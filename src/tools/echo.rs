//! echo：回显文本，可重复多次（冒烟测试与单工具模块的示例）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::schema::{ParamKind, ParamSpec, ToolSchema};
use crate::tools::Tool;

const MAX_REPEAT: u64 = 10;

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged, optionally repeated several times."
    }

    fn parameters_schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::required("text", ParamKind::String, "The text to return."),
            ParamSpec::optional("times", ParamKind::Integer, "How often to repeat it (1-10)."),
        ])
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| "'text' must be a string".to_string())?;
        let times = args.get("times").and_then(Value::as_u64).unwrap_or(1);
        if times == 0 || times > MAX_REPEAT {
            return Err(format!("'times' must be between 1 and {MAX_REPEAT}"));
        }
        Ok(vec![text; times as usize].join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_repeats() {
        assert_eq!(EchoTool.execute(json!({"text": "hi"})).await.unwrap(), "hi");
        assert_eq!(EchoTool.execute(json!({"text": "hi", "times": 3})).await.unwrap(), "hi hi hi");
        assert!(EchoTool.execute(json!({"text": "hi", "times": 0})).await.is_err());
    }
}
