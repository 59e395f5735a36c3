//! 内置计算器模块：add / subtract / multiply / divide
//!
//! 作为一个原生 ToolModule（命名空间 calculator）注册，供命令行与测试使用。

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::schema::{ParamKind, ParamSpec, ToolSchema};
use crate::tools::{Tool, ToolModule};

pub const CALCULATOR_NAMESPACE: &str = "calculator";

#[derive(Debug, Clone, Copy)]
enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// 二元算术工具
pub struct ArithmeticTool {
    op: Op,
}

impl ArithmeticTool {
    pub fn add() -> Self {
        Self { op: Op::Add }
    }

    pub fn subtract() -> Self {
        Self { op: Op::Subtract }
    }

    pub fn multiply() -> Self {
        Self { op: Op::Multiply }
    }

    pub fn divide() -> Self {
        Self { op: Op::Divide }
    }
}

fn number_arg(args: &Value, key: &str) -> Result<f64, String> {
    args.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("'{key}' must be a number"))
}

/// 整数结果不带小数点（7 而不是 7.0）
pub fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

#[async_trait]
impl Tool for ArithmeticTool {
    fn name(&self) -> &str {
        match self.op {
            Op::Add => "add",
            Op::Subtract => "subtract",
            Op::Multiply => "multiply",
            Op::Divide => "divide",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            Op::Add => "Add two numbers.",
            Op::Subtract => "Subtract one number from another.",
            Op::Multiply => "Multiply two numbers.",
            Op::Divide => "Divide a number by another number.",
        }
    }

    fn parameters_schema(&self) -> ToolSchema {
        let (a, b) = match self.op {
            Op::Add => ("The first summand.", "The second summand."),
            Op::Subtract => ("The minuend.", "The subtrahend."),
            Op::Multiply => ("The first factor.", "The second factor."),
            Op::Divide => ("The dividend.", "The divisor."),
        };
        ToolSchema::new(vec![
            ParamSpec::required("a", ParamKind::Number, a),
            ParamSpec::required("b", ParamKind::Number, b),
        ])
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let a = number_arg(&args, "a")?;
        let b = number_arg(&args, "b")?;
        let value = match self.op {
            Op::Add => a + b,
            Op::Subtract => a - b,
            Op::Multiply => a * b,
            Op::Divide => {
                if b == 0.0 {
                    return Err("division by zero".to_string());
                }
                a / b
            }
        };
        Ok(format_number(value))
    }
}

/// 计算器模块（四个工具同属一个命名空间，因此不支持 update）
pub fn calculator_module() -> ToolModule {
    ToolModule::native(CALCULATOR_NAMESPACE)
        .with_tool(ArithmeticTool::add())
        .with_tool(ArithmeticTool::subtract())
        .with_tool(ArithmeticTool::multiply())
        .with_tool(ArithmeticTool::divide())
}
