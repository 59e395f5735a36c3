//! 脚本工具头部声明解析
//!
//! 生成的脚本以注释头声明自己：
//!
//! ```text
//! # tool: add_numbers
//! # description: Add two numbers and print the sum.
//! # param a: number - The first summand.
//! # param label: string, optional - Free text.
//! # timeout: 5
//! ```
//!
//! description 可以出现多行，按顺序拼接。头部之后的内容不解析。

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::tools::schema::{ParamKind, ParamSpec, ToolSchema};

/// 脚本可声明的最长超时（一天）
const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// 从脚本头部解析出的工具声明
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptManifest {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub timeout: Option<Duration>,
}

fn param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^param\s+([A-Za-z_][A-Za-z0-9_]*)\s*:\s*([A-Za-z]+)\s*(,\s*optional)?\s*(?:-\s*(.*))?$",
        )
        .expect("static regex")
    })
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// 解析脚本头部；缺少 tool 或 description 时报错
pub fn parse_manifest(source: &str) -> Result<ScriptManifest, String> {
    let mut name: Option<String> = None;
    let mut description: Vec<String> = Vec::new();
    let mut params = Vec::new();
    let mut timeout = None;

    for line in source.lines() {
        let line = line.trim();
        if line.starts_with("#!") {
            continue;
        }
        let Some(body) = line.strip_prefix('#') else {
            continue;
        };
        let body = body.trim();

        if let Some(rest) = body.strip_prefix("tool:") {
            let candidate = rest.trim();
            if !ident_re().is_match(candidate) {
                return Err(format!("invalid tool name '{candidate}'"));
            }
            if name.replace(candidate.to_string()).is_some() {
                return Err("a script may declare exactly one tool".to_string());
            }
        } else if let Some(rest) = body.strip_prefix("description:") {
            description.push(rest.trim().to_string());
        } else if let Some(rest) = body.strip_prefix("timeout:") {
            let secs: f64 = rest
                .trim()
                .parse()
                .map_err(|_| format!("invalid timeout '{}'", rest.trim()))?;
            if secs <= 0.0 {
                return Err(format!("timeout must be positive, got {secs}"));
            }
            let duration = Duration::try_from_secs_f64(secs)
                .map_err(|_| format!("invalid timeout '{}'", rest.trim()))?;
            if duration > MAX_TIMEOUT {
                return Err(format!(
                    "timeout must be at most {} seconds, got {secs}",
                    MAX_TIMEOUT.as_secs()
                ));
            }
            timeout = Some(duration);
        } else if body.starts_with("param") {
            let caps = param_re()
                .captures(body)
                .ok_or_else(|| format!("malformed param line '{body}'"))?;
            let kind = ParamKind::parse(&caps[2])
                .ok_or_else(|| format!("unknown param type '{}'", &caps[2]))?;
            params.push(ParamSpec {
                name: caps[1].to_string(),
                kind,
                description: caps.get(4).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                required: caps.get(3).is_none(),
            });
        }
    }

    let name = name.ok_or_else(|| "missing '# tool: <name>' header".to_string())?;
    let description = description.join(" ").trim().to_string();
    if description.is_empty() {
        return Err(format!("tool '{name}' has no '# description:' header"));
    }
    Ok(ScriptManifest {
        name,
        description,
        schema: ToolSchema::new(params),
        timeout,
    })
}

/// 去掉 LLM 回复里的 markdown 代码围栏
pub fn strip_code_fence(code: &str) -> String {
    let trimmed = code.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let without_open = trimmed
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or("");
    without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD: &str = "#!/bin/sh\n\
# tool: add_numbers\n\
# description: Add two numbers\n\
# description: and print the sum.\n\
# param a: number - The first summand.\n\
# param b: float - The second summand.\n\
# param label: string, optional\n\
# timeout: 2.5\n\
echo $((TOOL_ARG_A + TOOL_ARG_B))\n";

    #[test]
    fn test_parse_full_header() {
        let m = parse_manifest(ADD).unwrap();
        assert_eq!(m.name, "add_numbers");
        assert_eq!(m.description, "Add two numbers and print the sum.");
        assert_eq!(m.schema.params.len(), 3);
        assert!(m.schema.params[0].required);
        assert_eq!(m.schema.params[1].kind, ParamKind::Number);
        assert!(!m.schema.params[2].required);
        assert_eq!(m.schema.params[0].description, "The first summand.");
        assert_eq!(m.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_missing_headers_rejected() {
        assert!(parse_manifest("echo hi").unwrap_err().contains("tool"));
        assert!(parse_manifest("# tool: x\necho").unwrap_err().contains("description"));
        assert!(parse_manifest("# tool: bad-name\n# description: d").is_err());
        assert!(parse_manifest("# tool: a\n# tool: b\n# description: d").is_err());
    }

    #[test]
    fn test_unrepresentable_timeouts_rejected() {
        for value in ["inf", "NaN", "1e30", "-1", "0", "90000"] {
            let src = format!("# tool: t\n# description: d\n# timeout: {value}\n");
            assert!(parse_manifest(&src).is_err(), "{value}");
        }
        let src = "# tool: t\n# description: d\n# timeout: 86400\n";
        assert_eq!(parse_manifest(src).unwrap().timeout, Some(MAX_TIMEOUT));
    }

    #[test]
    fn test_bad_param_rejected() {
        let src = "# tool: t\n# description: d\n# param x: tuple\n";
        assert!(parse_manifest(src).unwrap_err().contains("tuple"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```sh\necho hi\n```"), "echo hi");
        assert_eq!(strip_code_fence("  echo hi \n"), "echo hi");
    }
}
