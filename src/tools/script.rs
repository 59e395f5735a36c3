//! 脚本工具：由解释器执行的单工具模块（动态生成的工具也落地为脚本）
//!
//! 执行时无 shell，直接 exec `interpreter <path>`；参数以 JSON 写入 stdin，
//! 同时以 TOOL_ARG_<NAME> 环境变量提供；stdout（trim 后）为结果，非零退出码为失败。
//! 任务被中止（超时）时子进程随之被 kill。

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::SynthesisSection;
use crate::tools::manifest::{parse_manifest, ScriptManifest};
use crate::tools::schema::ToolSchema;
use crate::tools::{Tool, ToolModule, ToolOptions};

/// 源码加载器：校验生成的源码、把落盘的源码加载为工具模块
#[async_trait]
pub trait SourceLoader: Send + Sync {
    /// 源文件扩展名（不含点）
    fn extension(&self) -> &str;

    /// 解析头部并做语法检查；成功返回声明
    async fn check(&self, source: &str) -> Result<ScriptManifest, String>;

    /// 把源文件加载为工具模块（命名空间为文件名）
    async fn load(&self, path: &Path) -> Result<ToolModule, String>;
}

/// 基于外部解释器的加载器（默认 `sh`，语法检查 `sh -n`）
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    interpreter: String,
    check_args: Vec<String>,
    extension: String,
}

impl ScriptLoader {
    pub fn new(interpreter: impl Into<String>, check_args: Vec<String>, extension: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            check_args,
            extension: extension.into(),
        }
    }

    pub fn from_config(section: &SynthesisSection) -> Self {
        Self::new(
            section.interpreter.clone(),
            section.check_args.clone(),
            section.extension.clone(),
        )
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    async fn syntax_check(&self, source: &str) -> Result<(), String> {
        if self.check_args.is_empty() {
            return Ok(());
        }
        let path = std::env::temp_dir().join(format!(
            "treeplan_check_{}.{}",
            uuid::Uuid::new_v4(),
            self.extension
        ));
        tokio::fs::write(&path, source)
            .await
            .map_err(|e| format!("cannot write temp source: {e}"))?;
        let output = Command::new(&self.interpreter)
            .args(&self.check_args)
            .arg(&path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        let _ = tokio::fs::remove_file(&path).await;
        let output = output.map_err(|e| format!("syntax check spawn failed: {e}"))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            Err(format!("syntax check failed: {}{}", stderr.trim(), stdout.trim()))
        }
    }
}

impl Default for ScriptLoader {
    fn default() -> Self {
        Self::new("sh", vec!["-n".to_string()], "sh")
    }
}

#[async_trait]
impl SourceLoader for ScriptLoader {
    fn extension(&self) -> &str {
        &self.extension
    }

    async fn check(&self, source: &str) -> Result<ScriptManifest, String> {
        let manifest = parse_manifest(source)?;
        self.syntax_check(source).await?;
        Ok(manifest)
    }

    async fn load(&self, path: &Path) -> Result<ToolModule, String> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let manifest = parse_manifest(&source)?;
        let namespace = module_name(path)?;
        let options = ToolOptions {
            timeout: manifest.timeout,
            ..Default::default()
        };
        let mut module = ToolModule::script(namespace, path.to_path_buf());
        module.push(
            std::sync::Arc::new(ScriptTool {
                name: manifest.name,
                description: manifest.description,
                schema: manifest.schema,
                interpreter: self.interpreter.clone(),
                path: path.to_path_buf(),
            }),
            options,
        );
        Ok(module)
    }
}

/// 文件名（不含扩展名）即模块名
pub fn module_name(path: &Path) -> Result<String, String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| format!("invalid module path {}", path.display()))
}

/// 单个脚本工具
pub struct ScriptTool {
    name: String,
    description: String,
    schema: ToolSchema,
    interpreter: String,
    path: PathBuf,
}

impl ScriptTool {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn env_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        tracing::debug!(tool = %self.name, path = %self.path.display(), "script tool invoke");
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(obj) = args.as_object() {
            for (k, v) in obj {
                command.env(format!("TOOL_ARG_{}", k.to_uppercase()), env_value(v));
            }
        }
        let mut child = command
            .spawn()
            .map_err(|e| format!("script spawn failed: {e}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            // 脚本不读 stdin 时可能提前退出，写入失败不算错误
            let _ = stdin.write_all(args.to_string().as_bytes()).await;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("script wait failed: {e}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCRIPT: &str = "#!/bin/sh\n\
# tool: shout\n\
# description: Upper-case the given word.\n\
# param word: string - The word.\n\
echo \"$TOOL_ARG_WORD\" | tr '[:lower:]' '[:upper:]'\n";

    #[tokio::test]
    async fn test_check_accepts_valid_script() {
        let manifest = ScriptLoader::default().check(SCRIPT).await.unwrap();
        assert_eq!(manifest.name, "shout");
    }

    #[tokio::test]
    async fn test_check_rejects_syntax_error() {
        let broken = "# tool: broken\n# description: d\nif then fi (\n";
        let err = ScriptLoader::default().check(broken).await.unwrap_err();
        assert!(err.contains("syntax check failed"));
    }

    #[tokio::test]
    async fn test_load_and_execute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shout_module.sh");
        std::fs::write(&path, SCRIPT).unwrap();
        let module = ScriptLoader::default().load(&path).await.unwrap();
        assert_eq!(module.namespace, "shout_module");
        assert_eq!(module.len(), 1);
        let (tool, _) = &module.tools[0];
        assert_eq!(tool.execute(json!({"word": "bee"})).await.unwrap(), "BEE");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail_module.sh");
        std::fs::write(&path, "# tool: fail\n# description: d\necho nope >&2\nexit 3\n").unwrap();
        let module = ScriptLoader::default().load(&path).await.unwrap();
        let err = module.tools[0].0.execute(json!({})).await.unwrap_err();
        assert!(err.contains("exit Some(3)"));
        assert!(err.contains("nope"));
    }
}
