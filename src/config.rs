//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TREEPLAN__*` 覆盖（双下划线表示嵌套，如 `TREEPLAN__PLANNER__TOP_K=3`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::tools::DEFAULT_TIMEOUT_MESSAGE;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub repository: RepositorySection,
    pub planner: PlannerSection,
    pub synthesis: SynthesisSection,
}

/// [llm] 段：OpenAI 兼容后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 目前只支持 openai（任何 OpenAI 兼容端点都可通过 base_url 接入）
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

/// [embedding] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    /// openai / hashing（离线、确定性的特征哈希向量）
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// hashing 嵌入的维度
    pub dimensions: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
            dimensions: 256,
        }
    }
}

/// [repository] 段：工具库持久化、默认超时、检索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    /// SQLite 文件；未设置时只在内存中
    pub store_path: Option<PathBuf>,
    /// 工具默认超时（秒），0 表示不限时
    pub default_timeout_secs: u64,
    pub default_timeout_message: String,
    /// 对 LLM 暴露 namespace__name 形式的名称
    pub verbose_ids: bool,
    /// 并行执行的工具调用上限，0 表示不限
    pub max_concurrency: usize,
    /// squared_l2 / cosine
    pub distance: String,
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            store_path: None,
            default_timeout_secs: 60,
            default_timeout_message: DEFAULT_TIMEOUT_MESSAGE.to_string(),
            verbose_ids: false,
            max_concurrency: 0,
            distance: "squared_l2".to_string(),
        }
    }
}

impl RepositorySection {
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_secs > 0).then(|| Duration::from_secs(self.default_timeout_secs))
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        (self.max_concurrency > 0).then_some(self.max_concurrency)
    }
}

/// [planner] 段：递归、回溯、检索预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub max_recursion_depth: usize,
    pub max_paraphrases: usize,
    pub max_replans: usize,
    pub top_k: usize,
    /// 距离阈值；不设置时不过滤
    pub similarity_threshold: Option<f32>,
    /// 单个叶子任务允许的 LLM 调用轮数
    pub api_interaction_limit: usize,
    /// dfs / cot / minimal / tools_only / auto
    pub strategy: String,
    /// 总是提供给求解的工具（namespace__name）
    pub default_tools: Vec<String>,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            max_recursion_depth: 3,
            max_paraphrases: 1,
            max_replans: 1,
            top_k: 5,
            similarity_threshold: Some(1.25),
            api_interaction_limit: 100,
            strategy: "dfs".to_string(),
            default_tools: Vec::new(),
        }
    }
}

/// [synthesis] 段：动态生成工具
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisSection {
    pub enabled: bool,
    /// 生成的脚本存放目录
    pub directory: PathBuf,
    pub interpreter: String,
    /// 语法检查参数（如 sh -n）；为空时跳过
    pub check_args: Vec<String>,
    pub extension: String,
    pub max_attempts: usize,
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("generated_tools"),
            interpreter: "sh".to_string(),
            check_args: vec!["-n".to_string()],
            extension: "sh".to_string(),
            max_attempts: 3,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TREEPLAN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TREEPLAN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TREEPLAN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.planner.max_recursion_depth, 3);
        assert_eq!(cfg.planner.api_interaction_limit, 100);
        assert_eq!(cfg.repository.default_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.repository.max_concurrency(), None);
        assert_eq!(cfg.synthesis.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[planner]\ntop_k = 2\nstrategy = \"cot\"\ndefault_tools = [\"calculator__add\"]\n\n[repository]\ndefault_timeout_secs = 0\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.planner.top_k, 2);
        assert_eq!(cfg.planner.strategy, "cot");
        assert_eq!(cfg.planner.default_tools, vec!["calculator__add".to_string()]);
        assert_eq!(cfg.planner.max_replans, 1);
        assert_eq!(cfg.repository.default_timeout(), None);
    }
}
