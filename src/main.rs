//! treeplan - 工具库规划智能体
//!
//! 入口：加载配置、初始化日志、构建工具库与 Planner，求解命令行给出的任务。
//!
//! 用法：`treeplan [--tree] [--config <path>] <task...>`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use treeplan::config::load_config;
use treeplan::llm::{create_embedder_from_config, create_llm_from_config};
use treeplan::planner::{LlmReasoner, Planner, PlannerContext, PlannerSettings, ToolSynthesizer};
use treeplan::repository::RepositoryBuilder;
use treeplan::tools::{calculator_module, ScriptLoader};

/// 用工具库与递归规划求解一个任务
#[derive(Parser, Debug)]
#[command(name = "treeplan", version, about = "Tool-library planning agent")]
struct Cli {
    /// 打印任务树（文本到 stderr，JSON 到 stdout）
    #[arg(long)]
    tree: bool,

    /// 额外的配置文件，覆盖 config/default.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 任务描述
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    task: Vec<String>,
}

impl Cli {
    fn task(&self) -> String {
        self.task.join(" ")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    treeplan::observability::init();
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    let embedder = create_embedder_from_config(&cfg.embedding);
    let loader = Arc::new(ScriptLoader::from_config(&cfg.synthesis));
    let repository = RepositoryBuilder::from_config(&cfg.repository, embedder)
        .with_loader(loader.clone())
        .with_module(calculator_module())
        .build()
        .await
        .context("Failed to build tool repository")?;

    let llm = create_llm_from_config(&cfg.llm)
        .map_err(anyhow::Error::msg)
        .context("Failed to create LLM client")?;
    let reasoner = Arc::new(LlmReasoner::new(llm).with_interpreter(loader.interpreter()));

    let mut context = PlannerContext::new(reasoner.clone(), repository);
    if cfg.synthesis.enabled {
        context = context.with_synthesizer(ToolSynthesizer::from_config(&cfg.synthesis));
    }
    let mut planner = Planner::new(context, PlannerSettings::from_config(&cfg.planner));

    let tree = planner.run(&cli.task()).await.context("Planning failed")?;
    println!("{}", tree.answer().unwrap_or_default());
    if cli.tree {
        eprintln!("{}", tree.render());
        println!(
            "{}",
            serde_json::to_string_pretty(&tree).context("Failed to serialize task tree")?
        );
    }

    let (prompt, completion, total) = reasoner.token_usage();
    tracing::info!(prompt, completion, total, "token usage");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_joins_task_words() {
        let cli = Cli::try_parse_from(["treeplan", "--tree", "Add", "2", "and", "5"]).unwrap();
        assert!(cli.tree);
        assert_eq!(cli.config, None);
        assert_eq!(cli.task(), "Add 2 and 5");
    }

    #[test]
    fn test_cli_config_path_and_missing_task() {
        let cli = Cli::try_parse_from(["treeplan", "--config", "my.toml", "Square 7"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("my.toml")));
        assert!(!cli.tree);
        assert!(Cli::try_parse_from(["treeplan", "--tree"]).is_err());
    }
}
