//! bee-loop 命令行入口
//!
//! `run`：按配置装配执行循环并运行一个任务，Ctrl+C 取消关闭 token，结束后以 JSON 打印最终状态。
//! `tools`：打印工具声明。

use std::path::PathBuf;

use anyhow::Context;
use bee_loop::config::{load_config, AppConfig};
use bee_loop::core::{LoopBuilder, RunOutcome};
use bee_loop::tools::declarations_json;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "bee-loop", version, about = "Autonomous task-execution control loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 运行一个任务直到完成、失败或被中断
    Run {
        /// 任务描述
        task: String,
        /// 额外的 TOML 配置文件
        #[arg(long)]
        config: Option<PathBuf>,
        /// 覆盖 loop.max_steps
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// 以 JSON 打印已注册的工具声明
    Tools {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load(config_path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    load_config(config_path).context("Failed to load config")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bee_loop::observability::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            task,
            config,
            max_steps,
        } => {
            let mut config = load(config)?;
            if let Some(max_steps) = max_steps {
                config.loop_.max_steps = max_steps;
            }
            let shutdown = CancellationToken::new();
            let execution = LoopBuilder::new(config)
                .with_shutdown(shutdown.clone())
                .build()
                .context("Failed to build execution loop")?;

            let interrupt = shutdown.clone();
            tokio::spawn(async move {
                if let Ok(()) = tokio::signal::ctrl_c().await {
                    tracing::info!("interrupt received, shutting down");
                    interrupt.cancel();
                }
            });

            execution.start(task).await.context("Failed to start run")?;
            let snapshot = execution.wait().await;

            let json = serde_json::to_string_pretty(&snapshot).context("Failed to encode status")?;
            println!("{json}");
            if let Some(RunOutcome::Failed { error }) = &snapshot.outcome {
                anyhow::bail!("run failed: {error}");
            }
        }
        Command::Tools { config } => {
            let builder = LoopBuilder::new(load(config)?);
            let environment = builder
                .build_environment()
                .context("Failed to build environment")?;
            let registry = builder
                .build_registry(environment)
                .context("Failed to build tool registry")?;
            println!("{}", declarations_json(&registry.list()));
        }
    }

    Ok(())
}
