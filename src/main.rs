//! Forager 命令行入口：加载配置、装配组件并执行一个任务。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use forager::core::create_agent_builder;
use forager::react::ReactEvent;

#[derive(Parser, Debug)]
#[command(
    name = "forager",
    version,
    about = "Autonomous task-execution agent with a bounded reason-act-observe loop"
)]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,
    /// 工具沙箱根目录（默认当前目录）
    #[arg(long)]
    workspace: Option<PathBuf>,
    #[arg(long)]
    max_iterations: Option<usize>,
    #[arg(long, value_enum)]
    provider: Option<Provider>,
    /// 以 JSON 输出完整的运行结果
    #[arg(long)]
    json: bool,
    /// 在 stderr 逐行输出过程事件（JSON）
    #[arg(long)]
    events: bool,
    /// 任务描述
    #[arg(required = true)]
    task: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    Openai,
    Deepseek,
    Mock,
}

impl Provider {
    fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Deepseek => "deepseek",
            Provider::Mock => "mock",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    forager::observability::init();
    let cli = Cli::parse();
    let task = cli.task.join(" ");

    let mut builder = create_agent_builder(cli.config.clone(), cli.workspace.clone())
        .context("Failed to load configuration")?;
    if let Some(n) = cli.max_iterations {
        builder.config_mut().agent.max_iterations = n;
    }
    if let Some(p) = cli.provider {
        builder.config_mut().llm.provider = p.as_str().to_string();
    }
    tracing::info!(workspace = %builder.workspace().display(), "agent configured");
    let components = builder.build_components();

    let result = if cli.events {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ReactEvent>();
        let printer = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&ev) {
                    eprintln!("{line}");
                }
            }
        });
        let result = components.run_with_events(&task, &tx).await;
        drop(tx);
        printer.await.context("event printer failed")?;
        result
    } else {
        components.run(&task).await
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize run result")?
        );
    } else {
        println!("{}", result.final_answer);
    }

    Ok(if result.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
