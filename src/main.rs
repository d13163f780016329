//! DevCook 命令行入口

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use devcook::config::{load_config, AppConfig};
use devcook::core::worker::validate_request;
use devcook::core::{run_queue, OrchestratorBuilder, RunRequest};
use devcook::store::NewMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "devcook")]
#[command(about = "DevCook coding agent orchestration", version)]
struct Cli {
    /// 配置文件路径（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行一次运行并输出结果 JSON
    Run {
        project_id: String,
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// 从 stdin 逐行读取 {"projectId","value"} 并排队执行
    Serve,
    /// 列出项目全部消息
    Messages { project_id: String },
    /// 删除已过期的沙箱
    Reap,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    devcook::observability::init();

    let cfg = load_config(cli.config).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    match cli.command {
        Command::Run { project_id, prompt } => run_once(cfg, &project_id, &prompt.join(" ")).await,
        Command::Serve => serve(cfg).await,
        Command::Messages { project_id } => list_messages(cfg, &project_id).await,
        Command::Reap => {
            let removed = OrchestratorBuilder::new(cfg)
                .build_sandbox_provider()
                .reap_expired()
                .await
                .context("Failed to reap sandboxes")?;
            println!("{}", serde_json::json!({ "removed": removed }));
            Ok(())
        }
    }
}

async fn run_once(cfg: AppConfig, project_id: &str, value: &str) -> anyhow::Result<()> {
    validate_request(project_id, value)?;
    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to build orchestrator")?;
    orchestrator
        .store()
        .append_message(NewMessage::user(project_id, value))
        .await?;

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            tracing::info!(event = %json, "agent event");
        }
    });

    let request = RunRequest {
        project_id: project_id.to_string(),
        value: value.to_string(),
    };
    let outcome = orchestrator
        .run_with_events(&request, Some(&event_tx))
        .await
        .context("Run failed")?;
    drop(event_tx);
    let _ = printer.await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn serve(cfg: AppConfig) -> anyhow::Result<()> {
    let worker_settings = cfg.worker.clone();
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(cfg)
            .build()
            .context("Failed to build orchestrator")?,
    );
    let cancel = CancellationToken::new();
    let (queue, worker) = run_queue(orchestrator, &worker_settings, cancel.clone());
    let (result_tx, mut result_rx) = tokio::sync::mpsc::unbounded_channel();
    let worker = tokio::spawn(worker.with_results(result_tx).run());

    let printer = tokio::spawn(async move {
        while let Some((request, result)) = result_rx.recv().await {
            let line = match result {
                Ok(outcome) => serde_json::json!({ "request": request, "outcome": outcome }),
                Err(error) => serde_json::json!({ "request": request, "error": error }),
            };
            println!("{line}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                cancel.cancel();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let request: RunRequest = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "invalid request line");
                        continue;
                    }
                };
                if let Err(e) = queue.submit(&request.project_id, &request.value).await {
                    tracing::warn!(project_id = %request.project_id, error = %e, "request rejected");
                }
            }
        }
    }

    drop(queue);
    let processed = worker.await.context("Worker task failed")?;
    let _ = printer.await;
    tracing::info!(processed, "worker stopped");
    Ok(())
}

async fn list_messages(cfg: AppConfig, project_id: &str) -> anyhow::Result<()> {
    let store = OrchestratorBuilder::new(cfg)
        .build_store()
        .context("Failed to open store")?;
    let messages = store.list_messages(project_id).await?;
    println!("{}", serde_json::to_string_pretty(&messages)?);
    Ok(())
}
