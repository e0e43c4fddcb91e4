use anyhow::Context;
use p4mcp_server::{ServerConfig, Tools, rpc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing_subscriber::prelude::*;

const AUDIT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

fn log_path_from_env() -> Option<std::path::PathBuf> {
    std::env::var("P4_MCP_LOG_PATH")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(std::path::PathBuf::from)
}

/// stdout carries the protocol, so logs go to stderr (and optionally a file).
fn init_tracing(log_path: Option<std::path::PathBuf>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("p4mcp_server=info,p4mcp_core=info,p4_mcp=info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::io::stderr);

    if let Some(path) = log_path {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file));
                tracing_subscriber::registry()
                    .with(filter)
                    .with(stderr_layer)
                    .with(file_layer)
                    .init();
                return;
            }
            Err(err) => {
                eprintln!(
                    "failed to open P4_MCP_LOG_PATH {}: {err}; logging to stderr only",
                    path.display()
                );
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing(log_path_from_env());

    let cfg = ServerConfig::from_env()?;
    tracing::info!(
        read_only = cfg.read_only,
        delete_disabled = cfg.delete_disabled,
        p4 = %cfg.runner.p4_bin,
        audit = cfg.policy.audit_enabled,
        rate_limit = cfg.policy.rate_limit_enabled,
        "p4-mcp starting"
    );
    let tools = Arc::new(Tools::new(cfg)?);

    {
        let policy = Arc::clone(tools.policy());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(AUDIT_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = policy.audit().sweep();
                if removed > 0 {
                    tracing::debug!(removed, "audit retention sweep");
                }
            }
        });
    }

    // Single writer so concurrent tool calls never interleave lines.
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonValue>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = rx.recv().await {
            let mut line = msg.to_string();
            line.push('\n');
            if let Err(err) = stdout.write_all(line.as_bytes()).await {
                tracing::error!(error = %err, "write stdout");
                break;
            }
            if let Err(err) = stdout.flush().await {
                tracing::error!(error = %err, "flush stdout");
                break;
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let req = match rpc::parse_line(&line) {
            Ok(req) => req,
            Err(resp) => {
                let _ = tx.send(resp);
                continue;
            }
        };

        if rpc::is_tool_call(&req) {
            let tools = Arc::clone(&tools);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(resp) = rpc::handle(&tools, req).await {
                    let _ = tx.send(resp);
                }
            });
        } else if let Some(resp) = rpc::handle(&tools, req).await {
            let _ = tx.send(resp);
        }
    }

    // In-flight calls hold their own senders; the writer drains until the last one is done.
    drop(tx);
    let _ = writer.await;
    tracing::info!("stdin closed, exiting");
    Ok(())
}
