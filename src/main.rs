//! AIsiri 调度命令行
//!
//! 运行方式：
//! ```bash
//! aisiri "提醒我明天下午三点开会，今天好累"   # 调度一句话
//! echo "今天天气怎么样" | aisiri              # 逐行读取 stdin
//! aisiri --health                              # 协作者健康检查
//! ```
//!
//! 配置文件路径可通过 `AISIRI_CONFIG` 指定；结果以 JSON 输出到 stdout，日志写到 stderr。

use std::path::PathBuf;

use aisiri::config::load_config_or_default;
use aisiri::dispatch::DispatchService;
use aisiri::llm::create_llm_from_config;
use aisiri::observability;
use anyhow::Context;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config_or_default(std::env::var("AISIRI_CONFIG").ok().map(PathBuf::from));
    let llm = create_llm_from_config(&cfg.llm);
    let service = DispatchService::from_config(&cfg, llm);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--health") {
        return print_json(&service.health_check().await);
    }

    // Ctrl+C 取消正在进行的调度并结束读取
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, cancelling");
            signal.cancel();
        }
    });

    if !args.is_empty() {
        return dispatch_one(&service, &args.join(" "), &shutdown).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        dispatch_one(&service, &line, &shutdown).await?;
    }
    Ok(())
}

async fn dispatch_one(
    service: &DispatchService,
    text: &str,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let result = service
        .dispatch_with_cancel(text, shutdown.child_token())
        .await
        .context("Dispatch failed")?;
    print_json(&result)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{json}");
    Ok(())
}
