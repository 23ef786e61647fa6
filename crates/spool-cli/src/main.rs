use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use serde::Serialize;
use spool_core::{DispatcherBuilder, RunnerConfig, StatusRecord, Work};
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SIMULATED_PAGES: u32 = 3;
const SCAN_LATENCY: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Serialize)]
struct ScanSummary {
    url: String,
    pages: u32,
}

/// 擬似スキャナ：`bad://` は接続失敗、それ以外は固定ページ数を返す
struct ScanWork;

#[async_trait]
impl Work<String> for ScanWork {
    type Output = ScanSummary;

    async fn run(&self, url: String) -> anyhow::Result<ScanSummary> {
        sleep(SCAN_LATENCY).await;
        if url.starts_with("bad://") {
            return Err(anyhow!("connection refused"));
        }
        Ok(ScanSummary {
            url,
            pages: SIMULATED_PAGES,
        })
    }
}

#[derive(Serialize)]
struct Line<'a> {
    id: &'a str,
    #[serde(flatten)]
    record: &'a StatusRecord<ScanSummary>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        bail!("usage: spool-cli <url>...");
    }

    // (A) 環境変数から設定を読み、Dispatcher を組み立てる
    let config = RunnerConfig::from_env().context("reading SPOOL_* configuration")?;
    let dispatcher = DispatcherBuilder::<String, _>::new(ScanWork)
        .config(config)
        .build()
        .context("building dispatcher")?;

    // (B) URL ごとにスキャンを開始（start は待たずに返る）
    let mut ids = Vec::with_capacity(urls.len());
    for (n, url) in urls.into_iter().enumerate() {
        let id = format!("scan-{}", n + 1);
        dispatcher
            .start(id.as_str(), url)
            .await
            .with_context(|| format!("starting {id}"))?;
        info!(task_id = %id, "scan started");
        ids.push(id);
    }

    // (C) 完了をポーリングで待ち、1 行 1 レコードで出力
    for id in &ids {
        let record = dispatcher.wait(id, POLL_INTERVAL).await?;
        let line = serde_json::to_string(&Line { id, record: &record })?;
        println!("{line}");
    }

    info!(counts = ?dispatcher.counts().await?, "all scans finished");
    dispatcher.shutdown().await;
    Ok(())
}
