use anyhow::{Context, Result};
use clap::Parser;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storyfetch::{
    init_tracing, Dispatcher, FetchClient, IdentityRotator, JsonFileStore, PauseGate,
    RotationCoordinator, ScrapeConfig, ScrapeContext, ScrapeContextParams, Telemetry,
    TorControlRotator, UpstreamParser,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "storyfetch", about = "Concurrent profile/story scraper")]
struct Cli {
    /// File with one username per line.
    #[arg(long)]
    file: PathBuf,

    /// Number of concurrent workers.
    #[arg(long, default_value_t = 6)]
    workers: usize,

    /// Extra attempts a target gets after being blocked or transiently failing.
    #[arg(long, default_value_t = 2)]
    blocked_retries: u32,

    /// Upstream endpoint requests are built against.
    #[arg(long, default_value = "https://media.mollygram.com/")]
    base_url: String,

    /// Directory profile/story metadata is written into.
    #[arg(long, default_value = "scraped")]
    output_dir: PathBuf,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, default_value_t = 15)]
    fetch_timeout: u64,

    /// Send upstream traffic directly instead of through the SOCKS proxy.
    #[arg(long)]
    no_proxy: bool,

    /// SOCKS5 proxy port on localhost.
    #[arg(long, default_value_t = 9050)]
    socks_port: u16,

    /// Control port on localhost used for identity rotation.
    #[arg(long, default_value_t = 9051)]
    control_port: u16,

    /// Disable identity rotation; blocked workers only wait out the pause.
    #[arg(long)]
    no_rotation: bool,
}

/// Stands in for the control-port rotator when rotation is disabled. The
/// blocked path still runs; "rotating" just costs nothing.
struct NoopRotator;

impl IdentityRotator for NoopRotator {
    fn rotate(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async {
            tracing::debug!("rotation disabled; skipping identity change");
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let usernames = read_usernames(&cli.file).await?;
    if usernames.is_empty() {
        anyhow::bail!("no usernames found in {}", cli.file.display());
    }

    let mut builder = ScrapeConfig::builder()
        .base_url(&cli.base_url)
        .workers(cli.workers)
        .blocked_retries(cli.blocked_retries)
        .fetch_timeout(Duration::from_secs(cli.fetch_timeout))
        .socks_addr(format!("127.0.0.1:{}", cli.socks_port))
        .control_addr(format!("127.0.0.1:{}", cli.control_port))
        .rotation_enabled(!cli.no_rotation)
        .output_dir(&cli.output_dir);
    if cli.no_proxy {
        builder = builder.no_proxy();
    }
    if let Ok(password) = std::env::var("TOR_CONTROL_PASSWORD") {
        builder = builder.control_password(password);
    }
    let config = Arc::new(builder.build()?);

    let telemetry = Arc::new(Telemetry::default());
    let pause = Arc::new(PauseGate::new());
    let fetcher = Arc::new(FetchClient::new(&config, pause.clone(), telemetry.clone())?);
    let parser = Arc::new(UpstreamParser::from_config(&config));
    let store = Arc::new(JsonFileStore::new(config.output_dir()));

    let rotator: Arc<dyn IdentityRotator> = if config.rotation_enabled() {
        Arc::new(TorControlRotator::from_config(&config)?)
    } else {
        Arc::new(NoopRotator)
    };
    let rotation = Arc::new(RotationCoordinator::new(rotator, telemetry.clone()));

    let ctx = Arc::new(ScrapeContext::new(ScrapeContextParams {
        config,
        fetcher,
        parser,
        store,
        pause,
        rotation,
        telemetry: telemetry.clone(),
    }));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing in-flight targets");
                shutdown.cancel();
            }
        });
    }

    let summary = Dispatcher::new(ctx, shutdown).run(usernames).await;

    let stats = telemetry.snapshot();
    tracing::info!(
        fetch_retries = stats.fetch_retries,
        blocks_detected = stats.blocks_detected,
        pauses_triggered = stats.pauses_triggered,
        rotations_performed = stats.rotations_performed,
        rotation_waits = stats.rotation_waits,
        stories_saved = stats.stories_saved,
        "run telemetry"
    );
    println!(
        "Done. OK={} SKIP={} FAIL={}",
        summary.ok, summary.skipped, summary.failed
    );
    Ok(())
}

async fn read_usernames(path: &PathBuf) -> Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read username list {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
