use crate::client::fetch::Fetcher;
use crate::coordinator::pause::PauseGate;
use crate::coordinator::rotation::RotationCoordinator;
use crate::runtime::config::ScrapeConfig;
use crate::runtime::telemetry::Telemetry;
use crate::scrape::outcome::{Classification, WorkResult};
use crate::scrape::parse::ResponseParser;
use crate::store::ProfileStore;
use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Everything a worker needs to run one cycle. Shared singletons
/// ([`PauseGate`], [`RotationCoordinator`], [`Telemetry`]) are injected once
/// at construction; nothing here is ambient or static.
pub struct ScrapeContext {
    config: Arc<ScrapeConfig>,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn ResponseParser>,
    store: Arc<dyn ProfileStore>,
    pause: Arc<PauseGate>,
    rotation: Arc<RotationCoordinator>,
    telemetry: Arc<Telemetry>,
}

pub struct ScrapeContextParams {
    pub config: Arc<ScrapeConfig>,
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn ResponseParser>,
    pub store: Arc<dyn ProfileStore>,
    pub pause: Arc<PauseGate>,
    pub rotation: Arc<RotationCoordinator>,
    pub telemetry: Arc<Telemetry>,
}

impl ScrapeContext {
    pub fn new(params: ScrapeContextParams) -> Self {
        Self {
            config: params.config,
            fetcher: params.fetcher,
            parser: params.parser,
            store: params.store,
            pause: params.pause,
            rotation: params.rotation,
            telemetry: params.telemetry,
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    pub fn pause(&self) -> &PauseGate {
        &self.pause
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }
}

/// Runs one fetch+classify+act cycle for a target.
///
/// Returns the cycle's [`WorkResult`]; any unhandled failure (transport
/// retries exhausted, rotation failure) is the cycle's `Err` and settles the
/// target as failed at the dispatcher.
#[tracing::instrument(name = "cycle", skip_all, fields(worker, target = %username))]
pub async fn run_cycle(ctx: &ScrapeContext, worker: usize, username: &str) -> Result<WorkResult> {
    let response = ctx
        .fetcher
        .get(&profile_url(ctx.config.base_url(), username))
        .await?;
    let profile = ctx.parser.classify_profile(&response.body);

    match profile.classification {
        Classification::Blocked => handle_blocked(ctx, worker, username, profile.message).await,
        Classification::Error => {
            save_profile(ctx, username, &profile).await;
            let mut result = WorkResult::new(username, Classification::Error);
            result.message = profile.message;
            if profile.transient_error {
                result.transient_error = true;
                tracing::warn!(
                    worker,
                    delay_ms = ctx.config.transient_error_delay().as_millis() as u64,
                    "upstream temporarily unavailable; short retry delay"
                );
                sleep(ctx.config.transient_error_delay()).await;
            }
            Ok(result)
        }
        Classification::Public => {
            save_profile(ctx, username, &profile).await;

            let stories_response = ctx
                .fetcher
                .get(&stories_url(ctx.config.base_url(), username))
                .await?;
            let stories = ctx.parser.parse_stories(&stories_response.body);
            let saved = match ctx.store.save_stories(username, &stories).await {
                Ok(saved) => saved,
                Err(err) => {
                    tracing::warn!(worker, target = username, error = %err, "story save failed");
                    0
                }
            };
            ctx.telemetry.record_stories_saved(saved);

            let mut result = WorkResult::new(username, Classification::Public);
            result.stories_found = stories.len();
            result.stories_saved = saved;
            Ok(result)
        }
        terminal @ (Classification::Private
        | Classification::NotFound
        | Classification::Unknown) => {
            save_profile(ctx, username, &profile).await;
            let mut result = WorkResult::new(username, terminal);
            result.message = profile.message;
            Ok(result)
        }
    }
}

/// Blocked path: extend the global pause, then either perform the rotation
/// (winner retries immediately, the rotation already cost seconds) or back
/// off long enough for the winner to finish.
async fn handle_blocked(
    ctx: &ScrapeContext,
    worker: usize,
    username: &str,
    message: String,
) -> Result<WorkResult> {
    ctx.telemetry.record_block_detected();

    let base = ctx.config.blocked_pause_base_secs();
    let jitter = ctx.config.blocked_pause_jitter_secs();
    let pause_secs = if jitter > 0 {
        base + rand::rng().random_range(0..=jitter)
    } else {
        base
    };
    if pause_secs > 0 {
        ctx.pause.trigger(Duration::from_secs(pause_secs));
        ctx.telemetry.record_pause_triggered();
    }
    tracing::warn!(worker, target = username, pause_secs, "block detected");

    if ctx.rotation.rotate_if_needed().await? {
        tracing::info!(worker, target = username, "rotation done; retrying immediately");
    } else {
        ctx.telemetry.record_rotation_wait();
        let wait = ctx.config.rotation_fallback_wait();
        tracing::info!(
            worker,
            target = username,
            wait_secs = wait.as_secs(),
            "another worker is rotating; backing off"
        );
        sleep(wait).await;
    }

    let mut result = WorkResult::new(username, Classification::Blocked);
    result.pause_seconds = Some(pause_secs);
    result.message = message;
    Ok(result)
}

async fn save_profile(ctx: &ScrapeContext, username: &str, profile: &crate::scrape::parse::ProfileStatus) {
    if let Err(err) = ctx.store.save_profile(username, profile).await {
        tracing::warn!(target = username, error = %err, "profile save failed");
    }
}

fn profile_url(base_url: &str, username: &str) -> String {
    format!("{base_url}?url={username}")
}

fn stories_url(base_url: &str, username: &str) -> String {
    format!("{base_url}?url={username}&method=allstories")
}
