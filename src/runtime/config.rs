use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_WORKERS: usize = 6;
const DEFAULT_BLOCKED_RETRIES: u32 = 2;
const DEFAULT_MAX_FETCH_RETRIES: usize = 3;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
const DEFAULT_BACKOFF_BASE: f64 = 0.7;
const DEFAULT_JITTER_MAX_SECS: f64 = 0.35;
const DEFAULT_ROTATION_FALLBACK_WAIT_SECS: u64 = 60;
const DEFAULT_TRANSIENT_ERROR_DELAY_SECS: u64 = 1;
const DEFAULT_ROTATION_SETTLE_SECS: u64 = 3;
const DEFAULT_BLOCKED_PAUSE_BASE_SECS: u64 = 1;
const DEFAULT_BLOCKED_PAUSE_JITTER_SECS: u64 = 5;
const DEFAULT_SOCKS_ADDR: &str = "127.0.0.1:9050";
const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9051";
const DEFAULT_OUTPUT_DIR: &str = "scraped";
const DEFAULT_BLOCKED_PHRASE: &str = "temporarily blocked";
const DEFAULT_UNAVAILABLE_PHRASE: &str = "temporarily unavailable";

/// Runtime configuration for a scrape run.
///
/// All instances must be constructed via [`ScrapeConfig::builder`] so invariants
/// are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeConfig {
    base_url: String,
    workers: usize,
    blocked_retries: u32,
    max_fetch_retries: usize,
    fetch_timeout: Duration,
    backoff_base: f64,
    jitter_max_secs: f64,
    rotation_fallback_wait: Duration,
    transient_error_delay: Duration,
    blocked_pause_base_secs: u64,
    blocked_pause_jitter_secs: u64,
    socks_proxy: Option<String>,
    rotation_enabled: bool,
    control_addr: String,
    control_password: Option<String>,
    rotation_settle: Duration,
    blocked_phrase: String,
    unavailable_phrase: String,
    output_dir: PathBuf,
}

impl ScrapeConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> ScrapeConfigBuilder {
        ScrapeConfigBuilder::default()
    }

    /// Upstream endpoint every profile/story request is built against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Size of the worker pool.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Additional attempts a target may consume on the blocked/error paths.
    pub fn blocked_retries(&self) -> u32 {
        self.blocked_retries
    }

    /// Per-request transport retry budget inside the fetch client.
    pub fn max_fetch_retries(&self) -> usize {
        self.max_fetch_retries
    }

    /// Per-request HTTP timeout.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Base of the exponential backoff between transport retries, in seconds.
    pub fn backoff_base(&self) -> f64 {
        self.backoff_base
    }

    /// Upper bound of the uniform jitter added to each backoff sleep, in seconds.
    pub fn jitter_max_secs(&self) -> f64 {
        self.jitter_max_secs
    }

    /// Fixed wait taken by workers that lose the rotation race.
    pub fn rotation_fallback_wait(&self) -> Duration {
        self.rotation_fallback_wait
    }

    /// Short fixed delay before retrying a transiently-unavailable target.
    pub fn transient_error_delay(&self) -> Duration {
        self.transient_error_delay
    }

    /// Minimum seconds of global pause requested when a block is detected.
    pub fn blocked_pause_base_secs(&self) -> u64 {
        self.blocked_pause_base_secs
    }

    /// Upper bound of the random extension added to the blocked pause.
    pub fn blocked_pause_jitter_secs(&self) -> u64 {
        self.blocked_pause_jitter_secs
    }

    /// SOCKS5 proxy URL for upstream traffic, if proxying is enabled.
    pub fn socks_proxy(&self) -> Option<&str> {
        self.socks_proxy.as_deref()
    }

    /// Whether block detection may trigger identity rotation.
    pub fn rotation_enabled(&self) -> bool {
        self.rotation_enabled
    }

    /// Address of the anonymizing network's control port.
    pub fn control_addr(&self) -> &str {
        &self.control_addr
    }

    /// Credential for the control port. Required whenever rotation is enabled.
    pub fn control_password(&self) -> Option<&str> {
        self.control_password.as_deref()
    }

    /// Settle delay after a rotation signal is accepted.
    pub fn rotation_settle(&self) -> Duration {
        self.rotation_settle
    }

    /// Upstream message fragment that marks a response as a transient block.
    pub fn blocked_phrase(&self) -> &str {
        &self.blocked_phrase
    }

    /// Upstream message fragment that marks a response as temporarily unavailable.
    pub fn unavailable_phrase(&self) -> &str {
        &self.unavailable_phrase
    }

    /// Directory the default store writes profile/story metadata into.
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.base_url)?;

        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }

        if self.max_fetch_retries == 0 {
            bail!("max_fetch_retries must be greater than 0");
        }

        if self.fetch_timeout.is_zero() {
            bail!("fetch_timeout must be greater than 0");
        }

        if !(self.backoff_base > 0.0 && self.backoff_base.is_finite()) {
            bail!("backoff_base must be a positive finite number");
        }

        if !(self.jitter_max_secs >= 0.0 && self.jitter_max_secs.is_finite()) {
            bail!("jitter_max_secs must be a non-negative finite number");
        }

        if self.rotation_fallback_wait.is_zero() {
            bail!("rotation_fallback_wait must be greater than 0");
        }

        if self.transient_error_delay.is_zero() {
            bail!("transient_error_delay must be greater than 0");
        }

        if self.rotation_enabled {
            ensure_not_empty(&self.control_addr, "control_addr")?;
            match &self.control_password {
                Some(password) if !password.trim().is_empty() => {}
                _ => bail!(
                    "control_password is required when rotation is enabled; \
                     set TOR_CONTROL_PASSWORD or pass --no-rotation"
                ),
            }
            if self.rotation_settle.is_zero() {
                bail!("rotation_settle must be greater than 0");
            }
        }

        ensure_not_empty(&self.blocked_phrase, "blocked_phrase")?;
        ensure_not_empty(&self.unavailable_phrase, "unavailable_phrase")?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScrapeConfigBuilder {
    base_url: Option<String>,
    workers: Option<usize>,
    blocked_retries: Option<u32>,
    max_fetch_retries: Option<usize>,
    fetch_timeout: Option<Duration>,
    backoff_base: Option<f64>,
    jitter_max_secs: Option<f64>,
    rotation_fallback_wait: Option<Duration>,
    transient_error_delay: Option<Duration>,
    blocked_pause_base_secs: Option<u64>,
    blocked_pause_jitter_secs: Option<u64>,
    socks_addr: Option<String>,
    no_proxy: bool,
    rotation_enabled: Option<bool>,
    control_addr: Option<String>,
    control_password: Option<String>,
    rotation_settle: Option<Duration>,
    blocked_phrase: Option<String>,
    unavailable_phrase: Option<String>,
    output_dir: Option<PathBuf>,
}

impl ScrapeConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn blocked_retries(mut self, retries: u32) -> Self {
        self.blocked_retries = Some(retries);
        self
    }

    pub fn max_fetch_retries(mut self, retries: usize) -> Self {
        self.max_fetch_retries = Some(retries);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = Some(base);
        self
    }

    pub fn jitter_max_secs(mut self, jitter: f64) -> Self {
        self.jitter_max_secs = Some(jitter);
        self
    }

    pub fn rotation_fallback_wait(mut self, wait: Duration) -> Self {
        self.rotation_fallback_wait = Some(wait);
        self
    }

    pub fn transient_error_delay(mut self, delay: Duration) -> Self {
        self.transient_error_delay = Some(delay);
        self
    }

    pub fn blocked_pause_base_secs(mut self, secs: u64) -> Self {
        self.blocked_pause_base_secs = Some(secs);
        self
    }

    pub fn blocked_pause_jitter_secs(mut self, secs: u64) -> Self {
        self.blocked_pause_jitter_secs = Some(secs);
        self
    }

    /// Routes upstream traffic through a SOCKS5 proxy at `host:port`.
    pub fn socks_addr(mut self, addr: impl Into<String>) -> Self {
        self.socks_addr = Some(addr.into());
        self
    }

    /// Disables proxying entirely; upstream requests go out directly.
    pub fn no_proxy(mut self) -> Self {
        self.no_proxy = true;
        self
    }

    pub fn rotation_enabled(mut self, enabled: bool) -> Self {
        self.rotation_enabled = Some(enabled);
        self
    }

    pub fn control_addr(mut self, addr: impl Into<String>) -> Self {
        self.control_addr = Some(addr.into());
        self
    }

    pub fn control_password(mut self, password: impl Into<String>) -> Self {
        self.control_password = Some(password.into());
        self
    }

    pub fn rotation_settle(mut self, settle: Duration) -> Self {
        self.rotation_settle = Some(settle);
        self
    }

    pub fn blocked_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.blocked_phrase = Some(phrase.into());
        self
    }

    pub fn unavailable_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.unavailable_phrase = Some(phrase.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<ScrapeConfig> {
        let socks_proxy = if self.no_proxy {
            None
        } else {
            let addr = self
                .socks_addr
                .unwrap_or_else(|| DEFAULT_SOCKS_ADDR.to_string());
            Some(format!("socks5h://{}", addr.trim()))
        };

        let config = ScrapeConfig {
            base_url: trimmed_string(self.base_url.context("base_url is required")?),
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            blocked_retries: self.blocked_retries.unwrap_or(DEFAULT_BLOCKED_RETRIES),
            max_fetch_retries: self.max_fetch_retries.unwrap_or(DEFAULT_MAX_FETCH_RETRIES),
            fetch_timeout: self
                .fetch_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)),
            backoff_base: self.backoff_base.unwrap_or(DEFAULT_BACKOFF_BASE),
            jitter_max_secs: self.jitter_max_secs.unwrap_or(DEFAULT_JITTER_MAX_SECS),
            rotation_fallback_wait: self
                .rotation_fallback_wait
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_ROTATION_FALLBACK_WAIT_SECS)),
            transient_error_delay: self
                .transient_error_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TRANSIENT_ERROR_DELAY_SECS)),
            blocked_pause_base_secs: self
                .blocked_pause_base_secs
                .unwrap_or(DEFAULT_BLOCKED_PAUSE_BASE_SECS),
            blocked_pause_jitter_secs: self
                .blocked_pause_jitter_secs
                .unwrap_or(DEFAULT_BLOCKED_PAUSE_JITTER_SECS),
            socks_proxy,
            rotation_enabled: self.rotation_enabled.unwrap_or(true),
            control_addr: self
                .control_addr
                .unwrap_or_else(|| DEFAULT_CONTROL_ADDR.to_string()),
            control_password: self.control_password,
            rotation_settle: self
                .rotation_settle
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_ROTATION_SETTLE_SECS)),
            blocked_phrase: self
                .blocked_phrase
                .unwrap_or_else(|| DEFAULT_BLOCKED_PHRASE.to_string()),
            unavailable_phrase: self
                .unavailable_phrase
                .unwrap_or_else(|| DEFAULT_UNAVAILABLE_PHRASE.to_string()),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        };

        config.validate()?;
        Ok(config)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("base_url must start with http:// or https://");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> ScrapeConfigBuilder {
        ScrapeConfig::builder()
            .base_url("https://upstream.example/")
            .control_password("secret")
    }

    #[test]
    fn builder_produces_valid_config_with_defaults() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.workers(), DEFAULT_WORKERS);
        assert_eq!(config.blocked_retries(), DEFAULT_BLOCKED_RETRIES);
        assert_eq!(config.max_fetch_retries(), DEFAULT_MAX_FETCH_RETRIES);
        assert_eq!(
            config.fetch_timeout(),
            Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)
        );
        assert_eq!(config.backoff_base(), DEFAULT_BACKOFF_BASE);
        assert_eq!(config.jitter_max_secs(), DEFAULT_JITTER_MAX_SECS);
        assert_eq!(
            config.rotation_fallback_wait(),
            Duration::from_secs(DEFAULT_ROTATION_FALLBACK_WAIT_SECS)
        );
        assert_eq!(config.socks_proxy(), Some("socks5h://127.0.0.1:9050"));
        assert!(config.rotation_enabled());
        assert_eq!(config.blocked_phrase(), DEFAULT_BLOCKED_PHRASE);
    }

    #[test]
    fn no_proxy_clears_socks_url() {
        let config = base_builder().no_proxy().build().unwrap();
        assert_eq!(config.socks_proxy(), None);
    }

    #[test]
    fn base_url_is_required() {
        let err = ScrapeConfig::builder()
            .control_password("secret")
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("base_url"),
            "error should mention missing base_url"
        );
    }

    #[test]
    fn rotation_requires_credential() {
        let err = ScrapeConfig::builder()
            .base_url("https://upstream.example/")
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("control_password"),
            "error should mention missing control_password"
        );

        let config = ScrapeConfig::builder()
            .base_url("https://upstream.example/")
            .rotation_enabled(false)
            .build()
            .expect("rotation disabled needs no credential");
        assert!(!config.rotation_enabled());
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = base_builder().base_url("ftp://invalid").build().unwrap_err();
        assert!(
            format!("{err}").contains("http:// or https://"),
            "error should mention URL scheme"
        );

        let err = base_builder().workers(0).build().unwrap_err();
        assert!(
            format!("{err}").contains("workers"),
            "error should mention workers"
        );

        let err = base_builder().max_fetch_retries(0).build().unwrap_err();
        assert!(
            format!("{err}").contains("max_fetch_retries"),
            "error should mention max_fetch_retries"
        );

        let err = base_builder()
            .fetch_timeout(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("fetch_timeout"),
            "error should mention fetch_timeout"
        );

        let err = base_builder().backoff_base(0.0).build().unwrap_err();
        assert!(
            format!("{err}").contains("backoff_base"),
            "error should mention backoff_base"
        );

        let err = base_builder().jitter_max_secs(-1.0).build().unwrap_err();
        assert!(
            format!("{err}").contains("jitter_max_secs"),
            "error should mention jitter_max_secs"
        );

        let err = base_builder()
            .rotation_fallback_wait(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("rotation_fallback_wait"),
            "error should mention rotation_fallback_wait"
        );

        let err = base_builder().blocked_phrase("  ").build().unwrap_err();
        assert!(
            format!("{err}").contains("blocked_phrase"),
            "error should mention blocked_phrase"
        );
    }

    #[test]
    fn blocked_retries_of_zero_is_allowed() {
        let config = base_builder().blocked_retries(0).build().unwrap();
        assert_eq!(config.blocked_retries(), 0);
    }
}
