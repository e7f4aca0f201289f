use crate::client::backoff::backoff_delay;
use crate::coordinator::pause::PauseGate;
use crate::runtime::config::ScrapeConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use rand::prelude::IndexedRandom;
use reqwest::header;
use std::sync::Arc;
use tokio::time::sleep;

/// Upstream statuses treated as transient overload, retried with backoff.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
];

/// Error surfaced once the fetch client has exhausted its transport retries.
/// The last underlying cause, if any, is attached to the error chain.
#[derive(Debug)]
pub enum TransportError {
    Exhausted {
        attempts: usize,
        last_status: Option<u16>,
    },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Exhausted {
                attempts,
                last_status,
            } => match last_status {
                Some(status) => write!(
                    f,
                    "request failed after {attempts} attempts; last status {status}"
                ),
                None => write!(f, "request failed after {attempts} attempts"),
            },
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

/// One logical GET against the upstream, mocked at this seam in tests.
pub trait Fetcher: Send + Sync {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResponse>>;
}

/// Resilient HTTP client: rotates user-agents, respects the global pause gate
/// before every attempt, and retries transient failures with jittered
/// exponential backoff.
pub struct FetchClient {
    client: reqwest::Client,
    pause: Arc<PauseGate>,
    telemetry: Arc<Telemetry>,
    max_retries: usize,
    backoff_base: f64,
    jitter_max_secs: f64,
    referer: String,
}

impl FetchClient {
    pub fn new(
        config: &ScrapeConfig,
        pause: Arc<PauseGate>,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.fetch_timeout());
        if let Some(proxy) = config.socks_proxy() {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .with_context(|| format!("invalid socks proxy url {proxy}"))?,
            );
        }
        let client = builder.build().context("failed to build http client")?;

        Ok(Self {
            client,
            pause,
            telemetry,
            max_retries: config.max_fetch_retries(),
            backoff_base: config.backoff_base(),
            jitter_max_secs: config.jitter_max_secs(),
            referer: config.base_url().to_string(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<FetchResponse> {
        let mut last_cause: Option<anyhow::Error> = None;
        let mut last_status: Option<u16> = None;

        for attempt in 1..=self.max_retries {
            // Respect the global pause before every attempt.
            self.pause.wait_until_clear().await;

            match self.request(url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if TRANSIENT_STATUSES.contains(&status) {
                        last_status = Some(status);
                        last_cause = None;
                        self.sleep_before_retry(url, attempt, &format!("status {status}"))
                            .await;
                        continue;
                    }

                    match response.text().await {
                        Ok(body) => return Ok(FetchResponse { status, body }),
                        Err(err) => {
                            last_status = None;
                            last_cause = Some(err.into());
                            self.sleep_before_retry(url, attempt, "body read failed").await;
                            continue;
                        }
                    }
                }
                Err(err) if err.is_timeout() || err.is_connect() => {
                    last_status = None;
                    last_cause = Some(err.into());
                    self.sleep_before_retry(url, attempt, "transport failure").await;
                    continue;
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context(format!("fetch request for {url} failed")));
                }
            }
        }

        let exhausted = TransportError::Exhausted {
            attempts: self.max_retries,
            last_status,
        };
        tracing::error!(url, attempts = self.max_retries, "fetch retries exhausted");
        match last_cause {
            Some(cause) => Err(cause.context(exhausted)),
            None => Err(exhausted.into()),
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::REFERER, &self.referer)
            .header(header::USER_AGENT, random_user_agent())
    }

    async fn sleep_before_retry(&self, url: &str, attempt: usize, reason: &str) {
        if attempt >= self.max_retries {
            return;
        }
        let delay = backoff_delay(self.backoff_base, self.jitter_max_secs, attempt);
        self.telemetry.record_fetch_retry();
        tracing::warn!(
            url,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            reason,
            "fetch attempt failed; retrying"
        );
        sleep(delay).await;
    }
}

impl Fetcher for FetchClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(self.get(url))
    }
}

/// The active identity is chosen independently per request, never held
/// across a session.
fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn http_response(status: u16, reason: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Serves one canned response per connection, in order, then stops
    /// accepting. Returns the bound address and a hit counter.
    async fn serve_scripted(responses: Vec<String>) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (addr, hits)
    }

    fn wire_test_client(addr: SocketAddr) -> (FetchClient, Arc<PauseGate>, Arc<Telemetry>) {
        let config = ScrapeConfig::builder()
            .base_url(format!("http://{addr}/"))
            .no_proxy()
            .rotation_enabled(false)
            .max_fetch_retries(3)
            .backoff_base(0.01)
            .jitter_max_secs(0.0)
            .fetch_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let pause = Arc::new(PauseGate::new());
        let telemetry = Arc::new(Telemetry::default());
        let client = FetchClient::new(&config, pause.clone(), telemetry.clone()).unwrap();
        (client, pause, telemetry)
    }

    #[tokio::test]
    async fn retries_transient_statuses_then_succeeds() {
        let (addr, hits) = serve_scripted(vec![
            http_response(503, "Service Unavailable", "busy"),
            http_response(503, "Service Unavailable", "busy"),
            http_response(200, "OK", r#"{"status":"ok"}"#),
        ])
        .await;
        let (client, _pause, telemetry) = wire_test_client(addr);

        let response = client.get(&format!("http://{addr}/")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"status":"ok"}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 3, "two retries plus the success");
        assert_eq!(telemetry.snapshot().fetch_retries, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_attempts_and_last_status() {
        let (addr, hits) = serve_scripted(vec![
            http_response(503, "Service Unavailable", "busy"),
            http_response(429, "Too Many Requests", "slow down"),
            http_response(503, "Service Unavailable", "busy"),
        ])
        .await;
        let (client, _pause, _telemetry) = wire_test_client(addr);

        let err = client.get(&format!("http://{addr}/")).await.unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        let transport = err
            .downcast_ref::<TransportError>()
            .expect("exhaustion should carry a TransportError");
        let TransportError::Exhausted {
            attempts,
            last_status,
        } = transport;
        assert_eq!(*attempts, 3);
        assert_eq!(*last_status, Some(503));
    }

    #[tokio::test]
    async fn active_pause_is_waited_out_before_the_first_attempt() {
        let (addr, hits) =
            serve_scripted(vec![http_response(200, "OK", "fine")]).await;
        let (client, pause, _telemetry) = wire_test_client(addr);

        pause.trigger(Duration::from_millis(300));
        let started = Instant::now();
        let response = client.get(&format!("http://{addr}/")).await.unwrap();

        assert_eq!(response.body, "fine");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(
            started.elapsed() >= Duration::from_millis(250),
            "request went out before the pause window elapsed: {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn user_agent_comes_from_the_fixed_pool() {
        for _ in 0..20 {
            let agent = random_user_agent();
            assert!(USER_AGENTS.contains(&agent));
        }
    }

    #[test]
    fn exhausted_error_mentions_attempts_and_status() {
        let err = TransportError::Exhausted {
            attempts: 3,
            last_status: Some(503),
        };
        let rendered = format!("{err}");
        assert!(rendered.contains("3 attempts"));
        assert!(rendered.contains("503"));
    }

    #[test]
    fn client_builds_with_and_without_proxy() {
        let telemetry = Arc::new(Telemetry::default());
        let pause = Arc::new(PauseGate::new());

        let proxied = ScrapeConfig::builder()
            .base_url("https://upstream.example/")
            .control_password("secret")
            .build()
            .unwrap();
        FetchClient::new(&proxied, pause.clone(), telemetry.clone())
            .expect("proxied client should build");

        let direct = ScrapeConfig::builder()
            .base_url("https://upstream.example/")
            .control_password("secret")
            .no_proxy()
            .build()
            .unwrap();
        FetchClient::new(&direct, pause, telemetry).expect("direct client should build");
    }
}
