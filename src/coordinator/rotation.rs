use crate::runtime::config::ScrapeConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Error raised when the identity-rotation action itself fails.
#[derive(Debug)]
pub enum RotationError {
    AuthRejected { reply: String },
    SignalRejected { reply: String },
    UnexpectedEof,
}

impl std::fmt::Display for RotationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationError::AuthRejected { reply } => {
                write!(f, "control port rejected authentication: {reply}")
            }
            RotationError::SignalRejected { reply } => {
                write!(f, "control port rejected NEWNYM signal: {reply}")
            }
            RotationError::UnexpectedEof => {
                write!(f, "control port closed the connection mid-exchange")
            }
        }
    }
}

impl std::error::Error for RotationError {}

/// Narrow "acquire a fresh network identity" capability.
///
/// The rotation action is external and inherently slow (a few seconds); the
/// coordinator makes sure only one worker pays that cost at a time.
pub trait IdentityRotator: Send + Sync {
    fn rotate(&self) -> BoxFuture<'_, Result<()>>;
}

/// Single-flight wrapper around an [`IdentityRotator`].
///
/// `rotate_if_needed` uses a non-blocking acquire: exactly one concurrent
/// caller wins and performs the rotation, every other caller returns `false`
/// immediately instead of queueing behind the winner. The lock is released
/// even when the rotation action fails.
pub struct RotationCoordinator {
    rotator: Arc<dyn IdentityRotator>,
    in_progress: Mutex<()>,
    telemetry: Arc<Telemetry>,
}

impl RotationCoordinator {
    pub fn new(rotator: Arc<dyn IdentityRotator>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            rotator,
            in_progress: Mutex::new(()),
            telemetry,
        }
    }

    /// Returns `Ok(true)` if this caller performed the rotation, `Ok(false)`
    /// if another caller was already rotating. A failed rotation propagates
    /// its error to the winning caller only.
    pub async fn rotate_if_needed(&self) -> Result<bool> {
        let Ok(_guard) = self.in_progress.try_lock() else {
            return Ok(false);
        };

        tracing::info!("rotating network identity; concurrent workers will back off");
        self.rotator
            .rotate()
            .await
            .context("identity rotation failed")?;
        self.telemetry.record_rotation_performed();
        tracing::info!("network identity rotated");
        Ok(true)
    }
}

/// Default rotator: speaks the minimal control-port exchange
/// (AUTHENTICATE, SIGNAL NEWNYM) and then waits a fixed settle delay for the
/// new circuit to become usable.
pub struct TorControlRotator {
    control_addr: String,
    password: String,
    settle: Duration,
}

impl TorControlRotator {
    pub fn new(
        control_addr: impl Into<String>,
        password: impl Into<String>,
        settle: Duration,
    ) -> Self {
        Self {
            control_addr: control_addr.into(),
            password: password.into(),
            settle,
        }
    }

    pub fn from_config(config: &ScrapeConfig) -> Result<Self> {
        let password = config
            .control_password()
            .context("control_password is required to rotate identities")?;
        Ok(Self::new(
            config.control_addr(),
            password,
            config.rotation_settle(),
        ))
    }

    async fn send_newnym(&self) -> Result<()> {
        let stream = TcpStream::connect(&self.control_addr)
            .await
            .with_context(|| format!("failed to connect to control port {}", self.control_addr))?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(format!("AUTHENTICATE \"{}\"\r\n", self.password).as_bytes())
            .await
            .context("failed to send AUTHENTICATE")?;
        let reply = lines
            .next_line()
            .await
            .context("failed to read AUTHENTICATE reply")?
            .ok_or(RotationError::UnexpectedEof)?;
        if !reply.starts_with("250") {
            return Err(RotationError::AuthRejected { reply }.into());
        }

        writer
            .write_all(b"SIGNAL NEWNYM\r\n")
            .await
            .context("failed to send SIGNAL NEWNYM")?;
        let reply = lines
            .next_line()
            .await
            .context("failed to read SIGNAL reply")?
            .ok_or(RotationError::UnexpectedEof)?;
        if !reply.starts_with("250") {
            return Err(RotationError::SignalRejected { reply }.into());
        }

        let _ = writer.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

impl IdentityRotator for TorControlRotator {
    fn rotate(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.send_newnym().await?;
            // Give the network a moment to build the new circuit.
            sleep(self.settle).await;
            Ok(())
        })
    }
}
