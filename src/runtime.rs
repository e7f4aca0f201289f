//! Runtime plumbing: validated configuration and telemetry counters.

pub mod config;
pub mod telemetry;

pub use config::{ScrapeConfig, ScrapeConfigBuilder};
pub use telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
