pub mod client;
pub mod coordinator;
pub mod dispatcher;
pub mod runtime;
pub mod scrape;
pub mod store;

pub use client::fetch::{FetchClient, FetchResponse, Fetcher, TransportError};
pub use coordinator::pause::PauseGate;
pub use coordinator::rotation::{
    IdentityRotator, RotationCoordinator, RotationError, TorControlRotator,
};
pub use dispatcher::{Dispatcher, RunSummary};
pub use runtime::config::{ScrapeConfig, ScrapeConfigBuilder};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use scrape::cycle::{run_cycle, ScrapeContext, ScrapeContextParams};
pub use scrape::outcome::{decide, Classification, Disposition, RetryReason, WorkResult};
pub use scrape::parse::{MediaType, ProfileStatus, ResponseParser, Story, UpstreamParser};
pub use scrape::target::Target;
pub use store::{JsonFileStore, ProfileStore};
