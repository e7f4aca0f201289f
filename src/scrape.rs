//! Per-target scraping: the outcome state machine, the upstream parser
//! collaborator, and the worker cycle that ties them together.

pub mod cycle;
pub mod outcome;
pub mod parse;
pub mod target;

pub use cycle::{run_cycle, ScrapeContext, ScrapeContextParams};
pub use outcome::{decide, Classification, Disposition, RetryReason, WorkResult};
pub use parse::{MediaType, ProfileStatus, ResponseParser, Story, UpstreamParser};
pub use target::Target;
