//! Upstream HTTP plumbing: the resilient fetch client and its backoff policy.

pub(crate) mod backoff;
pub mod fetch;

pub use fetch::{FetchClient, FetchResponse, Fetcher, TransportError};
