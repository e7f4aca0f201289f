use serde::{Deserialize, Serialize};

/// Closed classification of one fetch+classify cycle.
///
/// Unhandled failures during a cycle are not a classification; they surface
/// as the cycle's `Err` and the dispatcher counts them as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Private,
    NotFound,
    Blocked,
    Error,
    Unknown,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Classification::Public => "public",
            Classification::Private => "private",
            Classification::NotFound => "not_found",
            Classification::Blocked => "blocked",
            Classification::Error => "error",
            Classification::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Output of one fetch+classify cycle. Immutable once produced.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub username: String,
    pub classification: Classification,
    pub stories_found: usize,
    pub stories_saved: usize,
    pub pause_seconds: Option<u64>,
    /// For [`Classification::Error`]: whether the upstream message matched the
    /// configured transient phrase and the target may be retried.
    pub transient_error: bool,
    pub message: String,
}

impl WorkResult {
    pub fn new(username: impl Into<String>, classification: Classification) -> Self {
        Self {
            username: username.into(),
            classification,
            stories_found: 0,
            stories_saved: 0,
            pause_seconds: None,
            transient_error: false,
            message: String::new(),
        }
    }
}

/// Why a target is being sent around the queue again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Blocked,
    UpstreamError,
}

/// Terminal or retryable disposition of one settled cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ok,
    Skip,
    Retry(RetryReason),
}

/// Decides what the dispatcher does with a completed cycle.
///
/// Blocked and transient-error outcomes share the same retry budget;
/// exhausting it always resolves to skip, never fail.
pub fn decide(result: &WorkResult, retries_left: u32) -> Disposition {
    match result.classification {
        Classification::Public => Disposition::Ok,
        Classification::Private | Classification::NotFound | Classification::Unknown => {
            Disposition::Skip
        }
        Classification::Blocked => {
            if retries_left > 0 {
                Disposition::Retry(RetryReason::Blocked)
            } else {
                Disposition::Skip
            }
        }
        Classification::Error => {
            if result.transient_error && retries_left > 0 {
                Disposition::Retry(RetryReason::UpstreamError)
            } else {
                Disposition::Skip
            }
        }
    }
}
