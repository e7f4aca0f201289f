use rand::Rng;
use std::time::Duration;

/// Delay before retrying a failed fetch attempt.
///
/// Attempt numbering starts at 1. The delay is `base^attempt` seconds plus a
/// uniform jitter in `[0, jitter_max)` so concurrent workers do not retry in
/// lockstep.
pub(crate) fn backoff_delay(base: f64, jitter_max: f64, attempt: usize) -> Duration {
    let exponential = base.powi(attempt as i32);
    let jitter = if jitter_max > 0.0 {
        rand::rng().random_range(0.0..jitter_max)
    } else {
        0.0
    };
    Duration::from_secs_f64(exponential + jitter)
}
