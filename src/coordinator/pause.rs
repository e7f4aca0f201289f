use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const MAX_POLL_SLEEP: Duration = Duration::from_secs(1);

/// Process-wide cooldown deadline shared by every worker.
///
/// Any worker can trigger or extend the pause; the deadline only ever moves
/// forward, so a late, smaller pause request can never shorten an active
/// larger one. Workers poll [`PauseGate::wait_until_clear`] before issuing a
/// new fetch; the lock is never held while sleeping.
#[derive(Debug, Default)]
pub struct PauseGate {
    until: Mutex<Option<Instant>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activates or extends the global pause window.
    pub fn trigger(&self, pause: Duration) {
        let candidate = Instant::now() + pause;
        let mut until = self.until.lock().expect("pause gate mutex poisoned");
        let extended = match *until {
            Some(current) => candidate > current,
            None => true,
        };
        if extended {
            *until = Some(candidate);
            tracing::info!(
                pause_secs = pause.as_secs(),
                "global pause activated; all workers will wait"
            );
        }
    }

    /// Time left in the current pause window, zero if none is active.
    pub fn remaining(&self) -> Duration {
        let until = self.until.lock().expect("pause gate mutex poisoned");
        match *until {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Whole seconds left in the current pause window, truncated.
    pub fn remaining_secs(&self) -> u64 {
        self.remaining().as_secs()
    }

    /// Blocks the calling worker until the pause window has fully elapsed.
    ///
    /// Polls in capped increments so an extension by another worker is
    /// observed promptly. Safe to call from any number of workers at once.
    pub async fn wait_until_clear(&self) {
        loop {
            let remaining = self.remaining();
            if remaining.is_zero() {
                return;
            }
            sleep(remaining.min(MAX_POLL_SLEEP)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tokio::time::timeout;

    #[test]
    fn starts_clear() {
        let gate = PauseGate::new();
        assert_eq!(gate.remaining_secs(), 0);
        assert!(gate.remaining().is_zero());
    }

    #[test]
    fn shorter_trigger_never_shortens_active_pause() {
        let gate = PauseGate::new();
        gate.trigger(Duration::from_secs(30));
        let before = gate.remaining();

        gate.trigger(Duration::from_secs(1));
        let after = gate.remaining();

        assert!(
            after >= before - Duration::from_millis(50),
            "pause was shortened: {before:?} -> {after:?}"
        );
    }

    #[test]
    fn deadline_is_monotonic_under_concurrent_triggers() {
        let gate = Arc::new(PauseGate::new());
        let mut handles = Vec::new();

        for secs in [5u64, 40, 1, 25, 10, 60, 3, 15] {
            let gate = gate.clone();
            handles.push(thread::spawn(move || {
                gate.trigger(Duration::from_secs(secs));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // The largest request must have won regardless of arrival order.
        let remaining = gate.remaining();
        assert!(remaining > Duration::from_secs(58), "remaining={remaining:?}");
        assert!(remaining <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn wait_until_clear_returns_after_window() {
        let gate = Arc::new(PauseGate::new());
        gate.trigger(Duration::from_millis(50));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait_until_clear().await })
            })
            .collect();

        for waiter in waiters {
            timeout(Duration::from_secs(2), waiter)
                .await
                .expect("waiter should finish once the pause elapses")
                .expect("waiter task should not panic");
        }
        assert_eq!(gate.remaining_secs(), 0);
    }

    #[tokio::test]
    async fn wait_until_clear_is_immediate_without_pause() {
        let gate = PauseGate::new();
        timeout(Duration::from_millis(100), gate.wait_until_clear())
            .await
            .expect("no active pause should mean no wait");
    }
}
