//! Cancellation composition.
//!
//! Merges an optional caller-supplied [`CancellationToken`] with a per-call
//! timeout into one effective signal, keeping the cause distinguishable so
//! the dispatcher can pick the right error kind. Armed signals live in a
//! watcher task wrapped in an abort-on-drop guard; completing the call drops
//! the guard and with it the timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use threadmill_protocol::ConfigError;

/// Per-call time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeout {
    /// No timer branch is armed at all.
    Never,
    /// The call fails once this much time elapses after dispatch.
    After(#[serde(with = "crate::config::duration_millis")] Duration),
}

impl Default for Timeout {
    /// 5 seconds.
    fn default() -> Self {
        Timeout::After(Duration::from_millis(5000))
    }
}

impl Timeout {
    pub fn millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }

    /// A zero duration is a configuration error, not "no timeout".
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Timeout::After(d) if d.is_zero() => Err(ConfigError::InvalidTimeout(*d)),
            _ => Ok(()),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Never => None,
            Timeout::After(d) => Some(*d),
        }
    }
}

/// Which branch of a composed signal fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The timeout elapsed before a response arrived.
    TimedOut,
    /// The caller's token fired.
    Aborted,
}

/// The effective cancellation signal for one dispatched call.
#[derive(Debug)]
pub struct ComposedCancel {
    external: Option<CancellationToken>,
    deadline: Option<Duration>,
}

impl ComposedCancel {
    /// Resolve when either source fires; whichever fires first wins and
    /// names the reason.
    pub async fn fired(self) -> CancelReason {
        match (self.external, self.deadline) {
            (Some(token), Some(deadline)) => {
                tokio::select! {
                    _ = token.cancelled() => CancelReason::Aborted,
                    _ = tokio::time::sleep(deadline) => CancelReason::TimedOut,
                }
            }
            (Some(token), None) => {
                token.cancelled().await;
                CancelReason::Aborted
            }
            (None, Some(deadline)) => {
                tokio::time::sleep(deadline).await;
                CancelReason::TimedOut
            }
            // compose() never builds this shape.
            (None, None) => std::future::pending().await,
        }
    }
}

/// Merge an optional external token and a timeout into one signal.
///
/// Returns `None` when neither source exists (infinite timeout, no token):
/// such a call cannot be canceled and no watcher is armed for it.
pub fn compose(
    external: Option<CancellationToken>,
    timeout: Timeout,
) -> Result<Option<ComposedCancel>, ConfigError> {
    timeout.validate()?;
    let deadline = timeout.duration();
    if external.is_none() && deadline.is_none() {
        return Ok(None);
    }
    Ok(Some(ComposedCancel { external, deadline }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_is_a_config_error() {
        let err = compose(None, Timeout::After(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(_)));
    }

    #[test]
    fn no_sources_produces_no_signal() {
        assert!(compose(None, Timeout::Never).unwrap().is_none());
    }

    #[tokio::test]
    async fn timeout_branch_reports_timed_out() {
        let composed = compose(None, Timeout::millis(5)).unwrap().unwrap();
        assert_eq!(composed.fired().await, CancelReason::TimedOut);
    }

    #[tokio::test]
    async fn abort_branch_reports_aborted() {
        let token = CancellationToken::new();
        let composed = compose(Some(token.clone()), Timeout::Never).unwrap().unwrap();
        token.cancel();
        assert_eq!(composed.fired().await, CancelReason::Aborted);
    }

    #[tokio::test]
    async fn earlier_abort_beats_later_timeout() {
        let token = CancellationToken::new();
        let composed = compose(Some(token.clone()), Timeout::millis(10_000))
            .unwrap()
            .unwrap();
        token.cancel();
        assert_eq!(composed.fired().await, CancelReason::Aborted);
    }

    #[tokio::test]
    async fn already_cancelled_token_fires_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let composed = compose(Some(token), Timeout::millis(10_000)).unwrap().unwrap();
        assert_eq!(composed.fired().await, CancelReason::Aborted);
    }

    #[test]
    fn timeout_serde_round_trip() {
        let timeout = Timeout::millis(250);
        let wire = serde_json::to_string(&timeout).unwrap();
        let back: Timeout = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, timeout);
    }
}
