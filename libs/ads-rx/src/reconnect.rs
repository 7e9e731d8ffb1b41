//! Reconnection policy
//!
//! Bookkeeping and backoff for the supervisor's retry loop. The default policy
//! retries forever with a fixed 5 second delay; a budget and exponential
//! backoff with jitter can be configured instead.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay used between connection attempts unless configured otherwise
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Reconnection error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    /// Attempt budget used up
    #[error("Maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),

    /// Waiting for the next attempt was cancelled
    #[error("Reconnection cancelled")]
    Cancelled,
}

/// Retry loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    /// Budget exhausted
    Failed,
}

/// Millisecond (de)serialization for `Duration` fields in configuration files
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Backoff multipliers must be finite and non-negative
fn finite_multiplier<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(serde::de::Error::custom(format!(
            "backoff_multiplier must be finite and non-negative, got {}",
            value
        )))
    }
}

/// Largest exponent applied to the multiplier; any real multiplier reaches the cap well before
const MAX_BACKOFF_EXPONENT: u32 = 64;

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts allowed (0 means unlimited)
    pub max_attempts: u32,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    #[serde(deserialize_with = "finite_multiplier")]
    pub backoff_multiplier: f64,
    /// Add +/-25% jitter to every delay
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl ReconnectPolicy {
    /// Same delay before every retry, unlimited attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: 0,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Exponential backoff with jitter and an attempt budget
    pub fn exponential(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_multiplier,
            jitter: true,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_attempts == 0
    }
}

/// Reconnection statistics
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_connects: u64,
    pub failed_attempts: u64,
    pub last_connected: Option<Instant>,
    pub last_error: Option<String>,
}

/// Tracks attempts against a [`ReconnectPolicy`]
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    /// Consecutive attempts since the last successful connection
    current_attempt: u32,
    state: ConnectionState,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
            state: ConnectionState::Disconnected,
            stats: ReconnectStats::default(),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    /// Reset the consecutive attempt counter
    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.current_attempt = 0;
        self.stats.successful_connects += 1;
        self.stats.last_connected = Some(Instant::now());
        debug!("Connection marked as successful");
    }

    /// Record the failure of the current attempt
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Connection attempt {} failed: {}", self.current_attempt, reason);
        self.stats.failed_attempts += 1;
        self.stats.last_error = Some(reason);
        self.state = if self.policy.is_unlimited() || self.current_attempt < self.policy.max_attempts {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Failed
        };
    }

    /// Delay before the current attempt
    pub fn calculate_next_delay(&self) -> Duration {
        let exponent = self.current_attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT) as i32;
        let multiplier = match self.policy.backoff_multiplier {
            m if m.is_finite() && m >= 0.0 => m,
            _ => 1.0,
        };
        let max_secs = self.policy.max_delay.as_secs_f64();
        // f64::min drops a NaN operand
        let secs = (self.policy.initial_delay.as_secs_f64() * multiplier.powi(exponent)).min(max_secs);
        let mut delay = Duration::try_from_secs_f64(secs).unwrap_or(self.policy.max_delay);
        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }

    /// Start the next attempt, sleeping first unless this is the very first one
    pub async fn wait_for_attempt(&mut self, cancel: &CancellationToken) -> Result<u32, ReconnectError> {
        if !self.policy.is_unlimited() && self.current_attempt >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            warn!(
                "Maximum reconnection attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return Err(ReconnectError::MaxAttemptsExceeded(self.policy.max_attempts));
        }

        let first = self.stats.total_attempts == 0;
        self.current_attempt += 1;
        self.stats.total_attempts += 1;
        self.state = ConnectionState::Reconnecting;

        if !first {
            let delay = self.calculate_next_delay();
            info!(
                "Waiting {:?} before connection attempt {}/{}",
                delay,
                self.current_attempt,
                if self.policy.is_unlimited() {
                    "∞".to_string()
                } else {
                    self.policy.max_attempts.to_string()
                }
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
                _ = tokio::time::sleep(delay) => {},
            }
        }

        if cancel.is_cancelled() {
            return Err(ReconnectError::Cancelled);
        }
        Ok(self.current_attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert!(policy.is_unlimited());

        let mut helper = ReconnectHelper::new(policy);
        for attempt in 1..10 {
            helper.current_attempt = attempt;
            assert_eq!(helper.calculate_next_delay(), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = ReconnectPolicy {
            jitter: false,
            ..ReconnectPolicy::exponential(5, 100, 10_000, 2.0)
        };
        let mut helper = ReconnectHelper::new(policy);

        helper.current_attempt = 1;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(100));
        helper.current_attempt = 3;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(400));
        helper.current_attempt = 20;
        assert_eq!(helper.calculate_next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_saturates_at_max_delay() {
        let policy = ReconnectPolicy {
            jitter: false,
            ..ReconnectPolicy::exponential(0, 1, 30_000, 2.0)
        };
        let mut helper = ReconnectHelper::new(policy);

        for attempt in [64, 1_100, u32::MAX] {
            helper.current_attempt = attempt;
            assert_eq!(helper.calculate_next_delay(), Duration::from_secs(30));
        }

        // jittered delays stay within 25% of the cap
        helper.policy.jitter = true;
        helper.current_attempt = u32::MAX;
        let delay = helper.calculate_next_delay();
        assert!(delay <= Duration::from_millis(37_500));
        assert!(delay >= Duration::from_millis(22_500));
    }

    #[test]
    fn test_out_of_range_multiplier_falls_back_to_fixed_delay() {
        for multiplier in [f64::INFINITY, f64::NAN, -2.0] {
            let policy = ReconnectPolicy {
                jitter: false,
                ..ReconnectPolicy::exponential(0, 100, 10_000, multiplier)
            };
            let mut helper = ReconnectHelper::new(policy);
            helper.current_attempt = u32::MAX;
            assert_eq!(helper.calculate_next_delay(), Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::fixed(Duration::from_millis(10))
        };
        let mut helper = ReconnectHelper::new(policy);
        let cancel = CancellationToken::new();

        assert_eq!(helper.wait_for_attempt(&cancel).await, Ok(1));
        helper.record_failure("refused");
        assert_eq!(helper.wait_for_attempt(&cancel).await, Ok(2));
        helper.record_failure("refused");
        assert_eq!(helper.connection_state(), ConnectionState::Failed);

        assert_eq!(
            helper.wait_for_attempt(&cancel).await,
            Err(ReconnectError::MaxAttemptsExceeded(2))
        );
        assert_eq!(helper.stats().failed_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_budget_but_keeps_delay() {
        let policy = ReconnectPolicy {
            max_attempts: 1,
            ..ReconnectPolicy::default()
        };
        let mut helper = ReconnectHelper::new(policy);
        let cancel = CancellationToken::new();

        helper.wait_for_attempt(&cancel).await.unwrap();
        helper.mark_connected();
        helper.record_failure("connection lost");

        let started = tokio::time::Instant::now();
        assert_eq!(helper.wait_for_attempt(&cancel).await, Ok(1));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_delay() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy::default());
        let cancel = CancellationToken::new();
        helper.wait_for_attempt(&cancel).await.unwrap();
        helper.record_failure("refused");

        cancel.cancel();
        assert_eq!(
            helper.wait_for_attempt(&cancel).await,
            Err(ReconnectError::Cancelled)
        );
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: ReconnectPolicy =
            serde_yaml::from_str("max_attempts: 3\ninitial_delay_ms: 250\n").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, DEFAULT_RETRY_DELAY);
    }

    #[test]
    fn test_policy_rejects_bad_multiplier() {
        for text in ["backoff_multiplier: -2.0\n", "backoff_multiplier: .inf\n", "backoff_multiplier: .nan\n"] {
            let result: Result<ReconnectPolicy, _> = serde_yaml::from_str(text);
            assert!(result.is_err(), "{} should be rejected", text.trim());
        }

        let policy: ReconnectPolicy = serde_yaml::from_str("backoff_multiplier: 1.5\n").unwrap();
        assert_eq!(policy.backoff_multiplier, 1.5);
    }
}
