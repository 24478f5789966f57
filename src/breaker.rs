//! Per-source circuit breaker.
//!
//! - `closed`: calls pass, failures are counted.
//! - `open`: calls are refused until the cooldown since the last failure elapses.
//! - `half_open`: one trial call is let through; its outcome closes or re-opens the circuit.
//!
//! Every time-dependent method has an `_at(now)` variant so tests can drive the clock.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitState {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub state: BreakerState,
    /// When the outstanding half-open trial was handed out.
    #[serde(skip)]
    trial_granted_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    states: DashMap<String, CircuitState>,
    threshold: u32,
    cooldown: ChronoDuration,
}

impl CircuitBreaker {
    pub fn new(cfg: &BreakerConfig) -> Self {
        Self::with_limits(cfg.failure_threshold, cfg.cooldown_secs)
    }

    /// `threshold` < 1 is treated as 1, `cooldown_secs` < 0 as 0.
    pub fn with_limits(threshold: u32, cooldown_secs: i64) -> Self {
        let threshold = threshold.max(1);
        let cooldown_secs = cooldown_secs.max(0);
        info!(
            target: "breaker",
            threshold,
            cooldown_secs,
            "circuit breaker initialized"
        );
        Self {
            states: DashMap::new(),
            threshold,
            cooldown: ChronoDuration::seconds(cooldown_secs),
        }
    }

    pub fn can_proceed(&self, source: &str) -> bool {
        self.can_proceed_at(source, Utc::now())
    }

    /// May `source` be called at `now`? An open circuit whose cooldown has
    /// elapsed moves to half-open and grants exactly one trial.
    pub fn can_proceed_at(&self, source: &str, now: DateTime<Utc>) -> bool {
        let Some(mut st) = self.states.get_mut(source) else {
            return true;
        };
        match st.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = st
                    .last_failure_at
                    .map_or(true, |t| now.signed_duration_since(t) >= self.cooldown);
                if cooled {
                    st.state = BreakerState::HalfOpen;
                    st.trial_granted_at = Some(now);
                    info!(target: "breaker", source, "cooldown elapsed, half-open trial granted");
                }
                cooled
            }
            BreakerState::HalfOpen => {
                // A trial is outstanding. Hand out another only if it went unreported for a full cooldown.
                let stale = st
                    .trial_granted_at
                    .map_or(true, |t| now.signed_duration_since(t) >= self.cooldown);
                if stale {
                    st.trial_granted_at = Some(now);
                }
                stale
            }
        }
    }

    pub fn record_success(&self, source: &str) {
        if let Some(mut st) = self.states.get_mut(source) {
            if st.state != BreakerState::Closed {
                info!(target: "breaker", source, "circuit closed");
            }
            st.consecutive_failures = 0;
            st.state = BreakerState::Closed;
            st.trial_granted_at = None;
        }
    }

    pub fn record_failure(&self, source: &str) {
        self.record_failure_at(source, Utc::now());
    }

    pub fn record_failure_at(&self, source: &str, now: DateTime<Utc>) {
        let mut st = self.states.entry(source.to_string()).or_default();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        st.last_failure_at = Some(now);
        st.trial_granted_at = None;

        let failed_trial = st.state == BreakerState::HalfOpen;
        if failed_trial || st.consecutive_failures >= self.threshold {
            if st.state != BreakerState::Open {
                warn!(
                    target: "breaker",
                    source,
                    failures = st.consecutive_failures,
                    failed_trial,
                    "circuit opened"
                );
            }
            st.state = BreakerState::Open;
        }
    }

    pub fn state(&self, source: &str) -> BreakerState {
        self.states
            .get(source)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn consecutive_failures(&self, source: &str) -> u32 {
        self.states
            .get(source)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// Sources that are not closed or carry at least one failure.
    pub fn status(&self) -> BTreeMap<String, CircuitState> {
        self.states
            .iter()
            .filter(|e| e.state != BreakerState::Closed || e.consecutive_failures > 0)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn unknown_source_is_closed() {
        let cb = CircuitBreaker::with_limits(3, 120);
        assert!(cb.can_proceed_at("blinkit", t0()));
        assert_eq!(cb.state("blinkit"), BreakerState::Closed);
        assert!(cb.status().is_empty());
    }

    #[test]
    fn opens_at_threshold() {
        let cb = CircuitBreaker::with_limits(3, 120);
        cb.record_failure_at("zepto", t0());
        cb.record_failure_at("zepto", t0());
        assert_eq!(cb.state("zepto"), BreakerState::Closed);
        assert!(cb.can_proceed_at("zepto", t0()));
        cb.record_failure_at("zepto", t0());
        assert_eq!(cb.state("zepto"), BreakerState::Open);
        assert!(!cb.can_proceed_at("zepto", t0() + ChronoDuration::seconds(119)));
    }

    #[test]
    fn success_resets_failures() {
        let cb = CircuitBreaker::with_limits(3, 120);
        cb.record_failure_at("zepto", t0());
        cb.record_failure_at("zepto", t0());
        cb.record_success("zepto");
        cb.record_failure_at("zepto", t0());
        assert_eq!(cb.consecutive_failures("zepto"), 1);
        assert_eq!(cb.state("zepto"), BreakerState::Closed);
    }

    #[test]
    fn failed_trial_reopens_immediately() {
        let cb = CircuitBreaker::with_limits(1, 60);
        cb.record_failure_at("zepto", t0());
        let later = t0() + ChronoDuration::seconds(60);
        assert!(cb.can_proceed_at("zepto", later));
        assert_eq!(cb.state("zepto"), BreakerState::HalfOpen);
        cb.record_failure_at("zepto", later);
        assert_eq!(cb.state("zepto"), BreakerState::Open);
        assert!(!cb.can_proceed_at("zepto", later + ChronoDuration::seconds(1)));
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let cb = CircuitBreaker::with_limits(0, 10);
        assert!(cb.can_proceed_at("x", t0()));
        cb.record_failure_at("x", t0());
        assert_eq!(cb.state("x"), BreakerState::Open);
    }
}
