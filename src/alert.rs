//! Per-source alert throttle.
//!
//! Raw detection results arrive at frame rate; user-visible alerts must
//! not. The throttle gates each result on two conditions per source: the
//! result must carry at least the minimum number of unmasked faces, and
//! the per-source cooldown must have elapsed. Evaluation takes the clock
//! as an argument so tests drive time explicitly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Alert gating parameters, shared by every source.
#[derive(Clone, Copy, Debug)]
pub struct AlertPolicy {
    /// Minimum spacing between alerts for one source.
    pub cooldown: Duration,
    /// Unmasked faces a single result must carry to be alert-eligible.
    pub min_violations: u32,
}

/// Outcome of evaluating one detection result against the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertDecision {
    /// Send the alert now.
    Notify,
    /// The result carried fewer violations than the minimum.
    BelowThreshold,
    /// Result eligible but the per-source cooldown is still running.
    CoolingDown,
}

/// Mutable per-source gating state.
///
/// `consecutive_violation_batches` is bookkeeping only: it counts back-to-
/// back violating results for future escalation policies and never
/// suppresses an alert.
#[derive(Clone, Debug, Default)]
pub struct AlertState {
    pub consecutive_violation_batches: u32,
    pub last_alert_at: Option<Instant>,
}

/// Thread-safe alert gate, one state entry per source name.
pub struct AlertThrottle {
    policy: AlertPolicy,
    states: Mutex<HashMap<String, AlertState>>,
}

impl AlertThrottle {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Evaluate one result for `source`. Must be called for every result,
    /// including violation-free ones: a clean result resets the streak
    /// bookkeeping.
    ///
    /// Eligibility is per result: `violation_count` meets the minimum and
    /// the cooldown has elapsed. A `Notify` outcome records `now` as the
    /// source's last alert time, so sustained violations re-alert once per
    /// cooldown window.
    pub fn evaluate(&self, source: &str, violation_count: u32, now: Instant) -> AlertDecision {
        let mut states = self.states.lock().expect("alert state lock");
        let state = states.entry(source.to_string()).or_default();

        if violation_count == 0 {
            state.consecutive_violation_batches = 0;
            return AlertDecision::BelowThreshold;
        }

        state.consecutive_violation_batches =
            state.consecutive_violation_batches.saturating_add(1);
        if violation_count < self.policy.min_violations {
            return AlertDecision::BelowThreshold;
        }

        if let Some(last) = state.last_alert_at {
            if now.duration_since(last) < self.policy.cooldown {
                return AlertDecision::CoolingDown;
            }
        }

        state.last_alert_at = Some(now);
        AlertDecision::Notify
    }

    /// Current gating state for a source, if any result has been seen.
    pub fn state(&self, source: &str) -> Option<AlertState> {
        self.states.lock().expect("alert state lock").get(source).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(cooldown_secs: u64, min_violations: u32) -> AlertThrottle {
        AlertThrottle::new(AlertPolicy {
            cooldown: Duration::from_secs(cooldown_secs),
            min_violations,
        })
    }

    #[test]
    fn first_eligible_result_notifies_immediately() {
        let throttle = throttle(300, 3);
        // A single result meeting the minimum alerts with no warm-up.
        assert_eq!(
            throttle.evaluate("cam", 3, Instant::now()),
            AlertDecision::Notify
        );
    }

    #[test]
    fn results_below_the_minimum_never_notify() {
        let throttle = throttle(300, 3);
        let t0 = Instant::now();
        // Repetition does not promote an under-threshold result.
        for i in 0..5 {
            assert_eq!(
                throttle.evaluate("cam", 2, t0 + Duration::from_secs(i)),
                AlertDecision::BelowThreshold
            );
        }
        assert!(throttle.state("cam").expect("state").last_alert_at.is_none());
    }

    #[test]
    fn cooldown_suppresses_then_reopens() {
        let throttle = throttle(300, 3);
        let t0 = Instant::now();
        assert_eq!(throttle.evaluate("cam", 3, t0), AlertDecision::Notify);
        assert_eq!(
            throttle.evaluate("cam", 3, t0 + Duration::from_secs(100)),
            AlertDecision::CoolingDown
        );
        assert_eq!(
            throttle.evaluate("cam", 3, t0 + Duration::from_secs(301)),
            AlertDecision::Notify
        );
    }

    #[test]
    fn streak_bookkeeping_tracks_but_never_gates() {
        let throttle = throttle(300, 3);
        let t0 = Instant::now();
        throttle.evaluate("cam", 1, t0);
        throttle.evaluate("cam", 1, t0);
        assert_eq!(
            throttle.state("cam").expect("state").consecutive_violation_batches,
            2
        );
        // Clean result wipes the streak.
        throttle.evaluate("cam", 0, t0);
        assert_eq!(
            throttle.state("cam").expect("state").consecutive_violation_batches,
            0
        );
        // Gating ignores the streak: an eligible result notifies with a
        // streak of zero behind it.
        assert_eq!(throttle.evaluate("cam", 3, t0), AlertDecision::Notify);
    }

    #[test]
    fn sources_gate_independently() {
        let throttle = throttle(300, 1);
        let t0 = Instant::now();
        assert_eq!(throttle.evaluate("lobby", 1, t0), AlertDecision::Notify);
        // A cooling lobby does not block the entrance.
        assert_eq!(
            throttle.evaluate("lobby", 1, t0 + Duration::from_secs(10)),
            AlertDecision::CoolingDown
        );
        assert_eq!(
            throttle.evaluate("entrance", 1, t0 + Duration::from_secs(10)),
            AlertDecision::Notify
        );
    }

    #[test]
    fn zero_cooldown_allows_back_to_back_alerts() {
        let throttle = throttle(0, 1);
        let t0 = Instant::now();
        assert_eq!(throttle.evaluate("cam", 1, t0), AlertDecision::Notify);
        assert_eq!(throttle.evaluate("cam", 1, t0), AlertDecision::Notify);
    }
}
