//! Metrics collector (C9, spec §2: "Decision latency, switches,
//! starvation, score"). Aggregates counters already tracked by the
//! policies and the switch controller into one read surface, plus a
//! synthesized health score external tooling can threshold on.

use crate::policy::PolicyStats;
use crate::switch::SwitchStats;

/// Rolling decision-latency counters, sampled around each `select_next`
/// call by whichever component drives the scheduler loop (spec §2:
/// "Decision latency").
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    pub last_us: u32,
    pub max_us: u32,
    pub sum_us: u64,
    pub samples: u64,
}

impl LatencyStats {
    pub fn record(&mut self, decision_us: u32) {
        self.last_us = decision_us;
        if decision_us > self.max_us {
            self.max_us = decision_us;
        }
        self.sum_us += decision_us as u64;
        self.samples += 1;
    }

    pub fn mean_us(&self) -> u32 {
        if self.samples == 0 {
            0
        } else {
            (self.sum_us / self.samples) as u32
        }
    }
}

/// Snapshot of every counter the scheduler core tracks, plus a derived
/// health score in `[0, 100]`.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub latency: LatencyStats,
    pub policy: PolicyStats,
    pub switches: SwitchStats,
    pub score: u8,
}

/// Aggregates decision-latency samples; everything else is read directly
/// from the policy and switch controller on each `snapshot()` call so
/// there is exactly one source of truth for those counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    latency: LatencyStats,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            latency: LatencyStats {
                last_us: 0,
                max_us: 0,
                sum_us: 0,
                samples: 0,
            },
        }
    }

    pub fn record_decision_latency(&mut self, decision_us: u32) {
        self.latency.record(decision_us);
    }

    /// Synthesizes a `[0, 100]` health score: starts at 100, loses weight
    /// for every rollback (the costliest observable failure), every
    /// budget violation, and for a starvation count growing relative to
    /// total switches. This is a diagnostic convenience, not a control
    /// input anywhere in the core.
    fn score(policy: &PolicyStats, switches: &SwitchStats) -> u8 {
        let mut score: i32 = 100;
        score -= (switches.rollback_count * 10).min(50) as i32;
        score -= (switches.budget_violations * 5).min(30) as i32;
        score -= (policy.starvation_count).min(20) as i32;
        score.clamp(0, 100) as u8
    }

    pub fn snapshot(&self, policy: PolicyStats, switches: SwitchStats) -> MetricsSnapshot {
        MetricsSnapshot {
            latency: self.latency,
            policy,
            switches,
            score: Self::score(&policy, &switches),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_tracks_max_and_mean() {
        let mut latency = LatencyStats::default();
        latency.record(10);
        latency.record(30);
        latency.record(20);
        assert_eq!(latency.max_us, 30);
        assert_eq!(latency.mean_us(), 20);
    }

    #[test]
    fn score_starts_at_100_and_degrades_with_rollbacks() {
        let metrics = Metrics::new();
        let policy = PolicyStats::default();
        let healthy = metrics.snapshot(policy, SwitchStats::default());
        assert_eq!(healthy.score, 100);

        let degraded = metrics.snapshot(
            policy,
            SwitchStats {
                total_switches: 3,
                successful_switches: 0,
                rollback_count: 3,
                budget_violations: 0,
            },
        );
        assert_eq!(degraded.score, 70);
    }
}
