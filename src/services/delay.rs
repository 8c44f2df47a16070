//! Delay detection
//!
//! Pure decision over signals the ingest worker derives from the session:
//! should this driver be re-optimised, and why. Dispatcher roster changes
//! always propagate; traffic triggers are rate-limited by the minimum
//! reroute interval.

use crate::types::frames::RerouteReason;
use crate::types::session::StopChange;

/// Tunable trigger thresholds
#[derive(Debug, Clone)]
pub struct DelayThresholds {
    /// Minutes behind schedule at the next stop before rerouting
    pub delay_threshold_minutes: i64,
    /// Remaining/baseline duration ratio before rerouting
    pub traffic_increase_ratio: f64,
    /// Quiet period after a reroute during which traffic triggers are held
    pub min_reroute_interval_secs: i64,
}

impl Default for DelayThresholds {
    fn default() -> Self {
        Self {
            delay_threshold_minutes: 5,
            traffic_increase_ratio: 1.20,
            min_reroute_interval_secs: 300,
        }
    }
}

/// Signals derived from one session snapshot
#[derive(Debug, Clone, Default)]
pub struct DelaySignals {
    /// Projected minus scheduled arrival at the next stop, minutes
    pub schedule_delay_minutes: i64,
    /// Travel + service from the current position through the remaining stops
    pub remaining_duration_minutes: u32,
    /// Remaining duration captured when the route was published
    pub baseline_remaining_minutes: u32,
    pub stops_changed: Option<StopChange>,
    /// None when the session has never rerouted
    pub seconds_since_last_reroute: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerouteDecision {
    Stay,
    Reroute(RerouteReason),
}

/// Decide whether the session needs a new route. The quiet interval
/// suppresses the traffic triggers only; stop changes must reach the
/// driver regardless of how recently the route changed.
pub fn decide(signals: &DelaySignals, thresholds: &DelayThresholds) -> RerouteDecision {
    if let Some(change) = signals.stops_changed {
        let reason = match change {
            StopChange::Added => RerouteReason::StopAdded,
            StopChange::Cancelled => RerouteReason::StopCancelled,
        };
        return RerouteDecision::Reroute(reason);
    }

    if let Some(since) = signals.seconds_since_last_reroute {
        if since < thresholds.min_reroute_interval_secs {
            return RerouteDecision::Stay;
        }
    }

    if signals.schedule_delay_minutes > thresholds.delay_threshold_minutes {
        return RerouteDecision::Reroute(RerouteReason::TrafficDelay);
    }

    if signals.baseline_remaining_minutes > 0 {
        let limit = signals.baseline_remaining_minutes as f64 * thresholds.traffic_increase_ratio;
        if signals.remaining_duration_minutes as f64 > limit {
            return RerouteDecision::Reroute(RerouteReason::TrafficDelay);
        }
    }

    RerouteDecision::Stay
}
