//! Trigger rules, evaluated in a fixed order each tick

use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use super::Trend;
use crate::telemetry::TelemetrySnapshot;

/// Gap change that is worth mentioning, seconds per lap
pub const GAP_RATE_THRESHOLD: f64 = 0.5;

/// Remaining laps of fuel at or below which the driver is warned
pub const FUEL_WARNING_LAPS: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    FlagChange,
    Incident,
    PositionChange,
    GapDelta,
    FuelLow,
}

impl TriggerKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FlagChange => "flag_change",
            Self::Incident => "incident",
            Self::PositionChange => "position_change",
            Self::GapDelta => "gap_delta",
            Self::FuelLow => "fuel_low",
        }
    }

    #[must_use]
    pub const fn priority(self) -> Priority {
        match self {
            Self::FlagChange | Self::Incident | Self::FuelLow => Priority::High,
            Self::PositionChange | Self::GapDelta => Priority::Medium,
        }
    }

    /// Minimum time between two emissions of this kind
    #[must_use]
    pub const fn cooldown(self) -> Duration {
        match self {
            Self::FlagChange | Self::Incident => Duration::ZERO,
            Self::PositionChange => Duration::from_secs(30),
            Self::GapDelta => Duration::from_secs(45),
            Self::FuelLow => Duration::from_secs(60),
        }
    }
}

/// Candidate reason to speak unprompted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    pub priority: Priority,
    #[serde(skip)]
    pub cooldown: Duration,
    pub message: String,
    pub data: serde_json::Value,
}

impl Trigger {
    fn new(kind: TriggerKind, message: String, data: serde_json::Value) -> Self {
        Self {
            kind,
            priority: kind.priority(),
            cooldown: kind.cooldown(),
            message,
            data,
        }
    }
}

#[must_use]
pub fn check_flag_change(previous: &TelemetrySnapshot, current: &TelemetrySnapshot) -> Option<Trigger> {
    if previous.flags == current.flags {
        return None;
    }
    let flags = if current.flags.active.is_empty() {
        "none".to_string()
    } else {
        current.flags.active.join(", ")
    };
    Some(Trigger::new(
        TriggerKind::FlagChange,
        format!("Flags changed: {flags}"),
        json!({ "flags": current.flags.active, "previous": previous.flags.active }),
    ))
}

/// Incident detection is not implemented; the slot stays in the rule order
#[must_use]
pub const fn check_incident(_previous: &TelemetrySnapshot, _current: &TelemetrySnapshot) -> Option<Trigger> {
    None
}

#[must_use]
pub fn check_position_change(previous: &TelemetrySnapshot, current: &TelemetrySnapshot) -> Option<Trigger> {
    let (from, to) = (previous.position.overall, current.position.overall);
    if from == 0 || to == 0 || from == to {
        return None;
    }
    let verb = if to < from { "gained" } else { "lost" };
    Some(Trigger::new(
        TriggerKind::PositionChange,
        format!("Position changed from P{from} to P{to} ({verb} {})", from.abs_diff(to)),
        json!({ "from": from, "to": to, "gapAhead": current.gaps.ahead, "gapBehind": current.gaps.behind }),
    ))
}

#[must_use]
pub fn check_gap_delta(trend: &Trend, current: &TelemetrySnapshot) -> Option<Trigger> {
    let rate = trend.gap_rate_sec_per_lap.filter(|r| r.abs() > GAP_RATE_THRESHOLD)?;
    let direction = if rate < 0.0 { "closing on" } else { "losing time to" };
    let gap = current
        .gaps
        .ahead
        .map_or_else(String::new, |g| format!(", gap now {g:.1}s"));
    Some(Trigger::new(
        TriggerKind::GapDelta,
        format!("Driver is {direction} the car ahead at {:.1}s per lap{gap}", rate.abs()),
        json!({ "gapRateSecPerLap": rate, "gapAhead": current.gaps.ahead }),
    ))
}

#[must_use]
pub fn check_fuel(trend: &Trend) -> Option<Trigger> {
    let laps = trend
        .estimated_laps_remaining
        .filter(|l| *l > 0.0 && *l <= FUEL_WARNING_LAPS)?;
    Some(Trigger::new(
        TriggerKind::FuelLow,
        format!("Fuel critical: about {laps:.1} laps remaining"),
        json!({ "estimatedLapsRemaining": laps, "fuelRateLitersPerLap": trend.fuel_rate_liters_per_lap }),
    ))
}

/// Every rule that fires, in evaluation order
///
/// Rules comparing two snapshots need a previous tick; the fuel rule does not.
#[must_use]
pub fn evaluate(previous: Option<&TelemetrySnapshot>, current: &TelemetrySnapshot, trend: &Trend) -> Vec<Trigger> {
    let mut fired = Vec::new();
    if let Some(previous) = previous {
        fired.extend(check_flag_change(previous, current));
        fired.extend(check_incident(previous, current));
        fired.extend(check_position_change(previous, current));
    }
    fired.extend(check_gap_delta(trend, current));
    fired.extend(check_fuel(trend));
    fired
}
