//! Rates derived from two consecutive snapshots

use std::time::Duration;

use serde::Serialize;

use crate::telemetry::TelemetrySnapshot;

/// Trend statistics, recomputed every tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    /// Change of the gap to the car ahead, seconds per lap; positive is
    /// falling back
    pub gap_rate_sec_per_lap: Option<f64>,
    pub fuel_rate_liters_per_lap: Option<f64>,
    pub estimated_laps_remaining: Option<f64>,
    pub position_stable: bool,
    pub tyre_degradation_pct: f64,
}

impl Trend {
    /// Compare `current` against the previous tick's snapshot
    ///
    /// `elapsed` is the wall time between the two readings; snapshot
    /// timestamps take precedence when both are present.
    #[must_use]
    pub fn compute(
        previous: Option<&TelemetrySnapshot>,
        current: &TelemetrySnapshot,
        elapsed: Duration,
    ) -> Self {
        let fuel_rate = fuel_rate(previous, current);
        let estimated_laps_remaining = match (current.fuel.level, fuel_rate) {
            (Some(level), Some(rate)) if level > 0.0 && rate > 0.0 => Some(level / rate),
            _ => current.fuel.estimated_laps_remaining,
        };

        Self {
            gap_rate_sec_per_lap: previous.and_then(|p| gap_rate(p, current, elapsed)),
            fuel_rate_liters_per_lap: fuel_rate,
            estimated_laps_remaining,
            position_stable: previous.is_none_or(|p| p.position.overall == current.position.overall),
            tyre_degradation_pct: current.mean_tyre_wear().unwrap_or(0.0),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_secs(previous: &TelemetrySnapshot, current: &TelemetrySnapshot, fallback: Duration) -> f64 {
    if previous.timestamp > 0 && current.timestamp > previous.timestamp {
        (current.timestamp - previous.timestamp) as f64 / 1000.0
    } else {
        fallback.as_secs_f64()
    }
}

fn gap_rate(previous: &TelemetrySnapshot, current: &TelemetrySnapshot, elapsed: Duration) -> Option<f64> {
    let delta = current.gaps.ahead? - previous.gaps.ahead?;
    let secs = elapsed_secs(previous, current, elapsed);

    match current.reference_lap_time() {
        Some(lap) if secs > 0.0 => Some(delta * lap / secs),
        _ => Some(delta),
    }
}

fn fuel_rate(previous: Option<&TelemetrySnapshot>, current: &TelemetrySnapshot) -> Option<f64> {
    if let Some(avg) = current.fuel.per_lap_avg.filter(|a| *a > 0.0) {
        return Some(avg);
    }

    let previous = previous?;
    let laps = current.timing.laps_completed - previous.timing.laps_completed;
    let used = previous.fuel.level? - current.fuel.level?;
    (laps > 0 && used > 0.0).then(|| used / f64::from(laps))
}
