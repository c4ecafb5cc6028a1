//! Race state supplied by the external telemetry service
//!
//! Field names mirror the service's camelCase JSON. Every field is optional
//! on the wire so a partial snapshot (garage, practice without gaps) still
//! parses.

mod feed;

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

pub use feed::{TelemetryFeed, TelemetryPublisher};

/// One reading of the car and session state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySnapshot {
    /// Milliseconds since the Unix epoch, as stamped by the service
    pub timestamp: u64,
    pub timing: Timing,
    pub position: Position,
    pub gaps: Gaps,
    pub fuel: Fuel,
    pub pit: Pit,
    pub session: SessionInfo,
    pub flags: Flags,
    pub incidents: Incidents,
    pub tires: Tires,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    pub current_lap: i32,
    pub laps_completed: i32,
    pub lap_dist_pct: f64,
    pub current_lap_time: f64,
    pub last_lap_time: Option<f64>,
    pub best_lap_time: Option<f64>,
    pub delta_to_best: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Position {
    pub overall: u32,
    pub class: u32,
    pub total_cars: u32,
}

/// Time gaps in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Gaps {
    pub ahead: Option<f64>,
    pub behind: Option<f64>,
    pub to_leader: Option<f64>,
}

/// Fuel in liters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fuel {
    pub level: Option<f64>,
    pub pct: Option<f64>,
    pub used_last_lap: Option<f64>,
    pub per_lap_avg: Option<f64>,
    pub estimated_laps_remaining: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pit {
    pub in_pit_lane: bool,
    pub in_pit_stall: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionInfo {
    /// Session type as reported by the sim ("Race", "Practice", ...)
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub state: String,
    pub time_remaining: Option<f64>,
    pub laps_remaining: Option<i32>,
    pub track_name: String,
    pub car_name: String,
    pub est_lap_time: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Flags {
    pub active: Vec<String>,
    pub raw: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Incidents {
    pub count: u32,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tires {
    /// Per-corner wear, percent worn
    pub wear_pct: Option<Vec<f64>>,
}

impl TelemetrySnapshot {
    /// Whether this is a race session (shorter proactive interval)
    #[must_use]
    pub fn is_race(&self) -> bool {
        self.session.kind.to_ascii_lowercase().contains("race")
    }

    /// Lap time to normalize per-lap rates against
    #[must_use]
    pub fn reference_lap_time(&self) -> Option<f64> {
        self.timing
            .last_lap_time
            .filter(|t| *t > 0.0)
            .or_else(|| self.session.est_lap_time.filter(|t| *t > 0.0))
    }

    /// Mean tyre wear, if the sim reports it
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_tyre_wear(&self) -> Option<f64> {
        let wear = self.tires.wear_pct.as_deref().filter(|w| !w.is_empty())?;
        Some(wear.iter().sum::<f64>() / wear.len() as f64)
    }

    /// One-line race state for the model prompt
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();

        let _ = write!(out, "{}", self.session.kind);
        if !self.session.track_name.is_empty() {
            let _ = write!(out, " at {}", self.session.track_name);
        }
        if self.position.overall > 0 {
            let _ = write!(out, "; P{}", self.position.overall);
            if self.position.total_cars > 0 {
                let _ = write!(out, "/{}", self.position.total_cars);
            }
        }
        let _ = write!(out, "; lap {}", self.timing.current_lap);
        if let Some(laps) = self.session.laps_remaining.filter(|l| *l > 0) {
            let _ = write!(out, " ({laps} to go)");
        }
        if let Some(ahead) = self.gaps.ahead {
            let _ = write!(out, "; gap ahead {ahead:.1}s");
        }
        if let Some(behind) = self.gaps.behind {
            let _ = write!(out, "; gap behind {behind:.1}s");
        }
        if let Some(last) = self.timing.last_lap_time.filter(|t| *t > 0.0) {
            let _ = write!(out, "; last lap {}", format_lap(last));
        }
        if let Some(best) = self.timing.best_lap_time.filter(|t| *t > 0.0) {
            let _ = write!(out, "; best {}", format_lap(best));
        }
        if let Some(level) = self.fuel.level {
            let _ = write!(out, "; fuel {level:.1}L");
            if let Some(laps) = self.fuel.estimated_laps_remaining.filter(|l| *l > 0.0) {
                let _ = write!(out, " (~{laps:.1} laps)");
            }
        }
        if !self.flags.active.is_empty() {
            let _ = write!(out, "; flags {}", self.flags.active.join(", "));
        }
        if self.pit.in_pit_lane {
            out.push_str("; in pit lane");
        }
        out
    }
}

/// Format seconds as `m:ss.mmm`
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_lap(seconds: f64) -> String {
    let millis = (seconds * 1000.0).round().max(0.0) as u64;
    format!(
        "{}:{:02}.{:03}",
        millis / 60_000,
        (millis / 1000) % 60,
        millis % 1000
    )
}

/// Kind of discrete event the service detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEventKind {
    FlagChange,
    PositionChange,
    LapComplete,
    PitEntry,
    PitExit,
    Incident,
    SessionStateChange,
    SessionJoined,
    #[serde(other)]
    Other,
}

/// Discrete event with its raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub kind: TelemetryEventKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TelemetryEvent {
    /// Compact form for the model prompt
    #[must_use]
    pub fn describe(&self) -> String {
        let kind = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_default();
        if self.data.is_null() {
            kind
        } else {
            format!("{kind} {}", self.data)
        }
    }
}
