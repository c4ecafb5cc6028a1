//! Proactive Trigger Engine
//!
//! Decides when the engineer should speak without being addressed. The
//! session feeds it the latest telemetry before every tick and turns the
//! outcome into a model turn.

mod rules;
mod trend;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

pub use rules::{Priority, Trigger, TriggerKind, evaluate};
pub use trend::Trend;

use crate::config::ProactiveConfig;
use crate::telemetry::TelemetrySnapshot;

/// Speaking state the engine needs for suppression
#[derive(Debug, Clone, Copy, Default)]
pub struct TickContext {
    /// Mic enabled and voice detected
    pub driver_speaking: bool,
    /// Audio currently scheduled or playing
    pub assistant_speaking: bool,
}

/// Low-priority nudge emitted on every tick that has telemetry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodicContext {
    pub trend: Trend,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub trigger: Option<Trigger>,
    pub context: PeriodicContext,
}

struct Reading {
    snapshot: TelemetrySnapshot,
    at: Instant,
}

pub struct ProactiveEngine {
    race_interval: Duration,
    default_interval: Duration,
    previous: Option<Reading>,
    current: Option<Reading>,
    last_fired: HashMap<TriggerKind, Instant>,
}

impl ProactiveEngine {
    #[must_use]
    pub fn new(config: &ProactiveConfig) -> Self {
        Self {
            race_interval: config.race_interval,
            default_interval: config.default_interval,
            previous: None,
            current: None,
            last_fired: HashMap::new(),
        }
    }

    /// Record the newest snapshot, pushing the current one back
    pub fn observe(&mut self, snapshot: TelemetrySnapshot) {
        self.previous = self.current.take();
        self.current = Some(Reading {
            snapshot,
            at: Instant::now(),
        });
    }

    /// Telemetry went away; start over so stale state is never compared
    pub fn reset(&mut self) {
        self.previous = None;
        self.current = None;
    }

    /// Tick period for the current session type
    #[must_use]
    pub fn interval(&self) -> Duration {
        match &self.current {
            Some(r) if r.snapshot.is_race() => self.race_interval,
            _ => self.default_interval,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&TelemetrySnapshot> {
        self.current.as_ref().map(|r| &r.snapshot)
    }

    /// Evaluate the rules against the last two observations
    ///
    /// Returns `None` when no snapshot has been observed. Otherwise the
    /// periodic context is always present and at most one trigger survives
    /// cooldown and suppression.
    pub fn tick(&mut self, ctx: TickContext) -> Option<TickOutcome> {
        let current = self.current.as_ref()?;
        let previous = self.previous.as_ref();
        let elapsed = previous.map_or(Duration::ZERO, |p| current.at.duration_since(p.at));

        let trend = Trend::compute(previous.map(|p| &p.snapshot), &current.snapshot, elapsed);
        let now = Instant::now();

        let candidate = evaluate(previous.map(|p| &p.snapshot), &current.snapshot, &trend)
            .into_iter()
            .filter(|t| self.cooled_down(t, now))
            .min_by_key(|t| Reverse(t.priority));

        let trigger = candidate.and_then(|t| {
            if ctx.driver_speaking {
                tracing::debug!(kind = t.kind.as_str(), "trigger suppressed, driver speaking");
                return None;
            }
            if ctx.assistant_speaking && t.priority < Priority::High {
                tracing::debug!(kind = t.kind.as_str(), "trigger suppressed, assistant speaking");
                return None;
            }
            self.last_fired.insert(t.kind, now);
            tracing::info!(kind = t.kind.as_str(), priority = ?t.priority, message = %t.message, "proactive trigger");
            Some(t)
        });

        Some(TickOutcome {
            trigger,
            context: PeriodicContext {
                trend,
                summary: current.snapshot.summary(),
            },
        })
    }

    fn cooled_down(&self, trigger: &Trigger, now: Instant) -> bool {
        self.last_fired
            .get(&trigger.kind)
            .is_none_or(|at| now.duration_since(*at) >= trigger.cooldown)
    }
}
