//! Violation escalation
//!
//! Configuration maps violation-level thresholds to sets of actions. The policy
//! picks the highest threshold the current level reaches and runs its actions
//! through the per-entity [`ExecutionHistory`], which decides whether each
//! action actually fires:
//!
//! - `delay`: the action needs more than `delay` triggers inside the history
//!   window before it executes. A delay of 2 fires on the third offence.
//! - `repeat`: minimum time between two executions of the same action.
//!
//! The result is a [`Decision`] listing the effects the host has to carry out.
//! A `Cancel` action makes the caller roll the entity back to its setback
//! point.

use serde::{Deserialize, Serialize};
use shared::{EntityId, HISTORY_WINDOW_SECS};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionKind {
    /// Write a log line rendered from `message`
    Log { level: LogLevel, message: String },
    /// Send `message` to the offending entity
    Notify { message: String },
    /// Ask the host to run a console command
    Command { command: String },
    /// Deny the movement and roll back to the setback point
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Key in the execution history; actions sharing a name share limits
    pub name: String,
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub repeat_secs: u64,
    pub kind: ActionKind,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            delay: 0,
            repeat_secs: 0,
            kind,
        }
    }

    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_repeat(mut self, repeat_secs: u64) -> Self {
        self.repeat_secs = repeat_secs;
        self
    }

    pub fn cancel() -> Self {
        Self::new("cancel", ActionKind::Cancel)
    }

    pub fn log(name: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self::new(
            name,
            ActionKind::Log {
                level,
                message: message.into(),
            },
        )
    }

    fn repeat(&self) -> Duration {
        Duration::from_secs(self.repeat_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionThreshold {
    pub threshold: u32,
    pub actions: Vec<Action>,
}

/// Threshold table, always sorted by ascending threshold
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ActionThreshold>", into = "Vec<ActionThreshold>")]
pub struct ActionList {
    thresholds: Vec<ActionThreshold>,
}

impl ActionList {
    pub fn new(mut thresholds: Vec<ActionThreshold>) -> Self {
        thresholds.sort_by_key(|t| t.threshold);
        Self { thresholds }
    }

    /// Highest threshold not exceeding `violation_level`
    pub fn actions_for(&self, violation_level: f64) -> Option<&ActionThreshold> {
        self.thresholds
            .iter()
            .rev()
            .find(|t| f64::from(t.threshold) <= violation_level)
    }

    pub fn thresholds(&self) -> &[ActionThreshold] {
        &self.thresholds
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

impl From<Vec<ActionThreshold>> for ActionList {
    fn from(thresholds: Vec<ActionThreshold>) -> Self {
        Self::new(thresholds)
    }
}

impl From<ActionList> for Vec<ActionThreshold> {
    fn from(list: ActionList) -> Self {
        list.thresholds
    }
}

#[derive(Debug, Clone, Default)]
struct ActionRecord {
    triggers: VecDeque<Instant>,
    last_executed: Option<Instant>,
}

impl ActionRecord {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.triggers.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.triggers.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        self.triggers.is_empty()
            && self
                .last_executed
                .map_or(true, |last| now.saturating_duration_since(last) > window)
    }
}

/// Per-entity memory of which actions were triggered and executed recently
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    window: Duration,
    records: HashMap<String, ActionRecord>,
}

impl ExecutionHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: HashMap::new(),
        }
    }

    /// Registers a trigger of `action` and reports whether it should run now
    pub fn should_execute(&mut self, action: &Action, now: Instant) -> bool {
        let window = self.window;
        let record = self.records.entry(action.name.clone()).or_default();
        record.prune(now, window);
        record.triggers.push_back(now);

        if record.triggers.len() <= action.delay as usize {
            return false;
        }

        if let Some(last) = record.last_executed {
            if now.saturating_duration_since(last) < action.repeat() {
                return false;
            }
        }

        record.last_executed = Some(now);
        true
    }

    /// Drops records that have not been touched within the window
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        for record in self.records.values_mut() {
            record.prune(now, window);
        }
        self.records.retain(|_, record| !record.is_stale(now, window));
    }

    /// Triggers of `name` still inside the window
    pub fn trigger_count(&self, name: &str) -> usize {
        self.records.get(name).map_or(0, |r| r.triggers.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(Duration::from_secs(HISTORY_WINDOW_SECS))
    }
}

/// Everything a log or notification template may refer to
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub check: String,
    pub entity: EntityId,
    pub world: String,
    pub violation_level: f64,
    /// Packets above the plain limit in the offending window
    pub packets: i64,
    pub limit: u32,
}

impl LogRecord {
    pub fn render(&self, template: &str) -> String {
        template
            .replace("[player]", self.entity.as_str())
            .replace("[world]", &self.world)
            .replace("[check]", &self.check)
            .replace("[violations]", &(self.violation_level.max(0.0) as u64).to_string())
            .replace("[packets]", &self.packets.to_string())
            .replace("[limit]", &self.limit.to_string())
    }
}

/// Concrete effect for the host to carry out
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Log { level: LogLevel, message: String },
    Notify { message: String },
    Command { command: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// Roll the entity back to its setback point
    pub cancel: bool,
    pub report: Option<LogRecord>,
    pub effects: Vec<Effect>,
}

/// Shared by every check; per-check behavior comes from the `ActionList`
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationPolicy;

impl EscalationPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Callers only invoke this for windows with excess that are not skipped.
    pub fn evaluate(
        &self,
        violation_level: f64,
        actions: &ActionList,
        history: &mut ExecutionHistory,
        record: LogRecord,
        now: Instant,
    ) -> Decision {
        history.prune(now);

        let mut decision = Decision::default();
        let Some(selected) = actions.actions_for(violation_level) else {
            return decision;
        };

        for action in &selected.actions {
            if !history.should_execute(action, now) {
                continue;
            }

            match &action.kind {
                ActionKind::Log { level, message } => decision.effects.push(Effect::Log {
                    level: *level,
                    message: record.render(message),
                }),
                ActionKind::Notify { message } => decision.effects.push(Effect::Notify {
                    message: record.render(message),
                }),
                ActionKind::Command { command } => decision.effects.push(Effect::Command {
                    command: record.render(command),
                }),
                ActionKind::Cancel => decision.cancel = true,
            }
        }

        if decision
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::Log { .. }))
        {
            decision.report = Some(record);
        }

        decision
    }
}
