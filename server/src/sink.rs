//! Host side of a decision
//!
//! The engine never touches the world itself. It hands every effect of a
//! [`Decision`](crate::escalation::Decision) to an [`ActionSink`] and asks the
//! sink to perform rollbacks, which the host may refuse or fail to apply.

use log::{error, info, warn};
use shared::{EntityId, Position};

use crate::escalation::{Effect, LogLevel};

pub trait ActionSink {
    fn log(&mut self, level: LogLevel, message: &str);

    fn notify(&mut self, entity: &EntityId, message: &str);

    fn command(&mut self, entity: &EntityId, command: &str);

    /// Moves the entity to `target`. Returns whether the host applied it.
    fn set_back(&mut self, entity: &EntityId, target: Position) -> bool;

    fn apply(&mut self, entity: &EntityId, effect: &Effect) {
        match effect {
            Effect::Log { level, message } => self.log(*level, message),
            Effect::Notify { message } => self.notify(entity, message),
            Effect::Command { command } => self.command(entity, command),
        }
    }
}

/// Writes everything through the `log` facade. It cannot move entities, so
/// rollbacks are always reported as not applied.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl ActionSink for LoggingSink {
    fn log(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Low => info!("{}", message),
            LogLevel::Med => warn!("{}", message),
            LogLevel::High => error!("{}", message),
        }
    }

    fn notify(&mut self, entity: &EntityId, message: &str) {
        info!("[to {}] {}", entity, message);
    }

    fn command(&mut self, entity: &EntityId, command: &str) {
        info!("Command requested for {}: {}", entity, command);
    }

    fn set_back(&mut self, entity: &EntityId, target: Position) -> bool {
        info!("Setback requested for {} to {}", entity, target);
        false
    }
}

/// Sink that remembers everything it was asked to do
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub logs: Vec<(LogLevel, String)>,
    pub notifications: Vec<(EntityId, String)>,
    pub commands: Vec<(EntityId, String)>,
    pub setbacks: Vec<(EntityId, Position)>,
    /// What `set_back` reports back
    pub accept_setbacks: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            accept_setbacks: true,
            ..Self::default()
        }
    }
}

impl ActionSink for RecordingSink {
    fn log(&mut self, level: LogLevel, message: &str) {
        self.logs.push((level, message.to_string()));
    }

    fn notify(&mut self, entity: &EntityId, message: &str) {
        self.notifications.push((entity.clone(), message.to_string()));
    }

    fn command(&mut self, entity: &EntityId, command: &str) {
        self.commands.push((entity.clone(), command.to_string()));
    }

    fn set_back(&mut self, entity: &EntityId, target: Position) -> bool {
        self.setbacks.push((entity.clone(), target));
        self.accept_setbacks
    }
}
