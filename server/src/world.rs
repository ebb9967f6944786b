use log::info;
use shared::{EntityId, Position};
use std::collections::HashMap;

use crate::escalation::LogLevel;
use crate::sink::{ActionSink, LoggingSink};

/// Spawn height of simulated players
const SPAWN_Y: f64 = 64.0;

#[derive(Debug, Clone)]
pub struct SimPlayer {
    pub id: EntityId,
    pub world: String,
    pub position: Position,
    pub moves: u64,
    pub setbacks: u32,
}

/// Authoritative positions of the simulated players
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    pub tick: u64,
    pub players: HashMap<EntityId, SimPlayer>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_player(&mut self, id: EntityId, world: &str) {
        let slot = self.players.len() as f64;
        let position = Position::new(slot * 16.0, SPAWN_Y, 0.0);

        info!("Added player {} in {} at {}", id, world, position);
        self.players.insert(
            id.clone(),
            SimPlayer {
                id,
                world: world.to_string(),
                position,
                moves: 0,
                setbacks: 0,
            },
        );
    }

    pub fn remove_player(&mut self, id: &EntityId) -> Option<SimPlayer> {
        let removed = self.players.remove(id);
        if removed.is_some() {
            info!("Removed player {}", id);
        }
        removed
    }

    /// Current position and the position after applying `delta`
    pub fn propose_move(&self, id: &EntityId, delta: (f64, f64, f64)) -> Option<(Position, Position)> {
        self.players
            .get(id)
            .map(|player| (player.position, player.position.offset(delta.0, delta.1, delta.2)))
    }

    pub fn commit_move(&mut self, id: &EntityId, to: Position) {
        if let Some(player) = self.players.get_mut(id) {
            player.position = to;
            player.moves += 1;
        }
    }
}

/// Carries out decisions against the simulated world
pub struct WorldSink<'a> {
    world: &'a mut SimWorld,
    log: LoggingSink,
}

impl<'a> WorldSink<'a> {
    pub fn new(world: &'a mut SimWorld) -> Self {
        Self {
            world,
            log: LoggingSink,
        }
    }
}

impl ActionSink for WorldSink<'_> {
    fn log(&mut self, level: LogLevel, message: &str) {
        self.log.log(level, message);
    }

    fn notify(&mut self, entity: &EntityId, message: &str) {
        self.log.notify(entity, message);
    }

    fn command(&mut self, entity: &EntityId, command: &str) {
        self.log.command(entity, command);
    }

    fn set_back(&mut self, entity: &EntityId, target: Position) -> bool {
        match self.world.players.get_mut(entity) {
            Some(player) => {
                player.position = target;
                player.setbacks += 1;
                true
            }
            None => false,
        }
    }
}
