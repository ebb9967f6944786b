//! Last known-good position per entity
//!
//! The setback point follows legitimate movement: every finalized window that
//! did not end in a rollback moves it to the entity's current position. When a
//! rollback is ordered the point stays put, so repeated violations keep pulling
//! the entity back to the same place.

use shared::Position;

pub struct SetbackManager;

impl SetbackManager {
    /// Sets the point only if nothing was recorded yet
    pub fn ensure_initialized(setback: &mut Option<Position>, fallback: Position) {
        if setback.is_none() {
            *setback = Some(fallback);
        }
    }

    /// Moves the point to `candidate`. Only call this when no rollback was
    /// triggered in the current evaluation.
    pub fn advance(setback: &mut Option<Position>, candidate: Position) {
        *setback = Some(candidate);
    }

    pub fn current_setback(setback: &Option<Position>) -> Option<Position> {
        *setback
    }
}
