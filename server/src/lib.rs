//! # Packet Guard
//!
//! Server-side detection of clients that send more movement updates than the
//! simulation allows, and graduated escalation against them.
//!
//! ## How Detection Works
//!
//! ### Windows Instead of Wall Time
//! The host reports every simulation step to a [`lag_clock::LagClock`]. Twenty
//! steps form one window, nominally one second. When the server falls behind,
//! windows stretch and the per-window packet allowance stretches with them, so
//! lag on the server side never turns into violations on the client side.
//!
//! ### Carry-Over Buffer
//! Network latency makes honest traffic bursty. Unused allowance is kept in a
//! bounded buffer and a burst is first paid for out of it. Only what the buffer
//! cannot absorb counts as excess.
//!
//! ### Violation Level
//! Excess accumulates into a per-entity violation level that decays by a fixed
//! factor every window. Configured thresholds on that level select actions:
//! log lines, notifications, commands and cancelling the movement.
//!
//! ### Rollback
//! Cancelling puts the entity back to its last known-good position. That
//! position only advances across windows that passed.
//!
//! ## Module Organization
//!
//! ### Engine
//! - `lag_clock`: window ids, durations and skip flags
//! - `packet_rate`: counting and buffer arithmetic
//! - `violation`: accumulation and decay
//! - `escalation`: threshold lists, action history and decisions
//! - `setback`: known-good positions
//! - `checks`: the check capability and the excess-packets check
//! - `entity` / `registry`: per-entity state and its concurrent map
//! - `config`: serde-backed configuration with per-world overrides
//! - `sink`: where decisions are carried out
//! - `guard`: the facade hosts talk to
//!
//! ### Simulation
//! - `world`: a minimal world that applies moves and setbacks
//! - `simulation`: honest and flooding traffic profiles
//! - `host`: async loop driving everything at a fixed tick rate
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::EngineConfig;
//! use server::guard::Guard;
//! use server::lag_clock::LagClock;
//! use server::sink::LoggingSink;
//! use shared::{EntityId, Position};
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! let clock = Arc::new(LagClock::default());
//! let guard = Guard::new(clock.clone(), EngineConfig::default());
//! let mut sink = LoggingSink;
//!
//! // Once per simulation step
//! clock.tick(Instant::now());
//!
//! // For every movement update received
//! let player = EntityId::new("Steve");
//! let from = Position::new(0.0, 64.0, 0.0);
//! let to = from.offset(0.2, 0.0, 0.0);
//! if let Some(setback) = guard.on_move(&player, "world", from, to, Instant::now(), &mut sink) {
//!     println!("{} rolled back to {}", player, setback);
//! }
//! ```

pub mod checks;
pub mod config;
pub mod entity;
pub mod escalation;
pub mod guard;
pub mod host;
pub mod lag_clock;
pub mod packet_rate;
pub mod registry;
pub mod setback;
pub mod simulation;
pub mod sink;
pub mod violation;
pub mod world;
