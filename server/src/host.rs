//! Simulation host driving the engine against synthetic traffic

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::EntityId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::guard::Guard;
use crate::lag_clock::LagClock;
use crate::simulation::{spawn_clients, TrafficProfile};
use crate::world::{SimWorld, WorldSink};

/// Messages sent from background tasks to the host loop
#[derive(Debug)]
pub enum HostMessage {
    Join {
        id: EntityId,
        world: String,
        profile: TrafficProfile,
    },
    Move {
        id: EntityId,
        delta: (f64, f64, f64),
    },
    Quit {
        id: EntityId,
    },
    Reload,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub tick_rate: u32,
    /// How long the synthetic clients keep sending
    pub duration: Duration,
    pub honest: usize,
    pub flooders: usize,
    pub flood_factor: f64,
    /// Stall after every n-th window; 0 disables stalls
    pub stall_every: u64,
    pub stall: Duration,
    pub reload_every: Option<Duration>,
    /// Re-read on every reload when set
    pub config_path: Option<PathBuf>,
    pub world: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            duration: Duration::from_secs(30),
            honest: 4,
            flooders: 1,
            flood_factor: 2.0,
            stall_every: 0,
            stall: Duration::from_secs(2),
            reload_every: None,
            config_path: None,
            world: "world".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSummary {
    pub id: EntityId,
    pub profile: &'static str,
    pub moves: u64,
    pub setbacks: u32,
    pub violation_level: f64,
}

pub struct Host {
    settings: HostSettings,
    clock: Arc<LagClock>,
    guard: Arc<Guard>,
    world: SimWorld,
    profiles: HashMap<EntityId, TrafficProfile>,
    summaries: Vec<PlayerSummary>,

    host_tx: mpsc::UnboundedSender<HostMessage>,
    host_rx: mpsc::UnboundedReceiver<HostMessage>,
}

impl Host {
    pub fn new(settings: HostSettings, config: EngineConfig) -> Self {
        let clock = Arc::new(LagClock::new(config.clock.clone()));
        let guard = Arc::new(Guard::new(clock.clone(), config));
        let (host_tx, host_rx) = mpsc::unbounded_channel();

        Self {
            settings,
            clock,
            guard,
            world: SimWorld::new(),
            profiles: HashMap::new(),
            summaries: Vec::new(),
            host_tx,
            host_rx,
        }
    }

    pub fn guard(&self) -> Arc<Guard> {
        Arc::clone(&self.guard)
    }

    /// Handle for injecting messages, e.g. a shutdown on Ctrl+C
    pub fn sender(&self) -> mpsc::UnboundedSender<HostMessage> {
        self.host_tx.clone()
    }

    fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.settings.tick_rate))
    }

    /// Spawns task that plays the synthetic clients and shuts the host down
    /// when done
    fn spawn_traffic(&self) {
        let mut clients = spawn_clients(self.settings.honest, self.settings.flooders, self.settings.flood_factor);
        let host_tx = self.host_tx.clone();
        let tick_duration = self.tick_duration();
        let duration = self.settings.duration;
        let world = self.settings.world.clone();

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();

            for client in &clients {
                let join = HostMessage::Join {
                    id: client.id.clone(),
                    world: world.clone(),
                    profile: client.profile,
                };
                if host_tx.send(join).is_err() {
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + duration;
            let mut ticker = interval(tick_duration);

            'traffic: while tokio::time::Instant::now() < deadline {
                ticker.tick().await;

                for client in clients.iter_mut() {
                    for _ in 0..client.packets_for_tick(&mut rng) {
                        let delta = client.step(&mut rng);
                        if let Err(e) = host_tx.send(HostMessage::Move {
                            id: client.id.clone(),
                            delta,
                        }) {
                            error!("Failed to send move to host loop: {}", e);
                            break 'traffic;
                        }
                    }
                }
            }

            for client in &clients {
                if host_tx.send(HostMessage::Quit { id: client.id.clone() }).is_err() {
                    return;
                }
            }
            let _ = host_tx.send(HostMessage::Shutdown);
        });
    }

    /// Spawns task that drops idle entities
    fn spawn_sweeper(&self) {
        let guard = Arc::clone(&self.guard);
        let host_tx = self.host_tx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));

            while !host_tx.is_closed() {
                ticker.tick().await;

                let max_idle = guard.config().sweep_idle();
                let swept = guard.sweep(max_idle, Instant::now());
                if swept > 0 {
                    info!("Swept {} idle entities", swept);
                }
            }
        });
    }

    /// Spawns task that requests a configuration reload every `every`
    fn spawn_reloader(&self, every: Duration) {
        let host_tx = self.host_tx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if host_tx.send(HostMessage::Reload).is_err() {
                    break;
                }
            }
        });
    }

    /// Processes one message. Returns false when the host should stop.
    fn handle_message(&mut self, message: HostMessage) -> bool {
        match message {
            HostMessage::Join { id, world, profile } => {
                self.world.add_player(id.clone(), &world);
                self.profiles.insert(id.clone(), profile);
                self.guard.on_join(&id, Instant::now());
            }

            HostMessage::Move { id, delta } => {
                let Some((from, to)) = self.world.propose_move(&id, delta) else {
                    warn!("Move from unknown player {}", id);
                    return true;
                };
                let world_name = self
                    .world
                    .players
                    .get(&id)
                    .map(|player| player.world.clone())
                    .unwrap_or_else(|| self.settings.world.clone());

                let setback = {
                    let mut sink = WorldSink::new(&mut self.world);
                    self.guard.on_move(&id, &world_name, from, to, Instant::now(), &mut sink)
                };
                if setback.is_none() {
                    self.world.commit_move(&id, to);
                }
            }

            HostMessage::Quit { id } => {
                if let Some(summary) = self.summarize(&id) {
                    self.summaries.push(summary);
                }
                self.world.remove_player(&id);
                self.profiles.remove(&id);
                self.guard.on_disconnect(&id);
            }

            HostMessage::Reload => {
                let config = match &self.settings.config_path {
                    Some(path) => match EngineConfig::load(path) {
                        Ok(config) => Some(config),
                        Err(e) => {
                            error!("Reload failed, keeping current configuration: {}", e);
                            return true;
                        }
                    },
                    None => None,
                };
                self.guard.on_reload(config);
            }

            HostMessage::Shutdown => {
                info!("Host shutting down");
                return false;
            }
        }
        true
    }

    async fn on_tick(&mut self) {
        self.world.tick += 1;

        let Some(window) = self.clock.tick(Instant::now()) else {
            return;
        };
        debug!(
            "Tick {}: window {} ({}ms), {} entities tracked",
            self.world.tick,
            window.id,
            window.duration_ms,
            self.guard.tracked()
        );

        if self.settings.stall_every > 0 && window.id % self.settings.stall_every == 0 {
            warn!("Simulating a {:?} server stall after window {}", self.settings.stall, window.id);
            tokio::time::sleep(self.settings.stall).await;
        }
    }

    fn summarize(&self, id: &EntityId) -> Option<PlayerSummary> {
        let player = self.world.players.get(id)?;
        let profile = self.profiles.get(id).map_or("unknown", TrafficProfile::label);

        Some(PlayerSummary {
            id: id.clone(),
            profile,
            moves: player.moves,
            setbacks: player.setbacks,
            violation_level: self.guard.violation_level(id).unwrap_or(0.0),
        })
    }

    /// Summarizes and disconnects everyone still online
    fn finish(&mut self) -> Vec<PlayerSummary> {
        let remaining: Vec<EntityId> = self.world.players.keys().cloned().collect();
        for id in remaining {
            if let Some(summary) = self.summarize(&id) {
                self.summaries.push(summary);
            }
            self.world.remove_player(&id);
            self.guard.on_disconnect(&id);
        }

        let mut summaries = std::mem::take(&mut self.summaries);
        summaries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        for summary in &summaries {
            info!(
                "{} ({}): {} moves, {} setbacks, violation level {:.2}",
                summary.id, summary.profile, summary.moves, summary.setbacks, summary.violation_level
            );
        }
        summaries
    }

    /// Main host loop. Runs until the traffic task or a caller sends
    /// [`HostMessage::Shutdown`].
    pub async fn run(&mut self) -> Result<Vec<PlayerSummary>, Box<dyn std::error::Error>> {
        if self.settings.tick_rate == 0 {
            return Err("tick rate must be positive".into());
        }
        let factor = self.settings.flood_factor;
        if !factor.is_finite() || factor < 0.0 {
            return Err(format!("flood factor must be a finite non-negative number, got {}", factor).into());
        }

        self.spawn_traffic();
        self.spawn_sweeper();
        if let Some(every) = self.settings.reload_every {
            self.spawn_reloader(every);
        }

        let mut tick_interval = interval(self.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Host started: {} honest, {} flooding clients at {} ticks/s",
            self.settings.honest, self.settings.flooders, self.settings.tick_rate
        );

        loop {
            tokio::select! {
                message = self.host_rx.recv() => {
                    match message {
                        Some(message) => {
                            if !self.handle_message(message) {
                                break;
                            }
                        }
                        None => break,
                    }
                },

                _ = tick_interval.tick() => {
                    self.on_tick().await;
                },
            }
        }

        Ok(self.finish())
    }
}
