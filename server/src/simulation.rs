//! Synthetic client traffic
//!
//! Honest clients send one movement update per tick on average, with jitter:
//! sometimes an update is late and arrives together with the next one. Flooders
//! send `factor` times as many updates.

use rand::Rng;
use shared::EntityId;

/// Distance covered by one movement update
const STEP_LENGTH: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrafficProfile {
    Honest,
    Flooder { factor: f64 },
}

impl TrafficProfile {
    pub fn label(&self) -> &'static str {
        match self {
            TrafficProfile::Honest => "honest",
            TrafficProfile::Flooder { .. } => "flooder",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedClient {
    pub id: EntityId,
    pub profile: TrafficProfile,
    heading: f64,
    /// Update held back by jitter, sent with the next tick
    delayed: bool,
}

impl SimulatedClient {
    pub fn new(id: EntityId, profile: TrafficProfile) -> Self {
        Self {
            id,
            profile,
            heading: 0.0,
            delayed: false,
        }
    }

    /// Number of updates this client sends during one tick
    pub fn packets_for_tick<R: Rng>(&mut self, rng: &mut R) -> u32 {
        match self.profile {
            TrafficProfile::Honest => {
                let carried = u32::from(std::mem::take(&mut self.delayed));
                if rng.gen_bool(0.1) {
                    self.delayed = true;
                    carried
                } else {
                    1 + carried
                }
            }
            TrafficProfile::Flooder { factor } => {
                let factor = if factor.is_finite() { factor.max(0.0) } else { 0.0 };
                let whole = factor.floor();
                let extra = rng.gen_bool((factor - whole).clamp(0.0, 1.0));
                whole as u32 + u32::from(extra)
            }
        }
    }

    /// Movement delta of one update; the heading wanders a little each step
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> (f64, f64, f64) {
        self.heading += rng.gen_range(-0.3..0.3);
        (self.heading.cos() * STEP_LENGTH, 0.0, self.heading.sin() * STEP_LENGTH)
    }
}

pub fn spawn_clients(honest: usize, flooders: usize, flood_factor: f64) -> Vec<SimulatedClient> {
    let honest_clients =
        (0..honest).map(|i| SimulatedClient::new(EntityId::new(format!("honest-{}", i + 1)), TrafficProfile::Honest));
    let flooding_clients = (0..flooders).map(|i| {
        SimulatedClient::new(
            EntityId::new(format!("flooder-{}", i + 1)),
            TrafficProfile::Flooder { factor: flood_factor },
        )
    });
    honest_clients.chain(flooding_clients).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_honest_client_averages_one_per_tick() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut client = SimulatedClient::new(EntityId::new("a"), TrafficProfile::Honest);

        let ticks = 2000;
        let total: u32 = (0..ticks).map(|_| client.packets_for_tick(&mut rng)).sum();
        let pending = u32::from(client.delayed);

        // Every update is sent eventually, at most one tick late
        assert_eq!(total + pending, ticks);
    }

    #[test]
    fn test_honest_client_never_bursts_more_than_two() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut client = SimulatedClient::new(EntityId::new("a"), TrafficProfile::Honest);
        for _ in 0..1000 {
            assert!(client.packets_for_tick(&mut rng) <= 2);
        }
    }

    #[test]
    fn test_flooder_sends_factor_per_tick() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut client = SimulatedClient::new(EntityId::new("f"), TrafficProfile::Flooder { factor: 2.0 });
        for _ in 0..100 {
            assert_eq!(client.packets_for_tick(&mut rng), 2);
        }

        let mut fractional = SimulatedClient::new(EntityId::new("g"), TrafficProfile::Flooder { factor: 1.5 });
        let total: u32 = (0..1000).map(|_| fractional.packets_for_tick(&mut rng)).sum();
        assert!((1300..=1700).contains(&total));
    }

    #[test]
    fn test_unusable_flood_factor_sends_nothing() {
        let mut rng = StdRng::seed_from_u64(13);
        for factor in [f64::INFINITY, f64::NAN, -2.5] {
            let mut client = SimulatedClient::new(EntityId::new("f"), TrafficProfile::Flooder { factor });
            assert_eq!(client.packets_for_tick(&mut rng), 0);
        }
    }

    #[test]
    fn test_step_length() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut client = SimulatedClient::new(EntityId::new("a"), TrafficProfile::Honest);
        for _ in 0..10 {
            let (dx, dy, dz) = client.step(&mut rng);
            assert_approx_eq!((dx * dx + dz * dz).sqrt(), STEP_LENGTH);
            assert_eq!(dy, 0.0);
        }
    }

    #[test]
    fn test_spawn_clients() {
        let clients = spawn_clients(2, 1, 3.0);
        assert_eq!(clients.len(), 3);
        assert_eq!(clients[0].id.as_str(), "honest-1");
        assert_eq!(clients[2].id.as_str(), "flooder-1");
        assert_eq!(clients[2].profile.label(), "flooder");
        assert_eq!(clients[0].profile, TrafficProfile::Honest);
    }
}
