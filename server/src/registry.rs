//! Process-wide map of tracked entities
//!
//! This module owns every [`TrackedEntity`] and hands out handles to them:
//! - Lazy creation on first activity
//! - Removal on disconnect or administrative reset
//! - Bulk reset on configuration reload
//! - Periodic sweeping of idle entries
//!
//! Each entity sits behind its own mutex, so evaluating one player never
//! blocks another. The map has a separate lock that is only held while
//! looking up, inserting or removing entries.

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use shared::EntityId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ReloadPolicy;
use crate::entity::TrackedEntity;

pub type EntityHandle = Arc<Mutex<TrackedEntity>>;

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<EntityId, EntityHandle>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entity's handle, creating a fresh record on first contact
    pub fn handle(&self, id: &EntityId, now: Instant) -> EntityHandle {
        if let Some(handle) = self.entities.read().get(id) {
            return Arc::clone(handle);
        }

        // Built before the write lock so no one can observe a half-made entry
        let fresh = Arc::new(Mutex::new(TrackedEntity::new(id.clone(), now)));
        let mut entities = self.entities.write();
        let handle = entities.entry(id.clone()).or_insert_with(|| {
            debug!("Tracking new entity {}", id);
            fresh
        });
        Arc::clone(handle)
    }

    /// Runs `f` on the live record of `id`, creating it on first contact.
    /// A handle retired between lookup and locking is looked up again, so the
    /// update never lands on a record that was already dropped.
    pub fn with_entity<R>(&self, id: &EntityId, now: Instant, mut f: impl FnMut(&mut TrackedEntity) -> R) -> R {
        loop {
            let handle = self.handle(id, now);
            let mut entity = handle.lock();
            if entity.retired {
                continue;
            }
            return f(&mut *entity);
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<EntityHandle> {
        self.entities.read().get(id).map(Arc::clone)
    }

    /// Forgets an entity. Returns false if it was not tracked.
    pub fn remove(&self, id: &EntityId) -> bool {
        let mut entities = self.entities.write();
        match entities.remove(id) {
            Some(handle) => {
                // An in-flight update finishes first; later ones see the flag
                handle.lock().retired = true;
                info!("Stopped tracking {}", id);
                true
            }
            None => false,
        }
    }

    /// Applies a reload policy to every tracked entity
    pub fn reload(&self, policy: ReloadPolicy) {
        match policy {
            ReloadPolicy::ClearAll => {
                let mut entities = self.entities.write();
                info!("Reload: dropping {} tracked entities", entities.len());
                for (_, handle) in entities.drain() {
                    handle.lock().retired = true;
                }
            }
            ReloadPolicy::PreserveSetbacks => {
                let handles: Vec<EntityHandle> = self.entities.read().values().map(Arc::clone).collect();
                info!("Reload: resetting violation data of {} entities", handles.len());
                for handle in handles {
                    handle.lock().more_packets.clear_violations();
                }
            }
        }
    }

    /// Removes entities idle for longer than `max_idle` and returns their ids.
    /// Entities locked by an in-flight evaluation are in use and are kept.
    pub fn sweep(&self, max_idle: Duration, now: Instant) -> Vec<EntityId> {
        let mut entities = self.entities.write();
        let stale: Vec<EntityId> = entities
            .iter()
            .filter(|(_, handle)| match handle.try_lock() {
                Some(mut entity) if entity.is_idle(max_idle, now) => {
                    entity.retired = true;
                    true
                }
                _ => false,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            entities.remove(id);
        }

        if !stale.is_empty() {
            debug!("Swept {} idle entities", stale.len());
        }
        stale
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Position;
    use std::thread;

    fn steve() -> EntityId {
        EntityId::new("Steve")
    }

    fn alex() -> EntityId {
        EntityId::new("Alex")
    }

    #[test]
    fn test_registry_creation() {
        let registry = EntityRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_handle_creates_lazily() {
        let registry = EntityRegistry::new();
        assert!(registry.get(&steve()).is_none());

        let handle = registry.handle(&steve(), Instant::now());
        assert_eq!(handle.lock().id, steve());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_handle_returns_same_entity() {
        let registry = EntityRegistry::new();
        let first = registry.handle(&steve(), Instant::now());
        first.lock().more_packets.window.packet_counter = 5;

        let second = registry.handle(&steve(), Instant::now());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().more_packets.window.packet_counter, 5);
    }

    #[test]
    fn test_remove_entity() {
        let registry = EntityRegistry::new();
        registry.handle(&steve(), Instant::now());

        assert!(registry.remove(&steve()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_entity() {
        let registry = EntityRegistry::new();
        assert!(!registry.remove(&steve()));
    }

    #[test]
    fn test_reload_clear_all() {
        let registry = EntityRegistry::new();
        registry.handle(&steve(), Instant::now());
        registry.handle(&alex(), Instant::now());

        registry.reload(ReloadPolicy::ClearAll);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reload_preserving_setbacks() {
        let registry = EntityRegistry::new();
        let handle = registry.handle(&steve(), Instant::now());
        {
            let mut entity = handle.lock();
            entity.more_packets.violation_level = 40.0;
            entity.more_packets.window.buffer = 12;
            entity.more_packets.setback = Some(Position::new(5.0, 64.0, 5.0));
        }

        registry.reload(ReloadPolicy::PreserveSetbacks);

        let entity = handle.lock();
        assert_eq!(registry.len(), 1);
        assert_eq!(entity.more_packets.violation_level, 0.0);
        assert_eq!(entity.more_packets.window.buffer, 0);
        assert_eq!(entity.more_packets.setback, Some(Position::new(5.0, 64.0, 5.0)));
    }

    #[test]
    fn test_sweep_removes_idle_entities() {
        let registry = EntityRegistry::new();
        let start = Instant::now();
        registry.handle(&steve(), start);
        registry.handle(&alex(), start + Duration::from_secs(50));

        let swept = registry.sweep(Duration::from_secs(30), start + Duration::from_secs(60));

        assert_eq!(swept, vec![steve()]);
        assert_eq!(registry.ids(), vec![alex()]);
    }

    #[test]
    fn test_sweep_skips_locked_entities() {
        let registry = EntityRegistry::new();
        let start = Instant::now();
        let handle = registry.handle(&steve(), start);

        let guard = handle.lock();
        let swept = registry.sweep(Duration::from_secs(1), start + Duration::from_secs(10));
        drop(guard);

        assert!(swept.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_handle_is_retired() {
        let registry = EntityRegistry::new();
        let stale = registry.handle(&steve(), Instant::now());

        registry.remove(&steve());

        assert!(stale.lock().retired);
    }

    #[test]
    fn test_with_entity_skips_retired_record() {
        let registry = EntityRegistry::new();
        let now = Instant::now();
        // Looked up before a disconnect, used after it
        let stale = registry.handle(&steve(), now);
        registry.remove(&steve());

        registry.with_entity(&steve(), now, |entity| entity.more_packets.window.packet_counter += 1);

        assert_eq!(stale.lock().more_packets.window.packet_counter, 0);
        let live = registry.get(&steve()).unwrap();
        assert!(!Arc::ptr_eq(&stale, &live));
        assert_eq!(live.lock().more_packets.window.packet_counter, 1);
    }

    #[test]
    fn test_sweep_and_clear_all_retire_records() {
        let registry = EntityRegistry::new();
        let start = Instant::now();
        let swept = registry.handle(&steve(), start);
        let cleared = registry.handle(&alex(), start + Duration::from_secs(50));

        registry.sweep(Duration::from_secs(30), start + Duration::from_secs(60));
        assert!(swept.lock().retired);
        assert!(!cleared.lock().retired);

        registry.reload(ReloadPolicy::ClearAll);
        assert!(cleared.lock().retired);
    }

    #[test]
    fn test_update_racing_disconnect_is_not_lost() {
        let registry = Arc::new(EntityRegistry::new());
        let now = Instant::now();

        for _ in 0..200 {
            registry.handle(&steve(), now);
            let updater = {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.with_entity(&steve(), now, |entity| entity.more_packets.window.packet_counter += 1);
                })
            };
            let removed = registry.remove(&steve());
            updater.join().unwrap();

            // The update either happened before the removal or created a new record
            let live = registry.get(&steve()).map(|h| h.lock().more_packets.window.packet_counter);
            assert!(removed);
            assert!(live.is_none() || live == Some(1));
            registry.remove(&steve());
        }
    }

    #[test]
    fn test_concurrent_first_contact_creates_one_entity() {
        let registry = Arc::new(EntityRegistry::new());
        let now = Instant::now();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let handle = registry.handle(&steve(), now);
                    handle.lock().more_packets.window.packet_counter += 1;
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.len(), 1);
        let handle = registry.get(&steve()).unwrap();
        assert_eq!(handle.lock().more_packets.window.packet_counter, 8);
    }
}
