//! Typed game events with per-kind observer lists

use hashbrown::HashMap;

use crate::game::entity::{EntityId, EntityType};
use crate::game::systems::ai::AgentMode;
use crate::util::vec3::Vec3;

/// Something that happened during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// Two objects are touching and neither pair member claimed it
    Collision { a: EntityId, b: EntityId },
    Damaged {
        target: EntityId,
        source: Option<EntityId>,
        amount: f32,
        remaining: f32,
    },
    Destroyed { id: EntityId, entity_type: EntityType },
    ProjectileFired { owner: EntityId, projectile: EntityId },
    BarrelExploded { id: EntityId, position: Vec3 },
    /// A dynamic object was converted to static bookkeeping
    BecameStatic { id: EntityId },
    StateChanged {
        agent: EntityId,
        from: AgentMode,
        to: AgentMode,
    },
}

/// Discriminant used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Collision,
    Damaged,
    Destroyed,
    ProjectileFired,
    BarrelExploded,
    BecameStatic,
    StateChanged,
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::Collision { .. } => EventKind::Collision,
            GameEvent::Damaged { .. } => EventKind::Damaged,
            GameEvent::Destroyed { .. } => EventKind::Destroyed,
            GameEvent::ProjectileFired { .. } => EventKind::ProjectileFired,
            GameEvent::BarrelExploded { .. } => EventKind::BarrelExploded,
            GameEvent::BecameStatic { .. } => EventKind::BecameStatic,
            GameEvent::StateChanged { .. } => EventKind::StateChanged,
        }
    }
}

type Observer = Box<dyn FnMut(&GameEvent) + Send>;

/// Observer lists keyed by event kind
#[derive(Default)]
pub struct EventBus {
    observers: HashMap<EventKind, Vec<Observer>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, observer: F)
    where
        F: FnMut(&GameEvent) + Send + 'static,
    {
        self.observers.entry(kind).or_default().push(Box::new(observer));
    }

    pub fn publish(&mut self, event: &GameEvent) {
        if let Some(observers) = self.observers.get_mut(&event.kind()) {
            for observer in observers.iter_mut() {
                observer(event);
            }
        }
    }

    pub fn publish_all(&mut self, events: &[GameEvent]) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn observer_count(&self, kind: EventKind) -> usize {
        self.observers.get(&kind).map_or(0, |o| o.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_observers_only_see_their_kind() {
        let mut bus = EventBus::new();
        let collisions = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));

        let c = collisions.clone();
        bus.subscribe(EventKind::Collision, move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        let d = destroyed.clone();
        bus.subscribe(EventKind::Destroyed, move |e| {
            assert!(matches!(e, GameEvent::Destroyed { .. }));
            d.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish_all(&[
            GameEvent::Collision { a: 1, b: 2 },
            GameEvent::Collision { a: 3, b: 4 },
            GameEvent::Destroyed { id: 1, entity_type: EntityType::Tank },
            GameEvent::BecameStatic { id: 9 },
        ]);

        assert_eq!(collisions.load(Ordering::Relaxed), 2);
        assert_eq!(destroyed.load(Ordering::Relaxed), 1);
        assert_eq!(bus.observer_count(EventKind::BecameStatic), 0);
    }
}
