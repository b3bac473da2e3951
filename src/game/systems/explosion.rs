//! Barrel explosions and chain reactions
//!
//! A detonation damages every tank and intact barrel inside the blast
//! radius with linear falloff, then leaves a static wreck behind. Barrels
//! emptied by a blast go off after a fixed delay through the schedule
//! rather than on the spot.

use tracing::debug;

use crate::game::constants::barrel::{BLAST_DAMAGE, BLAST_RADIUS, CHAIN_DELAY_TICKS};
use crate::game::entity::{EntityId, EntityKind, EntityType};
use crate::game::events::GameEvent;
use crate::game::schedule::{Schedule, ScheduledAction};
use crate::game::systems::collision::damage_tank;
use crate::game::world::World;

/// Blast damage at `distance` from the center
#[inline]
pub fn blast_damage(distance: f32) -> f32 {
    if distance >= BLAST_RADIUS {
        return 0.0;
    }
    BLAST_DAMAGE * (1.0 - distance / BLAST_RADIUS)
}

/// Fire every scheduled action due at `tick`
pub fn process_due(
    world: &mut World,
    schedule: &mut Schedule,
    tick: u64,
    events: &mut Vec<GameEvent>,
) {
    for action in schedule.pop_due(tick) {
        match action {
            ScheduledAction::DetonateBarrel { barrel, source } => {
                detonate(world, schedule, barrel, source, tick, events);
            }
        }
    }
}

/// Explode a barrel now. Returns false if it is gone or already a wreck.
pub fn detonate(
    world: &mut World,
    schedule: &mut Schedule,
    barrel_id: EntityId,
    source: Option<EntityId>,
    tick: u64,
    events: &mut Vec<GameEvent>,
) -> bool {
    let Some(barrel) = world.get_mut(barrel_id) else {
        debug!("Skipping detonation of missing barrel {}", barrel_id);
        return false;
    };
    let center = barrel.position;
    if !barrel.explode() {
        return false;
    }
    events.push(GameEvent::BarrelExploded {
        id: barrel_id,
        position: center,
    });
    events.push(GameEvent::BecameStatic { id: barrel_id });

    let mut victims: Vec<(EntityId, EntityType, f32)> = world
        .iter()
        .filter(|e| e.id != barrel_id)
        .filter(|e| e.entity_type() == EntityType::Tank || e.is_intact_barrel())
        .filter_map(|e| {
            let damage = blast_damage(e.position.distance_to(center));
            (damage > 0.0).then_some((e.id, e.entity_type(), damage))
        })
        .collect();
    victims.sort_unstable_by_key(|(id, _, _)| *id);

    for (id, entity_type, damage) in victims {
        match entity_type {
            EntityType::Tank => damage_tank(world, id, damage, source, events),
            EntityType::Barrel => damage_barrel(world, schedule, id, damage, source, tick, events),
            _ => {}
        }
    }

    true
}

fn damage_barrel(
    world: &mut World,
    schedule: &mut Schedule,
    id: EntityId,
    amount: f32,
    source: Option<EntityId>,
    tick: u64,
    events: &mut Vec<GameEvent>,
) {
    let Some(entity) = world.get_mut(id) else {
        return;
    };
    let Some(remaining) = entity.apply_damage(amount, source) else {
        return;
    };
    events.push(GameEvent::Damaged {
        target: id,
        source,
        amount,
        remaining,
    });

    if remaining > 0.0 {
        return;
    }
    if let EntityKind::Barrel(state) = &mut entity.kind {
        if !state.detonation_pending {
            state.detonation_pending = true;
            schedule.schedule(
                tick + CHAIN_DELAY_TICKS,
                ScheduledAction::DetonateBarrel { barrel: id, source },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::tank;
    use crate::game::entity::Faction;
    use crate::util::vec3::Vec3;

    #[test]
    fn test_blast_damage_falloff() {
        assert_eq!(blast_damage(0.0), BLAST_DAMAGE);
        assert!((blast_damage(BLAST_RADIUS * 0.5) - BLAST_DAMAGE * 0.5).abs() < 1e-4);
        assert_eq!(blast_damage(BLAST_RADIUS), 0.0);
        assert_eq!(blast_damage(BLAST_RADIUS * 2.0), 0.0);
    }

    #[test]
    fn test_detonation_damages_and_leaves_wreck() {
        let mut world = World::default();
        let mut schedule = Schedule::new();
        let mut events = Vec::new();

        let b = world.spawn_barrel(Vec3::ZERO);
        let near = world.spawn_tank(Faction::Enemy, Vec3::new(BLAST_RADIUS * 0.5, 0.0, 0.0), 0.0);
        let far = world.spawn_tank(Faction::Enemy, Vec3::new(BLAST_RADIUS * 2.0, 0.0, 0.0), 0.0);

        assert!(detonate(&mut world, &mut schedule, b, Some(near), 10, &mut events));
        assert!(!detonate(&mut world, &mut schedule, b, None, 11, &mut events));

        let wreck = world.get(b).unwrap();
        assert!(wreck.is_static);
        assert!(!wreck.is_intact_barrel());

        let expected = tank::MAX_HEALTH - BLAST_DAMAGE * 0.5;
        assert!((world.get(near).unwrap().health().unwrap() - expected).abs() < 1e-3);
        assert_eq!(world.get(far).unwrap().health(), Some(tank::MAX_HEALTH));
        assert!(events.contains(&GameEvent::BecameStatic { id: b }));
    }

    #[test]
    fn test_chain_reaction_is_delayed() {
        let mut world = World::default();
        let mut schedule = Schedule::new();
        let mut events = Vec::new();

        let first = world.spawn_barrel(Vec3::ZERO);
        let second = world.spawn_barrel(Vec3::new(3.0, 0.0, 0.0));
        let third = world.spawn_barrel(Vec3::new(8.0, 0.0, 0.0));

        schedule.schedule(0, ScheduledAction::DetonateBarrel { barrel: first, source: None });
        process_due(&mut world, &mut schedule, 0, &mut events);

        // Second is emptied and queued, third is only scratched
        assert!(!world.get(second).unwrap().is_intact_barrel());
        assert!(!world.get(second).unwrap().is_static);
        assert_eq!(schedule.next_due(), Some(CHAIN_DELAY_TICKS));

        process_due(&mut world, &mut schedule, CHAIN_DELAY_TICKS - 1, &mut events);
        assert!(!world.get(second).unwrap().is_static);

        process_due(&mut world, &mut schedule, CHAIN_DELAY_TICKS, &mut events);
        assert!(world.get(second).unwrap().is_static);
        let exploded = events
            .iter()
            .filter(|e| matches!(e, GameEvent::BarrelExploded { .. }))
            .count();
        assert_eq!(exploded, 2);
        assert!(world.get(third).is_some());
    }

    #[test]
    fn test_blast_destroys_weak_tank() {
        let mut world = World::default();
        let mut schedule = Schedule::new();
        let mut events = Vec::new();

        let b = world.spawn_barrel(Vec3::ZERO);
        let t = world.spawn_tank(Faction::Player, Vec3::new(1.0, 0.0, 0.0), 0.0);
        world.get_mut(t).unwrap().apply_damage(90.0, None);

        detonate(&mut world, &mut schedule, b, None, 0, &mut events);
        assert!(world.get(t).is_none());
        assert!(events.contains(&GameEvent::Destroyed { id: t, entity_type: EntityType::Tank }));
    }
}
