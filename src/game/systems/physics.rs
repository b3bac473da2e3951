use rayon::prelude::*;

use crate::game::entity::{EntityId, EntityKind};
use crate::game::events::GameEvent;
use crate::game::world::World;

/// Advance entities by one step.
/// Projectiles fly and age, weapon timers count down, and tanks whose
/// trigger is live fire a new projectile.
/// Uses rayon for the per-entity integration, then spawns sequentially
pub fn update(world: &mut World, dt: f32, events: &mut Vec<GameEvent>) {
    let boundary = world.boundary();

    world.entities_mut().par_values_mut().for_each(|entity| {
        if entity.disposed {
            return;
        }
        match &mut entity.kind {
            EntityKind::Projectile(p) => {
                entity.position += p.velocity * dt;
                p.lifetime -= dt;
            }
            EntityKind::Tank(t) => {
                t.fire_timer = (t.fire_timer - dt).max(0.0);
            }
            _ => {}
        }
    });

    // Expired or out-of-world projectiles (sequential - disposal)
    let expired: Vec<EntityId> = world
        .iter()
        .filter(|e| match &e.kind {
            EntityKind::Projectile(p) => p.lifetime <= 0.0 || !boundary.contains_point(e.position),
            _ => false,
        })
        .map(|e| e.id)
        .collect();
    for id in expired {
        world.dispose(id);
    }

    let mut shooters: Vec<EntityId> = world
        .iter_mut()
        .filter_map(|e| {
            let id = e.id;
            let fired = e.as_tank_mut().is_some_and(|t| t.take_shot());
            fired.then_some(id)
        })
        .collect();
    shooters.sort_unstable();

    for owner in shooters {
        if let Some(projectile) = world.spawn_projectile(owner) {
            events.push(GameEvent::ProjectileFired { owner, projectile });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::{projectile, sim::DT, tank};
    use crate::game::entity::Faction;
    use crate::util::vec3::Vec3;

    #[test]
    fn test_projectile_flies_along_heading() {
        let mut world = World::default();
        let mut events = Vec::new();
        let t = world.spawn_tank(Faction::Player, Vec3::ZERO, 0.0);
        let p = world.spawn_projectile(t).unwrap();
        let start = world.get(p).unwrap().position;

        update(&mut world, DT, &mut events);

        let moved = world.get(p).unwrap().position - start;
        assert!(moved.approx_eq(Vec3::new(0.0, 0.0, projectile::SPEED * DT), 1e-4));
    }

    #[test]
    fn test_expired_projectiles_disposed() {
        let mut world = World::default();
        let mut events = Vec::new();
        let t = world.spawn_tank(Faction::Player, Vec3::ZERO, 0.0);
        let p = world.spawn_projectile(t).unwrap();
        if let EntityKind::Projectile(state) = &mut world.get_mut(p).unwrap().kind {
            state.lifetime = DT * 0.5;
        }

        update(&mut world, DT, &mut events);
        assert!(world.get(p).is_none());
    }

    #[test]
    fn test_projectile_leaving_world_disposed() {
        let mut world = World::default();
        let mut events = Vec::new();
        let edge = world.boundary().max.z - 0.5;
        let t = world.spawn_tank(Faction::Player, Vec3::new(0.0, 0.0, edge - tank::MUZZLE_OFFSET), 0.0);
        let p = world.spawn_projectile(t).unwrap();

        update(&mut world, DT, &mut events);
        assert!(world.get(p).is_none());
    }

    #[test]
    fn test_auto_fire_respects_interval() {
        let mut world = World::default();
        let mut events = Vec::new();
        let t = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
        world.get_mut(t).unwrap().start_auto_fire(1.0);

        // Fires on the first step and again a second later
        for _ in 0..75 {
            update(&mut world, DT, &mut events);
        }
        let fired = events
            .iter()
            .filter(|e| matches!(e, GameEvent::ProjectileFired { owner, .. } if *owner == t))
            .count();
        assert_eq!(fired, 2);
    }

    #[test]
    fn test_single_shot_waits_for_cooldown() {
        let mut world = World::default();
        let mut events = Vec::new();
        let t = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);

        world.get_mut(t).unwrap().fire_once();
        update(&mut world, DT, &mut events);
        world.get_mut(t).unwrap().fire_once();
        update(&mut world, DT, &mut events);
        assert_eq!(events.len(), 1);

        let steps = (tank::FIRE_COOLDOWN / DT).ceil() as usize;
        for _ in 0..steps {
            update(&mut world, DT, &mut events);
        }
        assert_eq!(events.len(), 2);
    }
}
