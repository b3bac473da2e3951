//! Broad-phase collision detection and contact resolution
//!
//! Each tick the detector clears its octree, indexes every live object
//! that has geometry, then lets only dynamic objects query it. Candidate
//! pairs are claimed by their unordered id key before the exact AABB test,
//! so A-B and B-A collapse to one check. Nothing carries over between
//! ticks: the processed-pair set and the index are both rebuilt.

use hashbrown::HashMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::game::constants::world::{HALF_EXTENT, HALF_HEIGHT};
use crate::game::constants::octree::{MAX_DEPTH, MAX_OBJECTS_PER_NODE};
use crate::game::entity::{Entity, EntityId, EntityKind, EntityType, Faction};
use crate::game::events::GameEvent;
use crate::game::schedule::{Schedule, ScheduledAction};
use crate::game::spatial::{Aabb, Octree, OctreeStats};
use crate::game::world::World;
use crate::util::vec3::Vec3;

/// Anything the broad phase can index.
///
/// Implemented by live entities and by worker snapshots so both contexts
/// run the same detector.
pub trait Collidable {
    fn collision_id(&self) -> EntityId;
    /// Scaled world-space hitbox; `None` while geometry is unavailable
    fn bounding_volume(&self) -> Option<Aabb>;
    fn is_static(&self) -> bool;
    fn is_disposed(&self) -> bool;
    fn entity_type(&self) -> EntityType;
}

impl Collidable for Entity {
    fn collision_id(&self) -> EntityId {
        self.id
    }

    fn bounding_volume(&self) -> Option<Aabb> {
        Entity::bounding_volume(self)
    }

    fn is_static(&self) -> bool {
        self.is_static
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn entity_type(&self) -> EntityType {
        Entity::entity_type(self)
    }
}

/// Unordered id pair, stored with `a < b`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollisionPair {
    pub a: EntityId,
    pub b: EntityId,
}

impl CollisionPair {
    pub fn new(x: EntityId, y: EntityId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.a == id || self.b == id
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedVolume {
    bounds: Aabb,
    entity_type: EntityType,
}

/// Per-pass counters
#[derive(Debug, Clone, Default)]
pub struct BroadPhaseStats {
    pub indexed: usize,
    pub dynamic: usize,
    pub skipped_missing_geometry: usize,
    pub candidates_checked: usize,
    pub pairs_found: usize,
}

pub struct BroadPhase {
    tree: Octree<EntityId>,
    volumes: HashMap<EntityId, CachedVolume>,
    dynamic: Vec<EntityId>,
    processed: FxHashSet<CollisionPair>,
    candidates: Vec<EntityId>,
    stats: BroadPhaseStats,
}

impl BroadPhase {
    pub fn new(bounds: Aabb, max_objects: usize, max_depth: u32) -> Self {
        Self {
            tree: Octree::new(bounds, max_objects, max_depth),
            volumes: HashMap::with_capacity(256),
            dynamic: Vec::with_capacity(128),
            processed: FxHashSet::default(),
            candidates: Vec::with_capacity(64),
            stats: BroadPhaseStats::default(),
        }
    }

    /// Clear the index and refill it from `objects`.
    ///
    /// Each volume is computed exactly once here and cached for the rest
    /// of the tick. Disposed objects and objects without geometry are
    /// skipped.
    pub fn rebuild<'a, C, I>(&mut self, objects: I)
    where
        C: Collidable + 'a,
        I: IntoIterator<Item = &'a C>,
    {
        self.tree.clear();
        self.volumes.clear();
        self.dynamic.clear();
        self.stats = BroadPhaseStats::default();

        for object in objects {
            if object.is_disposed() {
                continue;
            }
            let id = object.collision_id();
            let Some(bounds) = object.bounding_volume() else {
                self.stats.skipped_missing_geometry += 1;
                continue;
            };

            self.tree.insert(id, bounds);
            self.volumes.insert(
                id,
                CachedVolume {
                    bounds,
                    entity_type: object.entity_type(),
                },
            );
            if !object.is_static() {
                self.dynamic.push(id);
            }
        }

        // Stable query order regardless of map iteration order
        self.dynamic.sort_unstable();
        self.stats.indexed = self.volumes.len();
        self.stats.dynamic = self.dynamic.len();
    }

    /// Run the dynamic-initiated candidate pass over the current index.
    ///
    /// Returns every intersecting pair exactly once, sorted by id.
    pub fn detect(&mut self) -> Vec<CollisionPair> {
        let Self {
            tree,
            volumes,
            dynamic,
            processed,
            candidates,
            stats,
        } = self;

        processed.clear();
        let mut pairs = Vec::new();

        for &id in dynamic.iter() {
            let Some(own) = volumes.get(&id) else {
                continue;
            };

            candidates.clear();
            tree.retrieve_into(&own.bounds, candidates);

            for &other in candidates.iter() {
                if other == id {
                    continue;
                }
                let Some(theirs) = volumes.get(&other) else {
                    continue;
                };
                let pair = CollisionPair::new(id, other);
                if !processed.insert(pair) {
                    continue;
                }

                stats.candidates_checked += 1;
                if own.bounds.intersects(&theirs.bounds) {
                    pairs.push(pair);
                }
            }
        }

        pairs.sort_unstable();
        stats.pairs_found = pairs.len();
        trace!(
            "Broad phase: {} indexed, {} candidates, {} pairs",
            stats.indexed,
            stats.candidates_checked,
            stats.pairs_found
        );
        pairs
    }

    /// Obstacle boxes within `radius` of `center`, excluding `exclude`
    /// and projectiles.
    pub fn obstacles_near(&self, center: Vec3, radius: f32, exclude: EntityId) -> Vec<Aabb> {
        let query = Aabb::from_center_half_extents(center, Vec3::splat(radius));
        let mut found = Vec::new();
        self.tree.retrieve_into(&query, &mut found);

        found
            .into_iter()
            .filter(|&id| id != exclude)
            .filter_map(|id| self.volumes.get(&id))
            .filter(|v| v.entity_type != EntityType::Projectile && v.bounds.intersects(&query))
            .map(|v| v.bounds)
            .collect()
    }

    /// Cached volume from the last rebuild
    pub fn volume(&self, id: EntityId) -> Option<Aabb> {
        self.volumes.get(&id).map(|v| v.bounds)
    }

    pub fn bounds(&self) -> Aabb {
        self.tree.bounds()
    }

    pub fn stats(&self) -> &BroadPhaseStats {
        &self.stats
    }

    pub fn tree_stats(&self) -> OctreeStats {
        self.tree.stats()
    }
}

impl Default for BroadPhase {
    fn default() -> Self {
        let half = Vec3::new(HALF_EXTENT, HALF_HEIGHT, HALF_EXTENT);
        Self::new(Aabb::new(-half, half), MAX_OBJECTS_PER_NODE, MAX_DEPTH)
    }
}

/// What resolution needs to know about one side of a pair
#[derive(Debug, Clone, Copy)]
struct Contact {
    id: EntityId,
    entity_type: EntityType,
    faction: Faction,
    owner: Option<EntityId>,
    damage: f32,
    intact_barrel: bool,
}

impl Contact {
    fn of(entity: &Entity) -> Self {
        let (owner, damage) = match &entity.kind {
            EntityKind::Projectile(p) => (Some(p.owner), p.damage),
            _ => (None, 0.0),
        };
        Self {
            id: entity.id,
            entity_type: entity.entity_type(),
            faction: entity.faction,
            owner,
            damage,
            intact_barrel: entity.is_intact_barrel(),
        }
    }
}

/// Main-thread entry point: index the world, find pairs, resolve them
pub fn rebuild_and_detect(
    world: &mut World,
    broad_phase: &mut BroadPhase,
    schedule: &mut Schedule,
    tick: u64,
) -> Vec<GameEvent> {
    broad_phase.rebuild(world.iter());
    let pairs = broad_phase.detect();
    resolve_pairs(world, &pairs, schedule, tick)
}

/// Keep only pairs whose live volumes still intersect.
///
/// Used for pairs computed elsewhere (the collision worker) against an
/// older snapshot.
pub fn retain_touching(world: &World, pairs: &mut Vec<CollisionPair>) {
    pairs.retain(|pair| {
        match (
            world.get(pair.a).and_then(|e| e.bounding_volume()),
            world.get(pair.b).and_then(|e| e.bounding_volume()),
        ) {
            (Some(a), Some(b)) => a.intersects(&b),
            _ => false,
        }
    });
}

/// Dispatch each pair to its resolution policy.
///
/// Projectile hits on intact barrels apply damage directly and raise no
/// generic collision event. Every other pair raises `Collision` and is
/// handed to both sides' contact handlers. Pairs whose members were
/// disposed earlier in the pass are skipped.
pub fn resolve_pairs(
    world: &mut World,
    pairs: &[CollisionPair],
    schedule: &mut Schedule,
    tick: u64,
) -> Vec<GameEvent> {
    let mut events = Vec::new();

    for pair in pairs {
        let (Some(a), Some(b)) = (world.get(pair.a), world.get(pair.b)) else {
            continue;
        };
        let (a, b) = (Contact::of(a), Contact::of(b));

        let barrel_hit = match (a.entity_type, b.entity_type) {
            (EntityType::Projectile, EntityType::Barrel) if b.intact_barrel => Some((a, b)),
            (EntityType::Barrel, EntityType::Projectile) if a.intact_barrel => Some((b, a)),
            _ => None,
        };
        if let Some((projectile, barrel)) = barrel_hit {
            hit_barrel(world, &projectile, &barrel, schedule, tick, &mut events);
            continue;
        }

        events.push(GameEvent::Collision { a: a.id, b: b.id });
        on_touch(world, &a, &b, &mut events);
        on_touch(world, &b, &a, &mut events);
    }

    events
}

fn hit_barrel(
    world: &mut World,
    projectile: &Contact,
    barrel: &Contact,
    schedule: &mut Schedule,
    tick: u64,
    events: &mut Vec<GameEvent>,
) {
    world.dispose(projectile.id);

    let Some(entity) = world.get_mut(barrel.id) else {
        return;
    };
    let Some(remaining) = entity.apply_damage(projectile.damage, projectile.owner) else {
        return;
    };
    events.push(GameEvent::Damaged {
        target: barrel.id,
        source: projectile.owner,
        amount: projectile.damage,
        remaining,
    });

    if remaining <= 0.0 {
        if let EntityKind::Barrel(state) = &mut entity.kind {
            if !state.detonation_pending {
                state.detonation_pending = true;
                schedule.schedule(
                    tick,
                    ScheduledAction::DetonateBarrel {
                        barrel: barrel.id,
                        source: projectile.owner,
                    },
                );
            }
        }
    }
}

/// One side's reaction to touching `other`
fn on_touch(world: &mut World, me: &Contact, other: &Contact, events: &mut Vec<GameEvent>) {
    match me.entity_type {
        EntityType::Tank => {
            let solid = matches!(
                other.entity_type,
                EntityType::Tank | EntityType::Barrel | EntityType::Obstacle
            );
            if solid {
                if let Some(tank) = world.get_mut(me.id) {
                    tank.rollback();
                }
            }
        }
        EntityType::Projectile => match other.entity_type {
            EntityType::Tank => {
                if me.owner == Some(other.id) || !me.faction.is_hostile_to(other.faction) {
                    return;
                }
                world.dispose(me.id);
                damage_tank(world, other.id, me.damage, me.owner, events);
            }
            // Intact barrels were handled before dispatch; wrecks absorb
            EntityType::Obstacle | EntityType::Barrel => {
                world.dispose(me.id);
            }
            EntityType::Projectile => {}
        },
        EntityType::Barrel | EntityType::Obstacle => {}
    }
}

/// Damage a tank, disposing it when its health runs out
pub fn damage_tank(
    world: &mut World,
    target: EntityId,
    amount: f32,
    source: Option<EntityId>,
    events: &mut Vec<GameEvent>,
) {
    let Some(remaining) = world
        .get_mut(target)
        .and_then(|e| e.apply_damage(amount, source))
    else {
        return;
    };
    events.push(GameEvent::Damaged {
        target,
        source,
        amount,
        remaining,
    });

    if remaining <= 0.0 {
        world.dispose(target);
        events.push(GameEvent::Destroyed {
            id: target,
            entity_type: EntityType::Tank,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::{barrel, projectile};
    use crate::game::entity::ProjectileState;

    fn spawn_shot(world: &mut World, owner: EntityId, faction: Faction, at: Vec3) -> EntityId {
        world.spawn(
            EntityKind::Projectile(ProjectileState {
                owner,
                velocity: Vec3::ZERO,
                damage: projectile::DAMAGE,
                lifetime: projectile::LIFETIME,
            }),
            faction,
            at,
            0.0,
            Some(projectile::HALF_EXTENTS),
        )
    }

    #[test]
    fn test_pair_key_is_unordered() {
        assert_eq!(CollisionPair::new(7, 3), CollisionPair::new(3, 7));
        assert_eq!(CollisionPair::new(7, 3).a, 3);
    }

    #[test]
    fn test_overlapping_dynamic_pair_reported_once() {
        for reversed in [false, true] {
            let mut world = World::default();
            let a = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
            let b = world.spawn_tank(Faction::Enemy, Vec3::new(1.0, 0.0, 0.0), 0.0);

            let mut entities: Vec<&Entity> = world.iter().collect();
            entities.sort_by_key(|e| e.id);
            if reversed {
                entities.reverse();
            }

            let mut bp = BroadPhase::default();
            bp.rebuild(entities);
            assert_eq!(bp.detect(), vec![CollisionPair::new(a, b)]);
        }
    }

    #[test]
    fn test_static_objects_never_initiate() {
        let mut world = World::default();
        world.spawn_obstacle(Vec3::ZERO, Vec3::splat(2.0));
        world.spawn_obstacle(Vec3::new(1.0, 0.0, 0.0), Vec3::splat(2.0));

        let mut bp = BroadPhase::default();
        bp.rebuild(world.iter());
        assert!(bp.detect().is_empty());
        assert_eq!(bp.stats().candidates_checked, 0);

        let tank = world.spawn_tank(Faction::Enemy, Vec3::new(3.0, 0.0, 0.0), 0.0);
        bp.rebuild(world.iter());
        let pairs = bp.detect();
        assert!(!pairs.is_empty());
        assert!(pairs.iter().all(|p| p.contains(tank)));
    }

    #[test]
    fn test_missing_geometry_is_skipped() {
        let mut world = World::default();
        let a = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
        world.spawn_tank(Faction::Enemy, Vec3::new(1.0, 0.0, 0.0), 0.0);
        world.get_mut(a).unwrap().half_extents = None;

        let mut bp = BroadPhase::default();
        bp.rebuild(world.iter());
        assert_eq!(bp.stats().skipped_missing_geometry, 1);
        assert!(bp.detect().is_empty());
        assert!(bp.volume(a).is_none());
    }

    #[test]
    fn test_no_contact_state_between_ticks() {
        let mut world = World::default();
        let a = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
        world.spawn_tank(Faction::Enemy, Vec3::new(1.0, 0.0, 0.0), 0.0);

        let mut bp = BroadPhase::default();
        bp.rebuild(world.iter());
        assert_eq!(bp.detect().len(), 1);

        world.get_mut(a).unwrap().position = Vec3::new(-50.0, 0.0, 0.0);
        bp.rebuild(world.iter());
        assert!(bp.detect().is_empty());
    }

    #[test]
    fn test_tank_rolls_back_on_obstacle() {
        let mut world = World::default();
        let tank = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
        world.spawn_obstacle(Vec3::new(5.0, 0.0, 0.0), Vec3::splat(2.0));
        world.get_mut(tank).unwrap().position = Vec3::new(3.0, 0.0, 0.0);

        let mut bp = BroadPhase::default();
        let mut schedule = Schedule::new();
        let events = rebuild_and_detect(&mut world, &mut bp, &mut schedule, 0);

        assert!(matches!(events[..], [GameEvent::Collision { .. }]));
        assert_eq!(world.get(tank).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn test_projectile_hits_hostile_tank() {
        let mut world = World::default();
        let shooter = world.spawn_tank(Faction::Player, Vec3::ZERO, 0.0);
        let enemy = world.spawn_tank(Faction::Enemy, Vec3::new(0.0, 0.0, 10.0), 0.0);
        let shot = spawn_shot(&mut world, shooter, Faction::Player, Vec3::new(0.0, 0.0, 9.0));

        let mut bp = BroadPhase::default();
        let mut schedule = Schedule::new();
        let events = rebuild_and_detect(&mut world, &mut bp, &mut schedule, 0);

        assert!(world.get(shot).is_none());
        assert_eq!(world.get(enemy).unwrap().health(), Some(100.0 - projectile::DAMAGE));
        assert!(events.iter().any(|e| matches!(e, GameEvent::Damaged { target, .. } if *target == enemy)));
    }

    #[test]
    fn test_projectile_ignores_friendly_and_owner() {
        let mut world = World::default();
        let owner = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
        let ally = world.spawn_tank(Faction::Enemy, Vec3::new(0.0, 0.0, 20.0), 0.0);
        let near_ally = spawn_shot(&mut world, owner, Faction::Enemy, Vec3::new(0.0, 0.0, 19.0));
        let near_owner = spawn_shot(&mut world, owner, Faction::Enemy, Vec3::new(0.0, 0.0, 1.0));

        let mut bp = BroadPhase::default();
        let mut schedule = Schedule::new();
        rebuild_and_detect(&mut world, &mut bp, &mut schedule, 0);

        assert!(world.get(near_ally).is_some());
        assert!(world.get(near_owner).is_some());
        assert_eq!(world.get(ally).unwrap().health(), Some(100.0));
        assert_eq!(world.get(owner).unwrap().health(), Some(100.0));
    }

    #[test]
    fn test_projectile_on_barrel_suppresses_generic_event() {
        let mut world = World::default();
        let shooter = world.spawn_tank(Faction::Player, Vec3::new(-50.0, 0.0, 0.0), 0.0);
        let b = world.spawn_barrel(Vec3::ZERO);
        let shot = spawn_shot(&mut world, shooter, Faction::Player, Vec3::new(0.5, 0.0, 0.0));

        let mut bp = BroadPhase::default();
        let mut schedule = Schedule::new();
        let events = rebuild_and_detect(&mut world, &mut bp, &mut schedule, 4);

        assert!(world.get(shot).is_none());
        assert!(!events.iter().any(|e| matches!(e, GameEvent::Collision { .. })));
        assert_eq!(
            world.get(b).unwrap().health(),
            Some(barrel::MAX_HEALTH - projectile::DAMAGE)
        );
        assert!(schedule.is_empty());

        // Second hit empties the barrel and queues a detonation this tick
        spawn_shot(&mut world, shooter, Faction::Player, Vec3::new(0.5, 0.0, 0.0));
        rebuild_and_detect(&mut world, &mut bp, &mut schedule, 5);
        assert_eq!(
            schedule.pop_due(5),
            vec![ScheduledAction::DetonateBarrel { barrel: b, source: Some(shooter) }]
        );
    }

    #[test]
    fn test_wreck_absorbs_projectile() {
        let mut world = World::default();
        let shooter = world.spawn_tank(Faction::Player, Vec3::new(-50.0, 0.0, 0.0), 0.0);
        let b = world.spawn_barrel(Vec3::ZERO);
        world.get_mut(b).unwrap().explode();
        let shot = spawn_shot(&mut world, shooter, Faction::Player, Vec3::new(0.5, 0.0, 0.0));

        let mut bp = BroadPhase::default();
        let mut schedule = Schedule::new();
        let events = rebuild_and_detect(&mut world, &mut bp, &mut schedule, 0);

        assert!(world.get(shot).is_none());
        assert!(events.iter().any(|e| matches!(e, GameEvent::Collision { .. })));
    }

    #[test]
    fn test_obstacles_near_excludes_self_and_projectiles() {
        let mut world = World::default();
        let me = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
        world.spawn_obstacle(Vec3::new(6.0, 0.0, 0.0), Vec3::ONE);
        world.spawn_obstacle(Vec3::new(60.0, 0.0, 0.0), Vec3::ONE);
        spawn_shot(&mut world, 99, Faction::Player, Vec3::new(0.0, 0.0, 4.0));

        let mut bp = BroadPhase::default();
        bp.rebuild(world.iter());
        let near = bp.obstacles_near(Vec3::ZERO, 10.0, me);
        assert_eq!(near.len(), 1);
        assert!(near[0].contains_point(Vec3::new(6.0, 0.0, 0.0)));
    }

    #[test]
    fn test_retain_touching_drops_separated_pairs() {
        let mut world = World::default();
        let a = world.spawn_tank(Faction::Enemy, Vec3::ZERO, 0.0);
        let b = world.spawn_tank(Faction::Enemy, Vec3::new(1.0, 0.0, 0.0), 0.0);
        let c = world.spawn_tank(Faction::Enemy, Vec3::new(80.0, 0.0, 0.0), 0.0);

        let mut pairs = vec![CollisionPair::new(a, b), CollisionPair::new(a, c), CollisionPair::new(b, 1000)];
        retain_touching(&world, &mut pairs);
        assert_eq!(pairs, vec![CollisionPair::new(a, b)]);
    }
}
