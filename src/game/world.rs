//! Entity registry
//!
//! The world owns every entity's lifetime. Spatial structures and agent
//! controllers only hold ids and look entities up here.

use hashbrown::HashMap;
use rand::Rng;
use tracing::{debug, warn};

use crate::game::constants::{barrel, tank, world as world_consts};
use crate::game::entity::{
    projectile_for, Actuation, BarrelState, Entity, EntityId, EntityKind, EntityType, Faction,
    TankState,
};
use crate::game::spatial::Aabb;
use crate::util::vec3::Vec3;

pub struct World {
    entities: HashMap<EntityId, Entity>,
    next_entity_id: EntityId,
    boundary: Aabb,
}

impl World {
    pub fn new(boundary: Aabb) -> Self {
        Self {
            entities: HashMap::with_capacity(256),
            next_entity_id: 1,
            boundary,
        }
    }

    pub fn boundary(&self) -> Aabb {
        self.boundary
    }

    fn alloc_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Add an entity built from its parts and return its new id
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        faction: Faction,
        position: Vec3,
        rotation: f32,
        half_extents: Option<Vec3>,
    ) -> EntityId {
        let id = self.alloc_id();
        let is_static = matches!(kind, EntityKind::Obstacle);
        self.entities.insert(
            id,
            Entity {
                id,
                kind,
                faction,
                position,
                rotation,
                half_extents,
                is_static,
                disposed: false,
            },
        );
        id
    }

    pub fn spawn_tank(&mut self, faction: Faction, position: Vec3, rotation: f32) -> EntityId {
        self.spawn(
            EntityKind::Tank(TankState::new(position, rotation)),
            faction,
            position,
            rotation,
            Some(tank::HALF_EXTENTS),
        )
    }

    pub fn spawn_barrel(&mut self, position: Vec3) -> EntityId {
        self.spawn(
            EntityKind::Barrel(BarrelState::default()),
            Faction::Neutral,
            position,
            0.0,
            Some(barrel::HALF_EXTENTS),
        )
    }

    pub fn spawn_obstacle(&mut self, position: Vec3, half_extents: Vec3) -> EntityId {
        self.spawn(EntityKind::Obstacle, Faction::Neutral, position, 0.0, Some(half_extents))
    }

    /// Fire a projectile from a live tank's muzzle
    pub fn spawn_projectile(&mut self, owner_id: EntityId) -> Option<EntityId> {
        let owner = self.get(owner_id)?;
        if owner.as_tank().is_none() {
            return None;
        }
        let faction = owner.faction;
        let rotation = owner.rotation;
        let (position, state) = projectile_for(owner);
        Some(self.spawn(
            EntityKind::Projectile(state),
            faction,
            position,
            rotation,
            Some(crate::game::constants::projectile::HALF_EXTENTS),
        ))
    }

    /// Live (non-disposed) entity by id
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id).filter(|e| !e.disposed)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id).filter(|e| !e.disposed)
    }

    /// All live entities
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| !e.disposed)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut().filter(|e| !e.disposed)
    }

    /// Raw map access for parallel passes; callers must skip disposed entries
    pub(crate) fn entities_mut(&mut self) -> &mut HashMap<EntityId, Entity> {
        &mut self.entities
    }

    pub fn tanks(&self) -> impl Iterator<Item = &Entity> {
        self.iter().filter(|e| e.entity_type() == EntityType::Tank)
    }

    pub fn count_of(&self, entity_type: EntityType) -> usize {
        self.iter().filter(|e| e.entity_type() == entity_type).count()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark an entity disposed; it is excluded from every lookup immediately
    pub fn dispose(&mut self, id: EntityId) -> bool {
        match self.entities.get_mut(&id) {
            Some(e) if !e.disposed => {
                e.disposed = true;
                true
            }
            _ => false,
        }
    }

    /// Drop disposed entities from the registry, returning their ids
    pub fn purge_disposed(&mut self) -> Vec<EntityId> {
        let mut purged = Vec::new();
        self.entities.retain(|&id, e| {
            if e.disposed {
                purged.push(id);
                false
            } else {
                true
            }
        });
        purged.sort_unstable();
        purged
    }

    /// Apply one actuation, keeping the entity inside the world.
    ///
    /// Returns false when the target is gone (stale command).
    pub fn apply_actuation(&mut self, id: EntityId, actuation: Actuation) -> bool {
        let boundary = self.boundary;
        match self.get_mut(id) {
            Some(entity) => {
                entity.apply_actuation(actuation);
                entity.position = boundary.clamp_point(entity.position);
                true
            }
            None => {
                debug!("Dropping {:?} for stale entity {}", actuation, id);
                false
            }
        }
    }

    /// Record every tank's current pose as its rollback point
    pub fn commit_valid_poses(&mut self) {
        for entity in self.iter_mut() {
            entity.commit_pose();
        }
    }

    /// Random floor position (y = 0) where a box of `half_extents`
    /// overlaps nothing.
    ///
    /// Gives up after a bounded number of attempts.
    pub fn find_spawn_position<R: Rng>(&self, rng: &mut R, half_extents: Vec3) -> Option<Vec3> {
        let area = self.boundary.shrink(world_consts::EDGE_MARGIN + half_extents.x.max(half_extents.z));
        for _ in 0..world_consts::MAX_SPAWN_ATTEMPTS {
            let candidate = Vec3::new(
                rng.gen_range(area.min.x..=area.max.x),
                0.0,
                rng.gen_range(area.min.z..=area.max.z),
            );
            let footprint = Aabb::from_center_half_extents(candidate, half_extents);
            let blocked = self
                .iter()
                .filter_map(|e| e.bounding_volume())
                .any(|b| b.intersects(&footprint));
            if !blocked {
                return Some(candidate);
            }
        }

        warn!(
            "No free spawn position after {} attempts",
            world_consts::MAX_SPAWN_ATTEMPTS
        );
        None
    }
}

impl Default for World {
    fn default() -> Self {
        let half = Vec3::new(
            world_consts::HALF_EXTENT,
            world_consts::HALF_HEIGHT,
            world_consts::HALF_EXTENT,
        );
        Self::new(Aabb::new(-half, half))
    }
}
