//! Messages exchanged with the background workers
//!
//! Workers share no memory with the tick loop. Every request is encoded to
//! a bincode frame, and every snapshot carries the tick sequence number it
//! was taken at so late responses can be recognised and dropped.

use serde::{Deserialize, Serialize};

use crate::game::entity::{Actuation, Entity, EntityId, EntityType, Faction};
use crate::game::spatial::Aabb;
use crate::game::systems::ai::ModeTransition;
use crate::game::systems::collision::{Collidable, CollisionPair};
use crate::game::world::World;
use crate::util::vec3::Vec3;

/// Lightweight copy of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub faction: Faction,
    pub position: Vec3,
    pub rotation: f32,
    /// Scaled hitbox at snapshot time
    pub bounds: Option<Aabb>,
    pub health: Option<f32>,
    pub is_static: bool,
}

impl ObjectSnapshot {
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            entity_type: entity.entity_type(),
            faction: entity.faction,
            position: entity.position,
            rotation: entity.rotation,
            bounds: entity.bounding_volume(),
            health: entity.health(),
            is_static: entity.is_static,
        }
    }
}

impl Collidable for ObjectSnapshot {
    fn collision_id(&self) -> EntityId {
        self.id
    }

    fn bounding_volume(&self) -> Option<Aabb> {
        self.bounds
    }

    fn is_static(&self) -> bool {
        self.is_static
    }

    // Snapshots only ever contain live entities
    fn is_disposed(&self) -> bool {
        false
    }

    fn entity_type(&self) -> EntityType {
        self.entity_type
    }
}

/// Spatial index parameters sent once at startup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldInit {
    pub world_boundary: Aabb,
    pub max_objects_per_node: u32,
    pub max_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AiRequest {
    Init(WorldInit),
    /// Snapshot for one decision round. Only the tanks listed in `agents`
    /// are driven, each toward `player_tank`; the rest of `tanks` are
    /// there to be seen and avoided.
    Update {
        sequence: u64,
        /// Simulated time since the previous update
        dt: f32,
        /// Registered agent ids, sorted
        agents: Vec<EntityId>,
        tanks: Vec<ObjectSnapshot>,
        obstacles: Vec<ObjectSnapshot>,
        barrels: Vec<ObjectSnapshot>,
        player_tank: Option<ObjectSnapshot>,
    },
    Shutdown,
}

impl AiRequest {
    /// Build an update from the live world for the given agents
    pub fn update_from_world(
        world: &World,
        sequence: u64,
        dt: f32,
        player: Option<EntityId>,
        agents: &[EntityId],
    ) -> Self {
        let mut tanks = Vec::new();
        let mut obstacles = Vec::new();
        let mut barrels = Vec::new();
        let mut player_tank = None;

        for entity in world.iter() {
            let snapshot = ObjectSnapshot::from_entity(entity);
            match entity.entity_type() {
                EntityType::Tank if Some(entity.id) == player => player_tank = Some(snapshot),
                EntityType::Tank => tanks.push(snapshot),
                EntityType::Obstacle => obstacles.push(snapshot),
                EntityType::Barrel => barrels.push(snapshot),
                EntityType::Projectile => {}
            }
        }
        tanks.sort_unstable_by_key(|s| s.id);
        let mut agents: Vec<EntityId> = agents
            .iter()
            .copied()
            .filter(|id| tanks.binary_search_by_key(id, |s| s.id).is_ok())
            .collect();
        agents.sort_unstable();

        AiRequest::Update {
            sequence,
            dt,
            agents,
            tanks,
            obstacles,
            barrels,
            player_tank,
        }
    }
}

/// One actuation for one tank
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankCommand {
    pub tank_id: EntityId,
    pub action: Actuation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AiResponse {
    Commands {
        sequence: u64,
        commands: Vec<TankCommand>,
        transitions: Vec<ModeTransition>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollisionRequest {
    Init(WorldInit),
    /// Replace both the static and the dynamic object sets
    FullUpdate {
        sequence: u64,
        static_objects: Vec<ObjectSnapshot>,
        dynamic_objects: Vec<ObjectSnapshot>,
    },
    /// Replace only the dynamic set; static objects are kept
    DynamicUpdate {
        sequence: u64,
        dynamic_objects: Vec<ObjectSnapshot>,
    },
    /// Move an object from dynamic to static bookkeeping
    ObjectBecameStatic { object: ObjectSnapshot },
    Shutdown,
}

impl CollisionRequest {
    pub fn full_from_world(world: &World, sequence: u64) -> Self {
        let (static_objects, dynamic_objects): (Vec<_>, Vec<_>) = world
            .iter()
            .map(ObjectSnapshot::from_entity)
            .partition(|s| s.is_static);
        CollisionRequest::FullUpdate {
            sequence,
            static_objects,
            dynamic_objects,
        }
    }

    pub fn dynamic_from_world(world: &World, sequence: u64) -> Self {
        CollisionRequest::DynamicUpdate {
            sequence,
            dynamic_objects: world
                .iter()
                .filter(|e| !e.is_static)
                .map(ObjectSnapshot::from_entity)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollisionResponse {
    Collisions { sequence: u64, pairs: Vec<CollisionPair> },
}

/// Responses tagged with the snapshot sequence they answer
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

impl Sequenced for AiResponse {
    fn sequence(&self) -> u64 {
        match self {
            AiResponse::Commands { sequence, .. } => *sequence,
        }
    }
}

impl Sequenced for CollisionResponse {
    fn sequence(&self) -> u64 {
        match self {
            CollisionResponse::Collisions { sequence, .. } => *sequence,
        }
    }
}

/// Encode a message using bincode
#[inline]
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a message using bincode
#[inline]
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}
