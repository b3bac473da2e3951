//! Entity definitions
//!
//! Every arena object is an [`Entity`]; what it can do (move, shoot, take
//! damage, explode) is decided by its [`EntityKind`].

use serde::{Deserialize, Serialize};

use crate::game::constants::{barrel, hitbox, projectile, tank};
use crate::game::spatial::Aabb;
use crate::util::vec3::Vec3;

/// Stable entity identifier, never reused while the world lives
pub type EntityId = u64;

/// Side an entity fights for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    Player,
    Enemy,
    Neutral,
}

impl Faction {
    /// Player and Enemy are hostile to each other; Neutral to nobody
    pub fn is_hostile_to(self, other: Faction) -> bool {
        matches!(
            (self, other),
            (Faction::Player, Faction::Enemy) | (Faction::Enemy, Faction::Player)
        )
    }
}

/// Flat entity category, used for hitbox scales and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Tank,
    Projectile,
    Barrel,
    Obstacle,
}

/// Movement/combat actuation applied to an entity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Actuation {
    MoveForward(f32),
    MoveBackward(f32),
    RotateLeft(f32),
    RotateRight(f32),
    /// Start firing on an interval (seconds), clamped to the weapon cooldown
    StartAutoFire(f32),
    StopAutoFire,
    /// Fire a single shot as soon as the weapon is ready
    FireOnce,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TankState {
    pub health: f32,
    pub max_health: f32,
    pub last_valid_position: Vec3,
    pub last_valid_rotation: f32,
    /// Active auto-fire interval in seconds
    pub auto_fire: Option<f32>,
    /// Time until the weapon may fire again
    pub fire_timer: f32,
    pub shot_requested: bool,
}

impl TankState {
    pub fn new(position: Vec3, rotation: f32) -> Self {
        Self {
            health: tank::MAX_HEALTH,
            max_health: tank::MAX_HEALTH,
            last_valid_position: position,
            last_valid_rotation: rotation,
            auto_fire: None,
            fire_timer: 0.0,
            shot_requested: false,
        }
    }

    /// Consume the pending trigger if the weapon is ready
    pub fn take_shot(&mut self) -> bool {
        if self.fire_timer > 0.0 || (self.auto_fire.is_none() && !self.shot_requested) {
            return false;
        }
        self.shot_requested = false;
        self.fire_timer = self.auto_fire.unwrap_or(tank::FIRE_COOLDOWN);
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileState {
    pub owner: EntityId,
    pub velocity: Vec3,
    pub damage: f32,
    pub lifetime: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarrelState {
    pub health: f32,
    pub exploded: bool,
    /// A detonation is already scheduled
    pub detonation_pending: bool,
}

impl Default for BarrelState {
    fn default() -> Self {
        Self {
            health: barrel::MAX_HEALTH,
            exploded: false,
            detonation_pending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Tank(TankState),
    Projectile(ProjectileState),
    Barrel(BarrelState),
    Obstacle,
}

/// Arena entity
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub faction: Faction,
    pub position: Vec3,
    /// Heading around the y axis in radians (0 faces +z)
    pub rotation: f32,
    /// Raw geometric half extents; `None` until geometry is available
    pub half_extents: Option<Vec3>,
    pub is_static: bool,
    pub disposed: bool,
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self.kind {
            EntityKind::Tank(_) => EntityType::Tank,
            EntityKind::Projectile(_) => EntityType::Projectile,
            EntityKind::Barrel(_) => EntityType::Barrel,
            EntityKind::Obstacle => EntityType::Obstacle,
        }
    }

    /// Anisotropic scale applied to raw bounds before indexing
    pub fn hitbox_scale(&self) -> Vec3 {
        match &self.kind {
            EntityKind::Tank(_) => hitbox::TANK,
            EntityKind::Projectile(_) => hitbox::PROJECTILE,
            EntityKind::Barrel(b) if b.exploded => hitbox::BARREL_WRECK,
            EntityKind::Barrel(_) => hitbox::BARREL,
            EntityKind::Obstacle => hitbox::OBSTACLE,
        }
    }

    /// World-space hitbox for the current position and heading.
    ///
    /// The scaled hull is rotated by the heading and re-boxed, so a tank
    /// turned sideways gets a sideways box.
    pub fn bounding_volume(&self) -> Option<Aabb> {
        let half = self.half_extents?.scale(self.hitbox_scale());
        let (sin, cos) = (self.rotation.sin().abs(), self.rotation.cos().abs());
        let rotated = Vec3::new(cos * half.x + sin * half.z, half.y, sin * half.x + cos * half.z);
        Some(Aabb::from_center_half_extents(self.position, rotated))
    }

    /// Facing direction on the floor plane
    #[inline]
    pub fn forward(&self) -> Vec3 {
        Vec3::from_heading(self.rotation)
    }

    pub fn health(&self) -> Option<f32> {
        match &self.kind {
            EntityKind::Tank(t) => Some(t.health),
            EntityKind::Barrel(b) => Some(b.health),
            _ => None,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.disposed && self.health().map_or(true, |h| h > 0.0)
    }

    pub fn as_tank(&self) -> Option<&TankState> {
        match &self.kind {
            EntityKind::Tank(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tank_mut(&mut self) -> Option<&mut TankState> {
        match &mut self.kind {
            EntityKind::Tank(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_intact_barrel(&self) -> bool {
        matches!(&self.kind, EntityKind::Barrel(b) if !b.exploded && b.health > 0.0)
    }

    /// Apply damage and return the remaining health.
    ///
    /// Entities without health (projectiles, obstacles) return `None`.
    pub fn apply_damage(&mut self, amount: f32, _source: Option<EntityId>) -> Option<f32> {
        match &mut self.kind {
            EntityKind::Tank(t) => {
                t.health = (t.health - amount).max(0.0);
                Some(t.health)
            }
            EntityKind::Barrel(b) if !b.exploded => {
                b.health = (b.health - amount).max(0.0);
                Some(b.health)
            }
            _ => None,
        }
    }

    pub fn move_forward(&mut self, distance: f32) {
        if self.is_static {
            return;
        }
        self.position += self.forward() * distance;
    }

    pub fn move_backward(&mut self, distance: f32) {
        self.move_forward(-distance);
    }

    pub fn rotate_left(&mut self, angle: f32) {
        if self.is_static {
            return;
        }
        self.rotation = crate::util::vec3::normalize_angle(self.rotation + angle);
    }

    pub fn rotate_right(&mut self, angle: f32) {
        self.rotate_left(-angle);
    }

    pub fn start_auto_fire(&mut self, interval: f32) {
        if let Some(t) = self.as_tank_mut() {
            t.auto_fire = Some(interval.max(tank::FIRE_COOLDOWN));
        }
    }

    pub fn stop_auto_fire(&mut self) {
        if let Some(t) = self.as_tank_mut() {
            t.auto_fire = None;
        }
    }

    pub fn fire_once(&mut self) {
        if let Some(t) = self.as_tank_mut() {
            t.shot_requested = true;
        }
    }

    pub fn apply_actuation(&mut self, actuation: Actuation) {
        match actuation {
            Actuation::MoveForward(d) => self.move_forward(d),
            Actuation::MoveBackward(d) => self.move_backward(d),
            Actuation::RotateLeft(a) => self.rotate_left(a),
            Actuation::RotateRight(a) => self.rotate_right(a),
            Actuation::StartAutoFire(interval) => self.start_auto_fire(interval),
            Actuation::StopAutoFire => self.stop_auto_fire(),
            Actuation::FireOnce => self.fire_once(),
        }
    }

    /// Revert to the pose recorded after the last collision pass
    pub fn rollback(&mut self) {
        if let EntityKind::Tank(t) = &self.kind {
            self.position = t.last_valid_position;
            self.rotation = t.last_valid_rotation;
        }
    }

    /// Record the current pose as valid
    pub fn commit_pose(&mut self) {
        let (position, rotation) = (self.position, self.rotation);
        self.commit_pose_at(position, rotation);
    }

    /// Record an earlier, already checked pose as valid
    pub fn commit_pose_at(&mut self, position: Vec3, rotation: f32) {
        if let Some(t) = self.as_tank_mut() {
            t.last_valid_position = position;
            t.last_valid_rotation = rotation;
        }
    }

    /// Turn an intact barrel into a static wreck
    pub fn explode(&mut self) -> bool {
        match &mut self.kind {
            EntityKind::Barrel(b) if !b.exploded => {
                b.exploded = true;
                b.health = 0.0;
                b.detonation_pending = false;
                self.is_static = true;
                true
            }
            _ => false,
        }
    }
}

/// Projectile state for a shot fired by `owner`
pub fn projectile_for(owner: &Entity) -> (Vec3, ProjectileState) {
    let forward = owner.forward();
    let position = owner.position + forward * tank::MUZZLE_OFFSET;
    (
        position,
        ProjectileState {
            owner: owner.id,
            velocity: forward * projectile::SPEED,
            damage: projectile::DAMAGE,
            lifetime: projectile::LIFETIME,
        },
    )
}
