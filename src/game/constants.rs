/// Simulation timing
pub mod sim {
    /// Simulation tick rate in Hz
    pub const TICK_RATE: u32 = 60;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 60.0;
}

/// World boundary constants
pub mod world {
    /// Half extent of the square arena floor (world units)
    pub const HALF_EXTENT: f32 = 200.0;
    /// Height of the playable volume above and below the floor
    pub const HALF_HEIGHT: f32 = 50.0;
    /// Margin kept between generated waypoints/spawns and the world edge
    pub const EDGE_MARGIN: f32 = 5.0;
    /// Maximum attempts to find a non-overlapping spawn position
    pub const MAX_SPAWN_ATTEMPTS: u32 = 30;
}

/// Spatial index constants
pub mod octree {
    /// Objects a leaf may hold before it subdivides
    pub const MAX_OBJECTS_PER_NODE: usize = 8;
    /// Maximum subdivision depth (root is depth 0)
    pub const MAX_DEPTH: u32 = 6;
}

/// Hitbox scale factors applied to raw geometric half extents.
///
/// Scales are anisotropic: tank hulls are trimmed on x/z so barrels and
/// tracks don't snag, barrels are slimmed so shots must hit the body.
pub mod hitbox {
    use crate::util::vec3::Vec3;

    pub const TANK: Vec3 = Vec3::new(0.8, 1.0, 0.9);
    pub const PROJECTILE: Vec3 = Vec3::new(1.0, 1.0, 1.0);
    pub const BARREL: Vec3 = Vec3::new(0.7, 1.0, 0.7);
    pub const BARREL_WRECK: Vec3 = Vec3::new(0.7, 0.4, 0.7);
    pub const OBSTACLE: Vec3 = Vec3::new(0.95, 1.0, 0.95);
}

/// Tank constants
pub mod tank {
    use crate::util::vec3::Vec3;

    /// Raw geometric half extents of a tank model
    pub const HALF_EXTENTS: Vec3 = Vec3::new(1.5, 1.0, 2.2);
    /// Starting/maximum health
    pub const MAX_HEALTH: f32 = 100.0;
    /// Forward speed in units per second
    pub const SPEED: f32 = 10.0;
    /// Maximum turn rate in radians per second
    pub const TURN_RATE: f32 = 2.5;
    /// Raw weapon cooldown in seconds
    pub const FIRE_COOLDOWN: f32 = 0.5;
    /// Distance in front of the hull where projectiles spawn
    pub const MUZZLE_OFFSET: f32 = 3.0;
}

/// Projectile constants
pub mod projectile {
    use crate::util::vec3::Vec3;

    pub const HALF_EXTENTS: Vec3 = Vec3::new(0.2, 0.2, 0.2);
    /// Flight speed in units per second
    pub const SPEED: f32 = 60.0;
    /// Lifetime in seconds
    pub const LIFETIME: f32 = 3.0;
    /// Damage dealt on hit
    pub const DAMAGE: f32 = 20.0;
}

/// Explosive barrel constants
pub mod barrel {
    use crate::util::vec3::Vec3;

    pub const HALF_EXTENTS: Vec3 = Vec3::new(1.0, 1.5, 1.0);
    pub const MAX_HEALTH: f32 = 30.0;
    /// Blast radius (floor-plane distance)
    pub const BLAST_RADIUS: f32 = 12.0;
    /// Damage at the blast center, falls off linearly to zero at the radius
    pub const BLAST_DAMAGE: f32 = 60.0;
    /// Ticks between a barrel being destroyed by a blast and its own detonation
    pub const CHAIN_DELAY_TICKS: u64 = 9;
}

/// Static obstacle constants
pub mod obstacle {
    use crate::util::vec3::Vec3;

    pub const MIN_HALF_EXTENTS: Vec3 = Vec3::new(1.5, 2.0, 1.5);
    pub const MAX_HALF_EXTENTS: Vec3 = Vec3::new(5.0, 4.0, 5.0);
}

/// AI agent constants
pub mod ai {
    /// Number of AI tanks placed in the arena
    pub const COUNT: usize = 6;
    /// Time between FSM re-evaluations in seconds
    pub const DECISION_INTERVAL: f32 = 0.3;
    /// Minimum time in a state before a distance-driven transition
    pub const MIN_STATE_DWELL: f32 = 0.25;
    /// Target detection range
    pub const DETECTION_RANGE: f32 = 80.0;
    /// Range at which agents engage
    pub const ATTACK_RANGE: f32 = 40.0;
    /// Preferred engagement distance while attacking
    pub const OPTIMAL_DISTANCE: f32 = 25.0;
    /// Beyond this multiple of the optimal distance the agent closes in
    pub const CLOSE_GAP_FACTOR: f32 = 1.3;
    /// Below this multiple of the optimal distance the agent backs off
    pub const BACK_OFF_FACTOR: f32 = 0.7;
    /// Auto-fire interval, deliberately slower than the raw weapon cooldown
    pub const FIRE_INTERVAL: f32 = 1.5;
    /// Cooldown between tactical single shots
    pub const SHOT_COOLDOWN: f32 = 2.0;

    /// Patrol ring around the agent
    pub const PATROL_MIN_RADIUS: f32 = 15.0;
    pub const PATROL_MAX_RADIUS: f32 = 45.0;
    /// Seconds before a patrol waypoint is replaced
    pub const PATROL_REGEN_INTERVAL: f32 = 8.0;
    /// Distance at which a patrol waypoint counts as reached
    pub const ARRIVAL_DISTANCE: f32 = 4.0;
    /// Attempts at a waypoint that survives boundary clamping
    pub const MAX_PATROL_ATTEMPTS: u32 = 10;

    /// Speed multipliers per state
    pub const PATROL_SPEED: f32 = 0.6;
    pub const HUNT_SPEED: f32 = 1.0;
    pub const ATTACK_SPEED: f32 = 0.7;
    pub const PANIC_REVERSE_SPEED: f32 = 0.5;

    /// Obstacle avoidance
    pub const MIN_CLEARANCE: f32 = 10.0;
    pub const PANIC_DISTANCE: f32 = 3.0;
    /// Repulsion magnitudes at or below this are ignored
    pub const REPULSION_EPSILON: f32 = 0.01;
    /// Weight of the repulsion direction when blended with the goal direction
    pub const AVOIDANCE_WEIGHT: f32 = 1.5;
    /// How far ahead along the blended heading the steering point is placed
    pub const STEERING_LOOKAHEAD: f32 = 10.0;
    /// Free space required behind the hull before backing off
    pub const REAR_CLEARANCE: f32 = 2.0;

    /// Facing tolerances (radians)
    pub const TURN_TOLERANCE: f32 = 0.1;
    pub const AIM_TOLERANCE: f32 = 0.02;
    /// Forward/goal alignment (dot product) required before moving
    pub const ALIGN_DOT: f32 = 0.7;

    /// Barrel must be this close to the target to be worth shooting
    pub const BARREL_TARGET_RADIUS: f32 = 10.0;
}
