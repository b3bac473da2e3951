use std::str::FromStr;

use crate::game::constants::{ai, octree, sim, world};

/// Simulation configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Ticks per second
    pub tick_rate: u32,
    /// Half extent of the square arena floor
    pub world_half_extent: f32,
    /// Objects a spatial index leaf holds before subdividing
    pub octree_max_objects: usize,
    /// Maximum spatial index depth
    pub octree_max_depth: u32,
    /// AI tanks placed at startup
    pub bot_count: usize,
    pub obstacle_count: usize,
    pub barrel_count: usize,
    /// Run the agent FSM on the AI worker thread
    pub ai_offload: bool,
    /// Run the broad phase on the collision worker thread
    pub collision_offload: bool,
    /// Ticks between AI snapshots when the AI is offloaded
    pub ai_snapshot_interval_ticks: u32,
    /// Seed for arena layout and agent randomness
    pub seed: u64,
    /// Stop after this many seconds; run until Ctrl+C when unset
    pub duration_secs: Option<u64>,
    /// Port for the metrics endpoint
    pub metrics_port: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: sim::TICK_RATE,
            world_half_extent: world::HALF_EXTENT,
            octree_max_objects: octree::MAX_OBJECTS_PER_NODE,
            octree_max_depth: octree::MAX_DEPTH,
            bot_count: ai::COUNT,
            obstacle_count: 24,
            barrel_count: 12,
            ai_offload: false,
            collision_offload: false,
            ai_snapshot_interval_ticks: 3,
            seed: 0x5EED,
            duration_secs: None,
            metrics_port: 9090,
        }
    }
}

/// Configuration rejected by [`SimConfig::validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick_rate must be 1-1000, got {0}")]
    TickRate(u32),
    #[error("world_half_extent must be at least {min}, got {got}")]
    WorldTooSmall { min: f32, got: f32 },
    #[error("octree_max_objects must be at least 1")]
    OctreeCapacity,
    #[error("octree_max_depth must be 0-16, got {0}")]
    OctreeDepth(u32),
    #[error("ai_snapshot_interval_ticks must be at least 1")]
    SnapshotInterval,
    #[error("metrics_port cannot be 0")]
    MetricsPort,
}

impl SimConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load config through an arbitrary variable lookup
    pub fn load_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        read_var(&lookup, "TICK_RATE", &mut config.tick_rate, |v| (1..=1000).contains(v), "1-1000");
        read_var(
            &lookup,
            "WORLD_HALF_EXTENT",
            &mut config.world_half_extent,
            |v| v.is_finite() && *v >= MIN_HALF_EXTENT,
            "a finite value >= 50",
        );
        read_var(&lookup, "OCTREE_MAX_OBJECTS", &mut config.octree_max_objects, |v| *v > 0, "> 0");
        read_var(&lookup, "OCTREE_MAX_DEPTH", &mut config.octree_max_depth, |v| *v <= MAX_OCTREE_DEPTH, "0-16");
        read_var(&lookup, "BOT_COUNT", &mut config.bot_count, |v| *v <= 500, "0-500");
        read_var(&lookup, "OBSTACLE_COUNT", &mut config.obstacle_count, |v| *v <= 2000, "0-2000");
        read_var(&lookup, "BARREL_COUNT", &mut config.barrel_count, |v| *v <= 2000, "0-2000");
        read_var(&lookup, "AI_OFFLOAD", &mut config.ai_offload, |_| true, "true/false");
        read_var(&lookup, "COLLISION_OFFLOAD", &mut config.collision_offload, |_| true, "true/false");
        read_var(
            &lookup,
            "AI_SNAPSHOT_INTERVAL_TICKS",
            &mut config.ai_snapshot_interval_ticks,
            |v| (1..=600).contains(v),
            "1-600",
        );
        read_var(&lookup, "SIM_SEED", &mut config.seed, |_| true, "a u64");
        read_var(&lookup, "METRICS_PORT", &mut config.metrics_port, |v| *v > 0, "> 0");

        let mut duration = 0u64;
        read_var(&lookup, "SIM_DURATION_SECS", &mut duration, |_| true, "a number of seconds");
        if duration > 0 {
            config.duration_secs = Some(duration);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.tick_rate) {
            return Err(ConfigError::TickRate(self.tick_rate));
        }
        if !self.world_half_extent.is_finite() || self.world_half_extent < MIN_HALF_EXTENT {
            return Err(ConfigError::WorldTooSmall {
                min: MIN_HALF_EXTENT,
                got: self.world_half_extent,
            });
        }
        if self.octree_max_objects == 0 {
            return Err(ConfigError::OctreeCapacity);
        }
        if self.octree_max_depth > MAX_OCTREE_DEPTH {
            return Err(ConfigError::OctreeDepth(self.octree_max_depth));
        }
        if self.ai_snapshot_interval_ticks == 0 {
            return Err(ConfigError::SnapshotInterval);
        }
        if self.metrics_port == 0 {
            return Err(ConfigError::MetricsPort);
        }
        Ok(())
    }

    /// Seconds per tick
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }
}

const MIN_HALF_EXTENT: f32 = 50.0;
const MAX_OCTREE_DEPTH: u32 = 16;

/// Overwrite `slot` with a parsed, accepted value; warn and keep the
/// default otherwise.
fn read_var<F, T>(lookup: &F, key: &str, slot: &mut T, accept: fn(&T) -> bool, rule: &str)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) if accept(&parsed) => *slot = parsed,
        Ok(_) => tracing::warn!("{} must be {}, using default", key, rule),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}
