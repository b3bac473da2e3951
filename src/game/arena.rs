//! Arena population
//!
//! Places the player at the origin, then obstacles, barrels and bots at
//! random free spots. Layout is fully determined by the seed.

use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::config::SimConfig;
use crate::game::constants::{barrel, obstacle, tank};
use crate::game::entity::{EntityId, Faction};
use crate::game::game_loop::GameLoop;
use crate::util::vec3::Vec3;

/// Ids of everything placed
#[derive(Debug, Clone, Default)]
pub struct ArenaLayout {
    pub player: EntityId,
    pub bots: Vec<EntityId>,
    pub obstacles: Vec<EntityId>,
    pub barrels: Vec<EntityId>,
}

/// Fill an empty arena and hand the bots to the agent controller
pub fn populate(game: &mut GameLoop, config: &SimConfig) -> ArenaLayout {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let player = game.world_mut().spawn_tank(Faction::Player, Vec3::ZERO, 0.0);
    let mut layout = ArenaLayout {
        player,
        ..ArenaLayout::default()
    };

    for _ in 0..config.obstacle_count {
        let half_extents = random_half_extents(&mut rng);
        let Some(position) = game.world().find_spawn_position(&mut rng, half_extents) else {
            continue;
        };
        layout.obstacles.push(game.world_mut().spawn_obstacle(position, half_extents));
    }

    for _ in 0..config.barrel_count {
        let Some(position) = game.world().find_spawn_position(&mut rng, barrel::HALF_EXTENTS) else {
            continue;
        };
        layout.barrels.push(game.world_mut().spawn_barrel(position));
    }

    // Bots spawn at any heading, so reserve the hull's full turning footprint
    let reach = tank::HALF_EXTENTS.x.hypot(tank::HALF_EXTENTS.z);
    let bot_footprint = Vec3::new(reach, tank::HALF_EXTENTS.y, reach);
    for _ in 0..config.bot_count {
        let Some(position) = game.world().find_spawn_position(&mut rng, bot_footprint) else {
            continue;
        };
        let heading = rng.gen_range(0.0..TAU);
        layout
            .bots
            .push(game.world_mut().spawn_tank(Faction::Enemy, position, heading));
    }

    game.set_player(player);
    for &bot in &layout.bots {
        game.add_agent(bot);
    }

    let placed = layout.obstacles.len() + layout.barrels.len() + layout.bots.len();
    let wanted = config.obstacle_count + config.barrel_count + config.bot_count;
    if placed < wanted {
        warn!("Arena too crowded: placed {} of {} objects", placed, wanted);
    }
    info!(
        "Arena ready: {} bots, {} obstacles, {} barrels",
        layout.bots.len(),
        layout.obstacles.len(),
        layout.barrels.len()
    );

    layout
}

fn random_half_extents<R: Rng>(rng: &mut R) -> Vec3 {
    let (min, max) = (obstacle::MIN_HALF_EXTENTS, obstacle::MAX_HALF_EXTENTS);
    Vec3::new(
        rng.gen_range(min.x..=max.x),
        rng.gen_range(min.y..=max.y),
        rng.gen_range(min.z..=max.z),
    )
}
