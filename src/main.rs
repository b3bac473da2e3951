use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use tank_arena_sim::config::SimConfig;
use tank_arena_sim::game::arena;
use tank_arena_sim::game::constants::tank;
use tank_arena_sim::game::entity::{Actuation, EntityId};
use tank_arena_sim::game::events::{EventKind, GameEvent};
use tank_arena_sim::game::game_loop::GameLoop;
use tank_arena_sim::metrics::{self, Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Tank Arena Sim v{}", env!("CARGO_PKG_VERSION"));

    let config = SimConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: {} Hz, {} bots, ai_offload={}, collision_offload={}, seed={}",
        config.tick_rate, config.bot_count, config.ai_offload, config.collision_offload, config.seed
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let mut game = GameLoop::new(&config);
    let layout = arena::populate(&mut game, &config);
    game.event_bus_mut().subscribe(EventKind::Destroyed, |event| {
        if let GameEvent::Destroyed { id, entity_type } = event {
            info!("{:?} {} destroyed", entity_type, id);
        }
    });
    game.event_bus_mut().subscribe(EventKind::BarrelExploded, |event| {
        if let GameEvent::BarrelExploded { id, position } = event {
            debug!("Barrel {} exploded at {:?}", id, position);
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };
    let deadline = async {
        match config.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
        info!("Run duration reached");
    };

    tokio::select! {
        _ = run(&mut game, layout.player, &metrics, config.tick_rate) => {}
        _ = shutdown => {}
        _ = deadline => {}
    }

    let last = game.last_stats();
    info!(
        "Stopped after {} ticks: {} tanks left, {} explosions, {} stale responses dropped",
        game.tick_count(),
        last.tanks,
        metrics.explosions_total.load(std::sync::atomic::Ordering::Relaxed),
        metrics.stale_responses_total.load(std::sync::atomic::Ordering::Relaxed),
    );
    Ok(())
}

/// Fixed-rate tick driver
async fn run(game: &mut GameLoop, player: EntityId, metrics: &Metrics, tick_rate: u32) {
    let mut ticker = interval(Duration::from_secs_f64(1.0 / f64::from(tick_rate)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Game loop started at {} Hz", tick_rate);
    let start = Instant::now();

    loop {
        ticker.tick().await;

        drive_player(game, player, tick_rate);
        game.tick();
        metrics.record_tick(game.last_stats());

        // Log stats periodically (every 10 seconds)
        if game.tick_count() % (u64::from(tick_rate) * 10) == 0 {
            let stats = game.last_stats();
            info!(
                "Sim: {}s, tick {}, {} tanks, {} agents, {} projectiles | {} indexed, {} candidates, tick {:?}",
                start.elapsed().as_secs(),
                stats.tick,
                stats.tanks,
                stats.agents,
                stats.projectiles,
                stats.indexed,
                stats.candidates_checked,
                stats.duration
            );
        }
    }
}

/// Scripted player: slow circles, one shot per second
fn drive_player(game: &mut GameLoop, player: EntityId, tick_rate: u32) {
    if game.player() != Some(player) {
        return;
    }
    let dt = game.dt();
    game.actuate(player, Actuation::RotateLeft(tank::TURN_RATE * 0.2 * dt));
    game.actuate(player, Actuation::MoveForward(tank::SPEED * 0.5 * dt));
    if game.tick_count() % u64::from(tick_rate) == 0 {
        game.actuate(player, Actuation::FireOnce);
    }
}
