//! Prometheus-compatible metrics endpoint
//!
//! Exposes simulation metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::game_loop::TickStats;

const TICK_HISTORY: usize = 1000;

/// Metrics registry for the simulation
#[derive(Debug)]
pub struct Metrics {
    // Entity counts
    pub entity_count: AtomicU64,
    pub tank_count: AtomicU64,
    pub projectile_count: AtomicU64,
    pub barrel_count: AtomicU64,
    pub agent_count: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    // Tick counter
    pub tick_count: AtomicU64,

    // Broad phase, last tick
    pub indexed_objects: AtomicU64,
    pub candidate_pairs: AtomicU64,
    pub octree_nodes: AtomicU64,
    pub octree_depth: AtomicU64,

    // Running totals
    pub collisions_total: AtomicU64,
    pub explosions_total: AtomicU64,
    pub destroyed_total: AtomicU64,
    pub state_changes_total: AtomicU64,
    pub stale_responses_total: AtomicU64,
    pub stale_commands_total: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation (VecDeque for O(1) pop_front)
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            entity_count: AtomicU64::new(0),
            tank_count: AtomicU64::new(0),
            projectile_count: AtomicU64::new(0),
            barrel_count: AtomicU64::new(0),
            agent_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            indexed_objects: AtomicU64::new(0),
            candidate_pairs: AtomicU64::new(0),
            octree_nodes: AtomicU64::new(0),
            octree_depth: AtomicU64::new(0),
            collisions_total: AtomicU64::new(0),
            explosions_total: AtomicU64::new(0),
            destroyed_total: AtomicU64::new(0),
            state_changes_total: AtomicU64::new(0),
            stale_responses_total: AtomicU64::new(0),
            stale_commands_total: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Fold one tick's report into the registry
    pub fn record_tick(&self, stats: &TickStats) {
        self.record_tick_time(stats.duration);

        self.entity_count.store(stats.entities as u64, Ordering::Relaxed);
        self.tank_count.store(stats.tanks as u64, Ordering::Relaxed);
        self.projectile_count.store(stats.projectiles as u64, Ordering::Relaxed);
        self.barrel_count.store(stats.barrels as u64, Ordering::Relaxed);
        self.agent_count.store(stats.agents as u64, Ordering::Relaxed);

        self.indexed_objects.store(stats.indexed as u64, Ordering::Relaxed);
        self.candidate_pairs.store(stats.candidates_checked as u64, Ordering::Relaxed);
        self.octree_nodes.store(stats.octree_nodes as u64, Ordering::Relaxed);
        self.octree_depth.store(stats.octree_depth as u64, Ordering::Relaxed);

        self.collisions_total.fetch_add(stats.collisions as u64, Ordering::Relaxed);
        self.explosions_total.fetch_add(stats.explosions as u64, Ordering::Relaxed);
        self.destroyed_total.fetch_add(stats.destroyed as u64, Ordering::Relaxed);
        self.state_changes_total.fetch_add(stats.state_changes as u64, Ordering::Relaxed);
        self.stale_responses_total.fetch_add(stats.stale_responses, Ordering::Relaxed);
        self.stale_commands_total.fetch_add(stats.stale_commands as u64, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Entity metrics
        metric!("tank_arena_entities", "Live entities", "gauge",
            self.entity_count.load(Ordering::Relaxed));
        metric!("tank_arena_tanks", "Live tanks", "gauge",
            self.tank_count.load(Ordering::Relaxed));
        metric!("tank_arena_projectiles", "Projectiles in flight", "gauge",
            self.projectile_count.load(Ordering::Relaxed));
        metric!("tank_arena_barrels", "Barrels including wrecks", "gauge",
            self.barrel_count.load(Ordering::Relaxed));
        metric!("tank_arena_agents", "Registered AI agents", "gauge",
            self.agent_count.load(Ordering::Relaxed));

        // Performance metrics
        metric!("tank_arena_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("tank_arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("tank_arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("tank_arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("tank_arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        // Broad phase
        metric!("tank_arena_indexed_objects", "Objects in the spatial index", "gauge",
            self.indexed_objects.load(Ordering::Relaxed));
        metric!("tank_arena_candidate_pairs", "Candidate pairs tested last tick", "gauge",
            self.candidate_pairs.load(Ordering::Relaxed));
        metric!("tank_arena_octree_nodes", "Spatial index nodes", "gauge",
            self.octree_nodes.load(Ordering::Relaxed));
        metric!("tank_arena_octree_depth", "Deepest spatial index level", "gauge",
            self.octree_depth.load(Ordering::Relaxed));

        // Totals
        metric!("tank_arena_collisions_total", "Intersecting pairs resolved", "counter",
            self.collisions_total.load(Ordering::Relaxed));
        metric!("tank_arena_explosions_total", "Barrel explosions", "counter",
            self.explosions_total.load(Ordering::Relaxed));
        metric!("tank_arena_destroyed_total", "Tanks destroyed", "counter",
            self.destroyed_total.load(Ordering::Relaxed));
        metric!("tank_arena_state_changes_total", "Agent FSM transitions", "counter",
            self.state_changes_total.load(Ordering::Relaxed));
        metric!("tank_arena_stale_responses_total", "Worker responses dropped as stale", "counter",
            self.stale_responses_total.load(Ordering::Relaxed));
        metric!("tank_arena_stale_commands_total", "Commands dropped for missing entities", "counter",
            self.stale_commands_total.load(Ordering::Relaxed));
        metric!("tank_arena_uptime_seconds", "Uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "entities": {
                "total": load(&self.entity_count),
                "tanks": load(&self.tank_count),
                "projectiles": load(&self.projectile_count),
                "barrels": load(&self.barrel_count),
                "agents": load(&self.agent_count),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
            },
            "broad_phase": {
                "indexed": load(&self.indexed_objects),
                "candidates": load(&self.candidate_pairs),
                "octree_nodes": load(&self.octree_nodes),
                "octree_depth": load(&self.octree_depth),
            },
            "totals": {
                "collisions": load(&self.collisions_total),
                "explosions": load(&self.explosions_total),
                "destroyed": load(&self.destroyed_total),
                "state_changes": load(&self.state_changes_total),
                "stale_responses": load(&self.stale_responses_total),
                "stale_commands": load(&self.stale_commands_total),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

/// Build the HTTP response for one request
fn route(metrics: &Metrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json") {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    };

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_record_tick_accumulates_totals() {
        let metrics = Metrics::new();
        let stats = TickStats {
            tanks: 3,
            collisions: 2,
            stale_responses: 1,
            ..TickStats::default()
        };
        metrics.record_tick(&stats);
        metrics.record_tick(&stats);

        assert_eq!(metrics.tank_count.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.collisions_total.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.stale_responses_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.tank_count.store(7, Ordering::Relaxed);

        let output = metrics.to_prometheus();
        assert!(output.contains("tank_arena_tanks 7"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE tank_arena_collisions_total counter"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.projectile_count.store(5, Ordering::Relaxed);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["entities"]["projectiles"], 5);
        assert!(value["performance"].is_object());
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        assert!(route(&metrics, "GET /metrics HTTP/1.1").contains("tank_arena_tick_count"));
        assert!(route(&metrics, "GET /metrics/json HTTP/1.1").contains("application/json"));
        assert!(route(&metrics, "GET /health HTTP/1.1").ends_with("OK"));
        assert!(route(&metrics, "GET /nope HTTP/1.1").starts_with("HTTP/1.1 404"));
    }
}
