//! The per-tick orchestrator
//!
//! Owns the world, the broad phase, the agent controller, the delayed
//! event schedule and the event bus, and runs them in a fixed order:
//! advance entities, detect and resolve collisions, fire due explosions,
//! record valid poses, run the agents, purge disposed entities.

use std::time::{Duration, Instant};

#[cfg(feature = "workers")]
use hashbrown::HashSet;
use tracing::{debug, trace};

use crate::config::SimConfig;
use crate::game::constants::world::HALF_HEIGHT;
use crate::game::entity::{Actuation, EntityId, EntityType};
use crate::game::events::{EventBus, GameEvent};
use crate::game::schedule::Schedule;
use crate::game::spatial::Aabb;
use crate::game::systems::ai::{AgentController, AgentDecision, WorldView};
use crate::game::systems::collision::{self, BroadPhase};
use crate::game::systems::{explosion, physics};
use crate::game::world::World;
use crate::util::vec3::Vec3;

#[cfg(feature = "workers")]
use crate::worker::{
    ai_worker::{self, AiWorkerHandle},
    collision_worker::{self, CollisionWorkerHandle},
    protocol::{
        AiRequest, AiResponse, CollisionRequest, CollisionResponse, ObjectSnapshot, Sequenced, WorldInit,
    },
};

/// What happened during one tick, for logging and metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickStats {
    pub tick: u64,
    pub duration: Duration,
    pub entities: usize,
    pub tanks: usize,
    pub projectiles: usize,
    pub barrels: usize,
    /// Registered agents, wherever their decisions are computed
    pub agents: usize,
    pub indexed: usize,
    pub candidates_checked: usize,
    pub octree_nodes: usize,
    pub octree_depth: u32,
    pub collisions: usize,
    pub explosions: usize,
    pub destroyed: usize,
    pub state_changes: usize,
    pub stale_responses: u64,
    pub stale_commands: usize,
}

/// Fixed-step simulation context
pub struct GameLoop {
    world: World,
    broad_phase: BroadPhase,
    /// Agent registry; with AI offload the worker mirrors it each snapshot
    controller: AgentController,
    schedule: Schedule,
    bus: EventBus,
    tick: u64,
    dt: f32,
    player: Option<EntityId>,
    ai_snapshot_interval: u64,
    #[cfg(feature = "workers")]
    ai_worker: Option<AiWorkerHandle>,
    #[cfg(feature = "workers")]
    collision_worker: Option<CollisionWorkerHandle>,
    /// Static objects have been sent to the collision worker
    #[cfg(feature = "workers")]
    static_sent: bool,
    /// Tank poses in the collision snapshot awaiting its response
    #[cfg(feature = "workers")]
    unchecked_poses: Option<PendingPoses>,
    /// Simulated time since the last AI snapshot
    #[cfg(feature = "workers")]
    ai_dt_accum: f32,
    last_stats: TickStats,
}

impl GameLoop {
    /// Build an empty arena. Workers are started when the config asks for
    /// them; a worker that fails to start leaves that stage on the main
    /// thread.
    pub fn new(config: &SimConfig) -> Self {
        let half = Vec3::new(config.world_half_extent, HALF_HEIGHT, config.world_half_extent);
        let boundary = Aabb::new(-half, half);

        #[cfg(not(feature = "workers"))]
        if config.ai_offload || config.collision_offload {
            tracing::warn!("Built without workers, running AI and collision on the main thread");
        }

        Self {
            world: World::new(boundary),
            broad_phase: BroadPhase::new(boundary, config.octree_max_objects, config.octree_max_depth),
            controller: AgentController::new(config.seed),
            schedule: Schedule::new(),
            bus: EventBus::new(),
            tick: 0,
            dt: config.dt(),
            player: None,
            ai_snapshot_interval: u64::from(config.ai_snapshot_interval_ticks.max(1)),
            #[cfg(feature = "workers")]
            ai_worker: config
                .ai_offload
                .then(|| start_worker(ai_worker::spawn(world_init(boundary, config), config.seed)))
                .flatten(),
            #[cfg(feature = "workers")]
            collision_worker: config
                .collision_offload
                .then(|| start_worker(collision_worker::spawn(world_init(boundary, config))))
                .flatten(),
            #[cfg(feature = "workers")]
            static_sent: false,
            #[cfg(feature = "workers")]
            unchecked_poses: None,
            #[cfg(feature = "workers")]
            ai_dt_accum: 0.0,
            last_stats: TickStats::default(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn controller(&self) -> &AgentController {
        &self.controller
    }

    pub fn broad_phase(&self) -> &BroadPhase {
        &self.broad_phase
    }

    pub fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    pub fn event_bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn player(&self) -> Option<EntityId> {
        self.player
    }

    /// The tank every agent hunts
    pub fn set_player(&mut self, player: EntityId) {
        self.player = Some(player);
        for agent in self.controller.agent_ids() {
            self.retarget(agent);
        }
    }

    /// Hand a tank to the agent controller, aimed at the player
    pub fn add_agent(&mut self, tank: EntityId) {
        self.controller.register(tank);
        self.retarget(tank);
    }

    fn retarget(&mut self, agent: EntityId) {
        let Some(player) = self.player else {
            return;
        };
        let view = WorldView {
            world: &self.world,
            broad_phase: &self.broad_phase,
        };
        self.controller.set_target(&view, agent, player);
    }

    /// Drive an entity directly (the player, or scripted input)
    pub fn actuate(&mut self, id: EntityId, actuation: Actuation) -> bool {
        self.world.apply_actuation(id, actuation)
    }

    pub fn ai_offloaded(&self) -> bool {
        #[cfg(feature = "workers")]
        {
            self.ai_worker.is_some()
        }
        #[cfg(not(feature = "workers"))]
        {
            false
        }
    }

    pub fn collision_offloaded(&self) -> bool {
        #[cfg(feature = "workers")]
        {
            self.collision_worker.is_some()
        }
        #[cfg(not(feature = "workers"))]
        {
            false
        }
    }

    pub fn last_stats(&self) -> &TickStats {
        &self.last_stats
    }

    /// Run one tick and return its events
    pub fn tick(&mut self) -> Vec<GameEvent> {
        let start = Instant::now();
        let mut stats = TickStats {
            tick: self.tick,
            ..TickStats::default()
        };
        let mut events = Vec::new();

        physics::update(&mut self.world, self.dt, &mut events);

        self.collide(&mut events, &mut stats);

        let before = events.len();
        explosion::process_due(&mut self.world, &mut self.schedule, self.tick, &mut events);
        #[cfg(feature = "workers")]
        self.forward_static(&events[before..]);
        #[cfg(not(feature = "workers"))]
        let _ = before;

        // Offloaded poses are committed once the worker has checked them
        if !self.collision_offloaded() {
            self.world.commit_valid_poses();
        }

        self.think(&mut events, &mut stats);

        for id in self.world.purge_disposed() {
            if self.controller.unregister(id) {
                debug!("Agent {} removed with its tank", id);
            }
            if self.player == Some(id) {
                self.player = None;
            }
        }

        self.bus.publish_all(&events);

        stats.entities = self.world.len();
        stats.tanks = self.world.count_of(EntityType::Tank);
        stats.projectiles = self.world.count_of(EntityType::Projectile);
        stats.barrels = self.world.count_of(EntityType::Barrel);
        stats.agents = self.controller.len();
        for event in &events {
            match event {
                GameEvent::BarrelExploded { .. } => stats.explosions += 1,
                GameEvent::Destroyed { entity_type: EntityType::Tank, .. } => stats.destroyed += 1,
                GameEvent::StateChanged { .. } => stats.state_changes += 1,
                _ => {}
            }
        }
        stats.duration = start.elapsed();
        trace!("Tick {} finished in {:?}", self.tick, stats.duration);

        self.last_stats = stats;
        self.tick += 1;
        events
    }

    /// Collision stage: local broad phase, or the worker's latest pairs
    fn collide(&mut self, events: &mut Vec<GameEvent>, stats: &mut TickStats) {
        #[cfg(feature = "workers")]
        if self.collision_worker.is_some() {
            self.collide_offloaded(events, stats);
            return;
        }

        events.extend(collision::rebuild_and_detect(
            &mut self.world,
            &mut self.broad_phase,
            &mut self.schedule,
            self.tick,
        ));
        self.record_broad_phase(stats);
        stats.collisions = self.broad_phase.stats().pairs_found;
    }

    fn record_broad_phase(&self, stats: &mut TickStats) {
        let bp = self.broad_phase.stats();
        let tree = self.broad_phase.tree_stats();
        stats.indexed = bp.indexed;
        stats.candidates_checked = bp.candidates_checked;
        stats.octree_nodes = tree.node_count;
        stats.octree_depth = tree.depth;
    }

    #[cfg(feature = "workers")]
    fn collide_offloaded(&mut self, events: &mut Vec<GameEvent>, stats: &mut TickStats) {
        // Local agents still query the index for obstacles
        if self.ai_worker.is_none() {
            self.broad_phase.rebuild(self.world.iter());
            self.record_broad_phase(stats);
        }

        let Some(worker) = self.collision_worker.as_mut() else {
            return;
        };
        let stale_before = worker.stale_dropped();
        let response = worker.poll_latest();
        stats.stale_responses += worker.stale_dropped() - stale_before;

        if let Some(response) = response {
            let checked = self
                .unchecked_poses
                .take()
                .filter(|p| p.sequence == response.sequence());
            let CollisionResponse::Collisions { mut pairs, .. } = response;
            let blocked = checked
                .as_ref()
                .map(|_| blocked_tanks(&self.world, &pairs))
                .unwrap_or_default();

            // Pairs were found against the previous snapshot
            collision::retain_touching(&self.world, &mut pairs);
            stats.collisions = pairs.len();
            events.extend(collision::resolve_pairs(
                &mut self.world,
                &pairs,
                &mut self.schedule,
                self.tick,
            ));

            // Snapshot poses that touched nothing solid become rollback points
            for (id, position, rotation) in checked.map(|p| p.tanks).unwrap_or_default() {
                if blocked.contains(&id) {
                    continue;
                }
                if let Some(entity) = self.world.get_mut(id) {
                    entity.commit_pose_at(position, rotation);
                }
            }
        }

        let request = if self.static_sent {
            CollisionRequest::dynamic_from_world(&self.world, self.tick)
        } else {
            CollisionRequest::full_from_world(&self.world, self.tick)
        };
        let pending = PendingPoses::of(self.tick, &request);
        match worker.post(self.tick, &request) {
            Ok(()) => {
                self.static_sent = true;
                self.unchecked_poses = Some(pending);
            }
            Err(e) => {
                tracing::warn!("Collision worker lost ({}), detecting on the main thread", e);
                self.collision_worker = None;
            }
        }
    }

    /// Tell the collision worker about new wrecks
    #[cfg(feature = "workers")]
    fn forward_static(&mut self, events: &[GameEvent]) {
        let Some(worker) = self.collision_worker.as_ref() else {
            return;
        };
        for event in events {
            let GameEvent::BecameStatic { id } = event else {
                continue;
            };
            let Some(entity) = self.world.get(*id) else {
                continue;
            };
            let object = ObjectSnapshot::from_entity(entity);
            if let Err(e) = worker.send(&CollisionRequest::ObjectBecameStatic { object }) {
                debug!("Could not forward static object {}: {}", id, e);
            }
        }
    }

    /// Agent stage: local controller, or the worker's latest commands
    fn think(&mut self, events: &mut Vec<GameEvent>, stats: &mut TickStats) {
        #[cfg(feature = "workers")]
        if self.ai_worker.is_some() {
            self.think_offloaded(events, stats);
            return;
        }

        let view = WorldView {
            world: &self.world,
            broad_phase: &self.broad_phase,
        };
        let decisions = self.controller.update(&view, self.dt);
        for decision in decisions {
            self.apply_decision(decision, events, stats);
        }
    }

    fn apply_decision(&mut self, decision: AgentDecision, events: &mut Vec<GameEvent>, stats: &mut TickStats) {
        if let Some(t) = decision.transition {
            events.push(GameEvent::StateChanged {
                agent: t.agent,
                from: t.from,
                to: t.to,
            });
        }
        for action in decision.commands {
            if !self.world.apply_actuation(decision.agent, action) {
                stats.stale_commands += 1;
            }
        }
    }

    #[cfg(feature = "workers")]
    fn think_offloaded(&mut self, events: &mut Vec<GameEvent>, stats: &mut TickStats) {
        let Some(worker) = self.ai_worker.as_mut() else {
            return;
        };

        let stale_before = worker.stale_dropped();
        let response = worker.poll_latest();
        stats.stale_responses += worker.stale_dropped() - stale_before;

        if let Some(AiResponse::Commands {
            commands,
            transitions,
            ..
        }) = response
        {
            events.extend(transitions.into_iter().map(|t| GameEvent::StateChanged {
                agent: t.agent,
                from: t.from,
                to: t.to,
            }));
            for command in commands {
                // Agents removed since the snapshot no longer take orders
                let registered = self.controller.get(command.tank_id).is_some();
                if !registered || !self.world.apply_actuation(command.tank_id, command.action) {
                    stats.stale_commands += 1;
                }
            }
        }

        self.ai_dt_accum += self.dt;
        if self.tick % self.ai_snapshot_interval != 0 {
            return;
        }
        let request = AiRequest::update_from_world(
            &self.world,
            self.tick,
            self.ai_dt_accum,
            self.player,
            &self.controller.agent_ids(),
        );
        self.ai_dt_accum = 0.0;
        if let Some(worker) = self.ai_worker.as_mut() {
            if let Err(e) = worker.post(self.tick, &request) {
                tracing::warn!("AI worker lost ({}), agents stop reacting", e);
                self.ai_worker = None;
            }
        }
    }
}

/// Tank poses carried by one collision snapshot
#[cfg(feature = "workers")]
struct PendingPoses {
    sequence: u64,
    tanks: Vec<(EntityId, Vec3, f32)>,
}

#[cfg(feature = "workers")]
impl PendingPoses {
    fn of(sequence: u64, request: &CollisionRequest) -> Self {
        let dynamic = match request {
            CollisionRequest::FullUpdate { dynamic_objects, .. }
            | CollisionRequest::DynamicUpdate { dynamic_objects, .. } => dynamic_objects.as_slice(),
            _ => &[],
        };
        Self {
            sequence,
            tanks: dynamic
                .iter()
                .filter(|s| s.entity_type == EntityType::Tank)
                .map(|s| (s.id, s.position, s.rotation))
                .collect(),
        }
    }
}

/// Tanks a worker pair puts in contact with something solid.
///
/// Anything no longer live counts as solid, except that projectiles never
/// block a tank.
#[cfg(feature = "workers")]
fn blocked_tanks(world: &World, pairs: &[collision::CollisionPair]) -> HashSet<EntityId> {
    let kind = |id: EntityId| world.get(id).map(|e| e.entity_type());
    let mut blocked = HashSet::new();
    for pair in pairs {
        for (me, other) in [(pair.a, pair.b), (pair.b, pair.a)] {
            if kind(me) == Some(EntityType::Tank) && kind(other) != Some(EntityType::Projectile) {
                blocked.insert(me);
            }
        }
    }
    blocked
}

#[cfg(feature = "workers")]
fn world_init(boundary: Aabb, config: &SimConfig) -> WorldInit {
    WorldInit {
        world_boundary: boundary,
        max_objects_per_node: config.octree_max_objects as u32,
        max_depth: config.octree_max_depth,
    }
}

#[cfg(feature = "workers")]
fn start_worker<H>(spawned: Result<H, crate::worker::WorkerError>) -> Option<H> {
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Worker unavailable, continuing without it: {}", e);
            None
        }
    }
}
