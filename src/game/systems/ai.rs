use std::f32::consts::PI;

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::game::constants::ai::*;
use crate::game::constants::{tank, world as world_consts};
use crate::game::entity::{Actuation, EntityId, Faction};
use crate::game::spatial::Aabb;
use crate::game::systems::collision::BroadPhase;
use crate::game::world::World;
use crate::util::vec3::{normalize_angle, Vec3};

/// FSM state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgentMode {
    /// Wander between random waypoints
    #[default]
    Patrol,
    /// Target detected, closing in
    Hunt,
    /// Target in range, firing
    Attack,
}

/// Where an entity is and which side it is on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: f32,
    pub faction: Faction,
}

/// Read-only view of the world an agent decides against.
///
/// Implemented over the live world on the main thread and over a
/// snapshot inside the AI worker.
pub trait AgentWorld: Sync {
    fn pose(&self, id: EntityId) -> Option<Pose>;
    fn health(&self, id: EntityId) -> Option<f32>;
    fn intact_barrels(&self) -> Vec<Vec3>;
    fn boundary(&self) -> Aabb;
    /// Obstacle boxes near `center`, excluding `exclude`
    fn obstacles_near(&self, center: Vec3, radius: f32, exclude: EntityId) -> Vec<Aabb>;
}

/// Live world plus the broad phase built this tick
pub struct WorldView<'a> {
    pub world: &'a World,
    pub broad_phase: &'a BroadPhase,
}

impl AgentWorld for WorldView<'_> {
    fn pose(&self, id: EntityId) -> Option<Pose> {
        self.world.get(id).map(|e| Pose {
            position: e.position,
            rotation: e.rotation,
            faction: e.faction,
        })
    }

    fn health(&self, id: EntityId) -> Option<f32> {
        self.world.get(id).and_then(|e| e.health())
    }

    fn intact_barrels(&self) -> Vec<Vec3> {
        self.world
            .iter()
            .filter(|e| e.is_intact_barrel())
            .map(|e| e.position)
            .collect()
    }

    fn boundary(&self) -> Aabb {
        self.world.boundary()
    }

    fn obstacles_near(&self, center: Vec3, radius: f32, exclude: EntityId) -> Vec<Aabb> {
        self.broad_phase.obstacles_near(center, radius, exclude)
    }
}

/// Per-agent FSM state
#[derive(Debug, Clone)]
pub struct AgentState {
    pub mode: AgentMode,
    /// Controller clock when `mode` was entered
    pub state_entered_at: f32,
    pub target: Option<EntityId>,
    pub patrol_target: Option<Vec3>,
    pub decision_timer: f32,
    pub patrol_timer: f32,
    pub shot_cooldown: f32,
    rng: StdRng,
}

impl AgentState {
    fn new(now: f32, seed: u64) -> Self {
        Self {
            mode: AgentMode::Patrol,
            // Dwell already satisfied so the first evaluation may transition
            state_entered_at: now - MIN_STATE_DWELL,
            target: None,
            patrol_target: None,
            decision_timer: 0.0,
            patrol_timer: 0.0,
            shot_cooldown: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTransition {
    pub agent: EntityId,
    pub from: AgentMode,
    pub to: AgentMode,
}

/// Everything one agent wants done this tick
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDecision {
    pub agent: EntityId,
    pub transition: Option<ModeTransition>,
    pub commands: SmallVec<[Actuation; 4]>,
}

/// FSM controller for every AI tank
pub struct AgentController {
    agents: HashMap<EntityId, AgentState>,
    clock: f32,
    seed: u64,
}

impl AgentController {
    pub fn new(seed: u64) -> Self {
        Self {
            agents: HashMap::new(),
            clock: 0.0,
            seed,
        }
    }

    pub fn register(&mut self, agent: EntityId) {
        let seed = self.seed ^ agent.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        self.agents.insert(agent, AgentState::new(self.clock, seed));
    }

    pub fn unregister(&mut self, agent: EntityId) -> bool {
        self.agents.remove(&agent).is_some()
    }

    /// Point an agent at a target. Only hostile targets are accepted.
    pub fn set_target<W: AgentWorld>(&mut self, world: &W, agent: EntityId, target: EntityId) -> bool {
        let (Some(me), Some(them)) = (world.pose(agent), world.pose(target)) else {
            return false;
        };
        if !me.faction.is_hostile_to(them.faction) {
            debug!("Agent {} refused non-hostile target {}", agent, target);
            return false;
        }
        match self.agents.get_mut(&agent) {
            Some(state) => {
                state.target = Some(target);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, agent: EntityId) -> Option<&AgentState> {
        self.agents.get(&agent)
    }

    pub fn get_mut(&mut self, agent: EntityId) -> Option<&mut AgentState> {
        self.agents.get_mut(&agent)
    }

    pub fn mode(&self, agent: EntityId) -> Option<AgentMode> {
        self.agents.get(&agent).map(|s| s.mode)
    }

    pub fn agent_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.agents.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn clock(&self) -> f32 {
        self.clock
    }

    /// Advance every agent by `dt`.
    /// Uses rayon to compute decisions in parallel; each agent only touches
    /// its own state. Results are sorted by agent id.
    pub fn update<W: AgentWorld>(&mut self, world: &W, dt: f32) -> Vec<AgentDecision> {
        self.clock += dt;
        let now = self.clock;
        let barrels = world.intact_barrels();

        let mut decisions: Vec<AgentDecision> = self
            .agents
            .par_iter_mut()
            .filter_map(|(&id, state)| step_agent(id, state, world, &barrels, now, dt))
            .collect();

        decisions.sort_unstable_by_key(|d| d.agent);
        decisions
    }
}

impl Default for AgentController {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Map target distance and liveness to a state
pub fn evaluate_mode(distance: f32, target_alive: bool) -> AgentMode {
    if !target_alive || distance > DETECTION_RANGE {
        AgentMode::Patrol
    } else if distance > ATTACK_RANGE {
        AgentMode::Hunt
    } else {
        AgentMode::Attack
    }
}

fn step_agent<W: AgentWorld>(
    id: EntityId,
    state: &mut AgentState,
    world: &W,
    barrels: &[Vec3],
    now: f32,
    dt: f32,
) -> Option<AgentDecision> {
    let me = world.pose(id)?;
    let mut commands = SmallVec::new();

    state.shot_cooldown = (state.shot_cooldown - dt).max(0.0);
    state.decision_timer -= dt;

    let mut transition = None;
    if state.decision_timer <= 0.0 {
        state.decision_timer = DECISION_INTERVAL;
        transition = decide_mode(id, state, &me, world, now);
        if let Some(t) = transition {
            commands.push(match t.to {
                AgentMode::Attack => Actuation::StartAutoFire(FIRE_INTERVAL),
                AgentMode::Hunt | AgentMode::Patrol => Actuation::StopAutoFire,
            });
        }
    }

    match state.mode {
        AgentMode::Patrol => execute_patrol(id, state, &me, world, dt, &mut commands),
        AgentMode::Hunt => execute_hunt(id, state, &me, world, dt, &mut commands),
        AgentMode::Attack => execute_attack(id, state, &me, world, barrels, dt, &mut commands),
    }

    Some(AgentDecision {
        agent: id,
        transition,
        commands,
    })
}

/// Re-evaluate the FSM; returns the transition taken, if any
fn decide_mode<W: AgentWorld>(
    id: EntityId,
    state: &mut AgentState,
    me: &Pose,
    world: &W,
    now: f32,
) -> Option<ModeTransition> {
    let target = state.target.and_then(|t| {
        let pose = world.pose(t)?;
        let alive = world.health(t).map_or(true, |h| h > 0.0);
        Some((pose.position, alive))
    });

    let (next, forced) = match target {
        Some((position, true)) => (evaluate_mode(me.position.distance_to(position), true), false),
        _ => (AgentMode::Patrol, true),
    };

    if next == state.mode {
        return None;
    }
    // Dwell only holds back distance-driven changes
    if !forced && now - state.state_entered_at < MIN_STATE_DWELL {
        return None;
    }

    let from = state.mode;
    state.mode = next;
    state.state_entered_at = now;
    if next == AgentMode::Patrol {
        state.patrol_target = None;
    }

    Some(ModeTransition { agent: id, from, to: next })
}

fn execute_patrol<W: AgentWorld>(
    id: EntityId,
    state: &mut AgentState,
    me: &Pose,
    world: &W,
    dt: f32,
    commands: &mut SmallVec<[Actuation; 4]>,
) {
    state.patrol_timer -= dt;

    let needs_waypoint = match state.patrol_target {
        None => true,
        Some(p) => state.patrol_timer <= 0.0 || me.position.horizontal_distance_to(p) <= ARRIVAL_DISTANCE,
    };
    if needs_waypoint {
        state.patrol_target = Some(generate_patrol_point(&mut state.rng, me.position, world.boundary()));
        state.patrol_timer = PATROL_REGEN_INTERVAL;
    }

    if let Some(goal) = state.patrol_target {
        steer_toward(id, me, goal, PATROL_SPEED, world, dt, commands);
    }
}

fn execute_hunt<W: AgentWorld>(
    id: EntityId,
    state: &mut AgentState,
    me: &Pose,
    world: &W,
    dt: f32,
    commands: &mut SmallVec<[Actuation; 4]>,
) {
    // Target vanished since the last evaluation; the next one falls back to Patrol
    let Some(target) = state.target.and_then(|t| world.pose(t)) else {
        return;
    };
    steer_toward(id, me, target.position, HUNT_SPEED, world, dt, commands);
}

fn execute_attack<W: AgentWorld>(
    id: EntityId,
    state: &mut AgentState,
    me: &Pose,
    world: &W,
    barrels: &[Vec3],
    dt: f32,
    commands: &mut SmallVec<[Actuation; 4]>,
) {
    let Some(target) = state.target.and_then(|t| world.pose(t)) else {
        return;
    };

    let barrel = if state.shot_cooldown <= 0.0 {
        find_tactical_barrel(me.position, target.position, barrels)
    } else {
        None
    };

    match barrel {
        Some(aim) => {
            if face(me, aim, AIM_TOLERANCE, dt, commands) {
                commands.push(Actuation::FireOnce);
                state.shot_cooldown = SHOT_COOLDOWN;
            }
        }
        None => {
            face(me, target.position, AIM_TOLERANCE, dt, commands);
        }
    }

    let to_target = (target.position - me.position).flat();
    let (direction, distance) = to_target.normalize_with_length();
    let aligned = Vec3::from_heading(me.rotation).dot(direction) >= ALIGN_DOT;
    let step = tank::SPEED * ATTACK_SPEED * dt;

    if !aligned {
        return;
    }
    if distance > OPTIMAL_DISTANCE * CLOSE_GAP_FACTOR {
        commands.push(Actuation::MoveForward(step));
    } else if distance < OPTIMAL_DISTANCE * BACK_OFF_FACTOR {
        let obstacles = world.obstacles_near(me.position, MIN_CLEARANCE, id);
        if rear_is_clear(me, &obstacles) {
            commands.push(Actuation::MoveBackward(step));
        }
    }
}

/// True when nothing sits in the strip just behind the hull.
///
/// Probes a point `REAR_CLEARANCE` past the rear edge and requires every
/// obstacle to be at least half a hull width away from it.
pub fn rear_is_clear(me: &Pose, obstacles: &[Aabb]) -> bool {
    let probe = me.position - Vec3::from_heading(me.rotation) * (tank::HALF_EXTENTS.z + REAR_CLEARANCE);
    obstacles
        .iter()
        .all(|o| o.clamp_point(probe).horizontal_distance_to(probe) >= tank::HALF_EXTENTS.x)
}

/// Intact barrel between `origin` and `target` worth shooting instead.
///
/// It must be in engagement range, closer than the target, in front of
/// the agent and within `BARREL_TARGET_RADIUS` of the target. The one
/// nearest the target wins.
pub fn find_tactical_barrel(origin: Vec3, target: Vec3, barrels: &[Vec3]) -> Option<Vec3> {
    let to_target = target - origin;
    let target_distance = to_target.length();

    barrels
        .iter()
        .copied()
        .filter(|&b| {
            let d = origin.distance_to(b);
            d <= ATTACK_RANGE
                && d < target_distance
                && (b - origin).dot(to_target) > 0.0
                && b.distance_to(target) <= BARREL_TARGET_RADIUS
        })
        .min_by(|a, b| {
            a.distance_sq_to(target)
                .partial_cmp(&b.distance_sq_to(target))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Random waypoint on the patrol ring around `origin`, inside `boundary`.
///
/// Falls back to clamping the last candidate after
/// `MAX_PATROL_ATTEMPTS` misses.
pub fn generate_patrol_point<R: Rng>(rng: &mut R, origin: Vec3, boundary: Aabb) -> Vec3 {
    let area = boundary.shrink(world_consts::EDGE_MARGIN);
    let mut candidate = origin;

    for _ in 0..MAX_PATROL_ATTEMPTS {
        let bearing = rng.gen_range(-PI..PI);
        let radius = rng.gen_range(PATROL_MIN_RADIUS..PATROL_MAX_RADIUS);
        candidate = origin + Vec3::from_heading(bearing) * radius;
        if area.contains_point(candidate) {
            return candidate;
        }
    }

    warn!(
        "No in-bounds patrol point near ({:.1}, {:.1}) after {} attempts, clamping",
        origin.x, origin.z, MAX_PATROL_ATTEMPTS
    );
    area.clamp_point(candidate)
}

/// Result of scanning nearby obstacles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Avoidance {
    /// Sum of away-vectors with linear falloff
    pub repulsion: Vec3,
    /// Floor distance to the closest obstacle surface (infinite if none)
    pub nearest_distance: f32,
    pub nearest_point: Option<Vec3>,
}

/// Accumulate repulsion from every box closer than `clearance`.
///
/// Distances are measured on the floor plane from `origin` to the closest
/// point of each box. Each contributes `(clearance - d) / clearance`.
pub fn compute_avoidance(origin: Vec3, obstacles: &[Aabb], clearance: f32) -> Avoidance {
    let mut repulsion = Vec3::ZERO;
    let mut nearest_distance = f32::INFINITY;
    let mut nearest_point = None;

    for obstacle in obstacles {
        let closest = obstacle.clamp_point(origin);
        let (away, distance) = (origin - closest).flat().normalize_with_length();

        if distance < nearest_distance {
            nearest_distance = distance;
            nearest_point = Some(closest);
        }
        if distance >= clearance {
            continue;
        }

        // Inside the box: push away from its center instead
        let away = if distance > 0.0 {
            away
        } else {
            (origin - obstacle.center()).flat().normalize()
        };
        repulsion += away * ((clearance - distance) / clearance);
    }

    Avoidance {
        repulsion,
        nearest_distance,
        nearest_point,
    }
}

/// Steering policy picked from an avoidance scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Steering {
    /// Emergency: back away from the obstacle, turning toward `away`
    Panic { away: Vec3 },
    /// Head along a blend of goal direction and repulsion
    Blend { direction: Vec3 },
    /// Nothing close enough to matter
    Direct,
}

/// Panic strictly below `PANIC_DISTANCE`; blend when repulsion is
/// non-negligible; otherwise go straight.
pub fn choose_steering(avoidance: &Avoidance, origin: Vec3, goal_direction: Vec3) -> Steering {
    let (repulsion_dir, strength) = avoidance.repulsion.normalize_with_length();

    if avoidance.nearest_distance < PANIC_DISTANCE {
        let away = if strength > 0.0 {
            repulsion_dir
        } else {
            avoidance
                .nearest_point
                .map(|p| (origin - p).flat().normalize())
                .unwrap_or(Vec3::ZERO)
        };
        return Steering::Panic { away };
    }

    if strength > REPULSION_EPSILON {
        let mut direction = (goal_direction + repulsion_dir * AVOIDANCE_WEIGHT).flat().normalize();
        if direction.is_zero(1e-6) {
            // Goal straight through the obstacle: slide along it
            direction = Vec3::new(repulsion_dir.z, 0.0, -repulsion_dir.x);
        }
        return Steering::Blend { direction };
    }

    Steering::Direct
}

/// Obstacle-aware move toward `goal`
fn steer_toward<W: AgentWorld>(
    id: EntityId,
    me: &Pose,
    goal: Vec3,
    speed: f32,
    world: &W,
    dt: f32,
    commands: &mut SmallVec<[Actuation; 4]>,
) {
    let obstacles = world.obstacles_near(me.position, MIN_CLEARANCE, id);
    let avoidance = compute_avoidance(me.position, &obstacles, MIN_CLEARANCE);
    let goal_direction = (goal - me.position).flat().normalize();

    match choose_steering(&avoidance, me.position, goal_direction) {
        Steering::Panic { away } => panic_maneuver(me, away, dt, commands),
        Steering::Blend { direction } => {
            let waypoint = me.position + direction * STEERING_LOOKAHEAD;
            drive_toward(me, waypoint, speed, TURN_TOLERANCE, dt, commands);
        }
        Steering::Direct => drive_toward(me, goal, speed, TURN_TOLERANCE, dt, commands),
    }
}

/// Reverse away from a too-close obstacle while turning the nose away
fn panic_maneuver(me: &Pose, away: Vec3, dt: f32, commands: &mut SmallVec<[Actuation; 4]>) {
    let forward = Vec3::from_heading(me.rotation);
    let turn = tank::TURN_RATE * dt;
    let step = tank::SPEED * PANIC_REVERSE_SPEED * dt;

    let cross = forward.z * away.x - forward.x * away.z;
    commands.push(if cross >= 0.0 {
        Actuation::RotateLeft(turn)
    } else {
        Actuation::RotateRight(turn)
    });

    // Obstacle behind the tank: creep forward instead
    if forward.dot(away) > 0.0 {
        commands.push(Actuation::MoveForward(step));
    } else {
        commands.push(Actuation::MoveBackward(step));
    }
}

/// Rotate toward `point`. Returns true when already within `tolerance`.
fn face(me: &Pose, point: Vec3, tolerance: f32, dt: f32, commands: &mut SmallVec<[Actuation; 4]>) -> bool {
    let offset = (point - me.position).flat();
    if offset.is_zero(1e-6) {
        return true;
    }
    let delta = normalize_angle(offset.heading() - me.rotation);
    if delta.abs() <= tolerance {
        return true;
    }

    let turn = delta.abs().min(tank::TURN_RATE * dt);
    commands.push(if delta > 0.0 {
        Actuation::RotateLeft(turn)
    } else {
        Actuation::RotateRight(turn)
    });
    false
}

/// Turn toward `goal` at the capped rate and move only once facing it
pub fn drive_toward(
    me: &Pose,
    goal: Vec3,
    speed: f32,
    tolerance: f32,
    dt: f32,
    commands: &mut SmallVec<[Actuation; 4]>,
) {
    let offset = (goal - me.position).flat();
    if offset.is_zero(1e-6) {
        return;
    }
    face(me, goal, tolerance, dt, commands);

    if Vec3::from_heading(me.rotation).dot(offset.normalize()) >= ALIGN_DOT {
        commands.push(Actuation::MoveForward(tank::SPEED * speed * dt));
    }
}
