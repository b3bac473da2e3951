//! Offloaded agent FSM
//!
//! Runs the same `AgentController` as the main tick, against a snapshot
//! instead of the live world. The worker owns agent state; the tick loop
//! only applies the commands it sends back.

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::game::entity::{EntityId, EntityType};
use crate::game::spatial::Aabb;
use crate::game::systems::ai::{AgentController, AgentWorld, Pose};
use crate::game::systems::collision::BroadPhase;
use crate::util::vec3::Vec3;

use super::protocol::{decode, AiRequest, AiResponse, ObjectSnapshot, TankCommand, WorldInit};
use super::{serve, FrameReceiver, FrameSender, WorkerError, WorkerHandle};

pub type AiWorkerHandle = WorkerHandle<AiRequest, AiResponse>;

pub const THREAD_NAME: &str = "ai-worker";

/// Snapshot-backed world the controller decides against
struct SnapshotView<'a> {
    objects: HashMap<EntityId, &'a ObjectSnapshot>,
    barrels: Vec<Vec3>,
    boundary: Aabb,
    broad_phase: &'a BroadPhase,
}

impl AgentWorld for SnapshotView<'_> {
    fn pose(&self, id: EntityId) -> Option<Pose> {
        self.objects.get(&id).map(|s| Pose {
            position: s.position,
            rotation: s.rotation,
            faction: s.faction,
        })
    }

    fn health(&self, id: EntityId) -> Option<f32> {
        self.objects.get(&id).and_then(|s| s.health)
    }

    fn intact_barrels(&self) -> Vec<Vec3> {
        self.barrels.clone()
    }

    fn boundary(&self) -> Aabb {
        self.boundary
    }

    fn obstacles_near(&self, center: Vec3, radius: f32, exclude: EntityId) -> Vec<Aabb> {
        self.broad_phase.obstacles_near(center, radius, exclude)
    }
}

/// Worker-side state
pub struct AiWorker {
    controller: AgentController,
    broad_phase: BroadPhase,
    boundary: Aabb,
    seed: u64,
}

impl AiWorker {
    pub fn new(init: WorldInit, seed: u64) -> Self {
        Self {
            controller: AgentController::new(seed),
            broad_phase: BroadPhase::new(
                init.world_boundary,
                init.max_objects_per_node as usize,
                init.max_depth,
            ),
            boundary: init.world_boundary,
            seed,
        }
    }

    pub fn controller(&self) -> &AgentController {
        &self.controller
    }

    /// Handle one request. Only updates produce a response.
    pub fn handle(&mut self, request: AiRequest) -> Option<AiResponse> {
        match request {
            AiRequest::Init(init) => {
                debug!("AI worker re-initialised with {:?}", init.world_boundary);
                *self = Self::new(init, self.seed);
                None
            }
            AiRequest::Update {
                sequence,
                dt,
                agents,
                tanks,
                obstacles,
                barrels,
                player_tank,
            } => Some(self.update(
                sequence,
                dt,
                &agents,
                &tanks,
                &obstacles,
                &barrels,
                player_tank.as_ref(),
            )),
            AiRequest::Shutdown => None,
        }
    }

    fn update(
        &mut self,
        sequence: u64,
        dt: f32,
        agents: &[EntityId],
        tanks: &[ObjectSnapshot],
        obstacles: &[ObjectSnapshot],
        barrels: &[ObjectSnapshot],
        player: Option<&ObjectSnapshot>,
    ) -> AiResponse {
        let everything = || {
            tanks
                .iter()
                .chain(obstacles)
                .chain(barrels)
                .chain(player)
        };
        self.broad_phase.rebuild(everything());

        // Mirror the tick loop's agent registry
        for gone in self.controller.agent_ids() {
            if !agents.contains(&gone) {
                self.controller.unregister(gone);
            }
        }
        for &agent in agents {
            if self.controller.get(agent).is_none() {
                self.controller.register(agent);
            }
        }

        let view = SnapshotView {
            objects: everything().map(|s| (s.id, s)).collect(),
            barrels: barrels
                .iter()
                .filter(|b| b.entity_type == EntityType::Barrel && !b.is_static)
                .filter(|b| b.health.is_some_and(|h| h > 0.0))
                .map(|b| b.position)
                .collect(),
            boundary: self.boundary,
            broad_phase: &self.broad_phase,
        };

        if let Some(player) = player {
            for &agent in agents {
                let current = self.controller.get(agent).and_then(|s| s.target);
                if current != Some(player.id) {
                    self.controller.set_target(&view, agent, player.id);
                }
            }
        }

        let decisions = self.controller.update(&view, dt);

        let mut commands = Vec::new();
        let mut transitions = Vec::new();
        for decision in decisions {
            transitions.extend(decision.transition);
            commands.extend(decision.commands.into_iter().map(|action| TankCommand {
                tank_id: decision.agent,
                action,
            }));
        }

        AiResponse::Commands {
            sequence,
            commands,
            transitions,
        }
    }
}

/// Thread body: wait for `Init`, then serve updates until shutdown
fn run(requests: FrameReceiver, responses: FrameSender, seed: u64) {
    let init = loop {
        let Ok(frame) = requests.recv() else {
            return;
        };
        match decode::<AiRequest>(&frame) {
            Ok(AiRequest::Init(init)) => break init,
            Ok(AiRequest::Shutdown) => return,
            Ok(_) => debug!("AI worker ignoring request before init"),
            Err(e) => warn!("AI worker dropping undecodable request: {}", e),
        }
    };

    let mut worker = AiWorker::new(init, seed);
    info!("AI worker ready");
    serve(
        THREAD_NAME,
        requests,
        responses,
        |r: &AiRequest| matches!(r, AiRequest::Shutdown),
        |request| worker.handle(request),
    );
}

/// Start the AI worker and send it its world parameters
pub fn spawn(init: WorldInit, seed: u64) -> Result<AiWorkerHandle, WorkerError> {
    let handle = WorkerHandle::spawn(THREAD_NAME, move |requests, responses| {
        run(requests, responses, seed)
    })?;
    handle.send(&AiRequest::Init(init))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::ai::ATTACK_RANGE;
    use crate::game::entity::{Actuation, Faction};
    use crate::game::systems::ai::AgentMode;
    use crate::game::world::World;
    use crate::worker::protocol::Sequenced;
    use std::time::Duration;

    fn init_for(world: &World) -> WorldInit {
        WorldInit {
            world_boundary: world.boundary(),
            max_objects_per_node: 8,
            max_depth: 6,
        }
    }

    #[test]
    fn test_update_drives_agents_toward_attack() {
        let mut world = World::default();
        let player = world.spawn_tank(Faction::Player, Vec3::ZERO, 0.0);
        let bot = world.spawn_tank(Faction::Enemy, Vec3::new(0.0, 0.0, ATTACK_RANGE * 0.5), 0.0);

        let mut worker = AiWorker::new(init_for(&world), 7);
        let request = AiRequest::update_from_world(&world, 1, 0.05, Some(player), &[bot]);
        let Some(AiResponse::Commands { sequence, commands, transitions }) = worker.handle(request) else {
            panic!("update must produce commands");
        };

        assert_eq!(sequence, 1);
        assert_eq!(worker.controller().mode(bot), Some(AgentMode::Attack));
        assert!(transitions.iter().any(|t| t.agent == bot && t.to == AgentMode::Attack));
        assert!(commands
            .iter()
            .any(|c| c.tank_id == bot && matches!(c.action, Actuation::StartAutoFire(_))));
    }

    #[test]
    fn test_agents_follow_registered_list() {
        let mut world = World::default();
        let player = world.spawn_tank(Faction::Player, Vec3::ZERO, 0.0);
        let a = world.spawn_tank(Faction::Enemy, Vec3::new(100.0, 0.0, 0.0), 0.0);
        let b = world.spawn_tank(Faction::Enemy, Vec3::new(-100.0, 0.0, 0.0), 0.0);
        let bystander = world.spawn_tank(Faction::Player, Vec3::new(0.0, 0.0, 100.0), 0.0);

        let mut worker = AiWorker::new(init_for(&world), 7);
        let response = worker.handle(AiRequest::update_from_world(&world, 1, 0.05, Some(player), &[a, b]));
        assert_eq!(worker.controller().agent_ids(), vec![a, b]);
        let Some(AiResponse::Commands { commands, .. }) = response else {
            panic!("update must produce commands");
        };
        assert!(commands.iter().all(|c| c.tank_id != bystander));

        world.dispose(a);
        world.purge_disposed();
        worker.handle(AiRequest::update_from_world(&world, 2, 0.05, Some(player), &[a, b]));
        assert_eq!(worker.controller().agent_ids(), vec![b]);
    }

    #[test]
    fn test_spawned_worker_round_trip() {
        let mut world = World::default();
        let player = world.spawn_tank(Faction::Player, Vec3::ZERO, 0.0);
        let bot = world.spawn_tank(Faction::Enemy, Vec3::new(0.0, 0.0, 20.0), 0.0);

        let mut handle = spawn(init_for(&world), 3).unwrap();
        handle
            .post(5, &AiRequest::update_from_world(&world, 5, 0.05, Some(player), &[bot]))
            .unwrap();
        let response = handle.wait_latest(Duration::from_secs(5)).unwrap();
        assert_eq!(response.sequence(), 5);
    }
}
