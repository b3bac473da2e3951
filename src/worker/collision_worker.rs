//! Offloaded broad phase
//!
//! Keeps its own static and dynamic object sets, rebuilt from snapshots,
//! and answers each update with the pairs found. Resolution stays on the
//! main tick.

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::game::entity::EntityId;
use crate::game::systems::collision::BroadPhase;

use super::protocol::{decode, CollisionRequest, CollisionResponse, ObjectSnapshot, WorldInit};
use super::{serve, FrameReceiver, FrameSender, WorkerError, WorkerHandle};

pub type CollisionWorkerHandle = WorkerHandle<CollisionRequest, CollisionResponse>;

pub const THREAD_NAME: &str = "collision-worker";

/// Worker-side state
pub struct CollisionWorker {
    broad_phase: BroadPhase,
    static_objects: HashMap<EntityId, ObjectSnapshot>,
    dynamic_objects: HashMap<EntityId, ObjectSnapshot>,
}

impl CollisionWorker {
    pub fn new(init: WorldInit) -> Self {
        Self {
            broad_phase: BroadPhase::new(
                init.world_boundary,
                init.max_objects_per_node as usize,
                init.max_depth,
            ),
            static_objects: HashMap::new(),
            dynamic_objects: HashMap::new(),
        }
    }

    pub fn static_count(&self) -> usize {
        self.static_objects.len()
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamic_objects.len()
    }

    /// Handle one request. Full and dynamic updates produce a response.
    pub fn handle(&mut self, request: CollisionRequest) -> Option<CollisionResponse> {
        match request {
            CollisionRequest::Init(init) => {
                debug!("Collision worker re-initialised with {:?}", init.world_boundary);
                *self = Self::new(init);
                None
            }
            CollisionRequest::FullUpdate {
                sequence,
                static_objects,
                dynamic_objects,
            } => {
                self.static_objects = by_id(static_objects);
                self.dynamic_objects = by_id(dynamic_objects);
                Some(self.detect(sequence))
            }
            CollisionRequest::DynamicUpdate {
                sequence,
                dynamic_objects,
            } => {
                self.dynamic_objects = by_id(dynamic_objects);
                Some(self.detect(sequence))
            }
            CollisionRequest::ObjectBecameStatic { mut object } => {
                self.dynamic_objects.remove(&object.id);
                object.is_static = true;
                self.static_objects.insert(object.id, object);
                None
            }
            CollisionRequest::Shutdown => None,
        }
    }

    fn detect(&mut self, sequence: u64) -> CollisionResponse {
        // A dynamic snapshot wins over a stale static copy of the same id
        let statics = self
            .static_objects
            .values()
            .filter(|s| !self.dynamic_objects.contains_key(&s.id));
        self.broad_phase.rebuild(statics.chain(self.dynamic_objects.values()));

        CollisionResponse::Collisions {
            sequence,
            pairs: self.broad_phase.detect(),
        }
    }
}

fn by_id(objects: Vec<ObjectSnapshot>) -> HashMap<EntityId, ObjectSnapshot> {
    objects.into_iter().map(|o| (o.id, o)).collect()
}

fn run(requests: FrameReceiver, responses: FrameSender) {
    let init = loop {
        let Ok(frame) = requests.recv() else {
            return;
        };
        match decode::<CollisionRequest>(&frame) {
            Ok(CollisionRequest::Init(init)) => break init,
            Ok(CollisionRequest::Shutdown) => return,
            Ok(_) => debug!("Collision worker ignoring request before init"),
            Err(e) => warn!("Collision worker dropping undecodable request: {}", e),
        }
    };

    let mut worker = CollisionWorker::new(init);
    info!("Collision worker ready");
    serve(
        THREAD_NAME,
        requests,
        responses,
        |r: &CollisionRequest| matches!(r, CollisionRequest::Shutdown),
        |request| worker.handle(request),
    );
}

/// Start the collision worker and send it its world parameters
pub fn spawn(init: WorldInit) -> Result<CollisionWorkerHandle, WorkerError> {
    let handle = WorkerHandle::spawn(THREAD_NAME, run)?;
    handle.send(&CollisionRequest::Init(init))?;
    Ok(handle)
}
