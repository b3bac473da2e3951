//! Background workers for the offloaded AI and collision variants
//!
//! Each worker is a named OS thread that owns its own spatial index and
//! talks to the tick loop only through bincode frames on crossbeam
//! channels. The tick loop never waits on a worker: it polls for the
//! response to its most recent snapshot and carries on without one if
//! nothing has arrived.

pub mod ai_worker;
pub mod collision_worker;
pub mod protocol;

use std::marker::PhantomData;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use protocol::{decode, encode, ProtocolError, Sequenced};

/// Raw frame channel ends handed to a worker thread
pub type FrameReceiver = Receiver<Vec<u8>>;
pub type FrameSender = Sender<Vec<u8>>;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to spawn worker '{name}': {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("worker '{0}' disconnected")]
    Disconnected(&'static str),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Tick-loop side of a worker thread
pub struct WorkerHandle<Req, Resp> {
    name: &'static str,
    requests: Option<FrameSender>,
    responses: FrameReceiver,
    thread: Option<JoinHandle<()>>,
    /// Sequence of the most recent snapshot posted
    last_sent: Option<u64>,
    stale_dropped: u64,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> WorkerHandle<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + Sequenced,
{
    /// Start `run` on a named thread with fresh request/response channels
    pub fn spawn<F>(name: &'static str, run: F) -> Result<Self, WorkerError>
    where
        F: FnOnce(FrameReceiver, FrameSender) + Send + 'static,
    {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(request_rx, response_tx))
            .map_err(|source| WorkerError::Spawn { name, source })?;

        info!("Started {} thread", name);

        Ok(Self {
            name,
            requests: Some(request_tx),
            responses: response_rx,
            thread: Some(thread),
            last_sent: None,
            stale_dropped: 0,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Encode and send a request without touching the sequence guard
    pub fn send(&self, request: &Req) -> Result<(), WorkerError> {
        let frame = encode(request)?;
        self.requests
            .as_ref()
            .ok_or(WorkerError::Disconnected(self.name))?
            .send(frame)
            .map_err(|_| WorkerError::Disconnected(self.name))
    }

    /// Send a snapshot and make `sequence` the only acceptable response
    pub fn post(&mut self, sequence: u64, request: &Req) -> Result<(), WorkerError> {
        self.last_sent = Some(sequence);
        self.send(request)
    }

    /// Drain pending responses and return the one answering the latest
    /// snapshot, if it has arrived. Older responses are counted and dropped.
    pub fn poll_latest(&mut self) -> Option<Resp> {
        let frames: Vec<Vec<u8>> = self.responses.try_iter().collect();
        let mut latest = None;
        for frame in frames {
            if let Some(response) = self.accept(&frame) {
                latest = Some(response);
            }
        }
        latest
    }

    /// Block up to `timeout` for the response to the latest snapshot
    pub fn wait_latest(&mut self, timeout: Duration) -> Option<Resp> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(frame) => {
                    if let Some(response) = self.accept(&frame) {
                        return Some(response);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn accept(&mut self, frame: &[u8]) -> Option<Resp> {
        let response: Resp = match decode(frame) {
            Ok(r) => r,
            Err(e) => {
                warn!("Dropping undecodable frame from {}: {}", self.name, e);
                return None;
            }
        };

        if Some(response.sequence()) == self.last_sent {
            Some(response)
        } else {
            self.stale_dropped += 1;
            debug!(
                "Dropping stale {} response {} (latest {:?})",
                self.name,
                response.sequence(),
                self.last_sent
            );
            None
        }
    }

    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    /// Responses discarded because a newer snapshot had been posted
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<Req, Resp> Drop for WorkerHandle<Req, Resp> {
    fn drop(&mut self) {
        // Closing the request channel ends the worker's receive loop
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("{} thread panicked", self.name);
            }
        }
    }
}

/// Shared receive loop: decode each frame, hand it to `handle`, send back
/// whatever it returns. Stops on `is_shutdown` or when either channel
/// closes.
pub(crate) fn serve<Req, Resp, H>(
    name: &'static str,
    requests: FrameReceiver,
    responses: FrameSender,
    is_shutdown: fn(&Req) -> bool,
    mut handle: H,
) where
    Req: DeserializeOwned,
    Resp: Serialize,
    H: FnMut(Req) -> Option<Resp>,
{
    for frame in requests.iter() {
        let request: Req = match decode(&frame) {
            Ok(r) => r,
            Err(e) => {
                warn!("{} dropping undecodable request: {}", name, e);
                continue;
            }
        };
        if is_shutdown(&request) {
            break;
        }

        let Some(response) = handle(request) else {
            continue;
        };
        match encode(&response) {
            Ok(frame) => {
                if responses.send(frame).is_err() {
                    break;
                }
            }
            Err(e) => warn!("{} failed to encode response: {}", name, e),
        }
    }
    debug!("{} stopped", name);
}
