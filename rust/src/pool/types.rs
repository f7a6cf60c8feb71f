use std::fmt;

use parking_lot::{Condvar, Mutex};

/// Index of a worker thread in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pathfinding-worker-{}", self.0)
    }
}

/// Control messages from the simulation thread to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMsg {
    /// A new AI frame started; the expansion budget is refilled
    NewFrame(u64),
    Shutdown,
}

/// Reports from workers to the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The worker spent its budget or ran out of work for `frame`
    FrameDone { worker: WorkerId, frame: u64 },
}

#[derive(Debug, Default)]
struct GateState {
    pauses: u32,
    busy: bool,
}

/// Lets the simulation thread hold a worker between search slices
#[derive(Debug, Default)]
pub(crate) struct PauseGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl PauseGate {
    /// Worker side: wait out any pause, then mark a slice as running
    pub fn enter(&self) -> SliceGuard<'_> {
        let mut state = self.state.lock();
        while state.pauses > 0 {
            self.changed.wait(&mut state);
        }
        state.busy = true;
        SliceGuard { gate: self }
    }

    /// Block new slices and wait for the running one to end
    pub fn pause(&self) {
        let mut state = self.state.lock();
        state.pauses += 1;
        while state.busy {
            self.changed.wait(&mut state);
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.pauses = state.pauses.saturating_sub(1);
        self.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().pauses > 0
    }
}

pub(crate) struct SliceGuard<'a> {
    gate: &'a PauseGate,
}

impl Drop for SliceGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.busy = false;
        self.gate.changed.notify_all();
    }
}
