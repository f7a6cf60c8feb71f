//! Once-per-frame hand-off of finished searches to the simulation

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, trace};

use super::stats::bump;
use super::types::{WorkerEvent, WorkerId, WorkerMsg};
use super::Shared;
use crate::movement::{CalcState, IntThrState};
use crate::world::UnitId;

/// What one `apply_all_new_paths` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub frame: u64,
    /// Workers that reported in for this frame before publishing
    pub workers_done: usize,
    pub applied: usize,
    pub failed: usize,
    /// The wait gave up before enough workers reported
    pub timed_out: bool,
}

/// Result of promoting one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Promotion {
    Applied,
    Failed,
    Skipped,
}

/// Start a new AI frame and refill every worker's budget
pub(crate) fn begin_frame(shared: &Shared, controls: &[Sender<WorkerMsg>]) -> u64 {
    let frame = shared.next_frame();
    bump(&shared.stats.frames);
    for control in controls {
        // a worker that already exited has nothing left to do this frame
        let _ = control.send(WorkerMsg::NewFrame(frame));
    }
    frame
}

/// Wait until `need` distinct workers report for `frame` or the timeout passes
pub(crate) fn wait_for_workers(events: &Receiver<WorkerEvent>, frame: u64, need: usize, timeout: Duration) -> (usize, bool) {
    let deadline = Instant::now() + timeout;
    let mut done: HashSet<WorkerId> = HashSet::new();
    while done.len() < need {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(WorkerEvent::FrameDone { worker, frame: reported }) => {
                // reports from earlier frames are stale
                if reported == frame {
                    done.insert(worker);
                }
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                trace!(frame, done = done.len(), need, "stopped waiting for workers");
                return (done.len(), true);
            }
        }
    }
    (done.len(), false)
}

/// Promote a unit's staging path, or hand back its failure
///
/// Only units the workers marked `Unapplied` are touched, so a unit that got
/// a new command after its result was queued keeps its newer request.
pub(crate) fn apply_unit(shared: &Shared, unit: UnitId) -> Promotion {
    let Some(slot) = shared.slot(unit) else {
        return Promotion::Skipped;
    };
    let promotion = {
        let mut md = slot.lock();
        if md.thread_state != IntThrState::Unapplied || md.deleted {
            return Promotion::Skipped;
        }
        md.thread_state = IntThrState::None;
        match md.calc_state {
            CalcState::ReachedGoal => {
                md.public_path = md.staging_path.take();
                if let Some(action) = md.staged_action.take() {
                    md.action = action;
                }
                Promotion::Applied
            }
            CalcState::Failure => {
                md.staging_path = None;
                md.staged_action = None;
                Promotion::Failed
            }
            CalcState::Working | CalcState::AwaitingNextFrame => Promotion::Skipped,
        }
    };

    // the command layer may call back into the pathfinder
    match promotion {
        Promotion::Applied => {
            bump(&shared.stats.paths_applied);
            shared.sink.issue_next_action(unit);
        }
        Promotion::Failed => shared.sink.cancel_action(unit),
        Promotion::Skipped => {}
    }
    promotion
}

/// Drain the done queue; returns (applied, failed)
pub(crate) fn publish_done(shared: &Shared) -> (usize, usize) {
    let mut applied = 0;
    let mut failed = 0;
    while let Some(unit) = shared.done.pop() {
        match apply_unit(shared, unit) {
            Promotion::Applied => applied += 1,
            Promotion::Failed => failed += 1,
            Promotion::Skipped => {}
        }
    }
    if applied + failed > 0 {
        debug!(applied, failed, "published path results");
    }
    (applied, failed)
}
