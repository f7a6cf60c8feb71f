//! Per-unit pathfinding state
//!
//! A unit's `MovementData` lives behind its own mutex in the pathfinder's
//! registry. The public path and committed action belong to the simulation
//! thread; the staging path belongs to whichever worker is associated with
//! the unit while it is `Processing`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

use crate::pool::types::WorkerId;
use crate::search::node::NodePath;
use crate::search::trace::PreprocessState;
use crate::world::{ActionData, IntPosition, UnitTypeInfo};

/// Where a unit sits in the request pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntThrState {
    None,
    /// Queued, no worker yet
    Waiting,
    /// Owned by a worker
    Processing,
    /// Result ready for the publisher
    Unapplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalcState {
    AwaitingNextFrame,
    Working,
    ReachedGoal,
    Failure,
}

/// Why a worker must drop the unit it is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PopReason {
    NewGoal,
    Cancelled,
    Deleted,
}

/// Coarse progress as reported to the command layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PathState {
    DoesNotExist,
    Working,
    Goal,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTarget {
    Public,
    Staging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandResult {
    /// Request queued or replaced in the queue
    Success,
    /// A worker was told to drop its current search and pick up the new goal
    SuccessDeferred,
    /// The unit type cannot move
    Immobile,
    /// Start and goal are the same cell; nothing to do
    GoalIsStart,
}

/// Cooperative cancellation signal for one unit
///
/// The simulation thread sends reasons while holding the unit's lock; the
/// worker polls between search slices and once more under the lock before
/// publishing, so no signal sent before publication can be missed.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Sender<PopReason>,
    rx: Receiver<PopReason>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl CancelToken {
    pub fn signal(&self, reason: PopReason) {
        // both ends live in this struct, so the channel cannot be disconnected
        let _ = self.tx.send(reason);
    }

    /// Drain pending signals; `Deleted` wins over anything else, otherwise the latest
    pub fn poll(&self) -> Option<PopReason> {
        self.rx.try_iter().fold(None, |acc, reason| match acc {
            Some(PopReason::Deleted) => acc,
            _ => Some(reason),
        })
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

#[derive(Debug)]
pub struct MovementData {
    pub unit_type: UnitTypeInfo,
    pub public_path: Option<NodePath>,
    pub staging_path: Option<NodePath>,
    /// Action the public path serves
    pub action: ActionData,
    /// Action queued for or being computed by a worker
    pub staged_action: Option<ActionData>,
    /// Replacement sent while a worker was busy with `staged_action`
    pub new_action: Option<ActionData>,
    pub thread_state: IntThrState,
    pub calc_state: CalcState,
    pub associated_thread: Option<WorkerId>,
    pub preprocess: PreprocessState,
    pub deleted: bool,
    pub token: CancelToken,
}

impl MovementData {
    pub fn new(unit_type: UnitTypeInfo) -> Self {
        Self {
            unit_type,
            public_path: None,
            staging_path: None,
            action: ActionData::default(),
            staged_action: None,
            new_action: None,
            thread_state: IntThrState::None,
            calc_state: CalcState::ReachedGoal,
            associated_thread: None,
            preprocess: PreprocessState::None,
            deleted: false,
            token: CancelToken::default(),
        }
    }

    pub fn path_state(&self) -> PathState {
        if self.staged_action.is_none() && self.staging_path.is_none() {
            return PathState::DoesNotExist;
        }
        match self.calc_state {
            CalcState::ReachedGoal => PathState::Goal,
            CalcState::Failure => PathState::Error,
            CalcState::Working | CalcState::AwaitingNextFrame => PathState::Working,
        }
    }

    pub fn is_undergoing_path_calc(&self) -> bool {
        matches!(self.thread_state, IntThrState::Waiting | IntThrState::Processing)
    }

    /// Substitute goal of the newest known action
    pub fn changed_goal_pos(&self) -> Option<IntPosition> {
        self.staged_action
            .as_ref()
            .unwrap_or(&self.action)
            .changed_goal_pos
    }

    /// Drop a path; the staging path is left alone while a worker owns it
    pub fn dealloc(&mut self, target: PathTarget) -> bool {
        match target {
            PathTarget::Public => self.public_path.take().is_some(),
            PathTarget::Staging if self.thread_state == IntThrState::Processing => false,
            PathTarget::Staging => self.staging_path.take().is_some(),
        }
    }
}
