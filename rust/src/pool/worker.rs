//! Worker thread loop
//!
//! Each worker owns one `ThreadData` for its whole life and at most one job.
//! It spends a per-frame expansion budget in slices, polling the job's cancel
//! token between slices, and reports to the publisher once per frame when it
//! is out of budget or out of work.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, info, trace};

use super::job::{Job, JobResult, JobStep};
use super::stats::bump;
use super::types::{PauseGate, WorkerEvent, WorkerId, WorkerMsg};
use super::Shared;
use crate::config::PathfindingConfig;
use crate::movement::{CalcState, IntThrState, PopReason};
use crate::search::thread_data::ThreadData;
use crate::search::trace::PreprocessState;

pub(crate) struct Worker {
    id: WorkerId,
    shared: Arc<Shared>,
    control: Receiver<WorkerMsg>,
    events: Sender<WorkerEvent>,
    pause: Arc<PauseGate>,
    frame: u64,
    budget: u32,
    reported: bool,
}

/// Spawn a named worker thread
pub(crate) fn spawn_worker(
    id: WorkerId,
    shared: Arc<Shared>,
    control: Receiver<WorkerMsg>,
    events: Sender<WorkerEvent>,
    pause: Arc<PauseGate>,
) -> io::Result<JoinHandle<()>> {
    let worker = Worker {
        id,
        shared,
        control,
        events,
        pause,
        frame: 0,
        budget: 0,
        reported: true,
    };
    thread::Builder::new().name(id.to_string()).spawn(move || worker.run())
}

enum Control {
    Continue,
    Stop,
}

impl Worker {
    fn run(mut self) {
        let (width, height) = self.shared.world.dimensions();
        let capacity = self.shared.config.load().scanline_capacity(width, height);
        let mut td = ThreadData::new(width, height, capacity);
        let mut job: Option<Job> = None;
        let pause = Arc::clone(&self.pause);
        info!(worker = %self.id, width, height, "pathfinding worker started");

        loop {
            if let Control::Stop = self.drain_control() {
                break;
            }

            let config = self.shared.config.load_full();
            let mut did_work = false;
            if self.budget > 0 {
                let _slice = pause.enter();
                if job.is_none() {
                    job = self.acquire_job(&mut td, &config);
                }
                if let Some(current) = job.take() {
                    job = self.advance(current, &mut td, &config);
                    did_work = true;
                }
            }

            if !did_work {
                self.report_frame_done();
                match self.control.recv_timeout(Duration::from_millis(config.idle_sleep_ms)) {
                    Ok(msg) => {
                        if let Control::Stop = self.handle(msg) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        if let Some(current) = job {
            self.requeue_on_shutdown(current);
        }
        info!(worker = %self.id, "pathfinding worker stopped");
    }

    fn drain_control(&mut self) -> Control {
        loop {
            match self.control.try_recv() {
                Ok(msg) => {
                    if let Control::Stop = self.handle(msg) {
                        return Control::Stop;
                    }
                }
                Err(TryRecvError::Empty) => return Control::Continue,
                Err(TryRecvError::Disconnected) => return Control::Stop,
            }
        }
    }

    fn handle(&mut self, msg: WorkerMsg) -> Control {
        match msg {
            WorkerMsg::NewFrame(frame) => {
                self.frame = frame;
                self.budget = self.shared.config.load().max_calculations_per_frame;
                self.reported = false;
                Control::Continue
            }
            WorkerMsg::Shutdown => Control::Stop,
        }
    }

    fn report_frame_done(&mut self) {
        if self.reported || self.frame == 0 {
            return;
        }
        self.reported = true;
        trace!(worker = %self.id, frame = self.frame, budget_left = self.budget, "frame done");
        // the publisher may already be gone during shutdown
        let _ = self.events.send(WorkerEvent::FrameDone { worker: self.id, frame: self.frame });
    }

    /// Pop queued units until one is still waiting for a worker
    fn acquire_job(&self, td: &mut ThreadData, config: &PathfindingConfig) -> Option<Job> {
        while let Some(unit) = self.shared.queue.pop() {
            let Some(slot) = self.shared.slot(unit) else {
                continue;
            };
            let claimed = {
                let mut md = slot.lock();
                if md.thread_state != IntThrState::Waiting || md.deleted {
                    continue;
                }
                let staged = md.staged_action;
                match staged {
                    Some(action) => {
                        md.token.clear();
                        md.thread_state = IntThrState::Processing;
                        md.associated_thread = Some(self.id);
                        md.calc_state = CalcState::Working;
                        md.preprocess = PreprocessState::None;
                        md.staging_path = None;
                        Some((md.unit_type, action, md.token.clone()))
                    }
                    None => {
                        md.thread_state = IntThrState::None;
                        None
                    }
                }
            };
            let Some((unit_type, action, token)) = claimed else {
                continue;
            };
            debug!(worker = %self.id, unit = %unit, start = ?action.start_pos, goal = ?action.goal.pos, "picked up path request");
            return Some(Job::start(unit, slot, token, unit_type, action, td, &self.shared, config));
        }
        None
    }

    /// Run one slice of the current job; `None` once the unit is released
    fn advance(&mut self, mut job: Job, td: &mut ThreadData, config: &PathfindingConfig) -> Option<Job> {
        if let Some(reason) = job.poll_cancel() {
            self.pop_unit(job, reason);
            return None;
        }
        if job.waiting_for_frame {
            job.waiting_for_frame = false;
            job.slot.lock().calc_state = CalcState::Working;
        }

        let slice = self.budget.min(config.cancel_check_interval);
        match job.step(td, &self.shared, config, slice) {
            JobStep::Yielded { expanded } => {
                self.budget = self.budget.saturating_sub(expanded.max(1));
                debug_log!("{}: unit {} yielded after {} expansions, {} left", self.id, job.unit, expanded, self.budget);
                if self.budget == 0 {
                    job.waiting_for_frame = true;
                    job.slot.lock().calc_state = CalcState::AwaitingNextFrame;
                }
                Some(job)
            }
            JobStep::Finished { result, expanded } => {
                self.budget = self.budget.saturating_sub(expanded);
                self.publish(job, result);
                None
            }
        }
    }

    /// Move the result into the staging path and hand the unit to the publisher
    fn publish(&self, job: Job, result: JobResult) {
        let mut md = job.slot.lock();
        // last look under the lock; nothing signalled before this can be missed
        if let Some(reason) = job.poll_cancel() {
            drop(md);
            self.pop_unit(job, reason);
            return;
        }
        if md.deleted {
            drop(md);
            self.release_deleted(&job);
            return;
        }

        match result {
            JobResult::Path { path, changed_goal_pos } => {
                if let Some(action) = md.staged_action.as_mut() {
                    action.changed_goal_pos = changed_goal_pos;
                }
                md.staging_path = Some(path);
                md.calc_state = CalcState::ReachedGoal;
            }
            JobResult::Failed => {
                md.staging_path = None;
                md.calc_state = CalcState::Failure;
            }
        }
        md.thread_state = IntThrState::Unapplied;
        md.associated_thread = None;
        drop(md);
        self.shared.done.push(job.unit);
    }

    /// Release the unit for the reason polled from its token
    ///
    /// Signals that arrive between the poll and taking the lock supersede it,
    /// and a redirect whose new action was cleared since is a cancel.
    fn pop_unit(&self, job: Job, polled: PopReason) {
        let mut md = job.slot.lock();
        let mut reason = match job.poll_cancel() {
            Some(later) if polled != PopReason::Deleted => later,
            _ => polled,
        };
        if reason == PopReason::NewGoal && md.new_action.is_none() {
            reason = PopReason::Cancelled;
        }
        if reason == PopReason::Deleted || md.deleted {
            drop(md);
            self.release_deleted(&job);
            return;
        }

        md.staging_path = None;
        md.associated_thread = None;
        md.preprocess = PreprocessState::None;
        match reason {
            PopReason::NewGoal => {
                md.staged_action = md.new_action.take();
                md.thread_state = IntThrState::Waiting;
                md.calc_state = CalcState::Working;
                drop(md);
                debug!(worker = %self.id, unit = %job.unit, "goal changed mid-search, requeued");
                bump(&self.shared.stats.new_goal_requeues);
                self.shared.queue.push(job.unit);
            }
            PopReason::Cancelled => {
                md.staged_action = None;
                md.new_action = None;
                md.thread_state = IntThrState::None;
                md.calc_state = CalcState::Failure;
                drop(md);
                debug!(worker = %self.id, unit = %job.unit, "search cancelled");
                bump(&self.shared.stats.cancellations);
            }
            PopReason::Deleted => {}
        }
    }

    fn release_deleted(&self, job: &Job) {
        self.shared.units.remove(&job.unit);
        bump(&self.shared.stats.deletions);
        debug!(worker = %self.id, unit = %job.unit, "released deleted unit");
        self.shared.sink.unit_freed(job.unit);
    }

    /// Put an unfinished job back in the queue so a later pool picks it up
    fn requeue_on_shutdown(&self, job: Job) {
        let mut md = job.slot.lock();
        if let Some(reason) = job.poll_cancel() {
            drop(md);
            self.pop_unit(job, reason);
            return;
        }
        md.staging_path = None;
        md.associated_thread = None;
        md.preprocess = PreprocessState::None;
        md.thread_state = IntThrState::Waiting;
        md.calc_state = CalcState::Working;
        drop(md);
        self.shared.queue.push(job.unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::CommandResult;
    use crate::pool::Pathfinder;
    use crate::world::{GridWorld, IntPosition, MovementType, NullSink, UnitAction, UnitId, UnitTypeInfo};
    use crossbeam_channel::unbounded;

    fn pos(x: i32, y: i32) -> IntPosition {
        IntPosition::new(x, y)
    }

    /// A pathfinder without threads plus a worker driven by hand
    fn setup() -> (Pathfinder, Worker, UnitId) {
        let pf = Pathfinder::new(Arc::new(GridWorld::new(32, 32)), Arc::new(NullSink), PathfindingConfig::default()).unwrap();
        let unit = UnitId::new();
        pf.register_unit(unit, UnitTypeInfo::new(1, MovementType::Human, true));

        let (_, control) = unbounded();
        let (events, _) = unbounded();
        let worker = Worker {
            id: WorkerId(0),
            shared: Arc::clone(&pf.shared),
            control,
            events,
            pause: Arc::new(PauseGate::default()),
            frame: 1,
            budget: 100,
            reported: false,
        };
        (pf, worker, unit)
    }

    fn goto(pf: &Pathfinder, unit: UnitId, goal: IntPosition) -> CommandResult {
        pf.command_pathfinding(unit, pos(0, 0), goal, UnitAction::Goto, None, None).unwrap()
    }

    fn claim(worker: &Worker) -> Job {
        let config = worker.shared.config.load_full();
        let mut td = ThreadData::new(32, 32, config.scanline_capacity(32, 32));
        worker.acquire_job(&mut td, &config).unwrap()
    }

    fn staged_goal(pf: &Pathfinder, unit: UnitId) -> Option<IntPosition> {
        pf.shared.slot(unit)?.lock().staged_action.map(|action| action.goal.pos)
    }

    #[test]
    fn test_cancel_after_redirect_poll_is_not_lost() {
        let (pf, worker, unit) = setup();
        goto(&pf, unit, pos(31, 31));
        let job = claim(&worker);

        assert_eq!(goto(&pf, unit, pos(20, 5)), CommandResult::SuccessDeferred);
        let polled = job.poll_cancel().unwrap();
        assert_eq!(polled, PopReason::NewGoal);
        assert!(pf.cancel_pathfinding(unit));
        worker.pop_unit(job, polled);

        assert_eq!(pf.thread_state(unit), Some(IntThrState::None));
        assert_eq!(pf.calc_state(unit), Some(CalcState::Failure));
        assert_eq!(staged_goal(&pf, unit), None);
        assert_eq!(pf.queue_size(), 0);
        let stats = pf.stats();
        assert_eq!(stats.cancellations, 1);
        assert_eq!(stats.new_goal_requeues, 0);
    }

    #[test]
    fn test_redirect_after_cancel_poll_is_requeued() {
        let (pf, worker, unit) = setup();
        goto(&pf, unit, pos(31, 31));
        let job = claim(&worker);

        assert!(pf.cancel_pathfinding(unit));
        let polled = job.poll_cancel().unwrap();
        assert_eq!(polled, PopReason::Cancelled);
        assert_eq!(goto(&pf, unit, pos(20, 5)), CommandResult::SuccessDeferred);
        worker.pop_unit(job, polled);

        assert_eq!(pf.thread_state(unit), Some(IntThrState::Waiting));
        assert_eq!(staged_goal(&pf, unit), Some(pos(20, 5)));
        assert_eq!(pf.queue_size(), 1);
        assert_eq!(pf.stats().cancellations, 0);
    }

    #[test]
    fn test_delete_after_redirect_poll_releases_unit() {
        let (pf, worker, unit) = setup();
        goto(&pf, unit, pos(31, 31));
        let job = claim(&worker);

        goto(&pf, unit, pos(20, 5));
        let polled = job.poll_cancel().unwrap();
        assert!(pf.delete_unit(unit));
        worker.pop_unit(job, polled);

        assert_eq!(pf.thread_state(unit), None);
        assert_eq!(pf.queue_size(), 0);
        assert_eq!(pf.stats().deletions, 1);
    }

    #[test]
    fn test_shutdown_keeps_redirect_sent_after_last_slice() {
        let (pf, worker, unit) = setup();
        goto(&pf, unit, pos(31, 31));
        let job = claim(&worker);

        goto(&pf, unit, pos(20, 5));
        worker.requeue_on_shutdown(job);

        assert_eq!(pf.thread_state(unit), Some(IntThrState::Waiting));
        assert_eq!(staged_goal(&pf, unit), Some(pos(20, 5)));
        assert_eq!(pf.stats().new_goal_requeues, 1);
    }
}
