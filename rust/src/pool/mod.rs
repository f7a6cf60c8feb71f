//! Worker pool and the `Pathfinder` facade
//!
//! The simulation thread talks to the pool only through `Pathfinder`.
//! Requests go through a shared FIFO of unit ids; each worker owns one unit
//! at a time and hands finished units back through a done queue that
//! `apply_all_new_paths` drains once per frame.
//!
//! Lock order: worker pause gate, unit slot, registry shard, area maps,
//! heuristic table. Registry shards are only held long enough to clone a
//! slot.

pub mod publisher;
pub mod stats;
pub mod types;

mod job;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::PathfindingConfig;
use crate::error::PathError;
use crate::movement::{CalcState, CommandResult, IntThrState, MovementData, PathState, PathTarget, PopReason};
use crate::search::node::NodePath;
use crate::search::trace::PreprocessState;
use crate::storage::area_map::AreaMaps;
use crate::storage::heuristic_table::HeuristicTable;
use crate::world::{ActionArg, ActionData, CommandSink, IntPosition, UnitAction, UnitGoal, UnitId, UnitTypeInfo, World};
use publisher::{apply_unit, begin_frame, publish_done, wait_for_workers, ApplyReport, Promotion};
use stats::{bump, PathStats, StatsSnapshot};
use types::{PauseGate, WorkerEvent, WorkerId, WorkerMsg};
use worker::spawn_worker;

/// State reachable from every worker
pub(crate) struct Shared {
    pub world: Arc<dyn World>,
    pub sink: Arc<dyn CommandSink>,
    pub units: DashMap<UnitId, Arc<Mutex<MovementData>>>,
    /// Units waiting for a worker, oldest first
    pub queue: SegQueue<UnitId>,
    /// Units whose result waits for the publisher
    pub done: SegQueue<UnitId>,
    pub area_maps: AreaMaps,
    pub heuristics: HeuristicTable,
    pub config: ArcSwap<PathfindingConfig>,
    pub stats: PathStats,
    frame: AtomicU64,
}

impl Shared {
    pub(crate) fn new(world: Arc<dyn World>, sink: Arc<dyn CommandSink>, config: PathfindingConfig) -> Self {
        let (width, height) = world.dimensions();
        Self {
            world,
            sink,
            units: DashMap::new(),
            queue: SegQueue::new(),
            done: SegQueue::new(),
            area_maps: AreaMaps::new(width, height),
            heuristics: HeuristicTable::new(width, height),
            config: ArcSwap::from_pointee(config),
            stats: PathStats::default(),
            frame: AtomicU64::new(0),
        }
    }

    /// Clone a unit's slot out of the registry without holding the shard
    pub(crate) fn slot(&self, unit: UnitId) -> Option<Arc<Mutex<MovementData>>> {
        self.units.get(&unit).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn next_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::SeqCst)
    }
}

struct WorkerHandle {
    id: WorkerId,
    pause: Arc<PauseGate>,
    thread: Option<JoinHandle<()>>,
}

struct PoolRuntime {
    controls: Vec<Sender<WorkerMsg>>,
    workers: Vec<WorkerHandle>,
    events: Receiver<WorkerEvent>,
}

impl PoolRuntime {
    fn shutdown(&mut self) {
        for control in &self.controls {
            let _ = control.send(WorkerMsg::Shutdown);
        }
        for handle in &mut self.workers {
            if let Some(thread) = handle.thread.take() {
                if thread.join().is_err() {
                    error!(worker = %handle.id, "pathfinding worker panicked");
                }
            }
        }
    }
}

/// Holds one or more workers between search slices; dropping it resumes them
#[must_use = "workers resume as soon as the guard is dropped"]
pub struct PauseGuard {
    gates: Vec<Arc<PauseGate>>,
}

impl PauseGuard {
    pub fn worker_count(&self) -> usize {
        self.gates.len()
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        for gate in &self.gates {
            gate.resume();
        }
    }
}

/// Asynchronous multi-worker pathfinder
pub struct Pathfinder {
    shared: Arc<Shared>,
    runtime: Mutex<Option<PoolRuntime>>,
}

impl Pathfinder {
    pub fn new(world: Arc<dyn World>, sink: Arc<dyn CommandSink>, config: PathfindingConfig) -> Result<Self, PathError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(world, sink, config)),
            runtime: Mutex::new(None),
        })
    }

    /// Give a unit its pathfinding state; re-registering keeps the old state
    pub fn register_unit(&self, unit: UnitId, unit_type: UnitTypeInfo) {
        self.shared
            .units
            .entry(unit)
            .or_insert_with(|| Arc::new(Mutex::new(MovementData::new(unit_type))));
    }

    fn slot(&self, unit: UnitId) -> Result<Arc<Mutex<MovementData>>, PathError> {
        self.shared.slot(unit).ok_or(PathError::UnknownUnit(unit))
    }

    /// Queue a path request, or replace the one the unit already has
    ///
    /// An action missing its target or argument is downgraded to a plain
    /// move. A unit that a worker is busy with gets the new request once the
    /// worker notices, which `SuccessDeferred` reports.
    pub fn command_pathfinding(
        &self,
        unit: UnitId,
        start: IntPosition,
        goal: IntPosition,
        action: UnitAction,
        target: Option<UnitId>,
        arg: Option<ActionArg>,
    ) -> Result<CommandResult, PathError> {
        let slot = self.slot(unit)?;
        let mut md = slot.lock();
        if md.deleted {
            return Err(PathError::UnitDeleted(unit));
        }
        if !md.unit_type.is_mobile {
            return Ok(CommandResult::Immobile);
        }
        if start == goal {
            return Ok(CommandResult::GoalIsStart);
        }

        let (action, target, arg) = match action.check(target, arg.as_ref()) {
            Ok(()) => (action, target, arg),
            Err(err) => {
                warn!(unit = %unit, %err, "incomplete command, falling back to a plain move");
                (UnitAction::Goto, None, None)
            }
        };
        let data = ActionData {
            start_pos: start,
            goal: UnitGoal { target, pos: goal },
            changed_goal_pos: None,
            arg,
            action,
        };
        debug!(unit = %unit, ?start, ?goal, ?action, state = ?md.thread_state, "path requested");

        match md.thread_state {
            IntThrState::Processing => {
                md.new_action = Some(data);
                md.token.signal(PopReason::NewGoal);
                Ok(CommandResult::SuccessDeferred)
            }
            IntThrState::Waiting => {
                md.staged_action = Some(data);
                Ok(CommandResult::Success)
            }
            IntThrState::None | IntThrState::Unapplied => {
                md.staged_action = Some(data);
                md.new_action = None;
                md.staging_path = None;
                md.preprocess = PreprocessState::None;
                md.calc_state = CalcState::Working;
                md.thread_state = IntThrState::Waiting;
                drop(md);
                self.shared.queue.push(unit);
                Ok(CommandResult::Success)
            }
        }
    }

    pub fn get_internal_path_state(&self, unit: UnitId) -> PathState {
        self.shared
            .slot(unit)
            .map_or(PathState::DoesNotExist, |slot| slot.lock().path_state())
    }

    /// Run one AI frame: wake the workers, wait for them, publish results
    pub fn apply_all_new_paths(&self) -> ApplyReport {
        let config = self.shared.config.load_full();
        let (frame, workers_done, timed_out) = {
            let runtime = self.runtime.lock();
            match runtime.as_ref() {
                Some(rt) => {
                    let frame = begin_frame(&self.shared, &rt.controls);
                    let count = rt.controls.len();
                    let need = match config.min_workers_done {
                        0 => count,
                        min => min.min(count),
                    };
                    let timeout = Duration::from_millis(config.frame_wait_timeout_ms);
                    let (done, timed_out) = wait_for_workers(&rt.events, frame, need, timeout);
                    (frame, done, timed_out)
                }
                None => (begin_frame(&self.shared, &[]), 0, false),
            }
        };

        let (applied, failed) = publish_done(&self.shared);
        ApplyReport { frame, workers_done, applied, failed, timed_out }
    }

    /// Promote one unit's finished path now instead of at the next frame
    pub fn apply_new_path(&self, unit: UnitId) -> bool {
        apply_unit(&self.shared, unit) == Promotion::Applied
    }

    pub fn dealloc_pathfinding_nodes(&self, unit: UnitId, target: PathTarget) -> bool {
        self.shared.slot(unit).is_some_and(|slot| slot.lock().dealloc(target))
    }

    /// Forget the path the unit is following
    pub fn quit_current_path(&self, unit: UnitId) -> bool {
        match self.shared.slot(unit) {
            Some(slot) => {
                slot.lock().dealloc(PathTarget::Public);
                true
            }
            None => false,
        }
    }

    pub fn is_undergoing_path_calc(&self, unit: UnitId) -> bool {
        self.shared
            .slot(unit)
            .is_some_and(|slot| slot.lock().is_undergoing_path_calc())
    }

    /// Stop any pending calculation; the command layer is not notified
    pub fn cancel_pathfinding(&self, unit: UnitId) -> bool {
        let Some(slot) = self.shared.slot(unit) else {
            return false;
        };
        let mut md = slot.lock();
        match md.thread_state {
            IntThrState::Processing => {
                md.new_action = None;
                md.token.signal(PopReason::Cancelled);
            }
            IntThrState::Waiting | IntThrState::Unapplied => {
                md.staged_action = None;
                md.new_action = None;
                md.staging_path = None;
                md.thread_state = IntThrState::None;
                md.calc_state = CalcState::Failure;
                bump(&self.shared.stats.cancellations);
            }
            IntThrState::None => {}
        }
        true
    }

    /// Drop a unit; a worker holding it releases it at its next check
    ///
    /// `CommandSink::unit_freed` fires once the unit is gone, possibly on a
    /// worker thread.
    pub fn delete_unit(&self, unit: UnitId) -> bool {
        let Some(slot) = self.shared.slot(unit) else {
            return false;
        };
        let mut md = slot.lock();
        if md.deleted {
            return true;
        }
        md.deleted = true;
        if md.thread_state == IntThrState::Processing {
            md.token.signal(PopReason::Deleted);
            debug!(unit = %unit, "delete deferred until the worker lets go");
            return true;
        }
        drop(md);

        self.shared.units.remove(&unit);
        bump(&self.shared.stats.deletions);
        self.shared.sink.unit_freed(unit);
        true
    }

    pub fn init_pathfinding_threading(&self) -> Result<(), PathError> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Err(PathError::AlreadyRunning);
        }

        let config = self.shared.config.load_full();
        let (event_tx, event_rx) = unbounded();
        let mut pool = PoolRuntime {
            controls: Vec::with_capacity(config.worker_count),
            workers: Vec::with_capacity(config.worker_count),
            events: event_rx,
        };
        for n in 0..config.worker_count {
            let id = WorkerId(n);
            let (control_tx, control_rx) = unbounded();
            let pause = Arc::new(PauseGate::default());
            match spawn_worker(id, Arc::clone(&self.shared), control_rx, event_tx.clone(), Arc::clone(&pause)) {
                Ok(thread) => {
                    pool.controls.push(control_tx);
                    pool.workers.push(WorkerHandle { id, pause, thread: Some(thread) });
                }
                Err(err) => {
                    error!(worker = %id, %err, "failed to spawn pathfinding worker");
                    pool.shutdown();
                    return Err(PathError::Spawn(err));
                }
            }
        }

        info!(workers = config.worker_count, queued = self.shared.queue.len(), "pathfinding threads started");
        *runtime = Some(pool);
        Ok(())
    }

    /// Stop and join every worker; unfinished requests stay queued
    pub fn quit_pathfinding_threading(&self) -> Result<(), PathError> {
        let Some(mut pool) = self.runtime.lock().take() else {
            return Err(PathError::NotRunning);
        };
        pool.shutdown();
        info!(queued = self.shared.queue.len(), "pathfinding threads stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    fn gates(&self, worker: Option<WorkerId>) -> Vec<Arc<PauseGate>> {
        self.runtime.lock().as_ref().map_or_else(Vec::new, |pool| {
            pool.workers
                .iter()
                .filter(|handle| worker.map_or(true, |id| handle.id == id))
                .map(|handle| Arc::clone(&handle.pause))
                .collect()
        })
    }

    /// Hold every worker between slices until the guard is dropped
    pub fn pause_pathfinding(&self) -> PauseGuard {
        let gates = self.gates(None);
        for gate in &gates {
            gate.pause();
        }
        PauseGuard { gates }
    }

    /// Hold only the worker currently computing `unit`'s path, if any
    pub fn pause_unit_owner(&self, unit: UnitId) -> Option<PauseGuard> {
        let owner = self.shared.slot(unit)?.lock().associated_thread?;
        let gates = self.gates(Some(owner));
        if gates.is_empty() {
            return None;
        }
        for gate in &gates {
            gate.pause();
        }
        Some(PauseGuard { gates })
    }

    pub fn resume_pathfinding(&self, guard: PauseGuard) {
        drop(guard);
    }

    /// Record an immobile unit in the area maps; mobile units never block areas
    pub fn add_unit_to_area_map(&self, unit_type: &UnitTypeInfo, pos: IntPosition) {
        if unit_type.is_mobile {
            return;
        }
        self.shared.area_maps.unit_added(&unit_type.footprint_at(pos));
    }

    /// Undo `add_unit_to_area_map`; the world must no longer report the unit
    pub fn delete_unit_from_area_map(&self, unit_type: &UnitTypeInfo, pos: IntPosition) {
        if unit_type.is_mobile {
            return;
        }
        self.shared
            .area_maps
            .unit_removed(&*self.shared.world, &unit_type.footprint_at(pos));
    }

    pub fn public_path(&self, unit: UnitId) -> Option<NodePath> {
        self.shared.slot(unit)?.lock().public_path.clone()
    }

    pub fn staging_path(&self, unit: UnitId) -> Option<NodePath> {
        self.shared.slot(unit)?.lock().staging_path.clone()
    }

    /// The action the public path belongs to
    pub fn committed_action(&self, unit: UnitId) -> Option<ActionData> {
        Some(self.shared.slot(unit)?.lock().action)
    }

    pub fn calc_state(&self, unit: UnitId) -> Option<CalcState> {
        Some(self.shared.slot(unit)?.lock().calc_state)
    }

    pub fn thread_state(&self, unit: UnitId) -> Option<IntThrState> {
        Some(self.shared.slot(unit)?.lock().thread_state)
    }

    pub fn changed_goal_pos(&self, unit: UnitId) -> Option<IntPosition> {
        self.shared.slot(unit)?.lock().changed_goal_pos()
    }

    pub fn preprocess_state(&self, unit: UnitId) -> Option<PreprocessState> {
        Some(self.shared.slot(unit)?.lock().preprocess)
    }

    /// Queue entries, including ones left behind by replaced requests
    pub fn queue_size(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn frame(&self) -> u64 {
        self.shared.current_frame()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> Arc<PathfindingConfig> {
        self.shared.config.load_full()
    }

    /// Swap in new tunables; workers pick them up at their next frame
    pub fn update_config(&self, config: PathfindingConfig) -> Result<(), PathError> {
        config.validate()?;
        info!(?config, "pathfinding config updated");
        self.shared.config.store(Arc::new(config));
        Ok(())
    }

    pub fn area_maps(&self) -> &AreaMaps {
        &self.shared.area_maps
    }

    pub fn heuristics(&self) -> &HeuristicTable {
        &self.shared.heuristics
    }
}

impl Drop for Pathfinder {
    fn drop(&mut self) {
        if let Some(mut pool) = self.runtime.get_mut().take() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::world::{GridWorld, MovementType, Terrain};

    #[derive(Default)]
    struct RecordingSink {
        issued: Mutex<Vec<UnitId>>,
        cancelled: Mutex<Vec<UnitId>>,
        freed: Mutex<Vec<UnitId>>,
    }

    impl CommandSink for RecordingSink {
        fn cancel_action(&self, unit: UnitId) {
            self.cancelled.lock().push(unit);
        }

        fn issue_next_action(&self, unit: UnitId) {
            self.issued.lock().push(unit);
        }

        fn unit_freed(&self, unit: UnitId) {
            self.freed.lock().push(unit);
        }
    }

    fn human() -> UnitTypeInfo {
        UnitTypeInfo::new(1, MovementType::Human, true)
    }

    fn pos(x: i32, y: i32) -> IntPosition {
        IntPosition::new(x, y)
    }

    fn setup(world: GridWorld, config: PathfindingConfig) -> (Pathfinder, Arc<RecordingSink>, UnitId) {
        let sink = Arc::new(RecordingSink::default());
        let pf = Pathfinder::new(Arc::new(world), sink.clone(), config).unwrap();
        let unit = UnitId::new();
        pf.register_unit(unit, human());
        (pf, sink, unit)
    }

    /// One expansion per frame so a search stays in flight for many frames
    fn slow_config() -> PathfindingConfig {
        PathfindingConfig {
            worker_count: 1,
            max_calculations_per_frame: 1,
            cancel_check_interval: 1,
            ..Default::default()
        }
    }

    fn goto(pf: &Pathfinder, unit: UnitId, start: IntPosition, goal: IntPosition) -> CommandResult {
        pf.command_pathfinding(unit, start, goal, UnitAction::Goto, None, None).unwrap()
    }

    /// Run frames until `done` holds
    fn run_frames_until(pf: &Pathfinder, mut done: impl FnMut() -> bool) {
        for _ in 0..2_000 {
            if done() {
                return;
            }
            pf.apply_all_new_paths();
        }
        panic!("condition not reached");
    }

    fn settled(pf: &Pathfinder, unit: UnitId) -> bool {
        pf.thread_state(unit) == Some(IntThrState::None)
    }

    #[test]
    fn test_open_grid_path_is_published() {
        let (pf, sink, unit) = setup(GridWorld::new(32, 32), PathfindingConfig::default());
        pf.init_pathfinding_threading().unwrap();

        assert_eq!(goto(&pf, unit, pos(0, 0), pos(31, 31)), CommandResult::Success);
        assert!(pf.is_undergoing_path_calc(unit));
        assert_eq!(pf.get_internal_path_state(unit), PathState::Working);
        run_frames_until(&pf, || settled(&pf, unit));

        let path = pf.public_path(unit).unwrap();
        assert_eq!(path.len(), 32);
        assert_eq!(path.cost(), 930);
        assert_eq!(path.start(), pos(0, 0));
        assert_eq!(path.goal(), pos(31, 31));
        assert_eq!(pf.calc_state(unit), Some(CalcState::ReachedGoal));
        assert_eq!(pf.committed_action(unit).unwrap().goal.pos, pos(31, 31));
        assert!(pf.staging_path(unit).is_none());
        assert_eq!(*sink.issued.lock(), vec![unit]);
        assert!(sink.cancelled.lock().is_empty());

        let stats = pf.stats();
        assert_eq!(stats.paths_found, 1);
        assert_eq!(stats.paths_applied, 1);
        pf.quit_pathfinding_threading().unwrap();
    }

    #[test]
    fn test_wall_split_steers_to_nearest_cell() {
        let mut world = GridWorld::new(32, 32);
        world.fill_rect(16, 0, 16, 31, Terrain::Obstacle);
        let (pf, sink, unit) = setup(world, PathfindingConfig::default());
        pf.init_pathfinding_threading().unwrap();

        goto(&pf, unit, pos(0, 0), pos(31, 31));
        run_frames_until(&pf, || settled(&pf, unit));

        assert_eq!(pf.changed_goal_pos(unit), Some(pos(15, 31)));
        assert_eq!(pf.public_path(unit).unwrap().goal(), pos(15, 31));
        assert_eq!(pf.preprocess_state(unit), Some(PreprocessState::SkippedFlood));
        assert_eq!(*sink.issued.lock(), vec![unit]);
    }

    #[test]
    fn test_command_shortcuts() {
        let (pf, _, unit) = setup(GridWorld::new(8, 8), PathfindingConfig::default());
        assert_eq!(goto(&pf, unit, pos(2, 2), pos(2, 2)), CommandResult::GoalIsStart);
        assert_eq!(pf.queue_size(), 0);

        let tower = UnitId::new();
        pf.register_unit(tower, UnitTypeInfo::new(2, MovementType::Building, false));
        assert_eq!(goto(&pf, tower, pos(1, 1), pos(5, 5)), CommandResult::Immobile);

        let err = pf
            .command_pathfinding(UnitId::new(), pos(0, 0), pos(1, 1), UnitAction::Goto, None, None)
            .unwrap_err();
        assert!(matches!(err, PathError::UnknownUnit(_)));
        assert_eq!(pf.get_internal_path_state(UnitId::new()), PathState::DoesNotExist);
    }

    #[test]
    fn test_incomplete_attack_becomes_goto() {
        let (pf, _, unit) = setup(GridWorld::new(16, 16), PathfindingConfig::default());
        let result = pf
            .command_pathfinding(unit, pos(0, 0), pos(9, 4), UnitAction::Attack, None, None)
            .unwrap();
        assert_eq!(result, CommandResult::Success);

        pf.init_pathfinding_threading().unwrap();
        run_frames_until(&pf, || settled(&pf, unit));
        let action = pf.committed_action(unit).unwrap();
        assert_eq!(action.action, UnitAction::Goto);
        assert_eq!(pf.public_path(unit).unwrap().goal(), pos(9, 4));
    }

    #[test]
    fn test_reissue_while_waiting_replaces_request() {
        let (pf, _, unit) = setup(GridWorld::new(24, 24), PathfindingConfig::default());
        assert_eq!(goto(&pf, unit, pos(0, 0), pos(10, 10)), CommandResult::Success);
        assert_eq!(goto(&pf, unit, pos(0, 0), pos(20, 5)), CommandResult::Success);
        assert_eq!(pf.thread_state(unit), Some(IntThrState::Waiting));
        assert_eq!(pf.queue_size(), 1);

        pf.init_pathfinding_threading().unwrap();
        run_frames_until(&pf, || settled(&pf, unit));
        assert_eq!(pf.public_path(unit).unwrap().goal(), pos(20, 5));
        assert_eq!(pf.queue_size(), 0);
    }

    #[test]
    fn test_cancel_waiting_request() {
        let (pf, sink, unit) = setup(GridWorld::new(16, 16), PathfindingConfig::default());
        goto(&pf, unit, pos(0, 0), pos(12, 12));
        assert!(pf.cancel_pathfinding(unit));
        assert_eq!(pf.thread_state(unit), Some(IntThrState::None));
        assert_eq!(pf.calc_state(unit), Some(CalcState::Failure));
        assert!(!pf.is_undergoing_path_calc(unit));

        // the stale queue entry is skipped
        pf.init_pathfinding_threading().unwrap();
        run_frames_until(&pf, || pf.queue_size() == 0);
        pf.apply_all_new_paths();
        assert!(pf.public_path(unit).is_none());
        assert!(sink.issued.lock().is_empty());
        assert!(sink.cancelled.lock().is_empty());
        assert_eq!(pf.stats().cancellations, 1);
    }

    #[test]
    fn test_cancel_in_flight_search() {
        let (pf, sink, unit) = setup(GridWorld::new(64, 64), slow_config());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(0, 0), pos(63, 63));
        run_frames_until(&pf, || pf.thread_state(unit) == Some(IntThrState::Processing));

        assert!(pf.cancel_pathfinding(unit));
        run_frames_until(&pf, || settled(&pf, unit));
        assert_eq!(pf.calc_state(unit), Some(CalcState::Failure));
        assert!(pf.public_path(unit).is_none());
        assert!(pf.staging_path(unit).is_none());
        assert!(sink.cancelled.lock().is_empty());
        assert_eq!(pf.stats().cancellations, 1);
    }

    #[test]
    fn test_new_goal_mid_search_is_deferred() {
        let (pf, _, unit) = setup(GridWorld::new(64, 64), slow_config());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(0, 0), pos(63, 63));
        run_frames_until(&pf, || pf.thread_state(unit) == Some(IntThrState::Processing));

        assert_eq!(goto(&pf, unit, pos(0, 0), pos(10, 40)), CommandResult::SuccessDeferred);
        pf.update_config(PathfindingConfig { worker_count: 1, ..Default::default() })
            .unwrap();
        run_frames_until(&pf, || settled(&pf, unit));

        assert_eq!(pf.public_path(unit).unwrap().goal(), pos(10, 40));
        assert_eq!(pf.committed_action(unit).unwrap().goal.pos, pos(10, 40));
        assert_eq!(pf.stats().new_goal_requeues, 1);
    }

    #[test]
    fn test_redirect_then_cancel_in_flight_applies_nothing() {
        let (pf, sink, unit) = setup(GridWorld::new(64, 64), slow_config());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(0, 0), pos(63, 63));
        run_frames_until(&pf, || pf.thread_state(unit) == Some(IntThrState::Processing));

        assert_eq!(goto(&pf, unit, pos(0, 0), pos(10, 40)), CommandResult::SuccessDeferred);
        assert!(pf.cancel_pathfinding(unit));
        run_frames_until(&pf, || settled(&pf, unit));
        for _ in 0..5 {
            pf.apply_all_new_paths();
        }

        assert_eq!(pf.thread_state(unit), Some(IntThrState::None));
        assert_eq!(pf.calc_state(unit), Some(CalcState::Failure));
        assert!(pf.public_path(unit).is_none());
        assert!(sink.issued.lock().is_empty());
        assert_eq!(pf.stats().cancellations, 1);
        assert_eq!(pf.stats().new_goal_requeues, 0);
    }

    #[test]
    fn test_redirect_then_delete_in_flight_frees_unit() {
        let (pf, sink, unit) = setup(GridWorld::new(64, 64), slow_config());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(0, 0), pos(63, 63));
        run_frames_until(&pf, || pf.thread_state(unit) == Some(IntThrState::Processing));

        assert_eq!(goto(&pf, unit, pos(0, 0), pos(10, 40)), CommandResult::SuccessDeferred);
        assert!(pf.delete_unit(unit));
        run_frames_until(&pf, || !sink.freed.lock().is_empty());

        pf.apply_all_new_paths();
        assert_eq!(*sink.freed.lock(), vec![unit]);
        assert!(sink.issued.lock().is_empty());
        assert_eq!(pf.thread_state(unit), None);
        assert_eq!(pf.stats().deletions, 1);
    }

    #[test]
    fn test_attack_next_to_target_is_reached() {
        let world = GridWorld::new(16, 16);
        let target = UnitId::new();
        assert!(world.place_unit(target, human(), pos(10, 4)));
        let (pf, sink, unit) = setup(world, PathfindingConfig::default());
        pf.init_pathfinding_threading().unwrap();

        let result = pf
            .command_pathfinding(unit, pos(9, 4), pos(10, 4), UnitAction::Attack, Some(target), None)
            .unwrap();
        assert_eq!(result, CommandResult::Success);
        run_frames_until(&pf, || settled(&pf, unit));

        assert_eq!(pf.calc_state(unit), Some(CalcState::ReachedGoal));
        let path = pf.public_path(unit).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path.goal(), pos(9, 4));
        assert_eq!(pf.committed_action(unit).unwrap().action, UnitAction::Attack);
        assert_eq!(pf.changed_goal_pos(unit), None);
        assert_eq!(*sink.issued.lock(), vec![unit]);
        assert!(sink.cancelled.lock().is_empty());
    }

    #[test]
    fn test_delete_idle_unit_frees_at_once() {
        let (pf, sink, unit) = setup(GridWorld::new(8, 8), PathfindingConfig::default());
        assert!(pf.delete_unit(unit));
        assert_eq!(*sink.freed.lock(), vec![unit]);
        assert!(!pf.delete_unit(unit));
        assert_eq!(pf.get_internal_path_state(unit), PathState::DoesNotExist);
        assert!(matches!(
            pf.command_pathfinding(unit, pos(0, 0), pos(3, 3), UnitAction::Goto, None, None),
            Err(PathError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_delete_in_flight_unit_is_freed_by_worker() {
        let (pf, sink, unit) = setup(GridWorld::new(64, 64), slow_config());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(0, 0), pos(63, 63));
        run_frames_until(&pf, || pf.thread_state(unit) == Some(IntThrState::Processing));

        assert!(pf.delete_unit(unit));
        // still owned by the worker
        assert!(matches!(
            pf.command_pathfinding(unit, pos(0, 0), pos(3, 3), UnitAction::Goto, None, None),
            Err(PathError::UnitDeleted(_)) | Err(PathError::UnknownUnit(_))
        ));
        run_frames_until(&pf, || !sink.freed.lock().is_empty());

        pf.apply_all_new_paths();
        assert_eq!(*sink.freed.lock(), vec![unit]);
        assert!(sink.issued.lock().is_empty());
        assert_eq!(pf.thread_state(unit), None);
        assert_eq!(pf.stats().deletions, 1);
    }

    #[test]
    fn test_pause_holds_workers() {
        let (pf, _, unit) = setup(GridWorld::new(64, 64), slow_config());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(0, 0), pos(63, 63));
        run_frames_until(&pf, || pf.thread_state(unit) == Some(IntThrState::Processing));

        let guard = pf.pause_unit_owner(unit).unwrap();
        assert_eq!(guard.worker_count(), 1);
        drop(guard);

        let guard = pf.pause_pathfinding();
        let before = pf.stats().expansions;
        for _ in 0..5 {
            let report = pf.apply_all_new_paths();
            assert_eq!(report.workers_done, 0);
        }
        assert_eq!(pf.stats().expansions, before);

        pf.resume_pathfinding(guard);
        run_frames_until(&pf, || pf.stats().expansions > before);
    }

    #[test]
    fn test_shutdown_requeues_in_flight_search() {
        let (pf, _, unit) = setup(GridWorld::new(64, 64), slow_config());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(0, 0), pos(63, 63));
        run_frames_until(&pf, || pf.thread_state(unit) == Some(IntThrState::Processing));

        pf.quit_pathfinding_threading().unwrap();
        assert_eq!(pf.thread_state(unit), Some(IntThrState::Waiting));
        assert!(pf.queue_size() >= 1);

        pf.update_config(PathfindingConfig::default()).unwrap();
        pf.init_pathfinding_threading().unwrap();
        run_frames_until(&pf, || settled(&pf, unit));
        assert_eq!(pf.public_path(unit).unwrap().goal(), pos(63, 63));
    }

    #[test]
    fn test_threading_lifecycle_errors() {
        let (pf, _, _) = setup(GridWorld::new(8, 8), PathfindingConfig::default());
        assert!(matches!(pf.quit_pathfinding_threading(), Err(PathError::NotRunning)));
        pf.init_pathfinding_threading().unwrap();
        assert!(pf.is_running());
        assert!(matches!(pf.init_pathfinding_threading(), Err(PathError::AlreadyRunning)));
        pf.quit_pathfinding_threading().unwrap();
        assert!(!pf.is_running());
    }

    #[test]
    fn test_failed_search_cancels_action() {
        let world = GridWorld::from_ascii(
            "
            ###.....
            #.#.....
            ###.....
            ",
        );
        let (pf, sink, unit) = setup(world, PathfindingConfig::default());
        pf.init_pathfinding_threading().unwrap();
        goto(&pf, unit, pos(1, 1), pos(6, 1));
        run_frames_until(&pf, || settled(&pf, unit));

        assert_eq!(pf.calc_state(unit), Some(CalcState::Failure));
        assert_eq!(*sink.cancelled.lock(), vec![unit]);
        assert!(pf.public_path(unit).is_none());
    }

    #[test]
    fn test_buildings_invalidate_area_maps() {
        let world = Arc::new(GridWorld::new(16, 16));
        let sink = Arc::new(RecordingSink::default());
        let pf = Pathfinder::new(world.clone(), sink, PathfindingConfig::default()).unwrap();
        let unit = UnitId::new();
        pf.register_unit(unit, human());
        pf.init_pathfinding_threading().unwrap();

        goto(&pf, unit, pos(0, 0), pos(15, 15));
        run_frames_until(&pf, || settled(&pf, unit));
        let rebuilds = pf.area_maps().rebuild_count();
        assert!(rebuilds >= 1);

        // a wall of buildings cuts the map in two
        let wall = UnitTypeInfo::new(1, MovementType::Building, false);
        for y in 0..16 {
            let id = UnitId::new();
            assert!(world.place_unit(id, wall, pos(8, y)));
            pf.add_unit_to_area_map(&wall, pos(8, y));
        }
        goto(&pf, unit, pos(0, 0), pos(15, 15));
        run_frames_until(&pf, || settled(&pf, unit));

        assert!(pf.area_maps().rebuild_count() > rebuilds);
        assert_eq!(pf.changed_goal_pos(unit), Some(pos(7, 15)));
    }

    #[test]
    fn test_update_config_rejects_zero_fields() {
        let (pf, _, _) = setup(GridWorld::new(8, 8), PathfindingConfig::default());
        let err = pf
            .update_config(PathfindingConfig { max_calculations_per_frame: 0, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, PathError::Config(ConfigError::Zero { field: "max_calculations_per_frame" })));
        assert_eq!(pf.config().max_calculations_per_frame, 1000);
    }
}
