//! One unit's request as seen by the worker that owns it

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::stats::{add, bump};
use super::Shared;
use crate::config::PathfindingConfig;
use crate::movement::{CancelToken, MovementData, PopReason};
use crate::search::astar::{AStar, SearchLimits, SearchOutcome};
use crate::search::flood_fill::{flood_fill, NearestSeeker};
use crate::search::node::NodePath;
use crate::search::thread_data::ThreadData;
use crate::search::trace::{trace_nearest, PreprocessState, TraceOutcome};
use crate::storage::area_map::AreaClass;
use crate::world::{ActionData, IntPosition, UnitId, UnitTypeInfo};

#[derive(Debug)]
pub(crate) enum JobResult {
    Path { path: NodePath, changed_goal_pos: Option<IntPosition> },
    Failed,
}

#[derive(Debug)]
pub(crate) enum JobStep {
    Yielded { expanded: u32 },
    Finished { result: JobResult, expanded: u32 },
}

pub(crate) struct Job {
    pub unit: UnitId,
    pub slot: Arc<Mutex<MovementData>>,
    pub token: CancelToken,
    pub action: ActionData,
    pub waiting_for_frame: bool,
    unit_type: UnitTypeInfo,
    search: AStar,
}

impl Job {
    /// Resolve an unreachable goal and open the search
    pub fn start(
        unit: UnitId,
        slot: Arc<Mutex<MovementData>>,
        token: CancelToken,
        unit_type: UnitTypeInfo,
        mut action: ActionData,
        td: &mut ThreadData,
        shared: &Shared,
        config: &PathfindingConfig,
    ) -> Self {
        action.changed_goal_pos = None;
        let (preprocess, substitute) = resolve_goal(unit, &slot, &unit_type, &action, td, shared, config);
        slot.lock().preprocess = preprocess;

        if let Some(pos) = substitute.filter(|&pos| pos != action.goal.pos) {
            debug!(unit = %unit, goal = ?action.goal.pos, substitute = ?pos, "goal unreachable, steering to nearest cell");
            bump(&shared.stats.changed_goals);
            action.changed_goal_pos = Some(pos);
        }

        let search = AStar::begin(td, &shared.heuristics, unit, unit_type, action);
        Self { unit, slot, token, action, waiting_for_frame: false, unit_type, search }
    }

    pub fn poll_cancel(&self) -> Option<PopReason> {
        self.token.poll()
    }

    /// Run one slice of at most `budget` expansions
    pub fn step(&mut self, td: &mut ThreadData, shared: &Shared, config: &PathfindingConfig, budget: u32) -> JobStep {
        let limits = SearchLimits {
            max_path_calculations: config.max_path_calculations,
            learning: config.heuristic_learning,
        };
        let before = self.search.expansions();
        let outcome = self.search.step(td, &*shared.world, &shared.heuristics, limits, budget);
        let expanded = self.search.expansions() - before;
        add(&shared.stats.expansions, expanded as u64);

        let result = match outcome {
            SearchOutcome::Pending => return JobStep::Yielded { expanded },
            // the closest reachable cell is where the unit already stands
            SearchOutcome::Path { path, reached: false } if path.len() < 2 => {
                debug!(unit = %self.unit, "no reachable cell closer than the start");
                bump(&shared.stats.paths_failed);
                JobResult::Failed
            }
            SearchOutcome::Path { path, reached } => {
                let mut changed_goal_pos = self.action.changed_goal_pos;
                if !reached && path.goal() != self.action.goal.pos {
                    changed_goal_pos = Some(path.goal());
                }
                debug!(
                    unit = %self.unit,
                    steps = path.len(),
                    cost = path.cost(),
                    reached,
                    expansions = self.search.expansions(),
                    "path found"
                );
                bump(&shared.stats.paths_found);
                JobResult::Path { path, changed_goal_pos }
            }
            SearchOutcome::Exhausted => {
                debug!(unit = %self.unit, size = self.unit_type.size, "search exhausted without a closer cell");
                bump(&shared.stats.paths_failed);
                JobResult::Failed
            }
        };
        JobStep::Finished { result, expanded }
    }
}

/// Pick a reachable substitute when the goal lies in another area
///
/// Same area: nothing to do. Otherwise trace the border of the start area,
/// and flood fill when the trace gives up or the start has no area code.
fn resolve_goal(
    unit: UnitId,
    slot: &Mutex<MovementData>,
    unit_type: &UnitTypeInfo,
    action: &ActionData,
    td: &mut ThreadData,
    shared: &Shared,
    config: &PathfindingConfig,
) -> (PreprocessState, Option<IntPosition>) {
    let world = &*shared.world;
    let start = action.start_pos;
    let goal = action.goal.pos;
    let class = AreaClass::of(unit_type);

    slot.lock().preprocess = PreprocessState::ProcessingTrace;
    let outcome = shared.area_maps.with_fresh(class, world, |grid| {
        trace_nearest(grid, start, goal, config.recalc_trace_limit, config.trace_stall_limit)
    });
    match outcome {
        TraceOutcome::GoalReachable => return (PreprocessState::SkippedTrace, None),
        TraceOutcome::Found { pos, steps } => {
            bump(&shared.stats.traces);
            debug!(unit = %unit, steps, "trace found nearest reachable cell");
            return (PreprocessState::SkippedFlood, Some(pos));
        }
        TraceOutcome::LimitReached { steps } => {
            bump(&shared.stats.trace_fallbacks);
            warn!(unit = %unit, steps, "trace hit its step limit, falling back to flood fill");
        }
        TraceOutcome::NoArea => {
            debug!(unit = %unit, "start has no area code, flood filling");
        }
    }

    slot.lock().preprocess = PreprocessState::ProcessingFlood;
    bump(&shared.stats.floods);
    let generation = td.begin_flood();
    let mut seeker = NearestSeeker::new(world, unit, unit_type, &mut td.flood_marks, generation, goal);
    let state = match flood_fill(&mut seeker, &mut td.scanlines, world.dimensions(), start) {
        Ok(_) => PreprocessState::Done,
        Err(err) => {
            bump(&shared.stats.flood_overflows);
            error!(unit = %unit, %err, "flood fill aborted, using the best cell found so far");
            PreprocessState::FloodAborted(err)
        }
    };
    let substitute = if seeker.reached_target() { None } else { seeker.best() };
    (state, substitute)
}
