//! Time-sliced A*
//!
//! A search is started once with `AStar::begin` and then driven by `step`
//! calls, each allowed a fixed number of expansions. All open/closed state
//! lives in the worker's `ThreadData`, so a search that runs out of budget
//! resumes exactly where it stopped on the next call.

use crate::config::heuristic::octile;
use crate::search::node::NodePath;
use crate::search::thread_data::{ThreadData, NO_PARENT};
use crate::storage::heuristic_table::HeuristicTable;
use crate::world::{ActionData, IntPosition, UnitId, UnitTypeInfo, World};

/// 8-connected moves
const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    /// Expansions allowed over the whole search
    pub max_path_calculations: u32,
    pub learning: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The slice budget ran out; call `step` again
    Pending,
    /// A path was built. `reached` is false when it ends at the closest
    /// cell found instead of the goal.
    Path { path: NodePath, reached: bool },
    /// Nothing closer to the goal than the start could be reached
    Exhausted,
}

#[inline]
fn score(f: u32, h: u32) -> u64 {
    ((f as u64) << 32) | h as u64
}

pub struct AStar {
    unit: UnitId,
    unit_type: UnitTypeInfo,
    action: ActionData,
    start: u32,
    goal: IntPosition,
    goal_changed: bool,
    nearest: u32,
    nearest_h: u32,
    expansions: u32,
}

impl AStar {
    /// Reset the worker's scratch state and open the start node
    pub fn begin(td: &mut ThreadData, heuristics: &HeuristicTable, unit: UnitId, unit_type: UnitTypeInfo, action: ActionData) -> Self {
        td.begin_search();
        let goal = action.effective_goal();
        heuristics.load_row(unit_type.size_class(), goal, &mut td.hconst_row);

        let start_pos = action.start_pos;
        let start = td.index(start_pos.x, start_pos.y);
        let raw_h = octile(start_pos.x, start_pos.y, goal.x, goal.y);
        let h = td.hconst_row.scale(start_pos.x, start_pos.y, raw_h);
        td.record(start, 0, h, NO_PARENT);
        td.heap.push(start, score(h, h));

        Self {
            unit,
            unit_type,
            action,
            start,
            goal,
            goal_changed: action.changed_goal_pos.is_some(),
            nearest: start,
            nearest_h: raw_h,
            expansions: 0,
        }
    }

    /// Total expansions so far
    pub fn expansions(&self) -> u32 {
        self.expansions
    }

    fn is_goal<W: World + ?Sized>(&self, world: &W, x: i32, y: i32) -> bool {
        if x == self.goal.x && y == self.goal.y {
            return true;
        }
        !self.goal_changed && world.square_is_goal(self.unit, &self.unit_type, &self.action, x, y)
    }

    /// Run at most `budget` expansions
    pub fn step<W: World + ?Sized>(
        &mut self,
        td: &mut ThreadData,
        world: &W,
        heuristics: &HeuristicTable,
        limits: SearchLimits,
        budget: u32,
    ) -> SearchOutcome {
        let mut expanded = 0;
        while expanded < budget {
            if self.expansions >= limits.max_path_calculations {
                debug_log!("astar: unit {} hit the expansion limit", self.unit);
                return self.finish_nearest(td, heuristics, limits);
            }
            let Some((current, _)) = td.heap.pop() else {
                return self.finish_nearest(td, heuristics, limits);
            };
            if td.is_closed(current) {
                continue;
            }
            td.close(current);
            self.expansions += 1;
            expanded += 1;

            let (x, y) = td.coords(current);
            let raw_h = octile(x, y, self.goal.x, self.goal.y);
            if raw_h < self.nearest_h {
                self.nearest = current;
                self.nearest_h = raw_h;
            }

            if self.is_goal(world, x, y) {
                return self.finish(td, heuristics, limits, current, true);
            }

            self.expand(td, world, current, x, y);
        }
        SearchOutcome::Pending
    }

    fn expand<W: World + ?Sized>(&self, td: &mut ThreadData, world: &W, current: u32, x: i32, y: i32) {
        let g_current = td.g[current as usize];
        for (dx, dy) in NEIGHBOURS {
            let (nx, ny) = (x + dx, y + dy);
            if nx < 0 || ny < 0 || nx >= td.width || ny >= td.height {
                continue;
            }
            let next = td.index(nx, ny);
            if td.is_closed(next) {
                continue;
            }
            if !world.is_walkable(self.unit, &self.unit_type, nx, ny) {
                continue;
            }
            // no corner cutting
            if dx != 0
                && dy != 0
                && !(world.is_walkable(self.unit, &self.unit_type, x + dx, y)
                    && world.is_walkable(self.unit, &self.unit_type, x, y + dy))
            {
                continue;
            }

            let g = g_current + world.traversal_time_adjusted(&self.unit_type, x, y, dx, dy);
            if td.is_touched(next) && g >= td.g[next as usize] {
                continue;
            }
            let h = if td.is_touched(next) {
                td.h[next as usize]
            } else {
                td.hconst_row.scale(nx, ny, octile(nx, ny, self.goal.x, self.goal.y))
            };
            td.record(next, g, h, current);
            td.heap.push(next, score(g + h, h));
        }
    }

    fn finish_nearest(&self, td: &ThreadData, heuristics: &HeuristicTable, limits: SearchLimits) -> SearchOutcome {
        if self.nearest == self.start {
            return SearchOutcome::Exhausted;
        }
        self.finish(td, heuristics, limits, self.nearest, false)
    }

    /// Walk parents back to the start and build the path arena
    fn finish(&self, td: &ThreadData, heuristics: &HeuristicTable, limits: SearchLimits, end: u32, reached: bool) -> SearchOutcome {
        let mut samples = Vec::new();
        let mut cursor = end;
        loop {
            let (x, y) = td.coords(cursor);
            samples.push((IntPosition::new(x, y), td.g[cursor as usize]));
            let parent = td.parent[cursor as usize];
            if cursor == self.start || parent == NO_PARENT {
                break;
            }
            cursor = parent;
        }
        samples.reverse();

        if limits.learning {
            heuristics.learn(self.unit_type.size_class(), &samples);
        }

        let positions: Vec<IntPosition> = samples.iter().map(|&(pos, _)| pos).collect();
        let cost = td.g[end as usize];
        match NodePath::from_positions(&positions, cost) {
            Some(path) => SearchOutcome::Path { path, reached },
            None => SearchOutcome::Exhausted,
        }
    }
}
