//! Boundary trace toward an unreachable goal
//!
//! Starting at the goal, step toward the start until the start's area is
//! entered. The edge crossed there lies on the border between the start
//! area and the blocked region around the goal. Following that border with
//! the blocked side on the left visits every start-area cell that touches
//! the region, and the cell nearest the goal among them is the nearest
//! reachable cell overall: stepping from that cell toward the goal never
//! re-enters the start area.

use crate::search::flood_fill::FloodFillError;
use crate::storage::area_map::AreaGrid;
use crate::world::IntPosition;

/// East, south, west, north; turning right adds one
const DIRS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

#[inline]
fn left(dir: usize) -> usize {
    (dir + 3) % 4
}

#[inline]
fn right(dir: usize) -> usize {
    (dir + 1) % 4
}

#[inline]
fn offset(pos: IntPosition, dir: usize) -> IntPosition {
    IntPosition::new(pos.x + DIRS[dir].0, pos.y + DIRS[dir].1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    /// Nearest start-area cell to the goal
    Found { pos: IntPosition, steps: u32 },
    /// Start and goal already share an area
    GoalReachable,
    /// Gave up after the step limit; a flood fill should take over
    LimitReached { steps: u32 },
    /// The start cell has no area, so there is no border to follow
    NoArea,
}

/// How the nearest reachable point was finally chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessState {
    None,
    ProcessingTrace,
    ProcessingFlood,
    SkippedTrace,
    SkippedFlood,
    /// Flood fill overflowed and the best point so far was used
    FloodAborted(FloodFillError),
    Done,
}

/// Trace the start area's border around the goal's blocked region
///
/// `limit` bounds the total number of steps. A non-zero `stall_limit` stops
/// the trace once that many steps pass without getting closer; the result is
/// then still reachable but may not be the nearest cell.
pub fn trace_nearest(grid: &AreaGrid, start: IntPosition, goal: IntPosition, limit: u32, stall_limit: u32) -> TraceOutcome {
    let area = grid.code_of(start);
    if area == 0 {
        return TraceOutcome::NoArea;
    }
    if grid.code_of(goal) == area {
        return TraceOutcome::GoalReachable;
    }
    let inside = |pos: IntPosition| grid.code_of(pos) == area;

    // walk from the goal until the start area is entered
    let mut steps = 0u32;
    let mut prev = goal;
    let (step_x, step_y, next) = loop {
        let sx = (start.x - prev.x).signum();
        let sy = (start.y - prev.y).signum();
        let next = IntPosition::new(prev.x + sx, prev.y + sy);
        steps += 1;
        if steps > limit {
            return TraceOutcome::LimitReached { steps };
        }
        if inside(next) {
            break (sx, sy, next);
        }
        prev = next;
    };

    // an edge with the area cell on one side and a blocked cell on the other
    let (cell, wall) = if step_x != 0 && step_y != 0 {
        let flank = IntPosition::new(prev.x + step_x, prev.y);
        if inside(flank) {
            (flank, prev)
        } else {
            (next, flank)
        }
    } else {
        (next, prev)
    };
    let wall_dir = DIRS
        .iter()
        .position(|&(dx, dy)| cell.x + dx == wall.x && cell.y + dy == wall.y)
        .unwrap_or(0);

    let initial = (cell, right(wall_dir));
    let (mut cur, mut dir) = initial;
    let mut best = (cur, cur.distance_sq(goal));
    let mut since_improvement = 0u32;

    loop {
        steps += 1;
        if steps > limit {
            return TraceOutcome::LimitReached { steps };
        }

        let ahead = offset(cur, dir);
        if !inside(ahead) {
            dir = right(dir);
        } else {
            let diagonal = offset(ahead, left(dir));
            if inside(diagonal) {
                cur = diagonal;
                dir = left(dir);
            } else {
                cur = ahead;
            }
        }

        if (cur, dir) == initial {
            break;
        }

        let dist = cur.distance_sq(goal);
        if dist < best.1 {
            best = (cur, dist);
            since_improvement = 0;
        } else {
            since_improvement += 1;
            if stall_limit > 0 && since_improvement >= stall_limit {
                break;
            }
        }
    }

    TraceOutcome::Found { pos: best.0, steps }
}
