use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters bumped by workers and the publisher
#[derive(Debug, Default)]
pub struct PathStats {
    pub paths_found: AtomicU64,
    pub paths_failed: AtomicU64,
    pub changed_goals: AtomicU64,
    pub traces: AtomicU64,
    pub trace_fallbacks: AtomicU64,
    pub floods: AtomicU64,
    pub flood_overflows: AtomicU64,
    pub expansions: AtomicU64,
    pub new_goal_requeues: AtomicU64,
    pub cancellations: AtomicU64,
    pub deletions: AtomicU64,
    pub paths_applied: AtomicU64,
    pub frames: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add(counter: &AtomicU64, amount: u64) {
    counter.fetch_add(amount, Ordering::Relaxed);
}

impl PathStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            paths_found: load(&self.paths_found),
            paths_failed: load(&self.paths_failed),
            changed_goals: load(&self.changed_goals),
            traces: load(&self.traces),
            trace_fallbacks: load(&self.trace_fallbacks),
            floods: load(&self.floods),
            flood_overflows: load(&self.flood_overflows),
            expansions: load(&self.expansions),
            new_goal_requeues: load(&self.new_goal_requeues),
            cancellations: load(&self.cancellations),
            deletions: load(&self.deletions),
            paths_applied: load(&self.paths_applied),
            frames: load(&self.frames),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub paths_found: u64,
    pub paths_failed: u64,
    pub changed_goals: u64,
    pub traces: u64,
    pub trace_fallbacks: u64,
    pub floods: u64,
    pub flood_overflows: u64,
    pub expansions: u64,
    pub new_goal_requeues: u64,
    pub cancellations: u64,
    pub deletions: u64,
    pub paths_applied: u64,
    pub frames: u64,
}
