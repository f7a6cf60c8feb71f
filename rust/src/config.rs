/// Centralized configuration for the pathfinding engine
///
/// Compile-time constants live in the nested modules (`pathfinding`,
/// `heuristic`). Tunables that an embedder may want to change at runtime
/// live in `PathfindingConfig`, which is loaded from JSON and swapped
/// atomically while the worker pool is running.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Search limits and pool defaults
pub mod pathfinding {
    /// Unit sizes 1..=4 map to size classes 0..=3
    pub const SIZE_CLASSES: usize = 4;

    /// Total A* expansions for a single request before the search gives up
    pub const MAXIMUM_PATH_CALCULATIONS: u32 = 20_000;

    /// Expansions a worker may spend per AI frame
    pub const MAXIMUM_CALCULATIONS_PER_FRAME: u32 = 1_000;

    /// Boundary trace steps before falling back to a flood fill
    pub const RECALC_TRACE_LIMIT: u32 = 4_096;

    /// Expansions between two polls of a unit's cancellation token
    pub const CANCEL_CHECK_INTERVAL: u32 = 128;

    pub const DEFAULT_WORKER_COUNT: usize = 2;
    pub const DEFAULT_IDLE_SLEEP_MS: u64 = 10;
    pub const DEFAULT_FRAME_WAIT_TIMEOUT_MS: u64 = 25;

    /// Smallest scanline ring buffer handed out when the capacity is derived
    pub const MIN_SCANLINE_QUEUE: usize = 4_096;

    /// Derive a scanline ring capacity from the map dimensions
    #[inline]
    pub fn derived_scanline_capacity(width: i32, height: i32) -> usize {
        let cells = (width.max(0) as usize) * (height.max(0) as usize);
        (cells / 4).max(MIN_SCANLINE_QUEUE)
    }
}

/// Octile heuristic and the learned correction table
pub mod heuristic {
    /// Cost of a straight step on flat terrain
    pub const STRAIGHT_COST: u32 = 20;

    /// Cost of a diagonal step on flat terrain (straight + straight/2)
    pub const DIAGONAL_COST: u32 = 30;

    /// Fixed-point 1.0 for correction factors
    pub const HCONST_ONE: u16 = 256;
    pub const HCONST_SHIFT: u32 = 8;

    /// Blend weight of a new observation: 1 / (1 << HCONST_LEARNING_SHIFT)
    pub const HCONST_LEARNING_SHIFT: u32 = 4;

    /// Regions per axis are kept at or below this count
    pub const MAX_REGION_BUCKETS: i32 = 25;

    /// Octile distance: h = 30·diag + 20·(straight − 2·diag)
    #[inline]
    pub fn octile(x0: i32, y0: i32, x1: i32, y1: i32) -> u32 {
        let dx = (x0 - x1).unsigned_abs();
        let dy = (y0 - y1).unsigned_abs();
        let diag = dx.min(dy);
        let straight = dx + dy;
        DIAGONAL_COST * diag + STRAIGHT_COST * (straight - 2 * diag)
    }
}

/// Runtime tunables for the worker pool and the search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfindingConfig {
    pub worker_count: usize,
    pub max_path_calculations: u32,
    pub max_calculations_per_frame: u32,
    pub cancel_check_interval: u32,
    pub recalc_trace_limit: u32,
    /// Steps without improvement before the trace settles early, 0 disables it
    pub trace_stall_limit: u32,
    pub idle_sleep_ms: u64,
    /// Workers the publisher waits for each frame, 0 means all of them
    pub min_workers_done: usize,
    pub frame_wait_timeout_ms: u64,
    /// Scanline ring capacity, 0 derives it from the map size
    pub scanline_queue_capacity: usize,
    pub heuristic_learning: bool,
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            worker_count: pathfinding::DEFAULT_WORKER_COUNT,
            max_path_calculations: pathfinding::MAXIMUM_PATH_CALCULATIONS,
            max_calculations_per_frame: pathfinding::MAXIMUM_CALCULATIONS_PER_FRAME,
            cancel_check_interval: pathfinding::CANCEL_CHECK_INTERVAL,
            recalc_trace_limit: pathfinding::RECALC_TRACE_LIMIT,
            trace_stall_limit: 0,
            idle_sleep_ms: pathfinding::DEFAULT_IDLE_SLEEP_MS,
            min_workers_done: 0,
            frame_wait_timeout_ms: pathfinding::DEFAULT_FRAME_WAIT_TIMEOUT_MS,
            scanline_queue_capacity: 0,
            heuristic_learning: true,
        }
    }
}

impl PathfindingConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("worker_count", self.worker_count as u64),
            ("max_path_calculations", self.max_path_calculations as u64),
            ("max_calculations_per_frame", self.max_calculations_per_frame as u64),
            ("cancel_check_interval", self.cancel_check_interval as u64),
            ("recalc_trace_limit", self.recalc_trace_limit as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }

    /// Ring capacity for a map of the given size
    pub fn scanline_capacity(&self, width: i32, height: i32) -> usize {
        if self.scanline_queue_capacity > 0 {
            self.scanline_queue_capacity
        } else {
            pathfinding::derived_scanline_capacity(width, height)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octile_distance() {
        assert_eq!(heuristic::octile(0, 0, 0, 0), 0);
        assert_eq!(heuristic::octile(0, 0, 3, 0), 60);
        assert_eq!(heuristic::octile(0, 0, 31, 31), 930);
        assert_eq!(heuristic::octile(5, 2, 0, 0), 2 * 30 + 3 * 20);
    }

    #[test]
    fn test_json_keeps_defaults_for_missing_fields() {
        let config = PathfindingConfig::from_json_str(r#"{ "worker_count": 4 }"#).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_calculations_per_frame, pathfinding::MAXIMUM_CALCULATIONS_PER_FRAME);
        assert!(config.heuristic_learning);
    }

    #[test]
    fn test_zero_worker_count_rejected() {
        let err = PathfindingConfig::from_json_str(r#"{ "worker_count": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "worker_count" }));
    }

    #[test]
    fn test_bad_json_rejected() {
        assert!(matches!(
            PathfindingConfig::from_json_str("{ nope"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_scanline_capacity() {
        let config = PathfindingConfig::default();
        assert_eq!(config.scanline_capacity(32, 32), pathfinding::MIN_SCANLINE_QUEUE);
        assert_eq!(config.scanline_capacity(1024, 1024), 1024 * 1024 / 4);
        let fixed = PathfindingConfig { scanline_queue_capacity: 7, ..Default::default() };
        assert_eq!(fixed.scanline_capacity(1024, 1024), 7);
    }
}
