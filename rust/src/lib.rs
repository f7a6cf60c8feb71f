//! Asynchronous grid pathfinding for many units
//!
//! The simulation thread submits requests through [`Pathfinder`]; a pool of
//! worker threads runs time-sliced A* against a [`World`] and the results are
//! published once per frame by [`Pathfinder::apply_all_new_paths`].

macro_rules! debug_log {
    ($($arg:tt)*) => {
        if cfg!(feature = "debug_logs") {
            tracing::debug!($($arg)*);
        }
    };
}

pub mod config;  // Centralized configuration constants
pub mod error;
pub mod movement;  // Per-unit request state machine
pub mod pool;  // Worker threads, publisher and the facade
pub mod search;
pub mod storage;
pub mod world;  // Collaborator traits and the reference grid

pub use config::PathfindingConfig;
pub use error::{ConfigError, PathError};
pub use movement::{CalcState, CommandResult, IntThrState, PathState, PathTarget, PopReason};
pub use pool::publisher::ApplyReport;
pub use pool::stats::StatsSnapshot;
pub use pool::{PauseGuard, Pathfinder};
pub use search::{NodePath, PreprocessState};
pub use world::{
    ActionArg, ActionData, CommandSink, Footprint, GridWorld, IntPosition, MovementType, NullSink, Terrain, UnitAction,
    UnitGoal, UnitId, UnitTypeInfo, WalkFlags, World,
};
