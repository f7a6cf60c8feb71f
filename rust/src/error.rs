use thiserror::Error;

use crate::world::{UnitAction, UnitId};

/// Errors surfaced by the public pathfinding API
#[derive(Debug, Error)]
pub enum PathError {
    #[error("unit {0} is not registered with the pathfinder")]
    UnknownUnit(UnitId),

    #[error("unit {0} has been deleted")]
    UnitDeleted(UnitId),

    #[error("action {action:?} needs a target or argument that was not given")]
    InvalidGoalArgs { action: UnitAction },

    #[error("pathfinding workers are already running")]
    AlreadyRunning,

    #[error("pathfinding workers are not running")]
    NotRunning,

    #[error("failed to spawn pathfinding worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pathfinding config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config field `{field}` must be non-zero")]
    Zero { field: &'static str },
}
