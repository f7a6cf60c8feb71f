//! Collaborator interfaces and the value types shared with them
//!
//! The pathfinder never owns terrain, units or commands. It asks a `World`
//! about walkability and step costs, and reports outcomes to a `CommandSink`.

pub mod grid_world;

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::pathfinding::SIZE_CLASSES;
use crate::error::PathError;

pub use grid_world::{GridWorld, Terrain};

/// Opaque unit handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub Ulid);

impl UnitId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntPosition {
    pub x: i32,
    pub y: i32,
}

impl IntPosition {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance
    #[inline]
    pub fn distance_sq(self, other: IntPosition) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }
}

impl From<(i32, i32)> for IntPosition {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementType {
    Human,
    SmallVehicle,
    MediumVehicle,
    LargeVehicle,
    Building,
    Airborne,
    Sea,
}

impl MovementType {
    pub const COUNT: usize = 7;

    pub const ALL: [MovementType; Self::COUNT] = [
        MovementType::Human,
        MovementType::SmallVehicle,
        MovementType::MediumVehicle,
        MovementType::LargeVehicle,
        MovementType::Building,
        MovementType::Airborne,
        MovementType::Sea,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The slice of a unit type the pathfinder cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitTypeInfo {
    /// Footprint edge length in cells
    pub size: u8,
    pub movement_type: MovementType,
    pub is_mobile: bool,
}

impl UnitTypeInfo {
    pub const fn new(size: u8, movement_type: MovementType, is_mobile: bool) -> Self {
        Self { size, movement_type, is_mobile }
    }

    /// Sizes 1..=4 map to classes 0..=3; larger sizes share the last class
    #[inline]
    pub fn size_class(&self) -> usize {
        (self.size.max(1) as usize - 1).min(SIZE_CLASSES - 1)
    }

    /// A mobile type standing in for every unit of the given class
    pub fn representative(size_class: usize, movement_type: MovementType) -> Self {
        Self {
            size: (size_class.min(SIZE_CLASSES - 1) + 1) as u8,
            movement_type,
            is_mobile: true,
        }
    }

    pub fn footprint_at(&self, pos: IntPosition) -> Footprint {
        Footprint::centered(pos, self.size.max(1) as i32)
    }
}

/// Square block of cells covered by a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    /// Upper-left cell
    pub pos: IntPosition,
    pub size: i32,
}

impl Footprint {
    pub fn centered(pos: IntPosition, size: i32) -> Self {
        Self {
            pos: IntPosition::new(pos.x - size / 2, pos.y - size / 2),
            size,
        }
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.pos.x && y >= self.pos.y && x < self.pos.x + self.size && y < self.pos.y + self.size
    }

    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (self.pos.y..self.pos.y + self.size)
            .flat_map(move |y| (self.pos.x..self.pos.x + self.size).map(move |x| (x, y)))
    }

    /// Chebyshev gap between two footprints, 0 when they overlap
    pub fn gap(&self, other: &Footprint) -> i32 {
        let axis = |a0: i32, asz: i32, b0: i32, bsz: i32| {
            (b0 - (a0 + asz - 1)).max(a0 - (b0 + bsz - 1)).max(0)
        };
        axis(self.pos.x, self.size, other.pos.x, other.size)
            .max(axis(self.pos.y, self.size, other.pos.y, other.size))
    }

    /// Touching without overlapping
    #[inline]
    pub fn is_next_to(&self, other: &Footprint) -> bool {
        self.gap(other) == 1
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WalkFlags: u8 {
        /// Units that are currently moving do not block
        const IGNORE_MOVING = 1 << 0;
        /// Mobile units do not block, immobile ones still do
        const IGNORE_MOBILE = 1 << 1;
        /// Disregard fog of war
        const ALL_KNOWING   = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitAction {
    None,
    #[default]
    Goto,
    Attack,
    Collect,
    Build,
    Research,
    Repair,
    Follow,
    MoveAttack,
    MoveAttackUnit,
    Die,
    BeingCreated,
}

impl UnitAction {
    /// Actions whose goal is another unit rather than a cell
    pub fn requires_target(self) -> bool {
        matches!(
            self,
            UnitAction::Attack
                | UnitAction::Collect
                | UnitAction::Repair
                | UnitAction::Follow
                | UnitAction::MoveAttackUnit
        )
    }

    /// Whether the given target/argument combination is enough for this action
    pub fn check(self, target: Option<UnitId>, arg: Option<&ActionArg>) -> Result<(), PathError> {
        let complete = match self {
            UnitAction::Build => target.is_some() || arg.is_some(),
            action if action.requires_target() => target.is_some(),
            _ => true,
        };
        if complete {
            Ok(())
        } else {
            Err(PathError::InvalidGoalArgs { action: self })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionArg {
    /// Type of the building to be placed at the goal position
    BuildType(UnitTypeInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitGoal {
    pub target: Option<UnitId>,
    pub pos: IntPosition,
}

/// A command as seen by the pathfinder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionData {
    pub start_pos: IntPosition,
    pub goal: UnitGoal,
    /// Substitute goal when the requested one was unreachable
    pub changed_goal_pos: Option<IntPosition>,
    pub arg: Option<ActionArg>,
    pub action: UnitAction,
}

impl ActionData {
    pub fn goto(start: IntPosition, goal: IntPosition) -> Self {
        Self {
            start_pos: start,
            goal: UnitGoal { target: None, pos: goal },
            changed_goal_pos: None,
            arg: None,
            action: UnitAction::Goto,
        }
    }

    /// The cell the search is actually steering toward
    #[inline]
    pub fn effective_goal(&self) -> IntPosition {
        self.changed_goal_pos.unwrap_or(self.goal.pos)
    }
}

/// Terrain and occupancy oracle
pub trait World: Send + Sync {
    /// Map width and height in cells
    fn dimensions(&self) -> (i32, i32);

    /// Whether a unit of `unit_type` could stand with its footprint centered on `(x, y)`
    fn squares_are_walkable(&self, unit_type: &UnitTypeInfo, x: i32, y: i32, flags: WalkFlags) -> bool;

    /// Walkability for a concrete unit: its own cells and moving units never block
    fn is_walkable(&self, unit: UnitId, unit_type: &UnitTypeInfo, x: i32, y: i32) -> bool;

    /// Cost of stepping from `(x, y)` by `(dx, dy)`
    fn traversal_time_adjusted(&self, unit_type: &UnitTypeInfo, x: i32, y: i32, dx: i32, dy: i32) -> u32;

    fn square_is_goal(&self, _unit: UnitId, _unit_type: &UnitTypeInfo, action: &ActionData, x: i32, y: i32) -> bool {
        action.goal.pos == IntPosition::new(x, y)
    }

    #[inline]
    fn in_bounds(&self, x: i32, y: i32) -> bool {
        let (w, h) = self.dimensions();
        x >= 0 && y >= 0 && x < w && y < h
    }
}

/// Command layer callbacks
///
/// Path results are reported on the thread that calls
/// `apply_all_new_paths`; `unit_freed` may come from a worker.
pub trait CommandSink: Send + Sync {
    /// The unit's path failed; its current action should be dropped
    fn cancel_action(&self, unit: UnitId);

    /// A new public path is in place; the unit may start following it
    fn issue_next_action(&self, unit: UnitId);

    /// A deleted unit has been released by its worker and may be destroyed
    fn unit_freed(&self, _unit: UnitId) {}
}

/// Sink that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CommandSink for NullSink {
    fn cancel_action(&self, _unit: UnitId) {}
    fn issue_next_action(&self, _unit: UnitId) {}
}
