use dashmap::DashMap;
use parking_lot::RwLock;

use super::{
    ActionArg, ActionData, Footprint, IntPosition, MovementType, UnitAction, UnitId, UnitTypeInfo,
    WalkFlags, World,
};
use crate::config::heuristic::STRAIGHT_COST;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terrain {
    #[default]
    Land,
    Water,
    Obstacle,
}

impl Terrain {
    /// Which movement types can stand on this terrain
    #[inline]
    fn allows(self, movement_type: MovementType) -> bool {
        match movement_type {
            MovementType::Airborne => true,
            MovementType::Sea => self == Terrain::Water,
            _ => self == Terrain::Land,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PlacedUnit {
    unit_type: UnitTypeInfo,
    pos: IntPosition,
    moving: bool,
}

/// In-memory terrain and unit occupancy map
///
/// Terrain is fixed after construction. Occupancy is guarded by a single
/// `RwLock` so pathfinding workers can read it while the simulation thread
/// places and removes units.
pub struct GridWorld {
    width: i32,
    height: i32,
    terrain: Vec<Terrain>,
    steepness: Vec<u16>,
    occupancy: RwLock<Vec<Option<UnitId>>>,
    units: DashMap<UnitId, PlacedUnit>,
}

impl GridWorld {
    /// Flat open land
    pub fn new(width: i32, height: i32) -> Self {
        let cells = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            terrain: vec![Terrain::Land; cells],
            steepness: vec![0; cells],
            occupancy: RwLock::new(vec![None; cells]),
            units: DashMap::new(),
        }
    }

    /// Build a map from rows of characters
    ///
    /// `.` land, `#` obstacle, `~` water, `^` steep land (steepness 40).
    /// Short rows are padded with land.
    pub fn from_ascii(rows: &str) -> Self {
        let lines: Vec<&str> = rows
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let height = lines.len() as i32;
        let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as i32;

        let mut world = Self::new(width, height);
        for (y, line) in lines.iter().enumerate() {
            for (x, ch) in line.chars().enumerate() {
                let idx = y * width as usize + x;
                match ch {
                    '#' => world.terrain[idx] = Terrain::Obstacle,
                    '~' => world.terrain[idx] = Terrain::Water,
                    '^' => world.steepness[idx] = 40,
                    _ => {}
                }
            }
        }
        world
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            None
        } else {
            Some((y * self.width + x) as usize)
        }
    }

    pub fn terrain(&self, x: i32, y: i32) -> Option<Terrain> {
        self.index(x, y).map(|idx| self.terrain[idx])
    }

    pub fn set_terrain(&mut self, x: i32, y: i32, terrain: Terrain) {
        if let Some(idx) = self.index(x, y) {
            self.terrain[idx] = terrain;
        }
    }

    pub fn set_steepness(&mut self, x: i32, y: i32, steepness: u16) {
        if let Some(idx) = self.index(x, y) {
            self.steepness[idx] = steepness;
        }
    }

    /// Fill a rectangle with one terrain kind, inclusive bounds
    pub fn fill_rect(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, terrain: Terrain) {
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.set_terrain(x, y, terrain);
            }
        }
    }

    fn terrain_fits(&self, unit_type: &UnitTypeInfo, footprint: &Footprint) -> bool {
        footprint.cells().all(|(x, y)| {
            self.index(x, y)
                .is_some_and(|idx| self.terrain[idx].allows(unit_type.movement_type))
        })
    }

    fn is_moving(&self, unit: UnitId) -> bool {
        self.units.get(&unit).is_some_and(|placed| placed.moving)
    }

    /// Whether `flags` let a walker pass through `occupant`
    fn occupant_ignored(&self, occupant: UnitId, flags: WalkFlags) -> bool {
        self.units.get(&occupant).map_or(true, |placed| {
            (flags.contains(WalkFlags::IGNORE_MOBILE) && placed.unit_type.is_mobile)
                || (flags.contains(WalkFlags::IGNORE_MOVING) && placed.moving)
        })
    }

    /// Put a unit on the map; returns false if its footprint is blocked
    pub fn place_unit(&self, unit: UnitId, unit_type: UnitTypeInfo, pos: IntPosition) -> bool {
        let footprint = unit_type.footprint_at(pos);
        if !self.terrain_fits(&unit_type, &footprint) {
            return false;
        }

        {
            let mut occupancy = self.occupancy.write();
            let blocked = footprint.cells().any(|(x, y)| {
                self.index(x, y)
                    .and_then(|idx| occupancy[idx])
                    .is_some_and(|occupant| occupant != unit)
            });
            if blocked {
                return false;
            }
            for (x, y) in footprint.cells() {
                if let Some(idx) = self.index(x, y) {
                    occupancy[idx] = Some(unit);
                }
            }
        }

        self.units.insert(unit, PlacedUnit { unit_type, pos, moving: false });
        true
    }

    /// Take a unit off the map, returning where it stood
    pub fn remove_unit(&self, unit: UnitId) -> Option<(UnitTypeInfo, IntPosition)> {
        let (_, placed) = self.units.remove(&unit)?;
        let footprint = placed.unit_type.footprint_at(placed.pos);
        let mut occupancy = self.occupancy.write();
        for (x, y) in footprint.cells() {
            if let Some(idx) = self.index(x, y) {
                if occupancy[idx] == Some(unit) {
                    occupancy[idx] = None;
                }
            }
        }
        Some((placed.unit_type, placed.pos))
    }

    pub fn set_moving(&self, unit: UnitId, moving: bool) {
        if let Some(mut placed) = self.units.get_mut(&unit) {
            placed.moving = moving;
        }
    }

    pub fn unit_position(&self, unit: UnitId) -> Option<IntPosition> {
        self.units.get(&unit).map(|placed| placed.pos)
    }

    fn unit_footprint(&self, unit: UnitId) -> Option<Footprint> {
        self.units
            .get(&unit)
            .map(|placed| placed.unit_type.footprint_at(placed.pos))
    }
}

impl World for GridWorld {
    fn dimensions(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    fn squares_are_walkable(&self, unit_type: &UnitTypeInfo, x: i32, y: i32, flags: WalkFlags) -> bool {
        let footprint = unit_type.footprint_at(IntPosition::new(x, y));
        if !self.terrain_fits(unit_type, &footprint) {
            return false;
        }

        let occupancy = self.occupancy.read();
        let free = footprint.cells().all(|(cx, cy)| {
            match self.index(cx, cy).and_then(|idx| occupancy[idx]) {
                None => true,
                Some(occupant) => self.occupant_ignored(occupant, flags),
            }
        });
        free
    }

    fn is_walkable(&self, unit: UnitId, unit_type: &UnitTypeInfo, x: i32, y: i32) -> bool {
        let footprint = unit_type.footprint_at(IntPosition::new(x, y));
        if !self.terrain_fits(unit_type, &footprint) {
            return false;
        }

        let occupancy = self.occupancy.read();
        let free = footprint.cells().all(|(cx, cy)| {
            match self.index(cx, cy).and_then(|idx| occupancy[idx]) {
                None => true,
                Some(occupant) => occupant == unit || self.is_moving(occupant),
            }
        });
        free
    }

    fn traversal_time_adjusted(&self, unit_type: &UnitTypeInfo, x: i32, y: i32, dx: i32, dy: i32) -> u32 {
        let footprint = unit_type.footprint_at(IntPosition::new(x + dx, y + dy));
        let mut total = 0u32;
        let mut count = 0u32;
        for (cx, cy) in footprint.cells() {
            if let Some(idx) = self.index(cx, cy) {
                total += self.steepness[idx] as u32;
                count += 1;
            }
        }
        let steepness = if count > 0 { total / count } else { 0 };

        let cost = STRAIGHT_COST + steepness / 2;
        if dx != 0 && dy != 0 {
            cost + cost / 2
        } else {
            cost
        }
    }

    fn square_is_goal(&self, _unit: UnitId, unit_type: &UnitTypeInfo, action: &ActionData, x: i32, y: i32) -> bool {
        let here = unit_type.footprint_at(IntPosition::new(x, y));
        let exact = action.goal.pos == IntPosition::new(x, y);

        match action.action {
            UnitAction::Build => {
                let site = match (action.arg, action.goal.target) {
                    (Some(ActionArg::BuildType(build_type)), _) => Some(build_type.footprint_at(action.goal.pos)),
                    (None, Some(target)) => self.unit_footprint(target),
                    (None, None) => None,
                };
                site.map_or(exact, |site| here.is_next_to(&site))
            }
            UnitAction::Attack
            | UnitAction::MoveAttackUnit
            | UnitAction::Follow
            | UnitAction::Collect
            | UnitAction::Repair => action
                .goal
                .target
                .and_then(|target| self.unit_footprint(target))
                .map_or(exact, |target| here.gap(&target) <= 1),
            _ => exact,
        }
    }
}
