//! Connected-component ("area code") maps
//!
//! One grid per (size class, movement type). Two cells share a non-zero code
//! exactly when a unit of that class can walk between them while ignoring
//! mobile units; zero marks cells the class cannot stand on. Grids are
//! allocated and rebuilt only when a search of that class asks for them.

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::config::pathfinding::SIZE_CLASSES;
use crate::search::flood_fill::{flood_fill, AreaLabeler, ScanlineQueue};
use crate::world::{Footprint, IntPosition, MovementType, UnitTypeInfo, WalkFlags, World};

/// Which grid a unit type uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaClass {
    pub size_class: usize,
    pub movement_type: MovementType,
}

impl AreaClass {
    pub fn of(unit_type: &UnitTypeInfo) -> Self {
        Self {
            size_class: unit_type.size_class(),
            movement_type: unit_type.movement_type,
        }
    }

    #[inline]
    fn index(self) -> usize {
        self.size_class.min(SIZE_CLASSES - 1) * MovementType::COUNT + self.movement_type.index()
    }

    fn representative(self) -> UnitTypeInfo {
        UnitTypeInfo::representative(self.size_class, self.movement_type)
    }
}

#[derive(Debug, Clone)]
pub struct AreaGrid {
    width: i32,
    height: i32,
    codes: Vec<u16>,
    dirty: bool,
}

impl AreaGrid {
    fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            codes: vec![0; (width.max(0) * height.max(0)) as usize],
            dirty: true,
        }
    }

    /// Area code at `(x, y)`, zero when unwalkable or off the map
    #[inline]
    pub fn code_at(&self, x: i32, y: i32) -> u16 {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return 0;
        }
        self.codes[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn code_of(&self, pos: IntPosition) -> u16 {
        self.code_at(pos.x, pos.y)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn dimensions(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    /// Cells whose walkability can change when `footprint` is freed or
    /// covered, for a class whose own footprint is `size` wide
    fn affected_rect(&self, footprint: &Footprint, size: i32) -> (i32, i32, i32, i32) {
        let lo = |start: i32| start - size + 1 + size / 2;
        let hi = |start: i32| start + footprint.size - 1 + size / 2;
        (
            lo(footprint.pos.x).max(0),
            lo(footprint.pos.y).max(0),
            hi(footprint.pos.x).min(self.width - 1),
            hi(footprint.pos.y).min(self.height - 1),
        )
    }
}

struct AreaMapsInner {
    grids: Vec<Option<AreaGrid>>,
    next_code: u16,
    rebuilds: u64,
    scanlines: ScanlineQueue,
}

impl AreaMapsInner {
    /// Next code, wrapping past zero
    fn take_code(&mut self) -> u16 {
        let code = self.next_code;
        self.next_code = self.next_code.wrapping_add(1).max(1);
        code
    }
}

pub struct AreaMaps {
    width: i32,
    height: i32,
    inner: Mutex<AreaMapsInner>,
}

impl AreaMaps {
    pub fn new(width: i32, height: i32) -> Self {
        // every run is queued at most once and a row holds at most (w+1)/2 runs
        let capacity = (((width.max(1) + 1) / 2) * height.max(1)) as usize;
        Self {
            width,
            height,
            inner: Mutex::new(AreaMapsInner {
                grids: vec![None; SIZE_CLASSES * MovementType::COUNT],
                next_code: 1,
                rebuilds: 0,
                scanlines: ScanlineQueue::with_capacity(capacity),
            }),
        }
    }

    /// Run `f` on the grid for `class`, rebuilding it first if it is stale
    pub fn with_fresh<W, R>(&self, class: AreaClass, world: &W, f: impl FnOnce(&AreaGrid) -> R) -> R
    where
        W: World + ?Sized,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let idx = class.index();
        if inner.grids[idx].is_none() {
            inner.grids[idx] = Some(AreaGrid::new(self.width, self.height));
        }

        let needs_rebuild = inner.grids[idx].as_ref().is_some_and(AreaGrid::is_dirty);
        if needs_rebuild {
            if let Some(mut grid) = inner.grids[idx].take() {
                Self::rebuild(inner, &mut grid, class, world);
                inner.grids[idx] = Some(grid);
            }
        }

        match inner.grids[idx].as_ref() {
            Some(grid) => f(grid),
            None => f(&AreaGrid::new(0, 0)),
        }
    }

    /// Area codes of two cells for the same class, rebuilding at most once
    pub fn codes_of<W: World + ?Sized>(&self, class: AreaClass, world: &W, a: IntPosition, b: IntPosition) -> (u16, u16) {
        self.with_fresh(class, world, |grid| (grid.code_of(a), grid.code_of(b)))
    }

    fn rebuild<W: World + ?Sized>(inner: &mut AreaMapsInner, grid: &mut AreaGrid, class: AreaClass, world: &W) {
        let unit_type = class.representative();
        let (width, height) = (grid.width, grid.height);
        let walkable: Vec<bool> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| world.squares_are_walkable(&unit_type, x, y, WalkFlags::IGNORE_MOBILE))
            .collect();

        grid.codes.fill(0);
        let mut areas = 0usize;
        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) as usize;
                if !walkable[idx] || grid.codes[idx] != 0 {
                    continue;
                }
                let code = inner.take_code();
                let mut labeler = AreaLabeler { codes: &mut grid.codes, walkable: &walkable, width, code };
                if let Err(err) = flood_fill(&mut labeler, &mut inner.scanlines, (width, height), IntPosition::new(x, y)) {
                    error!(?class, %err, "area code rebuild aborted");
                    grid.dirty = true;
                    return;
                }
                areas += 1;
            }
        }

        grid.dirty = false;
        inner.rebuilds += 1;
        debug!(?class, areas, "area codes rebuilt");
    }

    /// An immobile unit now covers `footprint`
    ///
    /// Every grid whose walkable cells it touches is marked for rebuild.
    pub fn unit_added(&self, footprint: &Footprint) {
        let mut inner = self.inner.lock();
        for (idx, slot) in inner.grids.iter_mut().enumerate() {
            let Some(grid) = slot.as_mut() else { continue };
            if grid.dirty {
                continue;
            }
            let size = (idx / MovementType::COUNT + 1) as i32;
            let (x0, y0, x1, y1) = grid.affected_rect(footprint, size);
            let touches = (y0..=y1).any(|y| (x0..=x1).any(|x| grid.code_at(x, y) != 0));
            if touches {
                grid.dirty = true;
            }
        }
    }

    /// An immobile unit no longer covers `footprint`
    ///
    /// The unit must already be gone from `world`. Freed cells that border a
    /// single area join it in place; anything else marks the grid dirty.
    pub fn unit_removed<W: World + ?Sized>(&self, world: &W, footprint: &Footprint) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        for idx in 0..inner.grids.len() {
            let Some(grid) = inner.grids[idx].as_mut() else { continue };
            if grid.dirty {
                continue;
            }
            let class = AreaClass {
                size_class: idx / MovementType::COUNT,
                movement_type: MovementType::ALL[idx % MovementType::COUNT],
            };
            if !Self::patch(grid, class, world, footprint) {
                debug!(?class, "area patch ambiguous, scheduling rebuild");
                grid.dirty = true;
            }
        }
    }

    /// Label newly walkable cells around `footprint`; false if a rebuild is needed
    fn patch<W: World + ?Sized>(grid: &mut AreaGrid, class: AreaClass, world: &W, footprint: &Footprint) -> bool {
        let unit_type = class.representative();
        let (x0, y0, x1, y1) = grid.affected_rect(footprint, unit_type.size as i32);
        if x0 > x1 || y0 > y1 {
            return true;
        }
        let rect_w = x1 - x0 + 1;
        let local = |x: i32, y: i32| ((y - y0) * rect_w + (x - x0)) as usize;

        let mut freed = vec![false; (rect_w * (y1 - y0 + 1)) as usize];
        for y in y0..=y1 {
            for x in x0..=x1 {
                if grid.code_at(x, y) == 0 && world.squares_are_walkable(&unit_type, x, y, WalkFlags::IGNORE_MOBILE) {
                    freed[local(x, y)] = true;
                }
            }
        }

        let mut done = vec![false; freed.len()];
        let mut component = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                if !freed[local(x, y)] || done[local(x, y)] {
                    continue;
                }
                component.clear();
                component.push((x, y));
                done[local(x, y)] = true;
                let mut neighbour_code = None;
                let mut cursor = 0;
                while cursor < component.len() {
                    let (cx, cy) = component[cursor];
                    cursor += 1;
                    for (nx, ny) in [(cx + 1, cy), (cx - 1, cy), (cx, cy + 1), (cx, cy - 1)] {
                        let inside = nx >= x0 && nx <= x1 && ny >= y0 && ny <= y1;
                        if inside && freed[local(nx, ny)] {
                            if !done[local(nx, ny)] {
                                done[local(nx, ny)] = true;
                                component.push((nx, ny));
                            }
                            continue;
                        }
                        let code = grid.code_at(nx, ny);
                        if code == 0 {
                            continue;
                        }
                        match neighbour_code {
                            None => neighbour_code = Some(code),
                            Some(existing) if existing != code => return false,
                            Some(_) => {}
                        }
                    }
                }

                let Some(code) = neighbour_code else {
                    return false;
                };
                for &(cx, cy) in &component {
                    grid.codes[(cy * grid.width + cx) as usize] = code;
                }
            }
        }
        true
    }

    /// Mark every allocated grid stale
    pub fn mark_all_dirty(&self) {
        let mut inner = self.inner.lock();
        for grid in inner.grids.iter_mut().flatten() {
            grid.dirty = true;
        }
    }

    pub fn is_allocated(&self, class: AreaClass) -> bool {
        self.inner.lock().grids[class.index()].is_some()
    }

    pub fn is_dirty(&self, class: AreaClass) -> Option<bool> {
        self.inner.lock().grids[class.index()].as_ref().map(AreaGrid::is_dirty)
    }

    /// Number of full rebuilds performed so far
    pub fn rebuild_count(&self) -> u64 {
        self.inner.lock().rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{GridWorld, UnitId};

    const HUMAN: AreaClass = AreaClass { size_class: 0, movement_type: MovementType::Human };

    fn tower() -> UnitTypeInfo {
        UnitTypeInfo::new(1, MovementType::Building, false)
    }

    #[test]
    fn test_rebuild_splits_by_wall() {
        let world = GridWorld::from_ascii(
            "
            ...#...
            ...#...
            ...#...
            ",
        );
        let maps = AreaMaps::new(7, 3);
        assert!(!maps.is_allocated(HUMAN));

        let (left, right) = maps.codes_of(HUMAN, &world, IntPosition::new(0, 0), IntPosition::new(6, 2));
        assert_ne!(left, 0);
        assert_ne!(right, 0);
        assert_ne!(left, right);
        maps.with_fresh(HUMAN, &world, |grid| {
            assert_eq!(grid.code_at(3, 1), 0);
            assert_eq!(grid.code_at(2, 2), left);
            assert_eq!(grid.code_at(4, 0), right);
            assert_eq!(grid.code_at(-1, 0), 0);
        });
        assert_eq!(maps.is_dirty(HUMAN), Some(false));
        assert_eq!(maps.rebuild_count(), 1);

        // other classes stay unallocated
        let boats = AreaClass { size_class: 0, movement_type: MovementType::Sea };
        assert!(!maps.is_allocated(boats));
    }

    #[test]
    fn test_large_units_need_wide_passages() {
        let world = GridWorld::from_ascii(
            "
            ...#...
            .......
            ...#...
            ...#...
            ",
        );
        let maps = AreaMaps::new(7, 4);
        let (a, b) = maps.codes_of(HUMAN, &world, IntPosition::new(1, 1), IntPosition::new(5, 1));
        assert_eq!(a, b);

        let tanks = AreaClass { size_class: 1, movement_type: MovementType::MediumVehicle };
        let (a, b) = maps.codes_of(tanks, &world, IntPosition::new(1, 3), IntPosition::new(6, 3));
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_removal_patches_single_neighbour_code() {
        let world = GridWorld::new(8, 8);
        let maps = AreaMaps::new(8, 8);
        let id = UnitId::new();
        let pos = IntPosition::new(3, 3);

        maps.with_fresh(HUMAN, &world, |_| ());
        assert!(world.place_unit(id, tower(), pos));
        maps.unit_added(&tower().footprint_at(pos));
        assert_eq!(maps.is_dirty(HUMAN), Some(true));

        let code = maps.with_fresh(HUMAN, &world, |grid| {
            assert_eq!(grid.code_of(pos), 0);
            grid.code_at(0, 0)
        });

        world.remove_unit(id);
        maps.unit_removed(&world, &tower().footprint_at(pos));
        assert_eq!(maps.is_dirty(HUMAN), Some(false));
        let rebuilds = maps.rebuild_count();
        assert_eq!(maps.with_fresh(HUMAN, &world, |grid| grid.code_of(pos)), code);
        assert_eq!(maps.rebuild_count(), rebuilds);
    }

    #[test]
    fn test_removal_joining_two_areas_marks_dirty() {
        let mut world = GridWorld::new(9, 5);
        world.fill_rect(4, 0, 4, 4, crate::world::Terrain::Obstacle);
        world.set_terrain(4, 2, crate::world::Terrain::Land);
        let gate = UnitId::new();
        let pos = IntPosition::new(4, 2);
        assert!(world.place_unit(gate, tower(), pos));

        let maps = AreaMaps::new(9, 5);
        let (l, r) = maps.codes_of(HUMAN, &world, IntPosition::new(0, 0), IntPosition::new(8, 4));
        assert_ne!(l, r);

        world.remove_unit(gate);
        maps.unit_removed(&world, &tower().footprint_at(pos));
        assert_eq!(maps.is_dirty(HUMAN), Some(true));

        let (l, r) = maps.codes_of(HUMAN, &world, IntPosition::new(0, 0), IntPosition::new(8, 4));
        assert_eq!(l, r);
    }

    #[test]
    fn test_adding_far_from_a_class_leaves_it_clean() {
        let world = GridWorld::from_ascii(
            "
            ~~~~....
            ~~~~....
            ",
        );
        let maps = AreaMaps::new(8, 2);
        let boats = AreaClass { size_class: 0, movement_type: MovementType::Sea };
        maps.with_fresh(boats, &world, |_| ());
        maps.unit_added(&tower().footprint_at(IntPosition::new(6, 1)));
        assert_eq!(maps.is_dirty(boats), Some(false));
    }

    #[test]
    fn test_code_counter_skips_zero() {
        let maps = AreaMaps::new(1, 1);
        let mut inner = maps.inner.lock();
        inner.next_code = u16::MAX;
        assert_eq!(inner.take_code(), u16::MAX);
        assert_eq!(inner.take_code(), 1);
        assert_eq!(inner.take_code(), 2);
    }
}
