//! Learned correction factors for the octile heuristic
//!
//! The map is cut into coarse regions (a power-of-two shift keeps each axis
//! at or below `MAX_REGION_BUCKETS`). For every size class there is one
//! factor per (target region, source region) pair, stored as `u16` fixed
//! point with `HCONST_ONE` meaning 1.0. Finished searches blend the cost
//! ratio they actually observed into the table.
//!
//! Factors above 1.0 make the heuristic inadmissible. That is accepted:
//! searches between regions with rough terrain expand fewer nodes, at the
//! price of paths that can be slightly longer than optimal.

use parking_lot::Mutex;

use crate::config::heuristic::{octile, HCONST_LEARNING_SHIFT, HCONST_ONE, HCONST_SHIFT, MAX_REGION_BUCKETS};
use crate::config::pathfinding::SIZE_CLASSES;
use crate::world::IntPosition;

/// Move `old` toward `observed` by 1/16 of the gap, at least one unit
pub fn blend(old: u16, observed: u32) -> u16 {
    let old_v = old as i64;
    let target = (observed as i64).min(u16::MAX as i64);
    let diff = target - old_v;
    if diff == 0 {
        return old;
    }
    let mut step = diff >> HCONST_LEARNING_SHIFT;
    if step == 0 {
        step = diff.signum();
    }
    // arithmetic shift rounds negative gaps away from zero; never overshoot
    if step.abs() > diff.abs() {
        step = diff;
    }
    (old_v + step).clamp(0, u16::MAX as i64) as u16
}

/// Factors for every source region toward one target region
///
/// Each worker keeps one of these for the search it is running so the hot
/// loop never touches the shared table.
#[derive(Debug, Clone, Default)]
pub struct HeuristicRow {
    shift: u32,
    regions_wide: usize,
    factors: Vec<u16>,
}

impl HeuristicRow {
    #[inline]
    pub fn factor_at(&self, x: i32, y: i32) -> u16 {
        let rx = (x.max(0) as usize) >> self.shift;
        let ry = (y.max(0) as usize) >> self.shift;
        self.factors
            .get(ry * self.regions_wide + rx)
            .copied()
            .unwrap_or(HCONST_ONE)
    }

    /// Apply the correction for `(x, y)` to a raw octile distance
    #[inline]
    pub fn scale(&self, x: i32, y: i32, raw: u32) -> u32 {
        ((raw as u64 * self.factor_at(x, y) as u64) >> HCONST_SHIFT) as u32
    }
}

pub struct HeuristicTable {
    shift: u32,
    regions_wide: usize,
    regions_tall: usize,
    /// One lazily allocated table per size class
    classes: Mutex<Vec<Option<Box<[u16]>>>>,
}

impl HeuristicTable {
    pub fn new(width: i32, height: i32) -> Self {
        let shift = Self::region_shift(width, height);
        let buckets = |len: i32| (((len.max(1) - 1) >> shift) + 1) as usize;
        Self {
            shift,
            regions_wide: buckets(width),
            regions_tall: buckets(height),
            classes: Mutex::new(vec![None; SIZE_CLASSES]),
        }
    }

    /// Smallest shift that keeps both axes at or below `MAX_REGION_BUCKETS`
    pub fn region_shift(width: i32, height: i32) -> u32 {
        let longest = width.max(height).max(1);
        let mut shift = 0;
        while ((longest - 1) >> shift) + 1 > MAX_REGION_BUCKETS {
            shift += 1;
        }
        shift
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn region_count(&self) -> usize {
        self.regions_wide * self.regions_tall
    }

    #[inline]
    pub fn region_of(&self, pos: IntPosition) -> usize {
        let rx = ((pos.x.max(0) as usize) >> self.shift).min(self.regions_wide - 1);
        let ry = ((pos.y.max(0) as usize) >> self.shift).min(self.regions_tall - 1);
        ry * self.regions_wide + rx
    }

    fn table_mut<'a>(classes: &'a mut [Option<Box<[u16]>>], size_class: usize, regions: usize) -> &'a mut [u16] {
        let slot = &mut classes[size_class.min(SIZE_CLASSES - 1)];
        slot.get_or_insert_with(|| vec![HCONST_ONE; regions * regions].into_boxed_slice())
    }

    /// Copy the factors toward `goal`'s region into `row`
    pub fn load_row(&self, size_class: usize, goal: IntPosition, row: &mut HeuristicRow) {
        let regions = self.region_count();
        let offset = self.region_of(goal) * regions;
        let mut classes = self.classes.lock();
        let table = Self::table_mut(&mut classes, size_class, regions);

        row.shift = self.shift;
        row.regions_wide = self.regions_wide;
        row.factors.clear();
        row.factors.extend_from_slice(&table[offset..offset + regions]);
    }

    pub fn factor(&self, size_class: usize, from: IntPosition, to: IntPosition) -> u16 {
        let regions = self.region_count();
        let classes = self.classes.lock();
        classes[size_class.min(SIZE_CLASSES - 1)]
            .as_ref()
            .map_or(HCONST_ONE, |table| table[self.region_of(to) * regions + self.region_of(from)])
    }

    /// Blend the cost ratios observed along a finished path
    ///
    /// `path` holds `(position, g)` pairs from start to end; the last entry
    /// is the target every ratio is measured against. Returns the number of
    /// factors touched.
    pub fn learn(&self, size_class: usize, path: &[(IntPosition, u32)]) -> usize {
        let Some(&(end, g_end)) = path.last() else {
            return 0;
        };
        let regions = self.region_count();
        let target_offset = self.region_of(end) * regions;

        let mut classes = self.classes.lock();
        let table = Self::table_mut(&mut classes, size_class, regions);
        let mut touched = 0;
        for &(pos, g) in &path[..path.len() - 1] {
            let h = octile(pos.x, pos.y, end.x, end.y);
            if h == 0 || g > g_end {
                continue;
            }
            let observed = ((g_end - g) as u64 * HCONST_ONE as u64 / h as u64).min(u16::MAX as u64) as u32;
            let cell = &mut table[target_offset + self.region_of(pos)];
            *cell = blend(*cell, observed);
            touched += 1;
        }
        touched
    }
}
