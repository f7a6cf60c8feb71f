//! Scanline flood fill
//!
//! One fill routine serves two callers through `FillTarget`: area labelling
//! stamps a component code into a shared grid, and the nearest-point seeker
//! walks the region a unit can reach while tracking the cell closest to an
//! unreachable goal. Connectivity is 4-way, which is exactly what 8-way moves
//! without corner cutting can reach.

use std::ops::ControlFlow;

use thiserror::Error;

use crate::world::{IntPosition, UnitId, UnitTypeInfo, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FloodFillError {
    #[error("scanline queue overflowed its capacity of {capacity} spans")]
    QueueOverflow { capacity: usize },
}

/// Horizontal run of filled cells whose neighbouring rows still need a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Span {
    y: i32,
    x0: i32,
    x1: i32,
}

/// Fixed-capacity ring buffer of pending spans
#[derive(Debug)]
pub struct ScanlineQueue {
    buf: Vec<Span>,
    head: usize,
    len: usize,
}

impl ScanlineQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![Span::default(); capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn push(&mut self, span: Span) -> Result<(), FloodFillError> {
        let capacity = self.buf.len();
        if self.len == capacity {
            return Err(FloodFillError::QueueOverflow { capacity });
        }
        let tail = (self.head + self.len) % capacity;
        self.buf[tail] = span;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<Span> {
        if self.len == 0 {
            return None;
        }
        let span = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        Some(span)
    }
}

/// What a flood fill writes into
pub trait FillTarget {
    /// The cell may be entered and has not been filled yet
    fn is_open(&mut self, x: i32, y: i32) -> bool;

    /// Mark `x0..=x1` on row `y` as filled; `Break` stops the fill
    fn fill_span(&mut self, y: i32, x0: i32, x1: i32) -> ControlFlow<()>;
}

/// Fill the 4-connected open region around `seed`
///
/// Returns the number of cells filled. Stopping early through `fill_span`
/// is not an error; running out of queue space is.
pub fn flood_fill<T: FillTarget>(
    target: &mut T,
    queue: &mut ScanlineQueue,
    (width, height): (i32, i32),
    seed: IntPosition,
) -> Result<usize, FloodFillError> {
    queue.clear();
    if seed.x < 0 || seed.y < 0 || seed.x >= width || seed.y >= height {
        return Ok(0);
    }
    if !target.is_open(seed.x, seed.y) {
        return Ok(0);
    }

    let (x0, x1) = extend_run(target, width, seed.x, seed.y);
    let mut filled = (x1 - x0 + 1) as usize;
    if target.fill_span(seed.y, x0, x1).is_break() {
        return Ok(filled);
    }
    queue.push(Span { y: seed.y, x0, x1 })?;

    while let Some(span) = queue.pop() {
        for ny in [span.y - 1, span.y + 1] {
            if ny < 0 || ny >= height {
                continue;
            }
            let mut x = span.x0;
            while x <= span.x1 {
                if !target.is_open(x, ny) {
                    x += 1;
                    continue;
                }
                let (l, r) = extend_run(target, width, x, ny);
                filled += (r - l + 1) as usize;
                if target.fill_span(ny, l, r).is_break() {
                    return Ok(filled);
                }
                queue.push(Span { y: ny, x0: l, x1: r })?;
                x = r + 1;
            }
        }
    }

    Ok(filled)
}

/// Widen an open cell to the full open run on its row
fn extend_run<T: FillTarget>(target: &mut T, width: i32, x: i32, y: i32) -> (i32, i32) {
    let mut l = x;
    while l > 0 && target.is_open(l - 1, y) {
        l -= 1;
    }
    let mut r = x;
    while r + 1 < width && target.is_open(r + 1, y) {
        r += 1;
    }
    (l, r)
}

/// Stamps one area code over a component
///
/// A zero code doubles as "not yet labelled", so the grid itself is the
/// visited set.
pub struct AreaLabeler<'a> {
    pub codes: &'a mut [u16],
    pub walkable: &'a [bool],
    pub width: i32,
    pub code: u16,
}

impl FillTarget for AreaLabeler<'_> {
    #[inline]
    fn is_open(&mut self, x: i32, y: i32) -> bool {
        let idx = (y * self.width + x) as usize;
        self.walkable[idx] && self.codes[idx] == 0
    }

    fn fill_span(&mut self, y: i32, x0: i32, x1: i32) -> ControlFlow<()> {
        let row = (y * self.width) as usize;
        self.codes[row + x0 as usize..=row + x1 as usize].fill(self.code);
        ControlFlow::Continue(())
    }
}

/// Finds the reachable cell closest to a target
///
/// Visited cells are stamped with the current generation, and cells found
/// to be blocked are stamped too so the world is asked about each cell once.
pub struct NearestSeeker<'a, W: World + ?Sized> {
    pub world: &'a W,
    pub unit: UnitId,
    pub unit_type: &'a UnitTypeInfo,
    pub marks: &'a mut [u32],
    pub generation: u32,
    pub width: i32,
    pub target: IntPosition,
    best: Option<(IntPosition, i64)>,
    reached: bool,
}

impl<'a, W: World + ?Sized> NearestSeeker<'a, W> {
    pub fn new(
        world: &'a W,
        unit: UnitId,
        unit_type: &'a UnitTypeInfo,
        marks: &'a mut [u32],
        generation: u32,
        target: IntPosition,
    ) -> Self {
        let width = world.dimensions().0;
        Self { world, unit, unit_type, marks, generation, width, target, best: None, reached: false }
    }

    /// Closest reachable cell found so far
    pub fn best(&self) -> Option<IntPosition> {
        self.best.map(|(pos, _)| pos)
    }

    /// Whether the target itself turned out to be reachable
    pub fn reached_target(&self) -> bool {
        self.reached
    }
}

impl<W: World + ?Sized> FillTarget for NearestSeeker<'_, W> {
    fn is_open(&mut self, x: i32, y: i32) -> bool {
        let idx = (y * self.width + x) as usize;
        if self.marks[idx] == self.generation {
            return false;
        }
        if !self.world.is_walkable(self.unit, self.unit_type, x, y) {
            self.marks[idx] = self.generation;
            return false;
        }
        true
    }

    fn fill_span(&mut self, y: i32, x0: i32, x1: i32) -> ControlFlow<()> {
        let row = (y * self.width) as usize;
        self.marks[row + x0 as usize..=row + x1 as usize].fill(self.generation);

        let nearest = IntPosition::new(self.target.x.clamp(x0, x1), y);
        let dist = nearest.distance_sq(self.target);
        if self.best.map_or(true, |(_, best)| dist < best) {
            self.best = Some((nearest, dist));
        }
        if dist == 0 {
            self.reached = true;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{GridWorld, MovementType};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::VecDeque;

    fn human() -> UnitTypeInfo {
        UnitTypeInfo::new(1, MovementType::Human, true)
    }

    fn reference_reachable(walkable: &[bool], width: i32, height: i32, seed: IntPosition) -> Vec<bool> {
        let mut seen = vec![false; walkable.len()];
        let idx = |x: i32, y: i32| (y * width + x) as usize;
        if !walkable[idx(seed.x, seed.y)] {
            return seen;
        }
        let mut queue = VecDeque::from([seed]);
        seen[idx(seed.x, seed.y)] = true;
        while let Some(p) = queue.pop_front() {
            for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                let (nx, ny) = (p.x + dx, p.y + dy);
                if nx < 0 || ny < 0 || nx >= width || ny >= height {
                    continue;
                }
                if walkable[idx(nx, ny)] && !seen[idx(nx, ny)] {
                    seen[idx(nx, ny)] = true;
                    queue.push_back(IntPosition::new(nx, ny));
                }
            }
        }
        seen
    }

    fn random_world(rng: &mut StdRng, width: i32, height: i32, density: f64) -> GridWorld {
        let mut world = GridWorld::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if rng.random_bool(density) {
                    world.set_terrain(x, y, crate::world::Terrain::Obstacle);
                }
            }
        }
        world.set_terrain(0, 0, crate::world::Terrain::Land);
        world
    }

    #[test]
    fn test_labeler_matches_reference_component() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let world = random_world(&mut rng, 24, 24, 0.35);
            let walkable: Vec<bool> = (0..24 * 24)
                .map(|i| world.is_walkable(UnitId::new(), &human(), i % 24, i / 24))
                .collect();
            let mut codes = vec![0u16; walkable.len()];
            let mut queue = ScanlineQueue::with_capacity(1024);
            let mut labeler = AreaLabeler { codes: &mut codes, walkable: &walkable, width: 24, code: 3 };
            let filled = flood_fill(&mut labeler, &mut queue, (24, 24), IntPosition::new(0, 0)).unwrap();

            let reference = reference_reachable(&walkable, 24, 24, IntPosition::new(0, 0));
            assert_eq!(filled, reference.iter().filter(|&&r| r).count());
            for (i, reached) in reference.iter().enumerate() {
                assert_eq!(codes[i] == 3, *reached, "cell {i}");
            }
        }
    }

    #[test]
    fn test_fill_from_blocked_seed_is_empty() {
        let walkable = vec![false; 4];
        let mut codes = vec![0u16; 4];
        let mut queue = ScanlineQueue::with_capacity(8);
        let mut labeler = AreaLabeler { codes: &mut codes, walkable: &walkable, width: 2, code: 1 };
        assert_eq!(flood_fill(&mut labeler, &mut queue, (2, 2), IntPosition::new(0, 0)), Ok(0));
        assert_eq!(flood_fill(&mut labeler, &mut queue, (2, 2), IntPosition::new(5, 0)), Ok(0));
    }

    #[test]
    fn test_tiny_queue_overflows() {
        // a comb: every other column is open, joined along the top row
        let width = 16;
        let height = 8;
        let walkable: Vec<bool> = (0..width * height)
            .map(|i| {
                let (x, y) = (i % width, i / width);
                y == 0 || x % 2 == 0
            })
            .collect();
        let mut codes = vec![0u16; walkable.len()];
        let mut queue = ScanlineQueue::with_capacity(2);
        let mut labeler = AreaLabeler { codes: &mut codes, walkable: &walkable, width, code: 1 };
        let result = flood_fill(&mut labeler, &mut queue, (width, height), IntPosition::new(0, 0));
        assert_eq!(result, Err(FloodFillError::QueueOverflow { capacity: 2 }));
    }

    #[test]
    fn test_seeker_finds_nearest_reachable_cell() {
        let mut rng = StdRng::seed_from_u64(23);
        let unit = UnitId::new();
        for _ in 0..30 {
            let world = random_world(&mut rng, 20, 20, 0.4);
            let target = IntPosition::new(rng.random_range(0..20), rng.random_range(0..20));
            let mut marks = vec![0u32; 400];
            let mut queue = ScanlineQueue::with_capacity(1024);
            let unit_type = human();
            let mut seeker = NearestSeeker::new(&world, unit, &unit_type, &mut marks, 1, target);
            flood_fill(&mut seeker, &mut queue, (20, 20), IntPosition::new(0, 0)).unwrap();
            let best = seeker.best().unwrap();

            let walkable: Vec<bool> = (0..400).map(|i| world.is_walkable(unit, &unit_type, i % 20, i / 20)).collect();
            let reference = reference_reachable(&walkable, 20, 20, IntPosition::new(0, 0));
            let best_dist = (0..400)
                .filter(|&i| reference[i as usize])
                .map(|i| IntPosition::new(i % 20, i / 20).distance_sq(target))
                .min()
                .unwrap();
            assert!(reference[(best.y * 20 + best.x) as usize]);
            assert_eq!(best.distance_sq(target), best_dist);
            assert_eq!(seeker.reached_target(), best_dist == 0);
        }
    }

    #[test]
    fn test_seeker_generation_isolates_searches() {
        let world = GridWorld::new(8, 1);
        let unit_type = human();
        let mut marks = vec![0u32; 8];
        let mut queue = ScanlineQueue::with_capacity(16);
        {
            let mut seeker = NearestSeeker::new(&world, UnitId::new(), &unit_type, &mut marks, 1, IntPosition::new(7, 0));
            flood_fill(&mut seeker, &mut queue, (8, 1), IntPosition::new(0, 0)).unwrap();
            assert!(seeker.reached_target());
        }
        // stale marks from generation 1 must not block generation 2
        let mut seeker = NearestSeeker::new(&world, UnitId::new(), &unit_type, &mut marks, 2, IntPosition::new(5, 0));
        flood_fill(&mut seeker, &mut queue, (8, 1), IntPosition::new(0, 0)).unwrap();
        assert_eq!(seeker.best(), Some(IntPosition::new(5, 0)));
    }
}
