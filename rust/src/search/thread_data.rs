use crate::search::flood_fill::ScanlineQueue;
use crate::storage::binary_heap::IndexedHeap;
use crate::storage::heuristic_table::HeuristicRow;

pub const NO_PARENT: u32 = u32::MAX;

/// Per-worker scratch arena sized to the map
///
/// Open/closed state and flood marks are generation stamped: bumping the
/// generation invalidates every cell at once instead of clearing the grids.
pub struct ThreadData {
    pub width: i32,
    pub height: i32,
    pub heap: IndexedHeap,
    pub g: Vec<u32>,
    pub h: Vec<u32>,
    pub parent: Vec<u32>,
    /// Generation in which `g`/`h`/`parent` were last written
    pub touched: Vec<u32>,
    /// Generation in which the cell was closed
    pub closed: Vec<u32>,
    pub generation: u32,
    pub flood_marks: Vec<u32>,
    pub flood_generation: u32,
    pub scanlines: ScanlineQueue,
    pub hconst_row: HeuristicRow,
}

impl ThreadData {
    pub fn new(width: i32, height: i32, scanline_capacity: usize) -> Self {
        let cells = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            heap: IndexedHeap::with_capacity(cells),
            g: vec![0; cells],
            h: vec![0; cells],
            parent: vec![NO_PARENT; cells],
            touched: vec![0; cells],
            closed: vec![0; cells],
            generation: 0,
            flood_marks: vec![0; cells],
            flood_generation: 0,
            scanlines: ScanlineQueue::with_capacity(scanline_capacity),
            hconst_row: HeuristicRow::default(),
        }
    }

    #[inline]
    pub fn index(&self, x: i32, y: i32) -> u32 {
        (y * self.width + x) as u32
    }

    #[inline]
    pub fn coords(&self, index: u32) -> (i32, i32) {
        let index = index as i32;
        (index % self.width, index / self.width)
    }

    /// Invalidate all search state for a new A* run
    pub fn begin_search(&mut self) {
        self.heap.clear();
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.touched.fill(0);
            self.closed.fill(0);
            self.generation = 1;
        }
    }

    /// Invalidate flood marks and hand out the generation to stamp with
    pub fn begin_flood(&mut self) -> u32 {
        self.flood_generation = self.flood_generation.wrapping_add(1);
        if self.flood_generation == 0 {
            self.flood_marks.fill(0);
            self.flood_generation = 1;
        }
        self.flood_generation
    }

    #[inline]
    pub fn is_touched(&self, index: u32) -> bool {
        self.touched[index as usize] == self.generation
    }

    #[inline]
    pub fn is_closed(&self, index: u32) -> bool {
        self.closed[index as usize] == self.generation
    }

    #[inline]
    pub fn close(&mut self, index: u32) {
        self.closed[index as usize] = self.generation;
    }

    #[inline]
    pub fn record(&mut self, index: u32, g: u32, h: u32, parent: u32) {
        let i = index as usize;
        self.touched[i] = self.generation;
        self.g[i] = g;
        self.h[i] = h;
        self.parent[i] = parent;
    }
}
