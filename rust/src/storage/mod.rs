pub mod area_map;  // Per-(size, movement type) connectivity codes
pub mod binary_heap;  // Indexed min-heap for the open list
pub mod heuristic_table;  // Learned per-region heuristic scaling

pub use area_map::{AreaClass, AreaGrid, AreaMaps};
pub use binary_heap::IndexedHeap;
pub use heuristic_table::{HeuristicRow, HeuristicTable};
