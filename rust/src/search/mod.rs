pub mod astar;  // Time-sliced A*
pub mod flood_fill;  // Scanline fill, area labelling and nearest reachable cell
pub mod node;  // Finished path arena
pub mod thread_data;  // Per-worker scratch memory
pub mod trace;  // Boundary trace toward an unreachable goal

pub use astar::{AStar, SearchLimits, SearchOutcome};
pub use flood_fill::{flood_fill, FloodFillError, ScanlineQueue};
pub use node::{Node, NodePath};
pub use thread_data::ThreadData;
pub use trace::{trace_nearest, PreprocessState, TraceOutcome};
