//! Async building blocks for I/O fan-out.

mod lookahead;
mod parallel_map;

pub use lookahead::{Lookahead, LookaheadError};
pub use parallel_map::{parallel_map, ParallelMapError};
