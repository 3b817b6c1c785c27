pub mod graph;

pub use graph::{Direction, Neighbor, TypedGraph};
