pub mod index;
pub mod journal;
pub mod store;

pub use index::{Direction, Neighbor};
pub use store::{
    BatchOp, CommitSummary, GraphBatch, GraphSnapshot, GraphStore, NodeRef, StoreError, StoreStats,
};
