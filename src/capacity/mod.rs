//! Node capacity accounting
//!
//! Reads per-node free-capacity annotations published by the node agents
//! and answers the placement queries the CSI adapter and scheduler
//! extender rely on.

mod node_reader;
mod tracker;

pub use node_reader::{KubeNodeReader, NodeInfo, NodeReader, NodeReaderRef};
pub use tracker::CapacityTracker;
