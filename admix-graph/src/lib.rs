//! Time-calibrated binary trees overlaid with admixture edges.
//!
//! Nodes live in an arena owned by [`AdmixtureGraph`] and are addressed by
//! stable [`NodeId`] handles. Structural edits go through the graph so that
//! parent links, node kinds and cached Newick text stay consistent.

/// Error taxonomy of graph edits
pub mod error;

/// Graph nodes and arena handles
pub mod node;

/// Arena, indexing and structural primitives
pub mod graph;

/// Admixture-edge splicing and lineage queries
pub mod splice;

/// Cached Newick emission
pub mod newick;

/// Cycle detection and invariant validation
pub mod topology;

/// Tip sets, edge strings and snapshots
pub mod summary;

/// Random starting trees
pub mod simulate;

pub use error::GraphError;
pub use graph::AdmixtureGraph;
pub use node::{GraphNode, NodeId, NodeKind};
pub use splice::AdmixtureEdgePosition;
pub use summary::GraphSnapshot;
