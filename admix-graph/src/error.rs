use crate::node::NodeId;
use thiserror::Error;

/// Errors raised by structural edits of an [`crate::AdmixtureGraph`].
///
/// Any of these reaching a sampler means the chain state can no longer be
/// trusted, so callers abort rather than retry.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node would end up older than its parent (or younger than a child).
    #[error("age ordering violated: {what} (age {age}, bound {bound})")]
    AgeOrdering {
        /// which relation failed
        what: &'static str,
        /// the offending age
        age: f64,
        /// the age it was checked against
        bound: f64,
    },

    /// A third child was attached to a binary node.
    #[error("node {0} already has two children")]
    TooManyChildren(NodeId),

    /// The named node is not a child of the given parent.
    #[error("node {child} is not a child of {parent}")]
    NotAChild {
        /// expected parent
        parent: NodeId,
        /// missing child
        child: NodeId,
    },

    /// A handle that does not refer to a live node.
    #[error("handle {0} does not refer to a live graph node")]
    DeadNode(NodeId),

    /// Root-dependent query on a graph without a root.
    #[error("graph has no root")]
    NoRoot,

    /// The edit would close a cycle through the given node.
    #[error("edit would create a cycle through node {0}")]
    Cycle(NodeId),

    /// Any other broken structural or temporal invariant.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
