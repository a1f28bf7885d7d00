use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle of a node slot in the graph arena.
///
/// Handles survive re-indexing; only [`crate::AdmixtureGraph::erase_node`]
/// invalidates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// arena slot behind this handle
    pub fn slot(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Classification of a node by its number of structural children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// no children
    Tip,
    /// exactly one child; anchors one end of an admixture edge
    Splice,
    /// two children
    Divergence,
}

impl NodeKind {
    /// kind implied by a child count (at most two)
    pub fn from_num_children(n: usize) -> Self {
        match n {
            0 => NodeKind::Tip,
            1 => NodeKind::Splice,
            _ => NodeKind::Divergence,
        }
    }
}

/// A vertex of the admixture graph.
///
/// All links are arena handles and all mutation goes through
/// [`crate::AdmixtureGraph`], which keeps the back-references symmetric.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub(crate) name: Option<String>,
    pub(crate) age: f64,
    pub(crate) weight: f64,
    pub(crate) outgroup: bool,
    pub(crate) index: usize,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) admixture_parent: Option<NodeId>,
    pub(crate) admixture_child: Option<NodeId>,
    pub(crate) newick: String,
    pub(crate) newick_dirty: bool,
}

impl GraphNode {
    pub(crate) fn new(name: Option<String>, age: f64) -> Self {
        Self {
            name,
            age,
            weight: 1.0,
            outgroup: false,
            index: 0,
            kind: NodeKind::Tip,
            parent: None,
            children: Vec::with_capacity(2),
            admixture_parent: None,
            admixture_child: None,
            newick: String::new(),
            newick_dirty: true,
        }
    }

    /// taxon name, if any (tips)
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// time before present
    pub fn age(&self) -> f64 {
        self.age
    }

    /// mixing proportion; meaningful on recipient splice nodes
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_outgroup(&self) -> bool {
        self.outgroup
    }

    /// dense 1-based position in the graph's node list
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_tip(&self) -> bool {
        self.kind == NodeKind::Tip
    }

    pub fn is_splice(&self) -> bool {
        self.kind == NodeKind::Splice
    }

    pub fn is_divergence(&self) -> bool {
        self.kind == NodeKind::Divergence
    }

    /// structural parent
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// ordered structural children
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn child(&self, i: usize) -> Option<NodeId> {
        self.children.get(i).copied()
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// donor on the other end of an admixture edge (set on recipients)
    pub fn admixture_parent(&self) -> Option<NodeId> {
        self.admixture_parent
    }

    /// recipient on the other end of an admixture edge (set on donors)
    pub fn admixture_child(&self) -> Option<NodeId> {
        self.admixture_child
    }

    /// Is this node one end of an admixture edge?
    pub fn is_admixture_node(&self) -> bool {
        self.admixture_parent.is_some() || self.admixture_child.is_some()
    }

    pub fn newick_needs_refreshing(&self) -> bool {
        self.newick_dirty
    }

    pub(crate) fn reclassify(&mut self) {
        self.kind = NodeKind::from_num_children(self.children.len());
    }
}
