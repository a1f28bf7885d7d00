use crate::error::GraphError;
use crate::node::{GraphNode, NodeId};
use log::trace;
use std::collections::{HashMap, HashSet};
use std::ops::Index;

/// Rooted, time-calibrated binary tree overlaid with admixture edges.
///
/// Nodes are stored in an arena of slots. The node list is rebuilt by
/// [`AdmixtureGraph::reindex`] (tips first, root last) and each node's
/// `index` is its 1-based position in that list.
#[derive(Debug, Clone, Default)]
pub struct AdmixtureGraph {
    pub(crate) slots: Vec<Option<GraphNode>>,
    pub(crate) free_slots: Vec<usize>,
    pub(crate) root: Option<NodeId>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) num_tips: usize,
    pub(crate) admixture_parents: Vec<NodeId>,
    pub(crate) names: Vec<String>,
    pub(crate) topological_order: Vec<NodeId>,
}

/// Panics on an erased handle; [`AdmixtureGraph::try_node`] reports it as
/// [`GraphError::DeadNode`] instead.
impl Index<NodeId> for AdmixtureGraph {
    type Output = GraphNode;

    fn index(&self, id: NodeId) -> &GraphNode {
        match self.slots.get(id.0) {
            Some(Some(node)) => node,
            _ => panic!("dead node handle {}", id),
        }
    }
}

impl AdmixtureGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty graph whose tips will be ordered by these taxon names
    pub fn with_names(names: Vec<String>) -> Self {
        Self {
            names,
            ..Self::default()
        }
    }

    ///////////////////////////
    // arena and node access //
    ///////////////////////////

    pub fn get(&self, id: NodeId) -> Option<&GraphNode> {
        self.slots.get(id.0).and_then(|x| x.as_ref())
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn try_node(&self, id: NodeId) -> Result<&GraphNode, GraphError> {
        self.get(id).ok_or(GraphError::DeadNode(id))
    }

    pub(crate) fn try_node_mut(&mut self, id: NodeId) -> Result<&mut GraphNode, GraphError> {
        match self.slots.get_mut(id.0) {
            Some(Some(node)) => Ok(node),
            _ => Err(GraphError::DeadNode(id)),
        }
    }

    fn alloc(&mut self, node: GraphNode) -> NodeId {
        if let Some(slot) = self.free_slots.pop() {
            self.slots[slot] = Some(node);
            NodeId(slot)
        } else {
            self.slots.push(Some(node));
            NodeId(self.slots.len() - 1)
        }
    }

    /// Allocate a detached tip
    pub fn new_tip(&mut self, name: impl Into<String>, age: f64) -> NodeId {
        self.alloc(GraphNode::new(Some(name.into()), age))
    }

    /// Allocate a detached, childless interior node
    pub fn new_interior(&mut self, age: f64) -> NodeId {
        self.alloc(GraphNode::new(None, age))
    }

    /// Allocate a detached node to be spliced into a branch later
    pub fn new_splice_node(&mut self) -> NodeId {
        self.alloc(GraphNode::new(None, 0.0))
    }

    /// Allocate a divergence node joining two detached subtrees
    ///
    /// * `left` - first child
    /// * `right` - second child
    /// * `age` - must not be younger than either child
    pub fn new_divergence(
        &mut self,
        left: NodeId,
        right: NodeId,
        age: f64,
    ) -> Result<NodeId, GraphError> {
        for &c in [left, right].iter() {
            let child = self.try_node(c)?;
            if child.age > age {
                return Err(GraphError::AgeOrdering {
                    what: "divergence younger than its child",
                    age,
                    bound: child.age,
                });
            }
            if child.parent.is_some() {
                return Err(GraphError::InvariantViolation(format!(
                    "node {} already has a parent",
                    c
                )));
            }
        }
        let id = self.new_interior(age);
        self.add_child(id, left)?;
        self.add_child(id, right)?;
        Ok(id)
    }

    /// Tombstone a detached node, releasing its slot for reuse
    pub fn erase_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.try_node(id)?;
        if node.parent.is_some() || !node.children.is_empty() || self.root == Some(id) {
            return Err(GraphError::InvariantViolation(format!(
                "cannot erase attached node {}",
                id
            )));
        }
        let partners = [node.admixture_parent, node.admixture_child];
        for partner in partners.into_iter().flatten() {
            if let Some(Some(other)) = self.slots.get_mut(partner.0) {
                if other.admixture_parent == Some(id) {
                    other.admixture_parent = None;
                }
                if other.admixture_child == Some(id) {
                    other.admixture_child = None;
                }
            }
        }
        self.slots[id.0] = None;
        self.free_slots.push(id.0);
        Ok(())
    }

    ////////////////////////////
    // structural primitives  //
    ////////////////////////////

    /// Append `child` to `parent`'s children and point it back
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.try_node(child)?;
        let p = self.try_node(parent)?;
        if parent == child {
            return Err(GraphError::Cycle(parent));
        }
        if p.children.len() >= 2 {
            return Err(GraphError::TooManyChildren(parent));
        }
        if p.children.contains(&child) {
            return Err(GraphError::InvariantViolation(format!(
                "node {} is already a child of {}",
                child, parent
            )));
        }
        let p = self.try_node_mut(parent)?;
        p.children.push(child);
        p.reclassify();
        self.try_node_mut(child)?.parent = Some(parent);
        self.flag_newick_recomputation(parent);
        self.flag_topology_descendant(child)?;
        Ok(())
    }

    /// Detach `child` from `parent`
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.try_node(child)?;
        let pos = self
            .try_node(parent)?
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or(GraphError::NotAChild { parent, child })?;
        let p = self.try_node_mut(parent)?;
        p.children.remove(pos);
        p.reclassify();
        let c = self.try_node_mut(child)?;
        if c.parent == Some(parent) {
            c.parent = None;
        }
        self.flag_newick_recomputation(parent);
        Ok(())
    }

    /// Put `new` in the child slot held by `old`, keeping the child order
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        old: NodeId,
        new: NodeId,
    ) -> Result<(), GraphError> {
        self.try_node(old)?;
        self.try_node(new)?;
        if parent == new {
            return Err(GraphError::Cycle(parent));
        }
        let pos = self
            .try_node(parent)?
            .children
            .iter()
            .position(|&c| c == old)
            .ok_or(GraphError::NotAChild { parent, child: old })?;
        self.try_node_mut(parent)?.children[pos] = new;
        let o = self.try_node_mut(old)?;
        if o.parent == Some(parent) {
            o.parent = None;
        }
        self.try_node_mut(new)?.parent = Some(parent);
        self.flag_newick_recomputation(parent);
        self.flag_topology_descendant(new)?;
        Ok(())
    }

    /// Rewire the parent back-reference only
    pub fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), GraphError> {
        if let Some(p) = parent {
            self.try_node(p)?;
        }
        self.try_node_mut(node)?.parent = parent;
        self.flag_topology_descendant(node)?;
        Ok(())
    }

    /// Set the age and invalidate every Newick text that prints it
    pub fn set_age(&mut self, id: NodeId, age: f64) -> Result<(), GraphError> {
        self.try_node_mut(id)?.age = age;
        self.flag_newick_recomputation(id);
        let children = self.try_node(id)?.children.clone();
        for c in children {
            self.flag_topology_descendant(c)?;
        }
        Ok(())
    }

    pub fn set_weight(&mut self, id: NodeId, weight: f64) -> Result<(), GraphError> {
        self.try_node_mut(id)?.weight = weight;
        Ok(())
    }

    pub fn set_outgroup(&mut self, id: NodeId, outgroup: bool) -> Result<(), GraphError> {
        self.try_node_mut(id)?.outgroup = outgroup;
        Ok(())
    }

    /// Link `donor -> recipient` in the admixture overlay
    pub fn link_admixture_pair(
        &mut self,
        donor: NodeId,
        recipient: NodeId,
    ) -> Result<(), GraphError> {
        self.try_node(donor)?;
        self.try_node(recipient)?;
        if donor == recipient {
            return Err(GraphError::Cycle(donor));
        }
        self.try_node_mut(donor)?.admixture_child = Some(recipient);
        self.try_node_mut(recipient)?.admixture_parent = Some(donor);
        Ok(())
    }

    /// Mark `id` and every ancestor as needing a fresh Newick string
    pub fn flag_newick_recomputation(&mut self, id: NodeId) {
        let mut cur = Some(id);
        let mut steps = 0;
        while let Some(c) = cur {
            if steps > self.slots.len() {
                break;
            }
            match self.slots.get_mut(c.0) {
                Some(Some(node)) => {
                    node.newick_dirty = true;
                    cur = node.parent;
                }
                _ => break,
            }
            steps += 1;
        }
    }

    /// Mark `id` and the splice nodes below it down to the first topology
    /// node; their branch-length text depends on the ages above them.
    fn flag_topology_descendant(&mut self, id: NodeId) -> Result<(), GraphError> {
        let mut cur = id;
        let max_steps = self.slots.len();
        let mut steps = 0;
        loop {
            let node = self.try_node_mut(cur)?;
            node.newick_dirty = true;
            if node.children.len() != 1 || steps > max_steps {
                return Ok(());
            }
            cur = node.children[0];
            steps += 1;
        }
    }

    ///////////////////////////////
    // topology through splices  //
    ///////////////////////////////

    /// First non-splice ancestor
    pub fn topology_parent(&self, id: NodeId) -> Option<NodeId> {
        let mut p = self.get(id)?.parent?;
        while self.get(p)?.is_splice() {
            p = self.get(p)?.parent?;
        }
        Some(p)
    }

    /// `i`-th child, descending through splice nodes
    pub fn topology_child(&self, id: NodeId, i: usize) -> Option<NodeId> {
        let mut c = self.get(id)?.child(i)?;
        while self.get(c)?.is_splice() {
            c = self.get(c)?.child(0)?;
        }
        Some(c)
    }

    /// `parent.age - age`, zero at the root
    pub fn branch_length(&self, id: NodeId) -> f64 {
        match self.get(id) {
            Some(node) => node
                .parent
                .and_then(|p| self.get(p))
                .map(|p| p.age - node.age)
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// Branch length to the topology parent, accumulated across splices
    pub fn topology_branch_length(&self, id: NodeId) -> f64 {
        match (self.get(id), self.topology_parent(id)) {
            (Some(node), Some(p)) => self.get(p).map_or(0.0, |p| p.age - node.age),
            _ => 0.0,
        }
    }

    //////////////////////////////
    // root, indexing and lists //
    //////////////////////////////

    pub fn root(&self) -> Result<NodeId, GraphError> {
        self.root.ok_or(GraphError::NoRoot)
    }

    /// Install the root and rebuild the node list
    pub fn set_root(&mut self, root: NodeId) -> Result<(), GraphError> {
        if self.try_node(root)?.parent.is_some() {
            return Err(GraphError::InvariantViolation(format!(
                "root {} has a parent",
                root
            )));
        }
        self.root = Some(root);
        self.reindex()
    }

    /// Rebuild the tips-first node list, dense 1-based indices and the
    /// admixture-parent list from the current structure.
    pub fn reindex(&mut self) -> Result<(), GraphError> {
        let root = self.root()?;

        let mut tips = vec![];
        let mut interior = vec![];
        let mut visited = HashSet::new();
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                interior.push(id);
                continue;
            }
            if !visited.insert(id) {
                return Err(GraphError::Cycle(id));
            }
            let node = self.try_node(id)?;
            if node.children.is_empty() {
                tips.push(id);
            } else {
                stack.push((id, true));
                for &c in node.children.iter().rev() {
                    stack.push((c, false));
                }
            }
        }

        if !self.names.is_empty() {
            let position: HashMap<&str, usize> = self
                .names
                .iter()
                .enumerate()
                .map(|(i, x)| (x.as_str(), i))
                .collect();
            tips.sort_by_key(|&t| {
                self.get(t)
                    .and_then(|x| x.name())
                    .and_then(|x| position.get(x).copied())
                    .unwrap_or(usize::MAX)
            });
        }

        self.num_tips = tips.len();
        self.nodes = tips;
        self.nodes.extend(interior);

        for i in 0..self.nodes.len() {
            let id = self.nodes[i];
            self.try_node_mut(id)?.index = i + 1;
        }

        self.admixture_parents = self
            .nodes
            .iter()
            .copied()
            .filter(|&id| self.get(id).is_some_and(|x| x.admixture_child.is_some()))
            .collect();
        trace!(
            "reindexed {} nodes, {} admixture edges",
            self.nodes.len(),
            self.admixture_parents.len()
        );
        Ok(())
    }

    /// Nodes in index order: tips first, root last
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Node with the given 1-based index
    pub fn node_at(&self, index: usize) -> Option<NodeId> {
        index.checked_sub(1).and_then(|i| self.nodes.get(i).copied())
    }

    pub fn tips(&self) -> &[NodeId] {
        &self.nodes[..self.num_tips]
    }

    pub fn num_tips(&self) -> usize {
        self.num_tips
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Divergence nodes other than the root
    pub fn num_interior_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|&&id| Some(id) != self.root && self.get(id).is_some_and(|x| x.is_divergence()))
            .count()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Replace the taxon order; tips are re-indexed when a root exists
    pub fn set_names(&mut self, names: Vec<String>) -> Result<(), GraphError> {
        self.names = names;
        if self.root.is_some() {
            self.reindex()?;
        }
        Ok(())
    }

    pub fn tip_by_name(&self, name: &str) -> Option<NodeId> {
        self.tips()
            .iter()
            .copied()
            .find(|&t| self.get(t).and_then(|x| x.name()) == Some(name))
    }

    /// Donor splice nodes in index order
    pub fn admixture_parents(&self) -> &[NodeId] {
        &self.admixture_parents
    }

    pub fn num_admixture_parents(&self) -> usize {
        self.admixture_parents.len()
    }

    pub fn num_admixture_children(&self) -> usize {
        self.nodes
            .iter()
            .filter(|&&id| self.get(id).is_some_and(|x| x.admixture_parent.is_some()))
            .count()
    }

    /// For every tip, the nearest donor splice node on its path to the
    /// root; each donor listed once, in index order.
    pub fn first_admixture_parent_per_lineage(&self) -> Vec<NodeId> {
        let mut found = HashSet::new();
        for &tip in self.tips() {
            let mut cur = self.get(tip).and_then(|x| x.parent);
            while let Some(node) = cur.and_then(|c| self.get(c)) {
                if node.admixture_child.is_some() {
                    found.extend(cur);
                    break;
                }
                cur = node.parent;
            }
        }
        let mut ret: Vec<NodeId> = found.into_iter().collect();
        ret.sort_by_key(|&id| self.get(id).map_or(usize::MAX, |x| x.index));
        ret
    }

    ////////////////
    // statistics //
    ////////////////

    /// Sum of all branch lengths; splice nodes split branches without
    /// changing the total.
    pub fn tree_length(&self) -> f64 {
        self.nodes.iter().map(|&id| self.branch_length(id)).sum()
    }

    pub fn tree_height(&self) -> f64 {
        self.root.and_then(|r| self.get(r)).map_or(0.0, |r| r.age)
    }

    /// Tree length measured in units of the root age
    pub fn unit_tree_length(&self) -> f64 {
        let height = self.tree_height();
        if height > 0.0 {
            self.tree_length() / height
        } else {
            0.0
        }
    }
}
