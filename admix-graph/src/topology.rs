use crate::error::GraphError;
use crate::graph::AdmixtureGraph;
use crate::node::{NodeId, NodeKind};
use log::warn;
use std::collections::HashSet;

impl AdmixtureGraph {
    /// Recompute the topological order over tree and admixture edges.
    ///
    /// Returns `false` if a cycle was found; the stored order is left
    /// untouched in that case.
    pub fn update_topological_sort(&mut self) -> bool {
        match self.sorted_topologically() {
            Some(order) => {
                self.topological_order = order;
                true
            }
            None => {
                warn!("cycle in the admixture graph");
                false
            }
        }
    }

    /// Last order computed by [`AdmixtureGraph::update_topological_sort`],
    /// ancestors first
    pub fn topological_order(&self) -> &[NodeId] {
        &self.topological_order
    }

    fn sorted_topologically(&self) -> Option<Vec<NodeId>> {
        let mut finished = HashSet::new();
        let mut on_path = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        let starts: Vec<NodeId> = self.root.into_iter().chain(self.nodes.iter().copied()).collect();
        for id in starts {
            if !self.visit(id, &mut on_path, &mut finished, &mut order) {
                return None;
            }
        }
        order.reverse();
        Some(order)
    }

    fn visit(
        &self,
        id: NodeId,
        on_path: &mut HashSet<NodeId>,
        finished: &mut HashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) -> bool {
        // reached again through another path; nothing left to do here
        if finished.contains(&id) {
            return true;
        }
        if !on_path.insert(id) {
            return false;
        }
        let Some(node) = self.get(id) else {
            return false;
        };
        let successors: Vec<NodeId> = node
            .children
            .iter()
            .copied()
            .chain(node.admixture_child)
            .collect();
        for s in successors {
            if !self.visit(s, on_path, finished, order) {
                return false;
            }
        }
        on_path.remove(&id);
        finished.insert(id);
        order.push(id);
        true
    }

    /// Every child points back to its parent and every overlay link is
    /// mirrored on the other end.
    pub fn check_all_edges(&self) -> Result<(), GraphError> {
        for &id in self.nodes.iter() {
            let node = self.try_node(id)?;
            for &c in node.children.iter() {
                if self.try_node(c)?.parent != Some(id) {
                    return Err(GraphError::InvariantViolation(format!(
                        "child {} of {} points elsewhere",
                        c, id
                    )));
                }
            }
            if let Some(p) = node.parent {
                if !self.try_node(p)?.children.contains(&id) {
                    return Err(GraphError::NotAChild {
                        parent: p,
                        child: id,
                    });
                }
            }
            if let Some(r) = node.admixture_child {
                if self.try_node(r)?.admixture_parent != Some(id) {
                    return Err(GraphError::InvariantViolation(format!(
                        "admixture child {} of {} is not linked back",
                        r, id
                    )));
                }
            }
            if let Some(d) = node.admixture_parent {
                if self.try_node(d)?.admixture_child != Some(id) {
                    return Err(GraphError::InvariantViolation(format!(
                        "admixture parent {} of {} is not linked back",
                        d, id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check structure, ages, weights, indices and acyclicity.
    pub fn validate(&self) -> Result<(), GraphError> {
        let root = self.root()?;
        if self.try_node(root)?.parent.is_some() {
            return Err(GraphError::InvariantViolation(format!(
                "root {} has a parent",
                root
            )));
        }

        self.check_all_edges()?;

        for (i, &id) in self.nodes.iter().enumerate() {
            let node = self.try_node(id)?;

            if node.index != i + 1 {
                return Err(GraphError::InvariantViolation(format!(
                    "node {} has index {} at position {}",
                    id,
                    node.index,
                    i + 1
                )));
            }
            if node.children.len() > 2 {
                return Err(GraphError::TooManyChildren(id));
            }
            if node.kind != NodeKind::from_num_children(node.children.len()) {
                return Err(GraphError::InvariantViolation(format!(
                    "node {} is {:?} with {} children",
                    id,
                    node.kind,
                    node.children.len()
                )));
            }
            if (i < self.num_tips) != node.is_tip() {
                return Err(GraphError::InvariantViolation(format!(
                    "node {} is out of the tips-first order",
                    id
                )));
            }
            if let Some(p) = node.parent {
                let parent_age = self[p].age;
                if parent_age < node.age {
                    return Err(GraphError::AgeOrdering {
                        what: "node older than its parent",
                        age: node.age,
                        bound: parent_age,
                    });
                }
            }
            if let Some(r) = node.admixture_child {
                let recipient = self.try_node(r)?;
                if recipient.age != node.age {
                    return Err(GraphError::AgeOrdering {
                        what: "admixture pair at different ages",
                        age: recipient.age,
                        bound: node.age,
                    });
                }
                if !(recipient.weight > 0.0 && recipient.weight <= 0.5) {
                    return Err(GraphError::InvariantViolation(format!(
                        "admixture weight {} outside (0, 0.5]",
                        recipient.weight
                    )));
                }
                if self.node_at(recipient.index) != Some(r) {
                    return Err(GraphError::InvariantViolation(format!(
                        "admixture child {} is not reachable",
                        r
                    )));
                }
                if !node.is_splice() || !recipient.is_splice() {
                    return Err(GraphError::InvariantViolation(format!(
                        "admixture edge {} -> {} is not anchored on splice nodes",
                        id, r
                    )));
                }
            }
        }

        let donors: Vec<NodeId> = self
            .nodes
            .iter()
            .copied()
            .filter(|&id| self[id].admixture_child.is_some())
            .collect();
        if donors != self.admixture_parents {
            return Err(GraphError::InvariantViolation(
                "admixture-parent list is stale".into(),
            ));
        }

        if self.sorted_topologically().is_none() {
            return Err(GraphError::Cycle(root));
        }
        Ok(())
    }
}
