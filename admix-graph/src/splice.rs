use crate::error::GraphError;
use crate::graph::AdmixtureGraph;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Where an admixture edge sat before it was spliced out
///
/// Feeding this back to [`AdmixtureGraph::restore_admixture_edge`] puts the
/// same node pair back into the same child slots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmixtureEdgePosition {
    pub donor: NodeId,
    pub recipient: NodeId,
    pub donor_site: NodeId,
    pub recipient_site: NodeId,
    pub age: f64,
    pub weight: f64,
}

impl AdmixtureGraph {
    /// Splice a detached node pair into two branches and link them as an
    /// admixture edge `donor -> recipient`.
    ///
    /// * `donor`, `recipient` - detached nodes (see `new_splice_node`)
    /// * `donor_site`, `recipient_site` - nodes whose parent branch receives
    ///   the splice
    /// * `age` - must lie within both branches
    /// * `weight` - mixing proportion in (0, 0.5]
    /// * `flag_newick` - also mark the root's Newick text dirty
    ///
    /// Nothing is mutated when validation fails.
    #[allow(clippy::too_many_arguments)]
    pub fn add_admixture_edge(
        &mut self,
        donor: NodeId,
        recipient: NodeId,
        donor_site: NodeId,
        recipient_site: NodeId,
        age: f64,
        weight: f64,
        flag_newick: bool,
    ) -> Result<(), GraphError> {
        for &x in [donor, recipient].iter() {
            let node = self.try_node(x)?;
            if node.parent.is_some() || !node.children.is_empty() {
                return Err(GraphError::InvariantViolation(format!(
                    "splice node {} is still attached",
                    x
                )));
            }
        }
        if donor == recipient {
            return Err(GraphError::Cycle(donor));
        }
        if donor_site == recipient_site {
            return Err(GraphError::InvariantViolation(format!(
                "donor and recipient share the branch above {}",
                donor_site
            )));
        }

        self.check_branch_spans(donor_site, age)?;
        self.check_branch_spans(recipient_site, age)?;

        if !(weight > 0.0 && weight <= 0.5) {
            return Err(GraphError::InvariantViolation(format!(
                "admixture weight {} outside (0, 0.5]",
                weight
            )));
        }
        if self.is_ancestor_or_self(recipient_site, donor_site) {
            return Err(GraphError::Cycle(recipient_site));
        }
        if self.is_ancestor_or_self(donor_site, recipient_site) {
            return Err(GraphError::InvariantViolation(format!(
                "recipient site {} lies below donor site {}",
                recipient_site, donor_site
            )));
        }

        self.insert_above(donor_site, donor)?;
        self.insert_above(recipient_site, recipient)?;
        self.link_admixture_pair(donor, recipient)?;

        self.set_age(donor, age)?;
        self.set_age(recipient, age)?;
        self.set_weight(donor, weight)?;
        self.set_weight(recipient, weight)?;

        let donor_outgroup = self.try_node(donor_site)?.outgroup;
        let recipient_outgroup = self.try_node(recipient_site)?.outgroup;
        self.set_outgroup(donor, donor_outgroup)?;
        self.set_outgroup(recipient, recipient_outgroup)?;

        if flag_newick {
            if let Some(root) = self.root {
                self.flag_newick_recomputation(root);
            }
        }
        Ok(())
    }

    /// Re-splice an edge removed by [`AdmixtureGraph::remove_admixture_edge`]
    pub fn restore_admixture_edge(&mut self, pos: &AdmixtureEdgePosition) -> Result<(), GraphError> {
        self.add_admixture_edge(
            pos.donor,
            pos.recipient,
            pos.donor_site,
            pos.recipient_site,
            pos.age,
            pos.weight,
            true,
        )
    }

    /// Splice both ends of an admixture edge out of their branches.
    ///
    /// `node` may be either end. The nodes keep their overlay links and stay
    /// allocated; the returned position restores them.
    pub fn remove_admixture_edge(
        &mut self,
        node: NodeId,
        flag_newick: bool,
    ) -> Result<AdmixtureEdgePosition, GraphError> {
        let donor = self.try_node(node)?.admixture_parent.unwrap_or(node);
        let recipient = self.try_node(donor)?.admixture_child.ok_or_else(|| {
            GraphError::InvariantViolation(format!("node {} is not on an admixture edge", node))
        })?;

        let age = self.try_node(donor)?.age;
        let weight = self.try_node(recipient)?.weight;

        let donor_site = self.splice_out(donor)?;
        let recipient_site = self.splice_out(recipient)?;

        if flag_newick {
            if let Some(root) = self.root {
                self.flag_newick_recomputation(root);
            }
        }

        Ok(AdmixtureEdgePosition {
            donor,
            recipient,
            donor_site,
            recipient_site,
            age,
            weight,
        })
    }

    /// Move divergence `node` together with `old_child` onto the branch
    /// above `new_child`. `node`'s other child takes its former place, and
    /// `new_child` takes that child's slot under `node`, so applying the
    /// reverse move restores the exact child order.
    pub fn subtree_prune_regraft(
        &mut self,
        node: NodeId,
        old_child: NodeId,
        new_child: NodeId,
        flag_newick: bool,
    ) -> Result<(), GraphError> {
        let p = self.try_node(node)?;
        if !p.is_divergence() {
            return Err(GraphError::InvariantViolation(format!(
                "can only prune a divergence, {} has {} children",
                node,
                p.num_children()
            )));
        }
        if !p.children.contains(&old_child) {
            return Err(GraphError::NotAChild {
                parent: node,
                child: old_child,
            });
        }
        let old_parent = p.parent.ok_or_else(|| {
            GraphError::InvariantViolation(format!("cannot prune the root {}", node))
        })?;
        let brother = p
            .children
            .iter()
            .copied()
            .find(|&c| c != old_child)
            .ok_or_else(|| GraphError::InvariantViolation(format!("{} has no brother", old_child)))?;
        let age = p.age;

        self.try_node(new_child)?;
        if new_child == node || self.is_ancestor_or_self(old_child, new_child) {
            return Err(GraphError::Cycle(new_child));
        }

        let new_parent = if new_child == brother {
            old_parent
        } else {
            self.try_node(new_child)?.parent.ok_or_else(|| {
                GraphError::InvariantViolation(format!("cannot regraft above the root {}", new_child))
            })?
        };

        let parent_age = self.try_node(new_parent)?.age;
        if age > parent_age {
            return Err(GraphError::AgeOrdering {
                what: "regrafted node older than its new parent",
                age,
                bound: parent_age,
            });
        }
        let child_age = self.try_node(new_child)?.age;
        if age < child_age {
            return Err(GraphError::AgeOrdering {
                what: "regrafted node younger than its new child",
                age,
                bound: child_age,
            });
        }

        if new_child == brother {
            return Ok(());
        }

        // prune
        self.replace_child(old_parent, node, brother)?;
        // regraft
        self.replace_child(new_parent, new_child, node)?;
        self.replace_child(node, brother, new_child)?;

        if flag_newick {
            if let Some(root) = self.root {
                self.flag_newick_recomputation(root);
            }
        }
        Ok(())
    }

    fn insert_above(&mut self, site: NodeId, splice: NodeId) -> Result<(), GraphError> {
        let parent = self.try_node(site)?.parent.ok_or_else(|| {
            GraphError::InvariantViolation(format!("no branch above the root {}", site))
        })?;
        self.replace_child(parent, site, splice)?;
        self.add_child(splice, site)
    }

    fn splice_out(&mut self, splice: NodeId) -> Result<NodeId, GraphError> {
        let node = self.try_node(splice)?;
        if !node.is_splice() {
            return Err(GraphError::InvariantViolation(format!(
                "node {} is not a splice node",
                splice
            )));
        }
        let child = node.children[0];
        let parent = node.parent.ok_or_else(|| {
            GraphError::InvariantViolation(format!("splice node {} is detached", splice))
        })?;
        self.remove_child(splice, child)?;
        self.replace_child(parent, splice, child)?;
        Ok(child)
    }

    fn check_branch_spans(&self, site: NodeId, age: f64) -> Result<(), GraphError> {
        let node = self.try_node(site)?;
        let parent = node.parent.ok_or_else(|| {
            GraphError::InvariantViolation(format!("no branch above the root {}", site))
        })?;
        let parent_age = self.try_node(parent)?.age;
        if age > parent_age {
            return Err(GraphError::AgeOrdering {
                what: "admixture edge older than the branch",
                age,
                bound: parent_age,
            });
        }
        if age < node.age {
            return Err(GraphError::AgeOrdering {
                what: "admixture edge younger than the branch",
                age,
                bound: node.age,
            });
        }
        Ok(())
    }

    /////////////////////
    // lineage queries //
    /////////////////////

    /// Is `ancestor` on the structural path from `node` to the root?
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.get(c).and_then(|x| x.parent);
        }
        false
    }

    /// Most recent common structural ancestor
    pub fn mrca(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let mut ancestors = HashSet::new();
        let mut cur = Some(a);
        while let Some(c) = cur {
            ancestors.insert(c);
            cur = self.get(c).and_then(|x| x.parent);
        }
        let mut cur = Some(b);
        while let Some(c) = cur {
            if ancestors.contains(&c) {
                return Some(c);
            }
            cur = self.get(c).and_then(|x| x.parent);
        }
        None
    }

    /// The node on `from`'s path to the root whose parent branch spans
    /// `age`; `None` if `age` is younger than `from` or older than the root.
    pub fn branch_at_age(&self, from: NodeId, age: f64) -> Option<NodeId> {
        let mut c = from;
        if self.get(c)?.age > age {
            return None;
        }
        loop {
            let p = self.get(c)?.parent?;
            if self.get(p)?.age >= age {
                return Some(c);
            }
            c = p;
        }
    }

    /// Nodes whose parent branch crosses `age`, found by descending from
    /// the root and stopping at the first child younger than `age`.
    pub fn branches_crossing_age(&self, age: f64) -> Result<Vec<NodeId>, GraphError> {
        let root = self.root()?;
        let mut ret = vec![];
        self.collect_crossing(root, age, &mut ret);
        Ok(ret)
    }

    fn collect_crossing(&self, node: NodeId, age: f64, ret: &mut Vec<NodeId>) {
        let Some(node) = self.get(node) else {
            return;
        };
        for &c in node.children.iter() {
            match self.get(c) {
                Some(child) if child.age < age => ret.push(c),
                Some(_) => self.collect_crossing(c, age, ret),
                None => {}
            }
        }
    }

    /// Map a position `x` in `[0, tree_length)` onto a branch.
    ///
    /// Branches are laid end to end in node-list order, each measured down
    /// from its parent, so the returned age lies in `(site.age, parent.age]`.
    pub fn locate_on_tree_length(&self, x: f64) -> Option<(NodeId, f64)> {
        let mut cum = 0.0;
        for &id in self.nodes.iter() {
            let Some(node) = self.get(id) else {
                continue;
            };
            let Some(parent_age) = node.parent.and_then(|p| self.get(p)).map(|p| p.age) else {
                continue;
            };
            let len = parent_age - node.age;
            if x < cum + len {
                return Some((id, parent_age - (x - cum)));
            }
            cum += len;
        }
        None
    }

    /// Nearest divergence above `node`, with its child on the path down
    /// to `node`; splice nodes in between are skipped.
    pub fn nearest_divergence_above(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        let mut child = node;
        let mut p = self.get(node)?.parent?;
        while self.get(p)?.is_splice() {
            child = p;
            p = self.get(p)?.parent?;
        }
        Some((p, child))
    }
}
