use crate::error::GraphError;
use crate::graph::AdmixtureGraph;
use crate::node::{NodeId, NodeKind};
use serde::{Deserialize, Serialize};

impl AdmixtureGraph {
    /// Tips under `id` along structural edges, in index order
    pub fn descendant_tips(&self, id: NodeId) -> Vec<NodeId> {
        let mut ret = vec![];
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let Some(node) = self.get(n) else {
                continue;
            };
            if node.is_tip() {
                ret.push(n);
            } else {
                stack.extend(node.children.iter().copied());
            }
        }
        ret.sort_by_key(|&t| self[t].index);
        ret
    }

    pub fn descendant_tip_names(&self, id: NodeId) -> Vec<String> {
        self.descendant_tips(id)
            .into_iter()
            .map(|t| match self[t].name() {
                Some(x) => x.to_string(),
                None => self[t].index.to_string(),
            })
            .collect()
    }

    /// Membership of each tip (by index) below `id`
    pub fn taxon_bipartition(&self, id: NodeId) -> Vec<bool> {
        let mut ret = vec![false; self.num_tips()];
        for t in self.descendant_tips(id) {
            if let Some(x) = self[t].index.checked_sub(1).and_then(|i| ret.get_mut(i)) {
                *x = true;
            }
        }
        ret
    }

    /// `A,B -> C\ta=<age>\tw=<weight>` for the edge `donor -> recipient`
    pub fn admixture_edge_str(&self, donor: NodeId, recipient: NodeId) -> Result<String, GraphError> {
        let r = self.try_node(recipient)?;
        self.try_node(donor)?;
        Ok(format!(
            "{} -> {}\ta={}\tw={}",
            self.descendant_tip_names(donor).join(","),
            self.descendant_tip_names(recipient).join(","),
            r.age,
            r.weight
        ))
    }

    /// Plain copy of the reachable structure, for comparison and logging
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .nodes
            .iter()
            .map(|&id| {
                let node = &self[id];
                NodeSnapshot {
                    id,
                    index: node.index,
                    name: node.name.clone(),
                    age: node.age,
                    weight: node.weight,
                    outgroup: node.outgroup,
                    kind: node.kind,
                    parent: node.parent,
                    children: node.children.clone(),
                    admixture_parent: node.admixture_parent,
                    admixture_child: node.admixture_child,
                }
            })
            .collect();

        GraphSnapshot {
            root: self.root,
            nodes,
            admixture_parents: self.admixture_parents.clone(),
            live_nodes: self.slots.iter().filter(|x| x.is_some()).count(),
        }
    }
}

/// One node of a [`GraphSnapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub index: usize,
    pub name: Option<String>,
    pub age: f64,
    pub weight: f64,
    pub outgroup: bool,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub admixture_parent: Option<NodeId>,
    pub admixture_child: Option<NodeId>,
}

/// Serializable image of a graph, nodes in index order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub root: Option<NodeId>,
    pub nodes: Vec<NodeSnapshot>,
    pub admixture_parents: Vec<NodeId>,
    pub live_nodes: usize,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
