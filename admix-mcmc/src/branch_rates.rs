use admix_graph::{AdmixtureGraph, NodeId};
use std::collections::BTreeMap;

/// Per-branch clock rates keyed by the node below each branch.
///
/// Only topology nodes (tips and non-root divergences) carry a branch of
/// their own; splice nodes merely cut one into pieces. Keys are arena
/// handles, so re-indexing the graph never shuffles rates.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRates {
    rates: BTreeMap<NodeId, f64>,
    default_rate: f64,
}

impl BranchRates {
    pub fn new(default_rate: f64) -> Self {
        Self {
            rates: BTreeMap::new(),
            default_rate,
        }
    }

    /// One rate per topology branch of `graph`, all set to `rate`
    pub fn for_graph(graph: &AdmixtureGraph, rate: f64) -> Self {
        let mut ret = Self::new(rate);
        ret.remap(graph);
        ret
    }

    /// Drop rates of nodes that no longer own a topology branch and add
    /// the default rate for new ones. Call after the node list changes
    /// shape.
    pub fn remap(&mut self, graph: &AdmixtureGraph) {
        let keep: BTreeMap<NodeId, f64> = graph
            .nodes()
            .iter()
            .copied()
            .filter(|&id| owns_topology_branch(graph, id))
            .map(|id| (id, self.rates.get(&id).copied().unwrap_or(self.default_rate)))
            .collect();
        self.rates = keep;
    }

    pub fn get(&self, id: NodeId) -> f64 {
        self.rates.get(&id).copied().unwrap_or(self.default_rate)
    }

    pub fn set(&mut self, id: NodeId, rate: f64) {
        self.rates.insert(id, rate);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.rates.iter().map(|(&k, &v)| (k, v))
    }

    /// Rates laid out by node index (position `index - 1`); the root and
    /// splice nodes get `NaN`.
    pub fn to_index_vector(&self, graph: &AdmixtureGraph) -> Vec<f64> {
        graph
            .nodes()
            .iter()
            .map(|&id| self.rates.get(&id).copied().unwrap_or(f64::NAN))
            .collect()
    }
}

/// Is `id` the lower end of a topology branch?
pub fn owns_topology_branch(graph: &AdmixtureGraph, id: NodeId) -> bool {
    graph
        .get(id)
        .is_some_and(|node| !node.is_splice() && node.parent().is_some())
}

/// The topology node whose branch contains the branch above `id`
pub fn topology_branch_key(graph: &AdmixtureGraph, id: NodeId) -> NodeId {
    let mut cur = id;
    while let Some(c) = graph
        .get(cur)
        .filter(|x| x.is_splice())
        .and_then(|x| x.child(0))
    {
        cur = c;
    }
    cur
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_follow_handles_not_indices() -> anyhow::Result<()> {
        let mut graph = AdmixtureGraph::new();
        let a = graph.new_tip("A", 0.0);
        let b = graph.new_tip("B", 0.0);
        let r = graph.new_divergence(a, b, 1.0)?;
        graph.set_root(r)?;

        let mut rates = BranchRates::for_graph(&graph, 1.0);
        assert_eq!(rates.len(), 2);
        rates.set(b, 2.5);

        graph.set_names(vec!["B".into(), "A".into()])?;
        rates.remap(&graph);
        assert_eq!(graph[b].index(), 1);
        assert_eq!(rates.get(b), 2.5);
        assert_eq!(rates.to_index_vector(&graph)[0], 2.5);
        Ok(())
    }
}
