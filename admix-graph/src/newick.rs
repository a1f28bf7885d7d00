use crate::error::GraphError;
use crate::graph::AdmixtureGraph;
use crate::node::NodeId;
use std::fmt::Write;

impl AdmixtureGraph {
    /// Newick string of the whole tree, terminated by `;`
    pub fn newick_representation(&mut self) -> Result<String, GraphError> {
        let root = self.root()?;
        let mut ret = self.compute_newick(root)?;
        ret.push(';');
        Ok(ret)
    }

    /// Newick text of the subtree under `id`, recomputed only where the
    /// cache is dirty. Splice nodes are never printed; branch lengths span
    /// them up to the topology parent.
    pub fn compute_newick(&mut self, id: NodeId) -> Result<String, GraphError> {
        if self.try_node(id)?.newick_dirty {
            let text = self.build_newick(id)?;
            let node = self.try_node_mut(id)?;
            node.newick = text;
            node.newick_dirty = false;
        }
        Ok(self[id].newick.clone())
    }

    /// The cached text, if it is up to date
    pub fn cached_newick(&self, id: NodeId) -> Option<&str> {
        let node = self.get(id)?;
        if node.newick_dirty {
            None
        } else {
            Some(node.newick.as_str())
        }
    }

    fn build_newick(&mut self, id: NodeId) -> Result<String, GraphError> {
        let mut text = String::new();

        let node = self.try_node(id)?;
        if node.is_tip() {
            match node.name() {
                Some(name) => text.push_str(name),
                None => {
                    let _ = write!(text, "{}", node.index());
                }
            }
        } else {
            let kids: Vec<NodeId> = (0..node.num_children())
                .filter_map(|i| self.topology_child(id, i))
                .collect();
            let parts = kids
                .into_iter()
                .map(|c| self.compute_newick(c))
                .collect::<Result<Vec<String>, GraphError>>()?;
            text.push('(');
            text.push_str(&parts.join(","));
            text.push(')');
        }

        if self.topology_parent(id).is_some() {
            let _ = write!(text, ":{}", self.topology_branch_length(id));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_nodes_are_invisible() {
        let mut graph = AdmixtureGraph::new();
        let a = graph.new_tip("A", 0.0);
        let b = graph.new_tip("B", 0.0);
        let c = graph.new_tip("C", 0.0);
        let ab = graph.new_divergence(a, b, 1.0).unwrap();
        let r = graph.new_divergence(ab, c, 3.0).unwrap();
        graph.set_root(r).unwrap();

        let plain = graph.newick_representation().unwrap();
        assert_eq!(plain, "((A:1,B:1):2,C:3);");

        let donor = graph.new_splice_node();
        let recipient = graph.new_splice_node();
        graph
            .add_admixture_edge(donor, recipient, ab, c, 2.0, 0.25, true)
            .unwrap();
        assert_eq!(graph.newick_representation().unwrap(), plain);
    }

    #[test]
    fn second_call_hits_the_cache() {
        let mut graph = AdmixtureGraph::new();
        let a = graph.new_tip("A", 0.0);
        let b = graph.new_tip("B", 0.5);
        let r = graph.new_divergence(a, b, 2.0).unwrap();
        graph.set_root(r).unwrap();

        let first = graph.compute_newick(r).unwrap();
        assert!(!graph[r].newick_needs_refreshing());
        assert_eq!(graph.cached_newick(r), Some(first.as_str()));
        assert_eq!(graph.compute_newick(r).unwrap(), first);
        assert_eq!(first, "(A:2,B:1.5)");
    }
}
