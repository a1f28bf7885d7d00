use crate::error::GraphError;
use crate::graph::AdmixtureGraph;
use crate::node::NodeId;
use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Exp};

/// Simulate a Kingman coalescent tree over `names` (all tips at age 0)
/// and rescale it so that the root sits at `height`.
///
/// * `names` - at least two taxon names; they also fix the tip order
/// * `height` - root age after rescaling
/// * `rng` - random number generator
pub fn simulate_coalescent<R: Rng + ?Sized>(
    names: &[String],
    height: f64,
    rng: &mut R,
) -> Result<AdmixtureGraph, GraphError> {
    if names.len() < 2 {
        return Err(GraphError::InvariantViolation(format!(
            "need at least two taxa, got {}",
            names.len()
        )));
    }
    if !(height > 0.0) {
        return Err(GraphError::InvariantViolation(format!(
            "tree height must be positive, got {}",
            height
        )));
    }

    let mut graph = AdmixtureGraph::with_names(names.to_vec());
    let mut active: Vec<NodeId> = names.iter().map(|x| graph.new_tip(x.clone(), 0.0)).collect();
    let mut interior = vec![];
    let mut t = 0.0;

    while active.len() > 1 {
        let k = active.len() as f64;
        let waiting = Exp::new(k * (k - 1.0) / 2.0)
            .map_err(|e| GraphError::InvariantViolation(e.to_string()))?;
        t += waiting.sample(rng);

        let left = active.swap_remove(rng.random_range(0..active.len()));
        let right = active.swap_remove(rng.random_range(0..active.len()));
        let id = graph.new_divergence(left, right, t)?;
        interior.push(id);
        active.push(id);
    }

    let scale = height / t;
    for id in interior {
        let age = graph[id].age() * scale;
        graph.set_age(id, age)?;
    }
    graph.set_root(active[0])?;

    debug!(
        "simulated a coalescent tree: {} tips, tree length {:.4}",
        graph.num_tips(),
        graph.tree_length()
    );
    Ok(graph)
}
