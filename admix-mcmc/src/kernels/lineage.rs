//! Graph walks shared by several kernels.

use crate::random::{ln_beta_pdf, RandomSource};
use admix_graph::{AdmixtureEdgePosition, AdmixtureGraph, NodeId};

/// Largest admixture weight; weights are proposed on `(0, 1)` and scaled
pub const MAX_ADMIXTURE_WEIGHT: f64 = 0.5;

/// Uniformly chosen donor among the graph's admixture edges
pub fn pick_admixture_edge(graph: &AdmixtureGraph, rng: &mut dyn RandomSource) -> Option<NodeId> {
    let donors = graph.admixture_parents();
    if donors.is_empty() {
        None
    } else {
        Some(donors[rng.index(donors.len())])
    }
}

/// Admissible ages for an edge between the lineages of two tips
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeWindow {
    pub min: f64,
    pub max: f64,
}

impl AgeWindow {
    pub fn contains(&self, age: f64) -> bool {
        age >= self.min && age <= self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// From the older of the two tips up to their MRCA. Unless sister
/// admixture is allowed, the window stops at the older topology child of
/// the MRCA, so two sister lineages never get one; dead handles give no
/// window either.
pub fn admixture_window(
    graph: &AdmixtureGraph,
    a: NodeId,
    b: NodeId,
    allow_sister_admixture: bool,
) -> Option<AgeWindow> {
    let mrca = graph.mrca(a, b)?;
    let min = graph.get(a)?.age().max(graph.get(b)?.age());
    let max = if allow_sister_admixture {
        graph.get(mrca)?.age()
    } else {
        let c0 = graph.topology_child(mrca, 0)?;
        let c1 = graph.topology_child(mrca, 1)?;
        graph.get(c0)?.age().max(graph.get(c1)?.age())
    };

    if max > min {
        Some(AgeWindow { min, max })
    } else {
        None
    }
}

/// Tip reached by descending from `from`, each child with equal chance
pub fn random_tip_below(
    graph: &AdmixtureGraph,
    from: NodeId,
    rng: &mut dyn RandomSource,
) -> anyhow::Result<NodeId> {
    let mut cur = from;
    loop {
        let node = graph.try_node(cur)?;
        if node.num_children() == 0 {
            return Ok(cur);
        }
        cur = node.children()[rng.index(node.num_children())];
    }
}

/// Log probability that [`random_tip_below`] from `from` ends at `tip`
pub fn ln_descent_probability(graph: &AdmixtureGraph, from: NodeId, tip: NodeId) -> f64 {
    let mut ln_prob = 0.0;
    let mut cur = tip;
    while cur != from {
        let Some(p) = graph.get(cur).and_then(|x| x.parent()) else {
            return f64::NEG_INFINITY;
        };
        let Some(parent) = graph.get(p) else {
            return f64::NEG_INFINITY;
        };
        ln_prob -= (parent.num_children() as f64).ln();
        cur = p;
    }
    ln_prob
}

/// Do two branches share a lineage? An edge between them would be
/// degenerate.
pub fn same_lineage(graph: &AdmixtureGraph, x: NodeId, y: NodeId) -> bool {
    graph.is_ancestor_or_self(x, y) || graph.is_ancestor_or_self(y, x)
}

/// log density of a weight drawn as `0.5 * Beta(a, b)`
pub fn ln_weight_density(weight: f64, a: f64, b: f64) -> f64 {
    ln_beta_pdf(weight / MAX_ADMIXTURE_WEIGHT, a, b) - MAX_ADMIXTURE_WEIGHT.ln()
}

/// Beta random walk on the unit interval centred on `u`:
/// `u' ~ Beta(lambda u + 1, lambda (1 - u) + 1)`.
///
/// Returns `u'` and `ln q(u | u') - ln q(u' | u)`.
pub fn beta_walk(u: f64, lambda: f64, rng: &mut dyn RandomSource) -> anyhow::Result<(f64, f64)> {
    let a = lambda * u + 1.0;
    let b = lambda * (1.0 - u) + 1.0;
    let next = rng.beta(a, b)?;
    let ln_fwd = ln_beta_pdf(next, a, b);
    let ln_bwd = ln_beta_pdf(u, lambda * next + 1.0, lambda * (1.0 - next) + 1.0);
    Ok((next, ln_bwd - ln_fwd))
}

/// Put a removed edge back and refresh the indices
pub fn restore_edge(graph: &mut AdmixtureGraph, pos: &AdmixtureEdgePosition) -> anyhow::Result<()> {
    graph.restore_admixture_edge(pos)?;
    graph.reindex()?;
    Ok(())
}
