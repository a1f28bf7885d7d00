use super::lineage::{ln_weight_density, pick_admixture_edge, restore_edge, MAX_ADMIXTURE_WEIGHT};
use super::{MoveResult, ProposalKernel};
use crate::branch_rates::topology_branch_key;
use crate::model::ChainState;
use crate::random::RandomSource;
use crate::residuals::Residuals;
use crate::transaction::FailureReason;
use admix_graph::{AdmixtureEdgePosition, AdmixtureGraph, NodeId};
use log::trace;

#[derive(Debug, Clone)]
pub struct CladeResidualEdgeOptions {
    /// no edge is added once the graph carries this many
    pub max_events: usize,
    /// Beta shapes of the proposed `weight / 0.5`
    pub weight_alpha: f64,
    pub weight_beta: f64,
    pub active_generation: usize,
}

impl Default for CladeResidualEdgeOptions {
    fn default() -> Self {
        Self {
            max_events: 10,
            weight_alpha: 1.0,
            weight_beta: 1.5,
            active_generation: 0,
        }
    }
}

/// Two topology branches alive through one epoch, scored by the positive
/// residuals between the tips below them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineagePair {
    pub first: NodeId,
    pub second: NodeId,
    pub score: f64,
}

/// Score every pair of lineages in every epoch, an epoch being the time
/// between two consecutive node ages. A pair alive through several epochs
/// appears once per epoch.
///
/// Each score is the epoch length times the summed positive residuals
/// between the two clades, divided by the number of pairs in the epoch.
pub fn lineage_pair_scores(
    graph: &AdmixtureGraph,
    residuals: &Residuals,
) -> anyhow::Result<Vec<LineagePair>> {
    let root = graph.root()?;

    // (node, age, parent age, residual rows of the tips below)
    let mut branches = vec![];
    let mut ages = vec![];
    for &id in graph.nodes() {
        let node = graph.try_node(id)?;
        if node.is_splice() {
            continue;
        }
        ages.push(node.age());
        if id == root {
            continue;
        }
        let Some(parent) = graph.topology_parent(id) else {
            continue;
        };
        let rows: Vec<usize> = graph
            .descendant_tips(id)
            .into_iter()
            .filter_map(|t| graph.get(t).and_then(|x| x.index().checked_sub(1)))
            .filter(|&i| i < residuals.num_taxa())
            .collect();
        branches.push((id, node.age(), graph.try_node(parent)?.age(), rows));
    }
    ages.sort_by(f64::total_cmp);
    ages.dedup();

    let positive = |i: usize, j: usize| residuals.get(i, j).max(0.0);

    let mut ret = vec![];
    for epoch in ages.windows(2) {
        let (lo, hi) = (epoch[0], epoch[1]);
        let alive: Vec<_> = branches
            .iter()
            .filter(|(_, age, parent_age, _)| *age <= lo && *parent_age >= hi)
            .collect();
        let n = alive.len();
        if n < 2 {
            continue;
        }
        let num_pairs = (n * (n - 1)) as f64 / 2.0;

        for (i, x) in alive.iter().enumerate() {
            for y in alive[i + 1..].iter() {
                let mut r = 0.0;
                for &a in x.3.iter() {
                    for &b in y.3.iter() {
                        r += positive(a, b) + positive(b, a);
                    }
                }
                let score = (hi - lo) * r / num_pairs;
                if score > 0.0 {
                    ret.push(LineagePair {
                        first: x.0,
                        second: y.0,
                        score,
                    });
                }
            }
        }
    }
    Ok(ret)
}

/// Ages shared by the topology branches above `x` and `y`
fn overlap(graph: &AdmixtureGraph, x: NodeId, y: NodeId) -> anyhow::Result<Option<(f64, f64)>> {
    let (Some(px), Some(py)) = (graph.topology_parent(x), graph.topology_parent(y)) else {
        return Ok(None);
    };
    let lo = graph.try_node(x)?.age().max(graph.try_node(y)?.age());
    let hi = graph.try_node(px)?.age().min(graph.try_node(py)?.age());
    Ok(if hi > lo { Some((lo, hi)) } else { None })
}

/// Adds or removes an admixture edge between lineages that coexist, drawn
/// in proportion to how much residual fit their clades leave unexplained.
/// The two halves are each other's reverse.
pub struct CladeResidualEdge {
    opts: CladeResidualEdgeOptions,
    added: Option<(NodeId, NodeId)>,
    removed: Option<AdmixtureEdgePosition>,
}

impl CladeResidualEdge {
    pub fn new(opts: CladeResidualEdgeOptions) -> Self {
        Self {
            opts,
            added: None,
            removed: None,
        }
    }

    /// Log density of adding `donor -> recipient` (both topology branches)
    /// at `age` with `weight`
    fn ln_add_density(
        &self,
        graph: &AdmixtureGraph,
        pairs: &[LineagePair],
        donor: NodeId,
        recipient: NodeId,
        age: f64,
        weight: f64,
    ) -> anyhow::Result<f64> {
        let total: f64 = pairs.iter().map(|p| p.score).sum();
        let mass: f64 = pairs
            .iter()
            .filter(|p| {
                (p.first == donor && p.second == recipient)
                    || (p.first == recipient && p.second == donor)
            })
            .map(|p| p.score)
            .sum();
        if !(total > 0.0 && mass > 0.0) {
            return Ok(f64::NEG_INFINITY);
        }
        let Some((lo, hi)) = overlap(graph, donor, recipient)? else {
            return Ok(f64::NEG_INFINITY);
        };
        if age < lo || age > hi {
            return Ok(f64::NEG_INFINITY);
        }
        Ok((mass / total).ln() - 2f64.ln() - (hi - lo).ln()
            + ln_weight_density(weight, self.opts.weight_alpha, self.opts.weight_beta))
    }

    fn add(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult> {
        let impossible = Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        let graph = &mut state.graph;
        let num_edges = graph.num_admixture_parents();
        if num_edges >= self.opts.max_events {
            return impossible;
        }

        let pairs = lineage_pair_scores(graph, &state.residuals)?;
        let total: f64 = pairs.iter().map(|p| p.score).sum();
        let Some(&last) = pairs.last() else {
            return impossible;
        };
        if !(total > 0.0) {
            return impossible;
        }
        let mut u = rng.uniform01() * total;
        let mut pick = last;
        for p in pairs.iter() {
            u -= p.score;
            if u < 0.0 {
                pick = *p;
                break;
            }
        }
        let (donor_branch, recipient_branch) = if rng.uniform01() < 0.5 {
            (pick.first, pick.second)
        } else {
            (pick.second, pick.first)
        };

        let Some((lo, hi)) = overlap(graph, donor_branch, recipient_branch)? else {
            return impossible;
        };
        let age = lo + rng.uniform01() * (hi - lo);
        let weight =
            MAX_ADMIXTURE_WEIGHT * rng.beta(self.opts.weight_alpha, self.opts.weight_beta)?;
        if !(weight > 0.0) {
            return impossible;
        }
        let (Some(donor_site), Some(recipient_site)) = (
            graph.branch_at_age(donor_branch, age),
            graph.branch_at_age(recipient_branch, age),
        ) else {
            return impossible;
        };

        let ln_forward =
            self.ln_add_density(graph, &pairs, donor_branch, recipient_branch, age, weight)?;

        let donor = graph.new_splice_node();
        let recipient = graph.new_splice_node();
        if let Err(e) =
            graph.add_admixture_edge(donor, recipient, donor_site, recipient_site, age, weight, true)
        {
            graph.erase_node(donor)?;
            graph.erase_node(recipient)?;
            return Err(e.into());
        }
        graph.reindex()?;
        self.added = Some((donor, recipient));

        trace!(
            "{}: {} -> {} at {} with weight {}",
            self.name(),
            donor_branch,
            recipient_branch,
            age,
            weight
        );

        let ln_backward = -((num_edges + 1) as f64).ln();
        Ok(MoveResult::Proposed(ln_backward - ln_forward))
    }

    fn remove(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult> {
        let graph = &mut state.graph;
        let num_edges = graph.num_admixture_parents();
        let Some(donor) = pick_admixture_edge(graph, rng) else {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        };

        let pos = graph.remove_admixture_edge(donor, true)?;
        graph.reindex()?;
        self.removed = Some(pos);

        // an add could not have come from a graph already at the cap
        if num_edges - 1 >= self.opts.max_events {
            return Ok(MoveResult::Proposed(f64::NEG_INFINITY));
        }

        let pairs = lineage_pair_scores(graph, &state.residuals)?;
        let ln_add = self.ln_add_density(
            graph,
            &pairs,
            topology_branch_key(graph, pos.donor_site),
            topology_branch_key(graph, pos.recipient_site),
            pos.age,
            pos.weight,
        )?;
        Ok(MoveResult::Proposed(ln_add + (num_edges as f64).ln()))
    }
}

impl ProposalKernel for CladeResidualEdge {
    fn name(&self) -> &'static str {
        "clade-edge"
    }

    fn active_generation(&self) -> usize {
        self.opts.active_generation
    }

    fn perform(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult> {
        // adds and removals are offered with equal chance
        if rng.uniform01() < 0.5 {
            self.add(state, rng)
        } else {
            self.remove(state, rng)
        }
    }

    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        let graph = &mut state.graph;
        if let Some((donor, recipient)) = self.added.take() {
            graph.remove_admixture_edge(donor, true)?;
            graph.erase_node(donor)?;
            graph.erase_node(recipient)?;
            graph.reindex()?;
            return Ok(());
        }
        let pos = self
            .removed
            .take()
            .ok_or_else(|| anyhow::anyhow!("{}: nothing to undo", self.name()))?;
        restore_edge(graph, &pos)
    }

    fn finalize(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        self.added = None;
        if let Some(pos) = self.removed.take() {
            state.graph.erase_node(pos.donor)?;
            state.graph.erase_node(pos.recipient)?;
        }
        Ok(())
    }
}
