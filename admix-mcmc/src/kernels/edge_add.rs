use super::lineage::{ln_weight_density, MAX_ADMIXTURE_WEIGHT};
use super::{MoveResult, ProposalKernel};
use crate::model::ChainState;
use crate::random::RandomSource;
use crate::transaction::FailureReason;
use admix_graph::NodeId;
use log::trace;

#[derive(Debug, Clone)]
pub struct EdgeAddOptions {
    /// no edge is added once the graph carries this many
    pub max_events: usize,
    /// Beta shapes of the proposed `weight / 0.5`
    pub weight_alpha: f64,
    pub weight_beta: f64,
    pub active_generation: usize,
}

impl Default for EdgeAddOptions {
    fn default() -> Self {
        Self {
            max_events: 10,
            weight_alpha: 1.0,
            weight_beta: 3.0,
            active_generation: 0,
        }
    }
}

/// Adds an admixture edge at a point drawn uniformly over the tree length,
/// received by a uniformly chosen branch alive at the same age.
pub struct EdgeAdd {
    opts: EdgeAddOptions,
    added: Option<(NodeId, NodeId)>,
}

impl EdgeAdd {
    pub fn new(opts: EdgeAddOptions) -> Self {
        Self { opts, added: None }
    }
}

impl ProposalKernel for EdgeAdd {
    fn name(&self) -> &'static str {
        "edge-add"
    }

    fn active_generation(&self) -> usize {
        self.opts.active_generation
    }

    fn perform(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult> {
        let graph = &mut state.graph;
        let num_edges = graph.num_admixture_parents();
        if num_edges >= self.opts.max_events {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        }

        let tree_length = graph.tree_length();
        if !(tree_length > 0.0) {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        }

        let Some((donor_site, age)) = graph.locate_on_tree_length(rng.uniform01() * tree_length)
        else {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        };

        let candidates: Vec<NodeId> = graph
            .branches_crossing_age(age)?
            .into_iter()
            .filter(|&c| c != donor_site)
            .collect();
        if candidates.is_empty() {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        }
        let recipient_site = candidates[rng.index(candidates.len())];

        let weight =
            MAX_ADMIXTURE_WEIGHT * rng.beta(self.opts.weight_alpha, self.opts.weight_beta)?;
        if !(weight > 0.0) {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        }

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
            donor_site,
            recipient_site,
            age,
            weight
        );

        let ln_forward = -tree_length.ln() - (candidates.len() as f64).ln()
            + ln_weight_density(weight, self.opts.weight_alpha, self.opts.weight_beta);
        let ln_backward = -((num_edges + 1) as f64).ln();
        Ok(MoveResult::Proposed(ln_backward - ln_forward))
    }

    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        let (donor, recipient) = self
            .added
            .take()
            .ok_or_else(|| anyhow::anyhow!("{}: nothing to undo", self.name()))?;
        let graph = &mut state.graph;
        graph.remove_admixture_edge(donor, true)?;
        graph.erase_node(donor)?;
        graph.erase_node(recipient)?;
        graph.reindex()?;
        Ok(())
    }

    fn finalize(&mut self, _state: &mut ChainState) -> anyhow::Result<()> {
        self.added = None;
        Ok(())
    }
}
