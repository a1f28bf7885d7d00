use super::lineage::{ln_weight_density, pick_admixture_edge, restore_edge};
use super::{MoveResult, ProposalKernel};
use crate::model::ChainState;
use crate::random::RandomSource;
use crate::transaction::FailureReason;
use admix_graph::AdmixtureEdgePosition;

#[derive(Debug, Clone)]
pub struct EdgeRemoveOptions {
    /// must match the shapes `EdgeAdd` proposes with
    pub weight_alpha: f64,
    pub weight_beta: f64,
    pub active_generation: usize,
}

impl Default for EdgeRemoveOptions {
    fn default() -> Self {
        Self {
            weight_alpha: 1.0,
            weight_beta: 3.0,
            active_generation: 0,
        }
    }
}

/// Removes a uniformly chosen admixture edge; the reverse of `EdgeAdd`.
pub struct EdgeRemove {
    opts: EdgeRemoveOptions,
    removed: Option<AdmixtureEdgePosition>,
}

impl EdgeRemove {
    pub fn new(opts: EdgeRemoveOptions) -> Self {
        Self {
            opts,
            removed: None,
        }
    }
}

impl ProposalKernel for EdgeRemove {
    fn name(&self) -> &'static str {
        "edge-remove"
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
        let Some(donor) = pick_admixture_edge(graph, rng) else {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        };

        let pos = graph.remove_admixture_edge(donor, true)?;
        graph.reindex()?;
        self.removed = Some(pos);

        // density of adding this very edge back
        let tree_length = graph.tree_length();
        let num_candidates = graph
            .branches_crossing_age(pos.age)?
            .into_iter()
            .filter(|&c| c != pos.donor_site)
            .count();
        if num_candidates == 0 || !(tree_length > 0.0) {
            return Ok(MoveResult::Proposed(f64::NEG_INFINITY));
        }

        let ln_add = -tree_length.ln() - (num_candidates as f64).ln()
            + ln_weight_density(pos.weight, self.opts.weight_alpha, self.opts.weight_beta);
        let ln_remove = -(num_edges as f64).ln();
        Ok(MoveResult::Proposed(ln_add - ln_remove))
    }

    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        let pos = self
            .removed
            .take()
            .ok_or_else(|| anyhow::anyhow!("{}: nothing to undo", self.name()))?;
        restore_edge(&mut state.graph, &pos)
    }

    fn finalize(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        if let Some(pos) = self.removed.take() {
            state.graph.erase_node(pos.donor)?;
            state.graph.erase_node(pos.recipient)?;
        }
        Ok(())
    }
}
