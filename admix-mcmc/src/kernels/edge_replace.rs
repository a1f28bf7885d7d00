use super::lineage::{
    admixture_window, ln_weight_density, pick_admixture_edge, restore_edge, same_lineage,
    MAX_ADMIXTURE_WEIGHT,
};
use super::{MoveResult, ProposalKernel};
use crate::model::ChainState;
use crate::random::{ln_beta_pdf, RandomSource};
use crate::residuals::ResidualWeights;
use crate::transaction::FailureReason;
use admix_graph::{AdmixtureEdgePosition, AdmixtureGraph, NodeId};
use log::trace;

#[derive(Debug, Clone)]
pub struct EdgeReplaceOptions {
    /// sharpness of the residual weighting `exp(delta * r / max r)`
    pub delta: f64,
    /// let an edge run up to the MRCA even when both of its sides are clades
    pub allow_sister_admixture: bool,
    /// age within the window is `Beta(1, age_beta)`
    pub age_beta: f64,
    /// Beta shapes of the proposed `weight / 0.5`
    pub weight_alpha: f64,
    pub weight_beta: f64,
    pub active_generation: usize,
}

impl Default for EdgeReplaceOptions {
    fn default() -> Self {
        Self {
            delta: 1.0,
            allow_sister_admixture: false,
            age_beta: 2.0,
            weight_alpha: 1.0,
            weight_beta: 2.0,
            active_generation: 0,
        }
    }
}

/// Redraws an admixture edge between two taxa chosen in proportion to their
/// fit residuals, so that edges land where the data call for one.
pub struct EdgeReplace {
    opts: EdgeReplaceOptions,
    removed: Option<AdmixtureEdgePosition>,
}

impl EdgeReplace {
    pub fn new(opts: EdgeReplaceOptions) -> Self {
        Self {
            opts,
            removed: None,
        }
    }

    /// Residual row of a tip
    fn taxon(graph: &AdmixtureGraph, tip: NodeId) -> usize {
        graph.get(tip).map_or(0, |x| x.index().saturating_sub(1))
    }

    /// Log density of proposing the edge `donor_site -> recipient_site` at
    /// `age` with `weight`, summed over every taxon pair that could have
    /// produced it.
    #[allow(clippy::too_many_arguments)]
    fn ln_proposal_density(
        &self,
        graph: &AdmixtureGraph,
        weights: &ResidualWeights,
        donor_site: NodeId,
        recipient_site: NodeId,
        age: f64,
        weight: f64,
    ) -> f64 {
        let donor_tips = graph.descendant_tips(donor_site);
        let recipient_tips = graph.descendant_tips(recipient_site);

        let mut density = 0.0;
        for &x in donor_tips.iter() {
            for &y in recipient_tips.iter() {
                for (a, b) in [(x, y), (y, x)] {
                    let p = weights.pair_probability(Self::taxon(graph, a), Self::taxon(graph, b));
                    if !(p > 0.0) {
                        continue;
                    }
                    let Some(window) =
                        admixture_window(graph, a, b, self.opts.allow_sister_admixture)
                    else {
                        continue;
                    };
                    if !window.contains(age) {
                        continue;
                    }
                    let u = (age - window.min) / window.width();
                    let ln_age = ln_beta_pdf(u, 1.0, self.opts.age_beta) - window.width().ln();
                    // either orientation of the pair is equally likely
                    density += p * 0.5 * ln_age.exp();
                }
            }
        }

        density.ln() + ln_weight_density(weight, self.opts.weight_alpha, self.opts.weight_beta)
    }
}

impl ProposalKernel for EdgeReplace {
    fn name(&self) -> &'static str {
        "edge-replace"
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
        let Some(donor) = pick_admixture_edge(graph, rng) else {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        };

        let pos = graph.remove_admixture_edge(donor, true)?;
        graph.reindex()?;

        let degenerate = |graph: &mut AdmixtureGraph| -> anyhow::Result<MoveResult> {
            restore_edge(graph, &pos)?;
            Ok(MoveResult::Failed(FailureReason::DegenerateBounds))
        };

        let Some(weights) = state.residuals.weights(self.opts.delta) else {
            return degenerate(graph);
        };

        let tips = graph.tips().to_vec();
        if tips.len() != state.residuals.num_taxa() {
            restore_edge(graph, &pos)?;
            return Err(anyhow::anyhow!(
                "{} residual rows for {} tips",
                state.residuals.num_taxa(),
                tips.len()
            ));
        }

        let (a, b) = weights.sample_pair(rng);
        let (tip_a, tip_b) = (tips[a], tips[b]);
        let Some(window) =
            admixture_window(graph, tip_a, tip_b, self.opts.allow_sister_admixture)
        else {
            return degenerate(graph);
        };

        let age = window.min + rng.beta(1.0, self.opts.age_beta)? * window.width();
        let weight =
            MAX_ADMIXTURE_WEIGHT * rng.beta(self.opts.weight_alpha, self.opts.weight_beta)?;

        let (Some(site_a), Some(site_b)) =
            (graph.branch_at_age(tip_a, age), graph.branch_at_age(tip_b, age))
        else {
            return degenerate(graph);
        };
        let (donor_site, recipient_site) = if rng.uniform01() < 0.5 {
            (site_b, site_a)
        } else {
            (site_a, site_b)
        };

        if !(weight > 0.0) || same_lineage(graph, donor_site, recipient_site) {
            return degenerate(graph);
        }

        let ln_new = self.ln_proposal_density(graph, &weights, donor_site, recipient_site, age, weight);
        let ln_old = self.ln_proposal_density(
            graph,
            &weights,
            pos.donor_site,
            pos.recipient_site,
            pos.age,
            pos.weight,
        );

        graph.add_admixture_edge(
            pos.donor,
            pos.recipient,
            donor_site,
            recipient_site,
            age,
            weight,
            true,
        )?;
        graph.reindex()?;
        self.removed = Some(pos);

        trace!(
            "{}: {} -> {} at {} (window {:?})",
            self.name(),
            donor_site,
            recipient_site,
            age,
            window
        );

        Ok(MoveResult::Proposed(ln_old - ln_new))
    }

    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        let pos = self
            .removed
            .take()
            .ok_or_else(|| anyhow::anyhow!("{}: nothing to undo", self.name()))?;
        state.graph.remove_admixture_edge(pos.donor, true)?;
        restore_edge(&mut state.graph, &pos)
    }

    fn finalize(&mut self, _state: &mut ChainState) -> anyhow::Result<()> {
        self.removed = None;
        Ok(())
    }
}
