use super::lineage::{
    admixture_window, beta_walk, ln_descent_probability, pick_admixture_edge, random_tip_below,
    restore_edge, same_lineage, MAX_ADMIXTURE_WEIGHT,
};
use super::{MoveResult, ProposalKernel};
use crate::model::ChainState;
use crate::random::RandomSource;
use crate::transaction::FailureReason;
use admix_graph::{AdmixtureEdgePosition, AdmixtureGraph, NodeId};

#[derive(Debug, Clone)]
pub struct AgeSlideOptions {
    /// concentration of the Beta walk on the age within its window
    pub lambda: f64,
    /// concentration of the Beta walk on the weight
    pub weight_lambda: f64,
    pub allow_sister_admixture: bool,
    pub active_generation: usize,
}

impl Default for AgeSlideOptions {
    fn default() -> Self {
        Self {
            lambda: 10.0,
            weight_lambda: 10.0,
            allow_sister_admixture: false,
            active_generation: 0,
        }
    }
}

/// Slides an admixture edge up or down along the lineages of one tip
/// below each of its ends, re-drawing the weight on the way.
pub struct AgeSlide {
    opts: AgeSlideOptions,
    removed: Option<AdmixtureEdgePosition>,
}

impl AgeSlide {
    pub fn new(opts: AgeSlideOptions) -> Self {
        Self {
            opts,
            removed: None,
        }
    }
}

fn ln_tip_choice(graph: &AdmixtureGraph, donor: NodeId, recipient: NodeId, tips: (NodeId, NodeId)) -> f64 {
    ln_descent_probability(graph, donor, tips.0) + ln_descent_probability(graph, recipient, tips.1)
}

impl ProposalKernel for AgeSlide {
    fn name(&self) -> &'static str {
        "age-slide"
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
        let recipient = graph
            .try_node(donor)?
            .admixture_child()
            .ok_or_else(|| anyhow::anyhow!("donor {} has no recipient", donor))?;

        let tips = (
            random_tip_below(graph, donor, rng)?,
            random_tip_below(graph, recipient, rng)?,
        );
        let ln_forward_tips = ln_tip_choice(graph, donor, recipient, tips);

        let pos = graph.remove_admixture_edge(donor, true)?;
        graph.reindex()?;

        let degenerate = |graph: &mut AdmixtureGraph| -> anyhow::Result<MoveResult> {
            restore_edge(graph, &pos)?;
            Ok(MoveResult::Failed(FailureReason::DegenerateBounds))
        };

        let Some(window) =
            admixture_window(graph, tips.0, tips.1, self.opts.allow_sister_admixture)
        else {
            return degenerate(graph);
        };
        if !window.contains(pos.age) {
            return degenerate(graph);
        }

        let (unit_age, ln_age) = beta_walk(
            (pos.age - window.min) / window.width(),
            self.opts.lambda,
            rng,
        )?;
        let age = window.min + unit_age * window.width();

        let (unit_weight, ln_weight) =
            beta_walk(pos.weight / MAX_ADMIXTURE_WEIGHT, self.opts.weight_lambda, rng)?;
        let weight = MAX_ADMIXTURE_WEIGHT * unit_weight;
        if !(weight > 0.0 && weight <= MAX_ADMIXTURE_WEIGHT) {
            return degenerate(graph);
        }

        let (Some(donor_site), Some(recipient_site)) =
            (graph.branch_at_age(tips.0, age), graph.branch_at_age(tips.1, age))
        else {
            return degenerate(graph);
        };
        if same_lineage(graph, donor_site, recipient_site) {
            return degenerate(graph);
        }

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

        let ln_backward_tips = ln_tip_choice(graph, pos.donor, pos.recipient, tips);
        Ok(MoveResult::Proposed(
            ln_age + ln_weight + ln_backward_tips - ln_forward_tips,
        ))
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
