use super::lineage::{beta_walk, pick_admixture_edge, restore_edge, same_lineage, MAX_ADMIXTURE_WEIGHT};
use super::{MoveResult, ProposalKernel};
use crate::branch_rates::topology_branch_key;
use crate::model::{ChainState, Variable};
use crate::random::RandomSource;
use crate::transaction::FailureReason;
use admix_graph::{AdmixtureEdgePosition, NodeId};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct EdgeShiftOptions {
    /// concentration of the Beta walk on the weight
    pub lambda: f64,
    /// rates on the touched branches are scaled by `exp(delta (U - 1/2))`
    pub rate_delta: f64,
    pub active_generation: usize,
}

impl Default for EdgeShiftOptions {
    fn default() -> Self {
        Self {
            lambda: 10.0,
            rate_delta: 1.0,
            active_generation: 0,
        }
    }
}

/// Moves one end of an admixture edge to another branch alive at the same
/// age, nudging the weight and the clock rates of the branches involved.
pub struct EdgeShift {
    opts: EdgeShiftOptions,
    removed: Option<AdmixtureEdgePosition>,
    old_rates: Vec<(NodeId, f64)>,
}

impl EdgeShift {
    pub fn new(opts: EdgeShiftOptions) -> Self {
        Self {
            opts,
            removed: None,
            old_rates: vec![],
        }
    }
}

impl ProposalKernel for EdgeShift {
    fn name(&self) -> &'static str {
        "edge-shift"
    }

    fn touched_variables(&self) -> Vec<Variable> {
        vec![Variable::Graph, Variable::BranchRates]
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
        let move_donor = rng.uniform01() < 0.5;

        let pos = graph.remove_admixture_edge(donor, true)?;
        graph.reindex()?;

        let fixed_site = if move_donor {
            pos.recipient_site
        } else {
            pos.donor_site
        };
        let candidates: Vec<NodeId> = graph
            .branches_crossing_age(pos.age)?
            .into_iter()
            .filter(|&c| c != fixed_site && !same_lineage(graph, c, fixed_site))
            .collect();
        if candidates.is_empty() {
            restore_edge(graph, &pos)?;
            return Ok(MoveResult::Failed(FailureReason::DegenerateBounds));
        }
        let new_site = candidates[rng.index(candidates.len())];

        let (unit_weight, ln_weight) =
            beta_walk(pos.weight / MAX_ADMIXTURE_WEIGHT, self.opts.lambda, rng)?;
        let weight = MAX_ADMIXTURE_WEIGHT * unit_weight;
        if !(weight > 0.0 && weight <= MAX_ADMIXTURE_WEIGHT) {
            restore_edge(graph, &pos)?;
            return Ok(MoveResult::Failed(FailureReason::DegenerateBounds));
        }

        let (donor_site, recipient_site) = if move_donor {
            (new_site, fixed_site)
        } else {
            (fixed_site, new_site)
        };
        graph.add_admixture_edge(
            pos.donor,
            pos.recipient,
            donor_site,
            recipient_site,
            pos.age,
            weight,
            true,
        )?;
        graph.reindex()?;
        self.removed = Some(pos);

        let keys: BTreeSet<NodeId> = [pos.donor_site, pos.recipient_site, donor_site, recipient_site]
            .into_iter()
            .map(|x| topology_branch_key(&state.graph, x))
            .collect();

        self.old_rates.clear();
        let mut ln_rates = 0.0;
        for key in keys {
            let old = state.branch_rates.get(key);
            let scale = (self.opts.rate_delta * (rng.uniform01() - 0.5)).exp();
            state.branch_rates.set(key, old * scale);
            self.old_rates.push((key, old));
            ln_rates += scale.ln();
        }

        Ok(MoveResult::Proposed(ln_weight + ln_rates))
    }

    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        let pos = self
            .removed
            .take()
            .ok_or_else(|| anyhow::anyhow!("{}: nothing to undo", self.name()))?;
        for (key, rate) in self.old_rates.drain(..) {
            state.branch_rates.set(key, rate);
        }
        state.graph.remove_admixture_edge(pos.donor, true)?;
        restore_edge(&mut state.graph, &pos)
    }

    fn finalize(&mut self, _state: &mut ChainState) -> anyhow::Result<()> {
        self.removed = None;
        self.old_rates.clear();
        Ok(())
    }
}
