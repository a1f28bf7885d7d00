use super::lineage::{pick_admixture_edge, restore_edge};
use super::{MoveResult, ProposalKernel};
use crate::model::ChainState;
use crate::random::RandomSource;
use crate::transaction::FailureReason;
use admix_graph::{AdmixtureEdgePosition, AdmixtureGraph, NodeId};
use log::trace;

#[derive(Debug, Clone, Default)]
pub struct DivergenceSwapOptions {
    pub active_generation: usize,
}

/// Divergence moved by a swap, with what undoing it needs
#[derive(Debug, Clone, Copy)]
struct Regraft {
    divergence: NodeId,
    moved_child: NodeId,
    brother: NodeId,
}

/// Exchanges the roles of an admixture edge and the divergence above its
/// donor.
///
/// The divergence `P` right above the donor site is regrafted onto the
/// recipient's branch, and the edge then runs from the donor site into
/// `P`'s other child, which took `P`'s old place. Age and weight are kept.
/// Applied to the new edge, the move puts everything back, so it is its
/// own reverse and the Hastings ratio is zero.
pub struct DivergenceSwap {
    opts: DivergenceSwapOptions,
    removed: Option<AdmixtureEdgePosition>,
    regraft: Option<Regraft>,
}

impl DivergenceSwap {
    pub fn new(opts: DivergenceSwapOptions) -> Self {
        Self {
            opts,
            removed: None,
            regraft: None,
        }
    }

    /// The regraft planned for a detached edge, if the ages allow one
    fn plan(graph: &AdmixtureGraph, pos: &AdmixtureEdgePosition) -> anyhow::Result<Option<Regraft>> {
        let Some((divergence, moved_child)) = graph.nearest_divergence_above(pos.donor_site) else {
            return Ok(None);
        };
        let node = graph.try_node(divergence)?;
        if node.parent().is_none() {
            return Ok(None);
        }
        let Some(brother) = node.children().iter().copied().find(|&c| c != moved_child) else {
            return Ok(None);
        };

        let target = pos.recipient_site;
        if graph.is_ancestor_or_self(divergence, target)
            || graph.is_ancestor_or_self(target, divergence)
        {
            return Ok(None);
        }

        // `P` must fit on the recipient's branch
        let recipient = graph.try_node(target)?;
        let Some(target_parent) = recipient.parent() else {
            return Ok(None);
        };
        if node.age() < recipient.age() || node.age() > graph.try_node(target_parent)?.age() {
            return Ok(None);
        }
        // and the edge must fit on the brother's
        if graph.try_node(brother)?.age() > pos.age {
            return Ok(None);
        }

        Ok(Some(Regraft {
            divergence,
            moved_child,
            brother,
        }))
    }
}

impl ProposalKernel for DivergenceSwap {
    fn name(&self) -> &'static str {
        "divergence-swap"
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

        let Some(regraft) = Self::plan(graph, &pos)? else {
            restore_edge(graph, &pos)?;
            return Ok(MoveResult::Failed(FailureReason::DegenerateBounds));
        };

        graph.subtree_prune_regraft(
            regraft.divergence,
            regraft.moved_child,
            pos.recipient_site,
            true,
        )?;
        graph.add_admixture_edge(
            pos.donor,
            pos.recipient,
            pos.donor_site,
            regraft.brother,
            pos.age,
            pos.weight,
            true,
        )?;
        graph.reindex()?;

        trace!(
            "{}: {} regrafted above {}, edge into {}",
            self.name(),
            regraft.divergence,
            pos.recipient_site,
            regraft.brother
        );

        self.removed = Some(pos);
        self.regraft = Some(regraft);
        Ok(MoveResult::Proposed(0.0))
    }

    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        let (Some(pos), Some(regraft)) = (self.removed.take(), self.regraft.take()) else {
            return Err(anyhow::anyhow!("{}: nothing to undo", self.name()));
        };
        let graph = &mut state.graph;
        graph.remove_admixture_edge(pos.donor, true)?;
        graph.subtree_prune_regraft(
            regraft.divergence,
            regraft.moved_child,
            regraft.brother,
            true,
        )?;
        restore_edge(graph, &pos)
    }

    fn finalize(&mut self, _state: &mut ChainState) -> anyhow::Result<()> {
        self.removed = None;
        self.regraft = None;
        Ok(())
    }
}
