use super::lineage::{ln_weight_density, restore_edge, same_lineage, MAX_ADMIXTURE_WEIGHT};
use super::{MoveResult, ProposalKernel};
use crate::model::ChainState;
use crate::random::RandomSource;
use crate::transaction::FailureReason;
use admix_graph::{AdmixtureEdgePosition, AdmixtureGraph, NodeId};
use log::trace;

#[derive(Debug, Clone)]
pub struct DivergenceMergeOptions {
    /// no edge is split off once the graph carries this many
    pub max_events: usize,
    /// Beta shapes of the split-off `weight / 0.5`
    pub weight_alpha: f64,
    pub weight_beta: f64,
    pub active_generation: usize,
}

impl Default for DivergenceMergeOptions {
    fn default() -> Self {
        Self {
            max_events: 10,
            weight_alpha: 1.0,
            weight_beta: 3.0,
            active_generation: 0,
        }
    }
}

/// A divergence regrafted by either half of the move
#[derive(Debug, Clone, Copy)]
struct Moved {
    divergence: NodeId,
    /// child travelling with the divergence
    moved_child: NodeId,
    /// child left in the divergence's old place
    left_behind: NodeId,
    old_age: f64,
}

enum Pending {
    Merged(AdmixtureEdgePosition, Moved),
    Split {
        donor: NodeId,
        recipient: NodeId,
        moved: Moved,
    },
}

/// Everything a split draws
struct SplitDraw {
    divergence: NodeId,
    moved_child: NodeId,
    age: f64,
    target: NodeId,
    edge_age: f64,
    weight: f64,
}

/// Trades an admixture edge for shared ancestry and back.
///
/// A merge takes an edge whose donor is the first one above some tip,
/// removes it and regrafts the divergence right above the recipient onto
/// the donor's branch. A split moves a divergence with one child onto
/// another branch and links the child to its former sister by a new edge.
/// Either half is the reverse of the other.
pub struct DivergenceMerge {
    opts: DivergenceMergeOptions,
    pending: Option<Pending>,
}

fn recipient_weight(graph: &AdmixtureGraph, donor: NodeId) -> anyhow::Result<f64> {
    let recipient = graph
        .try_node(donor)?
        .admixture_child()
        .ok_or_else(|| anyhow::anyhow!("donor {} has no recipient", donor))?;
    Ok(graph.try_node(recipient)?.weight())
}

/// Log probability that a merge picks the edge at `donor`
fn ln_merge_choice(graph: &AdmixtureGraph, donor: NodeId) -> anyhow::Result<f64> {
    let mut total = 0.0;
    let mut mine = None;
    for d in graph.first_admixture_parent_per_lineage() {
        let w = recipient_weight(graph, d)?;
        total += w;
        if d == donor {
            mine = Some(w);
        }
    }
    Ok(match mine {
        Some(w) if total > 0.0 => (w / total).ln(),
        _ => f64::NEG_INFINITY,
    })
}

impl DivergenceMerge {
    pub fn new(opts: DivergenceMergeOptions) -> Self {
        Self {
            opts,
            pending: None,
        }
    }

    /// Log density of `draw` against the graph before the split
    fn ln_split_density(&self, graph: &AdmixtureGraph, draw: &SplitDraw) -> anyhow::Result<f64> {
        let num_divergences = graph.num_interior_nodes();
        let node = graph.try_node(draw.divergence)?;
        let (Some(parent), Some(left_behind)) = (
            node.parent(),
            node.children()
                .iter()
                .copied()
                .find(|&c| c != draw.moved_child),
        ) else {
            return Ok(f64::NEG_INFINITY);
        };
        if num_divergences == 0 {
            return Ok(f64::NEG_INFINITY);
        }

        let moved_age = graph.try_node(draw.moved_child)?.age();
        let height = graph.tree_height();
        if !(draw.age > moved_age && draw.age < height) {
            return Ok(f64::NEG_INFINITY);
        }

        let targets: Vec<NodeId> = graph
            .branches_crossing_age(draw.age)?
            .into_iter()
            .filter(|&c| !same_lineage(graph, c, draw.divergence))
            .collect();
        if !targets.contains(&draw.target) {
            return Ok(f64::NEG_INFINITY);
        }

        let lo = graph.try_node(left_behind)?.age().max(moved_age);
        let hi = draw.age.min(graph.try_node(parent)?.age());
        if !(hi > lo && draw.edge_age >= lo && draw.edge_age <= hi) {
            return Ok(f64::NEG_INFINITY);
        }

        Ok(-(num_divergences as f64).ln()
            - 2f64.ln()
            - (height - moved_age).ln()
            - (targets.len() as f64).ln()
            - (hi - lo).ln()
            + ln_weight_density(draw.weight, self.opts.weight_alpha, self.opts.weight_beta))
    }

    fn merge(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult> {
        let graph = &mut state.graph;
        let firsts = graph.first_admixture_parent_per_lineage();
        let weights = firsts
            .iter()
            .map(|&d| recipient_weight(graph, d))
            .collect::<anyhow::Result<Vec<f64>>>()?;
        let total: f64 = weights.iter().sum();
        if firsts.is_empty() || !(total > 0.0) {
            return Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        }

        let mut u = rng.uniform01() * total;
        let mut pick = firsts.len() - 1;
        for (i, &w) in weights.iter().enumerate() {
            u -= w;
            if u < 0.0 {
                pick = i;
                break;
            }
        }
        let ln_choice = (weights[pick] / total).ln();

        let pos = graph.remove_admixture_edge(firsts[pick], true)?;
        graph.reindex()?;

        let degenerate = |graph: &mut AdmixtureGraph| -> anyhow::Result<MoveResult> {
            restore_edge(graph, &pos)?;
            Ok(MoveResult::Failed(FailureReason::DegenerateBounds))
        };

        let (donor_site, recipient_site) = (pos.donor_site, pos.recipient_site);
        let Some(divergence) = graph.try_node(recipient_site)?.parent() else {
            return degenerate(graph);
        };
        let node = graph.try_node(divergence)?;
        if !node.is_divergence() || node.parent().is_none() {
            return degenerate(graph);
        }
        let Some(left_behind) = node.children().iter().copied().find(|&c| c != recipient_site)
        else {
            return degenerate(graph);
        };
        let old_age = node.age();

        if same_lineage(graph, divergence, donor_site) {
            return degenerate(graph);
        }
        let (donor_node, recipient_node) =
            (graph.try_node(donor_site)?, graph.try_node(recipient_site)?);
        if donor_node.is_outgroup() != recipient_node.is_outgroup() {
            return degenerate(graph);
        }
        let Some(donor_parent) = donor_node.parent() else {
            return degenerate(graph);
        };
        let lo = donor_node.age().max(recipient_node.age());
        let hi = graph.try_node(donor_parent)?.age();
        if !(hi > lo) {
            return degenerate(graph);
        }

        let age = lo + rng.uniform01() * (hi - lo);
        graph.set_age(divergence, age)?;
        graph.subtree_prune_regraft(divergence, recipient_site, donor_site, true)?;
        graph.reindex()?;

        let ln_backward = self.ln_split_density(
            graph,
            &SplitDraw {
                divergence,
                moved_child: recipient_site,
                age: old_age,
                target: left_behind,
                edge_age: pos.age,
                weight: pos.weight,
            },
        )?;

        trace!(
            "{}: {} merged onto {} at {}",
            self.name(),
            divergence,
            donor_site,
            age
        );

        self.pending = Some(Pending::Merged(
            pos,
            Moved {
                divergence,
                moved_child: recipient_site,
                left_behind,
                old_age,
            },
        ));
        Ok(MoveResult::Proposed(ln_backward - ln_choice + (hi - lo).ln()))
    }

    fn split(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult> {
        let impossible = Ok(MoveResult::Failed(FailureReason::StructurallyImpossible));
        let graph = &mut state.graph;
        if graph.num_admixture_parents() >= self.opts.max_events {
            return impossible;
        }

        let root = graph.root()?;
        let divergences: Vec<NodeId> = graph
            .nodes()
            .iter()
            .copied()
            .filter(|&id| id != root && graph.get(id).is_some_and(|x| x.is_divergence()))
            .collect();
        if divergences.is_empty() {
            return impossible;
        }
        let divergence = divergences[rng.index(divergences.len())];

        let node = graph.try_node(divergence)?;
        let i = rng.index(2);
        let (Some(moved_child), Some(left_behind), Some(parent)) =
            (node.child(i), node.child(1 - i), node.parent())
        else {
            return impossible;
        };
        let old_age = node.age();

        let (moved_node, left_node) = (graph.try_node(moved_child)?, graph.try_node(left_behind)?);
        if moved_node.is_outgroup() != left_node.is_outgroup() {
            return impossible;
        }
        let height = graph.tree_height();
        if !(height > moved_node.age()) {
            return impossible;
        }
        let age = moved_node.age() + rng.uniform01() * (height - moved_node.age());

        let targets: Vec<NodeId> = graph
            .branches_crossing_age(age)?
            .into_iter()
            .filter(|&c| !same_lineage(graph, c, divergence))
            .collect();
        if targets.is_empty() {
            return impossible;
        }
        let target = targets[rng.index(targets.len())];

        let lo = left_node.age().max(moved_node.age());
        let parent_age = graph.try_node(parent)?.age();
        let hi = age.min(parent_age);
        if !(hi > lo) {
            return impossible;
        }
        let edge_age = lo + rng.uniform01() * (hi - lo);
        let weight =
            MAX_ADMIXTURE_WEIGHT * rng.beta(self.opts.weight_alpha, self.opts.weight_beta)?;
        if !(weight > 0.0) {
            return impossible;
        }

        let draw = SplitDraw {
            divergence,
            moved_child,
            age,
            target,
            edge_age,
            weight,
        };
        let ln_forward = self.ln_split_density(graph, &draw)?;

        graph.set_age(divergence, age)?;
        graph.subtree_prune_regraft(divergence, moved_child, target, true)?;
        let donor = graph.new_splice_node();
        let recipient = graph.new_splice_node();
        graph.add_admixture_edge(donor, recipient, left_behind, moved_child, edge_age, weight, true)?;
        graph.reindex()?;

        self.pending = Some(Pending::Split {
            donor,
            recipient,
            moved: Moved {
                divergence,
                moved_child,
                left_behind,
                old_age,
            },
        });

        trace!(
            "{}: {} split off above {} at {}",
            self.name(),
            divergence,
            target,
            age
        );

        // a merge would pick this edge and redraw the divergence age on
        // the branch above the left-behind child
        let ln_backward = ln_merge_choice(graph, donor)? - (parent_age - lo).ln();
        Ok(MoveResult::Proposed(ln_backward - ln_forward))
    }
}

/// Put a regrafted divergence back at its old place and age
fn move_back(graph: &mut AdmixtureGraph, moved: &Moved) -> anyhow::Result<()> {
    graph.set_age(moved.divergence, moved.old_age)?;
    graph.subtree_prune_regraft(moved.divergence, moved.moved_child, moved.left_behind, true)?;
    Ok(())
}

impl ProposalKernel for DivergenceMerge {
    fn name(&self) -> &'static str {
        "divergence-merge"
    }

    fn active_generation(&self) -> usize {
        self.opts.active_generation
    }

    fn perform(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult> {
        // both halves are offered with equal chance, so the coin cancels
        if rng.uniform01() < 0.5 {
            self.merge(state, rng)
        } else {
            self.split(state, rng)
        }
    }

    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        let graph = &mut state.graph;
        match self.pending.take() {
            Some(Pending::Merged(pos, moved)) => {
                move_back(graph, &moved)?;
                restore_edge(graph, &pos)
            }
            Some(Pending::Split {
                donor,
                recipient,
                moved,
            }) => {
                graph.remove_admixture_edge(donor, true)?;
                graph.erase_node(donor)?;
                graph.erase_node(recipient)?;
                move_back(graph, &moved)?;
                graph.reindex()?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("{}: nothing to undo", self.name())),
        }
    }

    fn finalize(&mut self, state: &mut ChainState) -> anyhow::Result<()> {
        if let Some(Pending::Merged(pos, _)) = self.pending.take() {
            state.graph.erase_node(pos.donor)?;
            state.graph.erase_node(pos.recipient)?;
        }
        Ok(())
    }
}
