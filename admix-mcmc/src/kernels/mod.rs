//! Proposal kernels: each one edits the chain state in place, reports
//! `ln(backward density / forward density)` and knows how to take the edit
//! back.

mod age_slide;
mod clade_residual_edge;
mod divergence_merge;
mod divergence_swap;
mod edge_add;
mod edge_remove;
mod edge_replace;
mod edge_shift;
pub mod lineage;

pub use age_slide::{AgeSlide, AgeSlideOptions};
pub use clade_residual_edge::{
    lineage_pair_scores, CladeResidualEdge, CladeResidualEdgeOptions, LineagePair,
};
pub use divergence_merge::{DivergenceMerge, DivergenceMergeOptions};
pub use divergence_swap::{DivergenceSwap, DivergenceSwapOptions};
pub use edge_add::{EdgeAdd, EdgeAddOptions};
pub use edge_remove::{EdgeRemove, EdgeRemoveOptions};
pub use edge_replace::{EdgeReplace, EdgeReplaceOptions};
pub use edge_shift::{EdgeShift, EdgeShiftOptions};

use crate::model::{ChainState, Variable};
use crate::random::RandomSource;
use crate::transaction::FailureReason;

/// What a kernel did to the state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveResult {
    /// state edited; carries the log Hastings ratio
    Proposed(f64),
    /// state left exactly as it was
    Failed(FailureReason),
}

pub trait ProposalKernel {
    fn name(&self) -> &'static str;

    /// variable whose probability ratio leads the acceptance ratio
    fn primary_variable(&self) -> Variable {
        Variable::Graph
    }

    /// every variable the kernel may change
    fn touched_variables(&self) -> Vec<Variable> {
        vec![self.primary_variable()]
    }

    /// kernels sit out the first `active_generation` generations
    fn active_generation(&self) -> usize {
        0
    }

    fn is_active(&self, generation: usize) -> bool {
        generation > self.active_generation()
    }

    /// Edit `state`; on `Failed` the state must be untouched
    fn perform(
        &mut self,
        state: &mut ChainState,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<MoveResult>;

    /// Take back the last successful `perform`
    fn undo(&mut self, state: &mut ChainState) -> anyhow::Result<()>;

    /// Release what the accepted edit no longer needs
    fn finalize(&mut self, _state: &mut ChainState) -> anyhow::Result<()> {
        Ok(())
    }
}
