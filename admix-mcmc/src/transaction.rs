use crate::kernels::{MoveResult, ProposalKernel};
use crate::model::{ChainState, ModelRuntime};
use crate::random::RandomSource;
use log::{debug, warn};
use thiserror::Error;

/// Misuse of the propose / commit / rollback protocol. Any of these
/// aborts the chain.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("{0}: proposal already pending")]
    DoubleProposal(String),

    #[error("{0}: no pending proposal")]
    NoPendingProposal(String),

    #[error("{0}: cannot commit a failed proposal")]
    CommitFailedProposal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Proposed,
    Failed,
}

/// Why a kernel gave up without offering a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// nothing to act on; the graph was never touched
    StructurallyImpossible,
    /// discovered after detaching nodes; they were put back already
    DegenerateBounds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProposalOutcome {
    Proposed {
        ln_hastings_ratio: f64,
        ln_probability_ratio: f64,
    },
    Failed(FailureReason),
}

impl ProposalOutcome {
    /// negative infinity for a failed proposal
    pub fn ln_hastings_ratio(&self) -> f64 {
        match self {
            ProposalOutcome::Proposed {
                ln_hastings_ratio, ..
            } => *ln_hastings_ratio,
            ProposalOutcome::Failed(_) => f64::NEG_INFINITY,
        }
    }

    /// log Metropolis-Hastings acceptance ratio
    pub fn ln_acceptance_ratio(&self) -> f64 {
        match self {
            ProposalOutcome::Proposed {
                ln_hastings_ratio,
                ln_probability_ratio,
            } => ln_hastings_ratio + ln_probability_ratio,
            ProposalOutcome::Failed(_) => f64::NEG_INFINITY,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProposalOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MoveStats {
    pub num_tried: usize,
    pub num_accepted: usize,
    pub num_failed: usize,
}

impl MoveStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.num_tried > 0 {
            self.num_accepted as f64 / self.num_tried as f64
        } else {
            0.0
        }
    }
}

/// One kernel wrapped in the propose / commit / rollback state machine
pub struct ProposalTransaction {
    kernel: Box<dyn ProposalKernel>,
    state: TransactionState,
    stats: MoveStats,
}

impl ProposalTransaction {
    pub fn new(kernel: Box<dyn ProposalKernel>) -> Self {
        Self {
            kernel,
            state: TransactionState::Idle,
            stats: MoveStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.kernel.name()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn stats(&self) -> &MoveStats {
        &self.stats
    }

    pub fn is_active(&self, generation: usize) -> bool {
        self.kernel.is_active(generation)
    }

    /// Let the kernel edit `chain` and price the edit.
    ///
    /// The model is consulted only for a finite Hastings ratio; the
    /// variables depending on the primary one are added only while the
    /// running ratio stays finite.
    pub fn propose(
        &mut self,
        chain: &mut ChainState,
        model: &mut dyn ModelRuntime,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<ProposalOutcome> {
        if self.state != TransactionState::Idle {
            return Err(TransactionError::DoubleProposal(self.name().to_string()).into());
        }
        self.stats.num_tried += 1;

        match self.kernel.perform(chain, rng)? {
            MoveResult::Failed(reason) => {
                self.state = TransactionState::Failed;
                self.stats.num_failed += 1;
                debug!("{}: failed ({:?})", self.kernel.name(), reason);
                Ok(ProposalOutcome::Failed(reason))
            }
            MoveResult::Proposed(ln_hastings_ratio) => {
                self.state = TransactionState::Proposed;

                let primary = self.kernel.primary_variable();
                let touched = self.kernel.touched_variables();
                for &var in touched.iter() {
                    model.touch(var, chain)?;
                }

                let mut ln_probability_ratio = 0.0;
                if ln_hastings_ratio.is_finite() {
                    ln_probability_ratio = model.ln_probability_ratio(primary, chain)?;
                    for &var in touched.iter().filter(|&&v| v != primary) {
                        ln_probability_ratio += model.ln_probability_ratio(var, chain)?;
                    }
                    if ln_probability_ratio.is_finite() {
                        for var in model.affected_nodes(primary) {
                            ln_probability_ratio += model.ln_probability_ratio(var, chain)?;
                        }
                    }
                }

                Ok(ProposalOutcome::Proposed {
                    ln_hastings_ratio,
                    ln_probability_ratio,
                })
            }
        }
    }

    /// Accept the pending proposal
    pub fn commit(
        &mut self,
        chain: &mut ChainState,
        model: &mut dyn ModelRuntime,
    ) -> anyhow::Result<()> {
        match self.state {
            TransactionState::Proposed => {
                self.kernel.finalize(chain)?;
                model.keep(chain)?;
                self.stats.num_accepted += 1;
                self.state = TransactionState::Idle;
                Ok(())
            }
            TransactionState::Failed => {
                warn!("{}: commit after failure", self.kernel.name());
                Err(TransactionError::CommitFailedProposal(self.name().to_string()).into())
            }
            TransactionState::Idle => {
                Err(TransactionError::NoPendingProposal(self.name().to_string()).into())
            }
        }
    }

    /// Undo the pending proposal; a failed one left nothing to undo
    pub fn rollback(
        &mut self,
        chain: &mut ChainState,
        model: &mut dyn ModelRuntime,
    ) -> anyhow::Result<()> {
        match self.state {
            TransactionState::Proposed => {
                self.kernel.undo(chain)?;
                for var in self.kernel.touched_variables() {
                    model.touch(var, chain)?;
                }
                model.restore(chain)?;
                self.state = TransactionState::Idle;
                Ok(())
            }
            TransactionState::Failed => {
                self.state = TransactionState::Idle;
                Ok(())
            }
            TransactionState::Idle => {
                Err(TransactionError::NoPendingProposal(self.name().to_string()).into())
            }
        }
    }
}
