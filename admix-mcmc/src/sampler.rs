use crate::kernels::ProposalKernel;
use crate::model::{ChainState, ModelRuntime};
use crate::random::RandomSource;
use crate::transaction::{MoveStats, ProposalOutcome, ProposalTransaction};
use log::info;

#[derive(Debug, Clone, Default)]
pub struct SamplerOptions {
    /// check every graph invariant after each step
    pub validate_each_step: bool,
}

struct ScheduledMove {
    transaction: ProposalTransaction,
    weight: f64,
}

/// What happened in one Metropolis-Hastings step
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub kernel: String,
    pub outcome: ProposalOutcome,
    pub accepted: bool,
}

/// Metropolis-Hastings sampler drawing a kernel per step from a
/// weighted schedule.
pub struct Sampler {
    moves: Vec<ScheduledMove>,
    generation: usize,
    opts: SamplerOptions,
}

impl Sampler {
    pub fn new(opts: SamplerOptions) -> Self {
        Self {
            moves: vec![],
            generation: 0,
            opts,
        }
    }

    /// Schedule `kernel`, picked with probability proportional to `weight`
    /// among the kernels active at a given generation
    pub fn add_move(&mut self, kernel: Box<dyn ProposalKernel>, weight: f64) {
        self.moves.push(ScheduledMove {
            transaction: ProposalTransaction::new(kernel),
            weight,
        });
    }

    pub fn num_moves(&self) -> usize {
        self.moves.len()
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Advance one generation: propose, then commit or roll back.
    ///
    /// Returns `None` when no kernel is active yet.
    pub fn step(
        &mut self,
        chain: &mut ChainState,
        model: &mut dyn ModelRuntime,
        rng: &mut dyn RandomSource,
    ) -> anyhow::Result<Option<StepRecord>> {
        self.generation += 1;
        let generation = self.generation;

        let active: Vec<usize> = (0..self.moves.len())
            .filter(|&i| self.moves[i].weight > 0.0 && self.moves[i].transaction.is_active(generation))
            .collect();
        let total: f64 = active.iter().map(|&i| self.moves[i].weight).sum();
        if active.is_empty() || !(total > 0.0) {
            return Ok(None);
        }

        let mut u = rng.uniform01() * total;
        let mut chosen = active[active.len() - 1];
        for &i in active.iter() {
            if u < self.moves[i].weight {
                chosen = i;
                break;
            }
            u -= self.moves[i].weight;
        }

        let transaction = &mut self.moves[chosen].transaction;
        let outcome = transaction.propose(chain, model, rng)?;

        let accepted = match outcome {
            ProposalOutcome::Failed(_) => false,
            ProposalOutcome::Proposed { .. } => {
                let ln_ratio = outcome.ln_acceptance_ratio();
                ln_ratio >= 0.0 || rng.uniform01().ln() < ln_ratio
            }
        };

        if accepted {
            transaction.commit(chain, model)?;
        } else {
            transaction.rollback(chain, model)?;
        }

        if self.opts.validate_each_step {
            chain.graph.validate()?;
        }

        Ok(Some(StepRecord {
            kernel: transaction.name().to_string(),
            outcome,
            accepted,
        }))
    }

    /// Per-kernel counters
    pub fn stats(&self) -> Vec<(&str, &MoveStats)> {
        self.moves
            .iter()
            .map(|m| (m.transaction.name(), m.transaction.stats()))
            .collect()
    }

    pub fn log_summary(&self) {
        for (name, stats) in self.stats() {
            info!(
                "{:>16}: tried {:>8}, accepted {:>8} ({:.3}), failed {:>8}",
                name,
                stats.num_tried,
                stats.num_accepted,
                stats.acceptance_rate(),
                stats.num_failed
            );
        }
    }
}
