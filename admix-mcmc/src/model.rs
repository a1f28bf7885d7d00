use crate::branch_rates::BranchRates;
use crate::residuals::Residuals;
use admix_graph::AdmixtureGraph;

/// Random variables of the model that proposals can touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    /// the admixture graph itself
    Graph,
    /// number of admixture edges, a function of the graph
    AdmixtureCount,
    /// per-branch clock rates
    BranchRates,
}

/// Everything a chain mutates
#[derive(Debug, Clone)]
pub struct ChainState {
    pub graph: AdmixtureGraph,
    pub branch_rates: BranchRates,
    pub residuals: Residuals,
}

impl ChainState {
    /// Wrap a rooted graph; every branch starts at rate 1
    pub fn new(graph: AdmixtureGraph, residuals: Residuals) -> anyhow::Result<Self> {
        if residuals.num_taxa() != graph.num_tips() {
            return Err(anyhow::anyhow!(
                "{} residual rows for {} tips",
                residuals.num_taxa(),
                graph.num_tips()
            ));
        }
        let branch_rates = BranchRates::for_graph(&graph, 1.0);
        Ok(Self {
            graph,
            branch_rates,
            residuals,
        })
    }
}

/// The probabilistic model the kernels run against.
///
/// Follows a touch / ratio / keep-or-restore protocol: a proposal
/// touches the variables it changed, asks for their log probability
/// ratios against the last kept state, then either keeps the new values
/// or restores the old ones.
pub trait ModelRuntime {
    /// mark `var` (and whatever depends on it) as changed
    fn touch(&mut self, var: Variable, state: &ChainState) -> anyhow::Result<()>;

    /// `ln p(new) - ln p(kept)` for `var`; zero if untouched
    fn ln_probability_ratio(&mut self, var: Variable, state: &ChainState) -> anyhow::Result<f64>;

    /// variables whose probability depends on `var`
    fn affected_nodes(&self, var: Variable) -> Vec<Variable>;

    /// accept the touched values
    fn keep(&mut self, state: &ChainState) -> anyhow::Result<()>;

    /// forget the touched values
    fn restore(&mut self, state: &ChainState) -> anyhow::Result<()>;

    /// log posterior of the kept state
    fn ln_posterior(&mut self, state: &ChainState) -> anyhow::Result<f64>;
}
