use crate::model::{ChainState, ModelRuntime, Variable};
use crate::random::ln_beta_pdf;
use log::debug;
use special::Gamma;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct PriorOptions {
    /// Poisson rate of admixture edges per unit tree length
    pub admixture_rate: f64,
    /// Beta shapes of `weight / 0.5`
    pub weight_alpha: f64,
    pub weight_beta: f64,
    /// Gamma(shape, shape) prior on branch rates (mean one)
    pub rate_shape: f64,
}

impl Default for PriorOptions {
    fn default() -> Self {
        Self {
            admixture_rate: 1.0,
            weight_alpha: 1.0,
            weight_beta: 3.0,
            rate_shape: 2.0,
        }
    }
}

/// Reference model: priors on the admixture edges, their number and the
/// branch rates, with no data likelihood. Running a chain against it
/// samples the prior.
pub struct PriorModel {
    opts: PriorOptions,
    kept: BTreeMap<Variable, f64>,
    touched: BTreeSet<Variable>,
}

const ALL_VARIABLES: [Variable; 3] = [
    Variable::Graph,
    Variable::AdmixtureCount,
    Variable::BranchRates,
];

impl PriorModel {
    pub fn new(opts: PriorOptions, state: &ChainState) -> Self {
        let mut ret = Self {
            opts,
            kept: BTreeMap::new(),
            touched: BTreeSet::new(),
        };
        for var in ALL_VARIABLES {
            let lp = ret.ln_probability(var, state);
            ret.kept.insert(var, lp);
        }
        ret
    }

    /// log probability of `var` in `state`
    pub fn ln_probability(&self, var: Variable, state: &ChainState) -> f64 {
        match var {
            Variable::Graph => self.ln_graph_prior(state),
            Variable::AdmixtureCount => {
                let k = state.graph.num_admixture_parents() as f64;
                let mu = self.opts.admixture_rate * state.graph.unit_tree_length();
                if mu > 0.0 {
                    k * mu.ln() - mu - (k + 1.0).ln_gamma().0
                } else if k == 0.0 {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            }
            Variable::BranchRates => {
                let s = self.opts.rate_shape;
                let norm = s * s.ln() - s.ln_gamma().0;
                state
                    .branch_rates
                    .iter()
                    .map(|(_, r)| {
                        if r > 0.0 {
                            norm + (s - 1.0) * r.ln() - s * r
                        } else {
                            f64::NEG_INFINITY
                        }
                    })
                    .sum()
            }
        }
    }

    /// Each edge: age uniform below the root, weight `0.5 * Beta(a, b)`
    fn ln_graph_prior(&self, state: &ChainState) -> f64 {
        let graph = &state.graph;
        let height = graph.tree_height();
        if !(height > 0.0) {
            return f64::NEG_INFINITY;
        }
        graph
            .admixture_parents()
            .iter()
            .map(|&donor| {
                let weight = graph
                    .get(donor)
                    .and_then(|x| x.admixture_child())
                    .and_then(|r| graph.get(r))
                    .map(|r| r.weight())
                    .unwrap_or(0.0);
                ln_beta_pdf(weight / 0.5, self.opts.weight_alpha, self.opts.weight_beta)
                    - 0.5f64.ln()
                    - height.ln()
            })
            .sum()
    }
}

impl ModelRuntime for PriorModel {
    fn touch(&mut self, var: Variable, _state: &ChainState) -> anyhow::Result<()> {
        self.touched.insert(var);
        for x in self.affected_nodes(var) {
            self.touched.insert(x);
        }
        Ok(())
    }

    fn ln_probability_ratio(&mut self, var: Variable, state: &ChainState) -> anyhow::Result<f64> {
        if !self.touched.contains(&var) {
            return Ok(0.0);
        }
        let kept = self
            .kept
            .get(&var)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no kept value for {:?}", var))?;
        Ok(self.ln_probability(var, state) - kept)
    }

    fn affected_nodes(&self, var: Variable) -> Vec<Variable> {
        match var {
            Variable::Graph => vec![Variable::AdmixtureCount],
            _ => vec![],
        }
    }

    fn keep(&mut self, state: &ChainState) -> anyhow::Result<()> {
        let touched = std::mem::take(&mut self.touched);
        for var in touched {
            let lp = self.ln_probability(var, state);
            self.kept.insert(var, lp);
        }
        Ok(())
    }

    fn restore(&mut self, _state: &ChainState) -> anyhow::Result<()> {
        if !self.touched.is_empty() {
            debug!("restoring {:?}", self.touched);
        }
        self.touched.clear();
        Ok(())
    }

    fn ln_posterior(&mut self, state: &ChainState) -> anyhow::Result<f64> {
        Ok(ALL_VARIABLES
            .iter()
            .map(|&var| self.ln_probability(var, state))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residuals::Residuals;
    use admix_graph::AdmixtureGraph;
    use approx::assert_abs_diff_eq;

    /// ((A,B):1,C):2, tree length 5 over height 2
    fn three_tips() -> anyhow::Result<ChainState> {
        let mut graph = AdmixtureGraph::new();
        let a = graph.new_tip("A", 0.0);
        let b = graph.new_tip("B", 0.0);
        let c = graph.new_tip("C", 0.0);
        let ab = graph.new_divergence(a, b, 1.0)?;
        let r = graph.new_divergence(ab, c, 2.0)?;
        graph.set_root(r)?;
        graph.reindex()?;
        ChainState::new(graph, Residuals::zeros(3))
    }

    #[test]
    fn edge_count_mean_scales_with_unit_tree_length() -> anyhow::Result<()> {
        let state = three_tips()?;
        assert_abs_diff_eq!(state.graph.unit_tree_length(), 2.5, epsilon = 1e-12);

        let opts = PriorOptions {
            admixture_rate: 2.0,
            ..Default::default()
        };
        let model = PriorModel::new(opts, &state);
        // no edges: ln P(0) = -mu with mu = 2 * 2.5
        assert_abs_diff_eq!(
            model.ln_probability(Variable::AdmixtureCount, &state),
            -5.0,
            epsilon = 1e-12
        );

        let opts = PriorOptions {
            admixture_rate: 0.0,
            ..Default::default()
        };
        let model = PriorModel::new(opts, &state);
        assert_eq!(model.ln_probability(Variable::AdmixtureCount, &state), 0.0);
        Ok(())
    }
}
