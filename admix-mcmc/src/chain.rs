use crate::model::{ChainState, ModelRuntime};
use crate::monitor::BipartitionMonitor;
use crate::sampler::Sampler;
use crate::transaction::MoveStats;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// State recorded at one retained generation
#[derive(Debug, Clone)]
pub struct ChainSample {
    pub generation: usize,
    pub ln_posterior: f64,
    pub num_admixture_edges: usize,
    pub tree_height: f64,
    pub newick: String,
    /// `admixture_edge_str` of every edge
    pub edges: Vec<String>,
}

impl ChainSample {
    fn capture(generation: usize, ln_posterior: f64, state: &mut ChainState) -> anyhow::Result<Self> {
        let graph = &mut state.graph;
        let mut edges = vec![];
        for &donor in graph.admixture_parents() {
            if let Some(recipient) = graph.try_node(donor)?.admixture_child() {
                edges.push(graph.admixture_edge_str(donor, recipient)?);
            }
        }
        Ok(Self {
            generation,
            ln_posterior,
            num_admixture_edges: graph.num_admixture_parents(),
            tree_height: graph.tree_height(),
            newick: graph.newick_representation()?,
            edges,
        })
    }

    /// One tab-separated trace line
    pub fn trace_line(&self) -> String {
        format!(
            "{}\t{:.6}\t{}\t{:.6}\t{}",
            self.generation,
            self.ln_posterior,
            self.num_admixture_edges,
            self.tree_height,
            self.edges.join(";")
        )
    }
}

/// Retained samples of one chain with its final state and counters
pub struct McmcChain {
    pub samples: Vec<ChainSample>,
    pub monitor: BipartitionMonitor,
    pub stats: Vec<(String, MoveStats)>,
    pub last_state: ChainState,
}

impl McmcChain {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Posterior mean of a sample statistic
    pub fn posterior_mean(&self, stat: impl Fn(&ChainSample) -> f64) -> f64 {
        let n = self.n_samples();
        if n == 0 {
            return f64::NAN;
        }
        self.samples.iter().map(stat).sum::<f64>() / n as f64
    }

    /// Posterior quantile (0 <= q <= 1) of a sample statistic
    pub fn quantile(&self, q: f64, stat: impl Fn(&ChainSample) -> f64) -> f64 {
        let n = self.n_samples();
        if n == 0 {
            return f64::NAN;
        }
        let mut vals: Vec<f64> = self.samples.iter().map(stat).collect();
        vals.sort_unstable_by(|a, b| a.total_cmp(b));
        let idx = (q * (n - 1) as f64).clamp(0.0, (n - 1) as f64);
        let lo = idx.floor() as usize;
        let hi = idx.ceil() as usize;
        if lo == hi {
            vals[lo]
        } else {
            let frac = idx - lo as f64;
            vals[lo] * (1.0 - frac) + vals[hi] * frac
        }
    }
}

/// Chain runner configuration
#[derive(Debug, Clone)]
pub struct ChainRunner {
    pub n_samples: usize,
    pub warmup: usize,
    pub thin: usize,
    pub seed: u64,
    pub show_progress: bool,
}

impl ChainRunner {
    pub fn new(n_samples: usize, warmup: usize) -> Self {
        Self {
            n_samples,
            warmup,
            thin: 1,
            seed: 42,
            show_progress: false,
        }
    }

    /// Run a single chain from `init`.
    ///
    /// - `make_sampler`: builds the move schedule
    /// - `make_model`: builds the model for the initial state
    pub fn run(
        &self,
        init: &ChainState,
        make_sampler: &impl Fn() -> Sampler,
        make_model: &impl Fn(&ChainState) -> anyhow::Result<Box<dyn ModelRuntime>>,
    ) -> anyhow::Result<McmcChain> {
        let thin = self.thin.max(1);
        let total = self.warmup + self.n_samples * thin;
        let mut rng = SmallRng::seed_from_u64(self.seed);

        let mut state = init.clone();
        let mut model = make_model(&state)?;
        let mut sampler = make_sampler();
        let mut monitor = BipartitionMonitor::new();
        let mut samples = Vec::with_capacity(self.n_samples);

        let pb = ProgressBar::new(total as u64);
        if !self.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        for i in 0..total {
            sampler.step(&mut state, model.as_mut(), &mut rng)?;

            if i >= self.warmup && (i - self.warmup) % thin == 0 {
                let ln_posterior = model.ln_posterior(&state)?;
                monitor.update(&state.graph)?;
                samples.push(ChainSample::capture(sampler.generation(), ln_posterior, &mut state)?);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!("chain seed {}: {} samples", self.seed, samples.len());
        sampler.log_summary();

        let stats = sampler
            .stats()
            .into_iter()
            .map(|(name, s)| (name.to_string(), s.clone()))
            .collect();

        Ok(McmcChain {
            samples,
            monitor,
            stats,
            last_state: state,
        })
    }

    /// Run independent chains in parallel via rayon.
    /// Each chain gets `seed + chain_idx` for reproducibility.
    pub fn run_parallel(
        &self,
        n_chains: usize,
        init: &ChainState,
        make_sampler: &(impl Fn() -> Sampler + Sync),
        make_model: &(impl Fn(&ChainState) -> anyhow::Result<Box<dyn ModelRuntime>> + Sync),
    ) -> anyhow::Result<Vec<McmcChain>> {
        (0..n_chains)
            .into_par_iter()
            .map(|i| {
                let runner = ChainRunner {
                    seed: self.seed.wrapping_add(i as u64),
                    ..self.clone()
                };
                runner.run(init, make_sampler, make_model)
            })
            .collect()
    }
}
