pub use admix_graph::simulate::simulate_coalescent;

pub use admix_mcmc::chain::{ChainRunner, McmcChain};
pub use admix_mcmc::io::*;
pub use admix_mcmc::kernels::*;
pub use admix_mcmc::model::{ChainState, ModelRuntime};
pub use admix_mcmc::monitor::{node_table, BipartitionMonitor};
pub use admix_mcmc::prior_model::{PriorModel, PriorOptions};
pub use admix_mcmc::residuals::Residuals;
pub use admix_mcmc::sampler::{Sampler, SamplerOptions};

pub use clap::{Args, Parser, Subcommand};
pub use log::info;
pub use rand::rngs::SmallRng;
pub use rand::SeedableRng;
