mod common;
mod run_chain;
mod run_simulate;

use common::*;
use run_chain::*;
use run_simulate::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "ADMIX-MCMC",
    long_about = "Bayesian sampling of admixture graphs.\n\
		  Admixture edges are added, removed and moved by transactional\n\
		  Metropolis-Hastings proposals that roll back exactly on rejection."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run MCMC chains over admixture graphs",
        long_about = "Start from a random coalescent tree over the taxa and run\n\
		      independent chains in parallel:\n\
		      (1) read residuals (or taxon names)\n\
		      (2) sample with the weighted move schedule\n\
		      (3) write traces, sampled trees and a bipartition summary.\n",
        visible_alias = "mcmc"
    )]
    Run(RunArgs),

    #[command(
        about = "Simulate a coalescent starting tree",
        visible_alias = "sim"
    )]
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Run(args) => {
            run_chains(args)?;
        }
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
    }

    Ok(())
}
