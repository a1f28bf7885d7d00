use crate::common::*;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Taxon names (comma-separated)
    #[arg(long, short = 'x', value_delimiter(','), required = true)]
    taxa: Vec<Box<str>>,

    /// root age
    #[arg(long, default_value_t = 1.0)]
    height: f64,

    /// random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    env_logger::init();

    let names: Vec<String> = args.taxa.iter().map(|x| x.to_string()).collect();
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let mut graph = simulate_coalescent(&names, args.height, &mut rng)?;
    graph.validate()?;

    let out = args.out.as_ref();
    mkdir(out)?;
    write_lines(&[graph.newick_representation()?], &(out.to_string() + ".newick"))?;
    write_lines(&[graph.snapshot().to_json()?], &(out.to_string() + ".json"))?;
    info!("simulated {} taxa, height {}", graph.num_tips(), graph.tree_height());
    Ok(())
}
