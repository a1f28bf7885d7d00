use crate::common::*;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Residual matrix file (`name r_1 ... r_n` per row, gzipped or not).
    /// Row order fixes the tip order.
    #[arg(long, short)]
    residuals: Option<Box<str>>,

    /// Taxon names (comma-separated); used when no residual file is given
    #[arg(long, short = 'x', value_delimiter(','))]
    taxa: Option<Vec<Box<str>>>,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// retained samples per chain
    #[arg(long, short = 'n', default_value_t = 1000)]
    n_samples: usize,

    /// generations discarded before sampling
    #[arg(long, short = 'w', default_value_t = 1000)]
    warmup: usize,

    /// generations between retained samples
    #[arg(long, default_value_t = 10)]
    thin: usize,

    /// number of independent chains
    #[arg(long, short = 'c', default_value_t = 4)]
    chains: usize,

    /// random seed; chain `i` uses `seed + i`
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// root age of the starting tree
    #[arg(long, default_value_t = 1.0)]
    height: f64,

    /// maximum number of admixture edges
    #[arg(long, default_value_t = 10)]
    max_events: usize,

    /// Poisson prior rate of admixture edges per unit tree length
    #[arg(long, default_value_t = 1.0)]
    admixture_rate: f64,

    /// sharpness of residual-weighted edge placement
    #[arg(long, default_value_t = 1.0)]
    delta: f64,

    /// concentration of the Beta random walks
    #[arg(long, default_value_t = 10.0)]
    lambda: f64,

    /// let edges reach up to the MRCA of two clades
    #[arg(long, default_value_t = false)]
    allow_sister_admixture: bool,

    /// move weights: add, remove, replace, shift, swap, slide, merge,
    /// clade-edge
    #[arg(long, value_delimiter(','), default_values_t = vec![1.0, 1.0, 1.0, 1.0, 0.5, 2.0, 0.5, 1.0])]
    move_weights: Vec<f64>,

    /// number of threads for independent chains (default: all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// check all graph invariants after every step
    #[arg(long, default_value_t = false)]
    validate: bool,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

fn sampler_builder(args: &RunArgs) -> anyhow::Result<impl Fn() -> Sampler + Sync + '_> {
    if args.move_weights.len() != 8 {
        return Err(anyhow::anyhow!(
            "expected 8 move weights, got {}",
            args.move_weights.len()
        ));
    }

    Ok(move || {
        let w = &args.move_weights;
        let mut sampler = Sampler::new(SamplerOptions {
            validate_each_step: args.validate,
        });
        sampler.add_move(
            Box::new(EdgeAdd::new(EdgeAddOptions {
                max_events: args.max_events,
                ..Default::default()
            })),
            w[0],
        );
        sampler.add_move(Box::new(EdgeRemove::new(EdgeRemoveOptions::default())), w[1]);
        sampler.add_move(
            Box::new(EdgeReplace::new(EdgeReplaceOptions {
                delta: args.delta,
                allow_sister_admixture: args.allow_sister_admixture,
                ..Default::default()
            })),
            w[2],
        );
        sampler.add_move(
            Box::new(EdgeShift::new(EdgeShiftOptions {
                lambda: args.lambda,
                ..Default::default()
            })),
            w[3],
        );
        sampler.add_move(
            Box::new(DivergenceSwap::new(DivergenceSwapOptions::default())),
            w[4],
        );
        sampler.add_move(
            Box::new(AgeSlide::new(AgeSlideOptions {
                lambda: args.lambda,
                weight_lambda: args.lambda,
                allow_sister_admixture: args.allow_sister_admixture,
                ..Default::default()
            })),
            w[5],
        );
        sampler.add_move(
            Box::new(DivergenceMerge::new(DivergenceMergeOptions {
                max_events: args.max_events,
                ..Default::default()
            })),
            w[6],
        );
        sampler.add_move(
            Box::new(CladeResidualEdge::new(CladeResidualEdgeOptions {
                max_events: args.max_events,
                ..Default::default()
            })),
            w[7],
        );
        sampler
    })
}

fn read_residuals(args: &RunArgs) -> anyhow::Result<Residuals> {
    match (&args.residuals, &args.taxa) {
        (Some(file), _) => Residuals::from_file(file),
        (None, Some(taxa)) => {
            let names: Vec<String> = taxa.iter().map(|x| x.to_string()).collect();
            Residuals::zeros(names.len()).with_names(names)
        }
        (None, None) => Err(anyhow::anyhow!("need either --residuals or --taxa")),
    }
}

pub fn run_chains(args: &RunArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let residuals = read_residuals(args)?;
    let names = residuals.names().to_vec();
    info!("{} taxa", names.len());

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let graph = simulate_coalescent(&names, args.height, &mut rng)?;
    let init = ChainState::new(graph, residuals)?;

    let make_sampler = sampler_builder(args)?;
    let prior = PriorOptions {
        admixture_rate: args.admixture_rate,
        ..Default::default()
    };
    let make_model = |state: &ChainState| -> anyhow::Result<Box<dyn ModelRuntime>> {
        Ok(Box::new(PriorModel::new(prior.clone(), state)))
    };

    let runner = ChainRunner {
        n_samples: args.n_samples,
        warmup: args.warmup,
        thin: args.thin,
        seed: args.seed,
        show_progress: !args.verbose,
    };

    let num_threads = args.threads.unwrap_or_else(num_cpus::get).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()?;
    info!("running {} chains on {} threads", args.chains, num_threads);

    let chains =
        pool.install(|| runner.run_parallel(args.chains, &init, &make_sampler, &make_model))?;

    write_outputs(args, &chains)
}

fn write_outputs(args: &RunArgs, chains: &[McmcChain]) -> anyhow::Result<()> {
    let out = args.out.as_ref();
    mkdir(out)?;

    let mut trace = vec!["chain\tgeneration\tln_posterior\tnum_edges\theight\tedges".to_string()];
    let mut trees = vec![];
    let mut monitor = BipartitionMonitor::new();

    for (c, chain) in chains.iter().enumerate() {
        trace.extend(
            chain
                .samples
                .iter()
                .map(|s| format!("{}\t{}", c, s.trace_line())),
        );
        trees.extend(chain.samples.iter().map(|s| s.newick.clone()));
        monitor.merge(&chain.monitor)?;

        info!(
            "chain {}: mean #edges {:.3}, ln posterior [{:.3}, {:.3}]",
            c,
            chain.posterior_mean(|s| s.num_admixture_edges as f64),
            chain.quantile(0.025, |s| s.ln_posterior),
            chain.quantile(0.975, |s| s.ln_posterior)
        );
    }

    write_lines(&trace, &(out.to_string() + ".trace.gz"))?;
    write_lines(&trees, &(out.to_string() + ".trees.gz"))?;
    write_lines(&monitor.summary_lines(20), &(out.to_string() + ".summary.tsv"))?;

    let (labels, admixture) = monitor.admixture_matrix();
    write_named_matrix(&labels, &admixture, &(out.to_string() + ".admixture.tsv"))?;

    if let Some(chain) = chains.first() {
        let json = chain.last_state.graph.snapshot().to_json()?;
        write_lines(&[json], &(out.to_string() + ".last.json"))?;
        let mut graph = chain.last_state.graph.clone();
        let nodes = node_table(&mut graph, &chain.last_state.branch_rates)?;
        write_lines(&nodes, &(out.to_string() + ".last.nodes.tsv"))?;
    }

    info!(
        "wrote {}.{{trace.gz,trees.gz,summary.tsv,admixture.tsv,last.json,last.nodes.tsv}}",
        out
    );
    Ok(())
}
