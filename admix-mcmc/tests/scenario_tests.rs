use admix_graph::simulate::simulate_coalescent;
use admix_graph::AdmixtureGraph;
use admix_mcmc::chain::ChainRunner;
use admix_mcmc::kernels::*;
use admix_mcmc::model::{ChainState, ModelRuntime, Variable};
use admix_mcmc::prior_model::{PriorModel, PriorOptions};
use admix_mcmc::random::ScriptedDraws;
use admix_mcmc::residuals::Residuals;
use admix_mcmc::sampler::{Sampler, SamplerOptions};
use admix_mcmc::transaction::{FailureReason, ProposalOutcome, ProposalTransaction};
use approx::assert_abs_diff_eq;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// ((A,B):1,(C,D):1):2
fn four_tip_state() -> anyhow::Result<ChainState> {
    let names: Vec<String> = ["A", "B", "C", "D"].iter().map(|x| x.to_string()).collect();
    let mut graph = AdmixtureGraph::with_names(names.clone());
    let a = graph.new_tip("A", 0.0);
    let b = graph.new_tip("B", 0.0);
    let c = graph.new_tip("C", 0.0);
    let d = graph.new_tip("D", 0.0);
    let ab = graph.new_divergence(a, b, 1.0)?;
    let cd = graph.new_divergence(c, d, 1.0)?;
    let root = graph.new_divergence(ab, cd, 2.0)?;
    graph.set_root(root)?;
    ChainState::new(graph, Residuals::zeros(4).with_names(names)?)
}

fn full_schedule() -> Sampler {
    let mut sampler = Sampler::new(SamplerOptions {
        validate_each_step: true,
    });
    sampler.add_move(Box::new(EdgeAdd::new(EdgeAddOptions::default())), 1.0);
    sampler.add_move(Box::new(EdgeRemove::new(EdgeRemoveOptions::default())), 1.0);
    sampler.add_move(Box::new(EdgeReplace::new(EdgeReplaceOptions::default())), 1.0);
    sampler.add_move(Box::new(EdgeShift::new(EdgeShiftOptions::default())), 1.0);
    sampler.add_move(Box::new(DivergenceSwap::new(DivergenceSwapOptions::default())), 1.0);
    sampler.add_move(Box::new(AgeSlide::new(AgeSlideOptions::default())), 1.0);
    sampler.add_move(Box::new(DivergenceMerge::new(DivergenceMergeOptions::default())), 1.0);
    sampler.add_move(Box::new(CladeResidualEdge::new(CladeResidualEdgeOptions::default())), 1.0);
    sampler
}

#[test]
fn add_then_remove_returns_to_the_tree() -> anyhow::Result<()> {
    let mut state = four_tip_state()?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let tree = state.graph.newick_representation()?;
    let snapshot = state.graph.snapshot();

    // x = 0.5 * 6 lands on D's branch at age 1; first candidate is A
    let mut draws = ScriptedDraws::new(0)
        .with_uniforms(&[0.5, 0.0])
        .with_betas(&[0.5]);
    let mut add = ProposalTransaction::new(Box::new(EdgeAdd::new(EdgeAddOptions::default())));
    let outcome = add.propose(&mut state, &mut model, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_abs_diff_eq!(outcome.ln_hastings_ratio(), 12f64.ln(), epsilon = 1e-10);
    add.commit(&mut state, &mut model)?;

    let graph = &mut state.graph;
    assert_eq!(graph.num_admixture_parents(), 1);
    let donor = graph.admixture_parents()[0];
    let recipient = graph[donor].admixture_child().expect("recipient");
    assert_eq!(
        graph.admixture_edge_str(donor, recipient)?,
        "D -> A\ta=1\tw=0.25"
    );
    // splice nodes never show up in Newick
    assert_eq!(graph.newick_representation()?, tree);
    graph.validate()?;

    let mut draws = ScriptedDraws::new(0).with_uniforms(&[0.0]);
    let mut remove =
        ProposalTransaction::new(Box::new(EdgeRemove::new(EdgeRemoveOptions::default())));
    let outcome = remove.propose(&mut state, &mut model, &mut draws)?;
    assert_abs_diff_eq!(outcome.ln_hastings_ratio(), -(12f64.ln()), epsilon = 1e-10);
    remove.commit(&mut state, &mut model)?;

    assert_eq!(state.graph.num_admixture_parents(), 0);
    assert_eq!(state.graph.newick_representation()?, tree);
    assert_eq!(state.graph.snapshot(), snapshot);
    Ok(())
}

#[test]
fn removing_from_a_tree_fails_with_sentinel() -> anyhow::Result<()> {
    let mut state = four_tip_state()?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let mut remove =
        ProposalTransaction::new(Box::new(EdgeRemove::new(EdgeRemoveOptions::default())));

    let mut draws = ScriptedDraws::new(3);
    let outcome = remove.propose(&mut state, &mut model, &mut draws)?;
    assert_eq!(
        outcome,
        ProposalOutcome::Failed(FailureReason::StructurallyImpossible)
    );
    assert_eq!(outcome.ln_hastings_ratio(), f64::NEG_INFINITY);
    remove.rollback(&mut state, &mut model)?;
    assert_eq!(remove.stats().num_failed, 1);
    Ok(())
}

#[test]
fn add_respects_max_events() -> anyhow::Result<()> {
    let mut state = four_tip_state()?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let mut add = ProposalTransaction::new(Box::new(EdgeAdd::new(EdgeAddOptions {
        max_events: 0,
        ..Default::default()
    })));
    let mut draws = ScriptedDraws::new(1);
    let outcome = add.propose(&mut state, &mut model, &mut draws)?;
    assert!(outcome.is_failed());
    add.rollback(&mut state, &mut model)?;
    Ok(())
}

#[test]
fn inactive_kernels_wait_for_their_generation() -> anyhow::Result<()> {
    let mut state = four_tip_state()?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let mut sampler = Sampler::new(SamplerOptions::default());
    sampler.add_move(
        Box::new(EdgeAdd::new(EdgeAddOptions {
            active_generation: 3,
            ..Default::default()
        })),
        1.0,
    );

    let mut rng = SmallRng::seed_from_u64(5);
    for _ in 0..3 {
        assert!(sampler.step(&mut state, &mut model, &mut rng)?.is_none());
    }
    let record = sampler.step(&mut state, &mut model, &mut rng)?;
    assert_eq!(record.map(|r| r.kernel), Some("edge-add".to_string()));
    Ok(())
}

#[test]
fn long_mixed_chain_keeps_every_invariant() -> anyhow::Result<()> {
    let names: Vec<String> = (0..6).map(|i| format!("T{}", i)).collect();
    let mut rng = SmallRng::seed_from_u64(2024);
    let graph = simulate_coalescent(&names, 1.0, &mut rng)?;

    let mut residuals = Residuals::zeros(6).with_names(names)?;
    residuals.set(0, 4, 1.0);
    residuals.set(4, 0, 1.0);
    residuals.set(1, 5, 0.5);
    let mut state = ChainState::new(graph, residuals)?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let mut sampler = full_schedule();

    let mut max_edges = 0;
    for _ in 0..2000 {
        sampler.step(&mut state, &mut model, &mut rng)?;
        assert!(state.graph.update_topological_sort());
        max_edges = max_edges.max(state.graph.num_admixture_parents());
        assert!(state.graph.num_admixture_parents() <= 10);
    }
    assert!(max_edges > 0);

    for (name, stats) in sampler.stats() {
        assert!(stats.num_tried > 0, "{} never tried", name);
        assert!(stats.num_accepted + stats.num_failed <= stats.num_tried);
    }

    // kept log probabilities still match the current state
    for var in [Variable::Graph, Variable::AdmixtureCount, Variable::BranchRates] {
        model.touch(var, &state)?;
        assert_abs_diff_eq!(model.ln_probability_ratio(var, &state)?, 0.0, epsilon = 1e-9);
    }
    model.restore(&state)?;
    Ok(())
}

#[test]
fn parallel_chains_are_reproducible() -> anyhow::Result<()> {
    let init = four_tip_state()?;
    let runner = ChainRunner {
        n_samples: 20,
        warmup: 50,
        thin: 5,
        seed: 9,
        show_progress: false,
    };
    let make_model = |state: &ChainState| -> anyhow::Result<Box<dyn ModelRuntime>> {
        Ok(Box::new(PriorModel::new(PriorOptions::default(), state)))
    };

    let first = runner.run_parallel(2, &init, &full_schedule, &make_model)?;
    let again = runner.run(&init, &full_schedule, &make_model)?;

    assert_eq!(first.len(), 2);
    assert_eq!(first[0].n_samples(), 20);
    assert_eq!(first[0].monitor.num_samples(), 20);
    let trace = |c: &admix_mcmc::chain::McmcChain| -> Vec<String> {
        c.samples.iter().map(|s| s.trace_line()).collect()
    };
    assert_eq!(trace(&first[0]), trace(&again));

    for (clade, f) in first[0].monitor.top_clades(10) {
        assert!(f > 0.0 && f <= 1.0, "{} at {}", clade, f);
    }
    Ok(())
}
