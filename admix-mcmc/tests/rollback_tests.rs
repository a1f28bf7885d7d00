use admix_graph::{AdmixtureGraph, GraphSnapshot};
use admix_mcmc::kernels::*;
use admix_mcmc::model::ChainState;
use admix_mcmc::prior_model::{PriorModel, PriorOptions};
use admix_mcmc::random::ScriptedDraws;
use admix_mcmc::residuals::Residuals;
use admix_mcmc::transaction::{
    FailureReason, ProposalOutcome, ProposalTransaction, TransactionError, TransactionState,
};
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// (((A,B):1,C):2,(D,E):3):4 with edges D@1.5 -> AB and E@2.5 -> ABC
fn admixed_state() -> anyhow::Result<ChainState> {
    let names: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|x| x.to_string()).collect();
    let mut graph = AdmixtureGraph::with_names(names.clone());
    let a = graph.new_tip("A", 0.0);
    let b = graph.new_tip("B", 0.0);
    let c = graph.new_tip("C", 0.0);
    let d = graph.new_tip("D", 0.0);
    let e = graph.new_tip("E", 0.0);
    let ab = graph.new_divergence(a, b, 1.0)?;
    let abc = graph.new_divergence(ab, c, 2.0)?;
    let de = graph.new_divergence(d, e, 3.0)?;
    let root = graph.new_divergence(abc, de, 4.0)?;
    graph.set_root(root)?;

    let (x, y) = (graph.new_splice_node(), graph.new_splice_node());
    graph.add_admixture_edge(x, y, d, ab, 1.5, 0.3, true)?;
    let (x, y) = (graph.new_splice_node(), graph.new_splice_node());
    graph.add_admixture_edge(x, y, e, abc, 2.5, 0.2, true)?;
    graph.reindex()?;
    graph.validate()?;

    let mut r = DMatrix::from_element(5, 5, 0.1);
    r[(0, 3)] = 2.0;
    r[(3, 0)] = 2.0;
    r[(2, 4)] = 1.0;
    let residuals = Residuals::from_matrix(r)?.with_names(names)?;
    ChainState::new(graph, residuals)
}

fn kernels() -> Vec<Box<dyn ProposalKernel>> {
    vec![
        Box::new(EdgeAdd::new(EdgeAddOptions::default())),
        Box::new(EdgeRemove::new(EdgeRemoveOptions::default())),
        Box::new(EdgeReplace::new(EdgeReplaceOptions::default())),
        Box::new(EdgeShift::new(EdgeShiftOptions::default())),
        Box::new(DivergenceSwap::new(DivergenceSwapOptions::default())),
        Box::new(AgeSlide::new(AgeSlideOptions::default())),
        Box::new(DivergenceMerge::new(DivergenceMergeOptions::default())),
        Box::new(CladeResidualEdge::new(CladeResidualEdgeOptions::default())),
    ]
}

struct Image {
    snapshot: GraphSnapshot,
    newick: String,
    state: ChainState,
}

fn image(state: &mut ChainState) -> anyhow::Result<Image> {
    Ok(Image {
        snapshot: state.graph.snapshot(),
        newick: state.graph.newick_representation()?,
        state: state.clone(),
    })
}

fn assert_same(state: &mut ChainState, before: &Image, what: &str) -> anyhow::Result<()> {
    assert_eq!(state.graph.snapshot(), before.snapshot, "{}", what);
    assert_eq!(state.graph.newick_representation()?, before.newick, "{}", what);
    assert_eq!(state.branch_rates, before.state.branch_rates, "{}", what);
    state.graph.validate()?;
    Ok(())
}

#[test]
fn every_kernel_rolls_back_exactly() -> anyhow::Result<()> {
    for kernel in kernels() {
        let mut state = admixed_state()?;
        let mut model = PriorModel::new(PriorOptions::default(), &state);
        let before = image(&mut state)?;

        let mut tx = ProposalTransaction::new(kernel);
        let mut num_proposed = 0;
        for seed in 0..200 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let outcome = tx.propose(&mut state, &mut model, &mut rng)?;
            if !outcome.is_failed() {
                num_proposed += 1;
                assert_eq!(tx.state(), TransactionState::Proposed);
            }
            tx.rollback(&mut state, &mut model)?;
            assert_eq!(tx.state(), TransactionState::Idle);
            assert_same(&mut state, &before, tx.name())?;
        }
        assert!(num_proposed > 0, "{} never proposed", tx.name());
    }
    Ok(())
}

#[test]
fn structural_failure_leaves_graph_alone() -> anyhow::Result<()> {
    let names: Vec<String> = ["A", "B", "C"].iter().map(|x| x.to_string()).collect();
    let mut graph = AdmixtureGraph::with_names(names.clone());
    let a = graph.new_tip("A", 0.0);
    let b = graph.new_tip("B", 0.0);
    let c = graph.new_tip("C", 0.0);
    let ab = graph.new_divergence(a, b, 1.0)?;
    let root = graph.new_divergence(ab, c, 2.0)?;
    graph.set_root(root)?;
    let mut state = ChainState::new(graph, Residuals::zeros(3).with_names(names)?)?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let before = image(&mut state)?;

    // a split needs room for one more edge; with none allowed only the
    // merge half remains and there is nothing to merge
    let mut failing: Vec<Box<dyn ProposalKernel>> = kernels()
        .into_iter()
        .skip(1)
        .filter(|k| k.name() != "divergence-merge")
        .collect();
    failing.push(Box::new(DivergenceMerge::new(DivergenceMergeOptions {
        max_events: 0,
        ..Default::default()
    })));

    for kernel in failing {
        let mut tx = ProposalTransaction::new(kernel);
        let mut rng = SmallRng::seed_from_u64(7);
        let outcome = tx.propose(&mut state, &mut model, &mut rng)?;
        assert_eq!(
            outcome,
            ProposalOutcome::Failed(FailureReason::StructurallyImpossible)
        );
        assert_eq!(outcome.ln_hastings_ratio(), f64::NEG_INFINITY);
        assert_same(&mut state, &before, tx.name())?;

        // committing a failure is refused, rolling it back is a no-op
        assert!(tx.commit(&mut state, &mut model).is_err());
        tx.rollback(&mut state, &mut model)?;
        assert_same(&mut state, &before, tx.name())?;
    }
    Ok(())
}

#[test]
fn degenerate_failure_is_respliced_before_returning() -> anyhow::Result<()> {
    let mut state = admixed_state()?;
    // no positive residual: nothing to aim a replacement at
    state.residuals = Residuals::zeros(5);
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let before = image(&mut state)?;

    let mut tx = ProposalTransaction::new(Box::new(EdgeReplace::new(EdgeReplaceOptions::default())));
    let mut rng = SmallRng::seed_from_u64(11);
    let outcome = tx.propose(&mut state, &mut model, &mut rng)?;
    assert_eq!(outcome, ProposalOutcome::Failed(FailureReason::DegenerateBounds));
    assert_eq!(tx.state(), TransactionState::Failed);
    assert_same(&mut state, &before, "edge-replace")?;

    tx.rollback(&mut state, &mut model)?;
    assert_same(&mut state, &before, "edge-replace")?;
    Ok(())
}

#[test]
fn second_proposal_is_refused() -> anyhow::Result<()> {
    let mut state = admixed_state()?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let mut tx = ProposalTransaction::new(Box::new(EdgeRemove::new(EdgeRemoveOptions::default())));

    let mut draws = ScriptedDraws::new(0);
    tx.propose(&mut state, &mut model, &mut draws)?;
    let err = tx
        .propose(&mut state, &mut model, &mut draws)
        .expect_err("double proposal");
    assert!(matches!(
        err.downcast_ref::<TransactionError>(),
        Some(TransactionError::DoubleProposal(_))
    ));

    tx.rollback(&mut state, &mut model)?;
    let err = tx.rollback(&mut state, &mut model).expect_err("idle rollback");
    assert!(matches!(
        err.downcast_ref::<TransactionError>(),
        Some(TransactionError::NoPendingProposal(_))
    ));
    assert!(tx.commit(&mut state, &mut model).is_err());
    Ok(())
}

#[test]
fn shift_restores_branch_rates() -> anyhow::Result<()> {
    let mut state = admixed_state()?;
    let mut model = PriorModel::new(PriorOptions::default(), &state);
    let before = state.branch_rates.clone();

    let mut tx = ProposalTransaction::new(Box::new(EdgeShift::new(EdgeShiftOptions {
        rate_delta: 2.0,
        ..Default::default()
    })));

    let mut changed = false;
    for seed in 0..50 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let outcome = tx.propose(&mut state, &mut model, &mut rng)?;
        if !outcome.is_failed() {
            changed |= state.branch_rates != before;
        }
        tx.rollback(&mut state, &mut model)?;
        assert_eq!(state.branch_rates, before);
    }
    assert!(changed);
    Ok(())
}
