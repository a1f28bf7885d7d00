//! Each kernel applied forward and then, with scripted draws, back again:
//! the state must come back and the two log Hastings ratios must cancel.

use admix_graph::{AdmixtureGraph, NodeId};
use admix_mcmc::kernels::*;
use admix_mcmc::model::ChainState;
use admix_mcmc::random::ScriptedDraws;
use admix_mcmc::residuals::Residuals;
use approx::assert_abs_diff_eq;
use nalgebra::DMatrix;

const BEFORE: &str = "((A:2,B:2):2,(C:3,D:3):1);";

fn names() -> Vec<String> {
    ["A", "B", "C", "D"].iter().map(|x| x.to_string()).collect()
}

/// ((A:2,B:2):2,(C:3,D:3):1) with one edge A -> C at 1.5, weight 0.3;
/// every off-diagonal residual is `residual`
fn one_edge_state(residual: f64) -> anyhow::Result<ChainState> {
    let mut graph = AdmixtureGraph::with_names(names());
    let a = graph.new_tip("A", 0.0);
    let b = graph.new_tip("B", 0.0);
    let c = graph.new_tip("C", 0.0);
    let d = graph.new_tip("D", 0.0);
    let ab = graph.new_divergence(a, b, 2.0)?;
    let cd = graph.new_divergence(c, d, 3.0)?;
    let root = graph.new_divergence(ab, cd, 4.0)?;
    graph.set_root(root)?;

    let (x, y) = (graph.new_splice_node(), graph.new_splice_node());
    graph.add_admixture_edge(x, y, a, c, 1.5, 0.3, true)?;
    graph.reindex()?;
    graph.validate()?;

    let mut r = DMatrix::from_element(4, 4, residual);
    r.fill_diagonal(0.0);
    let residuals = Residuals::from_matrix(r)?.with_names(names())?;
    ChainState::new(graph, residuals)
}

fn proposed(result: MoveResult) -> f64 {
    match result {
        MoveResult::Proposed(x) => x,
        MoveResult::Failed(reason) => panic!("move failed: {:?}", reason),
    }
}

/// The single edge as `donor tips -> recipient tips\ta=..\tw=..`
fn only_edge(graph: &AdmixtureGraph) -> anyhow::Result<String> {
    assert_eq!(graph.num_admixture_parents(), 1);
    let donor = graph.admixture_parents()[0];
    let recipient = graph
        .try_node(donor)?
        .admixture_child()
        .ok_or_else(|| anyhow::anyhow!("unpaired donor"))?;
    Ok(graph.admixture_edge_str(donor, recipient)?)
}

fn step(
    kernel: &mut dyn ProposalKernel,
    state: &mut ChainState,
    draws: &mut ScriptedDraws,
) -> anyhow::Result<f64> {
    let ln_ratio = proposed(kernel.perform(state, draws)?);
    kernel.finalize(state)?;
    state.graph.validate()?;
    Ok(ln_ratio)
}

#[test]
fn divergence_swap_is_its_own_reverse() -> anyhow::Result<()> {
    let mut state = one_edge_state(0.0)?;
    let before = state.graph.snapshot();
    let mut kernel = DivergenceSwap::new(DivergenceSwapOptions::default());

    // AB is regrafted onto C's branch; the edge now enters B
    let mut draws = ScriptedDraws::new(1).with_uniforms(&[0.0]);
    let forward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(state.graph.newick_representation()?, "(B:4,((A:2,C:2):1,D:3):1);");
    assert_eq!(only_edge(&state.graph)?, "A -> B\ta=1.5\tw=0.3");

    let mut draws = ScriptedDraws::new(2).with_uniforms(&[0.0]);
    let backward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(state.graph.newick_representation()?, BEFORE);
    assert_eq!(only_edge(&state.graph)?, "A -> C\ta=1.5\tw=0.3");
    assert_eq!(state.graph.snapshot(), before);

    assert_eq!(forward, 0.0);
    assert_eq!(backward, 0.0);
    Ok(())
}

#[test]
fn edge_shift_cancels_with_its_reverse() -> anyhow::Result<()> {
    let mut state = one_edge_state(0.0)?;
    let before = state.graph.snapshot();
    let rates: Vec<(NodeId, f64)> = state.branch_rates.iter().collect();
    let mut kernel = EdgeShift::new(EdgeShiftOptions::default());

    // keep the donor on A, move the recipient from C to B (first of B, C, D),
    // then scale the three touched rates up
    let mut draws = ScriptedDraws::new(1)
        .with_uniforms(&[0.0, 0.9, 0.0, 0.7, 0.7, 0.7])
        .with_betas(&[0.5]);
    let forward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_eq!(only_edge(&state.graph)?, "A -> B\ta=1.5\tw=0.25");

    // back to C (second of B, C, D) with the rates scaled down again
    let mut draws = ScriptedDraws::new(2)
        .with_uniforms(&[0.0, 0.9, 0.5, 0.3, 0.3, 0.3])
        .with_betas(&[0.6]);
    let backward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_eq!(only_edge(&state.graph)?, "A -> C\ta=1.5\tw=0.3");
    assert_eq!(state.graph.snapshot(), before);

    for ((k0, r0), (k1, r1)) in rates.into_iter().zip(state.branch_rates.iter()) {
        assert_eq!(k0, k1);
        assert_abs_diff_eq!(r0, r1, epsilon = 1e-12);
    }
    assert!(forward.abs() > 1e-3);
    assert_abs_diff_eq!(forward + backward, 0.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn age_slide_cancels_with_its_reverse() -> anyhow::Result<()> {
    let mut state = one_edge_state(0.0)?;
    let before = state.graph.snapshot();
    let mut kernel = AgeSlide::new(AgeSlideOptions::default());

    // window for A, C is [0, 3]: slide from 1.5 down to 0.75
    let mut draws = ScriptedDraws::new(1)
        .with_uniforms(&[0.0, 0.0, 0.0])
        .with_betas(&[0.25, 0.5]);
    let forward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(only_edge(&state.graph)?, "A -> C\ta=0.75\tw=0.25");

    let mut draws = ScriptedDraws::new(2)
        .with_uniforms(&[0.0, 0.0, 0.0])
        .with_betas(&[0.5, 0.6]);
    let backward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_eq!(state.graph.snapshot(), before);

    assert!(forward.abs() > 1e-3);
    assert_abs_diff_eq!(forward + backward, 0.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn edge_replace_cancels_with_its_reverse() -> anyhow::Result<()> {
    // flat residuals: every ordered pair is equally likely
    let mut state = one_edge_state(1.0)?;
    let before = state.graph.snapshot();
    let mut kernel = EdgeReplace::new(EdgeReplaceOptions::default());

    // pair (A, D), age 0.25 of the way up [0, 3], weight 0.25, kept orientation
    let mut draws = ScriptedDraws::new(1)
        .with_uniforms(&[0.0, 0.1, 0.9, 0.9])
        .with_betas(&[0.25, 0.5]);
    let forward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_eq!(only_edge(&state.graph)?, "A -> D\ta=0.75\tw=0.25");

    // pair (A, C) halfway up [0, 3] with the old weight
    let mut draws = ScriptedDraws::new(2)
        .with_uniforms(&[0.0, 0.1, 0.5, 0.9])
        .with_betas(&[0.5, 0.6]);
    let backward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_eq!(state.graph.snapshot(), before);

    assert!(forward.is_finite());
    assert_abs_diff_eq!(forward + backward, 0.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn divergence_merge_and_split_cancel() -> anyhow::Result<()> {
    let mut state = one_edge_state(0.0)?;
    let mut kernel = DivergenceMerge::new(DivergenceMergeOptions::default());

    // merge: CD moves onto A's branch at 0.5, the edge disappears
    let mut draws = ScriptedDraws::new(1).with_uniforms(&[0.25, 0.0, 0.25]);
    let forward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_eq!(state.graph.num_admixture_parents(), 0);
    assert_eq!(
        state.graph.newick_representation()?,
        "(((C:0.5,A:0.5):1.5,B:2):2,D:4);"
    );

    // split: CD with C goes back above D at 3, leaving A -> C at 1.5
    let graph = &state.graph;
    let root = graph.root()?;
    let c = graph.tip_by_name("C").ok_or_else(|| anyhow::anyhow!("no C"))?;
    let cd = graph
        .try_node(c)?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("C is the root"))?;
    let divergences: Vec<NodeId> = graph
        .nodes()
        .iter()
        .copied()
        .filter(|&id| id != root && graph.get(id).is_some_and(|x| x.is_divergence()))
        .collect();
    let which = divergences.iter().position(|&x| x == cd).unwrap_or(0);
    let child = graph.try_node(cd)?.children().iter().position(|&x| x == c).unwrap_or(0);

    let mut draws = ScriptedDraws::new(2)
        .with_uniforms(&[
            0.75,
            (which as f64 + 0.5) / divergences.len() as f64,
            (child as f64 + 0.5) / 2.0,
            0.75,
            0.0,
            0.75,
        ])
        .with_betas(&[0.6]);
    let backward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(draws.pending(), 0);
    assert_eq!(state.graph.newick_representation()?, BEFORE);
    assert_eq!(only_edge(&state.graph)?, "A -> C\ta=1.5\tw=0.3");

    assert!(forward.is_finite());
    assert_abs_diff_eq!(forward + backward, 0.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn clade_edge_add_and_remove_cancel() -> anyhow::Result<()> {
    let mut state = one_edge_state(0.0)?;
    // start from the bare tree, with residual fit left only between A and C
    let donor = state.graph.admixture_parents()[0];
    let pos = state.graph.remove_admixture_edge(donor, true)?;
    state.graph.erase_node(pos.donor)?;
    state.graph.erase_node(pos.recipient)?;
    state.graph.reindex()?;
    state.residuals = Residuals::zeros(4).with_names(names())?;
    state.residuals.set(0, 2, 1.0);
    let before = state.graph.snapshot();

    let mut kernel = CladeResidualEdge::new(CladeResidualEdgeOptions::default());
    let mut draws = ScriptedDraws::new(3).with_uniforms(&[0.25]);
    let forward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(state.graph.num_admixture_parents(), 1);

    let mut draws = ScriptedDraws::new(4).with_uniforms(&[0.75, 0.0]);
    let backward = step(&mut kernel, &mut state, &mut draws)?;
    assert_eq!(state.graph.num_admixture_parents(), 0);
    assert_eq!(state.graph.newick_representation()?, BEFORE);
    assert_eq!(state.graph.snapshot(), before);

    assert!(forward.is_finite());
    assert_abs_diff_eq!(forward + backward, 0.0, epsilon = 1e-9);
    Ok(())
}
