use admix_graph::simulate::simulate_coalescent;
use admix_graph::{AdmixtureGraph, GraphError, NodeId};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// ((A:1,B:1):1,(C:1,D:1):1);
fn four_tips() -> anyhow::Result<(AdmixtureGraph, Vec<NodeId>)> {
    let mut graph = AdmixtureGraph::new();
    let a = graph.new_tip("A", 0.0);
    let b = graph.new_tip("B", 0.0);
    let c = graph.new_tip("C", 0.0);
    let d = graph.new_tip("D", 0.0);
    let ab = graph.new_divergence(a, b, 1.0)?;
    let cd = graph.new_divergence(c, d, 1.0)?;
    let r = graph.new_divergence(ab, cd, 2.0)?;
    graph.set_root(r)?;
    Ok((graph, vec![a, b, c, d, ab, cd, r]))
}

#[test]
fn newick_is_idempotent_and_local() -> anyhow::Result<()> {
    let (mut graph, ids) = four_tips()?;
    let first = graph.newick_representation()?;
    assert_eq!(first, "((A:1,B:1):1,(C:1,D:1):1);");
    assert_eq!(graph.newick_representation()?, first);
    assert!(!graph[ids[6]].newick_needs_refreshing());

    let cd_text = graph.compute_newick(ids[5])?;

    // aging AB touches AB, its children's branch lengths and the root only
    graph.set_age(ids[4], 1.5)?;
    assert!(graph[ids[4]].newick_needs_refreshing());
    assert!(graph[ids[0]].newick_needs_refreshing());
    assert!(graph[ids[6]].newick_needs_refreshing());
    assert!(!graph[ids[5]].newick_needs_refreshing());
    assert!(!graph[ids[2]].newick_needs_refreshing());

    let second = graph.newick_representation()?;
    assert_eq!(second, "((A:1.5,B:1.5):0.5,(C:1,D:1):1);");
    assert_eq!(graph.cached_newick(ids[5]), Some(cd_text.as_str()));
    Ok(())
}

#[test]
fn indices_are_dense_after_edits() -> anyhow::Result<()> {
    let (mut graph, ids) = four_tips()?;
    let donor = graph.new_splice_node();
    let recipient = graph.new_splice_node();
    graph.add_admixture_edge(donor, recipient, ids[4], ids[5], 1.5, 0.4, true)?;
    graph.reindex()?;

    let mut seen: Vec<usize> = graph.nodes().iter().map(|&x| graph[x].index()).collect();
    seen.sort();
    assert_eq!(seen, (1..=9).collect::<Vec<_>>());
    assert_eq!(graph.node_at(9), Some(ids[6]));
    assert!(graph.tips().iter().all(|&t| graph[t].is_tip()));
    assert_eq!(graph.first_admixture_parent_per_lineage(), vec![donor]);
    graph.validate()?;
    Ok(())
}

#[test]
fn remove_returns_to_original_newick() -> anyhow::Result<()> {
    let (mut graph, ids) = four_tips()?;
    let before = graph.newick_representation()?;
    let snapshot = graph.snapshot();

    let donor = graph.new_splice_node();
    let recipient = graph.new_splice_node();
    graph.add_admixture_edge(donor, recipient, ids[1], ids[2], 0.7, 0.1, true)?;
    graph.reindex()?;
    assert_eq!(graph.num_admixture_parents(), 1);
    assert_eq!(graph.num_admixture_children(), 1);
    assert_eq!(graph.newick_representation()?, before);

    let pos = graph.remove_admixture_edge(donor, true)?;
    graph.erase_node(pos.donor)?;
    graph.erase_node(pos.recipient)?;
    graph.reindex()?;

    assert_eq!(graph.newick_representation()?, before);
    assert_eq!(graph.snapshot(), snapshot);
    Ok(())
}

#[test]
fn edge_into_own_lineage_is_refused() -> anyhow::Result<()> {
    let (mut graph, ids) = four_tips()?;
    let donor = graph.new_splice_node();
    let recipient = graph.new_splice_node();
    let res = graph.add_admixture_edge(donor, recipient, ids[0], ids[4], 1.0, 0.2, true);
    assert!(matches!(res, Err(GraphError::Cycle(_))));
    graph.validate()?;
    Ok(())
}

#[test]
fn random_edges_keep_the_graph_acyclic() -> anyhow::Result<()> {
    let names: Vec<String> = (0..10).map(|i| format!("T{}", i)).collect();
    let mut rng = SmallRng::seed_from_u64(7);
    let mut graph = simulate_coalescent(&names, 1.0, &mut rng)?;

    for _ in 0..30 {
        let x = rng.random::<f64>() * graph.tree_length();
        let Some((site, age)) = graph.locate_on_tree_length(x) else {
            continue;
        };
        let candidates: Vec<NodeId> = graph
            .branches_crossing_age(age)?
            .into_iter()
            .filter(|&c| c != site)
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let other = candidates[rng.random_range(0..candidates.len())];
        let donor = graph.new_splice_node();
        let recipient = graph.new_splice_node();
        graph.add_admixture_edge(donor, recipient, site, other, age, 0.25, true)?;
        graph.reindex()?;
        assert!(graph.update_topological_sort());
        graph.validate()?;
    }
    assert!(graph.num_admixture_parents() > 0);

    while let Some(&donor) = graph.admixture_parents().first() {
        let pos = graph.remove_admixture_edge(donor, true)?;
        graph.erase_node(pos.donor)?;
        graph.erase_node(pos.recipient)?;
        graph.reindex()?;
        graph.validate()?;
    }
    assert_eq!(graph.num_nodes(), 19);
    Ok(())
}
