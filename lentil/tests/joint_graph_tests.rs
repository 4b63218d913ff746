use lentil::config::{
    ComparisonSpace, EdgeMerge, JointConfig, MatchingMethod, PropagationConfig,
};
use lentil::graph::assemble;
use lentil::SampleRegistry;
use lentil::simulate::{batch_offset_pair, blank_sample, SimArgs};
use lentil::{propagate_labels, CancelToken, JointSession};
use std::collections::HashSet;
use std::sync::Arc;

fn offset_session(
    ncells: usize,
    ncelltypes: usize,
) -> anyhow::Result<(JointSession, Vec<Box<str>>)> {
    let args = SimArgs {
        ncells,
        ngenes: 40,
        ncelltypes,
        ..Default::default()
    };
    let (a, b) = batch_offset_pair(&args)?;
    let types = a.cell_types.clone();
    let mut session = JointSession::new();
    session.register(a.sample)?;
    session.register(b.sample)?;
    Ok((session, types))
}

fn pca_config() -> JointConfig {
    JointConfig {
        space: ComparisonSpace::Pca,
        k: 10,
        k_self: 10,
        ncomps: 10,
        matching: MatchingMethod::Mnn,
        ..Default::default()
    }
}

#[test]
fn shifted_batches_are_joined() -> anyhow::Result<()> {
    let (session, _) = offset_session(100, 1)?;
    let (graph, report) = session.build_graph(&pca_config(), None, &CancelToken::new())?;

    assert_eq!(graph.num_nodes(), 200);
    assert_eq!(report.num_succeeded(), 1);
    assert!(report.matched_cells >= 180);
    assert_eq!(report.num_components, 1);
    Ok(())
}

#[test]
fn every_space_joins_shifted_batches() -> anyhow::Result<()> {
    let (session, types) = offset_session(100, 3)?;
    let local = |name: &str| -> anyhow::Result<usize> {
        let j = name
            .rsplit('_')
            .next()
            .ok_or_else(|| anyhow::anyhow!("bad cell name {}", name))?;
        Ok(j.parse()?)
    };

    for space in [
        ComparisonSpace::Pca,
        ComparisonSpace::Cpca,
        ComparisonSpace::Cca,
    ] {
        let cfg = JointConfig {
            space,
            ..pca_config()
        };
        let (graph, report) = session.build_graph(&cfg, None, &CancelToken::new())?;
        assert_eq!(report.num_succeeded(), 1, "{}", space);
        assert!(
            report.matched_cells >= 180,
            "{}: {} cells matched",
            space,
            report.matched_cells
        );

        let names = graph.cell_names();
        let samples = graph.node_samples();
        for (i, j, _) in graph.edge_list() {
            if samples[i] != samples[j] {
                let (a, b) = (local(&names[i])?, local(&names[j])?);
                assert_eq!(types[a], types[b], "{}: {} - {}", space, names[i], names[j]);
            }
        }
    }
    Ok(())
}

#[test]
fn cell_types_stay_apart_across_batches() -> anyhow::Result<()> {
    let (session, _) = offset_session(90, 3)?;
    let (graph, _) = session.build_graph(&pca_config(), None, &CancelToken::new())?;

    // every component mixes both batches
    let components = graph.connected_components();
    let samples = graph.node_samples();
    for c in 0..graph.num_components() {
        let seen: HashSet<usize> = (0..graph.num_nodes())
            .filter(|&i| components[i] == c)
            .map(|i| samples[i])
            .collect();
        assert_eq!(seen.len(), 2, "component {} has one batch only", c);
    }
    Ok(())
}

#[test]
fn alignments_are_computed_once() -> anyhow::Result<()> {
    let (session, _) = offset_session(30, 3)?;
    let cfg = pca_config();
    let params = cfg.align_params();
    let cancel = CancelToken::new();

    let first = session.align_pair(0, 1, cfg.space, &params, &cancel)?;
    let second = session.align_pair(0, 1, cfg.space, &params, &cancel)?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(session.cache().computations(), 1);

    let other = session.align_pair(0, 1, ComparisonSpace::Genes, &params, &cancel)?;
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(session.cache().computations(), 2);
    Ok(())
}

#[test]
fn labels_carry_over_to_the_other_batch() -> anyhow::Result<()> {
    let (session, types) = offset_session(60, 3)?;
    let (graph, _) = session.build_graph(&pca_config(), None, &CancelToken::new())?;

    let labels: Vec<(Box<str>, Box<str>)> = types
        .iter()
        .enumerate()
        .map(|(j, t)| (format!("b1_{}", j).into(), t.clone()))
        .collect();

    let dist = propagate_labels(&graph, &labels, &PropagationConfig::default())?;
    let hard = dist.hard_labels();

    let mut correct = 0;
    for (j, t) in types.iter().enumerate() {
        let i = graph
            .node_index(&format!("b2_{}", j))
            .ok_or_else(|| anyhow::anyhow!("missing cell"))?;
        if hard[i] == t.as_ref() {
            correct += 1;
        }
        let total: f32 = dist.probs.row(i).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }
    assert!(correct >= 54, "{} of 60 labels carried over", correct);
    Ok(())
}

/// Three clusters of ten nodes joined by weak bridges; each cluster has
/// a labelled hub tied to all of its members
#[test]
fn three_clusters_converge() -> anyhow::Result<()> {
    let mut reg = SampleRegistry::new();
    reg.register(blank_sample("toy", 30, "n")?)?;

    let mut edges = vec![];
    for c in 0..3 {
        let hub = 10 * c;
        for m in 1..10 {
            edges.push((hub, hub + m, 1.0));
            let next = if m == 9 { 1 } else { m + 1 };
            edges.push((hub + m, hub + next, 0.1));
        }
    }
    edges.push((5, 15, 0.1));
    edges.push((15, 25, 0.1));
    let graph = assemble(&reg, &[edges], &[], EdgeMerge::Max)?;
    assert_eq!(graph.num_components(), 1);

    let labels: Vec<(Box<str>, Box<str>)> = vec![
        ("n0".into(), "T cells".into()),
        ("n10".into(), "B cells".into()),
        ("n20".into(), "T cells".into()),
    ];
    let cfg = PropagationConfig {
        fixed_initial_labels: true,
        max_iterations: 50,
        tolerance: 1e-4,
    };
    let dist = propagate_labels(&graph, &labels, &cfg)?;
    assert!(dist.converged);
    assert!(dist.iterations <= 50);

    for i in 0..graph.num_nodes() {
        let row = dist.probs.row(i);
        assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!((row.sum() - 1.0).abs() < 1e-4);
    }

    let hard = dist.hard_labels();
    for m in 0..10 {
        assert_eq!(hard[m], "T cells");
        assert_eq!(hard[10 + m], "B cells");
        assert_eq!(hard[20 + m], "T cells");
    }
    Ok(())
}

#[test]
fn unalignable_sample_keeps_its_cells() -> anyhow::Result<()> {
    let (mut session, _) = offset_session(40, 3)?;
    session.register(blank_sample("lonely", 20, "x")?)?;

    let (graph, report) = session.build_graph(&pca_config(), None, &CancelToken::new())?;
    assert_eq!(graph.num_nodes(), 100);
    assert_eq!(report.pairs.len(), 3);
    assert_eq!(report.num_succeeded(), 1);
    assert_eq!(report.failed().count(), 2);

    let lonely = graph.node_index("x0").ok_or_else(|| anyhow::anyhow!("missing x0"))?;
    let samples = graph.node_samples();
    assert!(graph
        .neighbors(lonely)
        .iter()
        .all(|&j| samples[j] == samples[lonely]));
    Ok(())
}

#[test]
fn registration_order_does_not_change_edges() -> anyhow::Result<()> {
    let args = SimArgs {
        ncells: 40,
        ngenes: 30,
        ..Default::default()
    };
    let (a, b) = batch_offset_pair(&args)?;
    let (a2, b2) = batch_offset_pair(&args)?;

    let mut forward = JointSession::new();
    forward.register(a.sample)?;
    forward.register(b.sample)?;
    let mut backward = JointSession::new();
    backward.register(b2.sample)?;
    backward.register(a2.sample)?;

    let cfg = JointConfig {
        space: ComparisonSpace::Genes,
        ..pca_config()
    };
    let cancel = CancelToken::new();
    let (g1, _) = forward.build_graph(&cfg, None, &cancel)?;
    let (g2, _) = backward.build_graph(&cfg, None, &cancel)?;

    let named = |g: &lentil::JointGraph| {
        let names = g.cell_names();
        let mut edges: Vec<(Box<str>, Box<str>)> = g
            .edge_list()
            .into_iter()
            .map(|(i, j, _)| {
                let (x, y) = (names[i].clone(), names[j].clone());
                if x < y {
                    (x, y)
                } else {
                    (y, x)
                }
            })
            .collect();
        edges.sort();
        edges
    };
    assert_eq!(named(&g1), named(&g2));
    Ok(())
}
