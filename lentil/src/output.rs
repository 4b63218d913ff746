use crate::graph::JointGraph;
use crate::metacell::PooledCounts;
use crate::propagate::LabelDistribution;
use crate::sample::SampleRegistry;

use log::info;
use matrix_util::common_io::write_lines;

/// `cell_a  cell_b  weight` for every undirected edge
pub fn write_edges(graph: &JointGraph, file: &str) -> anyhow::Result<()> {
    let names = graph.cell_names();
    let lines: Vec<Box<str>> = graph
        .edge_list()
        .into_iter()
        .map(|(i, j, w)| format!("{}\t{}\t{}", names[i], names[j], w).into())
        .collect();
    write_lines(&lines, file)?;
    info!("wrote {} edges to {}", lines.len(), file);
    Ok(())
}

/// `cell  sample  component  degree  out_weight` for every node
pub fn write_nodes(
    graph: &JointGraph,
    registry: &SampleRegistry,
    file: &str,
) -> anyhow::Result<()> {
    let components = graph.connected_components();
    let mut lines: Vec<Box<str>> = Vec::with_capacity(graph.num_nodes() + 1);
    lines.push("cell\tsample\tcomponent\tdegree\tout_weight".into());
    for (i, name) in graph.cell_names().iter().enumerate() {
        let sample = &registry.sample(graph.cell(i).sample).id;
        lines.push(
            format!(
                "{}\t{}\t{}\t{}\t{}",
                name,
                sample,
                components[i],
                graph.degree(i),
                graph.out_weight_total(i)
            )
            .into(),
        );
    }
    write_lines(&lines, file)?;
    info!("wrote {} nodes to {}", graph.num_nodes(), file);
    Ok(())
}

/// One row per cell: class probabilities, hard label and uncertainty
pub fn write_label_probs(
    graph: &JointGraph,
    dist: &LabelDistribution,
    file: &str,
) -> anyhow::Result<()> {
    let hard = dist.hard_labels();
    let uncertainty = dist.uncertainty();

    let mut header = String::from("cell");
    for c in &dist.classes {
        header.push('\t');
        header.push_str(c);
    }
    header.push_str("\tlabel\tuncertainty");

    let mut lines: Vec<Box<str>> = Vec::with_capacity(graph.num_nodes() + 1);
    lines.push(header.into());
    for (i, name) in graph.cell_names().iter().enumerate() {
        let probs: Vec<String> = dist.probs.row(i).iter().map(|p| p.to_string()).collect();
        lines.push(
            format!(
                "{}\t{}\t{}\t{}",
                name,
                probs.join("\t"),
                hard[i],
                uncertainty[i]
            )
            .into(),
        );
    }
    write_lines(&lines, file)?;
    info!(
        "wrote {} x {} label probabilities to {}",
        graph.num_nodes(),
        dist.classes.len(),
        file
    );
    Ok(())
}

/// Long format `cluster  sample  gene  count`, non-zero entries only
///
/// * `cluster_names` - name of each cluster index
pub fn write_pooled(
    pooled: &[PooledCounts],
    cluster_names: &[Box<str>],
    file: &str,
) -> anyhow::Result<()> {
    let mut lines: Vec<Box<str>> = vec!["cluster\tsample\tgene\tcount".into()];
    for pc in pooled {
        let cluster = cluster_names
            .get(pc.cluster)
            .map(|x| x.to_string())
            .unwrap_or_else(|| pc.cluster.to_string());
        for (s, sample) in pc.samples.iter().enumerate() {
            for (g, gene) in pc.genes.iter().enumerate() {
                let x = pc.counts[(s, g)];
                if x != 0.0 {
                    lines.push(format!("{}\t{}\t{}\t{}", cluster, sample, gene, x).into());
                }
            }
        }
    }
    write_lines(&lines, file)?;
    info!("wrote pooled counts of {} clusters to {}", pooled.len(), file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EdgeMerge, PropagationConfig};
    use crate::graph::assemble;
    use crate::propagate::propagate_labels;
    use crate::simulate::blank_sample;
    use matrix_util::common_io::read_lines;

    #[test]
    fn edge_and_label_tables() -> anyhow::Result<()> {
        let mut reg = SampleRegistry::new();
        reg.register(blank_sample("s", 3, "c")?)?;
        let graph = assemble(&reg, &[vec![(0, 1, 0.5), (1, 2, 0.25)]], &[], EdgeMerge::Max)?;

        let dir = tempfile::tempdir()?;
        let hdr = dir.path().join("out");
        let hdr = hdr.to_str().unwrap_or("out");

        let edges_file = format!("{}.edges.tsv.gz", hdr);
        write_edges(&graph, &edges_file)?;
        let lines = read_lines(&edges_file)?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_ref(), "c0\tc1\t0.5");

        let nodes_file = format!("{}.nodes.tsv.gz", hdr);
        write_nodes(&graph, &reg, &nodes_file)?;
        assert_eq!(read_lines(&nodes_file)?.len(), 4);

        let labels: Vec<(Box<str>, Box<str>)> =
            vec![("c0".into(), "a".into()), ("c2".into(), "b".into())];
        let dist = propagate_labels(&graph, &labels, &PropagationConfig::default())?;
        let prob_file = format!("{}.label_prob.tsv.gz", hdr);
        write_label_probs(&graph, &dist, &prob_file)?;
        let lines = read_lines(&prob_file)?;
        assert_eq!(lines[0].as_ref(), "cell\ta\tb\tlabel\tuncertainty");
        assert!(lines[1].starts_with("c0\t1\t0\ta\t0"));
        Ok(())
    }
}
