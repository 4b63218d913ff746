use crate::run_common::*;

use clap::Args;
use lentil::collaborators::{detect_communities, ComponentPartition};
use lentil::input::read_cell_levels;
use lentil::metacell::{pool_by_cluster, sample_clusterings};
use lentil::output::write_pooled;
use log::info;

#[derive(Args, Debug)]
pub struct PoolArgs {
    #[command(flatten)]
    graph: GraphArgs,

    #[arg(
        short,
        long,
        help = "Cluster file (cell, cluster)",
        long_help = "Two-column file giving a cluster to every cell.\n\
		     Without it, the samples' own `{hdr}.clusters.gz` are used when\n\
		     every sample has one, and otherwise the connected components\n\
		     of the joint graph."
    )]
    clusters: Option<Box<str>>,

    #[arg(
        short,
        long,
        required = true,
        help = "Output header",
        long_help = "Output header: writes `{out}.pooled.tsv.gz`\n\
		     (cluster, sample, gene, count)."
    )]
    out: Box<str>,

    #[arg(short, long, help = "Verbosity")]
    verbose: bool,
}

pub fn run_pool(args: &PoolArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    args.graph.init_threads()?;
    let session = args.graph.read_session()?;

    let (membership, names): (Vec<usize>, Vec<Box<str>>) = match &args.clusters {
        Some(file) => read_cell_levels(file, session.registry())?,
        None => match sample_clusterings(session.registry()) {
            Some((codes, names)) => {
                info!("pooling by the samples' own {} clusters", names.len());
                (codes, names)
            }
            None => {
                let (graph, _) = args.graph.build_on(&session)?;
                let partition = detect_communities(&ComponentPartition, &graph)?;
                let names = (0..partition.num_clusters())
                    .map(|k| format!("component{}", k).into())
                    .collect();
                (partition.labels().to_vec(), names)
            }
        },
    };

    let pooled = pool_by_cluster(session.registry(), &membership)?;
    write_pooled(&pooled, &names, &format!("{}.pooled.tsv.gz", args.out))?;
    Ok(())
}
