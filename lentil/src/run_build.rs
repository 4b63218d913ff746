use crate::run_common::*;

use clap::Args;
use lentil::output::{write_edges, write_nodes};
use log::{info, warn};

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    graph: GraphArgs,

    #[arg(
        short,
        long,
        required = true,
        help = "Output header",
        long_help = "Output header: writes `{out}.edges.tsv.gz` (cell_a, cell_b, weight)\n\
		     and `{out}.nodes.tsv.gz` (cell, sample, component, degree, out_weight)."
    )]
    out: Box<str>,

    #[arg(short, long, help = "Verbosity")]
    verbose: bool,
}

pub fn run_build(args: &BuildArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let (session, graph, report) = args.graph.build()?;

    for p in report.failed() {
        if let Err(reason) = &p.outcome {
            warn!("pair `{}` - `{}` left out: {}", p.sample_a, p.sample_b, reason);
        }
    }

    write_edges(&graph, &format!("{}.edges.tsv.gz", args.out))?;
    write_nodes(&graph, session.registry(), &format!("{}.nodes.tsv.gz", args.out))?;

    info!(
        "{} cells, {} edges, {} cells matched across samples",
        graph.num_nodes(),
        graph.num_edges(),
        report.matched_cells
    );
    Ok(())
}
