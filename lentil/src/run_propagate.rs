use crate::run_common::*;

use clap::Args;
use lentil::config::PropagationConfig;
use lentil::input::read_labels;
use lentil::output::{write_edges, write_label_probs};
use lentil::propagate_labels;
use log::info;

#[derive(Args, Debug)]
pub struct PropagateArgs {
    #[command(flatten)]
    graph: GraphArgs,

    #[arg(
        short,
        long,
        required = true,
        help = "Seed label file (cell, label)",
        long_help = "Two-column file of known labels. Cells missing from the\n\
		     samples are an error; the remaining cells get a probability\n\
		     for every label by diffusion over the joint graph."
    )]
    labels: Box<str>,

    #[arg(long, help = "Let seed cells change their distribution too")]
    free_seeds: bool,

    #[arg(long, default_value_t = 50, help = "Maximum number of iterations")]
    max_iter: usize,

    #[arg(long, default_value_t = 1e-4, help = "Convergence tolerance")]
    tol: f32,

    #[arg(
        short,
        long,
        required = true,
        help = "Output header",
        long_help = "Output header: writes `{out}.label_prob.tsv.gz` and\n\
		     `{out}.edges.tsv.gz`."
    )]
    out: Box<str>,

    #[arg(short, long, help = "Verbosity")]
    verbose: bool,
}

pub fn run_propagate(args: &PropagateArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let (_, graph, _) = args.graph.build()?;
    let labels = read_labels(&args.labels)?;

    let config = PropagationConfig {
        fixed_initial_labels: !args.free_seeds,
        max_iterations: args.max_iter,
        tolerance: args.tol,
    };

    let dist = propagate_labels(&graph, &labels, &config)?;
    info!(
        "{} after {} iterations",
        if dist.converged { "converged" } else { "stopped" },
        dist.iterations
    );

    write_label_probs(&graph, &dist, &format!("{}.label_prob.tsv.gz", args.out))?;
    write_edges(&graph, &format!("{}.edges.tsv.gz", args.out))?;
    Ok(())
}
