mod run_build;
mod run_common;
mod run_pool;
mod run_propagate;
mod run_simulate;

use run_build::*;
use run_pool::*;
use run_propagate::*;
use run_simulate::*;

use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Joint neighbour graphs across single-cell samples\n\
		  Samples are aligned pairwise, matched by mutual nearest neighbours,\n\
		  and merged with their own kNN graphs into one weighted graph."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Build a joint graph",
        long_about = "Build the joint graph in three stages: \n\
		      (1) Align every pair of samples in a comparison space\n\
		      (2) Match cells across each pair by mutual nearest neighbours\n\
		      (3) Merge the matches with each sample's own kNN edges.\n"
    )]
    Build(BuildArgs),

    #[command(
        about = "Propagate known labels over a joint graph",
        long_about = "Build the joint graph, then diffuse the seed labels over it.\n\
		      Every cell gets a probability for each label, a hard label\n\
		      and an uncertainty (1 - max probability).\n"
    )]
    Propagate(PropagateArgs),

    #[command(
        about = "Pool counts per cluster and sample",
        long_about = "Sum the counts of the cells of each cluster within each sample,\n\
		      for downstream differential expression.\n"
    )]
    Pool(PoolArgs),

    /// simulate samples with batch offsets
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Build(args) => {
            run_build(args)?;
        }
        Commands::Propagate(args) => {
            run_propagate(args)?;
        }
        Commands::Pool(args) => {
            run_pool(args)?;
        }
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
    }

    info!("Done");
    Ok(())
}
