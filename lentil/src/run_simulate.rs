use crate::run_common::init_logger;

use clap::Args;
use lentil::simulate::{simulate_batches, write_simulated, SimArgs};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(
        short,
        long,
        required = true,
        help = "Output directory",
        long_help = "Output directory: writes `{dir}/sample{s}.mtx.gz` with\n\
		     `.genes.gz`, `.cells.gz` and `.types.gz` (cell, true type)."
    )]
    out: Box<str>,

    #[arg(long, default_value_t = 3, help = "Number of samples")]
    nsamples: usize,

    #[arg(long, default_value_t = 500, help = "Cells per sample")]
    ncells: usize,

    #[arg(long, default_value_t = 200, help = "Number of genes")]
    ngenes: usize,

    #[arg(long, default_value_t = 5, help = "Number of cell types")]
    ncelltypes: usize,

    #[arg(long, default_value_t = 2.0, help = "Largest per-sample expression offset")]
    batch_offset: f32,

    #[arg(long, default_value_t = 0.3, help = "Noise standard deviation")]
    noise: f32,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    rseed: u64,

    #[arg(short, long, help = "Verbosity")]
    verbose: bool,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let sim = SimArgs {
        ncells: args.ncells,
        ngenes: args.ngenes,
        ncelltypes: args.ncelltypes,
        batch_offset: args.batch_offset,
        noise: args.noise,
        rseed: args.rseed,
    };

    let samples = simulate_batches(&sim, args.nsamples)?;
    std::fs::create_dir_all(&*args.out)?;
    write_simulated(&samples, &args.out)?;
    Ok(())
}
