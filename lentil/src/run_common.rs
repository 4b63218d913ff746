use lentil::config::*;
use lentil::input::{read_cell_levels, read_sample, SampleFiles};
use lentil::{BuildReport, CancelToken, JointGraph, JointSession};

use clap::Args;
use log::info;
use rayon::ThreadPoolBuilder;

/// Samples and joint graph settings shared by the subcommands
///
/// Settings left out on the command line come from `--config`, then
/// from the defaults.
#[derive(Args, Debug)]
pub struct GraphArgs {
    #[arg(
        required = true,
        help = "Sample file headers",
        long_help = "Sample file headers. Each `{hdr}` needs `{hdr}.mtx.gz` (genes x cells),\n\
		     `{hdr}.genes.gz` and `{hdr}.cells.gz`; `{hdr}.embedding.gz`,\n\
		     `{hdr}.odgenes.gz` and `{hdr}.clusters.gz` are used if present."
    )]
    samples: Vec<Box<str>>,

    #[arg(long, help = "JSON file of joint graph settings")]
    config: Option<Box<str>>,

    #[arg(
        long,
        value_enum,
        help = "Comparison space [default: cpca]",
        long_help = "How each pair of samples is embedded before matching:\n\
		     pca, cpca (common principal components), cca, or genes."
    )]
    space: Option<ComparisonSpace>,

    #[arg(short, long, help = "Cross-sample neighbours [default: 15]")]
    k: Option<usize>,

    #[arg(long, help = "Within-sample neighbours [default: 10]")]
    k_self: Option<usize>,

    #[arg(long, help = "Within-sample edge weight multiplier [default: 0.1]")]
    k_self_weight: Option<f32>,

    #[arg(long, help = "Number of components [default: 30]")]
    ncomps: Option<usize>,

    #[arg(long, help = "Over-dispersed genes per sample [default: 2000]")]
    n_odgenes: Option<usize>,

    #[arg(long, value_enum, help = "Matching method [default: mnn]")]
    matching: Option<MatchingMethod>,

    #[arg(long, value_enum, help = "Distance metric [default: angular]")]
    metric: Option<Metric>,

    #[arg(
        long,
        help = "Alignment strength in [0, 1] [default: 0]",
        long_help = "Pull each cell's edge weight shares across the levels of the\n\
		     balance factor towards uniform: 0 leaves weights alone,\n\
		     1 gives every level present around a cell an equal share."
    )]
    alignment_strength: Option<f32>,

    #[arg(
        long,
        help = "Balance factor file (cell, level)",
        long_help = "Two-column file giving a level to every cell, used by the\n\
		     alignment strength. Defaults to the sample of each cell."
    )]
    balance_file: Option<Box<str>>,

    #[arg(long, value_enum, help = "Merge of duplicate edges [default: max]")]
    edge_merge: Option<EdgeMerge>,

    #[arg(long, help = "Exact neighbour search below this many cells [default: 5000]")]
    approx_threshold: Option<usize>,

    #[arg(long, help = "Random seed [default: 42]")]
    seed: Option<u64>,

    #[arg(long, help = "Time limit per sample pair in seconds")]
    pair_timeout: Option<f64>,

    #[arg(
        long,
        default_value_t = num_cpus::get(),
        help = "Maximum number of threads",
        long_help = "Maximum number of threads to use for parallel processing. \n\
		     Choose the right number in HPC environments."
    )]
    max_threads: usize,
}

impl GraphArgs {
    pub fn joint_config(&self) -> anyhow::Result<JointConfig> {
        let mut cfg = match &self.config {
            Some(file) => JointConfig::from_json_file(file)?,
            None => JointConfig::default(),
        };

        macro_rules! take {
            ($($field:ident),*) => {
                $( if let Some(x) = self.$field { cfg.$field = x; } )*
            };
        }
        take!(
            space,
            k,
            k_self,
            k_self_weight,
            ncomps,
            n_odgenes,
            matching,
            metric,
            alignment_strength,
            edge_merge,
            approx_threshold,
            seed
        );
        if self.pair_timeout.is_some() {
            cfg.pair_timeout_secs = self.pair_timeout;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn init_threads(&self) -> anyhow::Result<()> {
        let max_threads = num_cpus::get().min(self.max_threads.max(1));
        ThreadPoolBuilder::new()
            .num_threads(max_threads)
            .build_global()?;
        info!("will use {} threads", rayon::current_num_threads());
        Ok(())
    }

    pub fn read_session(&self) -> anyhow::Result<JointSession> {
        let mut session = JointSession::new();
        for hdr in &self.samples {
            let sample = read_sample(&SampleFiles::from_header(hdr))?;
            session.register(sample)?;
        }
        Ok(session)
    }

    /// Read the samples and build the joint graph
    pub fn build(&self) -> anyhow::Result<(JointSession, JointGraph, BuildReport)> {
        self.joint_config()?;
        self.init_threads()?;
        let session = self.read_session()?;
        let (graph, report) = self.build_on(&session)?;
        Ok((session, graph, report))
    }

    /// Build the joint graph of already loaded samples
    pub fn build_on(&self, session: &JointSession) -> anyhow::Result<(JointGraph, BuildReport)> {
        let cfg = self.joint_config()?;

        let factor = match &self.balance_file {
            Some(file) => {
                let (codes, levels) = read_cell_levels(file, session.registry())?;
                info!("balance factor with {} levels", levels.len());
                Some(codes)
            }
            None => None,
        };

        let (graph, report) =
            session.build_graph(&cfg, factor.as_deref(), &CancelToken::new())?;
        Ok((graph, report))
    }
}

pub fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
