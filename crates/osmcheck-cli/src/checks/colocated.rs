use super::RunContext;
use crate::args::{parse_positive, parse_power_of_two, CommonArgs};
use anyhow::{Context, Result};
use clap::Args;
use log::info;
use osmcheck::driver::{
    COLOCATED_NODES, RELATIONS_REFERENCING_COLOCATED_NODES, WAYS_REFERENCING_COLOCATED_NODES,
};
use osmcheck::{
    BucketConfig, ColocatedConfig, ColocatedScan, Stats, DEFAULT_BUCKET_CAPACITY,
    DEFAULT_BUCKET_COUNT,
};
use std::path::PathBuf;

pub const ANALYZER: &str = "colocated-nodes";

const CATEGORIES: [&str; 3] = [
    COLOCATED_NODES,
    WAYS_REFERENCING_COLOCATED_NODES,
    RELATIONS_REFERENCING_COLOCATED_NODES,
];

#[derive(Args, Debug, Clone)]
pub struct ColocatedArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of bucket files (power of two)
    #[arg(long, value_name = "N", value_parser = parse_power_of_two, default_value_t = DEFAULT_BUCKET_COUNT)]
    pub buckets: usize,

    /// Locations buffered per bucket before it is written out
    #[arg(long, value_name = "N", value_parser = parse_positive, default_value_t = DEFAULT_BUCKET_CAPACITY)]
    pub bucket_capacity: usize,

    /// Directory for bucket files [default: OUTPUT_DIR]
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Leave bucket files of an interrupted run alone
    #[arg(long)]
    pub no_sweep: bool,
}

impl ColocatedArgs {
    fn config(&self, ctx: &RunContext<'_>) -> ColocatedConfig {
        let work_dir = self
            .work_dir
            .clone()
            .unwrap_or_else(|| ctx.output_dir.to_path_buf());

        ColocatedConfig {
            buckets: BucketConfig {
                count: self.buckets,
                capacity: self.bucket_capacity,
            },
            work_dir,
            sweep: !self.no_sweep,
            before: ctx.before,
            progress_every: ctx.progress_every,
        }
    }
}

pub fn run(ctx: &RunContext<'_>, args: &ColocatedArgs) -> Result<()> {
    let config = work_config(ctx, args)?;
    info!(
        "Using {} buckets of {} locations in '{}'",
        config.buckets.count,
        config.buckets.capacity,
        config.work_dir.display()
    );

    let mut sink = ctx.open_sink(ANALYZER, &CATEGORIES)?;
    let summary = ColocatedScan::new(ctx.source, config)
        .run(&mut sink)
        .context("colocated nodes check failed")?;

    let mut stats = Stats::new();
    summary.report(&mut stats);
    ctx.finish(ANALYZER, sink, &stats, summary.max_timestamp)
}

fn work_config(ctx: &RunContext<'_>, args: &ColocatedArgs) -> Result<ColocatedConfig> {
    let config = args.config(ctx);
    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("can't create work directory '{}'", config.work_dir.display()))?;
    Ok(config)
}
