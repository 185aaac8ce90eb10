use anyhow::Result;
use log::info;

use crate::{cli::DistArgs, config::RunConfig, index::load_index, pipeline::run_distances};

pub fn run_dist(args: DistArgs, threads: usize) -> Result<()> {
    info!("Starting dist command with args: {:?}", args);

    let config = RunConfig::from_args(&args, threads)?;
    let index_path = config.index.clone();
    let summary = run_distances(&config, move || load_index(&index_path))?;

    info!(
        "Wrote distances for {} files to {:?} ({} NaN rows)",
        summary.files, config.output, summary.degraded
    );
    Ok(())
}
