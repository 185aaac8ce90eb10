use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::io::{self, Write};

use crate::{
    cli::InspectArgs,
    index::{ReferenceIndex, load_index},
    utils::get_output_writer,
};

#[derive(Serialize, Debug)]
struct BinSummary {
    name: String,
    files: Vec<String>,
    cardinality: Option<u64>,
    filter: &'static str,
    false_positive_rate: f64,
}

#[derive(Serialize, Debug)]
struct IndexSummary {
    index_path: String,
    kmer_size: u8,
    seed: u64,
    false_positive_rate: f64,
    num_bins: usize,
    bins: Vec<BinSummary>,
}

pub fn run_inspect(args: InspectArgs) -> Result<()> {
    info!("Starting inspect command with args: {:?}", args);

    let index = load_index(&args.index_file)?;
    let bins = index
        .bins()
        .iter()
        .zip(index.filters())
        .map(|(meta, filter)| BinSummary {
            name: meta.name.clone(),
            files: meta.files.clone(),
            cardinality: meta.cardinality,
            filter: filter.kind(),
            false_positive_rate: filter.false_positive_rate(),
        })
        .collect();
    let summary = IndexSummary {
        index_path: args.index_file.to_string_lossy().into_owned(),
        kmer_size: index.kmer_size(),
        seed: index.seed(),
        false_positive_rate: index.false_positive_rate(),
        num_bins: index.bins().len(),
        bins,
    };

    let mut writer: Box<dyn Write + Send> = match &args.output_file {
        Some(path) => get_output_writer(path)?,
        None => Box::new(io::stdout()),
    };
    serde_json::to_writer_pretty(&mut writer, &summary)
        .context("Failed to write index summary as JSON")?;
    writeln!(writer)?;
    writer.flush().context("Failed to flush index summary")?;
    Ok(())
}
