use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Sketch-based Jaccard/containment distances against a reference index", long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    #[clap(
        short,
        long,
        global = true,
        default_value_t = 0,
        help = "Number of threads to use (0 for all logical cores)"
    )]
    pub threads: usize,

    #[clap(short, long, global = true, action = clap::ArgAction::Count, help = "Verbosity level (e.g., -v, -vv)")]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute a distance matrix between query files and a reference index
    Dist(DistArgs),
    /// Print reference index metadata as JSON
    Inspect(InspectArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricArg {
    /// Containment corrected by the false-positive rate, converted to Jaccard
    Jaccard,
    /// Plain containment: shared sketch hashes / sketch size
    Containment,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardinalityArg {
    /// HyperLogLog estimate (bounded memory)
    Hll,
    /// Exact distinct k-mer count
    Exact,
}

#[derive(Parser, Debug)]
pub struct DistArgs {
    #[clap(
        short,
        long = "input",
        required = true,
        help = "Manifest listing one query sequence file per line ('#' starts a comment)"
    )]
    pub input_file: PathBuf,

    #[clap(
        short = 'x',
        long = "index",
        required = true,
        help = "Reference index artifact. Supports .gz, .xz, .zst compression."
    )]
    pub index_file: PathBuf,

    #[clap(
        short,
        long,
        required = true,
        help = "Output file for the distance matrix (TSV). Supports .gz, .xz, .zst compression based on extension."
    )]
    pub output_file: PathBuf,

    #[clap(short, long, default_value_t = 32, help = "The length of the k-mer; must match the index")]
    pub kmer_size: u8,

    #[clap(short, long, default_value_t = 10_000, help = "Number of minimum hashes kept per query file")]
    pub sketch_size: u32,

    #[clap(
        long,
        help = "False-positive rate of the index. Defaults to the rate reported by the index."
    )]
    pub fpr: Option<f64>,

    #[clap(
        long,
        default_value_t = 10 * (1 << 20),
        help = "Byte budget of filenames processed per chunk"
    )]
    pub chunk_size: usize,

    #[clap(long, value_enum, default_value_t = MetricArg::Jaccard, help = "Score written for each bin")]
    pub metric: MetricArg,

    #[clap(long, help = "Compare full k-mer sets instead of sketches")]
    pub exact: bool,

    #[clap(long, value_enum, default_value_t = CardinalityArg::Hll, help = "How query and reference set sizes are established")]
    pub cardinality: CardinalityArg,

    #[clap(long, default_value_t = 12, help = "HyperLogLog precision (4-16)")]
    pub hll_precision: u8,

    #[clap(long, help = "Clamp scores into [0, 1]")]
    pub clamp: bool,

    #[clap(long, help = "Give up on a query file after this many seconds (reported as NaN)")]
    pub file_timeout: Option<u64>,

    #[clap(long, help = "Write a timing breakdown to <output>.time")]
    pub write_time: bool,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    #[clap(
        short = 'x',
        long = "index",
        required = true,
        help = "Reference index artifact. Supports .gz, .xz, .zst compression."
    )]
    pub index_file: PathBuf,

    #[clap(short, long, help = "Optional: write the JSON summary here instead of stdout")]
    pub output_file: Option<PathBuf>,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
