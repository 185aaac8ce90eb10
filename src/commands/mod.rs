pub mod dist;
pub mod inspect;

use crate::cli::Commands;
use anyhow::Result;
use log::LevelFilter;

/// `-v` count to log level; `RUST_LOG` still overrides per module.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // A logger may already be installed when commands run inside tests
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}

pub fn dispatch_command(command: Commands, threads: usize, verbose: u8) -> Result<()> {
    init_logging(verbose);

    match command {
        Commands::Dist(args) => dist::run_dist(args, threads),
        Commands::Inspect(args) => inspect::run_inspect(args),
    }
}
