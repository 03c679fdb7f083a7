use clap::Parser;

use pixel_overlay::cli::{self, CliArgs};
use pixel_overlay::{log_info, logger};

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.verbose);
    log_info!("pixel-overlay {} starting", env!("CARGO_PKG_VERSION"));

    cli::run(args)
}
