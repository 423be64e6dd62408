mod app;
mod args;
mod logging;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use crate::args::Cli;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.quiet);
    if let Err(err) = try_run(cli) {
        error!(error = %err, "CLI failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_run(cli: Cli) -> Result<()> {
    app::run(cli)
}
