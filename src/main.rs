use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use converge::logging::{self, Logger};
use converge::{cli, commands};

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Apply(opts) => {
            logging::init(opts.quiet);
            let log = Arc::new(Logger::new(opts.quiet));
            commands::apply::run(&opts, log)
        }
        cli::Command::Script(opts) => {
            logging::init(false);
            commands::script::run(&opts)
        }
    }
}
