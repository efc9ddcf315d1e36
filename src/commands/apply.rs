//! The `apply` subcommand: load a catalog and converge the local machine.

use std::sync::Arc;

use anyhow::Result;

use crate::apply::{Applier, ApplyOptions};
use crate::catalog::Catalog;
use crate::cli::ApplyArgs;
use crate::logging::Log;
use crate::system::{LocalSystem, LoggedSystem, SimulatedSystem, System};

/// Run the apply subcommand.
///
/// # Errors
///
/// Returns an error when the catalog cannot be loaded or the run did not
/// apply cleanly; the process maps any error to exit code 1.
pub fn run(args: &ApplyArgs, log: Arc<dyn Log>) -> Result<()> {
    let catalog = Catalog::load(args.catalog.as_deref())?;
    let system = build_system(args, &log);
    let options = ApplyOptions {
        bash: args.bash.clone(),
        jobs: args.jobs,
        skip_conditions: args.skip_conditions,
    };
    let applier = Applier::with_options(system, log, options);
    applier.apply(&catalog)?;
    Ok(())
}

/// Stack the system wrappers the flags ask for: dry-run suppresses
/// mutations, `-s` logs commands on top of whichever system runs.
fn build_system(args: &ApplyArgs, log: &Arc<dyn Log>) -> Arc<dyn System> {
    match (args.dry_run, args.show_commands) {
        (false, false) => Arc::new(LocalSystem::new()),
        (true, false) => Arc::new(SimulatedSystem::new(LocalSystem::new())),
        (false, true) => Arc::new(LoggedSystem::new(LocalSystem::new(), Arc::clone(log))),
        (true, true) => Arc::new(LoggedSystem::new(
            SimulatedSystem::new(LocalSystem::new()),
            Arc::clone(log),
        )),
    }
}
