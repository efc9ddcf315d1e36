//! The `script` subcommand: transpile a catalog to bash on stdout.

use anyhow::Result;

use crate::catalog::Catalog;
use crate::cli::ScriptArgs;

/// Run the script subcommand.
///
/// # Errors
///
/// Returns an error when the catalog cannot be loaded or transpiled.
pub fn run(args: &ScriptArgs) -> Result<()> {
    let catalog = Catalog::load(args.catalog.as_deref())?;
    let mut stdout = std::io::stdout().lock();
    crate::script::write_script(&mut stdout, &catalog)
}
