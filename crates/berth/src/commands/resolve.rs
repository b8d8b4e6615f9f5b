//! Resolve command implementation
//!
//! Prints the resolved command as JSON on stdout. Sensitive input values are
//! printed as given; they are only masked in logs.

use super::{load_inputs, Context};
use crate::cli::InputArgs;
use anyhow::Result;
use berth_core::errors::BerthError;
use berth_core::resolver::CommandResolver;
use tracing::{info, instrument};

#[instrument(skip_all, fields(command_file = %args.command_file.display()))]
pub fn execute(ctx: &Context, args: &InputArgs) -> Result<()> {
    let (command, values) = load_inputs(args)?;
    let resolver = CommandResolver::new(ctx.site_lookup());
    let resolved = resolver
        .resolve(&command, &values)
        .map_err(BerthError::from)?;
    info!(command = %resolved.command_name(), "Resolved command");

    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}
