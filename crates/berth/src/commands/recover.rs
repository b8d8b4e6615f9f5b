//! Recover command implementation

use super::Context;
use crate::cli::OutputFormat;
use anyhow::Result;
use berth_core::recovery::OrphanRecovery;

pub async fn execute(ctx: &Context, output: OutputFormat) -> Result<()> {
    let report = OrphanRecovery::new(ctx.open_store()?).run().await;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text if report.is_empty() => println!("Nothing to recover"),
        OutputFormat::Text => {
            for id in &report.retried {
                println!("{}: Waiting", id);
            }
            for id in &report.failed {
                println!("{}: Failed", id);
            }
            for id in &report.errors {
                println!("{}: error (see log)", id);
            }
        }
    }
    Ok(())
}
