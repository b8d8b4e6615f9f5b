//! Images command implementation

use super::Context;
use crate::cli::OutputFormat;
use anyhow::Result;
use berth_core::engine::ContainerEngine;

pub async fn execute(ctx: &Context, output: OutputFormat) -> Result<()> {
    let (engine, _) = ctx.engine()?;
    let images = engine.list_images().await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&images)?),
        OutputFormat::Text => {
            for image in &images {
                println!(
                    "{}:{}\t{}\t{}\t{}",
                    image.repository, image.tag, image.id, image.size, image.created
                );
            }
        }
    }
    Ok(())
}
