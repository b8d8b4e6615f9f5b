//! Launch command implementation

use super::{load_inputs, Context};
use crate::cli::{InputArgs, OutputFormat};
use anyhow::Result;
use berth_core::errors::BerthError;
use berth_core::launcher::{ContainerLauncher, PrefixTranslator, StaticCredentials};
use berth_core::resolver::CommandResolver;
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, fields(command_file = %args.command_file.display()))]
pub async fn execute(
    ctx: &Context,
    args: &InputArgs,
    user: Option<String>,
    output: OutputFormat,
) -> Result<()> {
    let (command, values) = load_inputs(args)?;
    let resolved = CommandResolver::new(ctx.site_lookup())
        .resolve(&command, &values)
        .map_err(BerthError::from)?;

    let (engine, server) = ctx.engine()?;
    let server = server.unwrap_or_default();
    let launcher = ContainerLauncher::new(
        Arc::new(engine),
        ctx.open_store()?,
        Arc::new(StaticCredentials::new(
            ctx.settings.site_url.clone(),
            ctx.settings.token.clone(),
        )),
        ctx.settings.build_path.clone(),
    )
    .with_translator(Arc::new(PrefixTranslator::new(server.path_translation)))
    .with_swarm(server.swarm_mode);

    let user = user.unwrap_or_else(|| ctx.settings.user.clone());
    let container = launcher.launch(resolved, &user).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&container)?),
        OutputFormat::Text => println!(
            "Launched container {} ({})",
            container.database_id,
            container.external_id().unwrap_or("-")
        ),
    }
    Ok(())
}
