//! Server configuration commands

use super::Context;
use anyhow::Result;
use berth_core::config::{PathTranslation, ServerConfig};
use tracing::info;

pub struct SetArgs {
    pub host: String,
    pub name: String,
    pub cert_path: Option<String>,
    pub swarm: bool,
    pub site_prefix: Option<String>,
    pub engine_prefix: Option<String>,
}

pub fn show(ctx: &Context) -> Result<()> {
    match ctx.server()? {
        Some(server) => println!("{}", serde_json::to_string_pretty(&server)?),
        None => println!("No server is configured"),
    }
    Ok(())
}

/// The last event check time survives an update
pub fn set(ctx: &Context, args: SetArgs) -> Result<()> {
    let previous = ctx.server()?;
    let path_translation = match (args.site_prefix, args.engine_prefix) {
        (Some(site_prefix), Some(engine_prefix)) => Some(PathTranslation {
            site_prefix,
            engine_prefix,
        }),
        _ => None,
    };
    let server = ServerConfig {
        name: args.name,
        host: args.host,
        cert_path: args.cert_path,
        swarm_mode: args.swarm,
        last_event_check_time: previous.and_then(|p| p.last_event_check_time),
        path_translation,
    };
    ctx.servers.save(&server)?;
    info!(host = %server.host, swarm = server.swarm_mode, "Saved server configuration");
    println!("{}", serde_json::to_string_pretty(&server)?);
    Ok(())
}
