use anyhow::Result;
use berth_core::errors::{BerthError, EngineError};
use clap::Parser;

mod cli;
mod commands;

/// Exit code for commands that could not be resolved
const EXIT_RESOLUTION: i32 = 2;
/// Exit code when the container engine is not configured or not reachable
const EXIT_ENGINE_UNAVAILABLE: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(()) => Ok(()),
        Err(err) => {
            if let Some(berth_error) = err.downcast_ref::<BerthError>() {
                let code = match berth_error {
                    BerthError::Resolution(_) => Some(EXIT_RESOLUTION),
                    BerthError::Engine(e) if e.is_unavailable() => Some(EXIT_ENGINE_UNAVAILABLE),
                    _ => None,
                };
                if let Some(code) = code {
                    eprintln!("Error: {:#}", err);
                    std::process::exit(code);
                }
            }
            if err.downcast_ref::<EngineError>().is_some_and(EngineError::is_unavailable) {
                eprintln!("Error: {:#}", err);
                std::process::exit(EXIT_ENGINE_UNAVAILABLE);
            }

            Err(err)
        }
    }
}
