use anyhow::Result;
use berth_core::container::ContainerStatus;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log format options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Resolve, launch and track command containers
#[derive(Debug, Parser)]
#[command(name = "berth")]
#[command(version)]
#[command(about = "Resolve command definitions and track their containers")]
#[command(
    long_about = "Resolves declarative command definitions into launchable container specifications, \
    submits them to a container engine, and tracks every container through its lifecycle."
)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via BERTH_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Settings file path (defaults to ./berth.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Input values given on the command line
#[derive(Debug, Clone, clap::Args)]
pub struct InputArgs {
    /// Command definition file (JSON or JSON5)
    pub command_file: PathBuf,

    /// Input value (format: NAME=VALUE, can be repeated)
    #[arg(long = "input", short = 'i', value_name = "NAME=VALUE")]
    pub inputs: Vec<String>,

    /// JSON file with an object of input values
    #[arg(long, value_name = "PATH")]
    pub inputs_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve a command definition and print the launchable specification
    Resolve {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Resolve a command definition and launch it on the configured engine
    Launch {
        #[command(flatten)]
        input: InputArgs,
        /// Launching user (defaults to the configured user)
        #[arg(long)]
        user: Option<String>,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Track launched containers until interrupted
    Watch {
        /// Also stream engine events as they happen
        #[arg(long)]
        listen: bool,
        /// Poll once, finish processing, and exit
        #[arg(long)]
        once: bool,
    },

    /// Recover containers whose finalization was interrupted
    Recover {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Inspect container records
    Containers {
        #[command(subcommand)]
        command: ContainersCommand,
    },

    /// Kill a running container
    Kill {
        /// Database id of the container
        id: i64,
        /// User requesting the kill (defaults to the configured user)
        #[arg(long)]
        user: Option<String>,
    },

    /// Show or change the container engine server
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },

    /// List images on the configured engine
    Images {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
}

#[derive(Debug, Subcommand)]
pub enum ContainersCommand {
    /// List container records
    List {
        /// Only containers with this status
        #[arg(long)]
        status: Option<ContainerStatus>,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Show one container record with its history
    Show {
        /// Database id of the container
        id: i64,
        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        output: OutputFormat,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServerCommand {
    /// Print the server configuration
    Show,
    /// Create or update the server configuration
    Set {
        /// Engine address (e.g. unix:///var/run/docker.sock or tcp://host:2376)
        #[arg(long)]
        host: String,
        /// Server name
        #[arg(long, default_value = "default")]
        name: String,
        /// Directory holding ca.pem, cert.pem and key.pem
        #[arg(long)]
        cert_path: Option<String>,
        /// Launch swarm services instead of containers
        #[arg(long)]
        swarm: bool,
        /// Site path prefix to rewrite for the engine host
        #[arg(long, requires = "engine_prefix")]
        site_prefix: Option<String>,
        /// Engine host path prefix replacing the site prefix
        #[arg(long, requires = "site_prefix")]
        engine_prefix: Option<String>,
    },
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let log_format = self.log_format.map(|f| match f {
            LogFormat::Text => berth_core::logging::LogFormat::Text,
            LogFormat::Json => berth_core::logging::LogFormat::Json,
        });
        let log_level = self.log_level.as_str();
        berth_core::logging::init(log_format, log_level)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        let Some(command) = self.command else {
            println!("Resolve command definitions and track their containers");
            println!("Run 'berth --help' to see available commands.");
            return Ok(());
        };

        let ctx = crate::commands::Context::load(self.config.as_deref())?;

        match command {
            Commands::Resolve { input } => crate::commands::resolve::execute(&ctx, &input),
            Commands::Launch {
                input,
                user,
                output,
            } => crate::commands::launch::execute(&ctx, &input, user, output).await,
            Commands::Watch { listen, once } => {
                crate::commands::watch::execute(&ctx, listen, once).await
            }
            Commands::Recover { output } => crate::commands::recover::execute(&ctx, output).await,
            Commands::Containers { command } => match command {
                ContainersCommand::List { status, output } => {
                    crate::commands::containers::list(&ctx, status, output).await
                }
                ContainersCommand::Show { id, output } => {
                    crate::commands::containers::show(&ctx, id, output).await
                }
            },
            Commands::Kill { id, user } => crate::commands::containers::kill(&ctx, id, user).await,
            Commands::Server { command } => match command {
                ServerCommand::Show => crate::commands::server::show(&ctx),
                ServerCommand::Set {
                    host,
                    name,
                    cert_path,
                    swarm,
                    site_prefix,
                    engine_prefix,
                } => crate::commands::server::set(
                    &ctx,
                    crate::commands::server::SetArgs {
                        host,
                        name,
                        cert_path,
                        swarm,
                        site_prefix,
                        engine_prefix,
                    },
                ),
            },
            Commands::Images { output } => crate::commands::images::execute(&ctx, output).await,
        }
    }
}
