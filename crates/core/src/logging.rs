//! Logging
//!
//! Structured logging through `tracing`, written to stderr so stdout carries
//! only command output (resolved commands, container records). The watcher
//! runs for long stretches, so JSON output is available for log shippers.
//!
//! Filter precedence: `BERTH_LOG`, then `RUST_LOG`, then the level the
//! caller passes in, applied to the `berth` and `berth_core` targets only.
//!
//! * `BERTH_LOG_FORMAT` - `json` or `text` when no format is passed in
//! * `BERTH_LOG_SPAN_EVENTS` - comma separated span events (`new,close,...`)

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crate targets the default filter applies to
const TARGETS: [&str; 2] = ["berth", "berth_core"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else is text
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
///
/// ```rust
/// use berth_core::logging::{self, LogFormat};
///
/// logging::init(None, "info").expect("Failed to initialize logging");
/// logging::init(Some(LogFormat::Json), "debug").expect("second call is a no-op");
/// ```
pub fn init(format: Option<LogFormat>, default_level: &str) -> Result<()> {
    INIT.call_once(|| {
        let format = format.unwrap_or_else(|| {
            std::env::var("BERTH_LOG_FORMAT")
                .map(|f| LogFormat::from_name(&f))
                .unwrap_or_default()
        });
        let filter = env_filter(default_level);
        let span_events = span_events_for(format);

        let layer = fmt::layer()
            .with_target(true)
            .with_span_events(span_events)
            .with_writer(io::stderr);
        match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(layer.json())
                .with(filter)
                .init(),
            LogFormat::Text => tracing_subscriber::registry().with(layer).with(filter).init(),
        }

        tracing::debug!(?format, "Logging initialized");
    });

    Ok(())
}

/// Filter directives enabling `level` for the berth crates
pub fn default_directives(level: &str) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(default_level: &str) -> EnvFilter {
    let fallback = || EnvFilter::new(default_directives(default_level));
    if let Ok(spec) = std::env::var("BERTH_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            eprintln!("Invalid BERTH_LOG '{}', using level {}", spec, default_level);
            fallback()
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
    }
}

/// `BERTH_LOG_SPAN_EVENTS` wins; otherwise JSON records span open and close
fn span_events_for(format: LogFormat) -> FmtSpan {
    if let Ok(raw) = std::env::var("BERTH_LOG_SPAN_EVENTS") {
        return parse_span_events(&raw);
    }
    match format {
        LogFormat::Json => FmtSpan::NEW | FmtSpan::CLOSE,
        LogFormat::Text => FmtSpan::NONE,
    }
}

fn parse_span_events(raw: &str) -> FmtSpan {
    raw.split(&[',', '|'][..])
        .map(|t| t.trim().to_lowercase())
        .fold(FmtSpan::NONE, |acc, token| {
            acc | match token.as_str() {
                "new" => FmtSpan::NEW,
                "close" => FmtSpan::CLOSE,
                "enter" => FmtSpan::ENTER,
                "exit" => FmtSpan::EXIT,
                "active" => FmtSpan::ACTIVE,
                "full" => FmtSpan::FULL,
                _ => FmtSpan::NONE,
            }
        })
}

pub fn is_initialized() -> bool {
    INIT.is_completed()
}
