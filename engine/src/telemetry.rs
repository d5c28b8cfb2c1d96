//! Logging setup
//!
//! Structured logs through `tracing-subscriber`, always on stderr so that
//! `quill run --json` keeps stdout machine-readable. Quill's own crates log
//! at the chosen level while dependencies (HTTP client, runtime) stay at
//! `warn` unless `RUST_LOG` says otherwise.
//!
//! Level priority: `RUST_LOG` > `--log` > `core.log_level` > `info`.
//! Format: `QUILL_LOG_FORMAT` (`pretty` or `json`), else pretty in debug
//! builds and JSON with spans in release builds.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the log format
pub const LOG_FORMAT_ENV: &str = "QUILL_LOG_FORMAT";

const DEFAULT_LEVEL: &str = "info";
const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];
const QUILL_TARGETS: [&str; 2] = ["quill_engine", "quill_sdk"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }

    fn for_build() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Resolved logging options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryOptions {
    pub level: String,
    pub format: LogFormat,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            format: LogFormat::for_build(),
        }
    }
}

impl TelemetryOptions {
    /// Combine the CLI flag, the configured level and the format override.
    /// Unknown levels and formats fall back to the defaults.
    pub fn resolve(cli_level: Option<&str>, config_level: &str, format: Option<&str>) -> Self {
        let level = cli_level
            .into_iter()
            .chain(std::iter::once(config_level))
            .map(|l| l.trim().to_ascii_lowercase())
            .find(|l| LEVELS.contains(&l.as_str()))
            .unwrap_or_else(|| DEFAULT_LEVEL.to_string());

        Self {
            level,
            format: format
                .and_then(LogFormat::parse)
                .unwrap_or_else(LogFormat::for_build),
        }
    }

    /// Filter used when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> String {
        std::iter::once("warn".to_string())
            .chain(QUILL_TARGETS.iter().map(|t| format!("{}={}", t, self.level)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_telemetry(options: &TelemetryOptions) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.filter_directives()));

    let installed = match options.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    if installed.is_ok() {
        tracing::debug!("Logging at {} as {:?}", options.level, options.format);
    }
}
