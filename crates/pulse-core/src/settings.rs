use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default bind address for the HTTP server.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default cap on a single upload, in megabytes.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 25;

/// Number of normalized records echoed back after an ingestion.
pub const DEFAULT_PREVIEW_LIMIT: usize = 5;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Heart-rate and HRV upload, storage and summary service
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pulse-monitor",
    about = "Heart-rate and HRV upload, storage and summary service",
    version
)]
pub struct Settings {
    /// Directory holding one JSON file per uploaded batch
    #[arg(long, global = true, env = "PULSE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Address the HTTP server binds to
    #[arg(long, global = true, env = "PULSE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port the HTTP server listens on
    #[arg(long, global = true, env = "PULSE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum accepted upload size in megabytes (1-1024)
    #[arg(
        long,
        global = true,
        env = "PULSE_MAX_UPLOAD_MB",
        default_value_t = DEFAULT_MAX_UPLOAD_MB,
        value_parser = clap::value_parser!(u64).range(1..=1024).map(|v| v as usize)
    )]
    pub max_upload_mb: usize,

    /// Number of records returned in an ingestion preview
    #[arg(long, global = true, default_value_t = DEFAULT_PREVIEW_LIMIT)]
    pub preview_limit: usize,

    /// Logging level
    #[arg(long, global = true, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What the binary should do; `serve` when omitted.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API
    Serve,
    /// Ingest a local CSV or JSON file into the store
    Ingest {
        /// File to ingest
        file: PathBuf,
    },
    /// Print the summary readings and per-device status
    Summary,
    /// Print a statistical report over all stored records
    Analyze {
        /// Output format
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
}

/// Output format of the `analyze` command.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments and apply the `--debug` override.
    pub fn load() -> Self {
        Self::resolve(Settings::parse())
    }

    /// Same as [`Settings::load`] but from an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::resolve(Settings::parse_from(args))
    }

    fn resolve(mut settings: Settings) -> Self {
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// The subcommand to run, defaulting to [`Command::Serve`].
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the batch directory: `--data-dir` when given, otherwise
    /// `~/.pulse-monitor/uploads`.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(p) => p.clone(),
            None => default_data_dir(),
        }
    }

    /// Upload cap in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    /// Host and port to listen on. The host may be a name such as
    /// `localhost`; it is resolved when the listener binds.
    pub fn bind_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

/// `~/.pulse-monitor/uploads`, falling back to the working directory when no
/// home directory can be determined.
pub fn default_data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".pulse-monitor").join("uploads")
}

// ── Tests ──────────────────────────────────────────────────────────────────────
