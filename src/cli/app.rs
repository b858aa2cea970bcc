use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Tomekeeper: transactional install and removal of tomes
#[derive(Parser, Debug)]
#[command(name = "tomekeeper")]
#[command(version)]
#[command(about = "Install, remove and track tomes through an auditable catalog")]
#[command(
    long_about = "Runs a merx (e.g. install or remove) against each tome in turn, records the result in the catalog and journals every invocation."
)]
pub struct Cli {
    /// Merx to run; chain several with '/' (e.g. build/install)
    pub merx: String,

    /// Tomes to run it on, in order
    #[arg(required = true)]
    pub tomes: Vec<String>,

    /// Reverse the merx instead of applying it
    #[arg(short, long)]
    pub undo: bool,

    /// Log verbosity (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Library directory (defaults to $TOMEKEEPER_LIBRARY, then ~/.eons)
    #[arg(long)]
    pub library: Option<PathBuf>,

    /// Configuration file (defaults to <library>/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Repository to retrieve tomes from
    #[arg(long)]
    pub repo: Option<String>,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
