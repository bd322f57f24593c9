// src/cli.rs
// Global flags and subcommands (§A.1), mirroring the teacher's `Cli`/
// `Commands` shape.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(author, version, about = "InfraLLM multi-tenant LLM-ops backend", long_about = None)]
pub struct Cli {
    /// Optional path to the configuration file
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides the configured log level
    #[clap(long, value_name = "LEVEL", value_enum)]
    pub log_level: Option<LogLevelCli>,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the HTTP API, cron scheduler, and background janitors (default)
    Serve,

    /// Applies the embedded schema to the configured database and exits
    Migrate,

    /// Drives the Policy Engine directly for operational debugging
    Policy {
        #[clap(subcommand)]
        command: PolicyCommands,
    },

    /// Mints an access token outside the HTTP surface
    Token {
        #[clap(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    Check {
        #[clap(long)]
        user: Uuid,
        #[clap(long)]
        host: Uuid,
        #[clap(long)]
        command: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TokenCommands {
    Create {
        #[clap(long)]
        user: Uuid,
        #[clap(long)]
        label: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogLevelCli {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevelCli {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevelCli::Trace => "trace",
            LogLevelCli::Debug => "debug",
            LogLevelCli::Info => "info",
            LogLevelCli::Warn => "warn",
            LogLevelCli::Error => "error",
        }
    }
}
