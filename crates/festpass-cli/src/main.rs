//! festpass - command line back office for Ecofest registrations.
//!
//! Signs staff in against the registration backend, keeps the session alive
//! between runs and exposes the admin actions (review, exports, badges,
//! accounts) plus the public registration form.

mod commands;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use festpass_core::config::Config;
use festpass_core::models::{DEFAULT_PROFILE, DEFAULT_USER_LANGUAGE, DEFAULT_USER_ROLE};

// ============================================================================
// Constants
// ============================================================================

/// Directory for daily-rolling log files; stderr only when unset
const LOG_DIR_ENV: &str = "FESTPASS_LOG_DIR";

/// Log file name prefix inside `FESTPASS_LOG_DIR`
const LOG_FILE_PREFIX: &str = "festpass.log";

// ============================================================================
// Command line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "festpass", version, about = "Ecofest registration back office")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and remember the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
        /// Read from the environment instead of prompting
        #[arg(long, env = "FESTPASS_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami {
        #[arg(long)]
        json: bool,
        /// Re-read the profile from the server instead of the cached copy
        #[arg(long)]
        refresh: bool,
    },
    /// Show session state and the next token renewal
    Status,
    /// Renew the access token now
    Refresh,
    /// Review registrations
    #[command(subcommand)]
    Registrations(RegistrationsCommand),
    /// Registration counters
    Stats,
    /// Download the badge of a registration
    Badge {
        id: i64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download the invitation letter of a registration
    Invitation {
        id: i64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download every badge as one archive (Admin)
    BadgesZip {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage back-office accounts (Admin)
    #[command(subcommand)]
    Users(UsersCommand),
    /// Submit the public registration form
    Register(RegisterArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    /// En_attente, Validé or Refusé (English names accepted)
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    nationality: Option<String>,
}

#[derive(Subcommand, Debug)]
enum RegistrationsCommand {
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Mark a registration as validated (Admin)
    Validate {
        id: i64,
        #[arg(long, default_value = "")]
        remark: String,
    },
    /// Mark a registration as refused (Admin)
    Refuse {
        id: i64,
        #[arg(long, default_value = "")]
        remark: String,
    },
    /// Write the (filtered) list to a CSV file
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    List,
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        telephone: String,
        #[arg(long, default_value = DEFAULT_USER_ROLE)]
        role: String,
        #[arg(long, default_value = DEFAULT_USER_LANGUAGE)]
        lang: String,
    },
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    email: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long, default_value = "")]
    nationality: String,
    #[arg(long, default_value = "")]
    origin: String,
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,
    #[arg(long, default_value = "")]
    address: String,
    /// YYYY-MM-DD, required for VIP
    #[arg(long)]
    birth_date: Option<String>,
    /// Scan of the passport (PDF or image)
    #[arg(long)]
    passport: Option<PathBuf>,
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). When `FESTPASS_LOG_DIR` is
/// set, events are also written to a daily log file; the returned guard must
/// live until exit so buffered lines get flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    }
}

/// Print the error (if any) and map the outcome to the process exit status.
fn report(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    // Dropped when main returns, after the last line has been queued
    let _log_guard = init_tracing();
    let cli = Cli::parse();
    let config = load_config();
    info!(api_base = %config.api_base(), "festpass starting");

    report(commands::run(cli.command, config).await)
}
