//! dbrelay CLI - Run session workers
//!
//! Usage:
//!   dbrelay serve [--config <file>] [--session <id>]
//!   dbrelay token --key <key> --challenge <challenge>
//!   dbrelay check-config [--config <file>]
//!
//! Examples:
//!   dbrelay serve --config dbrelay.toml
//!   dbrelay serve --session 5f0c1e2a9b7d4c3e8a6f1b2c3d4e5f60
//!   dbrelay token --key 'sales/AND/pw' --challenge 'Zm9vYmFy'
//!
//! `serve` speaks length-prefixed frames on stdin/stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use dbrelay::config::{CredentialTable, Settings, SettingsError};
use dbrelay::crypto::hmac_hex;
use dbrelay::Engine;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dbrelay")]
#[command(about = "dbrelay - Per-session database workers over a signed XML protocol")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session over stdin/stdout
    Serve {
        /// Path to the config file (defaults to the usual search path)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Resume an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Compute the token answering a challenge
    Token {
        /// Signing key, or `name/AND/password` for a credential token
        #[arg(short, long)]
        key: String,

        /// Challenge from the last reply
        #[arg(long)]
        challenge: String,
    },

    /// Load and validate the configuration
    CheckConfig {
        /// Path to the config file (defaults to the usual search path)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, session } => cmd_serve(config, session),
        Commands::Token { key, challenge } => cmd_token(&key, &challenge),
        Commands::CheckConfig { config } => cmd_check_config(config),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DBRELAY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings, SettingsError> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
}

fn cmd_serve(config: Option<PathBuf>, session: Option<String>) -> ExitCode {
    init_tracing();

    let settings = match load_settings(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let engine = match Engine::from_settings(&settings) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        engine
            .serve_stream(tokio::io::stdin(), tokio::io::stdout(), session.as_deref())
            .await
    });

    match result {
        Ok(reason) => {
            tracing::info!(?reason, "session worker finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_token(key: &str, challenge: &str) -> ExitCode {
    println!("{}", hmac_hex(key.as_bytes(), challenge.as_bytes()));
    ExitCode::SUCCESS
}

fn cmd_check_config(config: Option<PathBuf>) -> ExitCode {
    let settings = match load_settings(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine_config = match settings.server.resolve() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid [server] section: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let credentials = match CredentialTable::from_settings(&settings) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid connection: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Heartbeat interval: {:?}", engine_config.heartbeat_interval);
    println!("Execution limit:    {:?}", engine_config.execution_limit);
    println!("Respawn pause:      {:?}", engine_config.respawn_pause);
    match &engine_config.state_dir {
        Some(dir) => println!("State directory:    {}", dir.display()),
        None => println!("State directory:    (none, sessions live in memory)"),
    }
    println!();

    if credentials.is_empty() {
        println!("No connections defined.");
    } else {
        println!("Connections:");
        for credential in credentials.iter() {
            println!("  - {}", credential.name);
        }
    }

    ExitCode::SUCCESS
}
