use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tftpsh::config::{self, ClientConfig, LogFormat};
use tftpsh::shell;

/// Interactive TFTP client
#[derive(Parser, Debug)]
#[command(name = "tftpsh")]
#[command(about = "Interactive TFTP client with option negotiation", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a default TOML configuration file and exit
    #[arg(long)]
    init_config: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format override
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    verbose: bool,
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/tftpsh/config.toml"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);

    if cli.init_config {
        let Some(path) = config_path else {
            eprintln!("cannot determine a config path; pass --config");
            return ExitCode::FAILURE;
        };
        return match config::write_default_config(&path) {
            Ok(()) => {
                println!("wrote default configuration to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to write {}: {}", path.display(), e);
                ExitCode::FAILURE
            }
        };
    }

    // a missing config file just means defaults; a broken one is an error
    let config = match &config_path {
        Some(path) if path.exists() => match config::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        _ => ClientConfig::default(),
    };

    if cli.check_config {
        println!("configuration OK");
        return ExitCode::SUCCESS;
    }

    init_logging(&cli, &config);

    // diagnostics are on stderr; stdout carries the prompt and the journal
    match shell::run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli, config: &ClientConfig) {
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let format = cli.log_format.unwrap_or(config.logging.format);

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
