//! `podmark-migrate`: applies, rolls back, and inspects schema migrations.
//!
//! Exits 0 on success. On failure prints the failing version, direction,
//! and error text to stderr and exits 1.

use std::process::ExitCode;

use clap::Parser;
use podmark_cli::config::{self, Config};
use podmark_cli::{finish, run, Cli, CliError};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn resolve_config_path(cli: &Cli) -> (String, &'static str) {
    if let Some(path) = cli.config.as_ref().filter(|p| !p.trim().is_empty()) {
        return (path.clone(), "cli-arg");
    }

    if let Ok(path) = std::env::var("PODMARK_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    ("podmark.toml".to_string(), "default")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config_path, config_source) = resolve_config_path(&cli);

    let config = match config::load_config(Some(config_path.as_str())) {
        Ok(config) => config,
        Err(err) => {
            return ExitCode::from(finish(Err(CliError::Config(err)), &mut std::io::stderr()));
        }
    };
    init_tracing(&config);
    tracing::debug!(
        source = config_source,
        path = %config_path,
        "resolved configuration path"
    );

    let result = run(&cli, &config, &mut std::io::stdout().lock());
    ExitCode::from(finish(result, &mut std::io::stderr()))
}
