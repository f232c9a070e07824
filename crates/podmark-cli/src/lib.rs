//! Operator tooling for the podmark database.
//!
//! The `podmark-migrate` binary is a thin wrapper over [`run`]: it parses
//! [`Cli`], loads [`config::Config`], sets up logging, and hands the result
//! to [`finish`] for the exit status.

pub mod config;

use std::io::Write;

use clap::{Parser, Subcommand};
use podmark_db::{
    create_pool, DbError, DbPool, MigrationError, MigrationReport, MigrationRunner, MIGRATIONS,
};
use thiserror::Error;

use crate::config::{Config, ConfigError};

#[derive(Debug, Parser)]
#[clap(name = "podmark-migrate", author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    /// Configuration file path, by default $PODMARK_CONFIG_PATH or ./podmark.toml is used
    #[clap(short, long)]
    pub config: Option<String>,

    /// SQLite database path, overriding the configuration
    #[clap(short, long)]
    pub database: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending migrations.
    Up {
        /// Stop after this version instead of the latest one
        #[clap(long)]
        target: Option<u32>,
    },

    /// Roll back applied migrations above a version.
    Down {
        /// Version to roll back to; 0 removes every migration
        #[clap(long)]
        target: u32,
    },

    /// Print the currently applied version.
    Version,

    /// List every migration and whether it is applied.
    Status {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Errors surfaced by the operator commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// One-line description for the operator, leading with the failing
    /// direction and version when a migration step failed.
    pub fn report(&self) -> String {
        match self {
            Self::Migration(MigrationError::Failed {
                version,
                direction,
                source,
            }) => format!("{direction} failed at version {version}: {source}"),
            Self::Migration(MigrationError::Unregistered(version)) => {
                format!("down failed at version {version}: no backward script is registered")
            }
            other => other.to_string(),
        }
    }
}

/// Reports the outcome of [`run`] on `err_out` and returns the exit status:
/// 0 on success, 1 on any failure.
pub fn finish<W: Write>(result: Result<(), CliError>, err_out: &mut W) -> u8 {
    let Err(err) = result else {
        return 0;
    };
    if let CliError::Migration(migration) = &err {
        tracing::error!(
            version = migration.version(),
            direction = ?migration.direction(),
            error = %migration,
            "migration run aborted"
        );
    }
    let _ = writeln!(err_out, "podmark-migrate: {}", err.report());
    1
}

/// Executes `cli` against the configured database, writing results to `out`.
///
/// # Errors
///
/// Returns `CliError::Migration` naming the failing version and direction
/// when a migration step does not commit, or any pool/output error.
pub fn run<W: Write>(cli: &Cli, config: &Config, out: &mut W) -> Result<(), CliError> {
    let path = cli.database.as_deref().unwrap_or(&config.database.path);
    let pool = create_pool(path, config.database.runtime_settings())?;
    tracing::debug!(path, "opened database");

    let result = execute(&cli.command, &pool, out);
    pool.shutdown();
    result
}

fn execute<W: Write>(command: &Command, pool: &DbPool, out: &mut W) -> Result<(), CliError> {
    let runner = MigrationRunner::new(pool, MIGRATIONS)?;
    match command {
        Command::Up { target } => {
            let report = runner.run_migrations(*target)?;
            write_report(out, &report)?;
        }
        Command::Down { target } => {
            let report = runner.rollback_migrations(*target)?;
            write_report(out, &report)?;
        }
        Command::Version => {
            writeln!(out, "{}", runner.current_version()?)?;
        }
        Command::Status { json } => {
            let statuses = runner.status()?;
            if *json {
                serde_json::to_writer_pretty(&mut *out, &statuses)?;
                writeln!(out)?;
            } else {
                for status in &statuses {
                    let state = match (&status.applied_at, status.orphaned) {
                        (Some(at), false) => format!("applied {}", at.to_rfc3339()),
                        (Some(at), true) => format!("applied {} (not registered)", at.to_rfc3339()),
                        (None, _) => "pending".to_string(),
                    };
                    writeln!(out, "{:>4}  {:<24} {state}", status.version, status.name)?;
                }
            }
        }
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, report: &MigrationReport) -> std::io::Result<()> {
    if report.steps.is_empty() {
        return writeln!(out, "already at version {}", report.to_version);
    }
    let steps: Vec<String> = report.steps.iter().map(u32::to_string).collect();
    writeln!(
        out,
        "migrated {} from version {} to {} (ran {})",
        report.direction,
        report.from_version,
        report.to_version,
        steps.join(", ")
    )
}
