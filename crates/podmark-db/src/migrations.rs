//! Versioned schema migrations.
//!
//! A registry is an ordered slice of [`Migration`]s, each carrying its own
//! forward and backward script. Applied state lives in the
//! `_podmark_migrations` table, one row per applied version; the current
//! version is the highest version recorded there (0 when empty).
//!
//! Every step runs in its own transaction on a single borrowed connection.
//! The first failing step is rolled back and ends the run, so the schema
//! is always left at the last committed version.

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{Order, QueryBuilder, TableSchema};
use crate::record::FieldValue;

/// One registered schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Position in the chain, starting at 1.
    pub version: u32,
    /// Short label recorded alongside the version.
    pub name: &'static str,
    /// Forward script.
    pub up: &'static str,
    /// Backward script, undoing `up`.
    pub down: &'static str,
}

/// All embedded migrations in order. New migrations are appended here.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users",
        up: include_str!("migrations/0001_users.up.sql"),
        down: include_str!("migrations/0001_users.down.sql"),
    },
    Migration {
        version: 2,
        name: "podcasts",
        up: include_str!("migrations/0002_podcasts.up.sql"),
        down: include_str!("migrations/0002_podcasts.down.sql"),
    },
    Migration {
        version: 3,
        name: "episodes",
        up: include_str!("migrations/0003_episodes.up.sql"),
        down: include_str!("migrations/0003_episodes.down.sql"),
    },
    Migration {
        version: 4,
        name: "transcripts",
        up: include_str!("migrations/0004_transcripts.up.sql"),
        down: include_str!("migrations/0004_transcripts.down.sql"),
    },
    Migration {
        version: 5,
        name: "marketing_content",
        up: include_str!("migrations/0005_marketing_content.up.sql"),
        down: include_str!("migrations/0005_marketing_content.down.sql"),
    },
    Migration {
        version: 6,
        name: "social_media_posts",
        up: include_str!("migrations/0006_social_media_posts.up.sql"),
        down: include_str!("migrations/0006_social_media_posts.down.sql"),
    },
    Migration {
        version: 7,
        name: "analytics",
        up: include_str!("migrations/0007_analytics.up.sql"),
        down: include_str!("migrations/0007_analytics.down.sql"),
    },
];

const METADATA: TableSchema = TableSchema::new(
    "_podmark_migrations",
    &["version", "name", "applied_at"],
    "version",
);

const METADATA_DDL: &str = "CREATE TABLE IF NOT EXISTS _podmark_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);";

/// Which script of a migration is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Forward script, raising the version.
    Up,
    /// Backward script, lowering the version.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "up",
            Self::Down => "down",
        })
    }
}

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A script or its bookkeeping failed; that step was rolled back.
    #[error("migration {version} ({direction}) failed: {source}")]
    Failed {
        /// Version whose step failed.
        version: u32,
        /// Script that was running.
        direction: Direction,
        /// The underlying error.
        source: DbError,
    },

    /// Failed to read or prepare migration state.
    #[error("failed to check migration state: {0}")]
    State(DbError),

    /// The registry is not a strictly ascending chain of versions >= 1.
    #[error("invalid migration registry: {0}")]
    Registry(String),

    /// An applied version has no registered backward script.
    #[error("applied migration {0} is not in the registry")]
    Unregistered(u32),

    /// The requested target is beyond the newest registered version.
    #[error("target version {target} is beyond the latest registered version {latest}")]
    UnknownTarget {
        /// Requested version.
        target: u32,
        /// Newest registered version.
        latest: u32,
    },
}

impl MigrationError {
    /// Version of the failed step, if the failure belongs to one.
    pub fn version(&self) -> Option<u32> {
        match self {
            Self::Failed { version, .. } | Self::Unregistered(version) => Some(*version),
            _ => None,
        }
    }

    /// Direction of the failed step, if the failure belongs to one.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Failed { direction, .. } => Some(*direction),
            Self::Unregistered(_) => Some(Direction::Down),
            _ => None,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Which scripts ran.
    pub direction: Direction,
    /// Version before the run.
    pub from_version: u32,
    /// Version after the run.
    pub to_version: u32,
    /// Versions whose script ran, in execution order.
    pub steps: Vec<u32>,
}

/// Applied/pending state of one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Migration version.
    pub version: u32,
    /// Registered name, or the recorded one for an orphan.
    pub name: String,
    /// `None` while pending.
    pub applied_at: Option<DateTime<Utc>>,
    /// Applied but missing from the registry.
    pub orphaned: bool,
}

/// Applies and rolls back a migration registry against a pool.
#[derive(Debug, Clone, Copy)]
pub struct MigrationRunner<'a> {
    pool: &'a DbPool,
    migrations: &'a [Migration],
}

impl<'a> MigrationRunner<'a> {
    /// Creates a runner for `migrations`.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Registry` if versions are not strictly
    /// ascending from at least 1.
    pub fn new(pool: &'a DbPool, migrations: &'a [Migration]) -> Result<Self, MigrationError> {
        let mut previous = 0;
        for migration in migrations {
            if migration.version <= previous {
                return Err(MigrationError::Registry(format!(
                    "version {} ({}) does not follow version {previous}",
                    migration.version, migration.name
                )));
            }
            previous = migration.version;
        }
        Ok(Self { pool, migrations })
    }

    /// Newest registered version, or 0 for an empty registry.
    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// Highest applied version, or 0 if none.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::State` if the metadata table cannot be read.
    pub fn current_version(&self) -> Result<u32, MigrationError> {
        let conn = self.pool.get().map_err(MigrationError::State)?;
        prepare_metadata(&conn)?;
        read_current(&conn)
    }

    /// Applies every registered migration above the current version, up to
    /// `target` (the latest when `None`). Already being at or past the
    /// target is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Failed` naming the first version that did
    /// not commit; earlier versions in the run stay applied.
    pub fn run_migrations(&self, target: Option<u32>) -> Result<MigrationReport, MigrationError> {
        let latest = self.latest_version();
        let target = target.unwrap_or(latest);
        if target > latest {
            return Err(MigrationError::UnknownTarget { target, latest });
        }

        let conn = self.pool.get().map_err(MigrationError::State)?;
        prepare_metadata(&conn)?;
        let from_version = read_current(&conn)?;

        let mut report = MigrationReport {
            direction: Direction::Up,
            from_version,
            to_version: from_version,
            steps: Vec::new(),
        };

        let pending = self
            .migrations
            .iter()
            .filter(|m| m.version > from_version && m.version <= target);
        for migration in pending {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "applying migration"
            );
            step(&conn, migration, Direction::Up).map_err(|source| MigrationError::Failed {
                version: migration.version,
                direction: Direction::Up,
                source,
            })?;
            report.to_version = migration.version;
            report.steps.push(migration.version);
        }

        if report.steps.is_empty() {
            tracing::debug!(version = from_version, "schema already up to date");
        }
        Ok(report)
    }

    /// Rolls back every applied migration above `target`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Unregistered` before touching the schema if
    /// an applied version has no registered backward script, and
    /// `MigrationError::Failed` naming the first version whose rollback did
    /// not commit.
    pub fn rollback_migrations(&self, target: u32) -> Result<MigrationReport, MigrationError> {
        let conn = self.pool.get().map_err(MigrationError::State)?;
        prepare_metadata(&conn)?;
        let from_version = read_current(&conn)?;

        let mut plan = Vec::new();
        for version in applied_versions(&conn)?.into_iter().rev() {
            if version <= target {
                break;
            }
            let migration = self
                .migrations
                .iter()
                .find(|m| m.version == version)
                .ok_or(MigrationError::Unregistered(version))?;
            plan.push(migration);
        }

        let mut report = MigrationReport {
            direction: Direction::Down,
            from_version,
            to_version: from_version,
            steps: Vec::new(),
        };
        for migration in plan {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "rolling back migration"
            );
            step(&conn, migration, Direction::Down).map_err(|source| MigrationError::Failed {
                version: migration.version,
                direction: Direction::Down,
                source,
            })?;
            report.steps.push(migration.version);
            report.to_version = read_current(&conn)?;
        }
        Ok(report)
    }

    /// Lists every registered or applied version with its state.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::State` if the metadata table cannot be read.
    pub fn status(&self) -> Result<Vec<MigrationStatus>, MigrationError> {
        let conn = self.pool.get().map_err(MigrationError::State)?;
        prepare_metadata(&conn)?;
        let applied = applied_rows(&conn)?;

        let mut statuses: Vec<MigrationStatus> = self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name.to_string(),
                applied_at: applied
                    .iter()
                    .find(|(version, _, _)| *version == m.version)
                    .map(|(_, _, at)| *at),
                orphaned: false,
            })
            .collect();
        for (version, name, applied_at) in applied {
            if !self.migrations.iter().any(|m| m.version == version) {
                statuses.push(MigrationStatus {
                    version,
                    name,
                    applied_at: Some(applied_at),
                    orphaned: true,
                });
            }
        }
        statuses.sort_by_key(|s| s.version);
        Ok(statuses)
    }
}

/// Applies every embedded migration that has not run yet.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(pool: &DbPool) -> Result<MigrationReport, MigrationError> {
    MigrationRunner::new(pool, MIGRATIONS)?.run_migrations(None)
}

fn prepare_metadata(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(METADATA_DDL)
        .map_err(|e| MigrationError::State(e.into()))
}

fn read_current(conn: &Connection) -> Result<u32, MigrationError> {
    let current: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM _podmark_migrations", [], |row| {
            row.get(0)
        })
        .map_err(|e| MigrationError::State(e.into()))?;
    version_from(current.unwrap_or(0)).map_err(MigrationError::State)
}

fn version_from(raw: i64) -> Result<u32, DbError> {
    u32::try_from(raw).map_err(|_| DbError::mapping("version", format!("{raw} is out of range")))
}

fn applied_versions(conn: &Connection) -> Result<Vec<u32>, MigrationError> {
    Ok(applied_rows(conn)?
        .into_iter()
        .map(|(version, _, _)| version)
        .collect())
}

/// Metadata rows ordered by ascending version.
fn applied_rows(conn: &Connection) -> Result<Vec<(u32, String, DateTime<Utc>)>, MigrationError> {
    let read = || -> Result<Vec<(u32, String, DateTime<Utc>)>, DbError> {
        let (sql, params) = QueryBuilder::new()
            .table(METADATA)
            .select(METADATA.columns)
            .order_by("version", Order::Asc)
            .build()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut applied = Vec::new();
        while let Some(row) = rows.next()? {
            let version = version_from(row.get(0)?)?;
            let name: String = row.get(1)?;
            let applied_at = DateTime::<Utc>::from_value(&row.get::<_, Value>(2)?)
                .map_err(|reason| DbError::mapping("applied_at", reason))?;
            applied.push((version, name, applied_at));
        }
        Ok(applied)
    };
    read().map_err(MigrationError::State)
}

fn step(conn: &Connection, migration: &Migration, direction: Direction) -> Result<(), DbError> {
    // Dropping `tx` on any early return rolls the whole step back.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let version = Value::Integer(i64::from(migration.version));
    match direction {
        Direction::Up => {
            tx.execute_batch(migration.up)?;
            let (sql, params) = QueryBuilder::new()
                .table(METADATA)
                .insert_values([
                    ("version", version),
                    ("name", migration.name.to_string().to_value()),
                    ("applied_at", Utc::now().to_value()),
                ])
                .build()?;
            tx.execute(&sql, params_from_iter(params.iter()))?;
        }
        Direction::Down => {
            tx.execute_batch(migration.down)?;
            let (sql, params) = QueryBuilder::new()
                .table(METADATA)
                .delete()
                .where_eq("version", version)
                .build()?;
            tx.execute(&sql, params_from_iter(params.iter()))?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbRuntimeSettings};
    use tempfile::TempDir;

    const USERS_AND_ROLE: &[Migration] = &[
        Migration {
            version: 1,
            name: "users",
            up: "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);",
            down: "DROP TABLE users;",
        },
        Migration {
            version: 2,
            name: "user_role",
            up: "ALTER TABLE users ADD COLUMN role TEXT NOT NULL DEFAULT 'VIEWER';",
            down: "ALTER TABLE users DROP COLUMN role;",
        },
    ];

    fn test_pool() -> (TempDir, DbPool) {
        let dir = TempDir::new().expect("should create temp dir");
        let path = dir.path().join("migrations.db");
        let pool = create_pool(
            path.to_str().expect("temp path should be utf-8"),
            DbRuntimeSettings::default(),
        )
        .expect("pool should open");
        (dir, pool)
    }

    fn table_exists(pool: &DbPool, table: &str) -> bool {
        let conn = pool.get().expect("should acquire");
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    fn user_columns(pool: &DbPool) -> Vec<String> {
        let conn = pool.get().expect("should acquire");
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info('users') ORDER BY cid")
            .expect("should prepare");
        let columns = stmt
            .query_map([], |row| row.get(0))
            .expect("should query")
            .collect::<Result<Vec<String>, _>>()
            .expect("should collect");
        columns
    }

    #[test]
    fn applies_in_order_from_zero() {
        let (_dir, pool) = test_pool();
        let runner = MigrationRunner::new(&pool, USERS_AND_ROLE).expect("registry is valid");
        assert_eq!(runner.current_version().expect("should read version"), 0);

        let report = runner.run_migrations(None).expect("migrations should succeed");
        assert_eq!(report.steps, vec![1, 2]);
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, 2);
        assert_eq!(runner.current_version().expect("should read version"), 2);
        assert_eq!(user_columns(&pool), vec!["id", "email", "role"]);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let (_dir, pool) = test_pool();
        let runner = MigrationRunner::new(&pool, USERS_AND_ROLE).expect("registry is valid");
        runner.run_migrations(None).expect("first run should succeed");
        let before = runner.status().expect("should read status");

        let report = runner.run_migrations(None).expect("second run should succeed");
        assert!(report.steps.is_empty());
        assert_eq!(report.from_version, 2);
        assert_eq!(report.to_version, 2);
        assert_eq!(runner.status().expect("should read status"), before);
    }

    #[test]
    fn stops_at_requested_target() {
        let (_dir, pool) = test_pool();
        let runner = MigrationRunner::new(&pool, USERS_AND_ROLE).expect("registry is valid");
        let report = runner.run_migrations(Some(1)).expect("run should succeed");
        assert_eq!(report.steps, vec![1]);
        assert_eq!(user_columns(&pool), vec!["id", "email"]);

        let err = runner
            .run_migrations(Some(9))
            .expect_err("target beyond registry should fail");
        assert!(matches!(
            err,
            MigrationError::UnknownTarget { target: 9, latest: 2 }
        ));
    }

    #[test]
    fn rollback_runs_newest_first() {
        let (_dir, pool) = test_pool();
        let runner = MigrationRunner::new(&pool, USERS_AND_ROLE).expect("registry is valid");
        runner.run_migrations(None).expect("run should succeed");

        let report = runner.rollback_migrations(1).expect("rollback should succeed");
        assert_eq!(report.steps, vec![2]);
        assert_eq!(user_columns(&pool), vec!["id", "email"]);

        let report = runner.rollback_migrations(0).expect("rollback should succeed");
        assert_eq!(report.steps, vec![1]);
        assert_eq!(report.to_version, 0);
        assert!(!table_exists(&pool, "users"));
        assert_eq!(runner.current_version().expect("should read version"), 0);
    }

    #[test]
    fn rollback_then_run_restores_schema() {
        let (_dir, pool) = test_pool();
        let runner = MigrationRunner::new(&pool, USERS_AND_ROLE).expect("registry is valid");
        runner.run_migrations(None).expect("run should succeed");
        let columns = user_columns(&pool);

        runner.rollback_migrations(0).expect("rollback should succeed");
        let report = runner.run_migrations(None).expect("rerun should succeed");
        assert_eq!(report.steps, vec![1, 2]);
        assert_eq!(user_columns(&pool), columns);
    }

    #[test]
    fn failing_step_is_rolled_back_and_reported() {
        let broken: &[Migration] = &[
            USERS_AND_ROLE[0],
            Migration {
                version: 2,
                name: "half_applied",
                up: "CREATE TABLE audit (id INTEGER PRIMARY KEY);
                     INSERT INTO missing_table VALUES (1);",
                down: "DROP TABLE audit;",
            },
            Migration {
                version: 3,
                name: "never_reached",
                up: "CREATE TABLE later (id INTEGER PRIMARY KEY);",
                down: "DROP TABLE later;",
            },
        ];
        let (_dir, pool) = test_pool();
        let runner = MigrationRunner::new(&pool, broken).expect("registry is valid");

        let err = runner
            .run_migrations(None)
            .expect_err("second migration should fail");
        assert_eq!(err.version(), Some(2));
        assert_eq!(err.direction(), Some(Direction::Up));
        assert!(err.to_string().starts_with("migration 2 (up) failed"));

        assert_eq!(runner.current_version().expect("should read version"), 1);
        assert!(!table_exists(&pool, "audit"));
        assert!(!table_exists(&pool, "later"));
        let status = runner.status().expect("should read status");
        assert!(status[0].applied_at.is_some());
        assert!(status[1].applied_at.is_none());
        assert!(status[2].applied_at.is_none());
    }

    #[test]
    fn rollback_refuses_unregistered_versions() {
        let (_dir, pool) = test_pool();
        MigrationRunner::new(&pool, USERS_AND_ROLE)
            .expect("registry is valid")
            .run_migrations(None)
            .expect("run should succeed");

        let shorter = MigrationRunner::new(&pool, &USERS_AND_ROLE[..1]).expect("registry is valid");
        let err = shorter
            .rollback_migrations(0)
            .expect_err("version 2 has no backward script here");
        assert!(matches!(err, MigrationError::Unregistered(2)));
        assert_eq!(shorter.current_version().expect("should read version"), 2);

        let status = shorter.status().expect("should read status");
        assert_eq!(status.len(), 2);
        assert!(status[1].orphaned);
        assert_eq!(status[1].name, "user_role");
    }

    #[test]
    fn registry_must_ascend() {
        let (_dir, pool) = test_pool();
        let reversed = [USERS_AND_ROLE[1], USERS_AND_ROLE[0]];
        assert!(matches!(
            MigrationRunner::new(&pool, &reversed),
            Err(MigrationError::Registry(_))
        ));

        let zero = [Migration {
            version: 0,
            ..USERS_AND_ROLE[0]
        }];
        assert!(matches!(
            MigrationRunner::new(&pool, &zero),
            Err(MigrationError::Registry(_))
        ));
    }

    #[test]
    fn embedded_registry_round_trips() {
        let (_dir, pool) = test_pool();
        let report = run_migrations(&pool).expect("embedded migrations should apply");
        assert_eq!(report.to_version, 7);
        for table in [
            "users",
            "podcasts",
            "episodes",
            "transcripts",
            "marketing_content",
            "social_media_posts",
            "analytics",
        ] {
            assert!(table_exists(&pool, table), "{table} should exist");
        }

        let runner = MigrationRunner::new(&pool, MIGRATIONS).expect("registry is valid");
        let report = runner.rollback_migrations(0).expect("full rollback should succeed");
        assert_eq!(report.steps, vec![7, 6, 5, 4, 3, 2, 1]);
        assert!(!table_exists(&pool, "users"));
    }
}
