use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{Order, TableSchema};
use crate::record::{FieldValue, GeneratedKey, Record, Row};

/// Engagement counters for one episode on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analytics {
    #[serde(skip_deserializing)]
    id: Option<i64>,
    pub episode_id: i64,
    pub downloads: i64,
    pub likes: i64,
    pub shares: i64,
    pub comments: i64,
    pub date: NaiveDate,
}

/// Counters summed over many days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsTotals {
    pub downloads: i64,
    pub likes: i64,
    pub shares: i64,
    pub comments: i64,
    /// Number of daily rows summed.
    pub days: i64,
}

impl Analytics {
    /// Primary key, if saved.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// An unsaved, all-zero row for `episode_id` on `date`.
    pub fn new(episode_id: i64, date: NaiveDate) -> Self {
        Self {
            id: None,
            episode_id,
            downloads: 0,
            likes: 0,
            shares: 0,
            comments: 0,
            date,
        }
    }

    /// Daily rows for `episode_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn for_episode(pool: &DbPool, episode_id: i64) -> Result<Vec<Self>, DbError> {
        let query = Self::query()
            .where_eq("episode_id", episode_id)
            .order_by("date", Order::Asc);
        Self::find(pool, query)
    }

    /// Rows dated within `start..=end`, across all episodes.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn in_date_range(
        pool: &DbPool,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Self>, DbError> {
        let query = Self::query()
            .filter("date BETWEEN ? AND ?", [start.to_value(), end.to_value()])
            .order_by("date", Order::Asc)
            .order_by("episode_id", Order::Asc);
        Self::find(pool, query)
    }

    /// Sums every daily row of `episode_id`, saturating at `i64::MAX`.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn totals_for_episode(pool: &DbPool, episode_id: i64) -> Result<AnalyticsTotals, DbError> {
        Ok(Self::for_episode(pool, episode_id)?
            .iter()
            .fold(AnalyticsTotals::default(), |mut totals, day| {
                totals.downloads = totals.downloads.saturating_add(day.downloads);
                totals.likes = totals.likes.saturating_add(day.likes);
                totals.shares = totals.shares.saturating_add(day.shares);
                totals.comments = totals.comments.saturating_add(day.comments);
                totals.days = totals.days.saturating_add(1);
                totals
            }))
    }
}

impl Record for Analytics {
    const SCHEMA: TableSchema = TableSchema::new(
        "analytics",
        &["id", "episode_id", "downloads", "likes", "shares", "comments", "date"],
        "id",
    );

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn assign_primary_key(&mut self, key: GeneratedKey) {
        self.id = Some(key.get());
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", &self.id)
            .with("episode_id", &self.episode_id)
            .with("downloads", &self.downloads)
            .with("likes", &self.likes)
            .with("shares", &self.shares)
            .with("comments", &self.comments)
            .with("date", &self.date)
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get("id")?,
            episode_id: row.get("episode_id")?,
            downloads: row.get("downloads")?,
            likes: row.get("likes")?,
            shares: row.get("shares")?,
            comments: row.get("comments")?,
            date: row.get("date")?,
        })
    }
}
