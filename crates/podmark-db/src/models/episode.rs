use chrono::{DateTime, Utc};
use podmark_types::EpisodeStatus;
use serde::{Deserialize, Serialize};

use super::require_key;
use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{Order, TableSchema};
use crate::record::{GeneratedKey, Record, Row};

/// One episode of a podcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(skip_deserializing)]
    id: Option<i64>,
    pub podcast_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub audio_file_url: String,
    pub status: EpisodeStatus,
    pub publish_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// Key assigned by the first save; `None` until then.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// An unsaved draft episode stamped with the current time.
    pub fn new(
        podcast_id: i64,
        title: impl Into<String>,
        audio_file_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            podcast_id,
            title: title.into(),
            description: None,
            audio_file_url: audio_file_url.into(),
            status: EpisodeStatus::Draft,
            publish_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Episodes of `podcast_id`, newest publish date first. Unpublished
    /// episodes (no date) come last.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn for_podcast(pool: &DbPool, podcast_id: i64) -> Result<Vec<Self>, DbError> {
        let query = Self::query()
            .where_eq("podcast_id", podcast_id)
            .order_by("publish_date", Order::Desc)
            .order_by("id", Order::Desc);
        Self::find(pool, query)
    }

    /// The `limit` most recently published episodes across all podcasts.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn recent(pool: &DbPool, limit: u32) -> Result<Vec<Self>, DbError> {
        let query = Self::query()
            .filter("publish_date IS NOT NULL", std::iter::empty::<i64>())
            .order_by("publish_date", Order::Desc)
            .limit(limit);
        Self::find(pool, query)
    }

    /// Moves the episode to `status` and saves.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for an unsaved episode, plus save errors.
    pub fn update_status(&mut self, pool: &DbPool, status: EpisodeStatus) -> Result<(), DbError> {
        require_key(self, "update")?;
        self.status = status;
        self.updated_at = Utc::now();
        self.save(pool)
    }
}

impl Record for Episode {
    const SCHEMA: TableSchema = TableSchema::new(
        "episodes",
        &[
            "id",
            "podcast_id",
            "title",
            "description",
            "audio_file_url",
            "status",
            "publish_date",
            "created_at",
            "updated_at",
        ],
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
            .with("podcast_id", &self.podcast_id)
            .with("title", &self.title)
            .with("description", &self.description)
            .with("audio_file_url", &self.audio_file_url)
            .with("status", &self.status)
            .with("publish_date", &self.publish_date)
            .with("created_at", &self.created_at)
            .with("updated_at", &self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get("id")?,
            podcast_id: row.get("podcast_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            audio_file_url: row.get("audio_file_url")?,
            status: row.get("status")?,
            publish_date: row.get("publish_date")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
