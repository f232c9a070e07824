use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::require_key;
use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{Order, TableSchema};
use crate::record::{GeneratedKey, Record, Row};

/// Transcribed text of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(skip_deserializing)]
    id: Option<i64>,
    pub episode_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    /// Primary key, if saved.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn new(episode_id: i64, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            episode_id,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The latest transcript of `episode_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn for_episode(pool: &DbPool, episode_id: i64) -> Result<Option<Self>, DbError> {
        let query = Self::query()
            .where_eq("episode_id", episode_id)
            .order_by("id", Order::Desc)
            .limit(1);
        Ok(Self::find(pool, query)?.into_iter().next())
    }

    /// Replaces the text and saves.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for an unsaved transcript, plus save errors.
    pub fn update_content(
        &mut self,
        pool: &DbPool,
        content: impl Into<String>,
    ) -> Result<(), DbError> {
        require_key(self, "update")?;
        self.content = content.into();
        self.updated_at = Utc::now();
        self.save(pool)
    }
}

impl Record for Transcript {
    const SCHEMA: TableSchema = TableSchema::new(
        "transcripts",
        &["id", "episode_id", "content", "created_at", "updated_at"],
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
            .with("content", &self.content)
            .with("created_at", &self.created_at)
            .with("updated_at", &self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get("id")?,
            episode_id: row.get("episode_id")?,
            content: row.get("content")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
