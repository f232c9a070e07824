use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_key, Episode};
use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{Order, TableSchema};
use crate::record::{GeneratedKey, Record, Row};

/// A podcast show owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    #[serde(skip_deserializing)]
    id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub cover_image_url: Option<String>,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Podcast {
    /// Key assigned by the first save; `None` until then.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// An unsaved podcast stamped with the current time.
    pub fn new(user_id: i64, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            title: title.into(),
            description: None,
            cover_image_url: None,
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Podcasts owned by `user_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn for_user(pool: &DbPool, user_id: i64) -> Result<Vec<Self>, DbError> {
        let query = Self::query()
            .where_eq("user_id", user_id)
            .order_by("id", Order::Asc);
        Self::find(pool, query)
    }

    /// This podcast's episodes, newest publish date first.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for an unsaved podcast.
    pub fn episodes(&self, pool: &DbPool) -> Result<Vec<Episode>, DbError> {
        Episode::for_podcast(pool, require_key(self, "list episodes of")?)
    }

    /// Number of episodes attached to this podcast.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for an unsaved podcast.
    pub fn episode_count(&self, pool: &DbPool) -> Result<i64, DbError> {
        let key = require_key(self, "count episodes of")?;
        Episode::count(pool, Episode::query().where_eq("podcast_id", key))
    }

    /// Replaces the cover image and saves.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for an unsaved podcast, plus save errors.
    pub fn update_cover_image(
        &mut self,
        pool: &DbPool,
        url: impl Into<String>,
    ) -> Result<(), DbError> {
        require_key(self, "update")?;
        self.cover_image_url = Some(url.into());
        self.updated_at = Utc::now();
        self.save(pool)
    }
}

impl Record for Podcast {
    const SCHEMA: TableSchema = TableSchema::new(
        "podcasts",
        &[
            "id",
            "title",
            "description",
            "cover_image_url",
            "user_id",
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
            .with("title", &self.title)
            .with("description", &self.description)
            .with("cover_image_url", &self.cover_image_url)
            .with("user_id", &self.user_id)
            .with("created_at", &self.created_at)
            .with("updated_at", &self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            cover_image_url: row.get("cover_image_url")?,
            user_id: row.get("user_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
