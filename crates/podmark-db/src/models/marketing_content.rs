use chrono::{DateTime, Utc};
use podmark_types::{MarketingContentStatus, SocialPlatform};
use serde::{Deserialize, Serialize};

use super::require_key;
use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{Order, TableSchema};
use crate::record::{GeneratedKey, Record, Row};

/// Promotional copy generated for one episode and platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketingContent {
    #[serde(skip_deserializing)]
    id: Option<i64>,
    pub episode_id: i64,
    pub platform: SocialPlatform,
    pub content: String,
    pub status: MarketingContentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MarketingContent {
    /// Key assigned by the first save; `None` until then.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// An unsaved draft stamped with the current time.
    pub fn new(episode_id: i64, platform: SocialPlatform, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            episode_id,
            platform,
            content: content.into(),
            status: MarketingContentStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// All content generated for `episode_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn for_episode(pool: &DbPool, episode_id: i64) -> Result<Vec<Self>, DbError> {
        let query = Self::query()
            .where_eq("episode_id", episode_id)
            .order_by("id", Order::Asc);
        Self::find(pool, query)
    }

    /// Replaces the copy and saves.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for unsaved content, plus save errors.
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

    /// Moves the content to `status` and saves.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for unsaved content, plus save errors.
    pub fn update_status(
        &mut self,
        pool: &DbPool,
        status: MarketingContentStatus,
    ) -> Result<(), DbError> {
        require_key(self, "update")?;
        self.status = status;
        self.updated_at = Utc::now();
        self.save(pool)
    }
}

impl Record for MarketingContent {
    const SCHEMA: TableSchema = TableSchema::new(
        "marketing_content",
        &[
            "id",
            "episode_id",
            "platform",
            "content",
            "status",
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
            .with("episode_id", &self.episode_id)
            .with("platform", &self.platform)
            .with("content", &self.content)
            .with("status", &self.status)
            .with("created_at", &self.created_at)
            .with("updated_at", &self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get("id")?,
            episode_id: row.get("episode_id")?,
            platform: row.get("platform")?,
            content: row.get("content")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
