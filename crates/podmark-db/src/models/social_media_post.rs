use chrono::{DateTime, Utc};
use podmark_types::{MarketingContentStatus, SocialPlatform};
use serde::{Deserialize, Serialize};

use super::require_key;
use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{Order, TableSchema};
use crate::record::{GeneratedKey, Record, Row};

/// A scheduled or published post derived from marketing content.
///
/// `post_id` is the identifier the platform returned once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialMediaPost {
    #[serde(skip_deserializing)]
    id: Option<i64>,
    pub marketing_content_id: i64,
    pub platform: SocialPlatform,
    pub content: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub post_id: Option<String>,
    pub status: MarketingContentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SocialMediaPost {
    /// Key assigned by the first save; `None` until then.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn new(
        marketing_content_id: i64,
        platform: SocialPlatform,
        content: impl Into<String>,
        scheduled_time: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        let status = if scheduled_time.is_some() {
            MarketingContentStatus::Scheduled
        } else {
            MarketingContentStatus::Draft
        };
        Self {
            id: None,
            marketing_content_id,
            platform,
            content: content.into(),
            scheduled_time,
            post_id: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Posts derived from `marketing_content_id`, earliest slot first.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn for_marketing_content(
        pool: &DbPool,
        marketing_content_id: i64,
    ) -> Result<Vec<Self>, DbError> {
        let query = Self::query()
            .where_eq("marketing_content_id", marketing_content_id)
            .order_by("scheduled_time", Order::Asc)
            .order_by("id", Order::Asc);
        Self::find(pool, query)
    }

    /// Moves the post to `status` and saves.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for an unsaved post, plus save errors.
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

    /// Records the platform's identifier, marks the post published, and saves.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` for an unsaved post, plus save errors.
    pub fn mark_published(
        &mut self,
        pool: &DbPool,
        post_id: impl Into<String>,
    ) -> Result<(), DbError> {
        require_key(self, "publish")?;
        self.post_id = Some(post_id.into());
        self.status = MarketingContentStatus::Published;
        self.updated_at = Utc::now();
        self.save(pool)
    }
}

impl Record for SocialMediaPost {
    const SCHEMA: TableSchema = TableSchema::new(
        "social_media_posts",
        &[
            "id",
            "marketing_content_id",
            "platform",
            "content",
            "scheduled_time",
            "post_id",
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
            .with("marketing_content_id", &self.marketing_content_id)
            .with("platform", &self.platform)
            .with("content", &self.content)
            .with("scheduled_time", &self.scheduled_time)
            .with("post_id", &self.post_id)
            .with("status", &self.status)
            .with("created_at", &self.created_at)
            .with("updated_at", &self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get("id")?,
            marketing_content_id: row.get("marketing_content_id")?,
            platform: row.get("platform")?,
            content: row.get("content")?,
            scheduled_time: row.get("scheduled_time")?,
            post_id: row.get("post_id")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
