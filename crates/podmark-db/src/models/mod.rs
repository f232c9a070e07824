//! Entity mappings for the podmark schema.
//!
//! Each entity is a plain struct implementing [`Record`]; the lookups here
//! are thin wrappers over [`Record::find`] with a fixed filter and order.
//! Mutating helpers stamp `updated_at` and save in one call, and refuse to
//! run on records that were never saved.

mod analytics;
mod episode;
mod marketing_content;
mod podcast;
mod social_media_post;
mod transcript;
mod user;

pub use analytics::{Analytics, AnalyticsTotals};
pub use episode::Episode;
pub use marketing_content::MarketingContent;
pub use podcast::Podcast;
pub use social_media_post::SocialMediaPost;
pub use transcript::Transcript;
pub use user::User;

use crate::error::DbError;
use crate::record::Record;

fn require_key<R: Record>(record: &R, action: &str) -> Result<i64, DbError> {
    record.primary_key().ok_or_else(|| {
        DbError::InvalidState(format!(
            "cannot {action} a `{}` record that was never saved",
            R::SCHEMA.table
        ))
    })
}
