use chrono::{DateTime, Utc};
use podmark_types::UserRole;
use serde::Serialize;

use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::TableSchema;
use crate::record::{GeneratedKey, Record, Row};

/// A platform account.
///
/// Serializes without the password hash. Not deserializable: records are
/// only rebuilt from their rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    id: Option<i64>,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Key assigned by the first save; `None` until then.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// An unsaved user stamped with the current time.
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            email: email.into(),
            password_hash: password_hash.into(),
            role,
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks a user up by email address.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    pub fn find_by_email(pool: &DbPool, email: &str) -> Result<Option<Self>, DbError> {
        let query = Self::query().where_eq("email", email).limit(1);
        Ok(Self::find(pool, query)?.into_iter().next())
    }
}

impl Record for User {
    const SCHEMA: TableSchema = TableSchema::new(
        "users",
        &["id", "email", "password_hash", "role", "created_at", "updated_at"],
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
            .with("email", &self.email)
            .with("password_hash", &self.password_hash)
            .with("role", &self.role)
            .with("created_at", &self.created_at)
            .with("updated_at", &self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            role: row.get("role")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
