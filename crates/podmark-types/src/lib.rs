//! Shared domain enums for the podmark platform.
//!
//! Every enum here is persisted as its canonical upper-case label (the same
//! string used on the wire), so `as_str` and `FromStr` must stay inverse to
//! each other. The database layer relies on that to map columns without a
//! lookup table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a stored or submitted label does not name a variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: {value}")]
pub struct ParseEnumError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    /// Full administrative access.
    Admin,
    /// Owns podcasts and their content.
    Creator,
    /// Edits content on podcasts they were invited to.
    Collaborator,
    /// Read-only access.
    Viewer,
}

impl UserRole {
    /// Returns the canonical label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Creator => "CREATOR",
            Self::Collaborator => "COLLABORATOR",
            Self::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "CREATOR" => Ok(Self::Creator),
            "COLLABORATOR" => Ok(Self::Collaborator),
            "VIEWER" => Ok(Self::Viewer),
            _ => Err(ParseEnumError::new("user role", s)),
        }
    }
}

/// Publication lifecycle of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeStatus {
    /// Not yet published.
    Draft,
    /// Queued for future publication.
    Scheduled,
    /// Available to listeners.
    Published,
    /// No longer actively promoted.
    Archived,
}

impl EpisodeStatus {
    /// Returns the canonical label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::Published => "PUBLISHED",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "SCHEDULED" => Ok(Self::Scheduled),
            "PUBLISHED" => Ok(Self::Published),
            "ARCHIVED" => Ok(Self::Archived),
            _ => Err(ParseEnumError::new("episode status", s)),
        }
    }
}

/// Lifecycle of a piece of generated marketing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketingContentStatus {
    /// Being drafted or edited.
    Draft,
    /// Waiting for its publish slot.
    Scheduled,
    /// Posted to its platform.
    Published,
    /// Retired.
    Archived,
}

impl MarketingContentStatus {
    /// Returns the canonical label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::Published => "PUBLISHED",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for MarketingContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketingContentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "SCHEDULED" => Ok(Self::Scheduled),
            "PUBLISHED" => Ok(Self::Published),
            "ARCHIVED" => Ok(Self::Archived),
            _ => Err(ParseEnumError::new("marketing content status", s)),
        }
    }
}

/// Social networks marketing content can be posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SocialPlatform {
    Facebook,
    Twitter,
    Linkedin,
    Instagram,
}

impl SocialPlatform {
    /// Returns the canonical label for this platform.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Facebook => "FACEBOOK",
            Self::Twitter => "TWITTER",
            Self::Linkedin => "LINKEDIN",
            Self::Instagram => "INSTAGRAM",
        }
    }

    /// Human-readable platform name.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Facebook => "Facebook",
            Self::Twitter => "Twitter",
            Self::Linkedin => "LinkedIn",
            Self::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialPlatform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FACEBOOK" => Ok(Self::Facebook),
            "TWITTER" => Ok(Self::Twitter),
            "LINKEDIN" => Ok(Self::Linkedin),
            "INSTAGRAM" => Ok(Self::Instagram),
            _ => Err(ParseEnumError::new("social platform", s)),
        }
    }
}
