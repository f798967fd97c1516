//! Core domain types for Vigil.
//!
//! This module defines the fundamental types used throughout the system:
//! - User identities
//! - Event records (sins and prayers)
//! - Saved verses and their natural key
//! - The epoch timestamp representation used at the store boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

// ============================================================================
// Identity
// ============================================================================

/// The authenticated user as reported by the auth provider
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

// ============================================================================
// Event Records
// ============================================================================

/// Kind of logged event
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sin,
    Prayer,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Sin, EventKind::Prayer];

    /// Name of the per-user collection holding this kind of event
    pub fn collection(self) -> Collection {
        match self {
            EventKind::Sin => Collection::Sins,
            EventKind::Prayer => Collection::Prayers,
        }
    }

    /// Singular or plural label for a count, e.g. "1 sin", "3 prayers"
    pub fn label(self, count: u32) -> &'static str {
        match (self, count) {
            (EventKind::Sin, 1) => "sin",
            (EventKind::Sin, _) => "sins",
            (EventKind::Prayer, 1) => "prayer",
            (EventKind::Prayer, _) => "prayers",
        }
    }
}

/// A logged sin or prayer.
///
/// `created_at` is `None` when the stored timestamp was missing or could not
/// be represented; such records are kept but never counted by the calendar.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub id: Uuid,
    pub user_id: String,
    pub kind: EventKind,
    pub title: Option<String>,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields of an event record before the store assigns its id
#[derive(Clone, Debug)]
pub struct EventDraft {
    pub kind: EventKind,
    pub title: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Saved Verses
// ============================================================================

/// Natural key of a verse: (book, chapter, verse number)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerseKey {
    pub book: String,
    pub chapter: u32,
    #[serde(rename = "verse_number")]
    pub verse: u32,
}

impl VerseKey {
    /// Build a key, rejecting empty books and zero chapter/verse numbers
    pub fn new(book: impl Into<String>, chapter: u32, verse: u32) -> Result<Self> {
        let book = book.into();
        if book.trim().is_empty() {
            return Err(Error::InvalidInput("book name is empty".into()));
        }
        if chapter == 0 {
            return Err(Error::InvalidInput(format!("{} chapter must be >= 1", book)));
        }
        if verse == 0 {
            return Err(Error::InvalidInput(format!(
                "{} {} verse must be >= 1",
                book, chapter
            )));
        }
        Ok(Self {
            book,
            chapter,
            verse,
        })
    }
}

impl fmt::Display for VerseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse)
    }
}

/// A bookmarked verse
#[derive(Clone, Debug, PartialEq)]
pub struct SavedVerse {
    pub id: Uuid,
    pub key: VerseKey,
    pub verse_text: String,
    pub saved_at: DateTime<Utc>,
}

/// Fields of a saved verse before the store assigns its id
#[derive(Clone, Debug)]
pub struct VerseDraft {
    pub key: VerseKey,
    pub verse_text: String,
    pub saved_at: DateTime<Utc>,
}

// ============================================================================
// Store Boundary
// ============================================================================

/// Per-user collections exposed by the document store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Sins,
    Prayers,
    SavedVerses,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Sins => "sins",
            Collection::Prayers => "prayers",
            Collection::SavedVerses => "savedVerses",
        }
    }
}

/// Seconds-based epoch timestamp as persisted by the document store
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredTimestamp {
    pub seconds: i64,
    #[serde(default)]
    pub nanoseconds: u32,
}

impl StoredTimestamp {
    /// Convert to the canonical timestamp type; `None` if out of range
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds)
    }
}

impl From<DateTime<Utc>> for StoredTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}
