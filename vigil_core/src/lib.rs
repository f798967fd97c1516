#![forbid(unsafe_code)]

//! Core domain model and business logic for Vigil.
//!
//! This crate provides:
//! - Domain types (event records, saved verses, identities)
//! - Activity aggregation into monthly calendars
//! - Saved-verse bookmark management
//! - Persistence (document store backends)
//! - Bible book catalog and chapter provider

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod auth;
pub mod store;
pub mod activity;
pub mod bookmarks;
pub mod journal;
pub mod bible;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use auth::{AuthProvider, AuthSession, Subscription};
pub use store::{DocumentStore, JsonlStore, MemoryStore, TimedStore};
pub use activity::{ActivityCalendar, ActivityIndex, CalendarState, DayBucket, Month, MonthView};
pub use bookmarks::{BookmarkManager, ToggleOutcome, UnsaveTarget};
pub use journal::{log_prayer, log_sin, MajorSin};
pub use bible::{BibleApiClient, BibleSource, Book, Chapter, Verse};
