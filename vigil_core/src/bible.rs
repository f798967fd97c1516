//! Bible book catalog and the chapter text provider.
//!
//! Chapter text comes from a public JSON API (bible-api.com by default).
//! Book names and chapter numbers are checked against the built-in catalog
//! before any request goes out.

use crate::config::BibleConfig;
use crate::{Error, Result, VerseKey};
use once_cell::sync::Lazy;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// A book of the bible with its chapter count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Book {
    pub name: &'static str,
    pub chapters: u32,
}

const fn book(name: &'static str, chapters: u32) -> Book {
    Book { name, chapters }
}

/// The 66 books in canonical order
pub static BOOKS: [Book; 66] = [
    book("Genesis", 50),
    book("Exodus", 40),
    book("Leviticus", 27),
    book("Numbers", 36),
    book("Deuteronomy", 34),
    book("Joshua", 24),
    book("Judges", 21),
    book("Ruth", 4),
    book("1 Samuel", 31),
    book("2 Samuel", 24),
    book("1 Kings", 22),
    book("2 Kings", 25),
    book("1 Chronicles", 29),
    book("2 Chronicles", 36),
    book("Ezra", 10),
    book("Nehemiah", 13),
    book("Esther", 10),
    book("Job", 42),
    book("Psalms", 150),
    book("Proverbs", 31),
    book("Ecclesiastes", 12),
    book("Song of Solomon", 8),
    book("Isaiah", 66),
    book("Jeremiah", 52),
    book("Lamentations", 5),
    book("Ezekiel", 48),
    book("Daniel", 12),
    book("Hosea", 14),
    book("Joel", 3),
    book("Amos", 9),
    book("Obadiah", 1),
    book("Jonah", 4),
    book("Micah", 7),
    book("Nahum", 3),
    book("Habakkuk", 3),
    book("Zephaniah", 3),
    book("Haggai", 2),
    book("Zechariah", 14),
    book("Malachi", 4),
    book("Matthew", 28),
    book("Mark", 16),
    book("Luke", 24),
    book("John", 21),
    book("Acts", 28),
    book("Romans", 16),
    book("1 Corinthians", 16),
    book("2 Corinthians", 13),
    book("Galatians", 6),
    book("Ephesians", 6),
    book("Philippians", 4),
    book("Colossians", 4),
    book("1 Thessalonians", 5),
    book("2 Thessalonians", 3),
    book("1 Timothy", 6),
    book("2 Timothy", 4),
    book("Titus", 3),
    book("Philemon", 1),
    book("Hebrews", 13),
    book("James", 5),
    book("1 Peter", 5),
    book("2 Peter", 3),
    book("1 John", 5),
    book("2 John", 1),
    book("3 John", 1),
    book("Jude", 1),
    book("Revelation", 22),
];

/// Lowercased name → book, built once
static BOOK_INDEX: Lazy<HashMap<String, Book>> =
    Lazy::new(|| BOOKS.iter().map(|b| (b.name.to_lowercase(), *b)).collect());

/// Case-insensitive book lookup
pub fn find_book(name: &str) -> Option<Book> {
    BOOK_INDEX.get(&name.trim().to_lowercase()).copied()
}

/// Resolve a book name and check the chapter exists
pub fn validate_reference(book: &str, chapter: u32) -> Result<Book> {
    let found = find_book(book).ok_or_else(|| Error::InvalidInput(format!("unknown book: {}", book)))?;
    if chapter == 0 || chapter > found.chapters {
        return Err(Error::InvalidInput(format!(
            "{} has chapters 1-{}, got {}",
            found.name, found.chapters, chapter
        )));
    }
    Ok(found)
}

// ============================================================================
// Chapters
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verse {
    pub number: u32,
    pub text: String,
}

/// The verses of one chapter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chapter {
    pub book: String,
    pub chapter: u32,
    pub translation: Option<String>,
    pub verses: Vec<Verse>,
}

impl Chapter {
    pub fn verse(&self, number: u32) -> Option<&Verse> {
        self.verses.iter().find(|v| v.number == number)
    }

    pub fn key(&self, number: u32) -> VerseKey {
        VerseKey {
            book: self.book.clone(),
            chapter: self.chapter,
            verse: number,
        }
    }
}

/// Read-only source of chapter text
pub trait BibleSource {
    fn chapter(&self, book: &str, chapter: u32) -> Result<Chapter>;
}

#[derive(Debug, Deserialize)]
struct ApiVerse {
    verse: u32,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiChapter {
    #[serde(default)]
    verses: Option<Vec<ApiVerse>>,
    #[serde(default)]
    translation_id: Option<String>,
}

/// Parse an API response body for `book chapter`
pub fn parse_chapter(book: &str, chapter: u32, body: &str) -> Result<Chapter> {
    let parsed: ApiChapter = serde_json::from_str(body)
        .map_err(|e| Error::Fetch(format!("unexpected bible API response: {}", e)))?;

    let verses: Vec<Verse> = parsed
        .verses
        .unwrap_or_default()
        .into_iter()
        .map(|v| Verse {
            number: v.verse,
            text: v.text.trim().to_string(),
        })
        .collect();

    if verses.is_empty() {
        return Err(Error::Fetch("No verses found".into()));
    }

    Ok(Chapter {
        book: book.to_string(),
        chapter,
        translation: parsed.translation_id,
        verses,
    })
}

/// HTTP client for bible-api.com style endpoints (`{base}/{book}+{chapter}`)
pub struct BibleApiClient {
    client: reqwest::blocking::Client,
    base_url: Url,
    translation: Option<String>,
}

impl BibleApiClient {
    pub fn new(config: &BibleConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid bible.base_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "bible.base_url cannot hold a path: {}",
                config.base_url
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            translation: config.translation.clone(),
        })
    }

    /// Request URL for a chapter
    pub fn chapter_url(&self, book: &str, chapter: u32) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&format!("{}+{}", book, chapter));
        }
        if let Some(translation) = &self.translation {
            url.query_pairs_mut().append_pair("translation", translation);
        }
        url
    }
}

impl BibleSource for BibleApiClient {
    fn chapter(&self, book: &str, chapter: u32) -> Result<Chapter> {
        let found = validate_reference(book, chapter)?;
        let url = self.chapter_url(found.name, chapter);
        tracing::debug!("Fetching {}", url);

        let response = self.client.get(url).send()?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::Fetch("No verses found".into()));
        }
        if !status.is_success() {
            return Err(Error::Fetch(format!("bible API returned {}", status)));
        }

        let body = response.text()?;
        let parsed = parse_chapter(found.name, chapter, &body)?;
        tracing::info!(
            "Fetched {} {} ({} verses)",
            parsed.book,
            parsed.chapter,
            parsed.verses.len()
        );
        Ok(parsed)
    }
}
