//! Document store seam and its backends.
//!
//! The store exposes per-user collections (`sins`, `prayers`, `savedVerses`)
//! with append, bulk read by owner and delete by id. There are no
//! transactions; uniqueness of saved verses is the caller's job.
//!
//! Timestamps cross this boundary as [`StoredTimestamp`] epoch values and are
//! converted to `DateTime<Utc>` on the way in.

use crate::{
    Collection, Error, EventDraft, EventKind, EventRecord, Result, SavedVerse, StoredTimestamp,
    VerseDraft, VerseKey,
};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Per-user document collections
pub trait DocumentStore: Send + Sync {
    fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord>;

    fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>>;

    fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse>;

    /// All saved verses for the user, in save order
    fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>>;

    /// Returns `false` when no document had that id
    fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        (**self).append_event(user_id, draft)
    }

    fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>> {
        (**self).list_events(user_id, kind)
    }

    fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse> {
        (**self).append_verse(user_id, draft)
    }

    fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>> {
        (**self).list_verses(user_id)
    }

    fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool> {
        (**self).delete_verse(user_id, id)
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for &S {
    fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        (**self).append_event(user_id, draft)
    }

    fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>> {
        (**self).list_events(user_id, kind)
    }

    fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse> {
        (**self).append_verse(user_id, draft)
    }

    fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>> {
        (**self).list_verses(user_id)
    }

    fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool> {
        (**self).delete_verse(user_id, id)
    }
}

/// Map low-level persistence failures onto `Error::Fetch`
fn store_failure(e: Error) -> Error {
    match e {
        Error::Io(e) => Error::Fetch(format!("store I/O failure: {}", e)),
        Error::Json(e) => Error::Fetch(format!("store encoding failure: {}", e)),
        other => other,
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    let valid = !user_id.is_empty()
        && user_id != "."
        && user_id != ".."
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid user id {:?}", user_id)))
    }
}

// ============================================================================
// Stored Rows
// ============================================================================

/// Accept any JSON for a timestamp field; anything unparseable becomes `None`
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<StoredTimestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEvent {
    id: Uuid,
    user_id: String,
    kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    description: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    created_at: Option<StoredTimestamp>,
}

impl From<StoredEvent> for EventRecord {
    fn from(row: StoredEvent) -> Self {
        let created_at = row.created_at.and_then(StoredTimestamp::to_datetime);
        if created_at.is_none() {
            tracing::debug!("Event {} has no usable created_at", row.id);
        }
        EventRecord {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            title: row.title,
            description: row.description,
            created_at,
        }
    }
}

impl From<&EventRecord> for StoredEvent {
    fn from(record: &EventRecord) -> Self {
        StoredEvent {
            id: record.id,
            user_id: record.user_id.clone(),
            kind: record.kind,
            title: record.title.clone(),
            description: record.description.clone(),
            created_at: record.created_at.map(StoredTimestamp::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredVerse {
    id: Uuid,
    book: String,
    chapter: u32,
    verse_number: u32,
    verse_text: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    saved_at: Option<StoredTimestamp>,
}

impl From<StoredVerse> for SavedVerse {
    fn from(row: StoredVerse) -> Self {
        let saved_at = row
            .saved_at
            .and_then(StoredTimestamp::to_datetime)
            .unwrap_or_else(|| {
                tracing::warn!("Saved verse {} has no usable saved_at", row.id);
                DateTime::<Utc>::UNIX_EPOCH
            });
        SavedVerse {
            id: row.id,
            key: VerseKey {
                book: row.book,
                chapter: row.chapter,
                verse: row.verse_number,
            },
            verse_text: row.verse_text,
            saved_at,
        }
    }
}

impl From<&SavedVerse> for StoredVerse {
    fn from(verse: &SavedVerse) -> Self {
        StoredVerse {
            id: verse.id,
            book: verse.key.book.clone(),
            chapter: verse.key.chapter,
            verse_number: verse.key.verse,
            verse_text: verse.verse_text.clone(),
            saved_at: Some(StoredTimestamp::from(verse.saved_at)),
        }
    }
}

fn new_event(user_id: &str, draft: &EventDraft) -> EventRecord {
    EventRecord {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        kind: draft.kind,
        title: draft.title.clone(),
        description: draft.description.clone(),
        created_at: Some(draft.created_at),
    }
}

fn new_verse(draft: &VerseDraft) -> SavedVerse {
    SavedVerse {
        id: Uuid::new_v4(),
        key: draft.key.clone(),
        verse_text: draft.verse_text.clone(),
        saved_at: draft.saved_at,
    }
}

// ============================================================================
// JSON Lines Backend
// ============================================================================

/// File-backed store: one JSON-lines file per user collection.
///
/// Layout: `<root>/users/<uid>/<collection>.jsonl`, guarded by a sibling
/// `<collection>.lock` file (shared for reads, exclusive for writes).
#[derive(Clone, Debug)]
pub struct JsonlStore {
    root: PathBuf,
}

impl JsonlStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn collection_path(&self, user_id: &str, collection: Collection) -> PathBuf {
        self.root
            .join("users")
            .join(user_id)
            .join(format!("{}.jsonl", collection.name()))
    }

    fn open_lock(&self, path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        Ok(file)
    }

    fn append_row<T: Serialize>(&self, path: &Path, row: &T) -> Result<()> {
        let lock = self.open_lock(path)?;
        lock.lock_exclusive()?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(row)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);
        file.sync_data()?;

        lock.unlock()?;
        Ok(())
    }

    fn read_rows<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let lock = self.open_lock(path)?;
        lock.lock_shared()?;

        let mut reader = BufReader::new(File::open(path)?);
        let mut rows = Vec::new();
        let mut buf = Vec::new();
        let mut line_num = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_num += 1;

            let Ok(line) = std::str::from_utf8(&buf) else {
                tracing::warn!("Skipping non-UTF-8 document at {:?} line {}", path, line_num);
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(
                        "Skipping unreadable document at {:?} line {}: {}",
                        path,
                        line_num,
                        e
                    );
                }
            }
        }

        lock.unlock()?;
        Ok(rows)
    }

    /// Rewrite the collection without the document `id`.
    ///
    /// Lines that fail to parse are carried over untouched.
    fn remove_row(&self, path: &Path, id: Uuid) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        let lock = self.open_lock(path)?;
        lock.lock_exclusive()?;

        // Raw bytes, so lines that are not UTF-8 are carried over as-is
        let contents = std::fs::read(path)?;
        let mut kept = Vec::with_capacity(contents.len());
        let mut removed = false;
        for raw in contents.split(|b| *b == b'\n') {
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let matches_id = std::str::from_utf8(raw)
                .ok()
                .and_then(|line| serde_json::from_str::<serde_json::Value>(line).ok())
                .and_then(|v| v.get("id").and_then(|i| i.as_str()).map(str::to_owned))
                .and_then(|s| Uuid::parse_str(&s).ok())
                == Some(id);
            if matches_id {
                removed = true;
                continue;
            }
            kept.extend_from_slice(raw);
            kept.push(b'\n');
        }

        if removed {
            let parent = path.parent().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "collection path missing parent")
            })?;
            let mut temp = NamedTempFile::new_in(parent)?;
            temp.write_all(&kept)?;
            temp.as_file().sync_all()?;
            temp.persist(path).map_err(|e| Error::Io(e.error))?;
        }

        lock.unlock()?;
        Ok(removed)
    }
}

impl DocumentStore for JsonlStore {
    fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        validate_user_id(user_id)?;
        let record = new_event(user_id, draft);
        let path = self.collection_path(user_id, draft.kind.collection());
        self.append_row(&path, &StoredEvent::from(&record))
            .map_err(store_failure)?;
        tracing::debug!("Appended {:?} {} for {}", record.kind, record.id, user_id);
        Ok(record)
    }

    fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>> {
        validate_user_id(user_id)?;
        let path = self.collection_path(user_id, kind.collection());
        let rows: Vec<StoredEvent> = self.read_rows(&path).map_err(store_failure)?;
        tracing::debug!("Read {} {:?} documents for {}", rows.len(), kind, user_id);
        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse> {
        validate_user_id(user_id)?;
        let verse = new_verse(draft);
        let path = self.collection_path(user_id, Collection::SavedVerses);
        self.append_row(&path, &StoredVerse::from(&verse))
            .map_err(store_failure)?;
        tracing::debug!("Saved verse {} ({}) for {}", verse.key, verse.id, user_id);
        Ok(verse)
    }

    fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>> {
        validate_user_id(user_id)?;
        let path = self.collection_path(user_id, Collection::SavedVerses);
        let rows: Vec<StoredVerse> = self.read_rows(&path).map_err(store_failure)?;
        Ok(rows.into_iter().map(SavedVerse::from).collect())
    }

    fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool> {
        validate_user_id(user_id)?;
        let path = self.collection_path(user_id, Collection::SavedVerses);
        let removed = self.remove_row(&path, id).map_err(store_failure)?;
        tracing::debug!("Delete verse {} for {}: removed={}", id, user_id, removed);
        Ok(removed)
    }
}

// ============================================================================
// In-Memory Backend
// ============================================================================

#[derive(Default)]
struct UserDocuments {
    sins: Vec<EventRecord>,
    prayers: Vec<EventRecord>,
    verses: Vec<SavedVerse>,
}

impl UserDocuments {
    fn events_mut(&mut self, kind: EventKind) -> &mut Vec<EventRecord> {
        match kind {
            EventKind::Sin => &mut self.sins,
            EventKind::Prayer => &mut self.prayers,
        }
    }
}

/// Process-local store, mostly for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserDocuments>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserDocuments>> {
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a record as-is, e.g. one imported with a missing timestamp
    pub fn insert_event(&self, record: EventRecord) {
        self.lock()
            .entry(record.user_id.clone())
            .or_default()
            .events_mut(record.kind)
            .push(record);
    }
}

impl DocumentStore for MemoryStore {
    fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        let record = new_event(user_id, draft);
        self.insert_event(record.clone());
        Ok(record)
    }

    fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>> {
        Ok(self
            .lock()
            .get_mut(user_id)
            .map(|docs| docs.events_mut(kind).clone())
            .unwrap_or_default())
    }

    fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse> {
        let verse = new_verse(draft);
        self.lock()
            .entry(user_id.to_string())
            .or_default()
            .verses
            .push(verse.clone());
        Ok(verse)
    }

    fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>> {
        Ok(self
            .lock()
            .get(user_id)
            .map(|docs| docs.verses.clone())
            .unwrap_or_default())
    }

    fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let mut users = self.lock();
        let Some(docs) = users.get_mut(user_id) else {
            return Ok(false);
        };
        let before = docs.verses.len();
        docs.verses.retain(|v| v.id != id);
        Ok(docs.verses.len() != before)
    }
}

// ============================================================================
// Timeout Wrapper
// ============================================================================

/// Runs every operation of the wrapped store on a worker thread and gives up
/// after `timeout`, reporting `Error::Fetch`.
///
/// Operations run one at a time in the order they were issued. A call that
/// times out keeps running in the background and later calls wait for it, so
/// a late write always lands before the next read sees the store.
pub struct TimedStore<S> {
    inner: Arc<S>,
    timeout: Duration,
    /// Closes when the most recently issued operation finishes
    last: Mutex<Option<mpsc::Receiver<()>>>,
}

impl<S: DocumentStore + 'static> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
            last: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let previous = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(done_rx);
        std::thread::Builder::new()
            .name(format!("store-{}", op))
            .spawn(move || {
                if let Some(previous) = previous {
                    // Disconnects once the earlier operation is done
                    let _ = previous.recv();
                }
                // Receiver may be gone after a timeout
                let _ = tx.send(f(&store));
                drop(done_tx);
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Store operation {} timed out after {:?}", op, self.timeout);
                Err(Error::Fetch(format!(
                    "{} timed out after {} ms",
                    op,
                    self.timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!("Store operation {} aborted", op);
                Err(Error::Fetch(format!("{} aborted", op)))
            }
        }
    }
}

impl<S: DocumentStore + 'static> DocumentStore for TimedStore<S> {
    fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord> {
        let (user_id, draft) = (user_id.to_string(), draft.clone());
        self.run("append_event", move |s| s.append_event(&user_id, &draft))
    }

    fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>> {
        let user_id = user_id.to_string();
        self.run("list_events", move |s| s.list_events(&user_id, kind))
    }

    fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse> {
        let (user_id, draft) = (user_id.to_string(), draft.clone());
        self.run("append_verse", move |s| s.append_verse(&user_id, &draft))
    }

    fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>> {
        let user_id = user_id.to_string();
        self.run("list_verses", move |s| s.list_verses(&user_id))
    }

    fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let user_id = user_id.to_string();
        self.run("delete_verse", move |s| s.delete_verse(&user_id, id))
    }
}
