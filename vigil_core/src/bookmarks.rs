//! Saved-verse bookmarks for the current user.
//!
//! The manager keeps an in-memory copy of the user's `savedVerses`
//! collection. Every change is written to the store first and applied to the
//! copy only after the store call succeeds, so a failure leaves both sides as
//! they were.
//!
//! Saving an already-saved verse unsaves it (toggle semantics).
//!
//! Save and unsave on the same verse key are serialized: a second caller
//! blocks until the first finishes and then acts on the updated set. This
//! keeps the check-then-insert against the store from creating duplicates.
//! A reload waits for in-flight writes so its snapshot cannot drop them.
//!
//! When a write fails the outcome in the store is unknown (it may have timed
//! out and still land), so the cached set is marked stale and the next
//! mutation reloads it first.

use crate::{DocumentStore, Error, Identity, Result, SavedVerse, VerseDraft, VerseKey};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use uuid::Uuid;

/// Result of a toggle
#[derive(Clone, Debug, PartialEq)]
pub enum ToggleOutcome {
    /// The verse was persisted and is now saved
    Saved(SavedVerse),
    /// The saved verse with this id was deleted
    Unsaved(Uuid),
}

impl ToggleOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, ToggleOutcome::Saved(_))
    }
}

/// What to unsave: a stored document id or a natural key
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsaveTarget {
    Id(Uuid),
    Key(VerseKey),
}

#[derive(Default)]
struct BookmarkState {
    owner: Option<String>,
    verses: Vec<SavedVerse>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds a verse key in the in-flight set until dropped
struct KeyGuard<'a> {
    in_flight: &'a Mutex<HashSet<VerseKey>>,
    released: &'a Condvar,
    key: VerseKey,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.key);
        self.released.notify_all();
    }
}

/// In-memory saved-verse set synchronized with a document store
pub struct BookmarkManager<S> {
    store: S,
    state: Mutex<BookmarkState>,
    in_flight: Mutex<HashSet<VerseKey>>,
    released: Condvar,
    /// Writers hold it shared; a reload takes it exclusively
    writes: RwLock<()>,
}

impl<S: DocumentStore> BookmarkManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: Mutex::new(BookmarkState::default()),
            in_flight: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            writes: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace the in-memory set with the user's stored verses.
    ///
    /// On failure the set is left empty and the error is returned.
    pub fn load(&self, user: &Identity) -> Result<usize> {
        let _reloading = self
            .writes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.store.list_verses(&user.uid) {
            Ok(verses) => {
                let count = verses.len();
                let mut state = lock(&self.state);
                state.owner = Some(user.uid.clone());
                state.verses = verses;
                tracing::debug!("Loaded {} saved verses for {}", count, user.uid);
                Ok(count)
            }
            Err(e) => {
                tracing::error!("Error fetching saved verses for {}: {}", user.uid, e);
                // No owner, so the next toggle reloads instead of trusting an empty set
                let mut state = lock(&self.state);
                state.owner = None;
                state.verses.clear();
                Err(e)
            }
        }
    }

    /// Forget the cached set (e.g. on logout)
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.owner = None;
        state.verses.clear();
    }

    /// Follow an auth state change: reload for the new user, clear on logout.
    ///
    /// Load errors are logged and leave an empty set.
    pub fn on_auth_change(&self, user: Option<&Identity>) {
        match user {
            Some(user) => {
                let _ = self.load(user);
            }
            None => self.clear(),
        }
    }

    pub fn is_saved(&self, key: &VerseKey) -> bool {
        lock(&self.state).verses.iter().any(|v| &v.key == key)
    }

    pub fn find(&self, key: &VerseKey) -> Option<SavedVerse> {
        lock(&self.state).verses.iter().find(|v| &v.key == key).cloned()
    }

    /// Saved verses in save order
    pub fn verses(&self) -> Vec<SavedVerse> {
        lock(&self.state).verses.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).verses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Save the verse if it is not saved, otherwise unsave it
    pub fn toggle_save(
        &self,
        user: Option<&Identity>,
        key: VerseKey,
        verse_text: &str,
    ) -> Result<ToggleOutcome> {
        let user = user.ok_or_else(|| Error::AuthRequired("save or unsave verses".into()))?;
        let _guards = self.begin(user, &key)?;

        if let Some(existing) = self.find(&key) {
            self.delete(user, &existing)?;
            return Ok(ToggleOutcome::Unsaved(existing.id));
        }

        let draft = VerseDraft {
            key,
            verse_text: verse_text.to_string(),
            saved_at: Utc::now(),
        };
        let verse = self.store.append_verse(&user.uid, &draft).map_err(|e| {
            tracing::error!("Error saving verse {}: {}", draft.key, e);
            self.mark_stale();
            e
        })?;
        tracing::info!("Verse {} saved with id {}", verse.key, verse.id);
        lock(&self.state).verses.push(verse.clone());
        Ok(ToggleOutcome::Saved(verse))
    }

    /// Delete a saved verse by id or natural key.
    ///
    /// Returns the deleted id, or `None` when nothing matched.
    pub fn unsave(&self, user: Option<&Identity>, target: &UnsaveTarget) -> Result<Option<Uuid>> {
        let user = user.ok_or_else(|| Error::AuthRequired("delete verses".into()))?;
        self.ensure_owner(user)?;

        let Some(key) = self.resolve(target) else {
            tracing::debug!("Nothing to unsave for {:?}", target);
            return Ok(None);
        };

        let _guards = self.begin(user, &key)?;

        // Re-resolve: another caller may have removed it while we waited
        let Some(existing) = self.find(&key).filter(|v| match target {
            UnsaveTarget::Id(id) => v.id == *id,
            UnsaveTarget::Key(_) => true,
        }) else {
            return Ok(None);
        };

        self.delete(user, &existing)?;
        Ok(Some(existing.id))
    }

    fn resolve(&self, target: &UnsaveTarget) -> Option<VerseKey> {
        let state = lock(&self.state);
        match target {
            UnsaveTarget::Id(id) => state.verses.iter().find(|v| v.id == *id).map(|v| v.key.clone()),
            UnsaveTarget::Key(key) => state.verses.iter().any(|v| &v.key == key).then(|| key.clone()),
        }
    }

    fn delete(&self, user: &Identity, verse: &SavedVerse) -> Result<()> {
        let removed = self.store.delete_verse(&user.uid, verse.id).map_err(|e| {
            tracing::error!("Error deleting verse {}: {}", verse.key, e);
            self.mark_stale();
            e
        })?;
        if !removed {
            tracing::warn!("Verse {} was already gone from the store", verse.id);
        }
        lock(&self.state).verses.retain(|v| v.id != verse.id);
        tracing::info!("Verse {} deleted", verse.key);
        Ok(())
    }

    /// Take the key and write guards over a set that belongs to `user`.
    ///
    /// Retries when a failed write marked the set stale while we waited.
    fn begin(
        &self,
        user: &Identity,
        key: &VerseKey,
    ) -> Result<(KeyGuard<'_>, RwLockReadGuard<'_, ()>)> {
        loop {
            self.ensure_owner(user)?;
            let guard = self.acquire(key);
            let writing = self.writing();
            if self.owned_by(user) {
                return Ok((guard, writing));
            }
        }
    }

    fn owned_by(&self, user: &Identity) -> bool {
        lock(&self.state).owner.as_deref() == Some(user.uid.as_str())
    }

    /// Force a reload before the next mutation
    fn mark_stale(&self) {
        lock(&self.state).owner = None;
    }

    fn writing(&self) -> RwLockReadGuard<'_, ()> {
        self.writes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reload when the cached set belongs to someone else
    fn ensure_owner(&self, user: &Identity) -> Result<()> {
        if self.owned_by(user) {
            Ok(())
        } else {
            self.load(user).map(|_| ())
        }
    }

    fn acquire(&self, key: &VerseKey) -> KeyGuard<'_> {
        let mut in_flight = lock(&self.in_flight);
        while in_flight.contains(key) {
            in_flight = self
                .released
                .wait(in_flight)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        in_flight.insert(key.clone());
        KeyGuard {
            in_flight: &self.in_flight,
            released: &self.released,
            key: key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthProvider, AuthSession};
    use crate::{EventDraft, EventKind, EventRecord, MemoryStore, TimedStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Memory store that can be switched offline and slowed down
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        offline: AtomicBool,
        delay: Option<Duration>,
    }

    impl FlakyStore {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn check(&self) -> Result<()> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.offline.load(Ordering::SeqCst) {
                Err(Error::Fetch("store offline".into()))
            } else {
                Ok(())
            }
        }
    }

    impl DocumentStore for FlakyStore {
        fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord> {
            self.check()?;
            self.inner.append_event(user_id, draft)
        }
        fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>> {
            self.check()?;
            self.inner.list_events(user_id, kind)
        }
        fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse> {
            self.check()?;
            self.inner.append_verse(user_id, draft)
        }
        fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>> {
            self.check()?;
            self.inner.list_verses(user_id)
        }
        fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool> {
            self.check()?;
            self.inner.delete_verse(user_id, id)
        }
    }

    fn john_3_16() -> VerseKey {
        VerseKey::new("John", 3, 16).unwrap()
    }

    const TEXT: &str = "For God so loved the world...";

    #[test]
    fn test_toggle_twice_saves_then_unsaves() {
        crate::logging::init_test();
        let manager = BookmarkManager::new(MemoryStore::new());
        let user = Identity::new("u1");

        let first = manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap();
        assert!(first.is_saved());
        assert!(manager.is_saved(&john_3_16()));
        assert_eq!(manager.store().list_verses("u1").unwrap().len(), 1);

        let second = manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap();
        assert!(!second.is_saved());
        assert!(!manager.is_saved(&john_3_16()));
        assert!(manager.store().list_verses("u1").unwrap().is_empty());

        match (first, second) {
            (ToggleOutcome::Saved(v), ToggleOutcome::Unsaved(id)) => assert_eq!(v.id, id),
            other => panic!("unexpected outcomes {:?}", other),
        }
    }

    #[test]
    fn test_toggle_requires_login() {
        let manager = BookmarkManager::new(MemoryStore::new());
        let err = manager.toggle_save(None, john_3_16(), TEXT).unwrap_err();
        assert!(matches!(err, Error::AuthRequired(_)));
        assert!(manager.is_empty());
        assert!(manager.store().list_verses("u1").unwrap().is_empty());
    }

    #[test]
    fn test_unsave_unknown_is_noop() {
        let manager = BookmarkManager::new(MemoryStore::new());
        let user = Identity::new("u1");
        manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap();

        let other = VerseKey::new("Genesis", 1, 1).unwrap();
        assert_eq!(manager.unsave(Some(&user), &UnsaveTarget::Key(other)).unwrap(), None);
        assert_eq!(
            manager.unsave(Some(&user), &UnsaveTarget::Id(Uuid::new_v4())).unwrap(),
            None
        );
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.store().list_verses("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_unsave_by_id() {
        let manager = BookmarkManager::new(MemoryStore::new());
        let user = Identity::new("u1");
        let ToggleOutcome::Saved(verse) = manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap()
        else {
            panic!("expected save");
        };

        let removed = manager.unsave(Some(&user), &UnsaveTarget::Id(verse.id)).unwrap();
        assert_eq!(removed, Some(verse.id));
        assert!(!manager.is_saved(&john_3_16()));
    }

    #[test]
    fn test_failed_save_leaves_state_unchanged() {
        let manager = BookmarkManager::new(FlakyStore::default());
        let user = Identity::new("u1");
        manager.load(&user).unwrap();

        manager.store().offline.store(true, Ordering::SeqCst);
        let err = manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert!(!manager.is_saved(&john_3_16()));

        manager.store().offline.store(false, Ordering::SeqCst);
        manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap();

        manager.store().offline.store(true, Ordering::SeqCst);
        assert!(manager.toggle_save(Some(&user), john_3_16(), TEXT).is_err());
        assert!(manager.is_saved(&john_3_16()));
        assert_eq!(manager.store().inner.list_verses("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_load_empties_set() {
        let manager = BookmarkManager::new(FlakyStore::default());
        let user = Identity::new("u1");
        manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap();

        manager.store().offline.store(true, Ordering::SeqCst);
        let err = manager.load(&user).unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert!(manager.is_empty());

        // Still offline: the toggle must not act on the empty set
        let err = manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert_eq!(manager.store().inner.list_verses("u1").unwrap().len(), 1);

        manager.store().offline.store(false, Ordering::SeqCst);
        let outcome = manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap();
        assert!(!outcome.is_saved());
    }

    #[test]
    fn test_switching_users_reloads() {
        let store = MemoryStore::new();
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let manager = BookmarkManager::new(store);

        manager.toggle_save(Some(&alice), john_3_16(), TEXT).unwrap();
        assert!(manager.is_saved(&john_3_16()));

        // Bob has nothing saved, so this saves a fresh copy for him
        let outcome = manager.toggle_save(Some(&bob), john_3_16(), TEXT).unwrap();
        assert!(outcome.is_saved());
        assert_eq!(manager.store().list_verses("alice").unwrap().len(), 1);
        assert_eq!(manager.store().list_verses("bob").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_toggles_are_serialized() {
        let manager = Arc::new(BookmarkManager::new(FlakyStore::slow(Duration::from_millis(20))));
        let user = Identity::new("u1");
        manager.load(&user).unwrap();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let user = user.clone();
                std::thread::spawn(move || manager.toggle_save(Some(&user), john_3_16(), TEXT))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        // Odd number of toggles: saved exactly once, never duplicated
        assert!(manager.is_saved(&john_3_16()));
        assert_eq!(manager.store().inner.list_verses("u1").unwrap().len(), 1);
        assert_eq!(manager.len(), 1);
    }

    /// Memory store with a slow verse append and a slow verse listing.
    ///
    /// The listing snapshots the collection before it sleeps.
    struct LaggyStore {
        inner: MemoryStore,
        append_delay: Duration,
        list_delay: Duration,
    }

    impl LaggyStore {
        fn new(append_delay: Duration, list_delay: Duration) -> Self {
            Self {
                inner: MemoryStore::new(),
                append_delay,
                list_delay,
            }
        }
    }

    impl DocumentStore for LaggyStore {
        fn append_event(&self, user_id: &str, draft: &EventDraft) -> Result<EventRecord> {
            self.inner.append_event(user_id, draft)
        }
        fn list_events(&self, user_id: &str, kind: EventKind) -> Result<Vec<EventRecord>> {
            self.inner.list_events(user_id, kind)
        }
        fn append_verse(&self, user_id: &str, draft: &VerseDraft) -> Result<SavedVerse> {
            std::thread::sleep(self.append_delay);
            self.inner.append_verse(user_id, draft)
        }
        fn list_verses(&self, user_id: &str) -> Result<Vec<SavedVerse>> {
            let verses = self.inner.list_verses(user_id)?;
            std::thread::sleep(self.list_delay);
            Ok(verses)
        }
        fn delete_verse(&self, user_id: &str, id: Uuid) -> Result<bool> {
            self.inner.delete_verse(user_id, id)
        }
    }

    #[test]
    fn test_timed_out_save_is_not_duplicated() {
        crate::logging::init_test();
        let store = TimedStore::new(
            LaggyStore::new(Duration::from_millis(100), Duration::ZERO),
            Duration::from_millis(20),
        );
        let manager = BookmarkManager::new(store);
        let user = Identity::new("u1");
        manager.load(&user).unwrap();

        let err = manager.toggle_save(Some(&user), john_3_16(), TEXT).unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));

        // The first append is still running; a second toggle must not save again
        let second = manager.toggle_save(Some(&user), john_3_16(), TEXT);
        assert!(!matches!(second, Ok(ToggleOutcome::Saved(_))), "{:?}", second);

        std::thread::sleep(Duration::from_millis(250));
        let stored = manager.store().inner().inner.list_verses("u1").unwrap();
        assert!(stored.len() <= 1, "duplicate saves: {:?}", stored);

        manager.load(&user).unwrap();
        assert_eq!(manager.is_saved(&john_3_16()), stored.len() == 1);
    }

    #[test]
    fn test_reload_waits_for_in_flight_save() {
        let manager = Arc::new(BookmarkManager::new(LaggyStore::new(
            Duration::from_millis(50),
            Duration::from_millis(100),
        )));
        let user = Identity::new("u1");
        manager.load(&user).unwrap();

        let saver = {
            let manager = Arc::clone(&manager);
            let user = user.clone();
            std::thread::spawn(move || manager.toggle_save(Some(&user), john_3_16(), TEXT))
        };
        std::thread::sleep(Duration::from_millis(10));
        manager.load(&user).unwrap();
        assert!(saver.join().unwrap().unwrap().is_saved());

        assert!(manager.is_saved(&john_3_16()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_follows_auth_subscription() {
        let store = MemoryStore::new();
        store
            .append_verse(
                "u1",
                &VerseDraft {
                    key: john_3_16(),
                    verse_text: TEXT.into(),
                    saved_at: Utc::now(),
                },
            )
            .unwrap();
        let manager = Arc::new(BookmarkManager::new(store));
        let session = AuthSession::default();

        let listener_manager = Arc::clone(&manager);
        let subscription =
            session.subscribe(Arc::new(move |user: Option<&Identity>| listener_manager.on_auth_change(user)));
        assert!(manager.is_empty());

        session.set_user(Some(Identity::new("u1")));
        assert!(manager.is_saved(&john_3_16()));

        session.set_user(None);
        assert!(manager.is_empty());
        drop(subscription);
    }
}
