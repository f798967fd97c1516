//! Auth provider seam and the process-wide session state.
//!
//! The real login flow lives outside this crate. Callers feed the current
//! identity into an [`AuthSession`] and components subscribe to changes.
//! Only one subscription is active at a time: subscribing again replaces the
//! previous listener, and dropping the [`Subscription`] handle unsubscribes.

use crate::Identity;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Callback invoked with the new identity (`None` on logout)
pub type AuthListener = Arc<dyn Fn(Option<&Identity>) + Send + Sync>;

/// Source of the current user identity
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<Identity>;

    /// Register the single identity-change listener.
    ///
    /// The listener fires once immediately with the current identity.
    fn subscribe(&self, listener: AuthListener) -> Subscription;
}

static GLOBAL_SESSION: Lazy<AuthSession> = Lazy::new(AuthSession::default);

/// Process-wide session shared by the whole binary
pub fn global() -> &'static AuthSession {
    &GLOBAL_SESSION
}

#[derive(Default)]
struct SessionInner {
    user: Option<Identity>,
    listener: Option<(u64, AuthListener)>,
    next_subscription_id: u64,
}

/// In-process auth state with a single change listener
#[derive(Clone, Default)]
pub struct AuthSession {
    inner: Arc<Mutex<SessionInner>>,
}

impl AuthSession {
    pub fn new(user: Option<Identity>) -> Self {
        let session = Self::default();
        session.lock().user = user;
        session
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current identity, notifying the listener if it changed
    pub fn set_user(&self, user: Option<Identity>) {
        let listener = {
            let mut inner = self.lock();
            if inner.user == user {
                return;
            }
            inner.user = user.clone();
            inner.listener.as_ref().map(|(_, l)| Arc::clone(l))
        };

        match &user {
            Some(identity) => tracing::info!("Auth state changed: signed in as {}", identity.uid),
            None => tracing::info!("Auth state changed: signed out"),
        }

        // Call outside the lock so listeners may read the session
        if let Some(listener) = listener {
            listener(user.as_ref());
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().listener.is_some()
    }
}

impl AuthProvider for AuthSession {
    fn current_user(&self) -> Option<Identity> {
        self.lock().user.clone()
    }

    fn subscribe(&self, listener: AuthListener) -> Subscription {
        let (id, user) = {
            let mut inner = self.lock();
            inner.next_subscription_id += 1;
            let id = inner.next_subscription_id;
            if inner.listener.is_some() {
                tracing::debug!("Replacing existing auth subscription");
            }
            inner.listener = Some((id, Arc::clone(&listener)));
            (id, inner.user.clone())
        };

        listener(user.as_ref());

        Subscription {
            session: Arc::downgrade(&self.inner),
            id,
        }
    }
}

/// Handle to the active auth listener; unsubscribes on drop
pub struct Subscription {
    session: Weak<Mutex<SessionInner>>,
    id: u64,
}

impl Subscription {
    /// Explicit teardown; equivalent to dropping the handle
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let mut inner = session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // A newer subscription may have replaced this one already
        if matches!(inner.listener, Some((id, _)) if id == self.id) {
            inner.listener = None;
            tracing::debug!("Auth subscription {} removed", self.id);
        }
    }
}
