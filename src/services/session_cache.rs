use crate::constants::session::EXPIRY_SKEW_SECS;
use crate::errors::ToolError;
use crate::services::auth_scheme::SessionSpec;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One authenticated login. Never leaves the API client.
pub struct Session {
    id: u64,
    token: SecretString,
    csrf: Option<SecretString>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scheme: Option<Arc<SessionSpec>>,
}

impl Session {
    /// `ttl = None` means the backend did not bound the session.
    pub fn new(token: impl Into<String>, csrf: Option<String>, ttl: Option<Duration>) -> Self {
        let issued_at = Utc::now();
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            token: SecretString::from(token.into()),
            csrf: csrf.map(SecretString::from),
            issued_at,
            expires_at: ttl.map(|ttl| issued_at + ttl),
            scheme: None,
        }
    }

    pub fn for_scheme(mut self, spec: &SessionSpec) -> Self {
        self.scheme = Some(Arc::new(spec.clone()));
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn csrf(&self) -> Option<&str> {
        self.csrf.as_ref().map(|c| c.expose_secret())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_SKEW_SECS) < expires_at,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of the last finished login attempt, kept under the renewal lock.
#[derive(Debug, Default)]
struct Renewal {
    last_failure: Option<ToolError>,
}

/// The single live session for one credential.
///
/// Reads take the `RwLock`; renewal is serialized on a separate mutex and
/// re-checked after acquiring it, so racing callers share one login. Callers
/// that queued behind a login share its failure too.
#[derive(Debug, Default)]
pub struct SessionCache {
    current: RwLock<Option<Arc<Session>>>,
    renewal: Mutex<Renewal>,
    attempts: AtomicU64,
    logins: AtomicU64,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live session, if any. Expired sessions read as absent.
    pub async fn get(&self) -> Option<Arc<Session>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|session| session.is_valid())
            .cloned()
    }

    pub async fn set(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        *self.current.write().await = Some(session.clone());
        session
    }

    /// Drops the session and hands it back, expired or not.
    pub async fn invalidate(&self) -> Option<Arc<Session>> {
        self.current.write().await.take()
    }

    /// Drops the session only if `id` is still the one held.
    pub async fn invalidate_if_current(&self, id: u64) -> bool {
        let mut guard = self.current.write().await;
        if guard.as_ref().map(|s| s.id()) == Some(id) {
            *guard = None;
            return true;
        }
        false
    }

    pub async fn get_or_login<F, Fut>(&self, login: F) -> Result<Arc<Session>, ToolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session, ToolError>>,
    {
        if let Some(session) = self.get().await {
            return Ok(session);
        }
        let seen = self.attempts.load(Ordering::SeqCst);
        let mut renewal = self.renewal.lock().await;
        if let Some(session) = self.get().await {
            return Ok(session);
        }
        if self.attempts.load(Ordering::SeqCst) != seen {
            if let Some(err) = &renewal.last_failure {
                return Err(err.clone());
            }
        }

        // A cancelled login leaves `attempts` untouched, so the next waiter runs its own.
        let outcome = login().await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match outcome {
            Ok(session) => {
                renewal.last_failure = None;
                self.logins.fetch_add(1, Ordering::SeqCst);
                Ok(self.set(session).await)
            }
            Err(err) => {
                renewal.last_failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Completed login handshakes so far.
    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }
}
