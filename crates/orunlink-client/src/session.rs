//! Application-root-owned session state.
//!
//! One [`SessionStore`] lives at the root of the application; every screen
//! reads the current user through it and nothing mutates it except the
//! entry points here (sign-in, sign-up, sign-out, refresh).  Observers get
//! auth-state-changed notifications through a watch channel.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use orunlink_backend::{AuthSession, Backend, BackendError};
use orunlink_shared::models::Profile;
use orunlink_shared::types::UserId;

use crate::cache::CacheStore;
use crate::error::{ClientError, Result};

pub struct SessionStore {
    backend: Arc<dyn Backend>,
    cache: CacheStore,
    state: watch::Sender<Option<AuthSession>>,
}

impl SessionStore {
    /// Create the store, restoring a cached session if one exists.
    pub fn new(backend: Arc<dyn Backend>, cache: CacheStore) -> Self {
        let cached = cache.load_session();
        if cached.is_some() {
            info!("restored cached session");
        }
        let (state, _) = watch::channel(cached);
        Self {
            backend,
            cache,
            state,
        }
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    pub fn current(&self) -> Option<AuthSession> {
        self.state.borrow().clone()
    }

    pub fn user(&self) -> Option<Profile> {
        self.state.borrow().as_ref().map(|s| s.user.clone())
    }

    /// The signed-in user's id, or [`ClientError::NotSignedIn`].
    pub fn user_id(&self) -> Result<UserId> {
        self.state
            .borrow()
            .as_ref()
            .map(|s| s.user.id)
            .ok_or(ClientError::NotSignedIn)
    }

    /// Subscribe to auth-state changes.  The receiver yields whenever a
    /// sign-in, sign-out, or refresh alters the session.
    pub fn watch(&self) -> watch::Receiver<Option<AuthSession>> {
        self.state.subscribe()
    }

    // ------------------------------------------------------------------
    // Mutation entry points
    // ------------------------------------------------------------------

    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Profile> {
        let session = self.backend.sign_up(email, password, username).await?;
        self.install(Some(session.clone()))?;
        Ok(session.user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Profile> {
        let session = self.backend.sign_in(email, password).await?;
        self.install(Some(session.clone()))?;
        Ok(session.user)
    }

    pub async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.current() {
            self.backend.sign_out(&session.access_token).await?;
        }
        self.install(None)
    }

    /// Re-validate the session against the backend.  A stale token clears
    /// the session instead of erroring; transport failures propagate and
    /// leave the session untouched.
    pub async fn refresh(&self) -> Result<Option<Profile>> {
        let Some(session) = self.current() else {
            return Ok(None);
        };
        match self.backend.current_user(&session.access_token).await {
            Ok(user) => {
                let refreshed = AuthSession {
                    user: user.clone(),
                    access_token: session.access_token,
                };
                self.install(Some(refreshed))?;
                Ok(Some(user))
            }
            Err(BackendError::Unauthorized) => {
                info!("cached session expired, signing out");
                self.install(None)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store the new session value, persist it, and notify watchers.
    fn install(&self, session: Option<AuthSession>) -> Result<()> {
        match &session {
            Some(s) => self.cache.store_session(s)?,
            None => self.cache.clear_session()?,
        }
        self.state.send_replace(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orunlink_backend::MemoryBackend;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open_at(dir.path()).unwrap();
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        (SessionStore::new(backend, cache), dir)
    }

    #[tokio::test]
    async fn sign_up_then_out_notifies_watchers() {
        let (store, _dir) = store();
        let mut watcher = store.watch();

        assert!(store.user().is_none());
        assert!(matches!(store.user_id(), Err(ClientError::NotSignedIn)));

        let user = store
            .sign_up("dora@example.com", "password", "dora")
            .await
            .unwrap();
        watcher.changed().await.unwrap();
        assert_eq!(watcher.borrow().as_ref().unwrap().user.id, user.id);
        assert_eq!(store.user_id().unwrap(), user.id);

        store.sign_out().await.unwrap();
        watcher.changed().await.unwrap();
        assert!(watcher.borrow().is_none());
    }

    #[tokio::test]
    async fn session_survives_restart_via_cache() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());

        {
            let cache = CacheStore::open_at(dir.path()).unwrap();
            let store = SessionStore::new(backend.clone(), cache);
            store
                .sign_up("erin@example.com", "password", "erin")
                .await
                .unwrap();
        }

        let cache = CacheStore::open_at(dir.path()).unwrap();
        let store = SessionStore::new(backend, cache);
        assert_eq!(store.user().unwrap().username, "erin");

        // The cached token is still valid on the backend.
        let refreshed = store.refresh().await.unwrap();
        assert_eq!(refreshed.unwrap().username, "erin");
    }

    #[tokio::test]
    async fn refresh_clears_a_stale_token() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let cache = CacheStore::open_at(dir.path()).unwrap();
        let store = SessionStore::new(backend.clone(), cache);

        store
            .sign_up("finn@example.com", "password", "finn")
            .await
            .unwrap();
        // Invalidate the token server-side.
        let token = store.current().unwrap().access_token;
        backend.sign_out(&token).await.unwrap();

        assert!(store.refresh().await.unwrap().is_none());
        assert!(store.user().is_none());
    }
}
