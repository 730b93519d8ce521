//! Transient browser-storage equivalent.
//!
//! The client persists nothing durable itself; the only local files are the
//! cached authenticated session and the moderation-panel unlock flag, both
//! small JSON documents in the platform data directory.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use serde_json::json;

use orunlink_backend::AuthSession;
use orunlink_shared::constants::{MODERATION_FLAG_FILE, SESSION_CACHE_FILE};

use crate::error::{ClientError, Result};

/// Handle to the local cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open (or create) the default cache directory:
    /// - Linux:   `~/.local/share/orunlink/`
    /// - macOS:   `~/Library/Application Support/com.orunlink.orunlink/`
    /// - Windows: `{FOLDERID_RoamingAppData}\orunlink\orunlink\data\`
    pub fn open() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "orunlink", "orunlink").ok_or(ClientError::NoDataDir)?;
        Self::open_at(project_dirs.data_dir())
    }

    /// Open (or create) a cache at an explicit path.  Useful for tests.
    pub fn open_at(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        Ok(Self {
            dir: path.to_path_buf(),
        })
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// The cached session, if a readable one exists.  A corrupt or missing
    /// file reads as "no session"; the user just signs in again.
    pub fn load_session(&self) -> Option<AuthSession> {
        let path = self.dir.join(SESSION_CACHE_FILE);
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "ignoring unreadable session cache");
                None
            }
        }
    }

    pub fn store_session(&self, session: &AuthSession) -> Result<()> {
        let data = serde_json::to_string_pretty(session)?;
        std::fs::write(self.dir.join(SESSION_CACHE_FILE), data)?;
        Ok(())
    }

    pub fn clear_session(&self) -> Result<()> {
        let path = self.dir.join(SESSION_CACHE_FILE);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Moderation unlock flag
    // ------------------------------------------------------------------

    pub fn moderation_unlocked(&self) -> bool {
        #[derive(Deserialize)]
        struct Flag {
            unlocked: bool,
        }
        std::fs::read_to_string(self.dir.join(MODERATION_FLAG_FILE))
            .ok()
            .and_then(|data| serde_json::from_str::<Flag>(&data).ok())
            .map(|flag| flag.unlocked)
            .unwrap_or(false)
    }

    pub fn set_moderation_unlocked(&self, unlocked: bool) -> Result<()> {
        let data = serde_json::to_string(&json!({ "unlocked": unlocked }))?;
        std::fs::write(self.dir.join(MODERATION_FLAG_FILE), data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orunlink_shared::models::Profile;
    use orunlink_shared::types::UserId;

    fn sample_session() -> AuthSession {
        let now = Utc::now();
        AuthSession {
            user: Profile {
                id: UserId::new(),
                username: "tester".into(),
                display_name: None,
                bio: None,
                avatar_url: None,
                created_at: now,
                updated_at: now,
            },
            access_token: "token-123".into(),
        }
    }

    #[test]
    fn session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open_at(dir.path()).unwrap();

        assert!(cache.load_session().is_none());

        let session = sample_session();
        cache.store_session(&session).unwrap();
        assert_eq!(cache.load_session(), Some(session));

        cache.clear_session().unwrap();
        assert!(cache.load_session().is_none());
        // Clearing twice is fine.
        cache.clear_session().unwrap();
    }

    #[test]
    fn moderation_flag_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open_at(dir.path()).unwrap();

        assert!(!cache.moderation_unlocked());
        cache.set_moderation_unlocked(true).unwrap();
        assert!(cache.moderation_unlocked());
        cache.set_moderation_unlocked(false).unwrap();
        assert!(!cache.moderation_unlocked());
    }

    #[test]
    fn corrupt_session_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open_at(dir.path()).unwrap();
        std::fs::write(dir.path().join(SESSION_CACHE_FILE), "{not json").unwrap();
        assert!(cache.load_session().is_none());
    }
}
