//! Write-through persistence of the current session.
//!
//! The cache is three flat entries under fixed keys: the serialized session
//! envelope, the bare access token and a login flag. The flag is written last
//! and removed first, so an interrupted write never leaves a flag pointing at
//! a half-written session.
//!
//! Reads never fail startup. Anything that does not satisfy the entry
//! invariants (flag set, envelope parses, schema version known, embedded
//! token equals the bare token) is reported as `MalformedCacheEntry` by
//! [`SessionCache::load`] and discarded by [`SessionCache::restore`].

use crate::{config::CacheKeys, error::AuthError, session::model::Session};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{debug, warn};

/// Current envelope schema version.
pub const CACHE_SCHEMA_VERSION: u64 = 1;

const LOGIN_FLAG_TRUE: &str = "true";

/// Minimal string key/value store, synchronous like browser local storage.
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    /// Returns an error if the backing storage can't be read.
    fn get(&self, key: &str) -> io::Result<Option<String>>;

    /// # Errors
    /// Returns an error if the backing storage can't be written.
    fn set(&self, key: &str, value: &str) -> io::Result<()>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns an error if the backing storage can't be modified.
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// In-process store, used by tests and by embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::other("memory store poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One file per key inside a private directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the store directory.
    ///
    /// # Errors
    /// Returns an error if the directory can't be created.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid || key.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid cache key: {key}"),
            ));
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!("{key}.tmp"));

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// Raw projection of the three cache entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub serialized_session: Option<String>,
    pub bare_token: Option<String>,
    pub login_flag: Option<String>,
}

impl CacheEntry {
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.login_flag.as_deref() == Some(LOGIN_FLAG_TRUE)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.serialized_session.is_none() && self.bare_token.is_none() && self.login_flag.is_none()
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u64,
    session: &'a Session,
}

pub struct SessionCache {
    store: Arc<dyn KeyValueStore>,
    keys: CacheKeys,
}

impl SessionCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, keys: CacheKeys) -> Self {
        Self { store, keys }
    }

    /// Read the raw entries.
    ///
    /// # Errors
    /// Returns `MalformedCacheEntry` if the store itself can't be read.
    pub fn read_entry(&self) -> Result<CacheEntry, AuthError> {
        let read = |key: &str| {
            self.store
                .get(key)
                .map_err(|err| AuthError::MalformedCacheEntry(format!("{key}: {err}")))
        };
        Ok(CacheEntry {
            serialized_session: read(&self.keys.session)?,
            bare_token: read(&self.keys.token)?,
            login_flag: read(&self.keys.login_flag)?,
        })
    }

    /// Load and validate the cached session.
    ///
    /// # Errors
    /// Returns `MalformedCacheEntry` when the entries violate the cache
    /// invariants.
    pub fn load(&self) -> Result<Option<Session>, AuthError> {
        let entry = self.read_entry()?;
        if !entry.is_logged_in() {
            return Ok(None);
        }

        let raw = entry
            .serialized_session
            .ok_or_else(|| malformed("login flag set without a session"))?;
        let bare_token = entry
            .bare_token
            .ok_or_else(|| malformed("login flag set without a token"))?;

        let envelope: Value = serde_json::from_str(&raw)
            .map_err(|err| malformed(&format!("session is not valid JSON: {err}")))?;
        let version = envelope.get("version").and_then(Value::as_u64);
        if version != Some(CACHE_SCHEMA_VERSION) {
            return Err(malformed(&format!(
                "unsupported cache schema version {version:?}"
            )));
        }

        let session: Session = envelope
            .get("session")
            .cloned()
            .ok_or_else(|| malformed("envelope has no session"))
            .and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|err| malformed(&format!("session does not parse: {err}")))
            })?;

        if !session.is_well_formed() {
            return Err(malformed("session is not authenticated"));
        }
        if !session.token_matches(&bare_token) {
            return Err(malformed("session token does not match the bare token"));
        }

        Ok(Some(session))
    }

    /// Fast-path restore: load, and on any corruption log, wipe and fall
    /// through to `None`.
    pub fn restore(&self) -> Option<Session> {
        match self.load() {
            Ok(session) => session,
            Err(err) => {
                warn!("Discarding cached session: {err}");
                self.clear();
                None
            }
        }
    }

    /// Write-through persist of the session.
    ///
    /// # Errors
    /// Returns an error if any entry can't be written; the login flag is
    /// left unset in that case.
    pub fn persist(&self, session: &Session) -> io::Result<()> {
        let serialized = serde_json::to_string(&EnvelopeRef {
            version: CACHE_SCHEMA_VERSION,
            session,
        })
        .map_err(io::Error::other)?;

        self.store.remove(&self.keys.login_flag)?;
        self.store.set(&self.keys.session, &serialized)?;
        self.store
            .set(&self.keys.token, session.access_token().expose_secret())?;
        self.store.set(&self.keys.login_flag, LOGIN_FLAG_TRUE)?;
        debug!(subject = %session.subject_id(), "session persisted");
        Ok(())
    }

    /// Remove every entry. Failures are logged; there is nothing else a
    /// caller could do about them.
    pub fn clear(&self) {
        for key in [&self.keys.login_flag, &self.keys.session, &self.keys.token] {
            if let Err(err) = self.store.remove(key) {
                warn!("Failed to remove cache entry {key}: {err}");
            }
        }
    }
}

fn malformed(reason: &str) -> AuthError {
    AuthError::MalformedCacheEntry(reason.to_string())
}
