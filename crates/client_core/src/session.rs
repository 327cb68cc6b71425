use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use shared::domain::SessionId;
use thiserror::Error;
use tracing::info;

use crate::transport::ConnectionState;

pub const PIN_MAX_DIGITS: usize = 6;
const STORE_FILE_NAME: &str = "session.json";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session pin must be 1 to {PIN_MAX_DIGITS} digits and non-zero")]
    InvalidPin,
    #[error("route '{0}' does not name a session")]
    InvalidRoute(String),
    #[error("failed to read session store '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write session store '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session store is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Active session as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: Option<SessionId>,
    pub connectivity: ConnectionState,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: None,
            connectivity: ConnectionState::Disconnected,
        }
    }
}

/// Validates a typed session pin: ASCII digits only, at most six of them.
pub fn parse_pin(input: &str) -> Result<SessionId, SessionError> {
    let pin = input.trim();
    if pin.is_empty() || pin.len() > PIN_MAX_DIGITS || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SessionError::InvalidPin);
    }
    pin.parse::<i64>()
        .ok()
        .and_then(SessionId::new)
        .ok_or(SessionError::InvalidPin)
}

/// Reads the session id from a navigation path such as `/42`.
pub fn parse_route(route: &str) -> Result<SessionId, SessionError> {
    let invalid = || SessionError::InvalidRoute(route.to_string());
    let segment = route
        .trim()
        .trim_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(invalid)?;
    segment
        .parse::<i64>()
        .ok()
        .and_then(SessionId::new)
        .ok_or_else(invalid)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    session_id: SessionId,
}

/// Remembers the last successfully loaded session id between runs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(STORE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<SessionId>, SessionError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SessionError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let stored: StoredSession = serde_json::from_str(&raw).map_err(SessionError::Corrupt)?;
        Ok(SessionId::new(stored.session_id.0))
    }

    pub fn save(&self, id: SessionId) -> Result<(), SessionError> {
        let write_err = |source| SessionError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let body = serde_json::to_string_pretty(&StoredSession { session_id: id })
            .map_err(SessionError::Corrupt)?;
        fs::write(&self.path, body).map_err(write_err)?;
        info!(session_id = id.0, path = %self.path.display(), "session: persisted last session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_accepts_up_to_six_digits() {
        assert_eq!(parse_pin("123456").expect("pin"), SessionId(123456));
        assert_eq!(parse_pin(" 42 ").expect("pin"), SessionId(42));
    }

    #[test]
    fn pin_rejects_letters_length_and_zero() {
        for bad in ["", "1234567", "12a", "-5", "000", "4 2"] {
            assert!(
                matches!(parse_pin(bad), Err(SessionError::InvalidPin)),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn route_reads_first_path_segment() {
        assert_eq!(parse_route("/42").expect("route"), SessionId(42));
        assert_eq!(parse_route("7/").expect("route"), SessionId(7));
        assert!(matches!(parse_route("/"), Err(SessionError::InvalidRoute(_))));
        assert!(matches!(parse_route("/abc"), Err(SessionError::InvalidRoute(_))));
    }

    #[test]
    fn store_round_trips_last_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("nested"));
        assert_eq!(store.load().expect("empty load"), None);

        store.save(SessionId(99)).expect("save");
        assert_eq!(store.load().expect("load"), Some(SessionId(99)));

        let raw = fs::read_to_string(store.path()).expect("raw");
        assert!(raw.contains("\"sessionId\": 99"));
    }

    #[test]
    fn corrupt_store_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        fs::write(store.path(), "{nope").expect("write");
        assert!(matches!(store.load(), Err(SessionError::Corrupt(_))));
    }
}
