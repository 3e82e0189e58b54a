use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not signed in")]
    SignedOut,
    #[error("invalid principal {0:?}")]
    InvalidPrincipal(String),
    #[error("session file {path}: {reason}")]
    Session { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub email: String,
    pub signed_in_at: DateTime<Utc>,
}

pub trait IdentityProvider {
    fn current(&self) -> Result<Option<Principal>, AuthError>;

    fn sign_out(&self) -> Result<(), AuthError>;

    fn require(&self) -> Result<Principal, AuthError> {
        self.current()?.ok_or(AuthError::SignedOut)
    }
}

/// Principal persisted as a small JSON file between invocations.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl ToString) -> AuthError {
        AuthError::Session {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn sign_in(&self, email: &str) -> Result<Principal, AuthError> {
        let email = email.trim();
        let valid = email
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid {
            return Err(AuthError::InvalidPrincipal(email.to_string()));
        }

        let principal = Principal {
            email: email.to_string(),
            signed_in_at: Utc::now(),
        };
        let body = serde_json::to_string_pretty(&principal).map_err(|e| self.error(e))?;
        std::fs::write(&self.path, body).map_err(|e| self.error(e))?;
        info!(email = %principal.email, "signed in");
        Ok(principal)
    }
}

impl IdentityProvider for SessionFile {
    fn current(&self) -> Result<Option<Principal>, AuthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| self.error(e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }

    fn sign_out(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("signed out");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn session() -> SessionFile {
        SessionFile::new(std::env::temp_dir().join(format!("regdash-session-{}", Uuid::new_v4())))
    }

    #[test]
    fn sign_in_then_out() {
        let session = session();
        assert_eq!(session.current().unwrap(), None);
        assert!(matches!(session.require(), Err(AuthError::SignedOut)));

        let principal = session.sign_in(" admin@example.com ").unwrap();
        assert_eq!(principal.email, "admin@example.com");
        assert_eq!(session.require().unwrap(), principal);

        session.sign_out().unwrap();
        assert_eq!(session.current().unwrap(), None);
        session.sign_out().unwrap();
    }

    #[test]
    fn rejects_malformed_principal() {
        let session = session();
        assert!(matches!(
            session.sign_in("admin"),
            Err(AuthError::InvalidPrincipal(_))
        ));
        assert!(!session.path().exists());
    }

    #[test]
    fn corrupt_session_is_an_error() {
        let session = session();
        std::fs::write(session.path(), "not json").unwrap();
        assert!(matches!(session.current(), Err(AuthError::Session { .. })));
        session.sign_out().unwrap();
    }
}
