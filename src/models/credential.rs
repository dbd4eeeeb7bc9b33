//! Per-user service credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encrypted credential row for one (user, service) pair.
///
/// `secret` is an opaque AES-256-GCM envelope; only the credential vault
/// can turn it back into [`Credentials`].
#[derive(Debug, Clone)]
pub struct ServiceCredential {
    pub id: i32,
    pub user_id: String,
    pub service_id: String,
    /// base64(nonce || ciphertext) of the credential JSON.
    pub secret: String,
    /// Set when logins with this credential repeatedly fail.
    pub invalidated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceCredential {
    pub fn is_valid(&self) -> bool {
        self.invalidated_at.is_none()
    }
}

/// Decrypted login credentials. Never persisted in this form.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Keep passwords out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
