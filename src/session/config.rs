//! Symmetric key material for session tokens.

use serde::{Deserialize, Serialize};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// Key and IV used to seal session tokens.
///
/// Both are plain strings whose UTF-8 bytes are the raw key material, which
/// keeps tokens compatible with gates provisioned from the same secrets file.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionKeyConfig {
    /// AES-256 key (exactly 32 bytes).
    pub private_key: String,

    /// CBC initialization vector (exactly 16 bytes).
    pub init_vector: String,
}

impl SessionKeyConfig {
    /// Validate key and IV lengths.
    pub fn validate(&self) -> Result<(), String> {
        if self.private_key.len() != KEY_LEN {
            return Err(format!(
                "session private_key must be {} bytes, got {}",
                KEY_LEN,
                self.private_key.len()
            ));
        }
        if self.init_vector.len() != IV_LEN {
            return Err(format!(
                "session init_vector must be {} bytes, got {}",
                IV_LEN,
                self.init_vector.len()
            ));
        }
        Ok(())
    }
}

// Keep key material out of logs.
impl std::fmt::Debug for SessionKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyConfig")
            .field("private_key", &"<redacted>")
            .field("init_vector", &"<redacted>")
            .finish()
    }
}
