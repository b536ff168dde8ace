//! Session credential carried client-side in the auth cookie.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proof that the bearer completed a SAML login.
///
/// Serialised field names are camelCase so the JSON payload inside a token
/// is `{"audience":…,"validUntil":…,"domain":…}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    /// Federation relationship (SP entity ID) the credential was issued under.
    pub audience: String,

    /// Expiry as epoch milliseconds; unusable at or after this instant.
    pub valid_until: i64,

    /// Host the credential was issued for.
    #[serde(default)]
    pub domain: String,
}

impl SessionCredential {
    pub fn new(
        audience: impl Into<String>,
        valid_until: DateTime<Utc>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            audience: audience.into(),
            valid_until: valid_until.timestamp_millis(),
            domain: domain.into(),
        }
    }

    /// Check the credential at `now`: audience must match and expiry lie in the future.
    pub fn is_valid_at(&self, expected_audience: &str, now: DateTime<Utc>) -> bool {
        self.audience == expected_audience && self.valid_until > now.timestamp_millis()
    }
}
