//! Assertion engine capability.
//!
//! Everything that needs to understand SAML documents sits behind
//! [`AssertionEngine`], so the gate logic can run against a fake in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// The parts of a validated SAML response the gate acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAssertion {
    /// First audience of the assertion's audience restriction.
    pub audience: String,
    /// Upper bound of the assertion's validity window.
    pub not_on_or_after: DateTime<Utc>,
}

/// Assertion engine failures. Callers log these; clients never see them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("SAML configuration error: {0}")]
    Config(String),

    #[error("SAML response is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("SAML response is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("failed to parse SAML document: {0}")]
    Parse(String),

    #[error("SAML authentication failed: {0}")]
    Status(String),

    #[error("SAML response validation failed: {0}")]
    Validation(String),
}

/// SAML protocol operations consumed by the gate.
#[async_trait]
pub trait AssertionEngine: Send + Sync {
    /// This SP's metadata document for the given host.
    fn build_service_descriptor(&self, domain: &str) -> Result<String, EngineError>;

    /// IdP login URL carrying an AuthnRequest and the relay state.
    fn build_login_request(&self, domain: &str, relay_state: &str) -> Result<String, EngineError>;

    /// Validate a base64 SAML response posted to the ACS of `domain`.
    ///
    /// Implementations must not block the executor; CPU-bound work goes
    /// through [`run_blocking`] so the caller's timeout can fire.
    async fn validate_response(
        &self,
        domain: &str,
        raw_document: &str,
    ) -> Result<ValidatedAssertion, EngineError>;
}

/// Run synchronous SAML work on the blocking thread pool.
pub async fn run_blocking<T, F>(work: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EngineError::Validation(format!("validation task failed: {}", e)))?
}
