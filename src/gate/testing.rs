//! Test doubles shared by the gate tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::saml::engine::run_blocking;
use crate::saml::{AssertionEngine, EngineError, ValidatedAssertion};
use crate::session::{SessionCodec, SessionKeyConfig};

pub(crate) const TEST_AUDIENCE: &str = "https://sp.example.com/saml";

/// The only document [`FakeEngine`] accepts.
pub(crate) const VALID_DOCUMENT: &str = "PHNhbWxwOlJlc3BvbnNlLz4+";

pub(crate) fn test_keys() -> SessionKeyConfig {
    SessionKeyConfig {
        private_key: "0123456789abcdef0123456789abcdef".to_string(),
        init_vector: "fedcba9876543210".to_string(),
    }
}

pub(crate) fn test_codec() -> SessionCodec {
    SessionCodec::new(&test_keys(), TEST_AUDIENCE).unwrap()
}

/// Scripted assertion engine.
#[derive(Default)]
pub(crate) struct FakeEngine {
    /// Returned for [`VALID_DOCUMENT`]; `None` rejects everything.
    pub assertion: Option<ValidatedAssertion>,
    pub fail_login: bool,
    /// Async pause before answering.
    pub delay: Option<Duration>,
    /// Thread-blocking work before answering, run like the samael engine runs its parsing.
    pub blocking_delay: Option<Duration>,
}

#[async_trait]
impl AssertionEngine for FakeEngine {
    fn build_service_descriptor(&self, domain: &str) -> Result<String, EngineError> {
        Ok(format!(
            r#"<md:EntityDescriptor entityID="{}"><md:AssertionConsumerService Location="https://{}/saml/acs"/></md:EntityDescriptor>"#,
            TEST_AUDIENCE, domain
        ))
    }

    fn build_login_request(&self, _domain: &str, relay_state: &str) -> Result<String, EngineError> {
        if self.fail_login {
            return Err(EngineError::Config("no signing key".to_string()));
        }
        Ok(format!(
            "https://idp.example.com/sso?SAMLRequest=fake&RelayState={}",
            urlencoding::encode(relay_state)
        ))
    }

    async fn validate_response(
        &self,
        _domain: &str,
        raw_document: &str,
    ) -> Result<ValidatedAssertion, EngineError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(delay) = self.blocking_delay {
            run_blocking(move || {
                std::thread::sleep(delay);
                Ok(())
            })
            .await?;
        }
        match &self.assertion {
            Some(assertion) if raw_document == VALID_DOCUMENT => Ok(assertion.clone()),
            _ => Err(EngineError::Validation("signature mismatch".to_string())),
        }
    }
}
