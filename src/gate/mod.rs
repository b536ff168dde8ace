//! Edge gate: routes each request to metadata, ACS or session check.

mod classifier;
mod consumer;
mod controller;
mod publisher;
#[cfg(test)]
pub(crate) mod testing;

pub use classifier::RequestLane;

use classifier::RequestClassifier;
use consumer::AssertionConsumer;
use controller::GateController;
use publisher::MetadataPublisher;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::config::GateConfig;
use crate::edge::{Disposition, EdgeRequest};
use crate::saml::AssertionEngine;
use crate::session::{CodecError, SessionCodec};

/// The complete gate, built once at startup and shared across requests.
pub struct Gate {
    classifier: RequestClassifier,
    controller: GateController,
    consumer: AssertionConsumer,
    publisher: MetadataPublisher,
}

impl Gate {
    pub fn new(config: &GateConfig, engine: Arc<dyn AssertionEngine>) -> Result<Self, CodecError> {
        let saml = &config.saml;
        let codec = Arc::new(SessionCodec::new(&config.session, saml.audience.clone())?);

        Ok(Self {
            classifier: RequestClassifier::new(saml),
            controller: GateController::new(
                Arc::clone(&codec),
                Arc::clone(&engine),
                saml.cookie_name.clone(),
            ),
            consumer: AssertionConsumer::new(
                codec,
                Arc::clone(&engine),
                saml.cookie_name.clone(),
                config.validation_timeout(),
            ),
            publisher: MetadataPublisher::new(engine),
        })
    }

    pub fn lane(&self, path: &str) -> RequestLane {
        self.classifier.classify(path)
    }

    /// Handle a request at the current time.
    pub async fn handle(&self, request: EdgeRequest) -> Disposition {
        self.handle_at(request, Utc::now()).await
    }

    pub async fn handle_at(&self, request: EdgeRequest, now: DateTime<Utc>) -> Disposition {
        let lane = self.lane(&request.uri);
        debug!(lane = %lane, method = %request.method, path = %request.uri, "Routing request");

        match lane {
            RequestLane::Metadata => Disposition::Respond(self.publisher.handle(&request)),
            RequestLane::AssertionCallback => {
                Disposition::Respond(self.consumer.handle(&request, now).await)
            }
            RequestLane::ProtectedResource => self.controller.handle(request, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_gate_config;
    use crate::edge::RequestBody;
    use crate::saml::ValidatedAssertion;
    use chrono::Duration;
    use crate::gate::testing::{FakeEngine, TEST_AUDIENCE, VALID_DOCUMENT};

    const HOST: &str = "app.example.com";

    fn gate(engine: FakeEngine) -> Gate {
        Gate::new(&test_gate_config(), Arc::new(engine)).unwrap()
    }

    fn accepting_engine(not_on_or_after: DateTime<Utc>) -> FakeEngine {
        FakeEngine {
            assertion: Some(ValidatedAssertion {
                audience: TEST_AUDIENCE.to_string(),
                not_on_or_after,
            }),
            ..Default::default()
        }
    }

    fn acs_post(document: &str, relay: &str) -> EdgeRequest {
        EdgeRequest::new("POST", "/saml/acs")
            .with_header("host", HOST)
            .with_body(RequestBody::text(format!(
                "SAMLResponse={}&RelayState={}",
                urlencoding::encode(document),
                urlencoding::encode(relay)
            )))
    }

    fn session_cookie(disposition: &Disposition) -> String {
        let set_cookie = disposition.response().unwrap().header("Set-Cookie").unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_login_round_trip() {
        let now = Utc::now();
        let gate = gate(accepting_engine(now + Duration::hours(8)));

        // Unauthenticated: challenged with the original path as relay state.
        let first = gate
            .handle_at(EdgeRequest::new("GET", "/dashboard").with_header("host", HOST), now)
            .await;
        let challenge = first.response().unwrap();
        assert_eq!(challenge.status, 307);
        assert!(challenge.header("Location").unwrap().contains("RelayState=%2Fdashboard"));

        // IdP posts back: session issued, redirected to the original path.
        let callback = gate.handle_at(acs_post(VALID_DOCUMENT, "/dashboard"), now).await;
        let redirect = callback.response().unwrap();
        assert_eq!(redirect.status, 302);
        assert_eq!(redirect.header("Location"), Some("https://app.example.com/dashboard"));

        // Returning with the cookie: forwarded unchanged.
        let request = EdgeRequest::new("GET", "/dashboard")
            .with_header("host", HOST)
            .with_header("cookie", session_cookie(&callback));
        let third = gate.handle_at(request.clone(), now + Duration::minutes(5)).await;
        assert_eq!(third, Disposition::Forward(request.clone()));

        // After expiry the same cookie is challenged again.
        let fourth = gate.handle_at(request, now + Duration::hours(8)).await;
        assert_eq!(fourth.response().map(|r| r.status), Some(307));
    }

    #[tokio::test]
    async fn test_corrupted_callback_rejected() {
        let now = Utc::now();
        let gate = gate(accepting_engine(now + Duration::hours(1)));

        let disposition = gate.handle_at(acs_post("corrupted", "/reports"), now).await;
        let response = disposition.response().unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.body.as_deref(), Some("Invalid SAML Payload"));
        assert!(response.header("Set-Cookie").is_none());
    }

    #[tokio::test]
    async fn test_acs_requires_post() {
        let gate = gate(FakeEngine::default());
        let request = EdgeRequest::new("GET", "/saml/acs").with_header("host", HOST);
        let disposition = gate.handle_at(request, Utc::now()).await;
        assert_eq!(disposition.response().map(|r| r.status), Some(400));
    }

    #[tokio::test]
    async fn test_metadata_always_served() {
        let gate = gate(FakeEngine::default());
        let request = EdgeRequest::new("GET", "/saml/metadata.xml").with_header("host", HOST);

        let disposition = gate.handle_at(request, Utc::now()).await;
        let response = disposition.response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some("application/xml"));
    }

    #[tokio::test]
    async fn test_protocol_paths_never_forward() {
        let now = Utc::now();
        let gate = gate(accepting_engine(now + Duration::hours(1)));
        let cookie = session_cookie(&gate.handle_at(acs_post(VALID_DOCUMENT, "/"), now).await);

        for path in ["/saml/acs", "/saml/metadata.xml"] {
            let request = EdgeRequest::new("GET", path)
                .with_header("host", HOST)
                .with_header("cookie", cookie.clone());
            assert!(!gate.handle_at(request, now).await.is_forward(), "{}", path);
        }
    }

    #[test]
    fn test_lane() {
        let gate = gate(FakeEngine::default());
        assert_eq!(gate.lane("/saml/acs"), RequestLane::AssertionCallback);
        assert_eq!(gate.lane("/saml/metadata.xml"), RequestLane::Metadata);
        assert_eq!(gate.lane("/saml/acs?x=1"), RequestLane::ProtectedResource);
    }

    #[test]
    fn test_bad_session_keys() {
        let mut config = test_gate_config();
        config.session.private_key = "short".to_string();
        assert!(Gate::new(&config, Arc::new(FakeEngine::default())).is_err());
    }
}
