//! Assertion consumer service.
//!
//! Turns a SAML response posted by the IdP into a session cookie and a
//! redirect back to the page the user originally asked for. Every failure
//! collapses into the same `400 Invalid SAML Payload` response; the cause is
//! only visible in the logs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::edge::{build_session_cookie, EdgeRequest, EdgeResponse};
use crate::saml::{AssertionEngine, ValidatedAssertion};
use crate::session::{SessionCodec, SessionCredential};

const SAML_RESPONSE_FIELD: &str = "SAMLResponse";
const RELAY_STATE_FIELD: &str = "RelayState";

/// Handles IdP posts to the ACS path.
pub struct AssertionConsumer {
    codec: Arc<SessionCodec>,
    engine: Arc<dyn AssertionEngine>,
    cookie_name: String,
    validation_timeout: Duration,
}

impl AssertionConsumer {
    pub fn new(
        codec: Arc<SessionCodec>,
        engine: Arc<dyn AssertionEngine>,
        cookie_name: impl Into<String>,
        validation_timeout: Duration,
    ) -> Self {
        Self {
            codec,
            engine,
            cookie_name: cookie_name.into(),
            validation_timeout,
        }
    }

    pub async fn handle(&self, request: &EdgeRequest, now: DateTime<Utc>) -> EdgeResponse {
        match self.consume(request, now).await {
            Ok(response) => response,
            Err(reason) => {
                warn!(reason = %reason, path = %request.uri, "Rejected SAML response");
                EdgeResponse::invalid_saml_payload()
            }
        }
    }

    async fn consume(
        &self,
        request: &EdgeRequest,
        now: DateTime<Utc>,
    ) -> Result<EdgeResponse, String> {
        if !request.is_post() {
            return Err(format!("method {} not allowed on ACS", request.method));
        }
        let body = request
            .body
            .as_ref()
            .and_then(|body| body.decoded())
            .filter(|body| !body.is_empty())
            .ok_or("missing or undecodable request body")?;
        let domain = request.domain().ok_or("no host header")?;

        let form = parse_form(&body);
        let document = form
            .get(SAML_RESPONSE_FIELD)
            .filter(|value| !value.is_empty())
            .ok_or("SAMLResponse field missing")?;

        let validation = self.engine.validate_response(domain, document);
        let assertion = tokio::time::timeout(self.validation_timeout, validation)
            .await
            .map_err(|_| format!("validation timed out after {:?}", self.validation_timeout))?
            .map_err(|e| e.to_string())?;

        self.check_assertion(&assertion, now)?;

        let credential =
            SessionCredential::new(&assertion.audience, assertion.not_on_or_after, domain);
        let token = self.codec.encode(&credential).map_err(|e| e.to_string())?;

        let relay_state = safe_relay_state(form.get(RELAY_STATE_FIELD).map(String::as_str));
        let location = format!("https://{}{}", domain, relay_state);

        info!(
            domain = %domain,
            relay_state = %relay_state,
            valid_until = %assertion.not_on_or_after,
            "SAML assertion accepted, session issued"
        );

        Ok(EdgeResponse::found(location).with_header(
            "Set-Cookie",
            build_session_cookie(&self.cookie_name, &token, assertion.not_on_or_after),
        ))
    }

    fn check_assertion(
        &self,
        assertion: &ValidatedAssertion,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if assertion.audience != self.codec.expected_audience() {
            return Err(format!("unexpected audience {}", assertion.audience));
        }
        if now >= assertion.not_on_or_after {
            return Err(format!("assertion expired at {}", assertion.not_on_or_after));
        }
        Ok(())
    }
}

/// Parse an `application/x-www-form-urlencoded` body.
///
/// Later duplicates win. Pairs whose value is not valid percent-encoding are dropped.
fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((form_decode(name)?, form_decode(value)?))
        })
        .collect()
}

fn form_decode(value: &str) -> Option<String> {
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(e) => {
            debug!(error = %e, "Dropping undecodable form field");
            None
        }
    }
}

/// Reduce a relay state to a same-origin path.
///
/// Anything that could turn `https://{domain}{relay}` into another origin
/// (missing leading slash, `//host`, backslashes, control characters) falls back to `/`.
fn safe_relay_state(relay_state: Option<&str>) -> &str {
    match relay_state {
        Some(relay)
            if relay.starts_with('/')
                && !relay.starts_with("//")
                && !relay.contains('\\')
                && !relay.chars().any(char::is_control) =>
        {
            relay
        }
        _ => "/",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::RequestBody;
    use crate::gate::testing::{test_codec, FakeEngine, TEST_AUDIENCE, VALID_DOCUMENT};
    use chrono::Duration as ChronoDuration;

    fn consumer(engine: FakeEngine) -> AssertionConsumer {
        AssertionConsumer::new(
            Arc::new(test_codec()),
            Arc::new(engine),
            "sso_auth",
            Duration::from_millis(200),
        )
    }

    fn post(body: RequestBody) -> EdgeRequest {
        EdgeRequest::new("POST", "/saml/acs")
            .with_header("host", "app.example.com")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    fn form(document: &str, relay: &str) -> RequestBody {
        RequestBody::text(format!(
            "SAMLResponse={}&RelayState={}",
            urlencoding::encode(document),
            urlencoding::encode(relay)
        ))
    }

    fn engine_valid_until(not_on_or_after: DateTime<Utc>) -> FakeEngine {
        FakeEngine {
            assertion: Some(ValidatedAssertion {
                audience: TEST_AUDIENCE.to_string(),
                not_on_or_after,
            }),
            ..Default::default()
        }
    }

    fn assert_rejected(response: &EdgeResponse) {
        assert_eq!(response.status, 400);
        assert_eq!(response.body.as_deref(), Some("Invalid SAML Payload"));
        assert!(response.header("Set-Cookie").is_none());
        assert!(response.header("Location").is_none());
    }

    #[tokio::test]
    async fn test_valid_assertion_issues_session() {
        let now = Utc::now();
        let expires = now + ChronoDuration::hours(8);
        let consumer = consumer(engine_valid_until(expires));

        let response = consumer.handle(&post(form(VALID_DOCUMENT, "/reports")), now).await;

        assert_eq!(response.status, 302);
        assert_eq!(response.header("Location"), Some("https://app.example.com/reports"));
        let cookie = response.header("Set-Cookie").unwrap();
        assert!(cookie.starts_with("sso_auth="));
        let expected = format!("Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"));
        assert!(cookie.contains(&expected));
        assert!(cookie.ends_with("; Path=/; Secure; HttpOnly; SameSite=Lax"));

        // The issued token is accepted by the codec until the assertion expires.
        let token = cookie["sso_auth=".len()..].split(';').next().unwrap();
        let credential = test_codec().decode(token).unwrap();
        assert_eq!(credential.audience, TEST_AUDIENCE);
        assert_eq!(credential.domain, "app.example.com");
        assert_eq!(credential.valid_until, expires.timestamp_millis());
        assert!(test_codec().is_valid(token, now));
        assert!(!test_codec().is_valid(token, expires));
    }

    #[tokio::test]
    async fn test_base64_body() {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let now = Utc::now();
        let consumer = consumer(engine_valid_until(now + ChronoDuration::hours(1)));

        let raw = format!(
            "SAMLResponse={}&RelayState=%2Fa%2Fb",
            urlencoding::encode(VALID_DOCUMENT)
        );
        let response = consumer
            .handle(&post(RequestBody::base64(STANDARD.encode(raw))), now)
            .await;

        assert_eq!(response.status, 302);
        assert_eq!(response.header("Location"), Some("https://app.example.com/a/b"));
    }

    #[tokio::test]
    async fn test_missing_relay_state_defaults_to_root() {
        let now = Utc::now();
        let consumer = consumer(engine_valid_until(now + ChronoDuration::hours(1)));
        let body =
            RequestBody::text(format!("SAMLResponse={}", urlencoding::encode(VALID_DOCUMENT)));

        let response = consumer.handle(&post(body), now).await;
        assert_eq!(response.header("Location"), Some("https://app.example.com/"));
    }

    #[tokio::test]
    async fn test_offsite_relay_state_is_neutralised() {
        let now = Utc::now();
        let consumer = consumer(engine_valid_until(now + ChronoDuration::hours(1)));

        for relay in ["//evil.com/x", "https://evil.com", "@evil.com", "/\\evil.com", "/a\r\nb"] {
            let response = consumer.handle(&post(form(VALID_DOCUMENT, relay)), now).await;
            assert_eq!(response.status, 302, "{:?}", relay);
            assert_eq!(
                response.header("Location"),
                Some("https://app.example.com/"),
                "{:?}",
                relay
            );
        }
    }

    #[tokio::test]
    async fn test_corrupted_document_rejected() {
        let now = Utc::now();
        let consumer = consumer(engine_valid_until(now + ChronoDuration::hours(1)));

        let response = consumer.handle(&post(form("corrupted", "/reports")), now).await;
        assert_rejected(&response);
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let now = Utc::now();
        let engine = FakeEngine {
            assertion: Some(ValidatedAssertion {
                audience: "urn:another-sp".to_string(),
                not_on_or_after: now + ChronoDuration::hours(1),
            }),
            ..Default::default()
        };

        let response = consumer(engine).handle(&post(form(VALID_DOCUMENT, "/")), now).await;
        assert_rejected(&response);
    }

    #[tokio::test]
    async fn test_expired_assertion_rejected() {
        let now = Utc::now();
        for expires in [now, now - ChronoDuration::seconds(1)] {
            let response = consumer(engine_valid_until(expires))
                .handle(&post(form(VALID_DOCUMENT, "/")), now)
                .await;
            assert_rejected(&response);
        }
    }

    #[tokio::test]
    async fn test_preconditions() {
        let now = Utc::now();
        let consumer = consumer(engine_valid_until(now + ChronoDuration::hours(1)));

        let mut get = post(form(VALID_DOCUMENT, "/"));
        get.method = "GET".to_string();
        assert_rejected(&consumer.handle(&get, now).await);

        let mut no_body = post(form(VALID_DOCUMENT, "/"));
        no_body.body = None;
        assert_rejected(&consumer.handle(&no_body, now).await);

        assert_rejected(&consumer.handle(&post(RequestBody::text("")), now).await);
        assert_rejected(&consumer.handle(&post(RequestBody::base64("%%%")), now).await);
        assert_rejected(&consumer.handle(&post(RequestBody::text("RelayState=%2F")), now).await);
        let empty = post(RequestBody::text("SAMLResponse=&RelayState=%2F"));
        assert_rejected(&consumer.handle(&empty, now).await);

        let no_host = EdgeRequest::new("POST", "/saml/acs").with_body(form(VALID_DOCUMENT, "/"));
        assert_rejected(&consumer.handle(&no_host, now).await);
    }

    #[tokio::test]
    async fn test_slow_engine_times_out() {
        let now = Utc::now();
        let mut engine = engine_valid_until(now + ChronoDuration::hours(1));
        engine.delay = Some(Duration::from_secs(5));

        let response = consumer(engine).handle(&post(form(VALID_DOCUMENT, "/")), now).await;
        assert_rejected(&response);
    }

    #[tokio::test]
    async fn test_blocking_engine_times_out() {
        let now = Utc::now();
        let mut engine = engine_valid_until(now + ChronoDuration::hours(1));
        engine.blocking_delay = Some(Duration::from_millis(800));

        let started = std::time::Instant::now();
        let response = consumer(engine).handle(&post(form(VALID_DOCUMENT, "/")), now).await;
        assert_rejected(&response);
        assert!(started.elapsed() < Duration::from_millis(600), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_blocking_engine_within_deadline() {
        let now = Utc::now();
        let mut engine = engine_valid_until(now + ChronoDuration::hours(1));
        engine.blocking_delay = Some(Duration::from_millis(20));

        let response = consumer(engine).handle(&post(form(VALID_DOCUMENT, "/")), now).await;
        assert_eq!(response.status, 302);
    }

    #[test]
    fn test_parse_form() {
        let form = parse_form("a=1&b=hello+world&c=%2Fx%3Fy%3D1&a=2&flag&&d=");
        assert_eq!(form.get("a").map(String::as_str), Some("2"));
        assert_eq!(form.get("b").map(String::as_str), Some("hello world"));
        assert_eq!(form.get("c").map(String::as_str), Some("/x?y=1"));
        assert_eq!(form.get("flag").map(String::as_str), Some(""));
        assert_eq!(form.get("d").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_form_keeps_base64_plus_encoded() {
        // Base64 '+' must arrive percent-encoded; a literal '+' means space.
        let form = parse_form("SAMLResponse=ab%2Bcd%3D%3D");
        assert_eq!(form.get("SAMLResponse").map(String::as_str), Some("ab+cd=="));
    }

    #[test]
    fn test_safe_relay_state() {
        assert_eq!(safe_relay_state(Some("/reports?tab=1")), "/reports?tab=1");
        assert_eq!(safe_relay_state(Some("/")), "/");
        assert_eq!(safe_relay_state(None), "/");
        assert_eq!(safe_relay_state(Some("")), "/");
        assert_eq!(safe_relay_state(Some("reports")), "/");
        assert_eq!(safe_relay_state(Some("//evil.com")), "/");
        assert_eq!(safe_relay_state(Some("/\\evil.com")), "/");
        assert_eq!(safe_relay_state(Some("/a\tb")), "/");
    }
}
