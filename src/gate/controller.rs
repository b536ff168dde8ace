//! Access decision for protected resources.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::edge::{parse_cookies, Disposition, EdgeRequest, EdgeResponse};
use crate::saml::AssertionEngine;
use crate::session::SessionCodec;

/// Grants requests carrying a valid session cookie and challenges the rest.
pub struct GateController {
    codec: Arc<SessionCodec>,
    engine: Arc<dyn AssertionEngine>,
    cookie_name: String,
}

impl GateController {
    pub fn new(
        codec: Arc<SessionCodec>,
        engine: Arc<dyn AssertionEngine>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            engine,
            cookie_name: cookie_name.into(),
        }
    }

    /// Decide what happens to a protected-resource request at `now`.
    pub fn handle(&self, request: EdgeRequest, now: DateTime<Utc>) -> Disposition {
        let Some(domain) = request.domain() else {
            warn!(path = %request.uri, "No host header, cannot build callback URL");
            return Disposition::Respond(EdgeResponse::access_forbidden());
        };

        let cookies = parse_cookies(request.header_values("cookie"));
        if let Some(token) = cookies.get(&self.cookie_name) {
            if self.codec.is_valid(token, now) {
                debug!(path = %request.uri, "Session valid, forwarding");
                return Disposition::Forward(request);
            }
        }

        match self.engine.build_login_request(domain, &request.uri) {
            Ok(login_url) => {
                info!(
                    path = %request.uri,
                    domain = %domain,
                    "No valid session, redirecting to SAML IdP"
                );
                Disposition::Respond(EdgeResponse::temporary_redirect(login_url))
            }
            Err(e) => {
                error!(error = %e, domain = %domain, "Failed to create SAML login request");
                Disposition::Respond(EdgeResponse::access_forbidden())
            }
        }
    }
}
