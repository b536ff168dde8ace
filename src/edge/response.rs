//! Outbound response envelope and the fixed responses the gate can emit.

use std::collections::HashMap;

use super::request::EdgeRequest;

/// `Cache-Control` value for every response that must not be cached.
pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// A response produced at the edge instead of forwarding to the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeResponse {
    pub status: u16,
    pub status_description: String,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Option<String>,
}

impl EdgeResponse {
    pub fn new(status: u16, status_description: impl Into<String>) -> Self {
        Self {
            status,
            status_description: status_description.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First value of a header, matched case-insensitively.
    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(|s| s.as_str())
    }

    fn fixed(status: u16, description: &str) -> Self {
        Self::new(status, description)
            .with_header("Cache-Control", NO_CACHE)
            .with_body(description)
    }

    /// Gate leg: the request cannot be authenticated or challenged.
    pub fn access_forbidden() -> Self {
        Self::fixed(403, "Access Forbidden")
    }

    /// Callback leg: the posted assertion was rejected.
    pub fn invalid_saml_payload() -> Self {
        Self::fixed(400, "Invalid SAML Payload")
    }

    /// Metadata leg: no host to describe.
    pub fn invalid_request() -> Self {
        Self::fixed(400, "Invalid Request")
    }

    /// Challenge: send the client to the IdP, preserving method and body.
    pub fn temporary_redirect(location: impl Into<String>) -> Self {
        Self::new(307, "Temporary Redirect")
            .with_header("Location", location)
            .with_header("Cache-Control", NO_CACHE)
    }

    /// Post-login redirect back to the original resource.
    pub fn found(location: impl Into<String>) -> Self {
        Self::new(302, "Found")
            .with_header("Location", location)
            .with_header("Cache-Control", NO_CACHE)
    }
}

/// What the gate decided to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Pass the request through to the origin unchanged.
    Forward(EdgeRequest),
    /// Answer at the edge.
    Respond(EdgeResponse),
}

#[cfg(test)]
impl Disposition {
    pub fn response(&self) -> Option<&EdgeResponse> {
        match self {
            Disposition::Respond(response) => Some(response),
            Disposition::Forward(_) => None,
        }
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, Disposition::Forward(_))
    }
}
