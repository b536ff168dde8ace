//! Request routing by path.

use crate::saml::SamlConfig;

/// Which handler a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLane {
    /// SP metadata document.
    Metadata,
    /// IdP posting a SAML response to the ACS.
    AssertionCallback,
    /// Anything else: requires a session.
    ProtectedResource,
}

impl std::fmt::Display for RequestLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestLane::Metadata => write!(f, "metadata"),
            RequestLane::AssertionCallback => write!(f, "acs"),
            RequestLane::ProtectedResource => write!(f, "protected"),
        }
    }
}

/// Exact-match classifier over the two protocol paths.
///
/// No normalisation: the paths are shared with the IdP and must match byte for byte.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    config: SamlConfig,
}

impl RequestClassifier {
    pub fn new(config: &SamlConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn classify(&self, path: &str) -> RequestLane {
        if self.config.is_metadata_path(path) {
            RequestLane::Metadata
        } else if self.config.is_acs_path(path) {
            RequestLane::AssertionCallback
        } else {
            RequestLane::ProtectedResource
        }
    }
}
