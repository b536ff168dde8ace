//! SAML Service Provider identity and IdP trust configuration.

use serde::{Deserialize, Serialize};

/// Marker left in unprovisioned secrets files.
pub const PLACEHOLDER_MARKER: &str = "PLACEHOLDER";

/// SAML Service Provider configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// SP entity ID; also the audience assertions and session tokens must carry.
    pub audience: String,

    /// Assertion Consumer Service path (where the IdP posts the SAML response).
    #[serde(default = "default_acs_path")]
    pub acs_path: String,

    /// Path serving this SP's metadata document.
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,

    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// IdP metadata XML (inline).
    #[serde(default)]
    pub idp_metadata_xml: Option<String>,

    /// IdP Entity ID (direct configuration, alternative to metadata).
    #[serde(default)]
    pub idp_entity_id: Option<String>,

    /// IdP SSO URL. Overrides the one found in metadata when both are set.
    #[serde(default)]
    pub idp_sso_url: Option<String>,

    /// IdP certificate (PEM format, for signature verification).
    #[serde(default)]
    pub idp_certificate_pem: Option<String>,

    /// SP certificate (PEM format, published in SP metadata).
    pub signing_certificate_pem: String,

    /// SP private key (PEM format, for signing AuthnRequests).
    #[serde(default)]
    pub signing_private_key_pem: Option<String>,

    /// Sign AuthnRequests sent over the redirect binding.
    #[serde(default)]
    pub sign_authn_requests: bool,

    /// Accept responses without verifying their XML signature.
    /// Only meaningful when built without the `xmlsec` feature; NOT for production.
    #[serde(default)]
    pub allow_unsigned_assertions: bool,
}

fn default_acs_path() -> String {
    "/saml/acs".to_string()
}

fn default_metadata_path() -> String {
    "/saml/metadata.xml".to_string()
}

fn default_cookie_name() -> String {
    "sso_auth".to_string()
}

impl SamlConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(field) = self.placeholder_field() {
            return Err(format!("SAML {} still contains a placeholder value", field));
        }

        if self.audience.trim().is_empty() {
            return Err("SAML audience is required".to_string());
        }

        if self.signing_certificate_pem.trim().is_empty() {
            return Err("SAML signing_certificate_pem is required".to_string());
        }

        // Must have either metadata or direct IdP config
        let has_metadata = self.idp_metadata_xml.is_some();
        let has_direct_config = self.idp_sso_url.is_some()
            && self.idp_entity_id.is_some()
            && self.idp_certificate_pem.is_some();

        if !has_metadata && !has_direct_config {
            return Err(
                "SAML requires either idp_metadata_xml or idp_sso_url+idp_entity_id+idp_certificate_pem"
                    .to_string(),
            );
        }

        if self.sign_authn_requests && self.signing_private_key_pem.is_none() {
            return Err("sign_authn_requests requires signing_private_key_pem".to_string());
        }

        for (name, path) in [("acs_path", &self.acs_path), ("metadata_path", &self.metadata_path)] {
            if !path.starts_with('/') {
                return Err(format!("SAML {} must start with '/'", name));
            }
        }

        if self.acs_path == self.metadata_path {
            return Err("SAML acs_path and metadata_path must differ".to_string());
        }

        if self.cookie_name.trim().is_empty() || self.cookie_name.contains(['=', ';', ' ']) {
            return Err("SAML cookie_name must be a non-empty cookie token".to_string());
        }

        Ok(())
    }

    /// Name of the first field still holding a provisioning placeholder.
    fn placeholder_field(&self) -> Option<&'static str> {
        let fields = [
            ("audience", Some(self.audience.as_str())),
            ("acs_path", Some(self.acs_path.as_str())),
            ("metadata_path", Some(self.metadata_path.as_str())),
            ("cookie_name", Some(self.cookie_name.as_str())),
            ("idp_metadata_xml", self.idp_metadata_xml.as_deref()),
            ("idp_entity_id", self.idp_entity_id.as_deref()),
            ("idp_sso_url", self.idp_sso_url.as_deref()),
            ("idp_certificate_pem", self.idp_certificate_pem.as_deref()),
            ("signing_certificate_pem", Some(self.signing_certificate_pem.as_str())),
            ("signing_private_key_pem", self.signing_private_key_pem.as_deref()),
        ];

        fields
            .into_iter()
            .find(|(_, value)| value.is_some_and(|v| v.contains(PLACEHOLDER_MARKER)))
            .map(|(name, _)| name)
    }

    /// Check if the path is the ACS endpoint.
    pub fn is_acs_path(&self, path: &str) -> bool {
        path == self.acs_path
    }

    /// Check if the path is the SP metadata endpoint.
    pub fn is_metadata_path(&self, path: &str) -> bool {
        path == self.metadata_path
    }

    /// ACS URL for a given host.
    pub fn acs_url(&self, domain: &str) -> String {
        format!("https://{}{}", domain, self.acs_path)
    }
}

impl std::fmt::Debug for SamlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlConfig")
            .field("audience", &self.audience)
            .field("acs_path", &self.acs_path)
            .field("metadata_path", &self.metadata_path)
            .field("cookie_name", &self.cookie_name)
            .field("idp_metadata_xml", &self.idp_metadata_xml.as_ref().map(|x| x.len()))
            .field("idp_entity_id", &self.idp_entity_id)
            .field("idp_sso_url", &self.idp_sso_url)
            .field("sign_authn_requests", &self.sign_authn_requests)
            .field("allow_unsigned_assertions", &self.allow_unsigned_assertions)
            .finish_non_exhaustive()
    }
}
