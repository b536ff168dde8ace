//! samael-backed SAML Service Provider.
//!
//! Builds SP-initiated AuthnRequests for the redirect binding and validates
//! SAML responses posted back to the ACS.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use openssl::pkey::{PKey, Private};
use samael::metadata::EntityDescriptor;
use samael::schema::Assertion;
use samael::service_provider::{ServiceProvider, ServiceProviderBuilder};
use std::sync::Arc;
use tracing::{debug, info};

use super::config::SamlConfig;
use super::engine::{run_blocking, AssertionEngine, EngineError, ValidatedAssertion};
use super::metadata::{certificate_body, sp_metadata, xml_escape};

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// SAML engine backed by samael.
pub struct SamaelEngine {
    provider: Arc<Provider>,
}

/// Immutable SP state, shared with validation tasks on the blocking pool.
struct Provider {
    config: SamlConfig,
    idp_metadata: EntityDescriptor,
    idp_sso_url: String,
    /// Present only when AuthnRequests are signed.
    signing_key: Option<PKey<Private>>,
}

impl SamaelEngine {
    /// Create the engine, resolving IdP metadata and signing material once.
    pub fn new(config: SamlConfig) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Config)?;

        if !cfg!(feature = "xmlsec") && !config.allow_unsigned_assertions {
            return Err(EngineError::Config(
                "verifying response signatures needs the `xmlsec` feature; \
                 set allow_unsigned_assertions to run without it"
                    .to_string(),
            ));
        }

        let idp_metadata = load_idp_metadata(&config)?;
        let idp_sso_url = match &config.idp_sso_url {
            Some(url) => url.clone(),
            None => sso_url_from_metadata(&idp_metadata)?,
        };

        let signing_key = if config.sign_authn_requests {
            let pem = config.signing_private_key_pem.as_ref().ok_or_else(|| {
                EngineError::Config(
                    "sign_authn_requests requires signing_private_key_pem".to_string(),
                )
            })?;
            let key = PKey::private_key_from_pem(pem.as_bytes()).map_err(|e| {
                EngineError::Config(format!(
                    "Failed to parse SP private key (expected PEM format): {}",
                    e
                ))
            })?;
            Some(key)
        } else {
            None
        };

        info!(
            audience = %config.audience,
            idp_sso_url = %idp_sso_url,
            signed_requests = signing_key.is_some(),
            "SAML engine initialized"
        );

        Ok(Self {
            provider: Arc::new(Provider {
                config,
                idp_metadata,
                idp_sso_url,
                signing_key,
            }),
        })
    }

    /// IdP SSO URL AuthnRequests are sent to.
    #[cfg(test)]
    pub fn idp_sso_url(&self) -> &str {
        &self.provider.idp_sso_url
    }
}

impl Provider {
    /// samael SP for the ACS of a given host.
    fn service_provider(&self, domain: &str) -> Result<ServiceProvider, EngineError> {
        ServiceProviderBuilder::default()
            .entity_id(self.config.audience.clone())
            .acs_url(self.config.acs_url(domain))
            .idp_metadata(self.idp_metadata.clone())
            // No store of outstanding request IDs to match InResponseTo against.
            .allow_idp_initiated(true)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build ServiceProvider: {}", e)))
    }

    /// AuthnRequest over the redirect binding, signed when a key is configured.
    fn login_url(&self, domain: &str, relay_state: &str) -> Result<String, EngineError> {
        let sp = self.service_provider(domain)?;
        let authn_request = sp
            .make_authentication_request(&self.idp_sso_url)
            .map_err(|e| EngineError::Config(format!("Failed to create AuthnRequest: {}", e)))?;

        let url = match &self.signing_key {
            Some(key) => authn_request
                .signed_redirect(relay_state, key.clone())
                .map_err(|e| EngineError::Config(format!("Failed to sign AuthnRequest: {}", e)))?,
            None => authn_request
                .redirect(relay_state)
                .map_err(|e| EngineError::Config(format!("Failed to encode AuthnRequest: {}", e)))?,
        };

        url.map(|url| url.to_string())
            .ok_or_else(|| EngineError::Config("AuthnRequest has no destination".to_string()))
    }

    fn validate(
        &self,
        domain: &str,
        raw_document: &str,
    ) -> Result<ValidatedAssertion, EngineError> {
        // IdPs may line-wrap the base64 payload.
        let compact: String = raw_document.split_whitespace().collect();

        let response_xml = String::from_utf8(BASE64.decode(&compact)?)?;
        debug!(xml_len = response_xml.len(), "Processing SAML response");

        let response: samael::schema::Response = response_xml
            .parse()
            .map_err(|e| EngineError::Parse(format!("{}", e)))?;

        if let Some(ref status) = response.status {
            let status_value = status.status_code.value.as_deref();
            if status_value != Some(STATUS_SUCCESS) {
                let message = status
                    .status_message
                    .as_ref()
                    .and_then(|m| m.value.clone())
                    .unwrap_or_else(|| status_value.unwrap_or("unknown").to_string());
                return Err(EngineError::Status(message));
            }
        }

        let sp = self.service_provider(domain)?;
        let assertion = sp
            .parse_base64_response(&compact, None)
            .map_err(|e| EngineError::Validation(format!("{}", e)))?;

        summarize_assertion(&assertion)
    }
}

#[async_trait]
impl AssertionEngine for SamaelEngine {
    fn build_service_descriptor(&self, domain: &str) -> Result<String, EngineError> {
        Ok(sp_metadata(&self.provider.config, domain))
    }

    fn build_login_request(&self, domain: &str, relay_state: &str) -> Result<String, EngineError> {
        let url = self.provider.login_url(domain, relay_state)?;
        debug!(domain = %domain, relay_state = %relay_state, "Created SAML AuthnRequest redirect");
        Ok(url)
    }

    async fn validate_response(
        &self,
        domain: &str,
        raw_document: &str,
    ) -> Result<ValidatedAssertion, EngineError> {
        let provider = Arc::clone(&self.provider);
        let domain = domain.to_string();
        let raw_document = raw_document.to_string();
        run_blocking(move || provider.validate(&domain, &raw_document)).await
    }
}

/// Audience and expiry of an assertion samael has accepted.
fn summarize_assertion(assertion: &Assertion) -> Result<ValidatedAssertion, EngineError> {
    let conditions = assertion
        .conditions
        .as_ref()
        .ok_or_else(|| EngineError::Validation("assertion has no conditions".to_string()))?;

    let audience = conditions
        .audience_restrictions
        .as_ref()
        .and_then(|restrictions| restrictions.first())
        .and_then(|restriction| restriction.audience.first())
        .cloned()
        .ok_or_else(|| EngineError::Validation("assertion has no audience".to_string()))?;

    let not_on_or_after = conditions
        .not_on_or_after
        .ok_or_else(|| EngineError::Validation("assertion has no NotOnOrAfter".to_string()))?;

    Ok(ValidatedAssertion {
        audience,
        not_on_or_after,
    })
}

/// Parse inline IdP metadata, or synthesize it from the direct IdP fields.
fn load_idp_metadata(config: &SamlConfig) -> Result<EntityDescriptor, EngineError> {
    let xml = match &config.idp_metadata_xml {
        Some(xml) => xml.clone(),
        None => synthesize_idp_metadata(config)?,
    };

    samael::metadata::de::from_str(&xml)
        .map_err(|e| EngineError::Parse(format!("IdP metadata: {}", e)))
}

fn synthesize_idp_metadata(config: &SamlConfig) -> Result<String, EngineError> {
    let missing = |field: &str| EngineError::Config(format!("IdP {} not configured", field));
    let entity_id = config.idp_entity_id.as_ref().ok_or_else(|| missing("entity ID"))?;
    let sso_url = config.idp_sso_url.as_ref().ok_or_else(|| missing("SSO URL"))?;
    let certificate = config.idp_certificate_pem.as_ref().ok_or_else(|| missing("certificate"))?;

    Ok(format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        xml_escape(entity_id),
        certificate_body(certificate),
        xml_escape(sso_url)
    ))
}

/// SSO endpoint from IdP metadata, preferring the HTTP-Redirect binding.
fn sso_url_from_metadata(entity: &EntityDescriptor) -> Result<String, EngineError> {
    let idp_descriptor = entity
        .idp_sso_descriptors
        .as_ref()
        .and_then(|d| d.first())
        .ok_or_else(|| EngineError::Config("IdP metadata missing IDPSSODescriptor".to_string()))?;

    idp_descriptor
        .single_sign_on_services
        .iter()
        .find(|s| s.binding.contains("HTTP-Redirect"))
        .or_else(|| idp_descriptor.single_sign_on_services.first())
        .map(|s| s.location.clone())
        .ok_or_else(|| EngineError::Config("IdP metadata missing SingleSignOnService".to_string()))
}
