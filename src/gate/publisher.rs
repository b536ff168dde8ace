//! SP metadata endpoint.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::edge::{EdgeRequest, EdgeResponse};
use crate::saml::AssertionEngine;

/// Metadata is host-specific but otherwise static; let clients keep it for a day.
const METADATA_CACHE_CONTROL: &str = "max-age=86400";

/// Serves the SP metadata document for the requesting host.
pub struct MetadataPublisher {
    engine: Arc<dyn AssertionEngine>,
}

impl MetadataPublisher {
    pub fn new(engine: Arc<dyn AssertionEngine>) -> Self {
        Self { engine }
    }

    pub fn handle(&self, request: &EdgeRequest) -> EdgeResponse {
        let Some(domain) = request.domain() else {
            warn!("Metadata requested without a host header");
            return EdgeResponse::invalid_request();
        };

        match self.engine.build_service_descriptor(domain) {
            Ok(xml) => {
                debug!(domain = %domain, "Serving SP metadata");
                EdgeResponse::new(200, "OK")
                    .with_header("Content-Type", "application/xml")
                    .with_header("Cache-Control", METADATA_CACHE_CONTROL)
                    .with_body(xml)
            }
            Err(e) => {
                error!(error = %e, domain = %domain, "Failed to build SP metadata");
                EdgeResponse::invalid_request()
            }
        }
    }
}
