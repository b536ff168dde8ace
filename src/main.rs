//! SAML Edge Gate Agent
//!
//! This agent puts SAML 2.0 single sign-on in front of an origin served
//! through the Zentinel proxy. Authenticated users carry an encrypted,
//! self-contained session cookie; there is no server-side session state.

mod config;
mod edge;
mod gate;
mod saml;
mod session;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use zentinel_agent_protocol::{
    AgentHandler, AgentResponse, AgentServer, AuditMetadata, ConfigureEvent, HeaderOp,
    RequestBodyChunkEvent, RequestHeadersEvent, ResponseHeadersEvent,
};

use config::GateConfig;
use edge::{BodyEncoding, Disposition, EdgeRequest, EdgeResponse, RequestBody};
use gate::{Gate, RequestLane};
use saml::SamaelEngine;

/// Upper bound on a buffered ACS body. Signed SAML responses are a few tens of KiB.
const MAX_CALLBACK_BODY_BYTES: usize = 1024 * 1024;

/// Upper bound on ACS requests waiting for their body at once.
const MAX_PENDING_CALLBACKS: usize = 1024;

/// A buffered ACS request whose body has not completed within this window is dropped.
const CALLBACK_BODY_TTL: Duration = Duration::from_secs(30);

/// How often abandoned ACS bodies are evicted.
const CALLBACK_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "saml-edge-gate")]
#[command(about = "SAML SSO gate agent for Zentinel reverse proxy")]
struct Args {
    /// Path to Unix socket
    #[arg(long, default_value = "/tmp/saml-edge-gate.sock", env = "AGENT_SOCKET")]
    socket: PathBuf,

    /// Path to the JSON gate configuration
    #[arg(long, env = "GATE_CONFIG")]
    config: PathBuf,

    /// Request body chunks arrive base64-encoded
    #[arg(long, env = "GATE_BASE64_BODIES")]
    base64_bodies: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "GATE_VERBOSE")]
    verbose: bool,
}

/// ACS requests waiting for their body, keyed by correlation id.
struct CallbackBuffer {
    pending: RwLock<HashMap<String, PendingCallback>>,
    encoding: BodyEncoding,
    ttl: Duration,
    max_pending: usize,
}

struct PendingCallback {
    request: EdgeRequest,
    body: Vec<u8>,
    started: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum BufferError {
    Unknown,
    TooLarge,
    Full,
    Poisoned,
}

impl CallbackBuffer {
    fn new(encoding: BodyEncoding) -> Self {
        Self {
            pending: RwLock::default(),
            encoding,
            ttl: CALLBACK_BODY_TTL,
            max_pending: MAX_PENDING_CALLBACKS,
        }
    }

    /// Register an ACS request. Stale entries are evicted first.
    fn start(&self, correlation_id: &str, request: EdgeRequest) -> Result<(), BufferError> {
        let mut pending = self.pending.write().map_err(|_| BufferError::Poisoned)?;
        let ttl = self.ttl;
        pending.retain(|_, entry| entry.started.elapsed() < ttl);

        if pending.len() >= self.max_pending && !pending.contains_key(correlation_id) {
            return Err(BufferError::Full);
        }
        pending.insert(
            correlation_id.to_string(),
            PendingCallback {
                request,
                body: Vec::new(),
                started: Instant::now(),
            },
        );
        Ok(())
    }

    /// Append a chunk. An oversized body drops the whole entry.
    fn append(&self, correlation_id: &str, chunk: &[u8]) -> Result<(), BufferError> {
        let mut pending = self.pending.write().map_err(|_| BufferError::Poisoned)?;
        let entry = pending.get_mut(correlation_id).ok_or(BufferError::Unknown)?;
        if entry.body.len() + chunk.len() > MAX_CALLBACK_BODY_BYTES {
            pending.remove(correlation_id);
            return Err(BufferError::TooLarge);
        }
        entry.body.extend_from_slice(chunk);
        Ok(())
    }

    /// Remove the entry and return its request with the body attached.
    fn finish(&self, correlation_id: &str) -> Result<EdgeRequest, BufferError> {
        let mut pending = self.pending.write().map_err(|_| BufferError::Poisoned)?;
        let PendingCallback { request, body, .. } =
            pending.remove(correlation_id).ok_or(BufferError::Unknown)?;
        // Invalid UTF-8 becomes replacement characters and then fails SAML parsing.
        let body = String::from_utf8_lossy(&body).into_owned();
        let body = match self.encoding {
            BodyEncoding::Text => RequestBody::text(body),
            BodyEncoding::Base64 => RequestBody::base64(body),
        };
        Ok(request.with_body(body))
    }

    /// Drop entries older than the TTL; returns how many were evicted.
    fn sweep_stale(&self) -> Result<usize, BufferError> {
        let mut pending = self.pending.write().map_err(|_| BufferError::Poisoned)?;
        let before = pending.len();
        let ttl = self.ttl;
        pending.retain(|_, entry| entry.started.elapsed() < ttl);
        Ok(before - pending.len())
    }
}

/// Spawn a background task that periodically evicts abandoned ACS bodies.
fn spawn_callback_sweeper(callbacks: Arc<CallbackBuffer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(CALLBACK_SWEEP_INTERVAL);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match callbacks.sweep_stale() {
                Ok(0) => debug!("ACS buffer sweep: nothing to evict"),
                Ok(count) => info!(evicted = count, "Evicted abandoned ACS bodies"),
                Err(e) => warn!(error = ?e, "ACS buffer sweep failed"),
            }
        }
    })
}

/// Where an agent event leaves a request.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// More body chunks are needed before the gate can decide.
    AwaitBody,
    /// The gate decided.
    Decided(Disposition, RequestLane),
}

impl Step {
    fn rejected_callback() -> Self {
        Step::Decided(
            Disposition::Respond(EdgeResponse::invalid_saml_payload()),
            RequestLane::AssertionCallback,
        )
    }
}

/// Zentinel agent wrapping the gate.
pub struct GateAgent {
    gate: Gate,
    callbacks: Arc<CallbackBuffer>,
}

impl GateAgent {
    pub fn new(gate: Gate, body_encoding: BodyEncoding) -> Self {
        Self {
            gate,
            callbacks: Arc::new(CallbackBuffer::new(body_encoding)),
        }
    }

    async fn dispatch(&self, request: EdgeRequest) -> Step {
        let lane = self.gate.lane(&request.uri);
        let disposition = self.gate.handle(request).await;
        Step::Decided(disposition, lane)
    }

    async fn headers_received(
        &self,
        correlation_id: &str,
        headers: &HashMap<String, Vec<String>>,
    ) -> Step {
        let request = edge_request(headers);
        let lane = self.gate.lane(&request.uri);

        if lane == RequestLane::AssertionCallback && expects_body(&request) {
            debug!(correlation_id = %correlation_id, "SAML ACS endpoint hit, waiting for body");
            if let Err(e) = self.callbacks.start(correlation_id, request) {
                warn!(error = ?e, correlation_id = %correlation_id, "Failed to buffer ACS request");
                return Step::rejected_callback();
            }
            return Step::AwaitBody;
        }

        self.dispatch(request).await
    }

    async fn body_chunk_received(&self, correlation_id: &str, data: &str, is_last: bool) -> Step {
        if let Err(e) = self.callbacks.append(correlation_id, data.as_bytes()) {
            warn!(error = ?e, correlation_id = %correlation_id, "Dropping ACS body");
            return Step::rejected_callback();
        }

        if !is_last {
            return Step::AwaitBody;
        }

        match self.callbacks.finish(correlation_id) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!(error = ?e, correlation_id = %correlation_id, "ACS body lost");
                Step::rejected_callback()
            }
        }
    }
}

/// First value of the first present header among `names`.
fn first_header<'a>(headers: &'a HashMap<String, Vec<String>>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.first())
        .map(|s| s.as_str())
}

/// Build the gate's request envelope from agent headers.
fn edge_request(headers: &HashMap<String, Vec<String>>) -> EdgeRequest {
    let target = first_header(headers, &["path", ":path"]).unwrap_or("/");
    let method = first_header(headers, &["method", ":method"])
        .map(|s| s.to_uppercase())
        .unwrap_or_default();

    let mut request = EdgeRequest::from_target(method, target);
    request.headers = headers.clone();
    if request.domain().is_none() {
        if let Some(authority) = first_header(headers, &[":authority"]) {
            request.headers.insert("host".to_string(), vec![authority.to_string()]);
        }
    }
    request
}

/// Whether an ACS request will be followed by body chunks.
fn expects_body(request: &EdgeRequest) -> bool {
    request.is_post() && request.header("content-length").map_or(true, |len| len.trim() != "0")
}

fn audit(tags: &[&str], reason: Option<&str>) -> AuditMetadata {
    AuditMetadata {
        tags: tags.iter().map(|t| t.to_string()).collect(),
        reason_codes: reason.map(|r| vec![r.to_string()]).unwrap_or_default(),
        ..Default::default()
    }
}

/// Audit tags and reason code for an edge response.
fn response_audit(lane: RequestLane, status: u16) -> (Vec<&'static str>, Option<&'static str>) {
    match (lane, status) {
        (RequestLane::Metadata, 200) => (vec!["auth", "saml", "metadata"], None),
        (RequestLane::Metadata, _) => (
            vec!["auth", "saml", "metadata", "blocked"],
            Some("INVALID_REQUEST"),
        ),
        (RequestLane::AssertionCallback, 302) => (vec!["auth", "saml", "session_created"], None),
        (RequestLane::AssertionCallback, _) => (
            vec!["auth", "saml", "failed"],
            Some("SAML_VALIDATION_FAILED"),
        ),
        (RequestLane::ProtectedResource, 307) => {
            (vec!["auth", "saml", "challenge"], Some("AUTH_REQUIRED"))
        }
        (RequestLane::ProtectedResource, _) => {
            (vec!["auth", "saml", "blocked"], Some("AUTH_FORBIDDEN"))
        }
    }
}

fn block(response: EdgeResponse, lane: RequestLane) -> AgentResponse {
    debug!(
        lane = %lane,
        status = response.status,
        description = %response.status_description,
        "Answering at the edge"
    );
    let (tags, reason) = response_audit(lane, response.status);
    let mut agent_response = AgentResponse::block(response.status, response.body);
    for (name, values) in response.headers {
        for value in values {
            agent_response = agent_response.add_response_header(HeaderOp::Set {
                name: name.clone(),
                value,
            });
        }
    }
    agent_response.with_audit(audit(&tags, reason))
}

fn into_agent_response(step: Step) -> AgentResponse {
    match step {
        Step::AwaitBody => AgentResponse::needs_more_data(),
        Step::Decided(Disposition::Forward(request), _) => {
            debug!(path = %request.uri, "Session valid, forwarding to origin");
            AgentResponse::default_allow()
                .with_audit(audit(&["auth", "saml", "session_valid"], None))
        }
        Step::Decided(Disposition::Respond(response), lane) => block(response, lane),
    }
}

#[async_trait::async_trait]
impl AgentHandler for GateAgent {
    async fn on_configure(&self, _event: ConfigureEvent) -> AgentResponse {
        // Configuration is fixed at startup; runtime pushes are acknowledged only.
        info!("Ignoring runtime configuration push");
        AgentResponse::default_allow()
    }

    async fn on_request_headers(&self, event: RequestHeadersEvent) -> AgentResponse {
        into_agent_response(
            self.headers_received(&event.metadata.correlation_id, &event.headers)
                .await,
        )
    }

    async fn on_request_body_chunk(&self, event: RequestBodyChunkEvent) -> AgentResponse {
        into_agent_response(
            self.body_chunk_received(&event.correlation_id, &event.data, event.is_last)
                .await,
        )
    }

    async fn on_response_headers(&self, _event: ResponseHeadersEvent) -> AgentResponse {
        AgentResponse::default_allow()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},zentinel_agent_protocol=info",
            env!("CARGO_CRATE_NAME"),
            log_level
        ))
        .json()
        .init();

    info!("Starting SAML Edge Gate");

    let config = GateConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load gate config from {:?}", args.config))?;

    info!(
        audience = %config.saml.audience,
        acs_path = %config.saml.acs_path,
        metadata_path = %config.saml.metadata_path,
        cookie_name = %config.saml.cookie_name,
        sign_authn_requests = config.saml.sign_authn_requests,
        validation_timeout_ms = config.validation_timeout_ms,
        "Configuration loaded"
    );

    let engine =
        SamaelEngine::new(config.saml.clone()).context("Failed to initialize SAML engine")?;

    let gate = Gate::new(&config, Arc::new(engine)).context("Failed to initialize session codec")?;
    let body_encoding = if args.base64_bodies {
        BodyEncoding::Base64
    } else {
        BodyEncoding::Text
    };
    let agent = GateAgent::new(gate, body_encoding);
    let _sweeper = spawn_callback_sweeper(Arc::clone(&agent.callbacks));

    info!(socket = ?args.socket, "Starting agent server");
    let server = AgentServer::new("saml-edge-gate", args.socket, Box::new(agent));
    server.run().await.map_err(|e| anyhow!("{}", e))?;

    Ok(())
}
