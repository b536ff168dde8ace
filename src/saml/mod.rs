//! SAML Service Provider support.
//!
//! Provides the assertion engine capability (AuthnRequest construction,
//! response validation) and the SP metadata document.

pub mod config;
pub mod engine;
pub mod metadata;
pub mod provider;

pub use config::SamlConfig;
pub use engine::{AssertionEngine, EngineError, ValidatedAssertion};
pub use provider::SamaelEngine;
