//! Stateless session handling.
//!
//! The authenticated principal is carried entirely in an encrypted cookie;
//! nothing is stored server-side.

pub mod codec;
pub mod config;
pub mod types;

pub use codec::{CodecError, SessionCodec};
pub use config::SessionKeyConfig;
pub use types::SessionCredential;
