//! Request/response envelope exchanged with the edge platform.
//!
//! The gate never talks to the platform directly: it receives an
//! [`EdgeRequest`] and returns a [`Disposition`], which the platform adapter
//! turns into whatever the proxy expects.

pub mod cookies;
pub mod request;
pub mod response;

pub use cookies::{build_session_cookie, parse_cookies};
pub use request::{BodyEncoding, EdgeRequest, RequestBody};
pub use response::{Disposition, EdgeResponse};
