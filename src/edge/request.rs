//! Inbound request envelope.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;

/// Transport encoding of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    #[default]
    Text,
    Base64,
}

/// Request body as handed over by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub data: String,
    pub encoding: BodyEncoding,
}

impl RequestBody {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            encoding: BodyEncoding::Text,
        }
    }

    pub fn base64(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            encoding: BodyEncoding::Base64,
        }
    }

    /// Decode the body according to its declared encoding.
    ///
    /// Returns `None` if a base64 body does not decode to UTF-8 text.
    pub fn decoded(&self) -> Option<String> {
        match self.encoding {
            BodyEncoding::Text => Some(self.data.clone()),
            BodyEncoding::Base64 => {
                let bytes = BASE64.decode(self.data.trim()).ok()?;
                String::from_utf8(bytes).ok()
            }
        }
    }
}

/// A request intercepted at the edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeRequest {
    /// HTTP method as sent by the client.
    pub method: String,
    /// Request path without the query string.
    pub uri: String,
    /// Raw query string (without the leading `?`).
    pub querystring: String,
    /// Header multimap; names are kept as received.
    pub headers: HashMap<String, Vec<String>>,
    pub body: Option<RequestBody>,
}

impl EdgeRequest {
    #[cfg(test)]
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Split a request target (`/path?query`) into path and query.
    pub fn from_target(method: impl Into<String>, target: &str) -> Self {
        let (uri, querystring) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        Self {
            method: method.into(),
            uri: uri.to_string(),
            querystring: querystring.to_string(),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// All values of a header, matched case-insensitively.
    ///
    /// Values under the lowercase spelling come first, then other spellings
    /// in name order.
    pub fn header_values(&self, name: &str) -> impl Iterator<Item = &str> {
        let lower = name.to_ascii_lowercase();
        let mut spellings: Vec<(&String, &Vec<String>)> = self
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .collect();
        spellings.sort_by(|(a, _), (b, _)| {
            (**a != lower)
                .cmp(&(**b != lower))
                .then_with(|| a.cmp(b))
        });
        spellings
            .into_iter()
            .flat_map(|(_, values)| values.iter().map(String::as_str))
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).next()
    }

    /// Host the request was addressed to.
    pub fn domain(&self) -> Option<&str> {
        self.header("host").filter(|h| !h.is_empty())
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }
}
