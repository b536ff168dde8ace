//! Cookie header parsing and session cookie rendering.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Parse every `Cookie` header value into a name → value map.
///
/// Values are split on the first `=` only, so base64 padding and other
/// `=`-bearing values survive. Later occurrences of a name win.
pub fn parse_cookies<'a>(
    header_values: impl IntoIterator<Item = &'a str>,
) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for header in header_values {
        for part in header.split(';') {
            if let Some((name, value)) = part.split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// Build the `Set-Cookie` value carrying a session token.
pub fn build_session_cookie(name: &str, token: &str, expires: DateTime<Utc>) -> String {
    format!(
        "{}={}; Expires={}; Path=/; Secure; HttpOnly; SameSite=Lax",
        name,
        token,
        http_date(expires)
    )
}

/// IMF-fixdate, e.g. `Sat, 17 Oct 2026 12:00:00 GMT`.
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
