//! Header policy for HTTP-class transports.
//!
//! Every outgoing request carries exactly one `mcp-protocol-version`
//! header with the canonical value. User-supplied headers are accepted
//! but lowercased, and may not override the protocol header.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::constants::MCP_PROTOCOL_VERSION;

pub const PROTOCOL_HEADER: &str = "mcp-protocol-version";

/// Lowercase all user header keys (keys sorted first, so when two keys
/// collide after lowercasing the later one wins deterministically), then
/// pin the protocol header.
pub fn normalized_headers(user: &HashMap<String, String>) -> HashMap<String, String> {
    let mut sorted: Vec<(&String, &String)> = user.iter().collect();
    sorted.sort_by_key(|(k, _)| k.as_str().to_owned());

    let mut headers = HashMap::new();
    for (key, value) in sorted {
        headers.insert(key.to_ascii_lowercase(), value.clone());
    }

    headers.insert(PROTOCOL_HEADER.to_string(), MCP_PROTOCOL_VERSION.to_string());
    headers
}

/// Convert to a reqwest header map, skipping anything unrepresentable.
pub fn to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            tracing::warn!(header = %key, "skipping invalid header name");
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            tracing::warn!(header = %key, "skipping invalid header value");
            continue;
        };
        map.insert(name, value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_header_always_present() {
        let headers = normalized_headers(&HashMap::new());
        assert_eq!(headers[PROTOCOL_HEADER], MCP_PROTOCOL_VERSION);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn user_keys_are_lowercased() {
        let mut user = HashMap::new();
        user.insert("Authorization".to_string(), "Bearer token123".to_string());
        user.insert("X-Custom-Header".to_string(), "custom-value".to_string());

        let headers = normalized_headers(&user);
        assert_eq!(headers["authorization"], "Bearer token123");
        assert_eq!(headers["x-custom-header"], "custom-value");
        assert!(!headers.contains_key("Authorization"));
        assert!(!headers.contains_key("X-Custom-Header"));
    }

    #[test]
    fn user_cannot_override_protocol_header() {
        let mut user = HashMap::new();
        user.insert("MCP-Protocol-Version".to_string(), "1999-01-01".to_string());

        let headers = normalized_headers(&user);
        assert_eq!(headers[PROTOCOL_HEADER], MCP_PROTOCOL_VERSION);
        // Exactly one header survives for the protocol key.
        let count = headers.keys().filter(|k| *k == PROTOCOL_HEADER).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn header_map_conversion_drops_invalid_entries() {
        let mut headers = HashMap::new();
        headers.insert("x-ok".to_string(), "fine".to_string());
        headers.insert("bad header".to_string(), "value".to_string());

        let map = to_header_map(&headers);
        assert!(map.contains_key("x-ok"));
        assert_eq!(map.len(), 1);
    }
}
