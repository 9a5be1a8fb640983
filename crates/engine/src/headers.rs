use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// Characters that may not appear in a header field name.
const DISALLOWED_KEY_CHARS: &[char] = &[
    ':', '(', ')', '<', '>', '@', ',', ';', '"', '/', '\\', '[', ']', '?', '=', '{', '}', ' ',
    '\t',
];

/// Caller headers never sent to units: connection-scoped ones, plus
/// `accept-encoding` since unit response headers are not relayed back.
const NOT_FORWARDED: &[&str] = &[
    "accept-encoding",
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn sanitize_header_key(key: &str) -> String {
    key.chars()
        .filter(|c| !DISALLOWED_KEY_CHARS.contains(c))
        .collect()
}

/// Build the outbound header set from caller headers.
///
/// Keys are sanitized first; entries that still do not form a valid header
/// afterwards are dropped. Payloads default to `application/octet-stream`.
pub fn forwarded_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len() + 1);
    for (key, value) in headers {
        let cleaned = sanitize_header_key(key);
        if cleaned.is_empty() || is_not_forwarded(&cleaned) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(cleaned.as_bytes()) else {
            tracing::debug!(header = %key, "dropping unforwardable header name");
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            tracing::debug!(header = %key, "dropping unforwardable header value");
            continue;
        };
        out.append(name, value);
    }
    if !out.contains_key(CONTENT_TYPE) {
        out.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
    }
    out
}

fn is_not_forwarded(key: &str) -> bool {
    NOT_FORWARDED.iter().any(|name| name.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(values: &[(&str, &str)]) -> Vec<(String, String)> {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn strips_every_disallowed_character() {
        assert_eq!(
            sanitize_header_key("X-:()<>@,;\"/\\[]?={} \tKey"),
            "X-Key"
        );
        assert_eq!(sanitize_header_key("X-Plain-Key"), "X-Plain-Key");
    }

    #[test]
    fn forwards_sanitized_names() {
        let headers = forwarded_headers(&pairs(&[("X-(Trace) Id", "abc"), ("Accept", "*/*")]));
        assert_eq!(headers.get("x-traceid").unwrap(), "abc");
        assert_eq!(headers.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn drops_hop_by_hop_and_empty_names() {
        let headers = forwarded_headers(&pairs(&[
            ("Host", "proxy:8000"),
            ("Content-Length", "12"),
            ("Connection", "keep-alive"),
            ("::", "x"),
        ]));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/octet-stream");
    }

    #[test]
    fn drops_accept_encoding() {
        let headers = forwarded_headers(&pairs(&[
            ("Accept-Encoding", "gzip, br"),
            ("X-Trace", "abc"),
        ]));
        assert!(headers.get("accept-encoding").is_none());
        assert_eq!(headers.get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn keeps_caller_content_type_and_drops_bad_values() {
        let headers = forwarded_headers(&pairs(&[
            ("Content-Type", "application/json"),
            ("X-Bad", "line\nbreak"),
            ("X-Ünicode", "v"),
        ]));
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(headers.get("x-bad").is_none());
        assert_eq!(headers.len(), 1);
    }
}
