//! HTTP Upgrade negotiation (RFC 6455 Section 4.2).
//!
//! A [`HandshakeRequest`] is either parsed from raw HTTP data or built from an
//! HTTP framework's header map, then validated into a [`HandshakeResponse`].

use std::borrow::Cow;
use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use url::form_urlencoded;

use crate::error::HandshakeError;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers that must be present and non-empty in an upgrade request.
pub const REQUIRED_HEADERS: &[&str] = &[
    "connection",
    "host",
    "sec-websocket-key",
    "sec-websocket-version",
    "upgrade",
    "origin",
];

type HandshakeResult<T> = std::result::Result<T, HandshakeError>;

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsbus::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// An upgrade request as seen by the negotiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, including the query string.
    pub path: String,
    /// Whether the request arrived over TLS (directly or through a proxy).
    pub secure: bool,
    headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Build a request from already parsed headers. Header names are
    /// matched case-insensitively.
    pub fn from_headers<I, K, V>(path: impl Into<String>, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            path: path.into(),
            secure: false,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.as_ref().trim().to_ascii_lowercase(), value.into()))
                .collect(),
        }
    }

    /// Parse a raw HTTP/1.1 upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::BadRequest`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is malformed, not `GET`, or not `HTTP/1.1`.
    /// - A security-critical header appears twice.
    pub fn parse(data: &[u8]) -> HandshakeResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| HandshakeError::BadRequest("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| HandshakeError::BadRequest("Empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(HandshakeError::BadRequest("Invalid request line".into()));
        }
        if parts[0] != "GET" {
            return Err(HandshakeError::BadRequest(format!(
                "Expected GET method, got {}",
                parts[0]
            )));
        }
        if !parts[2].starts_with("HTTP/1.1") {
            return Err(HandshakeError::BadRequest(format!(
                "Expected HTTP/1.1, got {}",
                parts[2]
            )));
        }

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            if REQUIRED_HEADERS.contains(&name.as_str()) && headers.contains_key(&name) {
                return Err(HandshakeError::BadRequest(format!(
                    "Duplicate header: {name}"
                )));
            }
            headers.insert(name, value.trim().to_string());
        }

        Ok(Self {
            path: parts[1].to_string(),
            secure: false,
            headers,
        })
    }

    /// Mark the request as received over TLS.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Value of a header, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Value of a query string parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        let (_, query) = self.path.split_once('?')?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Whether the `Origin` header names this very host and scheme.
    ///
    /// A missing or unparsable origin is never same-site.
    pub fn is_same_site(&self) -> bool {
        let (Some(origin), Some(host)) = (self.header("origin"), self.header("host")) else {
            return false;
        };
        let Some((scheme, rest)) = origin.split_once("://") else {
            return false;
        };
        let authority = rest.split('/').next().unwrap_or_default();
        let expected_scheme = if self.secure { "https" } else { "http" };
        scheme.eq_ignore_ascii_case(expected_scheme) && authority.eq_ignore_ascii_case(host)
    }

    /// Validate the request and compute the response.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::BadRequest`] if a required header is missing or
    ///   empty, `Upgrade` is not `websocket`, `Connection` lacks the
    ///   `upgrade` token, or the key does not decode to 16 bytes
    /// - [`HandshakeError::UpgradeRequired`] if the version is not one of
    ///   `supported`
    pub fn validate(&self, supported: &[&str]) -> HandshakeResult<HandshakeResponse> {
        let missing: Vec<&str> = REQUIRED_HEADERS
            .iter()
            .copied()
            .filter(|name| self.header(name).is_none_or(str::is_empty))
            .collect();
        if !missing.is_empty() {
            return Err(HandshakeError::BadRequest(format!(
                "Empty or missing header(s): {}",
                missing.join(", ")
            )));
        }

        let header = |name| self.header(name).unwrap_or_default();

        if !header("upgrade").eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::BadRequest(
                "Invalid upgrade header".into(),
            ));
        }
        let has_upgrade_token = header("connection")
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !has_upgrade_token {
            return Err(HandshakeError::BadRequest(
                "Invalid connection header".into(),
            ));
        }
        if !supported.contains(&header("sec-websocket-version")) {
            return Err(HandshakeError::UpgradeRequired {
                supported: supported.iter().map(|v| v.to_string()).collect(),
            });
        }

        let key = header("sec-websocket-key");
        match BASE64.decode(key) {
            Ok(decoded) if decoded.len() == 16 => {}
            _ => {
                return Err(HandshakeError::BadRequest(
                    "Invalid Sec-WebSocket-Key".into(),
                ));
            }
        }

        Ok(HandshakeResponse {
            accept: compute_accept_key(key),
        })
    }
}

/// The `101 Switching Protocols` answer to a valid upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
}

impl HandshakeResponse {
    /// Write the HTTP response to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    /// Response headers, for HTTP frameworks that write the status line
    /// themselves.
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Accept", self.accept.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SUPPORTED_VERSIONS;

    const RAW: &str = "GET /websocket?version=7 HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Origin: http://example.com\r\n\
        \r\n";

    fn request() -> HandshakeRequest {
        HandshakeRequest::parse(RAW.as_bytes()).unwrap()
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_and_validate() {
        let req = request();
        assert_eq!(req.path, "/websocket?version=7");
        assert_eq!(req.header("SEC-WEBSOCKET-VERSION"), Some("13"));

        let response = req.validate(SUPPORTED_VERSIONS).unwrap();
        let mut buf = Vec::new();
        response.write(&mut buf);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_missing_origin_is_bad_request() {
        let raw = RAW.replace("Origin: http://example.com\r\n", "");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        let err = req.validate(SUPPORTED_VERSIONS).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.to_string().contains("origin"));
    }

    #[test]
    fn test_empty_header_is_bad_request() {
        let req = HandshakeRequest::from_headers(
            "/",
            [
                ("Connection", "Upgrade"),
                ("Host", ""),
                ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
                ("Sec-WebSocket-Version", "13"),
                ("Upgrade", "websocket"),
                ("Origin", "http://example.com"),
            ],
        );
        assert!(matches!(
            req.validate(SUPPORTED_VERSIONS),
            Err(HandshakeError::BadRequest(_))
        ));
    }

    #[test]
    fn test_upgrade_header_case_insensitive() {
        let raw = RAW.replace("Upgrade: websocket", "Upgrade: WebSocket");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        assert!(req.validate(SUPPORTED_VERSIONS).is_ok());

        let raw = RAW.replace("Upgrade: websocket", "Upgrade: h2c");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        assert!(matches!(
            req.validate(SUPPORTED_VERSIONS),
            Err(HandshakeError::BadRequest(_))
        ));
    }

    #[test]
    fn test_connection_without_upgrade_token() {
        let raw = RAW.replace("Connection: keep-alive, Upgrade", "Connection: keep-alive");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        assert!(matches!(
            req.validate(SUPPORTED_VERSIONS),
            Err(HandshakeError::BadRequest(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let raw = RAW.replace("Sec-WebSocket-Version: 13", "Sec-WebSocket-Version: 8");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        let err = req.validate(SUPPORTED_VERSIONS).unwrap_err();
        assert_eq!(
            err,
            HandshakeError::UpgradeRequired {
                supported: vec!["13".to_string()]
            }
        );
        assert_eq!(err.status(), 426);
    }

    #[test]
    fn test_key_must_decode_to_16_bytes() {
        let raw = RAW.replace("dGhlIHNhbXBsZSBub25jZQ==", "c2hvcnQ=");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        assert!(matches!(
            req.validate(SUPPORTED_VERSIONS),
            Err(HandshakeError::BadRequest(_))
        ));

        let raw = RAW.replace("dGhlIHNhbXBsZSBub25jZQ==", "not base64!!");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        assert!(req.validate(SUPPORTED_VERSIONS).is_err());
    }

    #[test]
    fn test_duplicate_security_header_rejected() {
        let raw = RAW.replace(
            "Host: example.com\r\n",
            "Host: example.com\r\nHost: evil.com\r\n",
        );
        assert!(matches!(
            HandshakeRequest::parse(raw.as_bytes()),
            Err(HandshakeError::BadRequest(_))
        ));
    }

    #[test]
    fn test_rejects_non_get() {
        let raw = RAW.replacen("GET", "POST", 1);
        assert!(HandshakeRequest::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_query_param() {
        let req = request();
        assert_eq!(req.query_param("version").as_deref(), Some("7"));
        assert_eq!(req.query_param("missing"), None);

        let req = HandshakeRequest::from_headers("/ws?a=1&flag&version=saas-2", Vec::<(&str, &str)>::new());
        assert_eq!(req.query_param("version").as_deref(), Some("saas-2"));
        assert_eq!(req.query_param("flag").as_deref(), Some(""));
    }

    #[test]
    fn test_query_param_is_decoded() {
        let req = HandshakeRequest::from_headers(
            "/websocket?version=saas%7E17.2%2B1&name=a+b",
            Vec::<(&str, &str)>::new(),
        );
        assert_eq!(req.query_param("version").as_deref(), Some("saas~17.2+1"));
        assert_eq!(req.query_param("name").as_deref(), Some("a b"));
    }

    #[test]
    fn test_same_site() {
        let req = request();
        assert!(req.is_same_site());
        assert!(!req.clone().with_secure(true).is_same_site());

        let raw = RAW.replace("Origin: http://example.com", "Origin: http://evil.com");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        assert!(!req.is_same_site());

        let raw = RAW.replace("Origin: http://example.com", "Origin: null");
        let req = HandshakeRequest::parse(raw.as_bytes()).unwrap();
        assert!(!req.is_same_site());
    }
}
