//! NTRIP handshake request/response handling.
//!
//! NTRIP 1.0 speaks HTTP-shaped plaintext: one GET with Basic credentials,
//! answered by either `ICY 200 OK` (classic casters) or an HTTP `200 OK`
//! status, after which the raw correction stream follows on the same
//! connection.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::config::StationConfig;

/// End-of-header marker; bytes after it belong to the correction stream.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Maximum bytes to accept while waiting for the response header.
pub const MAX_RESPONSE_HEADER: usize = 1024;

/// Build the mountpoint request for a station.
pub fn build_request(cfg: &StationConfig) -> String {
    let auth = BASE64.encode(format!("{}:{}", cfg.user, cfg.password));
    format!(
        "GET /{} HTTP/1.0\r\nUser-Agent: NTRIP ntripmon/{}\r\nAuthorization: Basic {}\r\n\r\n",
        cfg.mount,
        env!("CARGO_PKG_VERSION"),
        auth
    )
}

/// Whether a response header indicates the caster accepted the request.
///
/// Casters answer `ICY 200 OK` or an HTTP `200 OK` variant; anything else
/// (401, 404, a sourcetable dump) is a rejection.
pub fn response_accepted(header: &[u8]) -> bool {
    contains(header, b"ICY 200 OK") || contains(header, b"200 OK")
}

/// First line of the response, for error reporting.
pub fn status_line(header: &[u8]) -> String {
    let line = header.split(|&b| b == b'\r' || b == b'\n').next().unwrap_or(header);
    String::from_utf8_lossy(line).into_owned()
}

/// Offset just past the header terminator, if the full header has arrived.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|i| i + HEADER_TERMINATOR.len())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> StationConfig {
        StationConfig {
            name: "test".into(),
            host: "caster.example.net".into(),
            port: 2101,
            mount: "MOUNT1".into(),
            user: "user".into(),
            password: "pass".into(),
            lat: None,
            lon: None,
            alt: None,
        }
    }

    #[test]
    fn request_carries_mount_and_credentials() {
        let req = build_request(&station());
        assert!(req.starts_with("GET /MOUNT1 HTTP/1.0\r\n"));
        // base64("user:pass")
        assert!(req.contains("Authorization: Basic dXNlcjpwYXNz\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn accepts_icy_and_http_ok() {
        assert!(response_accepted(b"ICY 200 OK\r\n\r\n"));
        assert!(response_accepted(b"HTTP/1.1 200 OK\r\nContent-Type: gnss/data\r\n\r\n"));
        assert!(!response_accepted(b"HTTP/1.0 401 Unauthorized\r\n\r\n"));
        assert!(!response_accepted(b"SOURCETABLE 200.\r\n\r\n"));
    }

    #[test]
    fn status_line_is_first_line() {
        assert_eq!(status_line(b"HTTP/1.0 401 Unauthorized\r\nServer: x\r\n"), "HTTP/1.0 401 Unauthorized");
        assert_eq!(status_line(b"ICY 200 OK"), "ICY 200 OK");
    }

    #[test]
    fn header_end_splits_stream_bytes() {
        let response = b"ICY 200 OK\r\n\r\n\xd3\x00\x13";
        let end = header_end(response).unwrap();
        assert_eq!(&response[end..], b"\xd3\x00\x13");
        assert_eq!(header_end(b"ICY 200 OK\r\n"), None);
    }
}
