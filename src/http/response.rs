//! Canned client replies and origin response inspection.
//!
//! # Responsibilities
//! - Fixed status replies written by the proxy itself
//! - Diagnostic classification of raw origin responses
//!
//! # Design Decisions
//! - Origin responses are never rewritten; bytes are relayed exactly as received
//! - Inspection is literal substring matching and only feeds logs

/// Reply after a tunnel to the CONNECT target is ready.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
pub const METHOD_NOT_ALLOWED: &[u8] = b"HTTP/1.1 405 Method Not Allowed\r\n\r\n";
pub const PAYLOAD_TOO_LARGE: &[u8] = b"HTTP/1.1 413 Payload Too Large\r\n\r\n";
pub const INTERNAL_SERVER_ERROR: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n\r\n";

/// Origin failure statuses worth a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginFailure {
    NotFound,
    Forbidden,
    ServerError,
}

impl OriginFailure {
    fn marker(&self) -> &'static [u8] {
        match self {
            OriginFailure::NotFound => b"404 Not Found",
            OriginFailure::Forbidden => b"403 Forbidden",
            OriginFailure::ServerError => b"500 Internal Server Error",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            OriginFailure::NotFound => 404,
            OriginFailure::Forbidden => 403,
            OriginFailure::ServerError => 500,
        }
    }
}

/// Find the first failure marker present anywhere in a raw response.
///
/// Markers are checked in order 404, 403, 500; the first hit wins.
pub fn detect_failure(raw: &[u8]) -> Option<OriginFailure> {
    [
        OriginFailure::NotFound,
        OriginFailure::Forbidden,
        OriginFailure::ServerError,
    ]
    .into_iter()
    .find(|f| contains(raw, f.marker()))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
