//! Immutable response values built on behalf of plugins
//!
//! Construction is pure and infallible; the wire encoding of a response
//! belongs to the transport layer, not to this crate.

use serde::{Deserialize, Serialize};

/// A single header pair. Responses carry headers in wire order, so the
/// surrounding sequence is ordered, not a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An opaque, immutable HTTP-like reply value.
///
/// Built once from a status code, an ordered header sequence, and a body.
/// The status is not range-validated here; out-of-range codes are the
/// caller's responsibility. The body is copied, so the caller's buffer
/// may be reused immediately after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    status: u16,
    headers: Vec<Header>,
    body: Vec<u8>,
}

impl Response {
    /// Build a response. Header order is preserved verbatim.
    pub fn build(status: u16, headers: Vec<Header>, body: &[u8]) -> Self {
        Self {
            status,
            headers,
            body: body.to_vec(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
