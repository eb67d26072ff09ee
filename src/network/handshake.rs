//! Handshake Origin Policy
//!
//! Browsers attach an `Origin` header to the WebSocket upgrade. The server
//! only upgrades requests from the trusted frontend origin. Clients that
//! send no `Origin` (native tools, tests) are not browsers and pass.

use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

/// Frontend origin used when none is configured.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

/// Which origins may open a WebSocket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Accept any origin.
    Any,
    /// Accept exactly this origin (scheme://host[:port], no trailing slash).
    Only(String),
}

impl Default for OriginPolicy {
    fn default() -> Self {
        OriginPolicy::Only(DEFAULT_ALLOWED_ORIGIN.to_string())
    }
}

impl OriginPolicy {
    /// Parse a configured value. `*` means any origin.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "*" {
            OriginPolicy::Any
        } else {
            OriginPolicy::Only(value.trim_end_matches('/').to_string())
        }
    }

    /// Check the `Origin` header value of an upgrade request.
    pub fn check(&self, origin: Option<&str>) -> Result<(), HandshakeError> {
        match (self, origin) {
            (OriginPolicy::Any, _) | (_, None) => Ok(()),
            (OriginPolicy::Only(allowed), Some(origin)) => {
                if origin.trim_end_matches('/').eq_ignore_ascii_case(allowed) {
                    Ok(())
                } else {
                    Err(HandshakeError::OriginNotAllowed(origin.to_string()))
                }
            }
        }
    }

    /// Validate an upgrade request, producing the response tungstenite expects.
    pub fn validate(&self, request: &Request, response: Response) -> Result<Response, ErrorResponse> {
        let origin = match request.headers().get("origin") {
            Some(value) => match value.to_str() {
                Ok(text) => Some(text),
                Err(_) => return Err(forbidden(HandshakeError::MalformedOrigin)),
            },
            None => None,
        };

        self.check(origin).map(|()| response).map_err(forbidden)
    }
}

fn forbidden(err: HandshakeError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// Upgrade rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Origin header names an untrusted site.
    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),
    /// Origin header is not valid text.
    #[error("malformed origin header")]
    MalformedOrigin,
}
