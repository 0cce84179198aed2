//! Ingester Reply Codec
//!
//! The ingester answers every message with one text frame:
//!
//! ```json
//! {"status":"ok"}
//! {"error":"insert error"}
//! {"error":"invalid token"}
//! ```
//!
//! Token errors end the session; any other error refuses only that message.

use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::application::ports::{Ack, IngestError};

/// Close code for a policy violation, used for bad tokens.
pub const CLOSE_POLICY: u16 = 1008;

/// Application close code for an expired or revoked token.
pub const CLOSE_TOKEN_INVALID: u16 = 4001;

/// Error strings that mean the session token is no longer valid.
const TOKEN_ERRORS: [&str; 3] = ["invalid token", "token expired", "missing token"];

/// Interpret a text reply.
///
/// Any non-null `error` member refuses the message, whatever its type.
///
/// # Errors
///
/// Returns `TokenRejected` when the reply reports a token error.
pub fn decode_reply(text: &str) -> Result<Ack, IngestError> {
    let Ok(Value::Object(reply)) = serde_json::from_str::<Value>(text.trim()) else {
        return Ok(Ack::Accepted);
    };

    match reply.get("error") {
        None | Some(Value::Null) => Ok(Ack::Accepted),
        Some(Value::String(error)) if is_token_error(error) => Err(IngestError::TokenRejected),
        Some(Value::String(error)) => Ok(Ack::Rejected(error.clone())),
        Some(other) => Ok(Ack::Rejected(other.to_string())),
    }
}

/// Map a close frame received while waiting for a reply.
#[must_use]
pub fn close_error(frame: Option<&CloseFrame>) -> IngestError {
    let Some(frame) = frame else {
        return IngestError::Transport("closed by ingester".into());
    };

    match u16::from(frame.code) {
        CLOSE_POLICY | CLOSE_TOKEN_INVALID => IngestError::TokenRejected,
        code => IngestError::Transport(format!("closed by ingester ({code}): {}", frame.reason.as_str())),
    }
}

fn is_token_error(error: &str) -> bool {
    let error = error.trim();
    TOKEN_ERRORS.iter().any(|t| error.eq_ignore_ascii_case(t))
}
