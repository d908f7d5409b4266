//! Defines the WebSocket message protocol between the browser client and the relay.
//!
//! Client frames are raw prompt text, one prompt per message. Server frames
//! depend on the configured [`ResponseFraming`].

use crate::config::ResponseFraming;
use axum::extract::ws::close_code;
use serde::Serialize;

/// Sentinel closing a response under legacy text framing.
pub const TEXT_DONE_SENTINEL: &str = "[DONE]";

/// Close code for a missing or invalid session. The client must log in again.
pub const CLOSE_AUTH_REQUIRED: u16 = close_code::POLICY;
/// Close code for an unreachable session store. Retrying later may succeed.
pub const CLOSE_AUTH_UNAVAILABLE: u16 = close_code::ERROR;

/// Where a connection is in its life. Used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionPhase {
    Authenticating,
    Rejected,
    Idle,
    Streaming,
    Closed,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One text fragment of the answer being generated.
    Stream(String),
    /// The answer finished; carries the full transcript.
    Complete(String),
    /// The request failed or was refused.
    Error(String),
}

impl ServerMessage {
    /// Renders the message as a text frame.
    pub fn encode(&self, framing: ResponseFraming) -> Result<String, serde_json::Error> {
        match framing {
            ResponseFraming::Json => serde_json::to_string(self),
            ResponseFraming::Text => Ok(match self {
                ServerMessage::Stream(fragment) => fragment.clone(),
                ServerMessage::Complete(_) => TEXT_DONE_SENTINEL.to_string(),
                ServerMessage::Error(message) => format!("Error: {message}"),
            }),
        }
    }
}

/// Normalises a client frame into a prompt. Blank frames carry no prompt.
pub fn parse_prompt(frame: &str) -> Option<&str> {
    let prompt = frame.trim();
    (!prompt.is_empty()).then_some(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_envelopes() {
        assert_eq!(
            ServerMessage::Stream("fn main".into())
                .encode(ResponseFraming::Json)
                .unwrap(),
            r#"{"type":"stream","content":"fn main"}"#
        );
        assert_eq!(
            ServerMessage::Complete("all".into())
                .encode(ResponseFraming::Json)
                .unwrap(),
            r#"{"type":"complete","content":"all"}"#
        );
        assert_eq!(
            ServerMessage::Error("nope".into())
                .encode(ResponseFraming::Json)
                .unwrap(),
            r#"{"type":"error","content":"nope"}"#
        );
    }

    #[test]
    fn test_text_framing() {
        let framing = ResponseFraming::Text;
        assert_eq!(ServerMessage::Stream("abc".into()).encode(framing).unwrap(), "abc");
        assert_eq!(
            ServerMessage::Complete("abc".into()).encode(framing).unwrap(),
            TEXT_DONE_SENTINEL
        );
        assert_eq!(
            ServerMessage::Error("busy".into()).encode(framing).unwrap(),
            "Error: busy"
        );
    }

    #[test]
    fn test_close_codes_are_distinct() {
        assert_eq!(CLOSE_AUTH_REQUIRED, 1008);
        assert_eq!(CLOSE_AUTH_UNAVAILABLE, 1011);
    }

    #[test]
    fn test_parse_prompt() {
        assert_eq!(parse_prompt("  two sum?\n"), Some("two sum?"));
        assert_eq!(parse_prompt(" \n\t"), None);
    }
}
