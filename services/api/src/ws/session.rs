//! Manages the WebSocket connection lifecycle for the assistant relay.

use super::{
    protocol::{ConnectionPhase, ServerMessage, parse_prompt},
    relay::{PromptDisposition, RelayError},
};
use crate::{
    auth::{AuthError, AuthOutcome, authenticate},
    config::ResponseFraming,
    models::User,
    state::AppState,
};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

const OUTBOUND_BUFFER: usize = 64;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
///
/// The cookie is captured from the upgrade request; the session lookup
/// happens once the socket is open so a refusal can carry a close code.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let cookie = cookie_header(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, cookie))
}

/// Joins every `Cookie` header into one value.
pub(crate) fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    (!values.is_empty()).then(|| values.join("; "))
}

#[derive(Debug, PartialEq)]
enum Admission {
    Admit(Option<User>),
    Refuse(RelayError),
}

/// Decides whether a connection may proceed, and as whom.
fn admission(outcome: Result<AuthOutcome, AuthError>, require_auth: bool) -> Admission {
    match outcome {
        Ok(AuthOutcome::Authenticated(user)) => Admission::Admit(Some(user)),
        Ok(AuthOutcome::Unauthenticated(rejection)) => {
            debug!(?rejection, "Connection has no valid session");
            if require_auth {
                Admission::Refuse(RelayError::AuthRequired)
            } else {
                Admission::Admit(None)
            }
        }
        Err(err) => {
            error!(error = ?err, "Session lookup failed");
            if require_auth {
                Admission::Refuse(RelayError::AuthServiceError)
            } else {
                Admission::Admit(None)
            }
        }
    }
}

fn close_frame(reason: RelayError) -> Option<CloseFrame> {
    reason.close_code().map(|code| CloseFrame {
        code,
        reason: reason.to_string().into(),
    })
}

/// Main handler for an individual WebSocket connection.
#[instrument(name = "ws_connection", skip_all, fields(connection_id, user_id))]
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, cookie: Option<String>) {
    let connection_id = Uuid::new_v4();
    let span = tracing::Span::current();
    span.record("connection_id", tracing::field::display(connection_id));
    debug!(phase = ?ConnectionPhase::Authenticating, "New WebSocket connection");

    let config = state.relay.config().clone();
    let outcome = authenticate(state.sessions.as_ref(), cookie.as_deref()).await;
    let user = match admission(outcome, config.require_auth) {
        Admission::Admit(user) => user,
        Admission::Refuse(reason) => {
            warn!(phase = ?ConnectionPhase::Rejected, %reason, "Refusing connection");
            let _ = socket.send(Message::Close(close_frame(reason))).await;
            return;
        }
    };
    let user_id = user.as_ref().map(|u| u.id);
    if let Some(id) = user_id {
        span.record("user_id", id);
    }

    let flight = state.connections.register(connection_id);
    info!(
        phase = ?ConnectionPhase::Idle,
        anonymous = user_id.is_none(),
        open_connections = state.connections.len(),
        "Connection ready"
    );

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_frames(sink, rx, config.framing).in_current_span());

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Some(prompt) = parse_prompt(text.as_str()) else {
                    continue;
                };
                match state.relay.dispatch(prompt, &flight, &tx).await {
                    PromptDisposition::Started(_) => {
                        debug!(phase = ?ConnectionPhase::Streaming, "Prompt accepted")
                    }
                    PromptDisposition::Rejected(reason) => debug!(%reason, "Prompt refused"),
                    PromptDisposition::Ignored => {}
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Client sent close frame");
                break;
            }
            Ok(Message::Binary(_)) => warn!("Ignoring binary frame; prompts are text"),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                warn!(error = ?e, "Error receiving from client WebSocket");
                break;
            }
        }
    }

    let cancelled = state.connections.remove(connection_id);
    drop(tx);
    writer.abort();
    info!(
        phase = ?ConnectionPhase::Closed,
        cancelled_in_flight = cancelled,
        "WebSocket connection closed"
    );
}

/// Drains relay output into the socket until every sender is gone or a write fails.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
    framing: ResponseFraming,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = send_msg(&mut sink, &msg, framing).await {
            debug!(error = ?e, "Socket write failed; stopping writer");
            break;
        }
    }
}

/// Serializes and sends one `ServerMessage` to the client.
pub(crate) async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
    framing: ResponseFraming,
) -> Result<()> {
    let text = msg.encode(framing)?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}
