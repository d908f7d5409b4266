//! Session-cookie authentication shared by the socket relay and the REST handlers.
//!
//! Sessions are written by the login surface in the `connect-pg-simple`
//! layout: the browser holds a signed cookie `s:<sid>.<signature>` and the
//! `session` table maps `sid` to a JSON payload carrying `userId`. Only the
//! `sid` part is used here; signature checking belongs to the issuer.

use crate::models::User;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Name of the cookie carrying the session identifier.
pub const SESSION_COOKIE: &str = "sessionId";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read access to sessions and the users they point at.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the JSON payload of an unexpired session.
    async fn session_payload(&self, sid: &str) -> Result<Option<Value>, StoreError>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError>;
}

/// Why a request was treated as anonymous. Only used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoCookieHeader,
    CookieMissing,
    SessionNotFound,
    MalformedPayload,
    MissingUserId,
    UserNotFound(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated(User),
    Unauthenticated(Rejection),
}

impl AuthOutcome {
    pub fn user(self) -> Option<User> {
        match self {
            AuthOutcome::Authenticated(user) => Some(user),
            AuthOutcome::Unauthenticated(_) => None,
        }
    }
}

/// The store could not be asked at all; distinct from "no valid session".
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication service unavailable")]
    ServiceUnavailable(#[source] StoreError),
}

/// Extracts the session identifier from a `Cookie` header value.
///
/// Accepts `s:<id>.<sig>`, its percent-encoded form `s%3A<id>.<sig>` and a
/// bare `<id>`. Returns `None` when the cookie is absent or empty.
pub fn session_id_from_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    let value = header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })?;

    let unsigned = value
        .strip_prefix("s:")
        .or_else(|| value.strip_prefix("s%3A"))
        .or_else(|| value.strip_prefix("s%3a"))
        .unwrap_or(value);
    let sid = unsigned.split('.').next().unwrap_or_default();

    (!sid.is_empty()).then_some(sid)
}

/// Resolves the user behind a `Cookie` header.
///
/// Every failure except an unreachable store converges to
/// [`AuthOutcome::Unauthenticated`].
pub async fn authenticate(
    store: &dyn SessionStore,
    cookie_header: Option<&str>,
) -> Result<AuthOutcome, AuthError> {
    let Some(header) = cookie_header else {
        return Ok(AuthOutcome::Unauthenticated(Rejection::NoCookieHeader));
    };
    let Some(sid) = session_id_from_cookie(header, SESSION_COOKIE) else {
        return Ok(AuthOutcome::Unauthenticated(Rejection::CookieMissing));
    };

    let payload = store
        .session_payload(sid)
        .await
        .map_err(AuthError::ServiceUnavailable)?;
    let Some(payload) = payload else {
        debug!("No live session for presented identifier");
        return Ok(AuthOutcome::Unauthenticated(Rejection::SessionNotFound));
    };

    let user_id = match user_id_from_payload(&payload) {
        Ok(id) => id,
        Err(rejection) => return Ok(AuthOutcome::Unauthenticated(rejection)),
    };

    match store
        .user_by_id(user_id)
        .await
        .map_err(AuthError::ServiceUnavailable)?
    {
        Some(user) => Ok(AuthOutcome::Authenticated(user)),
        None => Ok(AuthOutcome::Unauthenticated(Rejection::UserNotFound(
            user_id,
        ))),
    }
}

fn user_id_from_payload(payload: &Value) -> Result<i64, Rejection> {
    let object = payload.as_object().ok_or(Rejection::MalformedPayload)?;
    match object.get("userId") {
        Some(Value::Number(n)) => n.as_i64().ok_or(Rejection::MalformedPayload),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| Rejection::MalformedPayload),
        Some(Value::Null) | None => Err(Rejection::MissingUserId),
        Some(_) => Err(Rejection::MalformedPayload),
    }
}
