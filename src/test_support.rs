//! Shared fixtures for unit tests: a settable clock, an unsigned JWT builder
//! and a scripted transport that records every call.

use std::time::Duration as StdDuration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::error::Error;
use crate::transport::{ApiResponse, HttpRequest, Transport};

/// 2026-01-01T00:00:00Z
const EPOCH: i64 = 1_767_225_600;

pub(crate) struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: Mutex::new(OffsetDateTime::from_unix_timestamp(EPOCH).unwrap()),
        }
    }

    pub(crate) fn set(&self, now: OffsetDateTime) {
        *self.now.lock() = now;
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

/// Unsigned JWT carrying `claims` as its payload.
pub(crate) fn jwt(claims: JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Access token for user `ada` (id 1) expiring at `expires_at`.
pub(crate) fn access_token(expires_at: OffsetDateTime, is_mentor: bool) -> String {
    access_token_with_jti(expires_at, is_mentor, "initial")
}

pub(crate) fn access_token_with_jti(
    expires_at: OffsetDateTime,
    is_mentor: bool,
    jti: &str,
) -> String {
    jwt(serde_json::json!({
        "token_type": "access",
        "exp": expires_at.unix_timestamp(),
        "jti": jti,
        "user_id": 1,
        "username": "ada",
        "email": "ada@example.com",
        "is_mentor": is_mentor,
    }))
}

type Handler = Box<dyn Fn(&HttpRequest) -> Result<ApiResponse, Error> + Send + Sync>;

/// Transport answering from a closure, optionally after a delay so that
/// concurrent callers overlap.
pub(crate) struct ScriptedTransport {
    handler: Handler,
    delay: Option<StdDuration>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        handler: impl Fn(&HttpRequest) -> Result<ApiResponse, Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: StdDuration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls whose URL path ends with `suffix`.
    pub(crate) fn calls_to(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|req| req.url.path().ends_with(suffix))
            .count()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<ApiResponse, Error> {
        self.calls.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(&request)
    }
}
