//! Request gateway: bearer attachment, token renewal and session teardown.
//!
//! Every business call goes through [`RequestGateway::dispatch`]. Per call the
//! session is in one of these states:
//!
//! - no stored pair: sent anonymously, or refused if the request requires auth
//! - valid access token: sent with `Authorization: Bearer <access>`
//! - expired access token: renewed first, then sent
//! - renewing: callers join the single in-flight renewal
//! - renewal failed: store cleared, [`Error::AuthRequired`] returned unsent
//!
//! A 401 from the server is handled like an expired token, at most once per
//! call. The renewal call itself never goes through this path.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::error::{Error, RefreshFailure};
use crate::session::SessionReader;
use crate::store::TokenStore;
use crate::transport::{ApiRequest, ApiResponse, HttpRequest, Method, Transport};
use crate::types::{CredentialPair, IdentityRecord, LoginCredentials, Registration};

type RefreshOutcome = Result<CredentialPair, RefreshFailure>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Token pair returned by the credential issuance endpoint.
#[derive(Deserialize)]
struct IssuedTokens {
    access: String,
    refresh: String,
}

/// Body of a successful renewal. Rotation of the refresh token is optional.
#[derive(Deserialize)]
struct RenewedTokens {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

struct GatewayInner<T, S, C> {
    transport: Arc<T>,
    session: SessionReader<S, C>,
    config: GatewayConfig,
    pending_refresh: Mutex<Option<PendingRefresh>>,
}

/// Everything one renewal needs. Owned by the shared future, which must not
/// hold the gateway itself: the gateway holds the future.
struct Renewal<T, S, C> {
    transport: Arc<T>,
    session: SessionReader<S, C>,
    config: GatewayConfig,
    /// Access token the caller found unusable, if any.
    stale: Option<String>,
}

/// Outbound API access with transparent token renewal.
///
/// Cheap to clone; clones share the transport, the token store and the
/// in-flight renewal.
pub struct RequestGateway<T, S, C = SystemClock> {
    inner: Arc<GatewayInner<T, S, C>>,
}

// Manual Clone: avoid derive adding `T: Clone, S: Clone, C: Clone` bounds.
impl<T, S, C> Clone for RequestGateway<T, S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport, S: TokenStore> RequestGateway<T, S> {
    /// Create a gateway reading the wall clock.
    #[must_use]
    pub fn new(config: GatewayConfig, transport: T, store: Arc<S>) -> Self {
        Self::with_session(config, transport, SessionReader::new(store))
    }
}

impl<T: Transport, S: TokenStore, C: Clock> RequestGateway<T, S, C> {
    /// Create a gateway around an existing session reader, which carries the
    /// token store and the clock used for expiry checks.
    #[must_use]
    pub fn with_session(config: GatewayConfig, transport: T, session: SessionReader<S, C>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                transport: Arc::new(transport),
                session,
                config,
                pending_refresh: Mutex::new(None),
            }),
        }
    }

    /// The session reader shared by all clones of this gateway.
    #[must_use]
    pub fn session(&self) -> &SessionReader<S, C> {
        &self.inner.session
    }

    /// Endpoint layout in use.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// See [`SessionReader::current_identity`].
    #[must_use]
    pub fn current_identity(&self) -> Option<IdentityRecord> {
        self.inner.session.current_identity()
    }

    /// See [`SessionReader::is_mentor_role`].
    #[must_use]
    pub fn is_mentor_role(&self) -> bool {
        self.inner.session.is_mentor_role()
    }

    /// Exchange username/password for a credential pair and store it.
    ///
    /// The pair is only stored if its access token decodes to a current
    /// identity; a failed login leaves any previous session untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::LoginRejected`] if the issuance endpoint refuses the credentials
    /// - [`Error::MalformedResponse`] if either token is missing or unusable
    /// - [`Error::StorageUnavailable`] if the pair cannot be persisted
    /// - transport errors, unchanged
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<IdentityRecord, Error> {
        let inner = &self.inner;
        let request = HttpRequest {
            method: Method::Post,
            url: inner.config.endpoint(&inner.config.login_path)?,
            bearer: None,
            body: Some(serde_json::to_value(credentials)?),
        };

        let response = inner.transport.send(request).await?;
        if !response.is_success() {
            let detail = error_detail(&response);
            tracing::warn!(status = response.status, detail = %detail, "Login rejected");
            return Err(Error::LoginRejected {
                status: response.status,
                detail,
            });
        }

        let issued: IssuedTokens = response
            .json()
            .map_err(|e| Error::MalformedResponse(format!("login response: {e}")))?;
        if issued.access.is_empty() || issued.refresh.is_empty() {
            return Err(Error::MalformedResponse(
                "login response: empty token".into(),
            ));
        }

        let pair = CredentialPair::new(issued.access, issued.refresh);
        let identity = inner.session.identity_for(&pair).ok_or_else(|| {
            Error::MalformedResponse("login response: access token is not a current identity".into())
        })?;
        inner.session.store().save(&pair)?;

        tracing::info!(user_id = %identity.user_id, "Login successful");
        Ok(identity)
    }

    /// End the session by clearing the stored pair.
    ///
    /// Navigation back to an anonymous view is left to the caller.
    pub fn logout(&self) {
        match self.inner.session.store().clear() {
            Ok(()) => tracing::info!("Logged out"),
            Err(e) => tracing::warn!(error = %e, "Token store clear failed during logout"),
        }
    }

    /// Create an account. The response is returned as-is; no session is started.
    ///
    /// # Errors
    ///
    /// Returns transport errors unchanged.
    pub async fn register(&self, registration: &Registration) -> Result<ApiResponse, Error> {
        let inner = &self.inner;
        let request = HttpRequest {
            method: Method::Post,
            url: inner.config.endpoint(&inner.config.register_path)?,
            bearer: None,
            body: Some(serde_json::to_value(registration)?),
        };

        let response = inner.transport.send(request).await?;
        if response.is_success() {
            tracing::info!(username = %registration.username, "Account registered");
        } else {
            tracing::warn!(status = response.status, "Registration rejected");
        }
        Ok(response)
    }

    /// Bring back a persisted session at application start.
    ///
    /// A still-valid token is used as-is; an expired one is renewed once.
    /// Returns `None` (with the store cleared) when renewal fails or yields a
    /// token that is not a current identity.
    pub async fn restore_session(&self) -> Option<IdentityRecord> {
        let session = &self.inner.session;
        let pair = session.store().load()?;
        if let Some(identity) = session.identity_for(&pair) {
            return Some(identity);
        }

        let renewed = match self.refresh_replacing(Some(pair.access)).await {
            Ok(renewed) => renewed,
            Err(e) => {
                tracing::info!(error = %e, "Stored session could not be restored");
                return None;
            }
        };
        let identity = session.identity_for(&renewed);
        if identity.is_none() {
            tracing::warn!("Renewed access token is not a current identity; clearing session");
            if session.store().load().as_ref() == Some(&renewed) {
                if let Err(e) = session.store().clear() {
                    tracing::warn!(error = %e, "Token store clear failed");
                }
            }
        }
        identity
    }

    /// Renew the access token with the stored refresh token.
    ///
    /// Concurrent callers share one renewal request and all receive its
    /// outcome. On failure the store is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshFailure`] describing why no usable pair was obtained.
    pub async fn refresh(&self) -> Result<CredentialPair, RefreshFailure> {
        self.refresh_replacing(None).await
    }

    /// Like [`refresh`](Self::refresh), for a caller that found `stale`
    /// unusable. A renewal started here is skipped if the store already holds
    /// a different, valid access token (a renewal that finished after the
    /// caller read the store).
    async fn refresh_replacing(&self, stale: Option<String>) -> RefreshOutcome {
        let pending = {
            let mut slot = self.inner.pending_refresh.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let renewal = Renewal {
                        transport: self.inner.transport.clone(),
                        session: self.inner.session.clone(),
                        config: self.inner.config.clone(),
                        stale,
                    };
                    let pending = renew(renewal, Arc::downgrade(&self.inner))
                        .boxed()
                        .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Send `request`, keeping the bearer token fresh.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthRequired`] if the request needs credentials and none can
    ///   be obtained, or if the server rejects the request after one renewal
    /// - [`Error::StorageUnavailable`] if renewed tokens cannot be persisted
    /// - transport errors, unchanged
    ///
    /// Non-401 error statuses are returned inside `Ok`.
    pub async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let session = &self.inner.session;
        let url = self.inner.config.endpoint(&request.path)?;

        let bearer = match session.store().load() {
            Some(pair) if session.identity_for(&pair).is_some() => Some(pair.access),
            Some(pair) => {
                tracing::debug!(path = %request.path, "Access token expired; renewing before send");
                Some(self.refresh_replacing(Some(pair.access)).await?.access)
            }
            None if request.requires_auth => {
                tracing::debug!(path = %request.path, "No session for authenticated request");
                return Err(Error::AuthRequired);
            }
            None => None,
        };

        let response = self.send(&request, url.clone(), bearer.clone()).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        tracing::debug!(path = %request.path, "Server rejected access token");
        let retry_token = match session.store().load() {
            // Another caller already replaced the rejected token.
            Some(pair)
                if bearer.as_deref() != Some(pair.access.as_str())
                    && session.identity_for(&pair).is_some() =>
            {
                pair.access
            }
            _ => self.refresh_replacing(bearer).await?.access,
        };

        let retried = self.send(&request, url, Some(retry_token)).await?;
        if retried.is_unauthorized() {
            tracing::warn!(path = %request.path, "Request rejected after token renewal");
            return Err(Error::AuthRequired);
        }
        Ok(retried)
    }

    async fn send(
        &self,
        request: &ApiRequest,
        url: url::Url,
        bearer: Option<String>,
    ) -> Result<ApiResponse, Error> {
        self.inner
            .transport
            .send(HttpRequest {
                method: request.method,
                url,
                bearer,
                body: request.body.clone(),
            })
            .await
    }
}

/// The single renewal shared by all waiters. Clears the in-flight marker
/// before resolving so the next expiry starts a fresh renewal.
async fn renew<T: Transport, S: TokenStore, C: Clock>(
    renewal: Renewal<T, S, C>,
    gateway: Weak<GatewayInner<T, S, C>>,
) -> RefreshOutcome {
    let outcome = renewal.run().await;
    if let Some(inner) = gateway.upgrade() {
        inner.pending_refresh.lock().take();
    }
    outcome
}

impl<T: Transport, S: TokenStore, C: Clock> Renewal<T, S, C> {
    async fn run(&self) -> RefreshOutcome {
        let store = self.session.store();
        if let Some(current) = store.load().filter(|pair| {
            self.stale.as_deref().is_some_and(|stale| stale != pair.access)
                && self.session.identity_for(pair).is_some()
        }) {
            tracing::debug!("Access token already renewed");
            return Ok(current);
        }

        let Some(prior) = store.load().filter(|pair| !pair.refresh.is_empty()) else {
            tracing::warn!("No refresh token available; clearing session");
            if let Err(e) = store.clear() {
                tracing::warn!(error = %e, "Token store clear failed");
            }
            return Err(RefreshFailure::NoRefreshToken);
        };

        let outcome = match self.request_renewal(&prior.refresh).await {
            Ok(renewed) => self.commit(&prior, renewed),
            Err(failure) => Err(failure),
        };

        match &outcome {
            Ok(_) => tracing::info!("Access token renewed"),
            Err(failure) => {
                tracing::warn!(error = %failure, "Token renewal failed; clearing session");
                // A login that landed meanwhile owns the store now.
                if store.load().as_ref() == Some(&prior) {
                    if let Err(e) = store.clear() {
                        tracing::warn!(error = %e, "Token store clear failed");
                    }
                }
            }
        }
        outcome
    }

    async fn request_renewal(&self, refresh: &str) -> Result<RenewedTokens, RefreshFailure> {
        let url = self
            .config
            .endpoint(&self.config.refresh_path)
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;
        let request = HttpRequest {
            method: Method::Post,
            url,
            bearer: None,
            body: Some(serde_json::json!({ "refresh": refresh })),
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;
        if !response.is_success() {
            return Err(RefreshFailure::Rejected {
                status: response.status,
            });
        }

        let renewed: RenewedTokens = response
            .json()
            .map_err(|e| RefreshFailure::MalformedResponse(e.to_string()))?;
        if renewed.access.is_empty() {
            return Err(RefreshFailure::MalformedResponse("empty access token".into()));
        }
        Ok(renewed)
    }

    /// Persist renewed tokens, unless the session changed while renewing.
    fn commit(&self, prior: &CredentialPair, renewed: RenewedTokens) -> RefreshOutcome {
        let store = self.session.store();
        match store.load() {
            Some(current) if current == *prior => {}
            // Logged out mid-renewal: do not bring the session back.
            None => return Err(RefreshFailure::NoRefreshToken),
            // Logged in again mid-renewal: the newer session wins.
            Some(current) => return Ok(current),
        }

        let pair = CredentialPair {
            access: renewed.access,
            refresh: renewed
                .refresh
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| prior.refresh.clone()),
        };
        store
            .save(&pair)
            .map_err(|e| RefreshFailure::Storage(e.to_string()))?;
        Ok(pair)
    }
}

/// Human-readable reason from an error response (`{"detail": ...}` when present).
fn error_detail(response: &ApiResponse) -> String {
    response
        .json::<JsonValue>()
        .ok()
        .and_then(|body| body.get("detail").and_then(JsonValue::as_str).map(str::to_owned))
        .unwrap_or_else(|| response.body.clone())
}
