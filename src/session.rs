use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::store::TokenStore;
use crate::token::decode_identity;
use crate::types::{CredentialPair, IdentityRecord};

/// Derives the current identity from the stored access token.
///
/// Validity is recomputed on every call; nothing is cached.
pub struct SessionReader<S, C = SystemClock> {
    store: Arc<S>,
    clock: Arc<C>,
}

// Manual Clone: avoid derive adding `S: Clone, C: Clone` bounds.
impl<S, C> Clone for SessionReader<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: TokenStore> SessionReader<S> {
    /// Reader checking expiry against the wall clock.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }
}

impl<S: TokenStore, C: Clock> SessionReader<S, C> {
    /// Reader checking expiry against `clock`.
    #[must_use]
    pub fn with_clock(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// The underlying token store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The clock used for expiry checks.
    #[must_use]
    pub fn clock(&self) -> &Arc<C> {
        &self.clock
    }

    /// The identity carried by the stored access token, if it is still valid.
    ///
    /// Returns `None` when no pair is stored, the token cannot be decoded, or
    /// its expiry is at or before the current time.
    #[must_use]
    pub fn current_identity(&self) -> Option<IdentityRecord> {
        self.identity_for(&self.store.load()?)
    }

    /// Same check as [`current_identity`](Self::current_identity) for a pair
    /// the caller already holds.
    pub(crate) fn identity_for(&self, pair: &CredentialPair) -> Option<IdentityRecord> {
        let identity = match decode_identity(&pair.access) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(error = %e, "Stored access token is not decodable");
                return None;
            }
        };

        if identity.expires_at <= self.clock.now() {
            tracing::debug!(expires_at = %identity.expires_at, "Access token expired");
            return None;
        }
        Some(identity)
    }

    /// Whether the current identity is a mentor. `false` for anonymous callers.
    #[must_use]
    pub fn is_mentor_role(&self) -> bool {
        self.current_identity().is_some_and(|identity| identity.is_mentor)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::store::MemoryTokenStore;
    use crate::test_support::{ManualClock, access_token, jwt};

    type TestReader = SessionReader<MemoryTokenStore, ManualClock>;

    fn reader() -> (Arc<MemoryTokenStore>, Arc<ManualClock>, TestReader) {
        let store = Arc::new(MemoryTokenStore::new());
        let clock = Arc::new(ManualClock::new());
        let reader = SessionReader::with_clock(store.clone(), clock.clone());
        (store, clock, reader)
    }

    #[test]
    fn test_anonymous_without_pair() {
        let (_, _, reader) = reader();
        assert!(reader.current_identity().is_none());
        assert!(!reader.is_mentor_role());
    }

    #[test]
    fn test_valid_token_yields_identity() {
        let (store, clock, reader) = reader();
        let access = access_token(clock.now() + Duration::hours(1), false);
        store.save(&CredentialPair::new(access, "r1")).unwrap();

        let identity = reader.current_identity().unwrap();
        assert_eq!(identity.username, "ada");
        assert!(!identity.is_mentor);
        assert!(!reader.is_mentor_role());
    }

    #[test]
    fn test_expiry_is_strict() {
        let (store, clock, reader) = reader();
        let expires_at = clock.now() + Duration::seconds(30);
        store
            .save(&CredentialPair::new(access_token(expires_at, true), "r1"))
            .unwrap();

        clock.set(expires_at - Duration::milliseconds(1));
        assert!(reader.current_identity().is_some());

        clock.set(expires_at);
        assert!(reader.current_identity().is_none());

        clock.set(expires_at + Duration::milliseconds(1));
        assert!(reader.current_identity().is_none());
    }

    #[test]
    fn test_malformed_token_is_anonymous() {
        let (store, _, reader) = reader();
        let without_exp = jwt(serde_json::json!({ "user_id": 1 }));
        for access in ["", "garbage", "a.b.c", without_exp.as_str()] {
            store.save(&CredentialPair::new(access, "r1")).unwrap();
            assert!(reader.current_identity().is_none());
            assert!(!reader.is_mentor_role());
        }
    }

    #[test]
    fn test_mentor_role_follows_clock() {
        let (store, clock, reader) = reader();
        let expires_at = clock.now() + Duration::hours(1);
        store
            .save(&CredentialPair::new(access_token(expires_at, true), "r1"))
            .unwrap();
        assert!(reader.is_mentor_role());

        clock.advance(Duration::hours(1) + Duration::seconds(1));
        assert!(!reader.is_mentor_role());
    }
}
