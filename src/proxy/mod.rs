//! Authorization proxy with a single-flight response cache
//!
//! [`AuthorizationProxy`] fronts a remote authorization endpoint and caches
//! the authorized identity per credential fingerprint. At most one wire
//! authorization is in flight per fingerprint:
//!
//! 1. The first `authorize` call reserves a cache entry, pins it against
//!    TTL eviction, and hands the wire call to the delegate.
//! 2. Concurrent callers on the same fingerprint observe the reservation
//!    and receive the retryable [`Error::AuthRequestInProgress`] instead of
//!    stampeding the endpoint.
//! 3. When the wire call resolves, the entry is committed (loaded and made
//!    evictable) on success or rolled back (erased) on failure.
//!
//! The delegate seam is [`AuthorizeDelegate`]; the HTTP implementation
//! lives in [`http`].

mod http;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error};

pub use http::{
    AUTHORIZATION_TOKEN_HEADER, AuthInterceptor, CLAIMED_IDENTITY_HEADER,
    HttpAuthorizationDelegate, TokenAuthInterceptor,
};

use crate::cache::{AutoExpiryMap, EvictionHook, InsertOutcome};
use crate::context::AsyncContext;
use crate::{Error, Result};

/// Default lifetime of a cached authorization.
pub const DEFAULT_CACHE_ENTRY_LIFETIME: Duration = Duration::from_secs(150);

/// Credential presented by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationMetadata {
    /// Identity the caller claims to act as.
    pub claimed_identity: String,
    /// Opaque token proving the claim.
    pub authorization_token: String,
}

impl AuthorizationMetadata {
    /// Both fields must be non-empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.claimed_identity.is_empty() && !self.authorization_token.is_empty()
    }

    /// Cache key identifying this credential.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!("{}|{}", self.authorization_token, self.claimed_identity)
    }
}

/// The authorization server's verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedMetadata {
    /// Domain the credential was authorized for.
    pub authorized_domain: String,
}

/// Request carried by an authorization context.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    /// Credential to authorize.
    pub authorization_metadata: AuthorizationMetadata,
}

/// Response carried by an authorization context.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationResponse {
    /// The server's verdict.
    pub authorized_metadata: AuthorizedMetadata,
}

/// Async context flavor used throughout the proxy.
pub type AuthContext = AsyncContext<AuthorizationRequest, AuthorizationResponse>;

/// One cached authorization.
///
/// `authorized_metadata` is meaningful only once `is_loaded` reports true;
/// the proxy never reads it from an unloaded entry.
pub struct CacheEntry {
    is_loaded: AtomicBool,
    authorized_metadata: RwLock<AuthorizedMetadata>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            is_loaded: AtomicBool::new(false),
            authorized_metadata: RwLock::new(AuthorizedMetadata::default()),
        }
    }

    /// Whether the wire authorization for this entry has resolved.
    pub fn is_loaded(&self) -> bool {
        self.is_loaded.load(Ordering::Acquire)
    }

    /// The cached verdict. Call only after [`is_loaded`](Self::is_loaded).
    pub fn authorized_metadata(&self) -> AuthorizedMetadata {
        self.authorized_metadata.read().clone()
    }

    fn load(&self, metadata: AuthorizedMetadata) {
        *self.authorized_metadata.write() = metadata;
        self.is_loaded.store(true, Ordering::Release);
    }
}

/// The wire step of an authorization.
///
/// `authorize_internal` returns once the request has been accepted; the
/// delegate finishes the context from whichever worker completed the wire
/// exchange. A synchronous `Err` means nothing was started.
pub trait AuthorizeDelegate: Send + Sync + 'static {
    /// Start the wire authorization for `context`.
    fn authorize_internal(&self, context: Arc<AuthContext>) -> Result<()>;
}

/// Single-flight caching proxy over an [`AuthorizeDelegate`].
pub struct AuthorizationProxy<D> {
    cache: AutoExpiryMap<CacheEntry>,
    delegate: D,
}

impl<D: AuthorizeDelegate> AuthorizationProxy<D> {
    /// Create a proxy whose cached authorizations live for
    /// `cache_entry_lifetime`.
    pub fn new(delegate: D, cache_entry_lifetime: Duration) -> Self {
        // The sweeper always gets permission; the pinning during the
        // reservation window is what protects in-flight entries.
        let hook: EvictionHook<CacheEntry> = Arc::new(|_key, _entry, decide| decide(true));
        Self {
            cache: AutoExpiryMap::new(cache_entry_lifetime, false, Some(hook)),
            delegate,
        }
    }

    /// Override the cache sweep cadence.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache = self.cache.with_sweep_interval(interval);
        self
    }

    /// Start the cache's TTL sweeper.
    pub fn run(&self) {
        self.cache.run();
    }

    /// Stop the cache's TTL sweeper. No callbacks fire after this returns.
    pub async fn stop(&self) {
        self.cache.stop().await;
    }

    /// Authorize the credential in `context`.
    ///
    /// Synchronous outcomes:
    ///
    /// - `Err(BadRequest)` — metadata invalid.
    /// - `Err(AuthRequestInProgress)` / `Err(EntryBeingDeleted)` —
    ///   retryable; another caller holds the reservation, or the entry is
    ///   mid-eviction.
    /// - `Ok(())` with the callback already fired — cache hit.
    /// - `Ok(())` otherwise — wire authorization accepted; the callback
    ///   fires when it resolves.
    pub fn authorize(self: &Arc<Self>, context: Arc<AuthContext>) -> Result<()> {
        let metadata = &context.request.authorization_metadata;
        if !metadata.is_valid() {
            return Err(Error::BadRequest);
        }
        let fingerprint = metadata.fingerprint();

        match self.cache.insert(&fingerprint, CacheEntry::new()) {
            InsertOutcome::BeingDeleted => return Err(Error::EntryBeingDeleted),
            InsertOutcome::Exists(entry) => {
                if entry.is_loaded() {
                    context.set_response(AuthorizationResponse {
                        authorized_metadata: entry.authorized_metadata(),
                    });
                    context.finish(Ok(()));
                    return Ok(());
                }
                debug!("authorization already in flight for this credential");
                return Err(Error::AuthRequestInProgress);
            }
            InsertOutcome::Inserted => {}
        }

        // Pin the reservation so the TTL sweeper cannot race the wire call.
        if self.cache.disable_eviction(&fingerprint).is_err() {
            self.cache.erase(&fingerprint);
            return Err(Error::AuthRequestInProgress);
        }

        let proxy = Arc::clone(self);
        let outer = Arc::clone(&context);
        let key = fingerprint.clone();
        let inner = AsyncContext::with_parent(
            Arc::clone(&context.request),
            Box::new(move |inner| proxy.handle_internal_response(&outer, &key, &inner)),
            context.as_ref(),
        );

        if let Err(e) = self.delegate.authorize_internal(inner) {
            error!(error = %e, "internal authorization request failed");
            self.cache.erase(&fingerprint);
            return Err(e);
        }
        Ok(())
    }

    fn handle_internal_response(
        &self,
        outer: &Arc<AuthContext>,
        fingerprint: &str,
        inner: &Arc<AuthContext>,
    ) {
        match inner.outcome() {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.cache.erase(fingerprint);
                // Bubble the internal error up the stack.
                outer.finish(Err(e));
                return;
            }
            None => {
                self.cache.erase(fingerprint);
                outer.finish(Err(Error::Internal(
                    "internal authorization finished without an outcome".to_string(),
                )));
                return;
            }
        }

        let Some(response) = inner.response() else {
            self.cache.erase(fingerprint);
            outer.finish(Err(Error::Internal(
                "internal authorization succeeded without a response".to_string(),
            )));
            return;
        };
        outer.set_response((*response).clone());

        match self.cache.find(fingerprint) {
            None => {
                // The entry was evicted while the wire call was in flight;
                // the caller still gets its response.
                debug!("cache entry vanished during wire authorization");
            }
            Some(entry) => {
                entry.load(response.authorized_metadata.clone());
                if self.cache.enable_eviction(fingerprint).is_err() {
                    self.cache.erase(fingerprint);
                }
            }
        }
        outer.finish(Ok(()));
    }
}
