//! Error types for keybroker

use thiserror::Error;

/// Result type alias for keybroker
pub type Result<T> = std::result::Result<T, Error>;

/// Keybroker errors
///
/// Every error is either *terminal* or *retryable*; callers are expected to
/// treat retryable errors as "try again later" with their own backoff and
/// terminal errors as final. See [`Error::is_retryable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The request was malformed: invalid authorization metadata, a failed
    /// header preparation, or an HTTP 400 verdict
    #[error("bad request")]
    BadRequest,

    /// Configuration error (e.g. unparsable endpoint URI)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The authorization endpoint could not be reached (retryable)
    #[error("authorization endpoint unavailable")]
    RemoteUnavailable,

    /// A wire authorization for this credential is already in flight (retryable)
    #[error("authorization request already in progress")]
    AuthRequestInProgress,

    /// The cache entry for this credential is being garbage-collected (retryable)
    #[error("cache entry is being deleted")]
    EntryBeingDeleted,

    /// The cache entry does not exist
    #[error("cache entry not found")]
    EntryNotFound,

    /// HTTP 401
    #[error("unauthorized")]
    Unauthorized,

    /// HTTP 403
    #[error("forbidden")]
    Forbidden,

    /// HTTP 404
    #[error("not found")]
    NotFound,

    /// HTTP 408
    #[error("request timeout")]
    Timeout,

    /// HTTP 409
    #[error("conflict")]
    Conflict,

    /// HTTP 412
    #[error("precondition failed")]
    PreconditionFailed,

    /// HTTP 429
    #[error("too many requests")]
    TooManyRequests,

    /// HTTP 500 (retryable)
    #[error("server error")]
    ServerError,

    /// HTTP 501 (retryable)
    #[error("not implemented")]
    NotImplemented,

    /// HTTP 502
    #[error("bad gateway")]
    BadGateway,

    /// HTTP 503 (retryable)
    #[error("service unavailable")]
    ServiceUnavailable,

    /// Any other HTTP status >= 400 (retryable)
    #[error("unexpected HTTP status {0}")]
    OtherHttpStatus(u16),

    /// No HTTP status could be extracted from a transport-level error (retryable)
    #[error("could not extract HTTP status from transport error")]
    BadStatusLine,

    /// A received header line was malformed
    #[error("malformed header line received")]
    BadHeader,

    /// Request carried no URL
    #[error("no URL supplied")]
    NoUrlSupplied,

    /// Response body is not valid JSON, or a JSON field has the wrong shape
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Key resource name does not carry the expected `encryptionKeys/` prefix
    #[error("invalid key resource name: {0}")]
    InvalidResourceName(String),

    /// `name` field missing from an encryption key object
    #[error("resource name not found")]
    ResourceNameNotFound,

    /// `publicKeysetHandle` field missing from an encryption key object
    #[error("public keyset handle not found")]
    PublicKeysetHandleNotFound,

    /// `publicKeysetHandle` could not be read as a JSON keyset
    #[error("invalid public keyset handle")]
    InvalidPublicKeysetHandle,

    /// `publicKeyMaterial` field missing from an encryption key object
    #[error("public key material not found")]
    PublicKeyMaterialNotFound,

    /// `encryptionKeyType` field missing from an encryption key object
    #[error("encryption key type not found")]
    EncryptionKeyTypeNotFound,

    /// `encryptionKeyType` is neither of the two supported variants
    #[error("invalid encryption key type: {0}")]
    InvalidEncryptionKeyType(String),

    /// `expirationTime` field missing from an encryption key object
    #[error("expiration time not found")]
    ExpirationTimeNotFound,

    /// `activationTime` field missing from an encryption key object
    #[error("activation time not found")]
    ActivationTimeNotFound,

    /// `creationTime` field missing from an encryption key object
    #[error("creation time not found")]
    CreationTimeNotFound,

    /// `keyData` missing, or no decrypt result exists for a key
    #[error("key data not found")]
    KeyDataNotFound,

    /// No key data element carries both a key-encryption-key URI and material
    #[error("key material not found")]
    KeyMaterialNotFound,

    /// A single-party key must carry exactly one key data element
    #[error("invalid key data count: {0}")]
    InvalidKeyDataCount(usize),

    /// Key-encryption-key URI is too short to carry a KMS scheme prefix
    #[error("invalid key encryption key URI")]
    InvalidKeyResourceName,

    /// Two key-split plaintext shares have different lengths
    #[error("secret piece sizes do not match")]
    SecretPieceSizeUnmatched,

    /// Wrapped keyset is not parseable as a JSON keyset
    #[error("cannot create JSON keyset: {0}")]
    CannotCreateJsonKeyset(String),

    /// Wrapped keyset carries no encrypted payload
    #[error("cannot read encrypted keyset: {0}")]
    CannotReadEncryptedKeyset(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` when the caller should retry the operation later.
    ///
    /// Retryable errors propagate unchanged through the async callback chain
    /// so the caller can schedule the retry; everything else is terminal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable
                | Self::AuthRequestInProgress
                | Self::EntryBeingDeleted
                | Self::ServerError
                | Self::NotImplemented
                | Self::ServiceUnavailable
                | Self::OtherHttpStatus(_)
                | Self::BadStatusLine
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::RemoteUnavailable.is_retryable());
        assert!(Error::AuthRequestInProgress.is_retryable());
        assert!(Error::EntryBeingDeleted.is_retryable());
        assert!(Error::ServerError.is_retryable());
        assert!(Error::NotImplemented.is_retryable());
        assert!(Error::ServiceUnavailable.is_retryable());
        assert!(Error::OtherHttpStatus(418).is_retryable());
        assert!(Error::BadStatusLine.is_retryable());
    }

    #[test]
    fn terminal_classification() {
        assert!(!Error::BadRequest.is_retryable());
        assert!(!Error::Unauthorized.is_retryable());
        assert!(!Error::Forbidden.is_retryable());
        assert!(!Error::BadGateway.is_retryable());
        assert!(!Error::SecretPieceSizeUnmatched.is_retryable());
        assert!(!Error::Internal("9999".into()).is_retryable());
    }
}
