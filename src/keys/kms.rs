//! KMS decryption client contract

use async_trait::async_trait;

use crate::Result;

/// One decryption to perform against a KMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptRequest {
    /// Base-64 ciphertext to decrypt.
    pub ciphertext: String,
    /// KMS resource to decrypt with, without its scheme prefix.
    pub key_resource_name: String,
}

/// Decrypts ciphertext with a named KMS key.
///
/// Implementations wrap the per-cloud KMS SDKs and are out of scope here;
/// the assembler only needs this contract.
#[async_trait]
pub trait KmsClient: Send + Sync + 'static {
    /// Decrypt `request.ciphertext` with `request.key_resource_name`.
    async fn decrypt(&self, request: DecryptRequest) -> Result<Vec<u8>>;
}
