//! Private-key client: endpoint fanout, decryption, and assembly

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use super::fetcher::PrivateKeyFetcher;
use super::kms::KmsClient;
use super::{DecryptResult, EncryptionKey, KeysResultPerEndpoint, PrivateKey, assembler};
use crate::Result;
use crate::transport::HttpClient;

/// Drives a private-key fetch across every configured vending endpoint and
/// reconstructs the key from the decrypted shares.
pub struct PrivateKeyClient {
    fetcher: PrivateKeyFetcher,
    /// Vending endpoint base URIs. Order is significant: the first
    /// endpoint's share seeds the XOR accumulator.
    endpoints: Vec<String>,
    kms: Arc<dyn KmsClient>,
}

impl PrivateKeyClient {
    /// Create a client fanning out over `endpoints`.
    pub fn new(
        http: Arc<HttpClient>,
        endpoints: Vec<String>,
        kms: Arc<dyn KmsClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher: PrivateKeyFetcher::new(http, timeout),
            endpoints,
            kms,
        }
    }

    /// Fetch and decrypt `key_id` from every endpoint, in endpoint order.
    ///
    /// Failures are captured per endpoint rather than short-circuiting, so
    /// callers can consult every endpoint's outcome.
    pub async fn collect_results(&self, key_id: &str) -> Vec<KeysResultPerEndpoint> {
        futures::future::join_all(
            self.endpoints
                .iter()
                .map(|base| self.endpoint_results(base, key_id)),
        )
        .await
    }

    async fn endpoint_results(&self, base: &str, key_id: &str) -> KeysResultPerEndpoint {
        let mut results = KeysResultPerEndpoint::new();
        match self.fetcher.fetch_by_id(base, key_id).await {
            Err(e) => {
                error!(key_id, error = %e, "fetching key from endpoint failed");
                results.fetch_result = Err(e);
            }
            Ok(keys) => {
                for key in keys {
                    results
                        .fetch_result_by_key_id
                        .insert(key.key_id.clone(), Ok(()));
                    let decrypted = self.decrypt_key(&key).await;
                    results
                        .decrypt_result_by_key_id
                        .insert(key.key_id.clone(), decrypted);
                }
            }
        }
        results
    }

    async fn decrypt_key(&self, key: &EncryptionKey) -> Result<DecryptResult> {
        let request = assembler::kms_decrypt_request(key)?;
        let plaintext = self.kms.decrypt(request).await?;
        Ok(DecryptResult {
            encryption_key: key.clone(),
            plaintext,
        })
    }

    /// Fetch, decrypt, and reconstruct the private key `key_id`.
    ///
    /// Any endpoint failure for this key surfaces first. A single-party
    /// result from any endpoint short-circuits the reconstruction;
    /// otherwise the multi-party shares are folded in endpoint order.
    pub async fn private_key(&self, key_id: &str) -> Result<PrivateKey> {
        let results = self.collect_results(key_id).await;
        assembler::extract_any_failure(&results, key_id)?;

        if let Some(single_party) = assembler::extract_single_party_key(&results, key_id) {
            debug!(key_id, "assembling from a single-party key");
            return assembler::construct_private_key(&[single_party]);
        }

        let decrypt_results: Vec<DecryptResult> = results
            .iter()
            .filter_map(|endpoint| endpoint.decrypt_result_by_key_id.get(key_id))
            .filter_map(|decrypted| decrypted.as_ref().ok().cloned())
            .collect();
        assembler::construct_private_key(&decrypt_results)
    }
}
