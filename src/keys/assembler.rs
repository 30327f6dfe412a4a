//! Split-key reconstruction and KMS-decrypt preparation
//!
//! A multi-party key's shares XOR back into the private key; all shares
//! must decrypt to the same length, validated against the first share.
//! Single-party keys carry one fully wrapped keyset instead and skip the
//! fold.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::{DateTime, Utc};
use tracing::error;

use super::kms::DecryptRequest;
use super::{DecryptResult, EncryptionKey, EncryptionKeyType, KeysResultPerEndpoint, PrivateKey, keyset};
use crate::{Error, Result};

/// Length of the KMS scheme prefix (`gcp-kms://`, `aws-kms://`) stripped
/// from key-encryption-key URIs before decryption.
pub const KMS_KEY_URI_PREFIX_LEN: usize = 10;

fn key_resource_name(key_encryption_key_uri: &str) -> Result<String> {
    key_encryption_key_uri
        .get(KMS_KEY_URI_PREFIX_LEN..)
        .map(str::to_string)
        .ok_or(Error::InvalidKeyResourceName)
}

/// Build the KMS decryption request for one vended key.
///
/// Single-party keys must carry exactly one share; its material is read as
/// a wrapped keyset and the extracted payload is re-escaped with URL-safe
/// base-64. Multi-party keys submit the first non-empty share's material
/// verbatim. Either way the share's key URI loses its scheme prefix.
pub fn kms_decrypt_request(encryption_key: &EncryptionKey) -> Result<DecryptRequest> {
    match encryption_key.encryption_key_type {
        EncryptionKeyType::SinglePartyHybrid => {
            if encryption_key.key_data.len() != 1 {
                error!(
                    count = encryption_key.key_data.len(),
                    "single-party key must carry exactly one key data element"
                );
                return Err(Error::InvalidKeyDataCount(encryption_key.key_data.len()));
            }
            let key_data = &encryption_key.key_data[0];
            let payload = keyset::read_encrypted_keyset(&key_data.key_material)?;
            // The keyset reader unescapes the payload; escape it back for
            // the KMS call.
            Ok(DecryptRequest {
                ciphertext: URL_SAFE.encode(payload),
                key_resource_name: key_resource_name(&key_data.key_encryption_key_uri)?,
            })
        }
        EncryptionKeyType::MultiPartyHybridEvenKeysplit => {
            for key_data in &encryption_key.key_data {
                if !key_data.key_material.is_empty() {
                    return Ok(DecryptRequest {
                        ciphertext: key_data.key_material.clone(),
                        key_resource_name: key_resource_name(&key_data.key_encryption_key_uri)?,
                    });
                }
            }
            Err(Error::KeyDataNotFound)
        }
    }
}

/// Reconstruct the private key from decrypt results collected across
/// endpoints, in endpoint order.
///
/// The first result seeds the accumulator and supplies the key metadata;
/// every further plaintext must match its length and is folded in with
/// XOR.
pub fn construct_private_key(decrypt_results: &[DecryptResult]) -> Result<PrivateKey> {
    let Some(first) = decrypt_results.first() else {
        return Err(Error::KeyDataNotFound);
    };

    let mut secret = first.plaintext.clone();
    for result in &decrypt_results[1..] {
        if result.plaintext.len() != secret.len() {
            return Err(Error::SecretPieceSizeUnmatched);
        }
        for (accumulated, piece) in secret.iter_mut().zip(&result.plaintext) {
            *accumulated ^= piece;
        }
    }

    let key = &first.encryption_key;
    Ok(PrivateKey {
        key_id: key.key_id.clone(),
        public_key: key.public_keyset_handle.clone(),
        private_key: STANDARD.encode(&secret),
        creation_time: timestamp_from_ms(key.creation_time_ms)?,
        activation_time: timestamp_from_ms(key.activation_time_ms)?,
        expiration_time: timestamp_from_ms(key.expiration_time_ms)?,
        key_set_name: key.keyset_name.clone(),
    })
}

fn timestamp_from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Internal(format!("timestamp out of range: {ms}")))
}

/// Surface the first failure any endpoint recorded for `key_id`.
///
/// Priority per endpoint: the fetch itself, then the per-key fetch
/// outcome, then the per-key decrypt outcome.
pub fn extract_any_failure(keys_results: &[KeysResultPerEndpoint], key_id: &str) -> Result<()> {
    for result in keys_results {
        if let Err(e) = &result.fetch_result {
            error!(key_id, error = %e, "fetching keys failed");
            return Err(e.clone());
        }
        if let Some(Err(e)) = result.fetch_result_by_key_id.get(key_id) {
            error!(key_id, error = %e, "fetching key failed");
            return Err(e.clone());
        }
        if let Some(Err(e)) = result.decrypt_result_by_key_id.get(key_id) {
            error!(key_id, error = %e, "decrypting key failed");
            return Err(e.clone());
        }
    }
    Ok(())
}

/// The first decrypt result for `key_id` whose key is single-party, if
/// any endpoint vended one. Used to short-circuit reconstruction.
#[must_use]
pub fn extract_single_party_key(
    keys_results: &[KeysResultPerEndpoint],
    key_id: &str,
) -> Option<DecryptResult> {
    keys_results
        .iter()
        .filter_map(|result| result.decrypt_result_by_key_id.get(key_id))
        .filter_map(|decrypt| decrypt.as_ref().ok())
        .find(|decrypt| {
            decrypt.encryption_key.encryption_key_type == EncryptionKeyType::SinglePartyHybrid
        })
        .cloned()
}
