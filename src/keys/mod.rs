//! Private-key fetching, decryption, and split-key assembly
//!
//! A private key is vended as N encrypted shares spread across independent
//! endpoints. [`fetcher`] pulls and parses the share metadata, [`kms`]
//! defines the decryption contract, and [`assembler`] XOR-folds the
//! decrypted plaintexts back into one key. [`client::PrivateKeyClient`]
//! drives the whole fanout.

pub mod assembler;
pub mod client;
pub mod fetcher;
pub mod keyset;
pub mod kms;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Result;

/// How a vended key's material is structured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionKeyType {
    /// One share carrying a fully wrapped keyset.
    SinglePartyHybrid,
    /// Even key split across parties; shares XOR back into the key.
    MultiPartyHybridEvenKeysplit,
}

/// One share of a vended key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyData {
    /// KMS key URI (`gcp-kms://...` / `aws-kms://...`) that encrypted this share.
    pub key_encryption_key_uri: String,
    /// Ciphertext of the share.
    pub key_material: String,
    /// Signature over the public key, kept verbatim.
    pub public_key_signature: String,
}

/// One logical key as returned by a vending endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    /// Identifier extracted from the resource name.
    pub key_id: String,
    /// Full resource name (`encryptionKeys/<key_id>`).
    pub resource_name: String,
    /// Material structure of this key.
    pub encryption_key_type: EncryptionKeyType,
    /// Public keyset handle, rewritten to binary keyset form and base-64
    /// encoded. Empty when the endpoint vended none.
    pub public_keyset_handle: String,
    /// Raw public key material.
    pub public_key_material: String,
    /// Name of the keyset this key belongs to, when vended.
    pub keyset_name: Option<String>,
    /// Expiration in Unix milliseconds.
    pub expiration_time_ms: i64,
    /// Activation in Unix milliseconds.
    pub activation_time_ms: i64,
    /// Creation in Unix milliseconds.
    pub creation_time_ms: i64,
    /// The key's shares, in vending order.
    pub key_data: Vec<KeyData>,
}

/// Outcome of decrypting one key's share through KMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptResult {
    /// The key the plaintext belongs to.
    pub encryption_key: EncryptionKey,
    /// Decrypted share bytes.
    pub plaintext: Vec<u8>,
}

/// A fully reconstructed private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivateKey {
    /// Identifier of the key.
    pub key_id: String,
    /// Public keyset handle (binary keyset form, base-64).
    pub public_key: String,
    /// Reconstructed private key bytes, base-64 encoded.
    pub private_key: String,
    /// Creation timestamp.
    pub creation_time: DateTime<Utc>,
    /// Activation timestamp.
    pub activation_time: DateTime<Utc>,
    /// Expiration timestamp.
    pub expiration_time: DateTime<Utc>,
    /// Name of the keyset this key belongs to, when vended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_set_name: Option<String>,
}

/// Everything one vending endpoint produced for a fetch.
///
/// Callers consult all endpoints' outcomes per key id; see
/// [`assembler::extract_any_failure`].
#[derive(Debug)]
pub struct KeysResultPerEndpoint {
    /// Outcome of the fetch itself.
    pub fetch_result: Result<()>,
    /// Per-key fetch outcomes.
    pub fetch_result_by_key_id: HashMap<String, Result<()>>,
    /// Per-key decrypt outcomes.
    pub decrypt_result_by_key_id: HashMap<String, Result<DecryptResult>>,
}

impl KeysResultPerEndpoint {
    /// An empty record with a successful fetch outcome.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fetch_result: Ok(()),
            fetch_result_by_key_id: HashMap::new(),
            decrypt_result_by_key_id: HashMap::new(),
        }
    }
}

impl Default for KeysResultPerEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
