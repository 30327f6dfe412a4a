//! Vending-endpoint wire calls and response parsing
//!
//! Endpoints vend keys as JSON: a list response carries a top-level
//! `keys[]`, a by-id response carries a single key object. Parsing is
//! field-by-field so each missing field surfaces its own error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use super::{EncryptionKey, EncryptionKeyType, KeyData, keyset};
use crate::transport::{HttpClient, HttpMethod, HttpRequest};
use crate::{Error, Result};

const ENCRYPTION_KEY_PREFIX: &str = "encryptionKeys/";
const ENCRYPTION_KEYS_SUFFIX: &str = "/encryptionKeys";
const KEYS_LABEL: &str = "keys";
const RESOURCE_NAME_LABEL: &str = "name";
const ENCRYPTION_KEY_TYPE_LABEL: &str = "encryptionKeyType";
const MULTI_PARTY_LABEL: &str = "MULTI_PARTY_HYBRID_EVEN_KEYSPLIT";
const SINGLE_PARTY_LABEL: &str = "SINGLE_PARTY_HYBRID_KEY";
const PUBLIC_KEYSET_HANDLE_LABEL: &str = "publicKeysetHandle";
const PUBLIC_KEY_MATERIAL_LABEL: &str = "publicKeyMaterial";
const KEYSET_NAME_LABEL: &str = "setName";
const EXPIRATION_TIME_LABEL: &str = "expirationTime";
const ACTIVATION_TIME_LABEL: &str = "activationTime";
const CREATION_TIME_LABEL: &str = "creationTime";
const KEY_DATA_LABEL: &str = "keyData";
const KEY_ENCRYPTION_KEY_URI_LABEL: &str = "keyEncryptionKeyUri";
const KEY_MATERIAL_LABEL: &str = "keyMaterial";
const PUBLIC_KEY_SIGNATURE_LABEL: &str = "publicKeySignature";

/// Extract the key id from a resource name by stripping its
/// `encryptionKeys/` prefix.
pub fn extract_key_id(resource_name: &str) -> Result<String> {
    resource_name
        .strip_prefix(ENCRYPTION_KEY_PREFIX)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidResourceName(resource_name.to_string()))
}

fn string_field(json: &Value, label: &str) -> Option<String> {
    json.get(label).and_then(Value::as_str).map(str::to_string)
}

fn timestamp_field(json: &Value, label: &str) -> Option<i64> {
    match json.get(label)? {
        Value::String(text) => text.parse().ok(),
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}

/// Parse a vending response body into its encryption keys.
pub fn parse_fetch_response(body: &[u8]) -> Result<Vec<EncryptionKey>> {
    let json: Value = serde_json::from_slice(body).map_err(|e| {
        error!(error = %e, "failed to parse encryption key JSON");
        Error::InvalidJson(e.to_string())
    })?;

    match json.get(KEYS_LABEL) {
        // Fetching by key id returns a single key object.
        None => Ok(vec![parse_encryption_key(&json)?]),
        Some(keys) => {
            let keys = keys
                .as_array()
                .ok_or_else(|| Error::InvalidJson(format!("{KEYS_LABEL} is not an array")))?;
            keys.iter().map(parse_encryption_key).collect()
        }
    }
}

/// Parse one encryption key object.
pub fn parse_encryption_key(json: &Value) -> Result<EncryptionKey> {
    let resource_name =
        string_field(json, RESOURCE_NAME_LABEL).ok_or(Error::ResourceNameNotFound)?;

    let handle_json = string_field(json, PUBLIC_KEYSET_HANDLE_LABEL)
        .ok_or(Error::PublicKeysetHandleNotFound)?;
    let public_keyset_handle = keyset::rewrite_public_keyset_handle(&handle_json)?;

    let public_key_material =
        string_field(json, PUBLIC_KEY_MATERIAL_LABEL).ok_or(Error::PublicKeyMaterialNotFound)?;

    let keyset_name = string_field(json, KEYSET_NAME_LABEL);
    if keyset_name.is_none() {
        debug!(resource_name, "key carries no keyset name");
    }

    let encryption_key_type = parse_encryption_key_type(json)?;

    let expiration_time_ms =
        timestamp_field(json, EXPIRATION_TIME_LABEL).ok_or(Error::ExpirationTimeNotFound)?;
    let activation_time_ms =
        timestamp_field(json, ACTIVATION_TIME_LABEL).ok_or(Error::ActivationTimeNotFound)?;
    let creation_time_ms =
        timestamp_field(json, CREATION_TIME_LABEL).ok_or(Error::CreationTimeNotFound)?;

    let key_data = parse_key_data(json)?;
    let key_id = extract_key_id(&resource_name)?;

    Ok(EncryptionKey {
        key_id,
        resource_name,
        encryption_key_type,
        public_keyset_handle,
        public_key_material,
        keyset_name,
        expiration_time_ms,
        activation_time_ms,
        creation_time_ms,
        key_data,
    })
}

fn parse_encryption_key_type(json: &Value) -> Result<EncryptionKeyType> {
    let label =
        string_field(json, ENCRYPTION_KEY_TYPE_LABEL).ok_or(Error::EncryptionKeyTypeNotFound)?;
    match label.as_str() {
        MULTI_PARTY_LABEL => Ok(EncryptionKeyType::MultiPartyHybridEvenKeysplit),
        SINGLE_PARTY_LABEL => Ok(EncryptionKeyType::SinglePartyHybrid),
        other => Err(Error::InvalidEncryptionKeyType(other.to_string())),
    }
}

fn parse_key_data(json: &Value) -> Result<Vec<KeyData>> {
    let entries = json
        .get(KEY_DATA_LABEL)
        .and_then(Value::as_array)
        .ok_or(Error::KeyDataNotFound)?;

    let mut key_data = Vec::with_capacity(entries.len());
    let mut found_key_material = false;
    for entry in entries {
        let key_encryption_key_uri = string_field(entry, KEY_ENCRYPTION_KEY_URI_LABEL)
            .ok_or_else(|| {
                Error::InvalidJson(format!("key data missing {KEY_ENCRYPTION_KEY_URI_LABEL}"))
            })?;
        let key_material = string_field(entry, KEY_MATERIAL_LABEL).ok_or_else(|| {
            Error::InvalidJson(format!("key data missing {KEY_MATERIAL_LABEL}"))
        })?;
        let public_key_signature =
            string_field(entry, PUBLIC_KEY_SIGNATURE_LABEL).ok_or_else(|| {
                Error::InvalidJson(format!("key data missing {PUBLIC_KEY_SIGNATURE_LABEL}"))
            })?;

        if !key_material.is_empty() && !key_encryption_key_uri.is_empty() {
            found_key_material = true;
        }
        key_data.push(KeyData {
            key_encryption_key_uri,
            key_material,
            public_key_signature,
        });
    }

    // At least one element must pair a key URI with material.
    if !found_key_material {
        return Err(Error::KeyMaterialNotFound);
    }
    Ok(key_data)
}

/// Fetches encrypted key material from vending endpoints.
pub struct PrivateKeyFetcher {
    client: Arc<HttpClient>,
    timeout: Duration,
}

impl PrivateKeyFetcher {
    /// Create a fetcher issuing requests through `client`.
    pub fn new(client: Arc<HttpClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// URL fetching one key by id.
    #[must_use]
    pub fn key_by_id_url(base: &str, key_id: &str) -> String {
        format!(
            "{}{ENCRYPTION_KEYS_SUFFIX}/{key_id}",
            base.trim_end_matches('/')
        )
    }

    /// URL listing keys no older than `max_age_seconds`.
    #[must_use]
    pub fn list_url(base: &str, max_age_seconds: u64) -> String {
        format!(
            "{}{ENCRYPTION_KEYS_SUFFIX}?maxAgeSeconds={max_age_seconds}",
            base.trim_end_matches('/')
        )
    }

    /// Fetch one key by id from `base`.
    pub async fn fetch_by_id(&self, base: &str, key_id: &str) -> Result<Vec<EncryptionKey>> {
        self.fetch(Self::key_by_id_url(base, key_id)).await
    }

    /// List keys no older than `max_age_seconds` from `base`.
    pub async fn list_keys(
        &self,
        base: &str,
        max_age_seconds: u64,
    ) -> Result<Vec<EncryptionKey>> {
        self.fetch(Self::list_url(base, max_age_seconds)).await
    }

    async fn fetch(&self, url: String) -> Result<Vec<EncryptionKey>> {
        let mut request = HttpRequest::new(HttpMethod::Get, url);
        request.timeout = self.timeout;
        let response = self.client.perform(&request).await?;
        parse_fetch_response(&response.body)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn key_json() -> Value {
        json!({
            "name": "encryptionKeys/key-1",
            "encryptionKeyType": "MULTI_PARTY_HYBRID_EVEN_KEYSPLIT",
            "publicKeysetHandle": "",
            "publicKeyMaterial": "public-material",
            "setName": "primary-set",
            "creationTime": "1000",
            "activationTime": "2000",
            "expirationTime": "3000",
            "keyData": [
                {
                    "keyEncryptionKeyUri": "gcp-kms://project/key",
                    "keyMaterial": "ciphertext",
                    "publicKeySignature": "sig"
                }
            ]
        })
    }

    // ── extract_key_id ────────────────────────────────────────────────────────

    #[test]
    fn key_id_strips_prefix() {
        assert_eq!(extract_key_id("encryptionKeys/abc").unwrap(), "abc");
    }

    #[test]
    fn resource_name_without_prefix_is_rejected() {
        assert_eq!(
            extract_key_id("somethingElse/abc"),
            Err(Error::InvalidResourceName("somethingElse/abc".to_string()))
        );
    }

    // ── parse_encryption_key ──────────────────────────────────────────────────

    #[test]
    fn parses_complete_key() {
        let key = parse_encryption_key(&key_json()).unwrap();

        assert_eq!(key.key_id, "key-1");
        assert_eq!(key.resource_name, "encryptionKeys/key-1");
        assert_eq!(
            key.encryption_key_type,
            EncryptionKeyType::MultiPartyHybridEvenKeysplit
        );
        assert_eq!(key.public_keyset_handle, "");
        assert_eq!(key.public_key_material, "public-material");
        assert_eq!(key.keyset_name.as_deref(), Some("primary-set"));
        assert_eq!(key.creation_time_ms, 1000);
        assert_eq!(key.activation_time_ms, 2000);
        assert_eq!(key.expiration_time_ms, 3000);
        assert_eq!(key.key_data.len(), 1);
        assert_eq!(key.key_data[0].key_encryption_key_uri, "gcp-kms://project/key");
    }

    #[test]
    fn numeric_timestamps_are_accepted() {
        let mut json = key_json();
        json["creationTime"] = json!(1000);
        let key = parse_encryption_key(&json).unwrap();
        assert_eq!(key.creation_time_ms, 1000);
    }

    #[test]
    fn missing_fields_surface_distinct_errors() {
        for (field, expected) in [
            ("name", Error::ResourceNameNotFound),
            ("publicKeysetHandle", Error::PublicKeysetHandleNotFound),
            ("publicKeyMaterial", Error::PublicKeyMaterialNotFound),
            ("encryptionKeyType", Error::EncryptionKeyTypeNotFound),
            ("expirationTime", Error::ExpirationTimeNotFound),
            ("activationTime", Error::ActivationTimeNotFound),
            ("creationTime", Error::CreationTimeNotFound),
            ("keyData", Error::KeyDataNotFound),
        ] {
            let mut json = key_json();
            json.as_object_mut().unwrap().remove(field);
            assert_eq!(parse_encryption_key(&json), Err(expected), "field {field}");
        }
    }

    #[test]
    fn missing_set_name_is_not_fatal() {
        let mut json = key_json();
        json.as_object_mut().unwrap().remove("setName");
        let key = parse_encryption_key(&json).unwrap();
        assert_eq!(key.keyset_name, None);
    }

    #[test]
    fn unknown_key_type_is_rejected() {
        let mut json = key_json();
        json["encryptionKeyType"] = json!("TRIPLE_PARTY");
        assert_eq!(
            parse_encryption_key(&json),
            Err(Error::InvalidEncryptionKeyType("TRIPLE_PARTY".to_string()))
        );
    }

    #[test]
    fn key_data_without_usable_pair_is_rejected() {
        let mut json = key_json();
        json["keyData"] = json!([
            {"keyEncryptionKeyUri": "", "keyMaterial": "m", "publicKeySignature": ""},
            {"keyEncryptionKeyUri": "gcp-kms://k", "keyMaterial": "", "publicKeySignature": ""}
        ]);
        assert_eq!(parse_encryption_key(&json), Err(Error::KeyMaterialNotFound));
    }

    #[test]
    fn one_usable_pair_suffices() {
        let mut json = key_json();
        json["keyData"] = json!([
            {"keyEncryptionKeyUri": "aws-kms://a", "keyMaterial": "", "publicKeySignature": ""},
            {"keyEncryptionKeyUri": "aws-kms://b", "keyMaterial": "m", "publicKeySignature": ""}
        ]);
        let key = parse_encryption_key(&json).unwrap();
        assert_eq!(key.key_data.len(), 2);
    }

    // ── parse_fetch_response ──────────────────────────────────────────────────

    #[test]
    fn single_key_response_parses() {
        let body = serde_json::to_vec(&key_json()).unwrap();
        let keys = parse_fetch_response(&body).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id, "key-1");
    }

    #[test]
    fn list_response_parses_every_key() {
        let mut second = key_json();
        second["name"] = json!("encryptionKeys/key-2");
        let body = serde_json::to_vec(&json!({"keys": [key_json(), second]})).unwrap();

        let keys = parse_fetch_response(&body).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].key_id, "key-2");
    }

    #[test]
    fn invalid_body_is_invalid_json() {
        assert!(matches!(
            parse_fetch_response(b"not json"),
            Err(Error::InvalidJson(_))
        ));
    }

    // ── URL building ──────────────────────────────────────────────────────────

    #[test]
    fn urls_are_built_from_base() {
        assert_eq!(
            PrivateKeyFetcher::key_by_id_url("https://vend.example/v1", "key-1"),
            "https://vend.example/v1/encryptionKeys/key-1"
        );
        assert_eq!(
            PrivateKeyFetcher::key_by_id_url("https://vend.example/v1/", "key-1"),
            "https://vend.example/v1/encryptionKeys/key-1"
        );
        assert_eq!(
            PrivateKeyFetcher::list_url("https://vend.example/v1", 3600),
            "https://vend.example/v1/encryptionKeys?maxAgeSeconds=3600"
        );
    }
}
