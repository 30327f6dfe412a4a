//! Wrapped-keyset reading and the JSON-to-binary keyset rewrite
//!
//! Vending endpoints ship keysets in two JSON shapes: a *wrapped* keyset
//! whose `encryptedKeyset` field carries base-64 ciphertext for KMS, and a
//! *cleartext* public keyset listing key entries. The public keyset is
//! rewritten into the compact binary (protobuf) keyset form before being
//! handed to consumers; the wrapped payload is never rewritten, only its
//! ciphertext is extracted.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use prost::Message;
use serde::Deserialize;
use tracing::error;

use crate::{Error, Result};

// ── Wrapped keyset ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WrappedKeyset {
    encrypted_keyset: Option<String>,
}

/// Extract the ciphertext bytes from a wrapped keyset.
///
/// # Errors
///
/// [`Error::CannotCreateJsonKeyset`] when `wrapped_json` is not a JSON
/// keyset; [`Error::CannotReadEncryptedKeyset`] when it carries no
/// decodable `encryptedKeyset` payload.
pub fn read_encrypted_keyset(wrapped_json: &str) -> Result<Vec<u8>> {
    let wrapped: WrappedKeyset = serde_json::from_str(wrapped_json)
        .map_err(|e| Error::CannotCreateJsonKeyset(e.to_string()))?;
    let encoded = wrapped
        .encrypted_keyset
        .filter(|payload| !payload.is_empty())
        .ok_or_else(|| {
            Error::CannotReadEncryptedKeyset("no encrypted keyset present".to_string())
        })?;
    STANDARD
        .decode(&encoded)
        .map_err(|e| Error::CannotReadEncryptedKeyset(e.to_string()))
}

// ── Cleartext keyset, JSON form ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonKeyset {
    primary_key_id: u32,
    key: Vec<JsonKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonKey {
    key_data: JsonKeyData,
    status: String,
    key_id: u32,
    output_prefix_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonKeyData {
    type_url: String,
    value: String,
    key_material_type: String,
}

// ── Cleartext keyset, binary form ─────────────────────────────────────────────

/// Binary keyset container.
#[derive(Clone, PartialEq, Message)]
pub struct Keyset {
    /// Identifier of the primary key entry.
    #[prost(uint32, tag = "1")]
    pub primary_key_id: u32,
    /// Key entries.
    #[prost(message, repeated, tag = "2")]
    pub key: Vec<KeysetKey>,
}

/// One entry of a binary keyset.
#[derive(Clone, PartialEq, Message)]
pub struct KeysetKey {
    /// Material of this entry.
    #[prost(message, optional, tag = "1")]
    pub key_data: Option<KeysetKeyData>,
    /// Status of this entry.
    #[prost(enumeration = "KeyStatus", tag = "2")]
    pub status: i32,
    /// Identifier of this entry.
    #[prost(uint32, tag = "3")]
    pub key_id: u32,
    /// Output prefix variant of this entry.
    #[prost(enumeration = "OutputPrefixType", tag = "4")]
    pub output_prefix_type: i32,
}

/// Key material of a binary keyset entry.
#[derive(Clone, PartialEq, Message)]
pub struct KeysetKeyData {
    /// Type URL describing the key format.
    #[prost(string, tag = "1")]
    pub type_url: String,
    /// Serialized key material.
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    /// Material classification.
    #[prost(enumeration = "KeyMaterialType", tag = "3")]
    pub key_material_type: i32,
}

/// Status of a keyset entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum KeyStatus {
    /// Unrecognized status.
    UnknownStatus = 0,
    /// Entry is usable.
    Enabled = 1,
    /// Entry is disabled.
    Disabled = 2,
    /// Entry material was destroyed.
    Destroyed = 3,
}

/// Output prefix variant of a keyset entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum OutputPrefixType {
    /// Unrecognized prefix type.
    UnknownPrefix = 0,
    /// Standard 5-byte prefix.
    Tink = 1,
    /// Legacy prefix.
    Legacy = 2,
    /// No prefix.
    Raw = 3,
    /// Crunchy-compatible prefix.
    Crunchy = 4,
}

/// Classification of keyset entry material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum KeyMaterialType {
    /// Unrecognized material.
    UnknownKeymaterial = 0,
    /// Symmetric key material.
    Symmetric = 1,
    /// Asymmetric private key material.
    AsymmetricPrivate = 2,
    /// Asymmetric public key material.
    AsymmetricPublic = 3,
    /// Material held remotely.
    Remote = 4,
}

fn key_status_from(label: &str) -> KeyStatus {
    match label {
        "ENABLED" => KeyStatus::Enabled,
        "DISABLED" => KeyStatus::Disabled,
        "DESTROYED" => KeyStatus::Destroyed,
        _ => KeyStatus::UnknownStatus,
    }
}

fn output_prefix_from(label: &str) -> OutputPrefixType {
    match label {
        "TINK" => OutputPrefixType::Tink,
        "LEGACY" => OutputPrefixType::Legacy,
        "RAW" => OutputPrefixType::Raw,
        "CRUNCHY" => OutputPrefixType::Crunchy,
        _ => OutputPrefixType::UnknownPrefix,
    }
}

fn key_material_type_from(label: &str) -> KeyMaterialType {
    match label {
        "SYMMETRIC" => KeyMaterialType::Symmetric,
        "ASYMMETRIC_PRIVATE" => KeyMaterialType::AsymmetricPrivate,
        "ASYMMETRIC_PUBLIC" => KeyMaterialType::AsymmetricPublic,
        "REMOTE" => KeyMaterialType::Remote,
        _ => KeyMaterialType::UnknownKeymaterial,
    }
}

/// Rewrite a cleartext JSON keyset into binary keyset form.
pub fn json_keyset_to_binary(keyset_json: &str) -> Result<Vec<u8>> {
    let parsed: JsonKeyset = serde_json::from_str(keyset_json).map_err(|e| {
        error!(error = %e, "failed to read JSON keyset");
        Error::InvalidPublicKeysetHandle
    })?;

    let key = parsed
        .key
        .into_iter()
        .map(|entry| {
            let value = STANDARD.decode(&entry.key_data.value).map_err(|e| {
                error!(error = %e, "key entry material is not base-64");
                Error::InvalidPublicKeysetHandle
            })?;
            Ok(KeysetKey {
                key_data: Some(KeysetKeyData {
                    type_url: entry.key_data.type_url,
                    value,
                    key_material_type: key_material_type_from(&entry.key_data.key_material_type)
                        as i32,
                }),
                status: key_status_from(&entry.status) as i32,
                key_id: entry.key_id,
                output_prefix_type: output_prefix_from(&entry.output_prefix_type) as i32,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Keyset {
        primary_key_id: parsed.primary_key_id,
        key,
    }
    .encode_to_vec())
}

/// Rewrite a vended public keyset handle (JSON) into base-64 of its binary
/// keyset form. An empty handle stays empty.
pub fn rewrite_public_keyset_handle(handle_json: &str) -> Result<String> {
    if handle_json.is_empty() {
        return Ok(String::new());
    }
    let binary = json_keyset_to_binary(handle_json)?;
    Ok(STANDARD.encode(binary))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_public_keyset() -> String {
        format!(
            r#"{{"primaryKeyId": 42, "key": [{{"keyData": {{"typeUrl": "type.googleapis.com/google.crypto.tink.EciesAeadHkdfPublicKey", "value": "{}", "keyMaterialType": "ASYMMETRIC_PUBLIC"}}, "status": "ENABLED", "keyId": 42, "outputPrefixType": "TINK"}}]}}"#,
            STANDARD.encode(b"public-key-bytes")
        )
    }

    #[test]
    fn reads_encrypted_keyset_payload() {
        let wrapped = format!(
            r#"{{"encryptedKeyset": "{}", "keysetInfo": {{"primaryKeyId": 1}}}}"#,
            STANDARD.encode(b"ciphertext-bytes")
        );
        assert_eq!(read_encrypted_keyset(&wrapped).unwrap(), b"ciphertext-bytes");
    }

    #[test]
    fn rejects_non_json_wrapped_keyset() {
        assert!(matches!(
            read_encrypted_keyset("not a keyset"),
            Err(Error::CannotCreateJsonKeyset(_))
        ));
    }

    #[test]
    fn rejects_wrapped_keyset_without_payload() {
        assert!(matches!(
            read_encrypted_keyset(r#"{"keysetInfo": {}}"#),
            Err(Error::CannotReadEncryptedKeyset(_))
        ));
        assert!(matches!(
            read_encrypted_keyset(r#"{"encryptedKeyset": ""}"#),
            Err(Error::CannotReadEncryptedKeyset(_))
        ));
    }

    #[test]
    fn binary_rewrite_round_trips_through_prost() {
        let binary = json_keyset_to_binary(&sample_public_keyset()).unwrap();
        let decoded = Keyset::decode(binary.as_slice()).unwrap();

        assert_eq!(decoded.primary_key_id, 42);
        assert_eq!(decoded.key.len(), 1);
        let entry = &decoded.key[0];
        assert_eq!(entry.status, KeyStatus::Enabled as i32);
        assert_eq!(entry.output_prefix_type, OutputPrefixType::Tink as i32);
        let data = entry.key_data.as_ref().unwrap();
        assert_eq!(data.value, b"public-key-bytes");
        assert_eq!(
            data.key_material_type,
            KeyMaterialType::AsymmetricPublic as i32
        );
    }

    #[test]
    fn handle_rewrite_is_base64_of_binary_form() {
        let handle = rewrite_public_keyset_handle(&sample_public_keyset()).unwrap();
        let binary = STANDARD.decode(&handle).unwrap();
        assert!(Keyset::decode(binary.as_slice()).is_ok());
    }

    #[test]
    fn empty_handle_stays_empty() {
        assert_eq!(rewrite_public_keyset_handle("").unwrap(), "");
    }

    #[test]
    fn malformed_handle_is_rejected() {
        assert_eq!(
            rewrite_public_keyset_handle("{broken"),
            Err(Error::InvalidPublicKeysetHandle)
        );
    }
}
