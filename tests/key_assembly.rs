//! End-to-end split-key assembly tests
//!
//! Stands up one axum vending endpoint per key share and a KMS stub that
//! "decrypts" by base-64 decoding, then drives the private-key client
//! through fetch, decrypt, and XOR reconstruction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde_json::{Value, json};

use keybroker::Error;
use keybroker::keys::client::PrivateKeyClient;
use keybroker::keys::kms::{DecryptRequest, KmsClient};
use keybroker::transport::{DEFAULT_TIMEOUT, HttpClient};

/// KMS stub: ciphertext is base-64 (standard or URL-safe) of the plaintext.
struct Base64Kms;

#[async_trait]
impl KmsClient for Base64Kms {
    async fn decrypt(&self, request: DecryptRequest) -> keybroker::Result<Vec<u8>> {
        assert!(
            !request.key_resource_name.is_empty(),
            "scheme prefix must have been stripped"
        );
        STANDARD
            .decode(&request.ciphertext)
            .or_else(|_| URL_SAFE.decode(&request.ciphertext))
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

fn share_key_json(key_id: &str, kek_uri: &str, material: &str) -> Value {
    json!({
        "name": format!("encryptionKeys/{key_id}"),
        "encryptionKeyType": "MULTI_PARTY_HYBRID_EVEN_KEYSPLIT",
        "publicKeysetHandle": "",
        "publicKeyMaterial": "public-material",
        "setName": "primary-set",
        "creationTime": "1000",
        "activationTime": "2000",
        "expirationTime": "3000",
        "keyData": [
            {
                "keyEncryptionKeyUri": kek_uri,
                "keyMaterial": material,
                "publicKeySignature": "sig"
            }
        ]
    })
}

fn single_party_key_json(key_id: &str, wrapped_payload: &[u8]) -> Value {
    let wrapped = json!({
        "encryptedKeyset": STANDARD.encode(wrapped_payload),
        "keysetInfo": { "primaryKeyId": 1 }
    });
    json!({
        "name": format!("encryptionKeys/{key_id}"),
        "encryptionKeyType": "SINGLE_PARTY_HYBRID_KEY",
        "publicKeysetHandle": "",
        "publicKeyMaterial": "public-material",
        "creationTime": "1000",
        "activationTime": "2000",
        "expirationTime": "3000",
        "keyData": [
            {
                "keyEncryptionKeyUri": "gcp-kms://project/key",
                "keyMaterial": wrapped.to_string(),
                "publicKeySignature": "sig"
            }
        ]
    })
}

/// Serve `response` for every `GET /encryptionKeys/{id}` on a fresh port.
async fn spawn_vending_server(response: Result<Value, StatusCode>) -> SocketAddr {
    let handler = move |Path(_id): Path<String>| {
        let response = response.clone();
        async move {
            match response {
                Ok(body) => (StatusCode::OK, Json(body)),
                Err(status) => (status, Json(json!({}))),
            }
        }
    };
    let app = axum::Router::new().route("/encryptionKeys/{id}", get(handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn client_for(addrs: &[SocketAddr]) -> PrivateKeyClient {
    let http = Arc::new(HttpClient::new(DEFAULT_TIMEOUT).expect("client"));
    let endpoints = addrs.iter().map(|a| format!("http://{a}")).collect();
    PrivateKeyClient::new(http, endpoints, Arc::new(Base64Kms), Duration::from_secs(5))
}

#[tokio::test]
async fn two_shares_xor_into_the_private_key() {
    let first = spawn_vending_server(Ok(share_key_json(
        "key-1",
        "gcp-kms://project/key-a",
        &STANDARD.encode(b"\x01\x02\x03"),
    )))
    .await;
    let second = spawn_vending_server(Ok(share_key_json(
        "key-1",
        "aws-kms://arn:kms/key-b",
        &STANDARD.encode(b"\x10\x20\x30"),
    )))
    .await;

    let client = client_for(&[first, second]);
    let private_key = client.private_key("key-1").await.expect("assembly");

    assert_eq!(private_key.key_id, "key-1");
    assert_eq!(private_key.private_key, STANDARD.encode(b"\x11\x22\x33"));
    assert_eq!(private_key.key_set_name.as_deref(), Some("primary-set"));
    assert_eq!(private_key.creation_time.timestamp_millis(), 1000);
    assert_eq!(private_key.activation_time.timestamp_millis(), 2000);
    assert_eq!(private_key.expiration_time.timestamp_millis(), 3000);
}

#[tokio::test]
async fn mismatched_share_sizes_are_rejected() {
    let first = spawn_vending_server(Ok(share_key_json(
        "key-1",
        "gcp-kms://project/key-a",
        &STANDARD.encode(b"\x01\x02\x03"),
    )))
    .await;
    let second = spawn_vending_server(Ok(share_key_json(
        "key-1",
        "gcp-kms://project/key-b",
        &STANDARD.encode(b"\x10\x20"),
    )))
    .await;

    let client = client_for(&[first, second]);
    assert_eq!(
        client.private_key("key-1").await,
        Err(Error::SecretPieceSizeUnmatched)
    );
}

#[tokio::test]
async fn single_party_key_short_circuits_reconstruction() {
    let endpoint =
        spawn_vending_server(Ok(single_party_key_json("key-2", b"whole-private-key"))).await;

    let client = client_for(&[endpoint]);
    let private_key = client.private_key("key-2").await.expect("assembly");

    // The KMS stub returns the wrapped payload as plaintext.
    assert_eq!(private_key.private_key, STANDARD.encode(b"whole-private-key"));
}

#[tokio::test]
async fn endpoint_failure_surfaces_before_assembly() {
    let healthy = spawn_vending_server(Ok(share_key_json(
        "key-1",
        "gcp-kms://project/key-a",
        &STANDARD.encode(b"\x01"),
    )))
    .await;
    let broken = spawn_vending_server(Err(StatusCode::NOT_FOUND)).await;

    let client = client_for(&[healthy, broken]);
    assert_eq!(client.private_key("key-1").await, Err(Error::NotFound));
}

#[tokio::test]
async fn unknown_key_id_yields_key_data_not_found() {
    let endpoint = spawn_vending_server(Ok(share_key_json(
        "key-1",
        "gcp-kms://project/key-a",
        &STANDARD.encode(b"\x01"),
    )))
    .await;

    let client = client_for(&[endpoint]);
    // The endpoint answers with key-1; nothing was collected for key-9.
    assert_eq!(
        client.private_key("key-9").await,
        Err(Error::KeyDataNotFound)
    );
}
