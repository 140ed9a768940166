//! Shared helpers for the integration tests
//!
//! RSA key generation is slow, so custodian and client keys are generated
//! once per test binary. The helpers here play the custodian side of the
//! protocol: they open a key access object with the custodian's private key
//! and answer a rewrap the way a real custodian would.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde_json::{json, Value};
use tdf3::config::KasConfig;
use tdf3::crypto::{
    derive_session_key, generate_ec_key_pair, key_merge, seal_session_payload, CryptoService,
    KeyShare, PemKeyPair, RustCryptoBackend,
};
use tdf3::kas::{ClientKeyPair, KasClient};
use tdf3::protocol::{KeyAccess, RewrapRequestBody, SignedRewrapRequest, TdfManifest};
use tdf3::{TdfClient, TdfConfig};

/// Test data for encryption/decryption
pub const TEST_PLAINTEXT: &[u8] = b"Hello, TDF3! This is test data for encryption.";

pub const KAS_KEY_BITS: usize = 2048;

static CUSTODIAN_KEYS: OnceLock<Vec<PemKeyPair>> = OnceLock::new();
static CLIENT_KEY: OnceLock<PemKeyPair> = OnceLock::new();

pub fn crypto() -> Arc<dyn CryptoService> {
    Arc::new(RustCryptoBackend::new())
}

/// Three custodian key pairs, shared across tests
pub fn custodian_keys() -> &'static [PemKeyPair] {
    CUSTODIAN_KEYS.get_or_init(|| {
        let crypto = RustCryptoBackend::new();
        (0..3)
            .map(|_| crypto.generate_key_pair(KAS_KEY_BITS).unwrap())
            .collect()
    })
}

pub fn client_key() -> &'static PemKeyPair {
    CLIENT_KEY.get_or_init(|| {
        RustCryptoBackend::new()
            .generate_key_pair(KAS_KEY_BITS)
            .unwrap()
    })
}

/// Custodian client signing with the shared RSA client key
pub fn kas_client() -> KasClient {
    let pair = client_key();
    let key_pair =
        ClientKeyPair::from_rsa_pem(pair.private_key.as_str(), pair.public_key.clone()).unwrap();
    KasClient::new(key_pair, crypto(), KasConfig::default()).unwrap()
}

pub fn tdf_client(kas: Option<KasClient>) -> TdfClient {
    TdfClient::new(TdfConfig::default(), crypto(), kas).unwrap()
}

/// Open one key access object with its custodian's private key
pub fn open_share(kao: &KeyAccess, custodian_private_pem: &str) -> KeyShare {
    let wrapped = BASE64.decode(kao.wrapped_key.as_deref().unwrap()).unwrap();
    crypto()
        .decrypt_with_private_key(&wrapped, custodian_private_pem)
        .unwrap()
}

/// Recover the data key the way the custodians would jointly release it
pub fn recover_key(manifest: &TdfManifest, custodian_private_pems: &[&str]) -> KeyShare {
    let shares: Vec<KeyShare> = manifest
        .encryption_information
        .key_access
        .iter()
        .zip(custodian_private_pems)
        .map(|(kao, pem)| open_share(kao, pem))
        .collect();
    key_merge(&shares).unwrap()
}

/// Rewrap answer for an RSA client: the share re-encrypted under the
/// client public key
pub fn rewrap_body(
    kao: &KeyAccess,
    custodian_private_pem: &str,
    client_public_pem: &str,
    metadata: Option<Value>,
) -> String {
    let share = open_share(kao, custodian_private_pem);
    let rewrapped = crypto()
        .encrypt_with_public_key(&share, client_public_pem)
        .unwrap();
    let mut body = json!({ "entityWrappedKey": BASE64.encode(rewrapped) });
    if let Some(metadata) = metadata {
        body["metadata"] = metadata;
    }
    body.to_string()
}

/// Rewrap answer for an EC client: the share sealed under an ECDH session
/// key, with the custodian's ephemeral public key alongside
pub fn ec_rewrap_body(kao: &KeyAccess, custodian_private_pem: &str, client_public_pem: &str) -> String {
    let share = open_share(kao, custodian_private_pem);
    let (secret, ephemeral) = generate_ec_key_pair().unwrap();
    let session = derive_session_key(&secret, client_public_pem).unwrap();
    let sealed = seal_session_payload(&session[..], &share).unwrap();
    json!({
        "entityWrappedKey": BASE64.encode(sealed),
        "sessionPublicKey": ephemeral.public_key,
    })
    .to_string()
}

/// Incremental plaintext of `len` bytes
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Claims of a compact JWS, without checking the signature
pub fn jwt_claims(token: &str) -> Value {
    let payload = token.split('.').nth(1).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}

/// Decoded body of a rewrap request as it arrives at the custodian
pub fn rewrap_request(body: &[u8]) -> RewrapRequestBody {
    let signed: SignedRewrapRequest = serde_json::from_slice(body).unwrap();
    let claims = jwt_claims(&signed.signed_request_token);
    assert!(claims["exp"].as_i64().unwrap() > claims["iat"].as_i64().unwrap());
    serde_json::from_str(claims["requestBody"].as_str().unwrap()).unwrap()
}

/// Answer a rewrap request the way a custodian holding
/// `custodian_private_pem` would
pub fn answer_rewrap(body: &[u8], custodian_private_pem: &str, metadata: Option<Value>) -> Vec<u8> {
    let request = rewrap_request(body);
    let answer = match request.algorithm.as_str() {
        "ES256" => ec_rewrap_body(&request.key_access, custodian_private_pem, &request.client_public_key),
        _ => rewrap_body(
            &request.key_access,
            custodian_private_pem,
            &request.client_public_key,
            metadata,
        ),
    };
    answer.into_bytes()
}

/// Mount a custodian answering rewraps with custodian key `index`
pub async fn mount_custodian(
    server: &mut mockito::ServerGuard,
    index: usize,
    metadata: Option<Value>,
) -> mockito::Mock {
    let pem: &'static str = custodian_keys()[index].private_key.as_str();
    server
        .mock("POST", "/v2/rewrap")
        .match_body(mockito::Matcher::Regex(r#""signedRequestToken":"eyJ"#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |request| {
            answer_rewrap(request.body().unwrap(), pem, metadata.clone())
        })
        .create_async()
        .await
}
