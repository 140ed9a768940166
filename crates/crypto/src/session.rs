//! EC session keys for rewrap responses
//!
//! When the client presents an EC public key, the KAS answers with its own
//! session public key and a share sealed under a key both sides derive:
//!
//! 1. ECDH: client_private × session_public → shared_secret
//! 2. HKDF-SHA256: salt = SHA256("TDF"), empty info → 32-byte key
//! 3. AES-256-GCM: `nonce (12) || ciphertext || tag (16)`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use p256::{
    elliptic_curve::ecdh::diffie_hellman,
    pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::backend::PemKeyPair;
use crate::cipher::{IV_LENGTH, SEGMENT_OVERHEAD};
use crate::helpers::{generate_nonce, CryptoError};

const SESSION_SALT_INPUT: &[u8] = b"TDF";

/// Fresh P-256 key pair with PEM encodings
pub fn generate_ec_key_pair() -> Result<(SecretKey, PemKeyPair), CryptoError> {
    let secret = SecretKey::random(&mut OsRng);
    let public_key = secret
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Asymmetric {
            operation: "SPKI encoding",
            reason: e.to_string(),
        })?;
    let private_key = secret
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Asymmetric {
            operation: "PKCS#8 encoding",
            reason: e.to_string(),
        })?;
    Ok((
        secret,
        PemKeyPair {
            public_key,
            private_key,
        },
    ))
}

/// Derive the symmetric session key shared with the holder of `peer_public_pem`
pub fn derive_session_key(
    secret: &SecretKey,
    peer_public_pem: &str,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let peer = PublicKey::from_public_key_pem(peer_public_pem).map_err(|e| {
        CryptoError::InvalidKey(format!("Failed to parse session public key: {}", e))
    })?;
    let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());

    let salt = Sha256::digest(SESSION_SALT_INPUT);
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.raw_secret_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(&[], &mut key[..])
        .map_err(|_| CryptoError::OperationFailed {
            operation: "HKDF expansion",
        })?;
    Ok(key)
}

/// Open a share sealed under a session key
pub fn open_session_payload(
    session_key: &[u8],
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < SEGMENT_OVERHEAD {
        return Err(CryptoError::CiphertextTooShort {
            len: sealed.len(),
            min: SEGMENT_OVERHEAD,
        });
    }
    let cipher = Aes256Gcm::new_from_slice(session_key).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: 32,
            got: session_key.len(),
        }
    })?;
    let (nonce, body) = sealed.split_at(IV_LENGTH);
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Seal a share under a session key, the way a KAS answers an EC rewrap
pub fn seal_session_payload(session_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(session_key).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: 32,
            got: session_key.len(),
        }
    })?;
    let nonce = generate_nonce();
    let body = cipher
        .encrypt(Nonce::from_slice(nonce.as_slice()), plaintext)
        .map_err(|_| CryptoError::OperationFailed {
            operation: "AES-GCM encryption",
        })?;
    let mut out = Vec::with_capacity(IV_LENGTH + body.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&body);
    Ok(out)
}
