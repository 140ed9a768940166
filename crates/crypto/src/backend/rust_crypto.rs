//! Portable pure-software backend built on the RustCrypto crates

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::rngs::OsRng;
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{
    check_key_and_iv, check_rsa_bits, split_tag, Algorithm, CryptoService, EncryptResult,
    PemKeyPair,
};
use crate::helpers::{random_bytes, CryptoError};
use crate::integrity::calculate_hmac;

/// Portable backend: `aes-gcm`, `hmac`, `sha2`, `rsa`
#[derive(Debug, Default, Clone)]
pub struct RustCryptoBackend;

impl RustCryptoBackend {
    pub fn new() -> Self {
        RustCryptoBackend
    }
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(format!("Failed to parse RSA public key: {}", e)))
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(format!("Failed to parse RSA private key: {}", e)))
}

impl CryptoService for RustCryptoBackend {
    fn name(&self) -> &'static str {
        "rust-crypto"
    }

    fn encrypt(
        &self,
        payload: &[u8],
        key: &[u8],
        iv: &[u8],
        algorithm: Algorithm,
    ) -> Result<EncryptResult, CryptoError> {
        check_key_and_iv(algorithm, key, iv)?;
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: algorithm.key_length(),
            got: key.len(),
        })?;
        let mut buffer = payload.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(iv), b"", &mut buffer)
            .map_err(|_| CryptoError::OperationFailed {
                operation: "AES-GCM encryption",
            })?;
        Ok(EncryptResult {
            payload: buffer,
            auth_tag: Some(tag.to_vec()),
        })
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        algorithm: Algorithm,
        auth_tag: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        check_key_and_iv(algorithm, key, iv)?;
        let (body, tag) = split_tag(ciphertext, auth_tag)?;
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: algorithm.key_length(),
            got: key.len(),
        })?;
        let mut buffer = body.to_vec();
        cipher
            .decrypt_in_place_detached(Nonce::from_slice(iv), b"", &mut buffer, Tag::from_slice(tag))
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(buffer)
    }

    fn hash(&self, content: &[u8]) -> Vec<u8> {
        Sha256::digest(content).to_vec()
    }

    fn keyed_hash(&self, key: &[u8], content: &[u8]) -> Result<Vec<u8>, CryptoError> {
        calculate_hmac(key, content).map_err(|_| CryptoError::OperationFailed {
            operation: "HMAC-SHA256",
        })
    }

    fn encrypt_with_public_key(
        &self,
        payload: &[u8],
        public_key_pem: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let public_key = parse_public_key(public_key_pem)?;
        public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), payload)
            .map_err(|e| CryptoError::Asymmetric {
                operation: "RSA-OAEP encryption",
                reason: e.to_string(),
            })
    }

    fn decrypt_with_private_key(
        &self,
        payload: &[u8],
        private_key_pem: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let private_key = parse_private_key(private_key_pem)?;
        private_key
            .decrypt(Oaep::new::<Sha1>(), payload)
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::Asymmetric {
                operation: "RSA-OAEP decryption",
                reason: e.to_string(),
            })
    }

    fn generate_key_pair(&self, bits: usize) -> Result<PemKeyPair, CryptoError> {
        check_rsa_bits(bits)?;
        let private_key =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| CryptoError::Asymmetric {
                operation: "RSA key generation",
                reason: e.to_string(),
            })?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem =
            private_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| CryptoError::Asymmetric {
                    operation: "PKCS#8 encoding",
                    reason: e.to_string(),
                })?;
        let public_pem =
            public_key
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| CryptoError::Asymmetric {
                    operation: "SPKI encoding",
                    reason: e.to_string(),
                })?;

        Ok(PemKeyPair {
            public_key: public_pem,
            private_key: private_pem,
        })
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        random_bytes(len)
    }
}
