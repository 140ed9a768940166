//! Native backend built on aws-lc-rs (constant-time RSA, accelerated AES)

use aws_lc_rs::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    digest,
    encoding::{AsDer, Pkcs8V1Der, PublicKeyX509Der},
    hmac,
    rand::{SecureRandom, SystemRandom},
    rsa::{
        KeySize, OaepPrivateDecryptingKey, OaepPublicEncryptingKey, PrivateDecryptingKey,
        PublicEncryptingKey, OAEP_SHA1_MGF1SHA1,
    },
};
use zeroize::Zeroizing;

use super::{
    check_key_and_iv, check_rsa_bits, split_tag, Algorithm, CryptoService, EncryptResult,
    PemKeyPair,
};
use crate::helpers::CryptoError;

#[derive(Debug, Default, Clone)]
pub struct AwsLcBackend;

impl AwsLcBackend {
    pub fn new() -> Self {
        AwsLcBackend
    }

    fn aead_key(key: &[u8]) -> Result<LessSafeKey, CryptoError> {
        let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: 32,
                got: key.len(),
            }
        })?;
        Ok(LessSafeKey::new(unbound))
    }

    fn nonce(iv: &[u8]) -> Result<Nonce, CryptoError> {
        Nonce::try_assume_unique_for_key(iv).map_err(|_| CryptoError::InvalidIvLength {
            expected: 12,
            got: iv.len(),
        })
    }
}

/// Parse PEM to DER bytes
fn pem_to_der(pem_str: &str) -> Result<Vec<u8>, CryptoError> {
    let pem = pem::parse(pem_str)
        .map_err(|e| CryptoError::InvalidKey(format!("Failed to parse PEM: {}", e)))?;
    Ok(pem.contents().to_vec())
}

impl CryptoService for AwsLcBackend {
    fn name(&self) -> &'static str {
        "aws-lc"
    }

    fn encrypt(
        &self,
        payload: &[u8],
        key: &[u8],
        iv: &[u8],
        algorithm: Algorithm,
    ) -> Result<EncryptResult, CryptoError> {
        check_key_and_iv(algorithm, key, iv)?;
        let sealing = Self::aead_key(key)?;
        let mut buffer = payload.to_vec();
        let tag = sealing
            .seal_in_place_separate_tag(Self::nonce(iv)?, Aad::empty(), &mut buffer)
            .map_err(|_| CryptoError::OperationFailed {
                operation: "AES-GCM encryption",
            })?;
        Ok(EncryptResult {
            payload: buffer,
            auth_tag: Some(tag.as_ref().to_vec()),
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
        let opening = Self::aead_key(key)?;
        let mut in_out = Vec::with_capacity(body.len() + tag.len());
        in_out.extend_from_slice(body);
        in_out.extend_from_slice(tag);
        let plain_len = opening
            .open_in_place(Self::nonce(iv)?, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::AuthenticationFailed)?
            .len();
        in_out.truncate(plain_len);
        Ok(in_out)
    }

    fn hash(&self, content: &[u8]) -> Vec<u8> {
        digest::digest(&digest::SHA256, content).as_ref().to_vec()
    }

    fn keyed_hash(&self, key: &[u8], content: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        Ok(hmac::sign(&key, content).as_ref().to_vec())
    }

    fn encrypt_with_public_key(
        &self,
        payload: &[u8],
        public_key_pem: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let der = pem_to_der(public_key_pem)?;
        let public_key = PublicEncryptingKey::from_der(&der).map_err(|e| {
            CryptoError::InvalidKey(format!("Failed to parse RSA public key: {:?}", e))
        })?;
        let oaep_key = OaepPublicEncryptingKey::new(public_key)
            .map_err(|e| CryptoError::InvalidKey(format!("Failed to create OAEP key: {:?}", e)))?;

        let mut ciphertext = vec![0u8; oaep_key.ciphertext_size()];
        let len = oaep_key
            .encrypt(&OAEP_SHA1_MGF1SHA1, payload, &mut ciphertext, None)
            .map_err(|e| CryptoError::Asymmetric {
                operation: "RSA-OAEP encryption",
                reason: format!("{:?}", e),
            })?
            .len();
        ciphertext.truncate(len);
        Ok(ciphertext)
    }

    fn decrypt_with_private_key(
        &self,
        payload: &[u8],
        private_key_pem: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let der = Zeroizing::new(pem_to_der(private_key_pem)?);
        let private_key = PrivateDecryptingKey::from_pkcs8(&der).map_err(|e| {
            CryptoError::InvalidKey(format!("Failed to parse RSA private key: {:?}", e))
        })?;
        let oaep_key = OaepPrivateDecryptingKey::new(private_key)
            .map_err(|e| CryptoError::InvalidKey(format!("Failed to create OAEP key: {:?}", e)))?;

        let mut plaintext = Zeroizing::new(vec![0u8; oaep_key.min_output_size()]);
        let len = oaep_key
            .decrypt(&OAEP_SHA1_MGF1SHA1, payload, &mut plaintext, None)
            .map_err(|e| CryptoError::Asymmetric {
                operation: "RSA-OAEP decryption",
                reason: format!("{:?}", e),
            })?
            .len();
        plaintext.truncate(len);
        Ok(plaintext)
    }

    fn generate_key_pair(&self, bits: usize) -> Result<PemKeyPair, CryptoError> {
        check_rsa_bits(bits)?;
        let size = match bits {
            2048 => KeySize::Rsa2048,
            3072 => KeySize::Rsa3072,
            4096 => KeySize::Rsa4096,
            8192 => KeySize::Rsa8192,
            other => {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "RSA-{other}"
                )))
            }
        };
        let private_key = PrivateDecryptingKey::generate(size).map_err(|e| {
            CryptoError::Asymmetric {
                operation: "RSA key generation",
                reason: format!("{:?}", e),
            }
        })?;
        let public_key = private_key.public_key();

        let private_der = AsDer::<Pkcs8V1Der>::as_der(&private_key).map_err(|e| {
            CryptoError::Asymmetric {
                operation: "PKCS#8 encoding",
                reason: format!("{:?}", e),
            }
        })?;
        let public_der = AsDer::<PublicKeyX509Der>::as_der(&public_key).map_err(|e| {
            CryptoError::Asymmetric {
                operation: "SPKI encoding",
                reason: format!("{:?}", e),
            }
        })?;

        let private_pem = pem::Pem::new("PRIVATE KEY", private_der.as_ref());
        let public_pem = pem::Pem::new("PUBLIC KEY", public_der.as_ref());
        Ok(PemKeyPair {
            public_key: pem::encode(&public_pem),
            private_key: Zeroizing::new(pem::encode(&private_pem)),
        })
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        if SystemRandom::new().fill(&mut buf).is_err() {
            // The system RNG does not fail on supported platforms
            return crate::helpers::random_bytes(len);
        }
        buf
    }
}
