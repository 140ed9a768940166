//! Client key pair used to sign custodian requests and receive shares

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::SecretKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use sha2::Sha256;
use tdf3_crypto::{
    derive_session_key, generate_ec_key_pair, open_session_payload, CryptoError, CryptoService,
    KeyShare,
};
use tdf3_protocol::kas::algorithm;
use tdf3_protocol::KasError;
use zeroize::Zeroizing;

/// Key pair the client presents to custodians
///
/// RSA keys receive shares RSA-OAEP wrapped; EC keys receive them sealed
/// under an ECDH session key.
pub enum ClientKeyPair {
    Rsa {
        private_key: RsaPrivateKey,
        private_key_pem: Zeroizing<String>,
        public_key_pem: String,
    },
    Ec {
        secret: SecretKey,
        public_key_pem: String,
    },
}

impl fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientKeyPair")
            .field("algorithm", &self.algorithm())
            .field("public_key_pem", &self.public_key_pem())
            .finish_non_exhaustive()
    }
}

impl ClientKeyPair {
    pub fn generate_rsa(crypto: &dyn CryptoService, bits: usize) -> Result<Self, KasError> {
        let pair = crypto
            .generate_key_pair(bits)
            .map_err(|e| crypto_error("RSA key generation", e))?;
        Self::from_rsa_pem(pair.private_key.as_str(), pair.public_key)
    }

    /// Use an existing PKCS#8 or PKCS#1 RSA private key
    pub fn from_rsa_pem(
        private_key_pem: &str,
        public_key_pem: impl Into<String>,
    ) -> Result<Self, KasError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| KasError::ConfigError {
                reason: format!("client private key is not an RSA key: {}", e),
            })?;
        Ok(ClientKeyPair::Rsa {
            private_key,
            private_key_pem: Zeroizing::new(private_key_pem.to_string()),
            public_key_pem: public_key_pem.into(),
        })
    }

    pub fn generate_ec() -> Result<Self, KasError> {
        let (secret, pair) =
            generate_ec_key_pair().map_err(|e| crypto_error("EC key generation", e))?;
        Ok(ClientKeyPair::Ec {
            secret,
            public_key_pem: pair.public_key,
        })
    }

    pub fn public_key_pem(&self) -> &str {
        match self {
            ClientKeyPair::Rsa { public_key_pem, .. } | ClientKeyPair::Ec { public_key_pem, .. } => {
                public_key_pem
            }
        }
    }

    /// JWS algorithm of tokens this key signs
    pub fn algorithm(&self) -> &'static str {
        match self {
            ClientKeyPair::Rsa { .. } => algorithm::RS256,
            ClientKeyPair::Ec { .. } => algorithm::ES256,
        }
    }

    /// Compact JWS over `claims`
    pub fn sign_jwt(&self, claims: &Value) -> Result<String, KasError> {
        let header = json!({ "alg": self.algorithm(), "typ": "JWT" });
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{}.{}", header_b64, claims_b64);

        let signature = match self {
            ClientKeyPair::Rsa { private_key, .. } => {
                let key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key.clone());
                let signature =
                    rsa::signature::Signer::try_sign(&key, signing_input.as_bytes()).map_err(
                        |e| KasError::JwtError {
                            operation: "RS256 signing".to_string(),
                            reason: e.to_string(),
                        },
                    )?;
                rsa::signature::SignatureEncoding::to_vec(&signature)
            }
            ClientKeyPair::Ec { secret, .. } => {
                let key = p256::ecdsa::SigningKey::from(secret);
                let signature: p256::ecdsa::Signature =
                    p256::ecdsa::signature::Signer::try_sign(&key, signing_input.as_bytes())
                        .map_err(|e| KasError::JwtError {
                            operation: "ES256 signing".to_string(),
                            reason: e.to_string(),
                        })?;
                signature.to_bytes().to_vec()
            }
        };

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Recover a key share from a rewrap answer
    pub fn unwrap_share(
        &self,
        crypto: &dyn CryptoService,
        wrapped: &[u8],
        session_public_key: Option<&str>,
    ) -> Result<KeyShare, KasError> {
        match self {
            ClientKeyPair::Rsa {
                private_key_pem, ..
            } => crypto
                .decrypt_with_private_key(wrapped, private_key_pem)
                .map_err(|e| unwrap_error("RSA-OAEP", e)),
            ClientKeyPair::Ec { secret, .. } => {
                let session = session_public_key.ok_or_else(|| KasError::InvalidResponse {
                    reason: "EC rewrap answer has no session key".to_string(),
                    expected: Some("sessionPublicKey".to_string()),
                })?;
                let key = derive_session_key(secret, session)
                    .map_err(|e| unwrap_error("ECDH+HKDF", e))?;
                open_session_payload(&key[..], wrapped).map_err(|e| unwrap_error("AES-256-GCM", e))
            }
        }
    }
}

/// Add `iat` and `exp` to an object of claims
pub fn with_expiry(mut claims: Value, ttl_secs: u64) -> Value {
    let now = chrono::Utc::now().timestamp();
    if let Value::Object(map) = &mut claims {
        map.insert("iat".to_string(), json!(now));
        map.insert("exp".to_string(), json!(now + ttl_secs as i64));
    }
    claims
}

fn crypto_error(operation: &str, error: CryptoError) -> KasError {
    KasError::CryptoError {
        operation: operation.to_string(),
        reason: error.to_string(),
    }
}

fn unwrap_error(algorithm: &str, error: CryptoError) -> KasError {
    KasError::UnwrapError {
        algorithm: algorithm.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdf3_crypto::{seal_session_payload, RustCryptoBackend};

    fn split(token: &str) -> (String, Vec<u8>) {
        let (input, sig) = token.rsplit_once('.').unwrap();
        (input.to_string(), URL_SAFE_NO_PAD.decode(sig).unwrap())
    }

    fn claims_of(token: &str) -> Value {
        let part = token.split('.').nth(1).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
    }

    #[test]
    fn test_rs256_token_verifies() {
        use rsa::signature::Verifier;

        let crypto = RustCryptoBackend::new();
        let pair = ClientKeyPair::generate_rsa(&crypto, 2048).unwrap();
        let token = pair
            .sign_jwt(&with_expiry(json!({"requestBody": "{}"}), 60))
            .unwrap();

        let ClientKeyPair::Rsa { private_key, .. } = &pair else {
            panic!("expected RSA");
        };
        let verifying = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(private_key.to_public_key());
        let (input, sig) = split(&token);
        let signature = rsa::pkcs1v15::Signature::try_from(sig.as_slice()).unwrap();
        verifying.verify(input.as_bytes(), &signature).unwrap();

        let claims = claims_of(&token);
        assert_eq!(claims["requestBody"], "{}");
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            60
        );
    }

    #[test]
    fn test_es256_token_verifies() {
        use p256::ecdsa::signature::Verifier;

        let pair = ClientKeyPair::generate_ec().unwrap();
        assert_eq!(pair.algorithm(), "ES256");
        let token = pair.sign_jwt(&json!({"a": 1})).unwrap();

        let ClientKeyPair::Ec { secret, .. } = &pair else {
            panic!("expected EC");
        };
        let verifying = *p256::ecdsa::SigningKey::from(secret).verifying_key();
        let (input, sig) = split(&token);
        let signature = p256::ecdsa::Signature::from_slice(&sig).unwrap();
        verifying.verify(input.as_bytes(), &signature).unwrap();
    }

    #[test]
    fn test_ec_share_unwrapped_with_session_key() {
        let crypto = RustCryptoBackend::new();
        let client = ClientKeyPair::generate_ec().unwrap();
        let (server_secret, server_pair) = generate_ec_key_pair().unwrap();

        let server_key = derive_session_key(&server_secret, client.public_key_pem()).unwrap();
        let sealed = seal_session_payload(&server_key[..], b"share-bytes").unwrap();

        let share = client
            .unwrap_share(&crypto, &sealed, Some(&server_pair.public_key))
            .unwrap();
        assert_eq!(share.as_slice(), b"share-bytes");
        assert!(matches!(
            client.unwrap_share(&crypto, &sealed, None),
            Err(KasError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_rsa_share_unwrapped() {
        let crypto = RustCryptoBackend::new();
        let client = ClientKeyPair::generate_rsa(&crypto, 2048).unwrap();
        let wrapped = crypto
            .encrypt_with_public_key(b"share", client.public_key_pem())
            .unwrap();
        let share = client.unwrap_share(&crypto, &wrapped, None).unwrap();
        assert_eq!(share.as_slice(), b"share");
    }

    #[test]
    fn test_debug_hides_private_key() {
        let crypto = RustCryptoBackend::new();
        let pair = ClientKeyPair::generate_rsa(&crypto, 2048).unwrap();
        assert!(!format!("{:?}", pair).contains("PRIVATE"));
    }
}
