//! Key access objects
//!
//! The data key is XOR-split across the configured custodians. Each share is
//! wrapped under its custodian's public key, bound to the policy by HMAC and
//! used to seal the custodian's metadata.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tdf3_crypto::{
    calculate_policy_binding, extract_pem_from_key_string, key_split, AesGcmCipher,
    CryptoService, KeyInfo, Nonce96,
};
use tdf3_protocol::manifest::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess, KeyAccessType,
    ManifestError, PolicyBinding,
};

use crate::error::TdfError;

/// A custodian the data key is split to
#[derive(Debug, Clone)]
pub struct KeyAccessTarget {
    pub access_type: KeyAccessType,
    pub url: String,
    /// SPKI PEM or X.509 certificate PEM
    pub public_key_pem: String,
    /// Sealed under the share and stored as `encryptedMetadata`
    pub metadata: Option<Value>,
}

impl KeyAccessTarget {
    pub fn wrapped(url: impl Into<String>, public_key_pem: impl Into<String>) -> Self {
        KeyAccessTarget {
            access_type: KeyAccessType::Wrapped,
            url: url.into(),
            public_key_pem: public_key_pem.into(),
            metadata: None,
        }
    }

    pub fn remote(url: impl Into<String>, public_key_pem: impl Into<String>) -> Self {
        KeyAccessTarget {
            access_type: KeyAccessType::Remote,
            ..Self::wrapped(url, public_key_pem)
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Strings are sealed as-is, anything else as JSON
    fn metadata_string(&self) -> String {
        match &self.metadata {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Wire form of `encryptedMetadata` before its outer base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMetadata {
    /// base64 of `IV || ciphertext || tag`
    pub ciphertext: String,
    pub iv: String,
}

/// Split-key encryption information builder
#[derive(Debug, Clone)]
pub struct SplitKey {
    crypto: Arc<dyn CryptoService>,
    cipher: AesGcmCipher,
    targets: Vec<KeyAccessTarget>,
}

impl SplitKey {
    pub fn new(
        crypto: Arc<dyn CryptoService>,
        targets: Vec<KeyAccessTarget>,
    ) -> Result<Self, TdfError> {
        if targets.is_empty() {
            return Err(TdfError::options("at least one key access target is required"));
        }
        Ok(SplitKey {
            cipher: AesGcmCipher::new(crypto.clone()),
            crypto,
            targets,
        })
    }

    /// Fresh data key and key IV
    pub fn generate_key(&self) -> Result<KeyInfo, TdfError> {
        Ok(self.cipher.generate_key_info()?)
    }

    /// One key access object per target, in target order
    pub fn key_access_objects(
        &self,
        policy_json: &str,
        key: &[u8],
        iv: &Nonce96,
    ) -> Result<Vec<KeyAccess>, TdfError> {
        let shares = key_split(key, self.targets.len())?;
        let iv_b64 = BASE64.encode(iv.as_slice());

        let mut objects = Vec::with_capacity(shares.len());
        for (target, share) in self.targets.iter().zip(shares.iter()) {
            let public_key = extract_pem_from_key_string(&target.public_key_pem)?;
            let wrapped = self.crypto.encrypt_with_public_key(share, &public_key)?;
            let binding = calculate_policy_binding(self.crypto.as_ref(), policy_json, share)?;

            let sealed =
                self.cipher
                    .encrypt(target.metadata_string().as_bytes(), share, Some(iv.as_slice()))?;
            let metadata = EncryptedMetadata {
                ciphertext: BASE64.encode(sealed),
                iv: iv_b64.clone(),
            };
            let metadata_json = serde_json::to_string(&metadata).map_err(ManifestError::from)?;

            let mut object = KeyAccess::new(target.access_type, target.url.clone());
            object.wrapped_key = Some(BASE64.encode(wrapped));
            object.policy_binding = Some(PolicyBinding::Hash(binding));
            object.encrypted_metadata = Some(BASE64.encode(metadata_json));
            objects.push(object);
        }
        tracing::debug!(custodians = objects.len(), "key access objects built");
        Ok(objects)
    }

    /// `encryptionInformation` with empty integrity information
    pub fn encryption_information(
        &self,
        policy_json: &str,
        key: &[u8],
        iv: &Nonce96,
    ) -> Result<EncryptionInformation, TdfError> {
        let key_access = self.key_access_objects(policy_json, key, iv)?;
        let mut info = EncryptionInformation {
            encryption_type: "split".to_string(),
            key_access,
            method: EncryptionMethod {
                iv: BASE64.encode(iv.as_slice()),
                ..EncryptionMethod::default()
            },
            integrity_information: IntegrityInformation::default(),
            policy: String::new(),
        };
        info.set_policy_raw(policy_json);
        Ok(info)
    }
}

/// Open a key access object's `encryptedMetadata` with its recovered share
pub fn decrypt_metadata(
    cipher: &AesGcmCipher,
    encrypted_metadata: &str,
    share: &[u8],
) -> Result<String, TdfError> {
    let outer = BASE64
        .decode(encrypted_metadata)
        .map_err(tdf3_crypto::CryptoError::from)?;
    let metadata: EncryptedMetadata = serde_json::from_slice(&outer)
        .map_err(|e| TdfError::integrity(format!("encryptedMetadata is not valid JSON: {}", e)))?;
    let sealed = BASE64
        .decode(&metadata.ciphertext)
        .map_err(tdf3_crypto::CryptoError::from)?;
    let plain = cipher.decrypt(&sealed, share)?;
    String::from_utf8(plain)
        .map_err(|_| TdfError::integrity("encryptedMetadata is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdf3_crypto::{key_merge, RustCryptoBackend};

    fn crypto() -> Arc<dyn CryptoService> {
        Arc::new(RustCryptoBackend::new())
    }

    fn key_pair(crypto: &Arc<dyn CryptoService>) -> tdf3_crypto::PemKeyPair {
        crypto.generate_key_pair(2048).unwrap()
    }

    #[test]
    fn test_shares_unwrap_and_merge() {
        let crypto = crypto();
        let a = key_pair(&crypto);
        let b = key_pair(&crypto);
        let split = SplitKey::new(
            crypto.clone(),
            vec![
                KeyAccessTarget::wrapped("https://a.example.com", a.public_key.clone()),
                KeyAccessTarget::remote("https://b.example.com", b.public_key.clone())
                    .with_metadata(serde_json::json!({"owner": "b"})),
            ],
        )
        .unwrap();
        let key_info = split.generate_key().unwrap();
        let policy = r#"{"uuid":"u","body":{"dataAttributes":[],"dissem":[]}}"#;
        let info = split
            .encryption_information(policy, key_info.key.as_slice(), &key_info.iv)
            .unwrap();

        assert_eq!(info.encryption_type, "split");
        assert_eq!(info.get_policy_raw().unwrap(), policy);
        assert_eq!(info.key_access[1].access_type, KeyAccessType::Remote);

        let mut shares = Vec::new();
        for (object, pair) in info.key_access.iter().zip([&a, &b]) {
            let wrapped = BASE64.decode(object.wrapped_key.as_ref().unwrap()).unwrap();
            let share = crypto
                .decrypt_with_private_key(&wrapped, &pair.private_key)
                .unwrap();
            let binding = calculate_policy_binding(crypto.as_ref(), policy, &share).unwrap();
            assert_eq!(object.policy_binding.as_ref().unwrap().hash(), binding);
            shares.push(share);
        }
        assert_eq!(key_merge(&shares).unwrap().as_slice(), key_info.key.as_slice());

        let cipher = AesGcmCipher::new(crypto);
        let metadata = decrypt_metadata(
            &cipher,
            info.key_access[1].encrypted_metadata.as_ref().unwrap(),
            &shares[1],
        )
        .unwrap();
        assert_eq!(metadata, r#"{"owner":"b"}"#);
    }

    #[test]
    fn test_metadata_records_key_iv() {
        let crypto = crypto();
        let pair = key_pair(&crypto);
        let split = SplitKey::new(
            crypto,
            vec![KeyAccessTarget::wrapped("https://a.example.com", pair.public_key)],
        )
        .unwrap();
        let key_info = split.generate_key().unwrap();
        let objects = split
            .key_access_objects("{}", key_info.key.as_slice(), &key_info.iv)
            .unwrap();
        let outer = BASE64
            .decode(objects[0].encrypted_metadata.as_ref().unwrap())
            .unwrap();
        let metadata: EncryptedMetadata = serde_json::from_slice(&outer).unwrap();
        assert_eq!(metadata.iv, BASE64.encode(key_info.iv.as_slice()));
        let sealed = BASE64.decode(&metadata.ciphertext).unwrap();
        assert_eq!(&sealed[..12], key_info.iv.as_slice());
    }

    #[test]
    fn test_no_targets_rejected() {
        assert!(matches!(
            SplitKey::new(crypto(), Vec::new()),
            Err(TdfError::InvalidOptions { .. })
        ));
    }
}
