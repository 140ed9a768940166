//! Key custodian client
//!
//! Upsert syncs key access objects to their custodians at encrypt time.
//! Rewrap recovers each custodian's share at decrypt time. Both fan out
//! concurrently and succeed only when every custodian does.

mod auth;
mod signing;

pub use auth::{AuthProvider, BearerTokenProvider, HttpRequest};
pub use signing::{with_expiry, ClientKeyPair};

use std::sync::{Arc, OnceLock};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::try_join_all;
use regex::Regex;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tdf3_crypto::{extract_pem_from_key_string, key_merge, CryptoService, KeyShare};
use tdf3_protocol::manifest::{EncryptionInformation, KeyAccess, TdfManifest};
use tdf3_protocol::{
    KasError, RewrapClaims, RewrapRequestBody, RewrapResponse, SignedRewrapRequest, UpsertRequest,
};
use tracing::{debug, info, warn};

use crate::config::KasConfig;
use crate::policy::Policy;

/// Data key recovered from every custodian
#[derive(Debug)]
pub struct UnwrappedKey {
    pub key: KeyShare,
    /// Metadata of the last custodian that returned any
    pub metadata: Option<Value>,
}

/// Client for the custodian upsert and rewrap endpoints
#[derive(Debug, Clone)]
pub struct KasClient {
    http: Client,
    key_pair: Arc<ClientKeyPair>,
    auth: Option<Arc<dyn AuthProvider>>,
    crypto: Arc<dyn CryptoService>,
    config: KasConfig,
}

impl KasClient {
    /// Create a new custodian client
    ///
    /// # Arguments
    /// * `key_pair` - Key the client signs requests with and receives shares under
    /// * `crypto` - Backend used to open RSA-wrapped shares
    /// * `config` - Timeouts, endpoint paths and token lifetime
    pub fn new(
        key_pair: ClientKeyPair,
        crypto: Arc<dyn CryptoService>,
        config: KasConfig,
    ) -> Result<Self, KasError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| KasError::ConfigError {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(KasClient {
            http,
            key_pair: Arc::new(key_pair),
            auth: None,
            crypto,
            config,
        })
    }

    #[must_use]
    pub fn with_auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn key_pair(&self) -> &ClientKeyPair {
        &self.key_pair
    }

    pub fn config(&self) -> &KasConfig {
        &self.config
    }

    /// Sync key access objects to their custodians
    ///
    /// Only `remote` objects are contacted unless `ignore_type` is set. When
    /// every contacted custodian accepts, their objects lose `wrappedKey`,
    /// `encryptedMetadata` and `policyBinding`, and a remote sync replaces
    /// the stored policy by its identifier. On any failure `info` is left
    /// untouched.
    pub async fn upsert(
        &self,
        info: &mut EncryptionInformation,
        ignore_type: bool,
    ) -> Result<Vec<Value>, KasError> {
        let selected: Vec<usize> = info
            .key_access
            .iter()
            .enumerate()
            .filter(|(_, kao)| ignore_type || kao.is_remote())
            .map(|(i, _)| i)
            .collect();
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        info!(custodians = selected.len(), "upserting key access objects");

        let policy = info.policy.clone();
        let responses = try_join_all(
            selected
                .iter()
                .map(|&i| self.upsert_one(&info.key_access[i], &policy)),
        )
        .await?;

        let mut shrink_policy = false;
        for &i in &selected {
            let kao = &mut info.key_access[i];
            shrink_policy |= kao.is_remote();
            kao.strip_transient_fields();
        }
        if shrink_policy {
            let raw = info.get_policy_raw().map_err(|e| KasError::InvalidResponse {
                reason: format!("stored policy cannot be decoded: {}", e),
                expected: None,
            })?;
            let uuid = serde_json::from_str::<Value>(&raw)?
                .get("uuid")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| KasError::InvalidResponse {
                    reason: "stored policy has no uuid".to_string(),
                    expected: Some("uuid".to_string()),
                })?;
            info.set_policy_raw(&Policy::reference_json(&uuid));
        }
        Ok(responses)
    }

    async fn upsert_one(&self, kao: &KeyAccess, policy: &str) -> Result<Value, KasError> {
        let url = join_url(&kao.url, &self.config.upsert_path);
        let body = UpsertRequest {
            key_access: kao.clone(),
            policy: policy.to_string(),
            client_payload_signature: None,
        };
        let mut request = HttpRequest::post(url, serde_json::to_value(&body)?);
        self.authorize(&mut request).await?;

        let claims = with_expiry(request.body.clone(), self.config.token_ttl_secs);
        let signature = self.key_pair.sign_jwt(&claims)?;
        if let Value::Object(map) = &mut request.body {
            map.insert("clientPayloadSignature".to_string(), Value::String(signature));
        }

        let text = self.execute(request).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Ask one custodian for its share of the data key
    pub async fn rewrap(
        &self,
        kao: &KeyAccess,
        policy: &str,
    ) -> Result<(KeyShare, Option<Value>), KasError> {
        let url = join_url(&kao.url, &self.config.rewrap_path);
        let body = RewrapRequestBody {
            algorithm: self.key_pair.algorithm().to_string(),
            key_access: kao.clone(),
            client_public_key: self.key_pair.public_key_pem().to_string(),
            policy: policy.to_string(),
        };
        let claims = RewrapClaims {
            request_body: serde_json::to_string(&body)?,
        };
        let claims = with_expiry(serde_json::to_value(&claims)?, self.config.token_ttl_secs);
        let signed = SignedRewrapRequest {
            signed_request_token: self.key_pair.sign_jwt(&claims)?,
        };

        let mut request = HttpRequest::post(url, serde_json::to_value(&signed)?);
        self.authorize(&mut request).await?;
        let text = self.execute(request).await?;

        let response: RewrapResponse =
            serde_json::from_str(&text).map_err(|e| KasError::InvalidResponse {
                reason: format!("Unable to decrypt the response from KAS: {}", e),
                expected: Some("entityWrappedKey".to_string()),
            })?;
        let wrapped = BASE64.decode(&response.entity_wrapped_key)?;
        let share = self.key_pair.unwrap_share(
            self.crypto.as_ref(),
            &wrapped,
            response.session_public_key.as_deref(),
        )?;
        debug!(url = %kao.url, "share recovered");
        Ok((share, response.metadata))
    }

    /// Recover the data key from every custodian named in the manifest
    pub async fn unwrap_key(&self, manifest: &TdfManifest) -> Result<UnwrappedKey, KasError> {
        let info = &manifest.encryption_information;
        if info.key_access.is_empty() {
            return Err(KasError::InvalidResponse {
                reason: "manifest has no key access objects".to_string(),
                expected: Some("keyAccess".to_string()),
            });
        }
        info!(custodians = info.key_access.len(), "rewrapping key shares");

        let results = try_join_all(
            info.key_access
                .iter()
                .map(|kao| self.rewrap(kao, &info.policy)),
        )
        .await?;

        let mut metadata = None;
        let mut shares = Vec::with_capacity(results.len());
        for (share, meta) in results {
            if meta.is_some() {
                metadata = meta;
            }
            shares.push(share);
        }
        let key = key_merge(&shares).map_err(|e| KasError::CryptoError {
            operation: "key merge".to_string(),
            reason: e.to_string(),
        })?;
        Ok(UnwrappedKey { key, metadata })
    }

    /// Fetch a custodian's public key as SPKI PEM
    pub async fn fetch_public_key(&self, url: &str) -> Result<String, KasError> {
        if !is_trusted_key_url(url) {
            return Err(KasError::InvalidUrl(format!(
                "Public key must be requested over a secure channel: {}",
                url
            )));
        }
        let request = HttpRequest {
            method: Method::GET,
            url: join_url(url, &self.config.public_key_path),
            headers: Default::default(),
            body: Value::Null,
        };
        let text = self.execute(request).await?;
        let key = match serde_json::from_str::<Value>(&text) {
            Ok(Value::String(pem)) => pem,
            Ok(Value::Object(map)) => map
                .get("publicKey")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(text),
            _ => text,
        };
        extract_pem_from_key_string(&key).map_err(|e| KasError::CryptoError {
            operation: "public key extraction".to_string(),
            reason: e.to_string(),
        })
    }

    async fn authorize(&self, request: &mut HttpRequest) -> Result<(), KasError> {
        if let Some(auth) = &self.auth {
            auth.inject_auth(request).await?;
        }
        Ok(())
    }

    async fn execute(&self, request: HttpRequest) -> Result<String, KasError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if !request.body.is_null() {
            builder = builder.json(&request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(&request, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(&request, e))?;

        if !status.is_success() {
            let error = map_status(status, &request.url, text);
            warn!(url = %request.url, status = status.as_u16(), error = %error, "custodian request failed");
            return Err(error);
        }
        Ok(text)
    }

    fn transport_error(&self, request: &HttpRequest, error: reqwest::Error) -> KasError {
        let mapped = if error.is_timeout() {
            KasError::Timeout {
                timeout_ms: self.config.timeout().as_millis() as u64,
            }
        } else {
            KasError::RequestError {
                method: request.method.to_string(),
                url: request.url.clone(),
                reason: error.to_string(),
            }
        };
        warn!(url = %request.url, error = %mapped, "custodian unreachable");
        mapped
    }
}

fn map_status(status: StatusCode, url: &str, body: String) -> KasError {
    match status {
        StatusCode::UNAUTHORIZED => KasError::AuthenticationFailed { reason: body },
        StatusCode::FORBIDDEN => KasError::AccessDenied {
            resource: url.to_string(),
            reason: body,
        },
        _ => KasError::HttpError {
            status: status.as_u16(),
            message: body,
        },
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// `https:`, loopback HTTP and cluster-local HTTP services
pub fn is_trusted_key_url(url: &str) -> bool {
    static CLUSTER_LOCAL: OnceLock<Option<Regex>> = OnceLock::new();
    if url.starts_with("https:")
        || url.starts_with("http://localhost")
        || url.starts_with("http://127.0.0.1")
    {
        return true;
    }
    CLUSTER_LOCAL
        .get_or_init(|| Regex::new(r"^http://[a-zA-Z.-]*[.]?svc\.cluster\.local($|/)").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdf3_crypto::RustCryptoBackend;
    use tdf3_protocol::manifest::KeyAccessType;

    fn client() -> KasClient {
        KasClient::new(
            ClientKeyPair::generate_ec().unwrap(),
            Arc::new(RustCryptoBackend::new()),
            KasConfig::default(),
        )
        .unwrap()
    }

    fn info_with(objects: Vec<KeyAccess>) -> EncryptionInformation {
        let mut info = EncryptionInformation {
            encryption_type: "split".to_string(),
            key_access: objects,
            method: Default::default(),
            integrity_information: Default::default(),
            policy: String::new(),
        };
        info.set_policy_raw(r#"{"uuid":"p-1","body":{"dataAttributes":[],"dissem":[]}}"#);
        info
    }

    fn kao(access_type: KeyAccessType, url: &str) -> KeyAccess {
        let mut kao = KeyAccess::new(access_type, url.to_string());
        kao.wrapped_key = Some("d3JhcHBlZA==".to_string());
        kao
    }

    #[test]
    fn test_trusted_key_urls() {
        assert!(is_trusted_key_url("https://kas.example.com"));
        assert!(is_trusted_key_url("http://localhost:4000"));
        assert!(is_trusted_key_url("http://127.0.0.1:8080/kas"));
        assert!(is_trusted_key_url("http://kas.default.svc.cluster.local/kas"));
        assert!(!is_trusted_key_url("http://kas.example.com"));
        assert!(!is_trusted_key_url("http://svc.cluster.local.evil.com"));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "u", String::new()),
            KasError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, "u", String::new()),
            KasError::AccessDenied { .. }
        ));
        assert!(map_status(StatusCode::BAD_GATEWAY, "u", String::new()).is_retryable());
    }

    #[tokio::test]
    async fn test_upsert_skips_wrapped_objects() {
        let mut info = info_with(vec![kao(KeyAccessType::Wrapped, "http://127.0.0.1:1")]);
        let responses = client().upsert(&mut info, false).await.unwrap();
        assert!(responses.is_empty());
        assert!(info.key_access[0].wrapped_key.is_some());
    }

    #[tokio::test]
    async fn test_upsert_strips_and_shrinks_policy() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/upsert")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"keyAccess":{"type":"remote"}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .expect(1)
            .create_async()
            .await;

        let mut info = info_with(vec![
            kao(KeyAccessType::Remote, &server.url()),
            kao(KeyAccessType::Wrapped, "http://127.0.0.1:1"),
        ]);
        let responses = client().upsert(&mut info, false).await.unwrap();

        mock.assert_async().await;
        assert_eq!(responses, vec![serde_json::json!({"ok": true})]);
        assert!(info.key_access[0].wrapped_key.is_none());
        assert!(info.key_access[1].wrapped_key.is_some());
        assert_eq!(info.get_policy_raw().unwrap(), r#"{"uuid":"p-1"}"#);
    }

    #[tokio::test]
    async fn test_upsert_failure_leaves_manifest_untouched() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/upsert")
            .with_status(403)
            .with_body("denied")
            .create_async()
            .await;

        let mut info = info_with(vec![kao(KeyAccessType::Remote, &server.url())]);
        let before = info.policy.clone();
        let err = client().upsert(&mut info, false).await.unwrap_err();

        assert!(matches!(err, KasError::AccessDenied { .. }));
        assert!(info.key_access[0].wrapped_key.is_some());
        assert_eq!(info.policy, before);
    }

    #[tokio::test]
    async fn test_auth_header_reaches_custodian() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/upsert")
            .match_header("authorization", "Bearer t0ken")
            .with_status(204)
            .create_async()
            .await;

        let client = client().with_auth_provider(Arc::new(BearerTokenProvider::new("t0ken")));
        let mut info = info_with(vec![kao(KeyAccessType::Remote, &server.url())]);
        let responses = client.upsert(&mut info, false).await.unwrap();

        mock.assert_async().await;
        assert_eq!(responses, vec![Value::Null]);
    }

    #[tokio::test]
    async fn test_fetch_public_key_refuses_plain_http() {
        let err = client()
            .fetch_public_key("http://kas.example.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("secure channel"));
    }
}
