//! Request authorization hook
//!
//! Token acquisition lives outside this crate. A provider only sees the
//! outgoing request and may add headers or body fields before it is signed
//! and sent.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use tdf3_protocol::KasError;
use zeroize::Zeroizing;

/// Outgoing custodian request, mutable by an [`AuthProvider`]
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        HttpRequest {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync + fmt::Debug {
    async fn inject_auth(&self, request: &mut HttpRequest) -> Result<(), KasError>;
}

/// Static bearer credential
pub struct BearerTokenProvider {
    token: Zeroizing<String>,
}

impl BearerTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        BearerTokenProvider {
            token: Zeroizing::new(token.into()),
        }
    }
}

impl fmt::Debug for BearerTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerTokenProvider")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for BearerTokenProvider {
    async fn inject_auth(&self, request: &mut HttpRequest) -> Result<(), KasError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token.as_str()))
            .map_err(|_| KasError::ConfigError {
                reason: "bearer token contains characters not allowed in a header".to_string(),
            })?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bearer_header_injected() {
        let provider = BearerTokenProvider::new("abc123");
        let mut request = HttpRequest::post("https://kas.example.com/v2/rewrap", Value::Null);
        provider.inject_auth(&mut request).await.unwrap();
        assert_eq!(request.headers[AUTHORIZATION], "Bearer abc123");
        assert!(!format!("{:?}", provider).contains("abc123"));
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let provider = BearerTokenProvider::new("bad\ntoken");
        let mut request = HttpRequest::post("https://kas.example.com", Value::Null);
        assert!(matches!(
            provider.inject_auth(&mut request).await,
            Err(KasError::ConfigError { .. })
        ));
    }
}
