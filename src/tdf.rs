//! High-level TDF API
//!
//! [`TdfClient`] bundles configuration, the crypto backend and an optional
//! custodian client, and hands out fluent encrypt and decrypt builders.

use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::{stream, Stream};
use serde_json::Value;
use tdf3_crypto::{select_backend, CryptoService, IntegrityAlgorithm, PemKeyPair};
use tdf3_protocol::TdfManifest;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::archive::{BufferChunker, Chunker, FileChunker, UrlChunker, Zip64Mode};
use crate::config::TdfConfig;
use crate::decrypt::{DecryptEngine, DecryptOutcome};
use crate::encrypt::{DetachedKey, EncryptEngine, EncryptOptions, EncryptOutcome};
use crate::error::TdfError;
use crate::html::{unwrap_html, wrap_html};
use crate::kas::KasClient;
use crate::key_access::KeyAccessTarget;
use crate::policy::Policy;

/// Entry point for TDF operations
///
/// # Example
///
/// ```no_run
/// use tdf3::kas::{ClientKeyPair, KasClient};
/// use tdf3::policy::PolicyBuilder;
/// use tdf3::{TdfClient, TdfConfig};
/// use tdf3_crypto::select_backend;
///
/// # async fn example(kas_public_key: String) -> Result<(), Box<dyn std::error::Error>> {
/// let config = TdfConfig::default();
/// let crypto = select_backend();
/// let kas = KasClient::new(ClientKeyPair::generate_ec()?, crypto.clone(), config.kas.clone())?;
/// let client = TdfClient::new(config, crypto, Some(kas))?;
///
/// let policy = PolicyBuilder::new().id_auto().dissem("user@example.com").build();
/// let (container, _) = client
///     .encrypt()
///     .wrapped("https://kas.example.com", kas_public_key)
///     .policy(policy)
///     .to_bytes(&b"Sensitive data"[..])
///     .await?;
///
/// let (plaintext, _) = client.decrypt().from_bytes(container).await?;
/// assert_eq!(plaintext, b"Sensitive data");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TdfClient {
    config: TdfConfig,
    crypto: Arc<dyn CryptoService>,
    kas: Option<KasClient>,
}

impl TdfClient {
    pub fn new(
        config: TdfConfig,
        crypto: Arc<dyn CryptoService>,
        kas: Option<KasClient>,
    ) -> Result<Self, TdfError> {
        config.validate()?;
        Ok(TdfClient {
            config,
            crypto,
            kas,
        })
    }

    /// Client on the best available crypto backend, without custodians
    pub fn from_config(config: TdfConfig) -> Result<Self, TdfError> {
        Self::new(config, select_backend(), None)
    }

    #[must_use]
    pub fn with_kas_client(mut self, kas: KasClient) -> Self {
        self.kas = Some(kas);
        self
    }

    pub fn config(&self) -> &TdfConfig {
        &self.config
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoService> {
        &self.crypto
    }

    pub fn kas(&self) -> Option<&KasClient> {
        self.kas.as_ref()
    }

    fn require_kas(&self) -> Result<&KasClient, TdfError> {
        self.kas
            .as_ref()
            .ok_or_else(|| TdfError::options("this operation requires a custodian client"))
    }

    pub fn encrypt(&self) -> EncryptBuilder<'_> {
        EncryptBuilder::new(self)
    }

    pub fn decrypt(&self) -> DecryptBuilder<'_> {
        DecryptBuilder::new(self)
    }

    /// Upsert every key access object of `manifest`, whatever its type
    pub async fn sync(&self, manifest: &mut TdfManifest) -> Result<Vec<Value>, TdfError> {
        let kas = self.require_kas()?;
        Ok(kas.upsert(&mut manifest.encryption_information, true).await?)
    }

    /// Read only the manifest of a container served over HTTP
    pub async fn manifest_from_remote(&self, url: &str) -> Result<TdfManifest, TdfError> {
        let chunker = UrlChunker::new(url);
        let engine = DecryptEngine::new(self.crypto.clone(), None, self.config.decrypt.clone());
        Ok(engine.load(&chunker).await?.manifest)
    }

    /// Policy of a container served over HTTP
    pub async fn policy_from_remote(&self, url: &str) -> Result<Policy, TdfError> {
        let manifest = self.manifest_from_remote(url).await?;
        Ok(Policy::from_json(&manifest.get_policy_raw()?)?)
    }

    pub fn generate_policy_uuid() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// RSA key pair in PEM form
    pub fn generate_key_pair(&self, bits: usize) -> Result<PemKeyPair, TdfError> {
        Ok(self.crypto.generate_key_pair(bits)?)
    }

    /// A custodian's public key over a trusted channel
    pub async fn fetch_public_key(&self, url: &str) -> Result<String, TdfError> {
        Ok(self.require_kas()?.fetch_public_key(url).await?)
    }
}

enum PolicyInput {
    Typed(Policy),
    Raw(Value),
}

/// Builder for one encrypt operation
pub struct EncryptBuilder<'a> {
    client: &'a TdfClient,
    targets: Vec<KeyAccessTarget>,
    policy: Option<PolicyInput>,
    options: Result<EncryptOptions, TdfError>,
}

impl<'a> EncryptBuilder<'a> {
    fn new(client: &'a TdfClient) -> Self {
        EncryptBuilder {
            client,
            targets: Vec::new(),
            policy: None,
            options: EncryptOptions::from_config(&client.config.encrypt),
        }
    }

    fn map_options(mut self, f: impl FnOnce(EncryptOptions) -> EncryptOptions) -> Self {
        self.options = self.options.map(f);
        self
    }

    #[must_use]
    pub fn target(mut self, target: KeyAccessTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Custodian that receives its share wrapped in the manifest
    #[must_use]
    pub fn wrapped(self, url: impl Into<String>, public_key_pem: impl Into<String>) -> Self {
        self.target(KeyAccessTarget::wrapped(url, public_key_pem))
    }

    /// Custodian that is synced before writing and keeps its share server-side
    #[must_use]
    pub fn remote(self, url: impl Into<String>, public_key_pem: impl Into<String>) -> Self {
        self.target(KeyAccessTarget::remote(url, public_key_pem))
    }

    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(PolicyInput::Typed(policy));
        self
    }

    /// Untyped policy object, validated when the operation starts
    #[must_use]
    pub fn policy_value(mut self, policy: Value) -> Self {
        self.policy = Some(PolicyInput::Raw(policy));
        self
    }

    #[must_use]
    pub fn segment_size(self, size: u64) -> Self {
        self.map_options(|o| o.segment_size(size))
    }

    #[must_use]
    pub fn byte_limit(self, limit: u64) -> Self {
        self.map_options(|o| o.byte_limit(limit))
    }

    #[must_use]
    pub fn integrity_algorithm(self, alg: IntegrityAlgorithm) -> Self {
        self.map_options(|o| o.integrity_algorithm(alg))
    }

    #[must_use]
    pub fn segment_integrity_algorithm(self, alg: IntegrityAlgorithm) -> Self {
        self.map_options(|o| o.segment_integrity_algorithm(alg))
    }

    #[must_use]
    pub fn mime_type(self, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        self.map_options(|o| o.mime_type(mime_type))
    }

    #[must_use]
    pub fn zip64(self, mode: Zip64Mode) -> Self {
        self.map_options(|o| o.zip64(mode))
    }

    /// Surface the wrapped data key instead of giving custodians its shares
    #[must_use]
    pub fn detached(self) -> Self {
        self.map_options(|o| o.detached(true))
    }

    /// Stream `source` into `sink`
    pub async fn run<S, W>(self, source: S, sink: W) -> Result<EncryptOutcome, TdfError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        let policy = match self.policy {
            Some(PolicyInput::Typed(policy)) => policy,
            Some(PolicyInput::Raw(value)) => Policy::from_value(value)?,
            None => Policy::from_value(Value::Object(Default::default()))?,
        };
        let options = self.options?;
        let engine = EncryptEngine::new(self.client.crypto.clone(), self.client.kas.clone(), options);
        engine.encrypt(self.targets, &policy, source, sink).await
    }

    pub async fn from_reader<R, W>(self, reader: R, sink: W) -> Result<EncryptOutcome, TdfError>
    where
        R: AsyncRead + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        self.run(ReaderStream::new(reader), sink).await
    }

    /// Encrypt an in-memory plaintext into container bytes
    pub async fn to_bytes(
        self,
        data: impl Into<Bytes>,
    ) -> Result<(Vec<u8>, EncryptOutcome), TdfError> {
        let mut container = Vec::new();
        let source = stream::iter([Ok::<_, io::Error>(data.into())]);
        let outcome = self.run(source, &mut container).await?;
        Ok((container, outcome))
    }

    /// Encrypt a file into another file
    pub async fn to_file(
        self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<EncryptOutcome, TdfError> {
        let reader = tokio::fs::File::open(input).await?;
        let writer = tokio::fs::File::create(output).await?;
        self.from_reader(reader, writer).await
    }

    /// Encrypt into an HTML envelope pointing at `transfer_url`
    pub async fn to_html(
        self,
        data: impl Into<Bytes>,
        transfer_url: &str,
    ) -> Result<(String, EncryptOutcome), TdfError> {
        let (container, outcome) = self.to_bytes(data).await?;
        let html = wrap_html(&container, &outcome.manifest.to_json()?, transfer_url)?;
        Ok((html, outcome))
    }
}

/// Builder for one decrypt operation
pub struct DecryptBuilder<'a> {
    client: &'a TdfClient,
    detached: Option<DetachedKey>,
    verify_before_emit: bool,
}

impl<'a> DecryptBuilder<'a> {
    fn new(client: &'a TdfClient) -> Self {
        DecryptBuilder {
            client,
            detached: None,
            verify_before_emit: client.config.decrypt.verify_before_emit,
        }
    }

    /// Wrapped data key from a detached-mode encrypt
    #[must_use]
    pub fn detached_key(mut self, key: DetachedKey) -> Self {
        self.detached = Some(key);
        self
    }

    /// Emit plaintext per segment instead of verifying everything first
    #[must_use]
    pub fn verify_before_emit(mut self, verify: bool) -> Self {
        self.verify_before_emit = verify;
        self
    }

    fn engine(&self) -> DecryptEngine {
        let mut options = self.client.config.decrypt.clone();
        options.verify_before_emit = self.verify_before_emit;
        DecryptEngine::new(self.client.crypto.clone(), self.client.kas.clone(), options)
    }

    /// Decrypt from any range-readable source into `sink`
    pub async fn run<W>(self, chunker: &dyn Chunker, sink: W) -> Result<DecryptOutcome, TdfError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        self.engine()
            .decrypt(chunker, sink, self.detached.as_ref())
            .await
    }

    pub async fn from_bytes(
        self,
        container: impl Into<Bytes>,
    ) -> Result<(Vec<u8>, DecryptOutcome), TdfError> {
        let chunker = BufferChunker::new(container);
        let mut plaintext = Vec::new();
        let outcome = self.run(&chunker, &mut plaintext).await?;
        Ok((plaintext, outcome))
    }

    pub async fn from_html(self, html: &str) -> Result<(Vec<u8>, DecryptOutcome), TdfError> {
        let container = unwrap_html(html)?;
        self.from_bytes(container).await
    }

    pub async fn from_file(self, path: impl AsRef<Path>) -> Result<(Vec<u8>, DecryptOutcome), TdfError> {
        let chunker = FileChunker::new(path);
        let mut plaintext = Vec::new();
        let outcome = self.run(&chunker, &mut plaintext).await?;
        Ok((plaintext, outcome))
    }

    pub async fn from_url(self, url: &str) -> Result<(Vec<u8>, DecryptOutcome), TdfError> {
        let chunker = UrlChunker::new(url);
        let mut plaintext = Vec::new();
        let outcome = self.run(&chunker, &mut plaintext).await?;
        Ok((plaintext, outcome))
    }
}
