//! Byte-range sources for the container reader
//!
//! The reader only ever asks for the tail of the container, the central
//! directory, the manifest and individual segment windows, so a source only
//! has to answer range requests. Remote containers are never downloaded whole.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Range {range} not satisfiable for a source of {len} bytes")]
    RangeNotSatisfiable { range: String, len: u64 },

    #[error("Source did not report its length")]
    UnknownLength,
}

impl ChunkerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ChunkerError::Status { status, .. } => *status >= 500,
            ChunkerError::Http { .. } => true,
            _ => false,
        }
    }
}

/// A span of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    Full,
    /// `start..end`, end exclusive
    Bounded { start: u64, end: u64 },
    /// `start..`
    From(u64),
    /// The last `n` bytes, or everything when the source is shorter
    Suffix(u64),
}

impl ByteRange {
    /// Absolute `(start, end)` within a source of `len` bytes
    pub fn resolve(&self, len: u64) -> Result<(u64, u64), ChunkerError> {
        let (start, end) = match *self {
            ByteRange::Full => (0, len),
            ByteRange::Bounded { start, end } => (start, end),
            ByteRange::From(start) => (start, len),
            ByteRange::Suffix(n) => (len.saturating_sub(n), len),
        };
        if start > end || end > len {
            return Err(ChunkerError::RangeNotSatisfiable {
                range: self.to_string(),
                len,
            });
        }
        Ok((start, end))
    }

    /// Value of an HTTP `Range` header, `None` for the whole resource
    pub fn header_value(&self) -> Option<String> {
        match *self {
            ByteRange::Full => None,
            ByteRange::Bounded { start, end } => Some(format!("bytes={}-{}", start, end - 1)),
            ByteRange::From(start) => Some(format!("bytes={}-", start)),
            ByteRange::Suffix(n) => Some(format!("bytes=-{}", n)),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(*self, ByteRange::Bounded { start, end } if start >= end)
            || matches!(*self, ByteRange::Suffix(0))
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteRange::Full => write!(f, "full"),
            ByteRange::Bounded { start, end } => write!(f, "{}..{}", start, end),
            ByteRange::From(start) => write!(f, "{}..", start),
            ByteRange::Suffix(n) => write!(f, "last {}", n),
        }
    }
}

/// Random-access byte source
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Total length of the source in bytes
    async fn size(&self) -> Result<u64, ChunkerError>;

    /// Read a span of the source
    async fn read_range(&self, range: ByteRange) -> Result<Bytes, ChunkerError>;
}

/// In-memory source
#[derive(Debug, Clone)]
pub struct BufferChunker {
    data: Bytes,
}

impl BufferChunker {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl Chunker for BufferChunker {
    async fn size(&self) -> Result<u64, ChunkerError> {
        Ok(self.data.len() as u64)
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes, ChunkerError> {
        let (start, end) = range.resolve(self.data.len() as u64)?;
        Ok(self.data.slice(start as usize..end as usize))
    }
}

/// Local file source; each read opens, seeks and reads
#[derive(Debug, Clone)]
pub struct FileChunker {
    path: PathBuf,
}

impl FileChunker {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Chunker for FileChunker {
    async fn size(&self) -> Result<u64, ChunkerError> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes, ChunkerError> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        let (start, end) = range.resolve(len)?;
        let wanted = usize::try_from(end - start).map_err(|_| ChunkerError::RangeNotSatisfiable {
            range: range.to_string(),
            len,
        })?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; wanted];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Remote source read with HTTP range requests
#[derive(Debug, Clone)]
pub struct UrlChunker {
    client: reqwest::Client,
    url: String,
}

impl UrlChunker {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn http_error(&self, err: reqwest::Error) -> ChunkerError {
        ChunkerError::Http {
            url: self.url.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Chunker for UrlChunker {
    async fn size(&self) -> Result<u64, ChunkerError> {
        let head = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        let head_length = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let (true, Some(len)) = (head.status().is_success(), head_length) {
            return Ok(len);
        }

        // No usable HEAD answer; ask for one byte and read the total
        tracing::debug!(url = %self.url, status = head.status().as_u16(), "HEAD gave no length");
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| self.http_error(e))?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.rsplit('/').next())
                .and_then(|total| total.parse().ok())
                .ok_or(ChunkerError::UnknownLength),
            StatusCode::OK => {
                let body = response.bytes().await.map_err(|e| self.http_error(e))?;
                Ok(body.len() as u64)
            }
            status => Err(ChunkerError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            }),
        }
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes, ChunkerError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let mut request = self.client.get(&self.url);
        if let Some(value) = range.header_value() {
            request = request.header(RANGE, value);
        }
        tracing::trace!(url = %self.url, %range, "range request");
        let response = request.send().await.map_err(|e| self.http_error(e))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => response.bytes().await.map_err(|e| self.http_error(e)),
            StatusCode::OK => {
                // Server ignored the range header and sent the whole body
                let body = response.bytes().await.map_err(|e| self.http_error(e))?;
                let (start, end) = range.resolve(body.len() as u64)?;
                Ok(body.slice(start as usize..end as usize))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => Err(ChunkerError::RangeNotSatisfiable {
                range: range.to_string(),
                len: 0,
            }),
            status => Err(ChunkerError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            }),
        }
    }
}
