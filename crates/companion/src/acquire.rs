//! Image acquisition: local files and remote URLs both normalize to one
//! `data:<mime>;base64,<payload>` string.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use image::ImageFormat;
use reqwest::Url;
use tracing::{debug, info};

use crate::config::FetchConfig;
use crate::error::AcquisitionError;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    Url(String),
}

impl ImageSource {
    /// Preview that can be shown before the payload is ready. Only URLs have one.
    pub fn initial_preview(&self) -> Option<String> {
        match self {
            ImageSource::File(_) => None,
            ImageSource::Url(url) => Some(url.clone()),
        }
    }
}

/// A self-describing `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    mime_type: String,
    data: String,
}

impl DataUrl {
    pub fn encode(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The base64 payload with the descriptive prefix stripped.
    pub fn payload(&self) -> &str {
        &self.data
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A normalized image, ready to preview and to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredImage {
    data_url: DataUrl,
}

impl AcquiredImage {
    fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            data_url: DataUrl::encode(mime_type, bytes),
        }
    }

    pub fn preview(&self) -> String {
        self.data_url.to_string()
    }

    pub fn payload(&self) -> &str {
        self.data_url.payload()
    }

    pub fn mime_type(&self) -> &str {
        self.data_url.mime_type()
    }
}

/// Raw HTTP answer for an image URL.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Transport failures are `AcquisitionError::Fetch`; status handling is the caller's.
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, AcquisitionError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("plant-companion/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, config.max_bytes)
    }

    pub fn with_client(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, AcquisitionError> {
        let failed = |reason: String| AcquisitionError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                failed("timed out".into())
            } else {
                failed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if response.content_length().is_some_and(|len| len > self.max_bytes as u64) {
            return Err(failed(format!("image larger than {} bytes", self.max_bytes)));
        }

        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(failed(format!("image larger than {} bytes", self.max_bytes)));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedResource {
            status,
            content_type,
            body,
        })
    }
}

/// Resolves `ImageSource`s into `AcquiredImage`s.
pub struct ImageAcquirer {
    fetcher: Arc<dyn ImageFetcher>,
}

impl ImageAcquirer {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn acquire(&self, source: &ImageSource) -> Result<AcquiredImage, AcquisitionError> {
        match source {
            ImageSource::File(path) => self.acquire_from_file(path).await,
            ImageSource::Url(url) => self.acquire_from_url(url).await,
        }
    }

    pub async fn acquire_from_file(&self, path: &Path) -> Result<AcquiredImage, AcquisitionError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| AcquisitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mime = sniff_mime(&bytes)
            .or_else(|| ImageFormat::from_path(path).ok().map(|f| f.to_mime_type()))
            .unwrap_or(FALLBACK_MIME);
        info!(path = %path.display(), mime, size = bytes.len(), "Image read from file");
        Ok(AcquiredImage::from_bytes(mime, &bytes))
    }

    pub async fn acquire_from_url(&self, url: &str) -> Result<AcquiredImage, AcquisitionError> {
        let url = parse_image_url(url)?;
        let resource = self.fetcher.fetch(&url).await?;
        let mime = classify(&url, &resource)?;
        info!(%url, %mime, size = resource.body.len(), "Image fetched from URL");
        Ok(AcquiredImage::from_bytes(&mime, &resource.body))
    }
}

fn parse_image_url(raw: &str) -> Result<Url, AcquisitionError> {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(AcquisitionError::InvalidUrl(trimmed.to_string())),
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

/// Decide whether the origin actually handed us an image.
///
/// 401/403/451 and successful answers that carry something other than an image
/// (hotlink-protection pages) count as the origin refusing us the resource.
fn classify(url: &Url, resource: &FetchedResource) -> Result<String, AcquisitionError> {
    let refused = || AcquisitionError::CrossOrigin {
        url: url.to_string(),
    };

    match resource.status {
        401 | 403 | 451 => return Err(refused()),
        200..=299 => {}
        status => {
            return Err(AcquisitionError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            })
        }
    }

    let declared = resource
        .content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"));

    match (declared, sniff_mime(&resource.body)) {
        (Some(mime), _) => Ok(mime),
        (None, Some(mime)) => {
            debug!(%url, content_type = ?resource.content_type, "Undeclared image type, sniffed {mime}");
            Ok(mime.to_string())
        }
        (None, None) => Err(refused()),
    }
}


#[cfg(test)]
pub(crate) const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0xF8, 0xCF, 0xC0, 0x00,
    0x00, 0x03, 0x01, 0x01, 0x00, 0xC9, 0xFE, 0x92, 0xEF, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E,
    0x44, 0xAE, 0x42, 0x60, 0x82,
];
