//! Temporary file hosts that turn an archive into a shareable link.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const TMPFILES_UPLOAD_URL: &str = "https://tmpfiles.org/api/v1/upload";
pub const ZERO_X_ZERO_UPLOAD_URL: &str = "https://0x0.st";

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("facesift/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(StatusCode),
    #[error("unexpected response: {0}")]
    Rejected(String),
}

/// A published archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostedLink {
    pub service: String,
    pub url: String,
    /// Human-readable lifetime, e.g. "1 hour".
    pub expiry: String,
}

#[async_trait]
pub trait HostingService: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(&self, blob: &[u8], suggested_name: &str) -> Result<HostedLink, UploadError>;
}

/// Shared HTTP client for all hosts.
pub fn http_client(timeout: Duration) -> Result<Client, UploadError> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

fn archive_form(blob: &[u8], suggested_name: &str) -> Result<Form, UploadError> {
    let part = Part::bytes(blob.to_vec())
        .file_name(suggested_name.to_string())
        .mime_str("application/zip")?;
    Ok(Form::new().part("file", part))
}

/// tmpfiles.org: files live for one hour.
pub struct TmpFiles {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TmpFilesResponse {
    status: String,
    data: Option<TmpFilesData>,
}

#[derive(Debug, Deserialize)]
struct TmpFilesData {
    url: String,
}

impl TmpFiles {
    pub const NAME: &'static str = "tmpfiles.org";
    const EXPIRY: &'static str = "1 hour";

    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, TMPFILES_UPLOAD_URL)
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// The API answers with the viewer page; the `/dl/` form downloads directly.
    fn parse_response(body: &str) -> Result<String, UploadError> {
        let response: TmpFilesResponse = serde_json::from_str(body)
            .map_err(|e| UploadError::Rejected(format!("invalid JSON: {e}")))?;
        match response {
            TmpFilesResponse {
                status,
                data: Some(data),
            } if status == "success" => Ok(data.url.replacen("tmpfiles.org/", "tmpfiles.org/dl/", 1)),
            TmpFilesResponse { status, .. } => {
                Err(UploadError::Rejected(format!("status '{status}'")))
            }
        }
    }
}

#[async_trait]
impl HostingService for TmpFiles {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(level = "debug", skip(self, blob), fields(bytes = blob.len()))]
    async fn upload(&self, blob: &[u8], suggested_name: &str) -> Result<HostedLink, UploadError> {
        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(archive_form(blob, suggested_name)?)
            .send()
            .await?;

        let status = response.status();
        debug!(status = %status, latency_ms = start.elapsed().as_millis() as u64, "tmpfiles.org responded");
        if !status.is_success() {
            return Err(UploadError::Status(status));
        }

        let body = response.text().await?;
        let url = Self::parse_response(&body).map_err(|e| {
            warn!(error = %e, "tmpfiles.org rejected upload");
            e
        })?;
        Ok(HostedLink {
            service: Self::NAME.to_string(),
            url,
            expiry: Self::EXPIRY.to_string(),
        })
    }
}

/// 0x0.st: plain-text response, files kept for at least a day.
pub struct ZeroXZero {
    client: Client,
    endpoint: String,
}

impl ZeroXZero {
    pub const NAME: &'static str = "0x0.st";
    const EXPIRY: &'static str = "24 hours";

    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, ZERO_X_ZERO_UPLOAD_URL)
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn parse_response(body: &str) -> Result<String, UploadError> {
        let url = body.trim();
        if url.starts_with("https://") || url.starts_with("http://") {
            Ok(url.to_string())
        } else {
            let preview: String = url.chars().take(80).collect();
            Err(UploadError::Rejected(format!("not a URL: '{preview}'")))
        }
    }
}

#[async_trait]
impl HostingService for ZeroXZero {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(level = "debug", skip(self, blob), fields(bytes = blob.len()))]
    async fn upload(&self, blob: &[u8], suggested_name: &str) -> Result<HostedLink, UploadError> {
        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(archive_form(blob, suggested_name)?)
            .send()
            .await?;

        let status = response.status();
        debug!(status = %status, latency_ms = start.elapsed().as_millis() as u64, "0x0.st responded");
        if !status.is_success() {
            return Err(UploadError::Status(status));
        }

        let url = Self::parse_response(&response.text().await?)?;
        Ok(HostedLink {
            service: Self::NAME.to_string(),
            url,
            expiry: Self::EXPIRY.to_string(),
        })
    }
}

/// Known hosts, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    TmpFiles,
    ZeroXZero,
}

impl HostKind {
    pub fn service(self, client: Client) -> Arc<dyn HostingService> {
        match self {
            HostKind::TmpFiles => Arc::new(TmpFiles::new(client)),
            HostKind::ZeroXZero => Arc::new(ZeroXZero::new(client)),
        }
    }
}

impl FromStr for HostKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tmpfiles" | "tmpfiles.org" => Ok(HostKind::TmpFiles),
            "0x0" | "0x0.st" => Ok(HostKind::ZeroXZero),
            other => Err(format!("unknown hosting service '{other}'")),
        }
    }
}

/// Build the fallback chain in priority order, sharing one HTTP client.
pub fn hosting_chain(
    kinds: &[HostKind],
    timeout: Duration,
) -> Result<Vec<Arc<dyn HostingService>>, UploadError> {
    let client = http_client(timeout)?;
    Ok(kinds.iter().map(|k| k.service(client.clone())).collect())
}
