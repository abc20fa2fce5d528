//! Portal client module
//!
//! HTTP access to the portal's upload endpoints. Every request carries the
//! anti-forgery header configured in [`PortalConfig`]; route paths come from
//! the configured templates with the item id percent-encoded into `{id}`.
//!
//! # Example
//!
//! ```no_run
//! use knolx_uploadr::config::Config;
//! use knolx_uploadr::portal::{PortalBackend, PortalClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::for_portal("https://knolx.example.com", "csrf-token");
//! let client = PortalClient::new(&config.portal)?;
//!
//! if client.is_uploading("5a1b2c3d").await? {
//!     let percent = client.progress("5a1b2c3d").await?;
//!     println!("upload at {}%", percent);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Endpoints
//!
//! | Operation | Method | Route | Success |
//! |-----------|--------|-------|---------|
//! | upload | POST multipart | `routes.upload` | 2xx |
//! | is_uploading | GET | `routes.check_uploading` | 2xx = running |
//! | pending_reference | GET | `routes.check_pending_url` | 2xx body = reference |
//! | progress | GET | `routes.progress` | number 0-100 |
//! | new_reference | GET | `routes.new_reference` | reference or sentinel |
//! | cancel | GET | `routes.cancel` | 2xx |
//! | update_metadata | POST JSON | `routes.update_metadata` | 2xx |

use crate::config::{PortalConfig, RoutesConfig, ITEM_ID_PLACEHOLDER};
use crate::upload::{StagedFile, VideoMetadata};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use thiserror::Error;
use tokio_util::io::ReaderStream;

pub mod search;

/// Header carrying the staged file's byte size ahead of the multipart body
pub const FILESIZE_HEADER: &str = "filesize";

/// Characters escaped when an item id is placed in a path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Portal client errors
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Portal returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        PortalError::RequestError(err.to_string())
    }
}

/// Server operations the upload workflow depends on
#[async_trait]
pub trait PortalBackend: Send + Sync {
    /// Send the staged file and its metadata as one multipart request
    async fn upload(
        &self,
        item_id: &str,
        file: &StagedFile,
        metadata: &VideoMetadata,
    ) -> Result<(), PortalError>;

    /// Whether the portal is still processing an upload for the item
    async fn is_uploading(&self, item_id: &str) -> Result<bool, PortalError>;

    /// A completed upload's reference that was never attached to the item
    async fn pending_reference(&self, item_id: &str) -> Result<Option<String>, PortalError>;

    /// Raw percentage reported for the running upload
    async fn progress(&self, item_id: &str) -> Result<f64, PortalError>;

    /// The new video reference, or the not-yet-available sentinel
    async fn new_reference(&self, item_id: &str) -> Result<String, PortalError>;

    async fn cancel(&self, item_id: &str) -> Result<(), PortalError>;

    async fn update_metadata(
        &self,
        item_id: &str,
        metadata: &VideoMetadata,
    ) -> Result<(), PortalError>;
}

/// reqwest based portal client
pub struct PortalClient {
    base_url: String,
    csrf_header: String,
    csrf_token: String,
    routes: RoutesConfig,
    /// Client for queries, bounded by the request timeout
    http: reqwest::Client,
    /// Client for the upload request, which has no timeout
    upload_http: reqwest::Client,
}

impl PortalClient {
    /// Create a new portal client
    pub fn new(config: &PortalConfig) -> Result<Self, PortalError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(PortalError::ConfigError(format!(
                "base_url must start with http:// or https://, got: {}",
                config.base_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PortalError::ConfigError(e.to_string()))?;

        let upload_http = reqwest::Client::builder()
            .build()
            .map_err(|e| PortalError::ConfigError(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            csrf_header: config.csrf_header.clone(),
            csrf_token: config.csrf_token.clone(),
            routes: config.routes.clone(),
            http,
            upload_http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a route that does not address an item
    pub(crate) fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    /// Absolute URL for an item route template
    pub fn item_url(&self, template: &str, item_id: &str) -> String {
        let encoded = utf8_percent_encode(item_id, PATH_SEGMENT).to_string();
        self.url(&template.replace(ITEM_ID_PLACEHOLDER, &encoded))
    }

    pub(crate) fn routes(&self) -> &RoutesConfig {
        &self.routes
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Attach the anti-forgery header
    pub(crate) fn with_csrf(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(self.csrf_header.as_str(), self.csrf_token.as_str())
    }

    async fn get(&self, template: &str, item_id: &str) -> Result<Response, PortalError> {
        let url = self.item_url(template, item_id);
        let response = self.with_csrf(self.http.get(&url)).send().await?;
        Ok(response)
    }
}

/// Turn a non-2xx response into `PortalError::Status`
pub(crate) async fn expect_success(response: Response) -> Result<Response, PortalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PortalError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Plain-text endpoints may answer either `abc` or `"abc"`
pub(crate) fn text_value(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('"') {
        if let Ok(value) = serde_json::from_str::<String>(trimmed) {
            return value.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Parse a progress body such as `42`, `42.5` or `"42"`
pub(crate) fn parse_progress(body: &str) -> Result<f64, PortalError> {
    let value = text_value(body);
    value
        .parse::<f64>()
        .map_err(|_| PortalError::InvalidResponse(format!("not a percentage: {:?}", value)))
}

#[async_trait]
impl PortalBackend for PortalClient {
    #[tracing::instrument(
        name = "portal.upload",
        skip(self, file, metadata),
        fields(
            item.id = %item_id,
            upload.file = %file.file_name,
            upload.bytes = file.size_bytes,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload(
        &self,
        item_id: &str,
        file: &StagedFile,
        metadata: &VideoMetadata,
    ) -> Result<(), PortalError> {
        let handle = tokio::fs::File::open(&file.path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));
        let part = Part::stream_with_length(body, file.size_bytes).file_name(file.file_name.clone());

        let mut form = Form::new();
        for tag in &metadata.tags {
            form = form.text("tags[]", tag.clone());
        }
        let form = form
            .text("title", metadata.title.clone())
            .text("description", metadata.description.clone())
            .text("category", metadata.category.clone())
            .text("status", metadata.status.clone())
            .part("file", part);

        let url = self.item_url(&self.routes.upload, item_id);
        let request = self
            .upload_http
            .post(&url)
            .header(FILESIZE_HEADER, file.size_bytes.to_string())
            .multipart(form);

        let response = self.with_csrf(request).send().await?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        expect_success(response).await?;

        tracing::info!(bytes = file.size_bytes, "Upload accepted by portal");
        Ok(())
    }

    #[tracing::instrument(name = "portal.is_uploading", skip(self), fields(item.id = %item_id), err)]
    async fn is_uploading(&self, item_id: &str) -> Result<bool, PortalError> {
        let response = self.get(&self.routes.check_uploading, item_id).await?;
        Ok(response.status().is_success())
    }

    #[tracing::instrument(
        name = "portal.pending_reference",
        skip(self),
        fields(item.id = %item_id),
        err
    )]
    async fn pending_reference(&self, item_id: &str) -> Result<Option<String>, PortalError> {
        let response = self.get(&self.routes.check_pending_url, item_id).await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let reference = text_value(&response.text().await?);
        Ok((!reference.is_empty()).then_some(reference))
    }

    #[tracing::instrument(name = "portal.progress", skip(self), fields(item.id = %item_id), err)]
    async fn progress(&self, item_id: &str) -> Result<f64, PortalError> {
        let response = expect_success(self.get(&self.routes.progress, item_id).await?).await?;
        parse_progress(&response.text().await?)
    }

    #[tracing::instrument(
        name = "portal.new_reference",
        skip(self),
        fields(item.id = %item_id),
        err
    )]
    async fn new_reference(&self, item_id: &str) -> Result<String, PortalError> {
        let response =
            expect_success(self.get(&self.routes.new_reference, item_id).await?).await?;
        Ok(text_value(&response.text().await?))
    }

    #[tracing::instrument(name = "portal.cancel", skip(self), fields(item.id = %item_id), err)]
    async fn cancel(&self, item_id: &str) -> Result<(), PortalError> {
        expect_success(self.get(&self.routes.cancel, item_id).await?).await?;
        Ok(())
    }

    #[tracing::instrument(
        name = "portal.update_metadata",
        skip(self, metadata),
        fields(item.id = %item_id),
        err
    )]
    async fn update_metadata(
        &self,
        item_id: &str,
        metadata: &VideoMetadata,
    ) -> Result<(), PortalError> {
        let url = self.item_url(&self.routes.update_metadata, item_id);
        let request = self.http.post(&url).json(metadata);
        expect_success(self.with_csrf(request).send().await?).await?;
        Ok(())
    }
}
