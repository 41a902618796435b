//! Streamed upload of object bodies to the bulk log endpoint

use crate::errors::{ForwarderError, ForwarderResult};
use crate::store::ObjectBody;
use async_trait::async_trait;
use reqwest::{Body, Client};
use tracing::{debug, warn};

/// Sends one object body to one destination URL
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Returns once the HTTP exchange has fully ended
    async fn upload(&self, url: &str, body: ObjectBody) -> ForwarderResult<()>;
}

/// HTTP uploader posting the raw object bytes
///
/// There is no retry here: a failed upload is reported and redelivery is left
/// to whatever invoked the pipeline.
#[derive(Clone)]
pub struct HttpUploader {
    http_client: Client,
}

impl HttpUploader {
    pub fn new() -> ForwarderResult<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("s3-log-forwarder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ForwarderError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, url: &str, body: ObjectBody) -> ForwarderResult<()> {
        debug!(
            "Posting {} bytes to {}",
            body.content_length()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            url
        );

        // Content-Type is left unset on purpose, the endpoint takes raw lines
        let response = self
            .http_client
            .post(url)
            .body(Body::wrap_stream(body.into_stream()))
            .send()
            .await
            .map_err(|e| ForwarderError::transfer_with_source("HTTP request failed", e))?;

        let status = response.status();

        // The exchange is only complete once the response body has been read
        response
            .bytes()
            .await
            .map_err(|e| ForwarderError::transfer_with_source("HTTP response was cut short", e))?;

        if status.is_success() {
            debug!("Successfully posted to log endpoint");
        } else {
            warn!("Log endpoint answered with status {}", status);
        }
        Ok(())
    }
}
