//! Destination resolution: which bulk endpoint URL an object is posted to
//!
//! A bucket can override the destination with two tags, one carrying the
//! token and one carrying the tag. Without a bucket token the configured
//! default applies, taken either from static configuration or from the
//! decrypted secret.

use crate::config::{ForwarderConfig, ResolutionStrategy};
use crate::errors::{ForwarderError, ForwarderResult};
use crate::secret::SecretResolver;
use crate::store::ObjectStore;
use std::sync::Arc;
use tracing::debug;

/// Host, token and optional tag of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    pub host_base: String,
    pub token: String,
    pub tag: Option<String>,
}

impl DestinationConfig {
    /// Build a destination, rejecting an empty token
    pub fn new(host_base: &str, token: String, tag: Option<String>) -> ForwarderResult<Self> {
        if token.trim().is_empty() {
            return Err(ForwarderError::config("destination token is empty"));
        }
        Ok(Self {
            host_base: host_base.to_string(),
            token,
            tag: tag.filter(|t| !t.is_empty()),
        })
    }

    /// `host_base + token [+ "/tag/" + urlencoded tag]`
    pub fn url(&self) -> String {
        match &self.tag {
            Some(tag) => format!(
                "{}{}/tag/{}",
                self.host_base,
                self.token,
                urlencoding::encode(tag)
            ),
            None => format!("{}{}", self.host_base, self.token),
        }
    }
}

/// Where the default token comes from
#[derive(Clone)]
pub enum TokenSource {
    /// Token given in configuration, possibly absent
    Static(Option<String>),
    /// Token decrypted once at process start
    Encrypted(SecretResolver),
}

impl TokenSource {
    async fn token(&self) -> ForwarderResult<Option<String>> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Encrypted(secret) => secret.resolve().await.map(Some),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            TokenSource::Static(_) => "static",
            TokenSource::Encrypted(_) => "encrypted",
        }
    }
}

/// Resolves the destination of each invocation
#[derive(Clone)]
pub struct DestinationResolver {
    store: Arc<dyn ObjectStore>,
    strategy: ResolutionStrategy,
    host_base: String,
    default_token: TokenSource,
    default_tag: Option<String>,
    bucket_token_tag: String,
    bucket_tag_tag: String,
}

impl DestinationResolver {
    pub fn new(
        config: &ForwarderConfig,
        store: Arc<dyn ObjectStore>,
        default_token: TokenSource,
    ) -> Self {
        Self {
            store,
            strategy: config.strategy.clone(),
            host_base: config.host_base.clone(),
            default_token,
            default_tag: config.default_tag.clone(),
            bucket_token_tag: config.bucket_token_tag.clone(),
            bucket_tag_tag: config.bucket_tag_tag.clone(),
        }
    }

    /// Resolve the destination for an object stored in `bucket`
    ///
    /// A failing tag lookup is reported as such and never falls back to the
    /// default token.
    pub async fn resolve(&self, bucket: &str) -> ForwarderResult<DestinationConfig> {
        if self.strategy == ResolutionStrategy::BucketTags {
            let mut tags = self.store.bucket_tags(bucket).await?;

            if let Some(token) = tags
                .remove(&self.bucket_token_tag)
                .filter(|t| !t.trim().is_empty())
            {
                debug!("Using token from tag {} on bucket {}", self.bucket_token_tag, bucket);
                let tag = tags.remove(&self.bucket_tag_tag);
                return DestinationConfig::new(&self.host_base, token, tag);
            }
        }

        match self.default_token.token().await? {
            Some(token) => {
                debug!(
                    "Using {} default token for bucket {}",
                    self.default_token.describe(),
                    bucket
                );
                DestinationConfig::new(&self.host_base, token, self.default_tag.clone())
            }
            None => Err(ForwarderError::config(format!(
                "No destination token. Set S3 bucket tag {}",
                self.bucket_token_tag
            ))),
        }
    }

    /// Default endpoint URL when it is known without any lookup
    pub fn static_default_url(&self) -> Option<String> {
        match &self.default_token {
            TokenSource::Static(Some(token)) => {
                DestinationConfig::new(&self.host_base, token.clone(), self.default_tag.clone())
                    .ok()
                    .map(|d| d.url())
            }
            _ => None,
        }
    }

    pub fn bucket_token_tag(&self) -> &str {
        &self.bucket_token_tag
    }
}
