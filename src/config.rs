//! Configuration management for the log forwarder
//!
//! This module loads static settings from environment variables and
//! validates them once at startup. Per-bucket overrides are not handled
//! here, see `destination`.

use crate::errors::{ForwarderError, ForwarderResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::env;

pub const DEFAULT_HOST_BASE: &str = "https://logs-01.loggly.com/bulk/";
pub const DEFAULT_BUCKET_TOKEN_TAG: &str = "loggly-customer-token";
pub const DEFAULT_BUCKET_TAG_TAG: &str = "loggly-tag";

/// How the destination token is located for each invocation
#[derive(Clone, Debug, PartialEq)]
pub enum ResolutionStrategy {
    /// Bucket tags first, then the configured default token
    BucketTags,
    /// Only the configured token (decrypted secret or static)
    SecretOnly,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionStrategy::BucketTags => write!(f, "bucket-tags"),
            ResolutionStrategy::SecretOnly => write!(f, "secret-only"),
        }
    }
}

/// Validated static configuration of the forwarder
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub host_base: String,
    pub default_token: Option<String>,
    pub default_tag: Option<String>,
    /// Raw KMS ciphertext, already base64-decoded
    pub token_ciphertext: Option<Vec<u8>>,
    pub strategy: ResolutionStrategy,
    pub bucket_token_tag: String,
    pub bucket_tag_tag: String,
}

impl ForwarderConfig {
    /// Load configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// - `LOG_HOST_BASE`: bulk endpoint prefix (default: loggly bulk endpoint)
    /// - `LOG_TOKEN`: static default token
    /// - `LOG_TAG`: default tag, comma-separated tags allowed
    /// - `LOG_TOKEN_CIPHERTEXT`: base64 KMS ciphertext of the token
    /// - `RESOLUTION_STRATEGY`: "bucket-tags" (default) or "secret-only"
    /// - `BUCKET_TOKEN_TAG`: bucket tag key holding the token
    /// - `BUCKET_TAG_TAG`: bucket tag key holding the tag
    pub fn from_env() -> ForwarderResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> ForwarderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host_base = var("LOG_HOST_BASE").unwrap_or_else(|| DEFAULT_HOST_BASE.to_string());
        let default_token = var("LOG_TOKEN");
        let default_tag = var("LOG_TAG");
        let token_ciphertext = var("LOG_TOKEN_CIPHERTEXT");
        let strategy = var("RESOLUTION_STRATEGY");
        let bucket_token_tag =
            var("BUCKET_TOKEN_TAG").unwrap_or_else(|| DEFAULT_BUCKET_TOKEN_TAG.to_string());
        let bucket_tag_tag =
            var("BUCKET_TAG_TAG").unwrap_or_else(|| DEFAULT_BUCKET_TAG_TAG.to_string());

        Self::validate_and_create(
            host_base,
            default_token,
            default_tag,
            token_ciphertext,
            strategy,
            bucket_token_tag,
            bucket_tag_tag,
        )
    }

    fn validate_and_create(
        host_base: String,
        default_token: Option<String>,
        default_tag: Option<String>,
        token_ciphertext: Option<String>,
        strategy: Option<String>,
        bucket_token_tag: String,
        bucket_tag_tag: String,
    ) -> ForwarderResult<Self> {
        let mut host_base = host_base.trim().to_string();
        if !host_base.starts_with("http://") && !host_base.starts_with("https://") {
            return Err(ForwarderError::config(
                "LOG_HOST_BASE must start with http:// or https://",
            ));
        }
        if !host_base.ends_with('/') {
            host_base.push('/');
        }

        let token_ciphertext = match token_ciphertext {
            Some(encoded) => Some(STANDARD.decode(encoded.trim()).map_err(|e| {
                ForwarderError::config(format!("LOG_TOKEN_CIPHERTEXT is not valid base64: {}", e))
            })?),
            None => None,
        };

        let strategy = match strategy.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("bucket-tags") => ResolutionStrategy::BucketTags,
            Some("secret-only") => ResolutionStrategy::SecretOnly,
            Some(_) => {
                return Err(ForwarderError::config(
                    "RESOLUTION_STRATEGY must be one of: 'bucket-tags' or 'secret-only'",
                ));
            }
        };

        if strategy == ResolutionStrategy::SecretOnly
            && token_ciphertext.is_none()
            && default_token.is_none()
        {
            return Err(ForwarderError::config(
                "LOG_TOKEN_CIPHERTEXT or LOG_TOKEN is required when using 'secret-only' resolution",
            ));
        }

        Ok(Self {
            host_base,
            default_token,
            default_tag,
            token_ciphertext,
            strategy,
            bucket_token_tag,
            bucket_tag_tag,
        })
    }

    /// Check if the token has to be decrypted before use
    pub fn uses_encrypted_token(&self) -> bool {
        self.token_ciphertext.is_some()
    }

    /// Both a plain and an encrypted token are configured; the plain one is ignored
    pub fn static_token_shadowed(&self) -> bool {
        self.token_ciphertext.is_some() && self.default_token.is_some()
    }
}
