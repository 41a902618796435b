//! Error types for the log forwarder
//! Every stage after the size check reports through `ForwarderError`

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the log forwarder
#[derive(Error, Debug)]
pub enum ForwarderError {
    /// No usable token, or invalid static configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Token decryption failed; terminal for the process lifetime
    #[error("Secret error: {message}")]
    Secret { message: String },

    /// Bucket tag lookup failed at the transport level
    #[error("Bucket tag lookup failed for {bucket}: {source}")]
    Lookup {
        bucket: String,
        #[source]
        source: BoxError,
    },

    /// Object retrieval failed
    #[error("Unable to fetch {bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },

    /// Upload failed or the body stream ended early
    #[error("Transfer error: {message}")]
    Transfer {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Malformed notification payload
    #[error("Invalid notification event: {message}")]
    Event { message: String },
}

/// Result type alias for convenience
pub type ForwarderResult<T> = std::result::Result<T, ForwarderError>;

impl ForwarderError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a secret error
    pub fn secret<S: Into<String>>(message: S) -> Self {
        Self::Secret {
            message: message.into(),
        }
    }

    /// Create a lookup error wrapping the underlying transport failure
    pub fn lookup<B, E>(bucket: B, source: E) -> Self
    where
        B: Into<String>,
        E: Into<BoxError>,
    {
        Self::Lookup {
            bucket: bucket.into(),
            source: source.into(),
        }
    }

    /// Create a fetch error wrapping the underlying store failure
    pub fn fetch<B, K, E>(bucket: B, key: K, source: E) -> Self
    where
        B: Into<String>,
        K: Into<String>,
        E: Into<BoxError>,
    {
        Self::Fetch {
            bucket: bucket.into(),
            key: key.into(),
            source: source.into(),
        }
    }

    /// Create a transfer error without an underlying cause
    #[cfg(test)]
    pub fn transfer<S: Into<String>>(message: S) -> Self {
        Self::Transfer {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transfer error with its cause
    pub fn transfer_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Transfer {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an event parsing error
    pub fn event<S: Into<String>>(message: S) -> Self {
        Self::Event {
            message: message.into(),
        }
    }

    /// Short stage label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Secret { .. } => "secret",
            Self::Lookup { .. } => "lookup",
            Self::Fetch { .. } => "fetch",
            Self::Transfer { .. } => "transfer",
            Self::Event { .. } => "event",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_configuration_are_distinct() {
        let lookup = ForwarderError::lookup("b1", "connection reset");
        let config = ForwarderError::config("no token");

        assert_eq!(lookup.kind(), "lookup");
        assert_eq!(config.kind(), "configuration");
        assert!(lookup.to_string().contains("b1"));
        assert!(lookup.to_string().contains("connection reset"));
    }

    #[test]
    fn test_fetch_error_names_object() {
        let err = ForwarderError::fetch("b1", "logs/a.log", "NoSuchKey");
        assert_eq!(err.to_string(), "Unable to fetch b1/logs/a.log: NoSuchKey");
    }
}
