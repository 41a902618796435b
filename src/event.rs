//! Decoding of S3 object-created notifications into `NotificationEvent`

use crate::errors::{ForwarderError, ForwarderResult};
use aws_lambda_events::event::s3::S3Event;
use tracing::warn;

/// One object reference taken from a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

impl NotificationEvent {
    pub fn new<B: Into<String>, K: Into<String>>(bucket: B, key: K, size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
        }
    }

    /// `bucket/key`, as used in log lines
    pub fn location(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

impl TryFrom<S3Event> for NotificationEvent {
    type Error = ForwarderError;

    fn try_from(event: S3Event) -> ForwarderResult<Self> {
        let total = event.records.len();
        let record = event
            .records
            .into_iter()
            .next()
            .ok_or_else(|| ForwarderError::event("notification contains no records"))?;

        if total > 1 {
            warn!(
                "Notification carries {} records, only the first one is forwarded",
                total
            );
        }

        let bucket = record
            .s3
            .bucket
            .name
            .ok_or_else(|| ForwarderError::event("record has no bucket name"))?;
        let raw_key = record
            .s3
            .object
            .key
            .ok_or_else(|| ForwarderError::event("record has no object key"))?;
        let size = record
            .s3
            .object
            .size
            .ok_or_else(|| ForwarderError::event("record has no object size"))?;
        let size = u64::try_from(size)
            .map_err(|_| ForwarderError::event(format!("negative object size {}", size)))?;

        Ok(Self {
            bucket,
            key: decode_key(&raw_key)?,
            size,
        })
    }
}

/// Object keys arrive form-encoded: `+` for space, `%XX` for the rest
fn decode_key(raw: &str) -> ForwarderResult<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|e| {
            ForwarderError::event(format!("object key {:?} is not valid UTF-8: {}", raw, e))
        })
}
