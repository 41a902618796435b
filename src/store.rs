//! Object store access: bucket tags, object bodies and sizes

use crate::errors::{ForwarderError, ForwarderResult};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::HashMap;
use tracing::debug;

/// Error code S3 answers with when a bucket carries no tags at all
const NO_SUCH_TAG_SET: &str = "NoSuchTagSet";

/// Body of a fetched object, consumed exactly once by the uploader
pub struct ObjectBody {
    content_length: Option<u64>,
    stream: BoxStream<'static, ForwarderResult<Bytes>>,
}

impl ObjectBody {
    /// Incrementally produced body
    pub fn from_stream<S>(stream: S, content_length: Option<u64>) -> Self
    where
        S: Stream<Item = ForwarderResult<Bytes>> + Send + 'static,
    {
        Self {
            content_length,
            stream: stream.boxed(),
        }
    }

    /// Wrap an SDK body; read failures surface as fetch errors for this object
    pub fn from_byte_stream(
        body: ByteStream,
        bucket: &str,
        key: &str,
        content_length: Option<u64>,
    ) -> Self {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let chunks = stream::unfold(body, move |mut body| {
            let bucket = bucket.clone();
            let key = key.clone();
            async move {
                body.next().await.map(|chunk| {
                    (
                        chunk.map_err(|e| ForwarderError::fetch(bucket, key, e)),
                        body,
                    )
                })
            }
        });
        Self::from_stream(chunks, content_length)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn into_stream(self) -> BoxStream<'static, ForwarderResult<Bytes>> {
        self.stream
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Read side of the object store used by the pipeline
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Key/value tags attached to a bucket; an untagged bucket yields an empty map
    async fn bucket_tags(&self, bucket: &str) -> ForwarderResult<HashMap<String, String>>;

    /// Full body of an object
    async fn fetch(&self, bucket: &str, key: &str) -> ForwarderResult<ObjectBody>;

    /// Size of an object in bytes
    async fn object_size(&self, bucket: &str, key: &str) -> ForwarderResult<u64>;
}

/// S3-backed object store
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_tags(&self, bucket: &str) -> ForwarderResult<HashMap<String, String>> {
        match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(output) => Ok(output
                .tag_set()
                .iter()
                .map(|tag| (tag.key().to_string(), tag.value().to_string()))
                .collect()),
            Err(err)
                if err.as_service_error().and_then(|e| e.code()) == Some(NO_SUCH_TAG_SET) =>
            {
                debug!("Bucket {} has no tags", bucket);
                Ok(HashMap::new())
            }
            Err(err) => Err(ForwarderError::lookup(
                bucket,
                DisplayErrorContext(&err).to_string(),
            )),
        }
    }

    async fn fetch(&self, bucket: &str, key: &str) -> ForwarderResult<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                ForwarderError::fetch(bucket, key, DisplayErrorContext(&err).to_string())
            })?;

        let content_length = output.content_length().and_then(|n| u64::try_from(n).ok());
        Ok(ObjectBody::from_byte_stream(
            output.body,
            bucket,
            key,
            content_length,
        ))
    }

    async fn object_size(&self, bucket: &str, key: &str) -> ForwarderResult<u64> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                ForwarderError::fetch(bucket, key, DisplayErrorContext(&err).to_string())
            })?;

        output
            .content_length()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| ForwarderError::fetch(bucket, key, "object has no content length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::buffered_body;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_buffered_body() {
        let body = buffered_body(vec![b'a'; 1024]);
        assert_eq!(body.content_length(), Some(1024));

        let chunks: Vec<Bytes> = body.into_stream().try_collect().await.unwrap();
        let total: usize = chunks.iter().map(Bytes::len).sum();
        assert_eq!(total, 1024);
    }

    #[tokio::test]
    async fn test_byte_stream_body_yields_all_chunks() {
        let body = ObjectBody::from_byte_stream(
            ByteStream::from_static(b"line one\nline two\n"),
            "b1",
            "logs/a.log",
            Some(18),
        );

        let chunks: Vec<Bytes> = body.into_stream().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"line one\nline two\n".to_vec());
    }

    #[tokio::test]
    async fn test_stream_error_is_propagated() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(ForwarderError::fetch("b1", "k", "connection reset")),
        ]);
        let body = ObjectBody::from_stream(chunks, None);

        let result: ForwarderResult<Vec<Bytes>> = body.into_stream().try_collect().await;
        assert!(matches!(result, Err(ForwarderError::Fetch { .. })));
    }
}
