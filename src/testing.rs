//! In-memory stand-ins for S3, KMS and the log endpoint used by unit tests

use crate::errors::{ForwarderError, ForwarderResult};
use crate::secret::Decryptor;
use crate::store::{ObjectBody, ObjectStore};
use crate::upload::Uploader;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{TryStreamExt, stream};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fully buffered body
pub fn buffered_body<B: Into<Bytes>>(data: B) -> ObjectBody {
    let data = data.into();
    let length = data.len() as u64;
    ObjectBody::from_stream(stream::once(async move { Ok(data) }), Some(length))
}

#[derive(Default)]
pub struct MemoryStore {
    tags: HashMap<String, HashMap<String, String>>,
    failing_tags: HashSet<String>,
    objects: HashMap<(String, String), Vec<u8>>,
    tag_lookups: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, bucket: &str, key: &str, value: &str) -> Self {
        self.tags
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn failing_tags(mut self, bucket: &str) -> Self {
        self.failing_tags.insert(bucket.to_string());
        self
    }

    pub fn with_object(mut self, bucket: &str, key: &str, data: Vec<u8>) -> Self {
        self.objects.insert((bucket.to_string(), key.to_string()), data);
        self
    }

    pub fn tag_lookups(&self) -> usize {
        self.tag_lookups.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_tags(&self, bucket: &str) -> ForwarderResult<HashMap<String, String>> {
        self.tag_lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing_tags.contains(bucket) {
            return Err(ForwarderError::lookup(bucket, "connection reset by peer"));
        }
        Ok(self.tags.get(bucket).cloned().unwrap_or_default())
    }

    async fn fetch(&self, bucket: &str, key: &str) -> ForwarderResult<ObjectBody> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|data| buffered_body(data.clone()))
            .ok_or_else(|| ForwarderError::fetch(bucket, key, "NoSuchKey"))
    }

    async fn object_size(&self, bucket: &str, key: &str) -> ForwarderResult<u64> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|data| data.len() as u64)
            .ok_or_else(|| ForwarderError::fetch(bucket, key, "NoSuchKey"))
    }
}

pub struct StaticDecryptor {
    outcome: Result<String, String>,
}

impl StaticDecryptor {
    pub fn ok(token: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(token.to_string()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(message.to_string()),
        })
    }
}

#[async_trait]
impl Decryptor for StaticDecryptor {
    async fn decrypt(&self, _ciphertext: &[u8]) -> ForwarderResult<String> {
        self.outcome.clone().map_err(ForwarderError::secret)
    }
}

/// Records every upload; fails all of them when built with `failing`
#[derive(Default)]
pub struct RecordingUploader {
    fail: bool,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload(&self, url: &str, body: ObjectBody) -> ForwarderResult<()> {
        let chunks: Vec<Bytes> = body.into_stream().try_collect().await?;
        self.uploads
            .lock()
            .unwrap()
            .push((url.to_string(), chunks.concat()));
        if self.fail {
            return Err(ForwarderError::transfer("connection closed before message completed"));
        }
        Ok(())
    }
}
