//! Correlation ID and tracing span of one invocation
//!
//! Every log line emitted while an object is forwarded runs inside an
//! `invocation` span carrying the correlation ID and the object location.

use crate::event::NotificationEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::Span;
use uuid::Uuid;

/// Number of invocations handled by this process
static INVOCATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifies one invocation across log lines
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a UUID-based correlation ID
    pub fn new_uuid() -> Self {
        CorrelationId(Uuid::new_v4().to_string())
    }

    /// Reuse an ID handed over by the runtime, e.g. the Lambda request id
    pub fn from_string(id: String) -> Self {
        if id.trim().is_empty() {
            return Self::new_uuid();
        }
        CorrelationId(id)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new_uuid()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation ID plus the span of one invocation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub correlation_id: CorrelationId,
    /// Sequence number of this invocation within the process
    pub sequence: u64,
    pub span: Span,
}

impl InvocationContext {
    pub fn new(correlation_id: CorrelationId, event: &NotificationEvent) -> Self {
        let sequence = INVOCATION_COUNTER.fetch_add(1, Ordering::SeqCst);
        let span = tracing::info_span!(
            "invocation",
            correlation_id = %correlation_id,
            sequence,
            bucket = %event.bucket,
            key = %event.key,
            component = "s3-log-forwarder"
        );

        Self {
            correlation_id,
            sequence,
            span,
        }
    }
}
