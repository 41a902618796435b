//! Forwarding pipeline for one notification
//!
//! Stages run strictly in order: size check, destination resolution, fetch,
//! upload. Zero-byte objects stop after the size check. Any later failure
//! ends the invocation with a single failure signal.

use crate::destination::DestinationResolver;
use crate::errors::ForwarderError;
use crate::event::NotificationEvent;
use crate::store::ObjectStore;
use crate::tracing_context::InvocationContext;
use crate::upload::Uploader;
use std::sync::Arc;
use tracing::{Instrument, error, info};

/// Completion hook of one invocation
///
/// Both methods consume the hook, so an invocation signals exactly once.
pub trait Completion {
    type Output;

    fn succeed(self) -> Self::Output;

    fn fail(self, error: ForwarderError) -> Self::Output;
}

/// Completion that hands the outcome back as a `Result`
pub struct ResultCompletion;

impl Completion for ResultCompletion {
    type Output = Result<(), ForwarderError>;

    fn succeed(self) -> Self::Output {
        Ok(())
    }

    fn fail(self, error: ForwarderError) -> Self::Output {
        Err(error)
    }
}

#[derive(Debug)]
pub enum TransferResult {
    Success,
    Failure(ForwarderError),
}

/// Result of forwarding one object, kept for the final log line
#[derive(Debug)]
pub struct TransferOutcome {
    pub bucket: String,
    pub key: String,
    /// Unknown when resolution itself failed
    pub destination_url: Option<String>,
    pub result: TransferResult,
}

impl TransferOutcome {
    /// Human readable one-line summary
    pub fn summary(&self) -> String {
        match &self.result {
            TransferResult::Success => format!(
                "Successfully uploaded {}/{} to {}",
                self.bucket,
                self.key,
                self.destination_url.as_deref().unwrap_or("<unresolved>")
            ),
            TransferResult::Failure(e) => format!(
                "Unable to process object {}/{} due to {}",
                self.bucket, self.key, e
            ),
        }
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    /// Zero-byte object, nothing fetched or sent
    Skipped,
    Transferred(TransferOutcome),
}

/// Resolves, fetches and uploads one object per invocation
#[derive(Clone)]
pub struct EventPipeline {
    resolver: DestinationResolver,
    store: Arc<dyn ObjectStore>,
    uploader: Arc<dyn Uploader>,
}

impl EventPipeline {
    pub fn new(
        resolver: DestinationResolver,
        store: Arc<dyn ObjectStore>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            resolver,
            store,
            uploader,
        }
    }

    /// Run the pipeline and signal the outcome through `completion`
    pub async fn handle<C: Completion>(
        &self,
        event: &NotificationEvent,
        context: &InvocationContext,
        completion: C,
    ) -> C::Output {
        match self.process(event).instrument(context.span.clone()).await {
            PipelineOutcome::Skipped => completion.succeed(),
            PipelineOutcome::Transferred(outcome) => match outcome.result {
                TransferResult::Success => completion.succeed(),
                TransferResult::Failure(e) => completion.fail(e),
            },
        }
    }

    /// Run the pipeline and log its outcome
    pub async fn process(&self, event: &NotificationEvent) -> PipelineOutcome {
        if event.size == 0 {
            info!("Skipping object {} of size zero", event.location());
            return PipelineOutcome::Skipped;
        }

        let mut destination_url = None;
        let result = match self.transfer(event, &mut destination_url).await {
            Ok(()) => TransferResult::Success,
            Err(e) => TransferResult::Failure(e),
        };

        let outcome = TransferOutcome {
            bucket: event.bucket.clone(),
            key: event.key.clone(),
            destination_url,
            result,
        };

        match &outcome.result {
            TransferResult::Success => info!("{}", outcome.summary()),
            TransferResult::Failure(e) => error!(stage = e.kind(), "{}", outcome.summary()),
        }

        PipelineOutcome::Transferred(outcome)
    }

    async fn transfer(
        &self,
        event: &NotificationEvent,
        destination_url: &mut Option<String>,
    ) -> Result<(), ForwarderError> {
        let destination = self.resolver.resolve(&event.bucket).await?;
        let url = destination.url();
        *destination_url = Some(url.clone());

        let body = self.store.fetch(&event.bucket, &event.key).await?;

        info!("Using log endpoint: {}", url);
        self.uploader.upload(&url, body).await
    }
}
