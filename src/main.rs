//! S3 log forwarder
//!
//! Forwards objects written to an S3 bucket to a bulk HTTP log endpoint.
//! Runs as an AWS Lambda function triggered by S3 object-created
//! notifications, or forwards a single object from the command line.

mod config;
mod destination;
mod errors;
mod event;
mod pipeline;
mod secret;
mod store;
mod tracing_context;
mod upload;

#[cfg(test)]
mod testing;

use anyhow::{Result, anyhow};
use aws_lambda_events::event::s3::S3Event;
use clap::Parser;
use lambda_runtime::{LambdaEvent, run, service_fn};
use std::env;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::ForwarderConfig;
use crate::destination::{DestinationResolver, TokenSource};
use crate::event::NotificationEvent;
use crate::pipeline::{EventPipeline, ResultCompletion};
use crate::secret::{KmsDecryptor, SecretResolver};
use crate::store::{ObjectStore, S3ObjectStore};
use crate::tracing_context::{CorrelationId, InvocationContext};
use crate::upload::HttpUploader;

#[derive(Parser, Debug)]
#[command(
    name = "s3-log-forwarder",
    about = "Forward S3 log objects to a bulk HTTP log endpoint",
    version
)]
struct Args {
    /// Forward this bucket's object once and exit instead of serving Lambda events
    #[arg(long, requires = "key")]
    bucket: Option<String>,

    /// Key of the object to forward
    #[arg(long, requires = "bucket")]
    key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = ForwarderConfig::from_env()?;
    info!(
        "Resolution strategy: {}, host base: {}",
        config.strategy, config.host_base
    );

    let aws_config = aws_config::load_from_env().await;
    let store: Arc<dyn ObjectStore> =
        Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config)));

    if config.static_token_shadowed() {
        warn!("Both LOG_TOKEN and LOG_TOKEN_CIPHERTEXT are set, LOG_TOKEN is ignored");
    }

    let token = match &config.token_ciphertext {
        Some(ciphertext) => {
            let decryptor = Arc::new(KmsDecryptor::new(aws_sdk_kms::Client::new(&aws_config)));
            TokenSource::Encrypted(SecretResolver::spawn(decryptor, ciphertext.clone()))
        }
        None => TokenSource::Static(config.default_token.clone()),
    };

    let resolver = DestinationResolver::new(&config, store.clone(), token);
    match resolver.static_default_url() {
        Some(url) => info!("Loading S3 log forwarder, default endpoint: {}", url),
        None if config.uses_encrypted_token() => {
            info!("Loading S3 log forwarder, default token is decrypted at startup")
        }
        None => info!(
            "Loading S3 log forwarder, NO default endpoint, must be set in bucket tag {}",
            resolver.bucket_token_tag()
        ),
    }

    let pipeline = EventPipeline::new(resolver, store.clone(), Arc::new(HttpUploader::new()?));

    match (args.bucket, args.key) {
        (Some(bucket), Some(key)) => forward_once(&pipeline, store.as_ref(), bucket, key).await,
        _ => {
            let pipeline = &pipeline;
            run(service_fn(move |event: LambdaEvent<S3Event>| async move {
                function_handler(pipeline, event).await
            }))
            .await
            .map_err(|e| anyhow!("{:?}", e))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_current_span(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .init();
    }
}

/// Handle one S3 notification
async fn function_handler(
    pipeline: &EventPipeline,
    event: LambdaEvent<S3Event>,
) -> Result<(), lambda_runtime::Error> {
    let correlation_id = CorrelationId::from_string(event.context.request_id.clone());
    let notification = match NotificationEvent::try_from(event.payload) {
        Ok(notification) => notification,
        Err(e) => {
            error!(correlation_id = %correlation_id, "Rejecting notification: {}", e);
            return Err(e.into());
        }
    };

    let context = InvocationContext::new(correlation_id, &notification);
    let result = pipeline
        .handle(&notification, &context, ResultCompletion)
        .await;
    log_completed(&context, result.is_ok());
    result?;
    Ok(())
}

/// Forward one existing object, sized with a HEAD request
async fn forward_once(
    pipeline: &EventPipeline,
    store: &dyn ObjectStore,
    bucket: String,
    key: String,
) -> Result<()> {
    let size = store.object_size(&bucket, &key).await?;
    let notification = NotificationEvent::new(bucket, key, size);
    let context = InvocationContext::new(CorrelationId::new_uuid(), &notification);

    let result = pipeline
        .handle(&notification, &context, ResultCompletion)
        .await;
    log_completed(&context, result.is_ok());
    result?;
    Ok(())
}

fn log_completed(context: &InvocationContext, success: bool) {
    debug!(
        correlation_id = %context.correlation_id,
        sequence = context.sequence,
        success,
        "Invocation completed"
    );
}
