//! Decrypt-once token cache
//!
//! The encrypted destination token is decrypted by a single task started at
//! process start. Its outcome is published once on a watch channel; every
//! invocation that needs the token waits on that channel instead of polling,
//! and a failed decrypt is never retried.

use crate::errors::{ForwarderError, ForwarderResult};
use async_trait::async_trait;
use aws_sdk_kms::Client;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Process-wide state of the decrypted token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretState {
    Pending,
    Ready(String),
    Failed(String),
}

impl SecretState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, SecretState::Pending)
    }
}

/// Turns ciphertext into the plaintext token
#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(&self, ciphertext: &[u8]) -> ForwarderResult<String>;
}

/// KMS-backed decryptor
#[derive(Clone)]
pub struct KmsDecryptor {
    client: Client,
}

impl KmsDecryptor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Decryptor for KmsDecryptor {
    async fn decrypt(&self, ciphertext: &[u8]) -> ForwarderResult<String> {
        let output = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext.to_vec()))
            .send()
            .await
            .map_err(|err| ForwarderError::secret(DisplayErrorContext(&err).to_string()))?;

        let plaintext = output
            .plaintext()
            .ok_or_else(|| ForwarderError::secret("KMS returned no plaintext"))?;

        let token = String::from_utf8(plaintext.as_ref().to_vec())
            .map_err(|e| ForwarderError::secret(format!("decrypted token is not UTF-8: {}", e)))?;

        Ok(token.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Read handle on the decrypted token, cheap to clone across invocations
#[derive(Clone)]
pub struct SecretResolver {
    state: watch::Receiver<SecretState>,
}

impl SecretResolver {
    /// Start the one and only decryption of `ciphertext`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(decryptor: Arc<dyn Decryptor>, ciphertext: Vec<u8>) -> Self {
        let (tx, rx) = watch::channel(SecretState::Pending);

        tokio::spawn(async move {
            debug!("Decrypting destination token");
            let state = match decryptor.decrypt(&ciphertext).await {
                Ok(token) => {
                    info!("Destination token decrypted");
                    SecretState::Ready(token)
                }
                Err(e) => {
                    error!("Error decrypting the token, not retrying: {}", e);
                    SecretState::Failed(e.to_string())
                }
            };
            tx.send_replace(state);
        });

        Self { state: rx }
    }

    /// Current state without waiting
    #[cfg(test)]
    pub fn state(&self) -> SecretState {
        self.state.borrow().clone()
    }

    /// Wait until the decryption has settled and return the token
    pub async fn resolve(&self) -> ForwarderResult<String> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(SecretState::is_settled)
            .await
            .map_err(|_| ForwarderError::secret("token decryption ended without a result"))?;

        match &*settled {
            SecretState::Ready(token) if token.is_empty() => {
                Err(ForwarderError::config("decrypted destination token is empty"))
            }
            SecretState::Ready(token) => Ok(token.clone()),
            SecretState::Failed(message) => Err(ForwarderError::secret(message.clone())),
            SecretState::Pending => Err(ForwarderError::secret("token decryption still pending")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Blocks every decrypt until released, then answers with `outcome`
    struct GatedDecryptor {
        calls: AtomicUsize,
        gate: Notify,
        outcome: Result<String, String>,
    }

    impl GatedDecryptor {
        fn new(outcome: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
                outcome: outcome.map(str::to_string).map_err(str::to_string),
            })
        }
    }

    #[async_trait]
    impl Decryptor for GatedDecryptor {
        async fn decrypt(&self, _ciphertext: &[u8]) -> ForwarderResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone().map_err(ForwarderError::secret)
        }
    }

    async fn wait_until_called(decryptor: &GatedDecryptor) {
        while decryptor.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_waiters_receive_token_once_ready() {
        let decryptor = GatedDecryptor::new(Ok("ABC123"));
        let resolver = SecretResolver::spawn(decryptor.clone(), vec![1, 2, 3]);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve().await })
            })
            .collect();

        wait_until_called(&decryptor).await;
        assert_eq!(resolver.state(), SecretState::Pending);
        decryptor.gate.notify_one();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), "ABC123");
        }
        assert_eq!(resolver.state(), SecretState::Ready("ABC123".to_string()));
        assert_eq!(decryptor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_terminal_for_all_waiters() {
        let decryptor = GatedDecryptor::new(Err("AccessDeniedException"));
        let resolver = SecretResolver::spawn(decryptor.clone(), vec![9]);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve().await })
            })
            .collect();

        wait_until_called(&decryptor).await;
        decryptor.gate.notify_one();

        for waiter in waiters {
            let err = waiter.await.unwrap().unwrap_err();
            assert!(matches!(err, ForwarderError::Secret { .. }));
            assert!(err.to_string().contains("AccessDeniedException"));
        }

        // Later invocations fail straight away and never decrypt again
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, ForwarderError::Secret { .. }));
        assert_eq!(decryptor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_token_is_configuration_error() {
        let decryptor = GatedDecryptor::new(Ok(""));
        let resolver = SecretResolver::spawn(decryptor.clone(), vec![]);

        wait_until_called(&decryptor).await;
        decryptor.gate.notify_one();

        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, ForwarderError::Configuration { .. }));
    }
}
