//! Downstream queue delivery: the single consumer of the in-process message
//! channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::config::{Credentials, Region};
use aws_sdk_sqs::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::stream::Message;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue lookup failed: {0}")]
    Lookup(String),
    #[error("queue send failed: {0}")]
    Send(String),
}

/// The downstream queue as the publisher sees it.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(&self, body: &str) -> Result<(), QueueError>;
}

/// An SQS queue resolved once at startup.
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Resolve credentials and the queue URL. Explicit key/secret flags win;
    /// otherwise the default chain (environment, then credentials file)
    /// applies.
    pub async fn connect(
        region: &str,
        queue: &str,
        key: &str,
        secret: &str,
    ) -> Result<Self, QueueError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        if !key.is_empty() && !secret.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                key, secret, None, None, "shakefeed",
            ));
        }
        let config = loader.load().await;
        let client = Client::new(&config);

        let queue_url = client
            .get_queue_url()
            .queue_name(queue)
            .send()
            .await
            .map_err(|e| QueueError::Lookup(e.to_string()))?
            .queue_url()
            .ok_or_else(|| QueueError::Lookup(format!("no url for queue {:?}", queue)))?
            .to_string();

        Ok(Self { client, queue_url })
    }
}

#[async_trait]
impl Queue for SqsQueue {
    async fn send(&self, body: &str) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Send(e.to_string()))?;
        Ok(())
    }
}

/// Drain the message channel until every sender is gone. Serialization
/// failures and exhausted retries drop the message with a log; nothing here
/// crashes the process.
pub async fn run(
    mut rx: mpsc::Receiver<Message>,
    queue: Option<Arc<dyn Queue>>,
    resends: u32,
    wait: Duration,
    verbose: bool,
    metrics: Arc<Metrics>,
) {
    while let Some(message) = rx.recv().await {
        let body = match serde_json::to_string(&message) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "unable to encode message");
                continue;
            }
        };

        if verbose {
            info!(message = %body, "flush");
        }

        let Some(queue) = queue.as_deref() else {
            // dry-run
            info!(message = %body, "dry-run, not sending");
            continue;
        };

        let mut delivered = false;
        for attempt in 1..=resends {
            match queue.send(&body).await {
                Ok(()) => {
                    metrics.messages.add(1);
                    delivered = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempt,
                        resends,
                        "unable to send message, waiting {:?}",
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
        if !delivered {
            error!(source = %message.source, mmi = message.mmi, "message dropped after {} attempts", resends);
        }
    }
    info!("message channel closed, publisher exiting");
}
