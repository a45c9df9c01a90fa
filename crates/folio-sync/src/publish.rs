//! Change notification sent once both stores reflect a sync.

use std::future::Future;

use folio_types::ArticleId;

use crate::error::SyncError;

/// Announces that the read model changed.
pub trait Publisher: Send + Sync {
    /// Notify subscribers after `article_id` was synced.
    fn publish(&self, article_id: ArticleId) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Publishes an empty payload on a fixed NATS subject.
///
/// The notification carries no data: subscribers re-read the stores.
#[derive(Debug, Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    subject: String,
}

impl NatsPublisher {
    /// Publish on `subject` through an already connected `client`.
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }

    /// The subject notifications go to.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl Publisher for NatsPublisher {
    async fn publish(&self, article_id: ArticleId) -> Result<(), SyncError> {
        let payload: Vec<u8> = Vec::new();
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| SyncError::Publish {
                message: format!("failed to publish to {}: {e}", self.subject),
            })?;
        self.client.flush().await.map_err(|e| SyncError::Publish {
            message: format!("failed to flush publish to {}: {e}", self.subject),
        })?;
        tracing::debug!(%article_id, subject = %self.subject, "Published change notification");
        Ok(())
    }
}
