use std::sync::Arc;

use async_trait::async_trait;

use super::{render, LifecycleEvent, Notifier};
use crate::{domain::NewNotification, error::Result, repository::NotificationRepository};

/// Persists one notification row per recipient.
pub struct InAppNotifier {
    repo: Arc<dyn NotificationRepository>,
    base_url: String,
}

impl InAppNotifier {
    pub fn new(repo: Arc<dyn NotificationRepository>, base_url: String) -> Self {
        Self { repo, base_url }
    }
}

#[async_trait]
impl Notifier for InAppNotifier {
    fn name(&self) -> &str {
        "in_app"
    }

    async fn handle_event(&self, event: &LifecycleEvent) -> Result<()> {
        for message in render(event, &self.base_url) {
            self.repo
                .create(NewNotification {
                    user_id: message.recipient_id,
                    kind: message.kind.to_string(),
                    title: message.title,
                    message: message.body,
                    link: message.link,
                    metadata: Some(message.metadata),
                })
                .await?;
        }
        Ok(())
    }
}
