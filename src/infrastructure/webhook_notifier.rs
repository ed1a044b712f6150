use async_trait::async_trait;
use serde::Serialize;

use crate::application::{AppError, AppResult, Message, Notifier};
use crate::domain::SubscriberId;

/// Hands rendered messages to the chat gateway over HTTP.
///
/// The gateway owns the platform specifics (DM channels, embeds); this side
/// only POSTs `{"subscriber_id": .., "message": {..}}` and treats any non-2xx
/// answer as a failed delivery.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook: String,
    token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[derive(Debug, Serialize)]
struct DeliveryPayload<'a> {
    subscriber_id: SubscriberId,
    message: &'a Message,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, subscriber: SubscriberId, message: &Message) -> AppResult<()> {
        let payload = DeliveryPayload {
            subscriber_id: subscriber,
            message,
        };

        let mut req = self.client.post(&self.webhook).json(&payload);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        req.send()
            .await
            .map_err(|e| AppError::Delivery(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Delivery(e.to_string()))?;

        Ok(())
    }
}
