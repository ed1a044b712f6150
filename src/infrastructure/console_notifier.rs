use async_trait::async_trait;

use crate::application::{AppResult, Message, Notifier};
use crate::domain::SubscriberId;

/// Prints deliveries instead of sending them (`--dry-run`).
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn deliver(&self, subscriber: SubscriberId, message: &Message) -> AppResult<()> {
        let context = message
            .fields
            .iter()
            .map(|f| format!("{}={}", f.name, f.value))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "DELIVER: to={} title={} url={} author={} {}",
            subscriber,
            message.title,
            message.url,
            message.author.as_deref().unwrap_or("(none)"),
            context
        );
        Ok(())
    }
}
