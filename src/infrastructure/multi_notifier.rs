use async_trait::async_trait;
use tracing::warn;

use crate::application::{AppError, AppResult, Message, Notifier};
use crate::domain::SubscriberId;

struct Channel {
    name: String,
    notifier: Box<dyn Notifier>,
    required: bool,
}

/// Fans a delivery out to several channels.
///
/// A delivery succeeds only when every required channel accepted it. Mirror
/// channels (console output, audit sinks) are attempted too but their result
/// never decides delivery, so a failing destination still reaches the worker.
pub struct MultiNotifier {
    channels: Vec<Channel>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self { channels: vec![] }
    }

    /// Adds a channel whose failure fails the delivery.
    pub fn with(mut self, name: impl Into<String>, notifier: Box<dyn Notifier>) -> Self {
        self.channels.push(Channel {
            name: name.into(),
            notifier,
            required: true,
        });
        self
    }

    /// Adds a best-effort channel; its errors are only logged.
    pub fn mirror(mut self, name: impl Into<String>, notifier: Box<dyn Notifier>) -> Self {
        self.channels.push(Channel {
            name: name.into(),
            notifier,
            required: false,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn has_required(&self) -> bool {
        self.channels.iter().any(|c| c.required)
    }
}

impl Default for MultiNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn deliver(&self, subscriber: SubscriberId, message: &Message) -> AppResult<()> {
        let mut errors = Vec::new();

        for channel in &self.channels {
            if let Err(e) = channel.notifier.deliver(subscriber, message).await {
                warn!(
                    channel = %channel.name,
                    required = channel.required,
                    %subscriber,
                    error = %e,
                    "channel failed"
                );
                if channel.required {
                    errors.push(format!("{}: {e}", channel.name));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Delivery(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Counting {
        async fn deliver(&self, _: SubscriberId, _: &Message) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::Delivery("down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn channel(fail: bool) -> (Box<dyn Notifier>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Counting {
                calls: calls.clone(),
                fail,
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn working_mirror_does_not_hide_failed_destination() {
        let (console, console_calls) = channel(false);
        let (webhook, webhook_calls) = channel(true);
        let multi = MultiNotifier::new()
            .mirror("console", console)
            .with("webhook", webhook);

        let err = multi
            .deliver(SubscriberId(1), &Message::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Delivery(_)));
        assert_eq!(console_calls.load(Ordering::SeqCst), 1);
        assert_eq!(webhook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_mirror_is_only_logged() {
        let (console, _) = channel(true);
        let (webhook, _) = channel(false);
        let multi = MultiNotifier::new()
            .mirror("console", console)
            .with("webhook", webhook);

        multi
            .deliver(SubscriberId(1), &Message::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn every_required_failure_is_reported() {
        let (a, _) = channel(true);
        let (b, b_calls) = channel(true);
        let multi = MultiNotifier::new().with("a", a).with("b", b);

        let err = multi
            .deliver(SubscriberId(1), &Message::default())
            .await
            .unwrap_err();
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        match err {
            AppError::Delivery(msg) => {
                assert_eq!(msg, "a: delivery error: down; b: delivery error: down")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
