pub mod memory_store;
pub mod sqlite_store;
pub mod booru_source;
pub mod fake_source;
pub mod embed_renderer;
pub mod console_notifier;
pub mod webhook_notifier;
pub mod multi_notifier;
