use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::application::{AppError, AppResult, ContentSource, FetchRequest};
use crate::domain::Item;

/// Scripted content source for tests.
///
/// Queued responses are served first, in order; once the queue is empty every
/// fetch returns the standing result set. Every request is recorded.
#[derive(Clone, Default)]
pub struct FakeContentSource {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    standing: Vec<Item>,
    queued: VecDeque<Result<Vec<Item>, (Option<u16>, String)>>,
    requests: Vec<FetchRequest>,
}

impl FakeContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Item>) -> Self {
        let source = Self::new();
        source.set_items(items);
        source
    }

    pub fn set_items(&self, items: Vec<Item>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.standing = items;
        }
    }

    pub fn push_items(&self, items: Vec<Item>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.queued.push_back(Ok(items));
        }
    }

    pub fn push_failure(&self, status: Option<u16>, detail: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.queued.push_back(Err((status, detail.to_string())));
        }
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.inner
            .lock()
            .map(|i| i.requests.clone())
            .unwrap_or_default()
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.lock().map(|i| i.requests.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ContentSource for FakeContentSource {
    async fn fetch(&self, request: &FetchRequest) -> AppResult<Vec<Item>> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| AppError::upstream(None, "lock poisoned"))?;
        inner.requests.push(request.clone());
        match inner.queued.pop_front() {
            Some(Ok(items)) => Ok(items),
            Some(Err((status, detail))) => Err(AppError::upstream(status, detail)),
            None => Ok(inner.standing.clone()),
        }
    }
}
