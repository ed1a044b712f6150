//! Supervises one [`WatchWorker`] per live watch.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::worker::{WatchWorker, WorkerDeps, WorkerState, WorkerTiming};
use crate::application::{AppError, AppResult};
use crate::domain::{Watch, WatchKey};

struct WorkerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

pub struct Scheduler {
    deps: WorkerDeps,
    timing: WorkerTiming,
    root: CancellationToken,
    workers: Mutex<HashMap<WatchKey, WorkerHandle>>,
}

impl Scheduler {
    pub fn new(deps: WorkerDeps, timing: WorkerTiming) -> Self {
        Self {
            deps,
            timing,
            root: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn timing(&self) -> WorkerTiming {
        self.timing
    }

    /// Starts a worker for every persisted watch. A store failure here is
    /// fatal for the caller: there is nothing to schedule.
    pub async fn on_boot(&self) -> AppResult<usize> {
        let watches = self.deps.watches.list_watches().await?;
        let mut started = 0;
        for watch in watches {
            match self.on_watch_created(watch) {
                Ok(()) => started += 1,
                Err(AppError::DuplicateWatch { subscriber, query }) => {
                    warn!(%subscriber, %query, "worker already running at boot");
                }
                Err(e) => return Err(e),
            }
        }
        info!(workers = started, "scheduler booted");
        Ok(started)
    }

    /// Starts exactly one worker for a newly created watch.
    pub fn on_watch_created(&self, watch: Watch) -> AppResult<()> {
        let key = watch.key();
        let mut workers = self.lock()?;

        if workers.get(&key).is_some_and(WorkerHandle::is_live) {
            return Err(AppError::DuplicateWatch {
                subscriber: key.subscriber,
                query: key.query,
            });
        }

        let cancel = self.root.child_token();
        let (worker, state) =
            WatchWorker::new(watch, self.deps.clone(), self.timing, cancel.clone());
        let task = tokio::spawn(worker.run());

        workers.insert(
            key,
            WorkerHandle {
                cancel,
                state,
                task,
            },
        );
        Ok(())
    }

    /// Stops the worker for `key` and waits for it to wind down, so no check
    /// for the watch begins after this returns. Returns `false` when no worker
    /// was registered.
    pub async fn on_watch_deleted(&self, key: &WatchKey) -> AppResult<bool> {
        let handle = {
            let mut workers = self.lock()?;
            workers.remove(key)
        };
        let Some(handle) = handle else {
            return Ok(false);
        };

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(watch = %key, error = %e, "worker ended abnormally");
        }
        info!(watch = %key, "worker removed");
        Ok(true)
    }

    pub fn worker_state(&self, key: &WatchKey) -> Option<WorkerState> {
        let workers = self.lock().ok()?;
        let handle = workers.get(key)?;
        if handle.is_live() {
            Some(*handle.state.borrow())
        } else {
            Some(WorkerState::Stopped)
        }
    }

    pub fn active_workers(&self) -> usize {
        self.lock()
            .map(|w| w.values().filter(|h| h.is_live()).count())
            .unwrap_or(0)
    }

    /// Cancels every worker and waits for all of them.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<(WatchKey, WorkerHandle)> = {
            let Ok(mut workers) = self.lock() else {
                return;
            };
            workers.drain().collect()
        };
        for (key, handle) in handles {
            if let Err(e) = handle.task.await {
                warn!(watch = %key, error = %e, "worker ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<WatchKey, WorkerHandle>>> {
        self.workers
            .lock()
            .map_err(|_| AppError::Storage("worker registry lock poisoned".into()))
    }
}
