// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Progress reporting
//!
//! The driver emits stage-lifecycle events into a bounded queue owned by
//! the [`ProgressReporter`]. A single worker task drains the queue in FIFO
//! order and hands each event to the attached [`Observer`]. Emitting never
//! waits on the observer; delivery failures are logged and otherwise
//! ignored.

mod console;
mod observers;

pub use console::ConsoleObserver;
pub use observers::{ChannelObserver, JsonLinesObserver, LogObserver};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::pipeline::{FailureDiagnostic, RunStatus};

/// A stage-lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        index: usize,
        title: String,
    },
    StageSucceeded {
        index: usize,
        title: String,
        elapsed_ms: u64,
    },
    StageFailed {
        index: usize,
        title: String,
        diagnostic: FailureDiagnostic,
    },
    PipelineCompleted {
        final_status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnostic: Option<FailureDiagnostic>,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PipelineCompleted { .. })
    }
}

/// Why an observer could not take an event
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("observer channel closed")]
    Closed,

    #[error("observer write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Receiver of progress events
#[async_trait]
pub trait Observer: Send + Sync {
    /// Deliver one event; called in emission order, one at a time
    async fn deliver(&self, event: &ProgressEvent) -> Result<(), DeliveryError>;
}

/// What to drop when the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Evict the oldest queued event
    #[default]
    DropOldest,
    /// Discard the event being emitted (the terminal event is never discarded)
    DropNewest,
}

struct Shared {
    queue: Mutex<VecDeque<ProgressEvent>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    capacity: usize,
    policy: BackpressurePolicy,
}

/// Non-blocking event sink with at most one observer
pub struct ProgressReporter {
    shared: Option<Arc<Shared>>,
    worker: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// A reporter with no observer; every event is dropped
    pub fn detached() -> Self {
        Self {
            shared: None,
            worker: None,
        }
    }

    /// Attach `observer` behind a queue of `capacity` events.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(observer: Arc<dyn Observer>, capacity: usize, policy: BackpressurePolicy) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            capacity: capacity.max(1),
            policy,
        });

        let worker = tokio::spawn(deliver_loop(Arc::clone(&shared), observer));

        Self {
            shared: Some(shared),
            worker: Some(worker),
        }
    }

    /// Queue an event for delivery without waiting
    pub fn emit(&self, event: ProgressEvent) {
        let Some(shared) = &self.shared else {
            return;
        };

        {
            let Ok(mut queue) = shared.queue.lock() else {
                return;
            };

            if queue.len() >= shared.capacity {
                let evict_oldest = shared.policy == BackpressurePolicy::DropOldest
                    || event.is_terminal();
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                if evict_oldest {
                    queue.pop_front();
                } else {
                    warn!("progress queue full; dropping event");
                    return;
                }
            }

            queue.push_back(event);
        }

        shared.notify.notify_one();
    }

    /// Whether an observer is attached
    pub fn is_attached(&self) -> bool {
        self.shared.is_some()
    }

    /// Number of events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.shared
            .as_ref()
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Stop accepting events and wait until everything queued was delivered
    pub async fn close(mut self) {
        self.signal_close();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("progress worker ended abnormally: {}", e);
            }
        }
    }

    fn signal_close(&self) {
        if let Some(shared) = &self.shared {
            shared.closed.store(true, Ordering::SeqCst);
            shared.notify.notify_one();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        // Let the worker drain and exit on its own.
        self.signal_close();
    }
}

async fn deliver_loop(shared: Arc<Shared>, observer: Arc<dyn Observer>) {
    loop {
        // Read `closed` before popping: once it is set, nothing new arrives.
        let closed = shared.closed.load(Ordering::SeqCst);
        let next = shared.queue.lock().ok().and_then(|mut q| q.pop_front());

        match next {
            Some(event) => {
                if let Err(e) = observer.deliver(&event).await {
                    warn!("progress delivery failed: {}", e);
                }
            }
            None if closed => break,
            None => shared.notify.notified().await,
        }
    }

    debug!("progress worker stopped");
}
