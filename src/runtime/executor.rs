// Copyright (c) 2026 Twincall
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Serial executor shared by the signaling and orchestration layers.
//!
//! One consumer task drains an unbounded channel, so every handler,
//! state transition and job callback runs without interleaving.
//! Scheduled tasks are cancellable; a cancelled task never enters the
//! queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send>;

/// Handle to the serial executor. Cheap to clone.
#[derive(Clone)]
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Task>,
}

/// Cancellable handle of a scheduled task.
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl ScheduledHandle {
    /// Cancel the task. A task already queued still runs; one still
    /// sleeping never does.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.join.abort();
    }
}

impl SerialExecutor {
    /// Start the executor. The returned join handle finishes when every
    /// clone of the executor has been dropped.
    pub fn start() -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let join = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            debug!("serial executor drained");
        });
        (Self { tx }, join)
    }

    /// Queue `f` behind every task already submitted.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) {
        // A send error only happens during shutdown; tasks are dropped.
        let _ = self.tx.send(Box::new(f));
    }

    /// Run `f` on the executor after `delay`.
    pub fn schedule(&self, delay: Duration, f: impl FnOnce() + Send + 'static) -> ScheduledHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let tx = self.tx.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(Box::new(f));
        });
        ScheduledHandle { cancelled, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let (executor, join) = SerialExecutor::start();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            executor.execute(move || log.lock().unwrap().push(i));
        }
        drop(executor);
        join.await.unwrap();
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancelled_schedule_never_runs() {
        let (executor, join) = SerialExecutor::start();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let handle = executor.schedule(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(executor);
        join.await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schedule_fires_after_delay() {
        let (executor, join) = SerialExecutor::start();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let _handle = executor.schedule(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        drop(executor);
        join.await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
