//! Embedded queue backend.
//!
//! Runs attached handlers on tokio tasks inside the current process. A
//! semaphore per attached queue bounds how many jobs run at once. Work
//! counters and stored items of a queue live under one lock, and a job's
//! output is delivered before the job stops counting as running. Reading
//! `info` on the input queue and then `count` on the output queue can
//! therefore never miss a job.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capacity::{CapacityError, CapacityService, ReservationId};

use super::types::{AttachOptions, JobHandler, QueueError, QueueHandle, QueueInfo, QueueService};

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Vec<u8>>,
    queued: usize,
    processing: usize,
}

#[derive(Debug)]
struct LocalQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl LocalQueue {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            dispatcher: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatcher(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_items(&self, items: Vec<Vec<u8>>) {
        self.state().items.extend(items);
        self.notify.notify_waiters();
    }

    fn drain(&self) -> Vec<Vec<u8>> {
        self.state().items.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.state().items.len()
    }

    fn info(&self) -> QueueInfo {
        let state = self.state();
        QueueInfo {
            pending_count: state.items.len(),
            processing_jobs: state.processing,
            queued_jobs: state.queued,
        }
    }

    /// Wait until at least one item is stored.
    async fn wait_for_items(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let has_items = !self.state().items.is_empty();
            if has_items {
                return;
            }
            notified.await;
        }
    }

    /// Wait for the next item and move it into the queued state.
    async fn take_job(&self) -> Vec<u8> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(item) = state.items.pop_front() {
                    state.queued += 1;
                    return item;
                }
            }
            notified.await;
        }
    }

    fn start_job(&self) {
        let mut state = self.state();
        state.queued = state.queued.saturating_sub(1);
        state.processing += 1;
    }

    fn finish_job(&self) {
        let mut state = self.state();
        state.processing = state.processing.saturating_sub(1);
    }

    fn stop_dispatcher(&self) {
        if let Some(handle) = self.dispatcher().take() {
            handle.abort();
        }
    }
}

async fn run_dispatcher(
    source: Arc<LocalQueue>,
    output: Arc<LocalQueue>,
    handler: Arc<dyn JobHandler>,
    slots: Arc<Semaphore>,
) {
    loop {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let payload = source.take_job().await;

        let source = Arc::clone(&source);
        let output = Arc::clone(&output);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            source.start_job();
            let result = AssertUnwindSafe(handler.handle(payload))
                .catch_unwind()
                .await;
            match result {
                // Deliver before finishing so the job is never invisible to `info` and `count`.
                Ok(Ok(item)) => output.push_items(vec![item]),
                Ok(Err(e)) => warn!(queue = %source.name, error = %e, "Job produced no output"),
                Err(_) => warn!(queue = %source.name, "Job handler panicked"),
            }
            source.finish_job();
            drop(permit);
        });
    }
}

/// A reservation granted by the embedded backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReservation {
    pub core_type: String,
    pub num_cores: u32,
    pub max_duration: Option<Duration>,
    pub granted_at: DateTime<Utc>,
}

/// In-process implementation of [`QueueService`] and [`CapacityService`].
#[derive(Debug, Default)]
pub struct LocalQueueService {
    queues: RwLock<HashMap<String, Arc<LocalQueue>>>,
    reservations: RwLock<HashMap<ReservationId, LocalReservation>>,
    next_reservation: AtomicU64,
}

impl LocalQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    async fn queue(&self, handle: &QueueHandle) -> Result<Arc<LocalQueue>, QueueError> {
        self.queues
            .read()
            .await
            .get(handle.name())
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(handle.name().to_string()))
    }

    /// Names of all existing queues, sorted.
    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Reservations currently held.
    pub async fn active_reservations(&self) -> Vec<(ReservationId, LocalReservation)> {
        let mut held: Vec<_> = self
            .reservations
            .read()
            .await
            .iter()
            .map(|(id, r)| (*id, r.clone()))
            .collect();
        held.sort_by_key(|(id, _)| *id);
        held
    }
}

impl Drop for LocalQueueService {
    fn drop(&mut self) {
        for queue in self.queues.get_mut().values() {
            queue.stop_dispatcher();
        }
    }
}

#[async_trait]
impl QueueService for LocalQueueService {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, name: &str) -> Result<QueueHandle, QueueError> {
        if name.is_empty() {
            return Err(QueueError::InvalidArgument(
                "queue name cannot be empty".to_string(),
            ));
        }

        let mut queues = self.queues.write().await;
        if queues.contains_key(name) {
            return Err(QueueError::AlreadyExists(name.to_string()));
        }
        queues.insert(name.to_string(), Arc::new(LocalQueue::new(name)));
        debug!(queue = name, "Created queue");

        Ok(QueueHandle::new(name))
    }

    async fn delete(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        let removed = self
            .queues
            .write()
            .await
            .remove(queue.name())
            .ok_or_else(|| QueueError::QueueNotFound(queue.name().to_string()))?;

        removed.stop_dispatcher();
        let info = removed.info();
        if !info.is_idle() {
            debug!(
                queue = queue.name(),
                pending = info.pending_count,
                processing = info.processing_jobs,
                "Deleted queue with outstanding work"
            );
        } else {
            debug!(queue = queue.name(), "Deleted queue");
        }
        Ok(())
    }

    async fn push(&self, queue: &QueueHandle, items: Vec<Vec<u8>>) -> Result<(), QueueError> {
        let target = self.queue(queue).await?;
        let count = items.len();
        target.push_items(items);
        debug!(queue = queue.name(), count, "Pushed items");
        Ok(())
    }

    async fn pop(
        &self,
        queue: &QueueHandle,
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, QueueError> {
        let source = self.queue(queue).await?;
        if !timeout.is_zero() {
            // Timing out just means there is nothing to return.
            let _ = tokio::time::timeout(timeout, source.wait_for_items()).await;
        }
        Ok(source.drain())
    }

    async fn attach(
        &self,
        queue: &QueueHandle,
        handler: Arc<dyn JobHandler>,
        output: &QueueHandle,
        options: AttachOptions,
    ) -> Result<(), QueueError> {
        if options.max_parallel_jobs == 0 {
            return Err(QueueError::InvalidArgument(
                "max_parallel_jobs must be at least 1".to_string(),
            ));
        }

        let source = self.queue(queue).await?;
        let sink = self.queue(output).await?;

        let mut dispatcher = source.dispatcher();
        if dispatcher.is_some() {
            return Err(QueueError::AlreadyAttached(queue.name().to_string()));
        }
        let slots = Arc::new(Semaphore::new(options.max_parallel_jobs));
        *dispatcher = Some(tokio::spawn(run_dispatcher(
            Arc::clone(&source),
            sink,
            handler,
            slots,
        )));

        info!(
            queue = queue.name(),
            output = output.name(),
            max_parallel_jobs = options.max_parallel_jobs,
            core_type = %options.core_type,
            "Attached job handler"
        );
        Ok(())
    }

    async fn info(&self, queue: &QueueHandle) -> Result<QueueInfo, QueueError> {
        Ok(self.queue(queue).await?.info())
    }

    async fn count(&self, queue: &QueueHandle) -> Result<usize, QueueError> {
        Ok(self.queue(queue).await?.len())
    }
}

#[async_trait]
impl CapacityService for LocalQueueService {
    async fn request(
        &self,
        core_type: &str,
        num_cores: u32,
        max_duration: Option<Duration>,
    ) -> Result<ReservationId, CapacityError> {
        if core_type.is_empty() || num_cores == 0 {
            return Err(CapacityError::InvalidSpec(format!(
                "cannot reserve {} cores of type '{}'",
                num_cores, core_type
            )));
        }

        let id = ReservationId(self.next_reservation.fetch_add(1, Ordering::SeqCst) + 1);
        self.reservations.write().await.insert(
            id,
            LocalReservation {
                core_type: core_type.to_string(),
                num_cores,
                max_duration,
                granted_at: Utc::now(),
            },
        );
        debug!(reservation = %id, core_type, num_cores, "Granted reservation");
        Ok(id)
    }

    async fn release(&self, id: ReservationId) -> Result<(), CapacityError> {
        self.reservations
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(CapacityError::UnknownReservation(id))
    }
}
