//! Mock queue service for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::queue::{
    AttachOptions, JobHandler, QueueError, QueueHandle, QueueInfo, QueueService,
};

/// Operations of the mock that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    Create,
    Delete,
    Push,
    Pop,
    Attach,
    Info,
    Count,
}

/// Order in which job outputs land on the output queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputOrder {
    #[default]
    Submission,
    Reversed,
}

/// A recorded attach for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedAttach {
    pub queue: String,
    pub output: String,
    pub options: AttachOptions,
}

struct MockQueue {
    items: VecDeque<Vec<u8>>,
    attached: Option<(Arc<dyn JobHandler>, String)>,
}

/// Mock implementation of the QueueService trait.
///
/// Pushing to a queue with an attached handler runs the handler inline for
/// every item and stores the outputs on the output queue. Execution can be
/// switched off to leave pushed items in place, and `info` can be scripted
/// to report outstanding work.
pub struct MockQueueService {
    queues: RwLock<HashMap<String, MockQueue>>,
    created: RwLock<Vec<String>>,
    deleted: RwLock<Vec<String>>,
    pushes: RwLock<Vec<(String, usize)>>,
    attaches: RwLock<Vec<RecordedAttach>>,
    info_script: RwLock<VecDeque<QueueInfo>>,
    info_calls: RwLock<usize>,
    count_calls: RwLock<usize>,
    pop_calls: RwLock<usize>,
    failures: RwLock<HashSet<QueueOperation>>,
    execute: RwLock<bool>,
    output_order: RwLock<OutputOrder>,
}

impl std::fmt::Debug for MockQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockQueueService")
            .field("queues", &"<queues>")
            .finish()
    }
}

impl Default for MockQueueService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockQueueService {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            created: RwLock::new(Vec::new()),
            deleted: RwLock::new(Vec::new()),
            pushes: RwLock::new(Vec::new()),
            attaches: RwLock::new(Vec::new()),
            info_script: RwLock::new(VecDeque::new()),
            info_calls: RwLock::new(0),
            count_calls: RwLock::new(0),
            pop_calls: RwLock::new(0),
            failures: RwLock::new(HashSet::new()),
            execute: RwLock::new(true),
            output_order: RwLock::new(OutputOrder::Submission),
        }
    }

    /// Make the next call of `operation` fail with `Unavailable`.
    pub async fn fail_next(&self, operation: QueueOperation) {
        self.failures.write().await.insert(operation);
    }

    /// Whether pushes run the attached handler.
    pub async fn set_execute(&self, execute: bool) {
        *self.execute.write().await = execute;
    }

    pub async fn set_output_order(&self, order: OutputOrder) {
        *self.output_order.write().await = order;
    }

    /// Counters returned by successive `info` calls. Once the script runs
    /// out, `info` reports the queue as idle.
    pub async fn script_info(&self, infos: Vec<QueueInfo>) {
        *self.info_script.write().await = infos.into();
    }

    /// Put items straight onto a queue, bypassing any handler.
    pub async fn inject(&self, queue: &str, items: Vec<Vec<u8>>) {
        if let Some(q) = self.queues.write().await.get_mut(queue) {
            q.items.extend(items);
        }
    }

    /// Items currently stored on a queue.
    pub async fn items(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .read()
            .await
            .get(queue)
            .map(|q| q.items.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn created_queues(&self) -> Vec<String> {
        self.created.read().await.clone()
    }

    pub async fn deleted_queues(&self) -> Vec<String> {
        self.deleted.read().await.clone()
    }

    /// Queues that exist right now.
    pub async fn live_queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// `(queue, item count)` for every push, in call order.
    pub async fn pushes(&self) -> Vec<(String, usize)> {
        self.pushes.read().await.clone()
    }

    pub async fn attaches(&self) -> Vec<RecordedAttach> {
        self.attaches.read().await.clone()
    }

    pub async fn info_calls(&self) -> usize {
        *self.info_calls.read().await
    }

    pub async fn count_calls(&self) -> usize {
        *self.count_calls.read().await
    }

    pub async fn pop_calls(&self) -> usize {
        *self.pop_calls.read().await
    }

    async fn check_failure(&self, operation: QueueOperation) -> Result<(), QueueError> {
        if self.failures.write().await.remove(&operation) {
            return Err(QueueError::Unavailable(format!(
                "simulated {:?} failure",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueService for MockQueueService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, name: &str) -> Result<QueueHandle, QueueError> {
        self.check_failure(QueueOperation::Create).await?;

        let mut queues = self.queues.write().await;
        if queues.contains_key(name) {
            return Err(QueueError::AlreadyExists(name.to_string()));
        }
        queues.insert(
            name.to_string(),
            MockQueue {
                items: VecDeque::new(),
                attached: None,
            },
        );
        self.created.write().await.push(name.to_string());
        Ok(QueueHandle::new(name))
    }

    async fn delete(&self, queue: &QueueHandle) -> Result<(), QueueError> {
        self.deleted.write().await.push(queue.name().to_string());
        self.check_failure(QueueOperation::Delete).await?;

        self.queues
            .write()
            .await
            .remove(queue.name())
            .map(|_| ())
            .ok_or_else(|| QueueError::QueueNotFound(queue.name().to_string()))
    }

    async fn push(&self, queue: &QueueHandle, items: Vec<Vec<u8>>) -> Result<(), QueueError> {
        self.check_failure(QueueOperation::Push).await?;
        self.pushes
            .write()
            .await
            .push((queue.name().to_string(), items.len()));

        let attached = {
            let mut queues = self.queues.write().await;
            let q = queues
                .get_mut(queue.name())
                .ok_or_else(|| QueueError::QueueNotFound(queue.name().to_string()))?;
            match (&q.attached, *self.execute.read().await) {
                (Some((handler, output)), true) => Some((Arc::clone(handler), output.clone())),
                _ => {
                    q.items.extend(items.iter().cloned());
                    None
                }
            }
        };

        let Some((handler, output)) = attached else {
            return Ok(());
        };

        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            if let Ok(out) = handler.handle(item).await {
                outputs.push(out);
            }
        }
        if *self.output_order.read().await == OutputOrder::Reversed {
            outputs.reverse();
        }
        self.inject(&output, outputs).await;
        Ok(())
    }

    async fn pop(
        &self,
        queue: &QueueHandle,
        _timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, QueueError> {
        *self.pop_calls.write().await += 1;
        self.check_failure(QueueOperation::Pop).await?;

        let mut queues = self.queues.write().await;
        let q = queues
            .get_mut(queue.name())
            .ok_or_else(|| QueueError::QueueNotFound(queue.name().to_string()))?;
        Ok(q.items.drain(..).collect())
    }

    async fn attach(
        &self,
        queue: &QueueHandle,
        handler: Arc<dyn JobHandler>,
        output: &QueueHandle,
        options: AttachOptions,
    ) -> Result<(), QueueError> {
        self.check_failure(QueueOperation::Attach).await?;

        let mut queues = self.queues.write().await;
        if !queues.contains_key(output.name()) {
            return Err(QueueError::QueueNotFound(output.name().to_string()));
        }
        let q = queues
            .get_mut(queue.name())
            .ok_or_else(|| QueueError::QueueNotFound(queue.name().to_string()))?;
        if q.attached.is_some() {
            return Err(QueueError::AlreadyAttached(queue.name().to_string()));
        }
        q.attached = Some((handler, output.name().to_string()));

        self.attaches.write().await.push(RecordedAttach {
            queue: queue.name().to_string(),
            output: output.name().to_string(),
            options,
        });
        Ok(())
    }

    async fn info(&self, queue: &QueueHandle) -> Result<QueueInfo, QueueError> {
        *self.info_calls.write().await += 1;
        self.check_failure(QueueOperation::Info).await?;

        let pending_count = self
            .queues
            .read()
            .await
            .get(queue.name())
            .map(|q| q.items.len())
            .ok_or_else(|| QueueError::QueueNotFound(queue.name().to_string()))?;

        Ok(self
            .info_script
            .write()
            .await
            .pop_front()
            .unwrap_or(QueueInfo {
                pending_count,
                ..Default::default()
            }))
    }

    async fn count(&self, queue: &QueueHandle) -> Result<usize, QueueError> {
        *self.count_calls.write().await += 1;
        self.check_failure(QueueOperation::Count).await?;

        self.queues
            .read()
            .await
            .get(queue.name())
            .map(|q| q.items.len())
            .ok_or_else(|| QueueError::QueueNotFound(queue.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobError;

    struct Upper;

    #[async_trait]
    impl JobHandler for Upper {
        async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>, JobError> {
            Ok(payload.to_ascii_uppercase())
        }
    }

    #[tokio::test]
    async fn test_push_runs_attached_handler() {
        let service = MockQueueService::new();
        let input = service.create("in").await.unwrap();
        let output = service.create("out").await.unwrap();
        service
            .attach(
                &input,
                Arc::new(Upper),
                &output,
                AttachOptions {
                    max_parallel_jobs: 1,
                    core_type: "s1".to_string(),
                },
            )
            .await
            .unwrap();

        service
            .push(&input, vec![b"a".to_vec(), b"b".to_vec()])
            .await
            .unwrap();

        assert_eq!(service.count(&input).await.unwrap(), 0);
        let popped = service.pop(&output, Duration::ZERO).await.unwrap();
        assert_eq!(popped, vec![b"A".to_vec(), b"B".to_vec()]);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let service = MockQueueService::new();
        service.fail_next(QueueOperation::Create).await;

        assert!(service.create("q").await.is_err());
        assert!(service.create("q").await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_info_then_idle() {
        let service = MockQueueService::new();
        let queue = service.create("q").await.unwrap();
        service
            .script_info(vec![QueueInfo {
                processing_jobs: 2,
                ..Default::default()
            }])
            .await;

        assert_eq!(service.info(&queue).await.unwrap().processing_jobs, 2);
        assert!(service.info(&queue).await.unwrap().is_idle());
    }
}
