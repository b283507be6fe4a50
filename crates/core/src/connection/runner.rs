//! Connection runner: session lifecycle and the batch poll loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::codec::TransportCodec;
use crate::fetcher::{FetchJobHandler, Fetcher};
use crate::metrics;
use crate::queue::{AttachOptions, QueueHandle, QueueService};
use crate::request::{CallbackRegistry, Request};
use crate::response::Outcome;

use super::config::ConnectionConfig;
use super::types::{batch_completed, validate_url, ConnectionError, RequestInput, SessionQueues};

/// Submits batches of requests to a queue service and collects their
/// outcomes in input order.
///
/// A connection owns one submission queue and one result queue between
/// [`connect`](Self::connect) and [`close`](Self::close). The fetch handler
/// is attached to the submission queue so every pushed request runs as a
/// job on the service, and each job's outcome lands on the result queue.
///
/// Batches on one connection run one at a time, since they share the
/// result queue.
pub struct Connection {
    service: Arc<dyn QueueService>,
    fetcher: Arc<dyn Fetcher>,
    codec: TransportCodec,
    registry: CallbackRegistry,
    config: ConnectionConfig,
    session: Mutex<Option<SessionQueues>>,
    batch: Mutex<()>,
}

impl Connection {
    pub fn new(
        config: ConnectionConfig,
        service: Arc<dyn QueueService>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            service,
            fetcher,
            codec: TransportCodec::default(),
            registry: CallbackRegistry::new(),
            config,
            session: Mutex::new(None),
            batch: Mutex::new(()),
        }
    }

    /// Use a codec other than the default for both directions.
    pub fn with_codec(mut self, codec: TransportCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Registry that request callbacks for this connection must be
    /// registered with.
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Queues of the current session, if connected.
    pub async fn session_queues(&self) -> Option<SessionQueues> {
        self.session.lock().await.clone()
    }

    /// Create the session queues and attach the fetch handler.
    pub async fn connect(&self) -> Result<SessionQueues, ConnectionError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(ConnectionError::AlreadyConnected);
        }

        let names = SessionQueues::generate(Utc::now());
        let submission = self.service.create(names.submission.name()).await?;
        let result = match self.service.create(names.result.name()).await {
            Ok(handle) => handle,
            Err(e) => {
                self.discard_queues(&[&submission]).await;
                return Err(e.into());
            }
        };

        let handler = Arc::new(FetchJobHandler::new(Arc::clone(&self.fetcher), self.codec));
        let options = AttachOptions {
            max_parallel_jobs: self.config.max_parallel_jobs,
            core_type: self.config.core_type.clone(),
        };
        if let Err(e) = self
            .service
            .attach(&submission, handler, &result, options)
            .await
        {
            self.discard_queues(&[&submission, &result]).await;
            return Err(e.into());
        }

        let queues = SessionQueues {
            session_id: names.session_id,
            submission,
            result,
        };
        info!(
            session = %queues.session_id,
            service = self.service.name(),
            fetcher = self.fetcher.name(),
            max_parallel_jobs = self.config.max_parallel_jobs,
            core_type = %self.config.core_type,
            "Connected"
        );

        *session = Some(queues.clone());
        Ok(queues)
    }

    /// Delete both session queues and drop every registered callback.
    ///
    /// Jobs still in flight are abandoned. The connection is disconnected
    /// afterwards even when a delete fails; the first failure is returned.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;
        let queues = session.take().ok_or(ConnectionError::NotConnected)?;

        let submission = self.service.delete(&queues.submission).await;
        let result = self.service.delete(&queues.result).await;
        self.registry.clear();

        info!(session = %queues.session_id, "Closed connection");
        submission?;
        result?;
        Ok(())
    }

    /// Run a batch and wait for it to complete, or for the configured
    /// `send_timeout_ms` to pass.
    ///
    /// Slot `i` of the result answers input `i`; `None` marks a request
    /// whose outcome never arrived.
    pub async fn send<I>(&self, inputs: I) -> Result<Vec<Option<Outcome>>, ConnectionError>
    where
        I: IntoIterator,
        I::Item: Into<RequestInput>,
    {
        self.run_batch(inputs, self.config.send_timeout()).await
    }

    /// Like [`send`](Self::send), returning whatever arrived once `timeout`
    /// has passed.
    pub async fn send_with_deadline<I>(
        &self,
        inputs: I,
        timeout: Duration,
    ) -> Result<Vec<Option<Outcome>>, ConnectionError>
    where
        I: IntoIterator,
        I::Item: Into<RequestInput>,
    {
        self.run_batch(inputs, Some(timeout)).await
    }

    /// Send a single request.
    pub async fn send_one(
        &self,
        input: impl Into<RequestInput>,
    ) -> Result<Option<Outcome>, ConnectionError> {
        let mut results = self.send([input.into()]).await?;
        Ok(results.pop().flatten())
    }

    /// Connect if needed, run `f`, and close on every exit path.
    ///
    /// A panic inside `f` is resumed after the close completes.
    pub async fn run_session<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, Result<T, E>>,
        E: From<ConnectionError>,
    {
        if !self.is_connected().await {
            self.connect().await?;
        }

        let result = AssertUnwindSafe(async { f(self).await })
            .catch_unwind()
            .await;
        let closed = self.close().await;

        match result {
            Err(panic) => {
                if let Err(e) = closed {
                    error!(error = %e, "Failed to close connection");
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(e)) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "Failed to close connection");
                }
                Err(e)
            }
            Ok(Ok(value)) => {
                closed?;
                Ok(value)
            }
        }
    }

    async fn run_batch<I>(
        &self,
        inputs: I,
        timeout: Option<Duration>,
    ) -> Result<Vec<Option<Outcome>>, ConnectionError>
    where
        I: IntoIterator,
        I::Item: Into<RequestInput>,
    {
        let _batch = self.batch.lock().await;

        let requests: Vec<Request> = inputs
            .into_iter()
            .map(|input| input.into().into_unvalidated())
            .collect();
        let result = self.execute(&requests, timeout).await;

        // Callbacks of rejected or unanswered requests would never fire.
        for request in &requests {
            request.release_callbacks(&self.registry);
        }

        let outcomes = result?;
        Ok(requests
            .iter()
            .map(|request| outcomes.get(request.id()).cloned())
            .collect())
    }

    /// Push one validated batch and collect its outcomes keyed by request id.
    async fn execute(
        &self,
        requests: &[Request],
        timeout: Option<Duration>,
    ) -> Result<HashMap<String, Outcome>, ConnectionError> {
        let queues = self
            .session_queues()
            .await
            .ok_or(ConnectionError::NotConnected)?;

        for request in requests {
            validate_url(request.url())?;
        }
        if requests.is_empty() {
            return Ok(HashMap::new());
        }

        let payloads = requests
            .iter()
            .map(|request| self.codec.encode(request))
            .collect::<Result<Vec<_>, _>>()?;

        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        self.service.push(&queues.submission, payloads).await?;
        metrics::REQUESTS_SUBMITTED.inc_by(requests.len() as u64);
        info!(
            session = %queues.session_id,
            requests = requests.len(),
            "Submitted batch"
        );

        let outcomes = self.collect_outcomes(&queues, requests, deadline).await?;
        metrics::BATCH_DURATION.observe(started.elapsed().as_secs_f64());
        info!(
            session = %queues.session_id,
            requests = requests.len(),
            received = outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        Ok(outcomes)
    }

    /// Poll the result queue until the batch completes or the deadline
    /// passes. Returns outcomes keyed by request id.
    async fn collect_outcomes(
        &self,
        queues: &SessionQueues,
        requests: &[Request],
        deadline: Option<Instant>,
    ) -> Result<HashMap<String, Outcome>, ConnectionError> {
        let by_id: HashMap<&str, &Request> = requests.iter().map(|r| (r.id(), r)).collect();
        let mut outcomes = HashMap::with_capacity(by_id.len());
        let check_every = self.config.info_check_every.max(1);
        let poll_interval = self.config.poll_interval();
        let mut iteration: u64 = 0;

        loop {
            iteration += 1;

            let payloads = self.service.pop(&queues.result, Duration::ZERO).await?;
            if !payloads.is_empty() {
                debug!(
                    session = %queues.session_id,
                    items = payloads.len(),
                    iteration,
                    "Popped results"
                );
            }
            for payload in payloads {
                self.accept(&payload, &by_id, &mut outcomes);
            }

            if iteration % check_every == 0 && self.batch_done(queues).await? {
                break;
            }

            let mut sleep_for = poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    warn!(
                        session = %queues.session_id,
                        received = outcomes.len(),
                        expected = by_id.len(),
                        "Batch deadline passed, returning partial results"
                    );
                    break;
                }
                sleep_for = sleep_for.min(deadline - now);
            }
            tokio::time::sleep(sleep_for).await;
        }

        Ok(outcomes)
    }

    /// Decode one result payload, dispatch its callback, and store it.
    fn accept(
        &self,
        payload: &[u8],
        by_id: &HashMap<&str, &Request>,
        outcomes: &mut HashMap<String, Outcome>,
    ) {
        let outcome: Outcome = match self.codec.decode(payload) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable result");
                metrics::OUTCOMES_RECEIVED.with_label_values(&["dropped"]).inc();
                return;
            }
        };

        let Some(request) = by_id.get(outcome.request_id()) else {
            warn!(
                request_id = outcome.request_id(),
                "Dropping result for a request outside this batch"
            );
            metrics::OUTCOMES_RECEIVED.with_label_values(&["dropped"]).inc();
            return;
        };

        if outcomes.contains_key(request.id()) {
            debug!(request_id = request.id(), "Ignoring duplicate result");
            metrics::OUTCOMES_RECEIVED.with_label_values(&["dropped"]).inc();
            return;
        }

        match request.run_callback(&outcome, &self.registry) {
            Ok(invoked) => debug!(
                request_id = request.id(),
                result = outcome.label(),
                callback = invoked,
                "Received result"
            ),
            Err(e) => warn!(request_id = request.id(), error = %e, "Callback dispatch failed"),
        }

        metrics::OUTCOMES_RECEIVED
            .with_label_values(&[outcome.label()])
            .inc();
        outcomes.insert(request.id().to_string(), outcome);
    }

    /// Submission queue metadata is read before the result count, so a job
    /// finishing between the two reads still shows up in one of them.
    async fn batch_done(&self, queues: &SessionQueues) -> Result<bool, ConnectionError> {
        let info = self.service.info(&queues.submission).await?;
        let result_count = self.service.count(&queues.result).await?;
        metrics::COMPLETION_CHECKS.inc();

        let done = batch_completed(&info, result_count);
        debug!(
            session = %queues.session_id,
            pending = info.pending_count,
            processing = info.processing_jobs,
            queued = info.queued_jobs,
            result_count,
            done,
            "Checked batch completion"
        );
        Ok(done)
    }

    async fn discard_queues(&self, handles: &[&QueueHandle]) {
        for handle in handles {
            if let Err(e) = self.service.delete(handle).await {
                warn!(queue = handle.name(), error = %e, "Failed to delete queue");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(queues) = self.session.get_mut() {
            warn!(
                session = %queues.session_id,
                "Connection dropped while connected, session queues were not deleted"
            );
        }
    }
}
