//! The Session Dispatcher.
//!
//! Every session gets one worker task fed by a bounded queue, so requests
//! for a session run one at a time in admission order while different
//! sessions proceed independently. A request moves through the phases of
//! [`RequestPhase`]; whatever happens, its stream ends with exactly one
//! terminal event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tabletalk_capability::{CapabilityError, CapabilityOutput, CapabilityRegistry, Invocation, ProgressSink};
use tabletalk_core::config::{DispatchConfig, SessionConfig};
use tabletalk_core::{SessionId, Timestamp};
use tabletalk_dataset::{
    DatasetError, DatasetRegistry, ExecutionState, HistoryRecord, SessionEntry, SessionSummary,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::event::{DispatchRequest, RequestStream, ResponseEvent};
use crate::resolver::IntentResolver;
use crate::state_machine::{RequestPhase, RequestTracker};

// =============================================================================
// Internal types
// =============================================================================

/// One admitted request waiting for its session worker.
struct Job {
    request_id: Uuid,
    request: DispatchRequest,
    events: mpsc::Sender<ResponseEvent>,
}

struct WorkerHandle {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    entry: Arc<SessionEntry>,
}

impl WorkerHandle {
    /// Whether requests are waiting in the queue.
    fn has_queued(&self) -> bool {
        self.tx.capacity() < self.tx.max_capacity()
    }
}

struct Inner {
    registry: Arc<DatasetRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    resolver: Arc<dyn IntentResolver>,
    config: DispatchConfig,
    max_queued: usize,
    workers: Mutex<HashMap<SessionId, WorkerHandle>>,
    shutdown: CancellationToken,
}

impl Inner {
    fn workers(&self) -> MutexGuard<'_, HashMap<SessionId, WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// SessionDispatcher
// =============================================================================

/// Routes requests to per-session workers and streams their responses.
///
/// Cheap to clone; clones share the same workers and registry.
#[derive(Clone)]
pub struct SessionDispatcher {
    inner: Arc<Inner>,
}

impl SessionDispatcher {
    pub fn new(
        registry: Arc<DatasetRegistry>,
        capabilities: Arc<CapabilityRegistry>,
        resolver: Arc<dyn IntentResolver>,
        config: DispatchConfig,
        session: &SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                capabilities,
                resolver,
                config,
                max_queued: session.max_queued_requests.max(1),
                workers: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<DatasetRegistry> {
        &self.inner.registry
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.inner.capabilities
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Admit a request and return its event stream.
    ///
    /// Admission failures (malformed request, full queue, shutdown) are
    /// reported as the stream's only event.
    pub fn submit(&self, request: DispatchRequest) -> RequestStream {
        let request_id = Uuid::new_v4();
        let (events, rx) = mpsc::channel(self.inner.config.event_buffer.max(1));
        let stream = RequestStream::new(request_id, rx);

        if let Err(e) = self.check_request(&request) {
            debug!(request_id = %request_id, error = %e, "Request rejected");
            let _ = events.try_send(e.to_event());
            return stream;
        }

        let session_id = SessionId::new(request.session_id.trim());
        if self.inner.shutdown.is_cancelled() {
            let _ = events.try_send(DispatchError::SessionClosed(session_id).to_event());
            return stream;
        }

        // A session only comes into being with a dataset source.
        if request.dataset_source.is_none() && self.inner.registry.entry(&session_id).is_none() {
            debug!(request_id = %request_id, session_id = %session_id, "First request has no dataset source");
            let _ = events.try_send(DispatchError::DatasetNotLoaded.to_event());
            return stream;
        }

        let job = Job {
            request_id,
            request,
            events,
        };
        match self.enqueue(&session_id, job) {
            Ok(()) => {
                debug!(request_id = %request_id, session_id = %session_id, "Request queued");
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(session_id = %session_id, "Session queue full");
                let _ = job
                    .events
                    .try_send(DispatchError::SessionBusy(session_id).to_event());
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                let _ = job
                    .events
                    .try_send(DispatchError::SessionClosed(session_id).to_event());
            }
        }
        stream
    }

    fn check_request(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        if request.session_id.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("sessionId must not be empty".to_string()));
        }
        if request.text.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("text must not be empty".to_string()));
        }
        let max = self.inner.config.max_message_length;
        if request.text.chars().count() > max {
            return Err(DispatchError::InvalidRequest(format!(
                "text exceeds {} characters",
                max
            )));
        }
        if request
            .dataset_source
            .as_deref()
            .is_some_and(|source| source.trim().is_empty())
        {
            return Err(DispatchError::InvalidRequest(
                "datasetSource must not be empty when given".to_string(),
            ));
        }
        Ok(())
    }

    /// Queue `job` on the session's worker, starting one if needed.
    ///
    /// Opening the entry, touching it, and queueing all happen under the
    /// workers lock, so eviction never sees a half-admitted request.
    fn enqueue(&self, id: &SessionId, job: Job) -> Result<(), mpsc::error::TrySendError<Job>> {
        let mut workers = self.inner.workers();
        let entry = self.inner.registry.open(id);
        entry.touch();

        if let Some(handle) = workers.get(id) {
            if !handle.tx.is_closed() && Arc::ptr_eq(&handle.entry, &entry) {
                return handle.tx.try_send(job);
            }
            // The entry was replaced behind our back; retire the stale worker.
            handle.cancel.cancel();
        }

        let (tx, rx) = mpsc::channel(self.inner.max_queued);
        let cancel = self.inner.shutdown.child_token();
        let worker = Worker {
            inner: Arc::clone(&self.inner),
            entry: Arc::clone(&entry),
            rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run());
        let queued = tx.try_send(job);
        workers.insert(id.clone(), WorkerHandle { tx, cancel, entry });
        queued
    }

    /// Close a session: pending and in-flight requests end with
    /// `SessionClosed` and the snapshot is released.
    pub fn close(&self, id: &SessionId) -> bool {
        let mut workers = self.inner.workers();
        let handle = workers.remove(id);
        if let Some(handle) = &handle {
            handle.cancel.cancel();
        }
        let existed = self.inner.registry.close(id);
        existed || handle.is_some()
    }

    /// Evict sessions idle for at least `timeout`. Sessions with queued or
    /// running work are skipped.
    pub fn evict_idle(&self, timeout: Duration) -> Vec<SessionId> {
        let mut evicted = Vec::new();
        for id in self.inner.registry.idle_sessions(timeout) {
            if self.close_if_idle(&id, timeout) {
                info!(session_id = %id, "Evicted idle session");
                evicted.push(id);
            }
        }
        evicted
    }

    /// Close `id` only if it is still idle once the workers lock is held.
    ///
    /// `enqueue` touches the entry under the same lock, so a request admitted
    /// after the idle scan makes this a no-op.
    fn close_if_idle(&self, id: &SessionId, timeout: Duration) -> bool {
        let mut workers = self.inner.workers();
        let Some(entry) = self.inner.registry.entry(id) else {
            return false;
        };
        let queued = workers.get(id).is_some_and(WorkerHandle::has_queued);
        if queued
            || entry.execution_state() == ExecutionState::Running
            || entry.idle_for() < timeout
        {
            return false;
        }
        if let Some(handle) = workers.remove(id) {
            handle.cancel.cancel();
        }
        self.inner.registry.close(id)
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until shutdown.
    pub fn spawn_idle_sweeper(&self, interval: Duration, timeout: Duration) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = dispatcher.evict_idle(timeout);
                        if !evicted.is_empty() {
                            debug!(count = evicted.len(), "Idle sweep finished");
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        })
    }

    /// Stop every worker. Pending requests end with `SessionClosed`.
    pub fn shutdown(&self) {
        info!("Session dispatcher shutting down");
        self.inner.shutdown.cancel();
        self.inner.workers().clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.inner.registry.summaries()
    }

    pub fn history(&self, id: &SessionId) -> Option<Vec<HistoryRecord>> {
        self.inner.registry.entry(id).map(|entry| entry.history())
    }
}

impl std::fmt::Debug for SessionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDispatcher")
            .field("sessions", &self.inner.registry.len())
            .field("workers", &self.inner.workers().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Serves one session's queue.
struct Worker {
    inner: Arc<Inner>,
    entry: Arc<SessionEntry>,
    rx: mpsc::Receiver<Job>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let session_id = self.entry.id().clone();
        debug!(session_id = %session_id, "Session worker started");

        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let events = job.events.clone();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Dropping the pipeline discards any pending replacement.
                    let event = DispatchError::SessionClosed(session_id.clone()).to_event();
                    tokio::spawn(async move {
                        let _ = events.send(event).await;
                    });
                    break;
                }
                _ = self.process(job) => {}
            }
        }

        self.rx.close();
        while let Ok(job) = self.rx.try_recv() {
            let _ = job
                .events
                .try_send(DispatchError::SessionClosed(session_id.clone()).to_event());
        }
        debug!(session_id = %session_id, "Session worker stopped");
    }

    async fn process(&self, job: Job) {
        let Job {
            request_id,
            request,
            events,
        } = job;
        let entry = &self.entry;
        entry.set_execution_state(ExecutionState::Running);
        entry.touch();

        let mut tracker = RequestTracker::new(request_id, entry.id().clone());
        let mut resolved: Option<Invocation> = None;

        let outcome = tokio::select! {
            _ = events.closed() => None,
            result = self.pipeline(&request, &mut tracker, &mut resolved, &events) => Some(result),
        };

        let result = match outcome {
            Some(Ok(output)) if events.is_closed() => {
                drop(output);
                None
            }
            other => other,
        };
        let Some(result) = result else {
            info!(request_id = %request_id, session_id = %entry.id(), "Request cancelled by caller");
            if !tracker.phase().is_terminal() {
                tracker.fail();
            }
            entry.set_execution_state(ExecutionState::Idle);
            entry.touch();
            return;
        };

        let result = result.and_then(|output| {
            if let Some(replacement) = output.replacement {
                let rows = replacement.row_count();
                entry
                    .replace_dataset(Arc::new(replacement))
                    .map_err(|_| DispatchError::SessionClosed(entry.id().clone()))?;
                debug!(request_id = %request_id, rows, "Dataset snapshot replaced");
            }
            Ok(output.result)
        });

        let (outcome, explanation, next_state) = match result {
            Ok(result) => {
                let _ = tracker.advance(RequestPhase::Streaming);
                let outcome = result.kind_name().to_string();
                let explanation = result.explanation().to_string();
                let _ = events.send(ResponseEvent::Final { result }).await;
                let _ = tracker.advance(RequestPhase::Completed);
                (outcome, explanation, ExecutionState::Idle)
            }
            Err(e) => {
                tracker.fail();
                let outcome = format!("error:{}", e.kind());
                let explanation = e.to_string();
                let next = match e {
                    DispatchError::HandlerExecution { .. } | DispatchError::ExecutionTimeout(_) => {
                        ExecutionState::Faulted
                    }
                    _ => ExecutionState::Idle,
                };
                let _ = events.send(e.to_event()).await;
                (outcome, explanation, next)
            }
        };

        info!(
            request_id = %request_id,
            session_id = %entry.id(),
            outcome = %outcome,
            "Request finished"
        );
        let (capability, arguments) = match resolved {
            Some(invocation) => (Some(invocation.capability), invocation.arguments.to_value()),
            None => (None, Value::Null),
        };
        entry.push_history(HistoryRecord {
            request_id,
            raw_text: request.text,
            capability,
            arguments,
            outcome,
            explanation,
            at: Timestamp::now(),
        });
        entry.set_execution_state(next_state);
        entry.touch();
    }

    /// Load, resolve, validate, and execute one request.
    async fn pipeline(
        &self,
        request: &DispatchRequest,
        tracker: &mut RequestTracker,
        resolved: &mut Option<Invocation>,
        events: &mpsc::Sender<ResponseEvent>,
    ) -> Result<CapabilityOutput, DispatchError> {
        let config = &self.inner.config;
        let request_id = tracker.request_id();
        let _ = tracker.advance(RequestPhase::Resolving);

        // ===== Dataset =====
        if let Some(source) = request.dataset_source.as_deref() {
            let current = self.entry.dataset();
            if current.as_ref().map(|d| d.source()) != Some(source) {
                self.inner
                    .registry
                    .load_into(&self.entry, source)
                    .await
                    .map_err(|e| match e {
                        DatasetError::SessionClosed(id) => DispatchError::SessionClosed(id),
                        other => {
                            warn!(request_id = %request_id, error = %other, "Dataset load failed");
                            DispatchError::Load(other.to_string())
                        }
                    })?;
            }
        }
        let dataset = self.entry.dataset();

        // ===== Resolution =====
        let history = self.entry.history();
        let schema = dataset.as_ref().map(|d| d.schema());
        let resolution = tokio::time::timeout(
            config.resolution_timeout(),
            self.inner.resolver.resolve(&history, &request.text, schema),
        )
        .await;
        let invocation = match resolution {
            Err(_) => {
                warn!(request_id = %request_id, "Intent resolution timed out");
                return Err(DispatchError::ResolutionTimeout(config.resolution_timeout_ms));
            }
            Ok(Err(e)) => {
                warn!(request_id = %request_id, error = %e, "Intent resolution failed");
                return Err(DispatchError::UnresolvedIntent);
            }
            Ok(Ok(invocation)) => invocation,
        };
        *resolved = Some(invocation.clone());
        let _ = tracker.advance(RequestPhase::Validating);

        // ===== Validation =====
        let handler = self
            .inner
            .capabilities
            .get(&invocation.capability)
            .ok_or_else(|| DispatchError::UnknownCapability(invocation.capability.clone()))?;
        let Some(dataset) = dataset else {
            let _ = tracker.advance(RequestPhase::Executing);
            return Err(DispatchError::DatasetNotLoaded);
        };
        let args = handler
            .schema()
            .validate(&invocation.arguments, Some(dataset.schema()))
            .map_err(DispatchError::from_validation)?;
        *resolved = Some(Invocation {
            arguments: args.clone(),
            ..invocation
        });
        let _ = tracker.advance(RequestPhase::Executing);

        // ===== Execution =====
        let capability = handler.name();
        debug!(request_id = %request_id, capability = %capability, "Executing capability");
        let (progress_tx, mut progress_rx) = mpsc::channel::<Value>(config.event_buffer.max(1));
        let task = tokio::spawn(async move {
            let sink = ProgressSink::new(progress_tx);
            handler.execute(dataset, &args, &sink).await
        });
        tokio::pin!(task);
        let deadline = tokio::time::sleep(config.execution_soft_deadline());
        tokio::pin!(deadline);

        let joined = loop {
            tokio::select! {
                biased;
                Some(payload) = progress_rx.recv() => {
                    let _ = events.send(ResponseEvent::Partial { payload }).await;
                }
                joined = &mut task => break joined,
                _ = &mut deadline => {
                    warn!(
                        request_id = %request_id,
                        capability = %capability,
                        "Capability exceeded soft deadline; result will be discarded"
                    );
                    return Err(DispatchError::ExecutionTimeout(config.execution_soft_deadline_ms));
                }
            }
        };
        while let Ok(payload) = progress_rx.try_recv() {
            let _ = events.send(ResponseEvent::Partial { payload }).await;
        }

        match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(CapabilityError::InvalidArguments { field, reason })) => {
                Err(DispatchError::InvalidArguments { field, reason })
            }
            Ok(Err(e)) => Err(handler_failure(request_id, capability, &e)),
            Err(e) => Err(handler_failure(request_id, capability, &e)),
        }
    }
}

/// Log the full failure and hand the caller only an opaque reference.
fn handler_failure(
    request_id: Uuid,
    capability: &str,
    detail: &dyn std::fmt::Display,
) -> DispatchError {
    let reference = Uuid::new_v4();
    error!(
        request_id = %request_id,
        capability = %capability,
        reference = %reference,
        error = %detail,
        "Capability handler failed"
    );
    DispatchError::HandlerExecution {
        capability: capability.to_string(),
        reference,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ResolverError};
    use crate::resolver::KeywordResolver;
    use async_trait::async_trait;
    use serde_json::json;
    use std::io::Write;
    use tabletalk_capability::{
        ArgSpec, ArgType, Arguments, ArgumentSchema, CapabilityHandler, CapabilityResult,
    };
    use tabletalk_core::config::DatasetConfig;
    use tabletalk_dataset::{Column, ColumnSchema, Dataset};

    const PRICES_CSV: &str =
        "item,price,category\na,10,x\nb,20,y\nc,30,x\nd,40,y\ne,50,x\nf,60,y\ng,70,x\nh,80,y\ni,90,x\nj,,y\n";

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn path(file: &tempfile::NamedTempFile) -> String {
        file.path().to_str().unwrap().to_string()
    }

    fn memory_prices() -> Arc<Dataset> {
        let values = |raw: &[&str]| -> Vec<Option<String>> {
            raw.iter()
                .map(|s| if s.is_empty() { None } else { Some(s.to_string()) })
                .collect()
        };
        Arc::new(
            Dataset::new(
                "memory://prices",
                vec![
                    Column::new("item", values(&["a", "b", "c", "d"])),
                    Column::new("price", values(&["10", "20", "", "40"])),
                ],
            )
            .unwrap(),
        )
    }

    fn dispatch_config() -> DispatchConfig {
        DispatchConfig {
            resolution_timeout_ms: 1_000,
            execution_soft_deadline_ms: 2_000,
            ..DispatchConfig::default()
        }
    }

    fn build(
        capabilities: CapabilityRegistry,
        resolver: Arc<dyn IntentResolver>,
        config: DispatchConfig,
        session: SessionConfig,
    ) -> SessionDispatcher {
        let dataset = DatasetConfig {
            root_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            ..DatasetConfig::default()
        };
        let registry = Arc::new(DatasetRegistry::new(&dataset, &session));
        SessionDispatcher::new(registry, Arc::new(capabilities), resolver, config, &session)
    }

    fn dispatcher() -> SessionDispatcher {
        build(
            CapabilityRegistry::with_defaults(),
            Arc::new(KeywordResolver::new()),
            dispatch_config(),
            SessionConfig::default(),
        )
    }

    /// Registry with the built-ins plus the scripted test handlers.
    fn scripted_capabilities(log: Arc<Mutex<Vec<String>>>) -> CapabilityRegistry {
        let mut capabilities = CapabilityRegistry::with_defaults();
        capabilities.register(Arc::new(Record { log })).unwrap();
        capabilities.register(Arc::new(Explode)).unwrap();
        capabilities.register(Arc::new(SlowClean)).unwrap();
        capabilities.register(Arc::new(Chatty)).unwrap();
        capabilities
    }

    fn scripted(config: DispatchConfig, session: SessionConfig) -> (SessionDispatcher, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = build(
            scripted_capabilities(Arc::clone(&log)),
            Arc::new(KeywordResolver::new()),
            config,
            session,
        );
        (dispatcher, log)
    }

    fn explicit(capability: &str, arguments: Value) -> String {
        json!({"capability": capability, "arguments": arguments}).to_string()
    }

    /// Drain a stream until the sender side is gone.
    async fn drain(mut stream: RequestStream) -> Vec<ResponseEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        events
    }

    fn terminal(events: &[ResponseEvent]) -> &ResponseEvent {
        let terminals: Vec<&ResponseEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1, "expected one terminal event, got {:?}", events);
        assert!(events.last().unwrap().is_terminal());
        terminals[0]
    }

    fn final_result(events: &[ResponseEvent]) -> &CapabilityResult {
        match terminal(events) {
            ResponseEvent::Final { result } => result,
            other => panic!("expected final event, got {:?}", other),
        }
    }

    fn error_kind(events: &[ResponseEvent]) -> ErrorKind {
        terminal(events)
            .error_kind()
            .unwrap_or_else(|| panic!("expected error event, got {:?}", events))
    }

    async fn wait_until_running(dispatcher: &SessionDispatcher, id: &SessionId) {
        for _ in 0..200 {
            if dispatcher
                .registry()
                .entry(id)
                .is_some_and(|e| e.execution_state() == ExecutionState::Running)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {} never started running", id);
    }

    // ===== Scripted collaborators =====

    struct SlowResolver(Duration);

    #[async_trait]
    impl IntentResolver for SlowResolver {
        async fn resolve(
            &self,
            _history: &[HistoryRecord],
            _text: &str,
            _schema: Option<&[ColumnSchema]>,
        ) -> Result<Invocation, ResolverError> {
            tokio::time::sleep(self.0).await;
            Ok(Invocation::new("schema", Arguments::new(), "slow"))
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl IntentResolver for FailingResolver {
        async fn resolve(
            &self,
            _history: &[HistoryRecord],
            _text: &str,
            _schema: Option<&[ColumnSchema]>,
        ) -> Result<Invocation, ResolverError> {
            Err(ResolverError::Unavailable("upstream 503 at 10.0.0.7".into()))
        }
    }

    /// Logs start and end around an optional delay.
    struct Record {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CapabilityHandler for Record {
        fn name(&self) -> &'static str {
            "record"
        }

        fn description(&self) -> &'static str {
            "test: log start and end"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new()
                .arg(ArgSpec::required("label", ArgType::String, "label"))
                .arg(ArgSpec::optional("delay_ms", ArgType::Integer, "delay").with_default(0))
        }

        async fn execute(
            &self,
            _dataset: Arc<Dataset>,
            args: &Arguments,
            _progress: &ProgressSink,
        ) -> Result<CapabilityOutput, CapabilityError> {
            let label = args.str("label").unwrap_or_default().to_string();
            self.log.lock().unwrap().push(format!("{}-start", label));
            let delay = args.integer("delay_ms").unwrap_or(0) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.log.lock().unwrap().push(format!("{}-end", label));
            Ok(CapabilityResult::text(label.clone(), Value::Null, label).into())
        }
    }

    struct Explode;

    #[async_trait]
    impl CapabilityHandler for Explode {
        fn name(&self) -> &'static str {
            "explode"
        }

        fn description(&self) -> &'static str {
            "test: always fails"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new()
        }

        async fn execute(
            &self,
            _dataset: Arc<Dataset>,
            _args: &Arguments,
            _progress: &ProgressSink,
        ) -> Result<CapabilityOutput, CapabilityError> {
            Err(CapabilityError::Execution("disk on fire at /var/secret".into()))
        }
    }

    /// Drops every row after a delay.
    struct SlowClean;

    #[async_trait]
    impl CapabilityHandler for SlowClean {
        fn name(&self) -> &'static str {
            "slow_clean"
        }

        fn description(&self) -> &'static str {
            "test: delayed replacement"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new()
                .arg(ArgSpec::optional("delay_ms", ArgType::Integer, "delay").with_default(200))
        }

        async fn execute(
            &self,
            dataset: Arc<Dataset>,
            args: &Arguments,
            _progress: &ProgressSink,
        ) -> Result<CapabilityOutput, CapabilityError> {
            let delay = args.integer("delay_ms").unwrap_or(200) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let emptied = dataset.filter_rows(dataset.source(), |_| false)?;
            Ok(CapabilityOutput::with_replacement(
                CapabilityResult::text("emptied", Value::Null, "emptied"),
                emptied,
            ))
        }
    }

    /// Emits three partials before finishing.
    struct Chatty;

    #[async_trait]
    impl CapabilityHandler for Chatty {
        fn name(&self) -> &'static str {
            "chatty"
        }

        fn description(&self) -> &'static str {
            "test: partial payloads"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new()
        }

        async fn execute(
            &self,
            _dataset: Arc<Dataset>,
            _args: &Arguments,
            progress: &ProgressSink,
        ) -> Result<CapabilityOutput, CapabilityError> {
            for n in 0..3 {
                progress.emit(json!({"n": n})).await;
            }
            Ok(CapabilityResult::text("done", Value::Null, "done").into())
        }
    }

    // ===== Happy paths =====

    #[tokio::test]
    async fn test_profile_price_column() {
        let file = csv_file(PRICES_CSV);
        let dispatcher = dispatcher();
        let request =
            DispatchRequest::new("S1", "profile the price column").with_source(path(&file));
        let events = drain(dispatcher.submit(request)).await;

        let table = final_result(&events).as_tabular().unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.cell(0, "column"), Some(&json!("price")));
        assert_eq!(table.cell(0, "count"), Some(&json!(9)));
        assert_eq!(table.cell(0, "nulls"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_clean_then_profile_sees_new_snapshot() {
        let file = csv_file(PRICES_CSV);
        let dispatcher = dispatcher();
        let id = SessionId::from("S2");

        let events = drain(dispatcher.submit(
            DispatchRequest::new("S2", "drop rows with missing price").with_source(path(&file)),
        ))
        .await;
        assert_eq!(final_result(&events).kind_name(), "text");
        assert_eq!(dispatcher.registry().get(&id).unwrap().row_count(), 9);

        // Same source string: the cleaned snapshot is kept, not reloaded.
        let events = drain(dispatcher.submit(
            DispatchRequest::new("S2", explicit("profile", json!({"columns": ["price"]})))
                .with_source(path(&file)),
        ))
        .await;
        let table = final_result(&events).as_tabular().unwrap();
        assert_eq!(table.cell(0, "nulls"), Some(&json!(0)));
        assert_eq!(table.cell(0, "count"), Some(&json!(9)));
    }

    #[tokio::test]
    async fn test_queued_profile_sees_cleaned_snapshot() {
        let file = csv_file(PRICES_CSV);
        let dispatcher = dispatcher();
        let id = SessionId::from("S1");

        let clean = dispatcher.submit(
            DispatchRequest::new("S1", "drop rows with missing price").with_source(path(&file)),
        );
        let profile = dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("profile", json!({"columns": ["price"]})),
        ));
        let (clean, profile) = tokio::join!(drain(clean), drain(profile));

        assert_eq!(final_result(&clean).kind_name(), "text");
        let table = final_result(&profile).as_tabular().unwrap();
        assert_eq!(table.cell(0, "count"), Some(&json!(9)));
        assert_eq!(table.cell(0, "nulls"), Some(&json!(0)));
        assert_eq!(dispatcher.registry().get(&id).unwrap().row_count(), 9);
    }

    #[tokio::test]
    async fn test_profile_is_idempotent() {
        let file = csv_file(PRICES_CSV);
        let dispatcher = dispatcher();
        let text = explicit("profile", json!({}));
        let first = drain(
            dispatcher.submit(DispatchRequest::new("S1", text.clone()).with_source(path(&file))),
        )
        .await;
        let second = drain(dispatcher.submit(DispatchRequest::new("S1", text))).await;
        assert_eq!(final_result(&first), final_result(&second));
    }

    #[tokio::test]
    async fn test_partials_precede_final() {
        let (dispatcher, _) = scripted(dispatch_config(), SessionConfig::default());
        dispatcher.registry().open(&SessionId::from("S1"));
        dispatcher
            .registry()
            .replace(&SessionId::from("S1"), memory_prices())
            .unwrap();

        let events = drain(dispatcher.submit(DispatchRequest::new("S1", explicit("chatty", json!({}))))).await;
        assert_eq!(events.len(), 4);
        for (n, event) in events.iter().take(3).enumerate() {
            assert_eq!(event, &ResponseEvent::Partial { payload: json!({"n": n}) });
        }
        assert_eq!(final_result(&events).explanation(), "done");
    }

    #[tokio::test]
    async fn test_history_records_outcomes() {
        let file = csv_file(PRICES_CSV);
        let dispatcher = dispatcher();
        let id = SessionId::from("S1");
        drain(dispatcher.submit(DispatchRequest::new("S1", "show the schema").with_source(path(&file)))).await;
        drain(dispatcher.submit(DispatchRequest::new("S1", explicit("forecast", json!({}))))).await;

        let history = dispatcher.history(&id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].capability.as_deref(), Some("schema"));
        assert_eq!(history[0].outcome, "tabular");
        assert!(history[0].succeeded());
        assert_eq!(history[1].outcome, "error:UnknownCapability");
        assert!(!history[1].succeeded());
    }

    #[tokio::test]
    async fn test_again_replays_previous_invocation() {
        let file = csv_file(PRICES_CSV);
        let dispatcher = dispatcher();
        let first = drain(dispatcher.submit(
            DispatchRequest::new("S1", "profile the price column").with_source(path(&file)),
        ))
        .await;
        let again = drain(dispatcher.submit(DispatchRequest::new("S1", "same again"))).await;
        assert_eq!(final_result(&first), final_result(&again));
    }

    // ===== Ordering =====

    #[tokio::test]
    async fn test_requests_run_fifo_per_session() {
        let (dispatcher, log) = scripted(dispatch_config(), SessionConfig::default());
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        dispatcher.registry().replace(&id, memory_prices()).unwrap();

        let a = dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("record", json!({"label": "a", "delay_ms": 50})),
        ));
        let b = dispatcher.submit(DispatchRequest::new("S1", explicit("record", json!({"label": "b"}))));
        let c = dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("record", json!({"label": "c", "delay_ms": 10})),
        ));

        let (a, b, c) = tokio::join!(drain(a), drain(b), drain(c));
        assert_eq!(final_result(&a).explanation(), "a");
        assert_eq!(final_result(&b).explanation(), "b");
        assert_eq!(final_result(&c).explanation(), "c");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a-start", "a-end", "b-start", "b-end", "c-start", "c-end"]
        );
    }

    #[tokio::test]
    async fn test_sessions_run_independently() {
        let (dispatcher, log) = scripted(dispatch_config(), SessionConfig::default());
        for id in ["slow", "fast"] {
            let id = SessionId::from(id);
            dispatcher.registry().open(&id);
            dispatcher.registry().replace(&id, memory_prices()).unwrap();
        }
        let slow = dispatcher.submit(DispatchRequest::new(
            "slow",
            explicit("record", json!({"label": "slow", "delay_ms": 300})),
        ));
        wait_until_running(&dispatcher, &SessionId::from("slow")).await;
        let fast = drain(dispatcher.submit(DispatchRequest::new(
            "fast",
            explicit("record", json!({"label": "fast"})),
        )))
        .await;
        assert_eq!(final_result(&fast).explanation(), "fast");
        assert!(!log.lock().unwrap().contains(&"slow-end".to_string()));
        drain(slow).await;
    }

    // ===== Failures =====

    #[tokio::test]
    async fn test_resolution_timeout_leaves_dataset_untouched() {
        let config = DispatchConfig {
            resolution_timeout_ms: 50,
            ..dispatch_config()
        };
        let dispatcher = build(
            CapabilityRegistry::with_defaults(),
            Arc::new(SlowResolver(Duration::from_secs(30))),
            config,
            SessionConfig::default(),
        );
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        let before = memory_prices();
        dispatcher.registry().replace(&id, Arc::clone(&before)).unwrap();

        let events = drain(dispatcher.submit(DispatchRequest::new("S1", "anything"))).await;
        assert_eq!(error_kind(&events), ErrorKind::ResolutionTimeout);
        assert!(Arc::ptr_eq(&before, &dispatcher.registry().get(&id).unwrap()));
    }

    #[tokio::test]
    async fn test_resolver_failure_is_not_echoed() {
        let dispatcher = build(
            CapabilityRegistry::with_defaults(),
            Arc::new(FailingResolver),
            dispatch_config(),
            SessionConfig::default(),
        );
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        dispatcher.registry().replace(&id, memory_prices()).unwrap();
        let events = drain(dispatcher.submit(DispatchRequest::new("S1", "anything"))).await;
        match terminal(&events) {
            ResponseEvent::Error { kind, message, .. } => {
                assert_eq!(*kind, ErrorKind::UnresolvedIntent);
                assert!(!message.contains("10.0.0.7"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unmatched_text_is_unresolved() {
        let file = csv_file(PRICES_CSV);
        let events = drain(
            dispatcher().submit(DispatchRequest::new("S1", "hello there").with_source(path(&file))),
        )
        .await;
        assert_eq!(error_kind(&events), ErrorKind::UnresolvedIntent);
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let file = csv_file(PRICES_CSV);
        let events = drain(dispatcher().submit(
            DispatchRequest::new("S1", explicit("forecast", json!({"horizon": 3})))
                .with_source(path(&file)),
        ))
        .await;
        assert_eq!(error_kind(&events), ErrorKind::UnknownCapability);
    }

    #[tokio::test]
    async fn test_invalid_arguments_name_field() {
        let file = csv_file(PRICES_CSV);
        let events = drain(dispatcher().submit(
            DispatchRequest::new("S1", explicit("profile", json!({"columns": ["weight"]})))
                .with_source(path(&file)),
        ))
        .await;
        match terminal(&events) {
            ResponseEvent::Error { kind, field, .. } => {
                assert_eq!(*kind, ErrorKind::InvalidArguments);
                assert_eq!(field.as_deref(), Some("columns"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dataset_not_loaded() {
        let events = drain(dispatcher().submit(DispatchRequest::new("fresh", "profile everything"))).await;
        assert_eq!(error_kind(&events), ErrorKind::DatasetNotLoaded);
    }

    #[tokio::test]
    async fn test_first_request_without_source_opens_no_session() {
        let dispatcher = dispatcher();
        let events = drain(dispatcher.submit(DispatchRequest::new("fresh", "hello there"))).await;
        assert_eq!(error_kind(&events), ErrorKind::DatasetNotLoaded);
        assert!(dispatcher.registry().entry(&SessionId::from("fresh")).is_none());
        assert!(dispatcher.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_sources_outside_dataset_root_are_load_errors() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("prices.csv"), PRICES_CSV).unwrap();
        let session = SessionConfig::default();
        let dataset = DatasetConfig {
            root_dir: root.path().to_string_lossy().into_owned(),
            ..DatasetConfig::default()
        };
        let dispatcher = SessionDispatcher::new(
            Arc::new(DatasetRegistry::new(&dataset, &session)),
            Arc::new(CapabilityRegistry::with_defaults()),
            Arc::new(KeywordResolver::new()),
            dispatch_config(),
            &session,
        );
        let outside = csv_file(PRICES_CSV);
        let schema = explicit("schema", json!({}));

        for source in [path(&outside), "/etc/hosts".to_string(), "../../../../etc/hosts".to_string()] {
            let events = drain(
                dispatcher.submit(DispatchRequest::new("S1", schema.clone()).with_source(source.as_str())),
            )
            .await;
            match terminal(&events) {
                ResponseEvent::Error { kind, message, .. } => {
                    assert_eq!(*kind, ErrorKind::LoadError);
                    assert!(message.contains("source is not available"), "{}", message);
                    assert!(!message.contains("localhost"));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(dispatcher.registry().get(&SessionId::from("S1")).is_err());

        let events = drain(
            dispatcher.submit(DispatchRequest::new("S1", schema).with_source("prices.csv")),
        )
        .await;
        assert_eq!(final_result(&events).as_tabular().unwrap().rows.len(), 3);
    }

    #[tokio::test]
    async fn test_load_error_keeps_session_usable() {
        let dispatcher = dispatcher();
        let events = drain(dispatcher.submit(
            DispatchRequest::new("S1", "show the schema").with_source("/definitely/missing.csv"),
        ))
        .await;
        assert_eq!(error_kind(&events), ErrorKind::LoadError);

        let file = csv_file(PRICES_CSV);
        let events = drain(
            dispatcher.submit(DispatchRequest::new("S1", "show the schema").with_source(path(&file))),
        )
        .await;
        assert_eq!(final_result(&events).as_tabular().unwrap().rows.len(), 3);
    }

    #[tokio::test]
    async fn test_handler_failure_returns_reference_only() {
        let (dispatcher, _) = scripted(dispatch_config(), SessionConfig::default());
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        dispatcher.registry().replace(&id, memory_prices()).unwrap();

        let events = drain(dispatcher.submit(DispatchRequest::new("S1", explicit("explode", json!({}))))).await;
        match terminal(&events) {
            ResponseEvent::Error {
                kind,
                message,
                reference,
                ..
            } => {
                assert_eq!(*kind, ErrorKind::HandlerExecutionError);
                assert!(reference.is_some());
                assert!(!message.contains("disk on fire"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let entry = dispatcher.registry().entry(&id).unwrap();
        assert_eq!(entry.execution_state(), ExecutionState::Faulted);
    }

    #[tokio::test]
    async fn test_execution_timeout_discards_late_result() {
        let config = DispatchConfig {
            execution_soft_deadline_ms: 50,
            ..dispatch_config()
        };
        let (dispatcher, _) = scripted(config, SessionConfig::default());
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        dispatcher.registry().replace(&id, memory_prices()).unwrap();

        let events = drain(dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("slow_clean", json!({"delay_ms": 150})),
        )))
        .await;
        assert_eq!(error_kind(&events), ErrorKind::ExecutionTimeout);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(dispatcher.registry().get(&id).unwrap().row_count(), 4);
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected_at_admission() {
        let dispatcher = dispatcher();
        let events = drain(dispatcher.submit(DispatchRequest::new("S1", "   "))).await;
        assert_eq!(error_kind(&events), ErrorKind::InvalidRequest);

        let events = drain(dispatcher.submit(DispatchRequest::new("", "profile"))).await;
        assert_eq!(error_kind(&events), ErrorKind::InvalidRequest);

        let long = "x".repeat(dispatcher.config().max_message_length + 1);
        let events = drain(dispatcher.submit(DispatchRequest::new("S1", long))).await;
        assert_eq!(error_kind(&events), ErrorKind::InvalidRequest);
        assert!(dispatcher.registry().is_empty());
    }

    // ===== Queueing and lifecycle =====

    #[tokio::test]
    async fn test_queue_overflow_is_session_busy() {
        let session = SessionConfig {
            max_queued_requests: 1,
            ..SessionConfig::default()
        };
        let (dispatcher, _) = scripted(dispatch_config(), session);
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        dispatcher.registry().replace(&id, memory_prices()).unwrap();

        let running = dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("record", json!({"label": "a", "delay_ms": 200})),
        ));
        wait_until_running(&dispatcher, &id).await;
        let queued = dispatcher.submit(DispatchRequest::new("S1", explicit("record", json!({"label": "b"}))));
        let rejected = drain(dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("record", json!({"label": "c"})),
        )))
        .await;

        assert_eq!(error_kind(&rejected), ErrorKind::SessionBusy);
        assert_eq!(final_result(&drain(running).await).explanation(), "a");
        assert_eq!(final_result(&drain(queued).await).explanation(), "b");
    }

    #[tokio::test]
    async fn test_close_ends_inflight_and_queued_requests() {
        let (dispatcher, _) = scripted(dispatch_config(), SessionConfig::default());
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        dispatcher.registry().replace(&id, memory_prices()).unwrap();

        let inflight = dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("slow_clean", json!({"delay_ms": 500})),
        ));
        wait_until_running(&dispatcher, &id).await;
        let queued = dispatcher.submit(DispatchRequest::new("S1", explicit("record", json!({"label": "b"}))));

        assert!(dispatcher.close(&id));
        assert_eq!(error_kind(&drain(inflight).await), ErrorKind::SessionClosed);
        assert_eq!(error_kind(&drain(queued).await), ErrorKind::SessionClosed);
        assert!(dispatcher.registry().entry(&id).is_none());
        assert!(!dispatcher.close(&id));
    }

    #[tokio::test]
    async fn test_caller_disconnect_cancels_without_swap() {
        let (dispatcher, _) = scripted(dispatch_config(), SessionConfig::default());
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        let before = memory_prices();
        dispatcher.registry().replace(&id, Arc::clone(&before)).unwrap();

        let stream = dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("slow_clean", json!({"delay_ms": 100})),
        ));
        wait_until_running(&dispatcher, &id).await;
        drop(stream);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let entry = dispatcher.registry().entry(&id).unwrap();
        assert!(Arc::ptr_eq(&before, &entry.dataset().unwrap()));
        assert_eq!(entry.history_len(), 0);
        assert_eq!(entry.execution_state(), ExecutionState::Idle);

        // The session keeps serving later requests.
        let events = drain(dispatcher.submit(DispatchRequest::new("S1", explicit("schema", json!({}))))).await;
        assert_eq!(final_result(&events).kind_name(), "tabular");
    }

    #[tokio::test]
    async fn test_evict_idle_skips_busy_sessions() {
        let (dispatcher, _) = scripted(dispatch_config(), SessionConfig::default());
        let idle = SessionId::from("idle");
        let busy = SessionId::from("busy");
        for id in [&idle, &busy] {
            dispatcher.registry().open(id);
            dispatcher.registry().replace(id, memory_prices()).unwrap();
        }
        drain(dispatcher.submit(DispatchRequest::new("idle", explicit("schema", json!({}))))).await;
        let running = dispatcher.submit(DispatchRequest::new(
            "busy",
            explicit("record", json!({"label": "b", "delay_ms": 200})),
        ));
        wait_until_running(&dispatcher, &busy).await;

        let evicted = dispatcher.evict_idle(Duration::ZERO);
        assert_eq!(evicted, vec![idle.clone()]);
        assert!(dispatcher.registry().entry(&idle).is_none());
        assert!(dispatcher.registry().entry(&busy).is_some());
        assert_eq!(final_result(&drain(running).await).explanation(), "b");
    }

    #[tokio::test]
    async fn test_eviction_spares_session_admitted_after_idle_scan() {
        let (dispatcher, _) = scripted(dispatch_config(), SessionConfig::default());
        let id = SessionId::from("S1");
        dispatcher.registry().open(&id);
        dispatcher.registry().replace(&id, memory_prices()).unwrap();

        let timeout = Duration::from_millis(50);
        tokio::time::sleep(Duration::from_millis(80)).await;
        let candidates = dispatcher.registry().idle_sessions(timeout);
        assert_eq!(candidates, vec![id.clone()]);

        // A request lands between the idle scan and the close.
        let stream = dispatcher.submit(DispatchRequest::new(
            "S1",
            explicit("record", json!({"label": "late", "delay_ms": 100})),
        ));
        for candidate in &candidates {
            assert!(!dispatcher.close_if_idle(candidate, timeout));
        }
        assert!(dispatcher.evict_idle(timeout).is_empty());

        assert_eq!(final_result(&drain(stream).await).explanation(), "late");
        assert!(dispatcher.registry().entry(&id).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let dispatcher = dispatcher();
        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        let events = drain(dispatcher.submit(DispatchRequest::new("S1", "profile"))).await;
        assert_eq!(error_kind(&events), ErrorKind::SessionClosed);
    }
}
