//! Execution tracker.
//!
//! The tracker owns at most one job session at a time. A session runs a fixed
//! interval status poller and a progress stream listener. Both feed a single
//! driver task that applies their events to the published snapshot in arrival
//! order, so the first terminal event wins and anything after it is ignored.
//!
//! Snapshots are published through a `tokio::sync::watch` channel. Events from
//! a superseded session carry an older generation number and are discarded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::AnalysisBackend;
use crate::config::TrackerConfig;
use crate::error::JobError;
use crate::progress::{ProgressEvent, ProgressListener};
use crate::results::AnalysisReport;
use crate::submitter::JobSubmitter;
use crate::types::{AnalysisRequest, ExecutionHandle, ExecutionStatus, Method};

/// Lifecycle of the tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    /// Nothing submitted, or the last job was cancelled.
    #[default]
    Idle,
    /// The submit request is in flight.
    Submitting,
    /// Accepted by the backend; polling and streaming.
    Awaiting,
    /// Finished with results.
    Done,
    /// Rejected, unreachable, or failed after acceptance.
    Failed,
}

impl TrackerState {
    pub fn is_active(&self) -> bool {
        matches!(self, TrackerState::Submitting | TrackerState::Awaiting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackerState::Done | TrackerState::Failed)
    }
}

impl std::fmt::Display for TrackerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrackerState::Idle => "idle",
            TrackerState::Submitting => "submitting",
            TrackerState::Awaiting => "awaiting",
            TrackerState::Done => "done",
            TrackerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a job ended.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(Arc<AnalysisReport>),
    Failed(JobError),
}

/// Point-in-time view of the tracker, as published to subscribers.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    /// Incremented on every submit.
    pub generation: u64,
    pub state: TrackerState,
    pub handle: Option<ExecutionHandle>,
    pub method: Option<Method>,
    /// Progress lines in delivery order. Kept after a failure.
    pub progress: Vec<String>,
    pub outcome: Option<JobOutcome>,
    pub stream_open: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrackerSnapshot {
    pub fn report(&self) -> Option<&Arc<AnalysisReport>> {
        match &self.outcome {
            Some(JobOutcome::Completed(report)) => Some(report),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&JobError> {
        match &self.outcome {
            Some(JobOutcome::Failed(err)) => Some(err),
            _ => None,
        }
    }

    /// Wall-clock time from submit to the terminal transition.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.submitted_at?)
    }
}

/// Observer for tracker events. Every method defaults to a no-op.
#[async_trait]
pub trait TrackerCallback: Send + Sync {
    async fn on_state_change(&self, _state: TrackerState, _handle: Option<&ExecutionHandle>) {}

    async fn on_progress(&self, _line: &str) {}

    /// The poller and stream listener for `handle` were started.
    async fn on_session_started(&self, _handle: &ExecutionHandle) {}

    /// The poller was stopped and the stream closed. Fires once per session.
    async fn on_session_closed(&self, _handle: &ExecutionHandle) {}

    /// The progress stream ended on its own. Not a job failure.
    async fn on_stream_closed(&self, _handle: &ExecutionHandle, _error: Option<&JobError>) {}
}

/// Callback that ignores everything.
pub struct NoOpCallback;

#[async_trait]
impl TrackerCallback for NoOpCallback {}

/// A callback that records all events for test assertions.
pub struct RecordingCallback {
    states: tokio::sync::Mutex<Vec<TrackerState>>,
    progress: tokio::sync::Mutex<Vec<String>>,
    sessions_started: tokio::sync::Mutex<Vec<String>>,
    sessions_closed: tokio::sync::Mutex<Vec<String>>,
    stream_closures: tokio::sync::Mutex<Vec<Option<JobError>>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self {
            states: tokio::sync::Mutex::new(Vec::new()),
            progress: tokio::sync::Mutex::new(Vec::new()),
            sessions_started: tokio::sync::Mutex::new(Vec::new()),
            sessions_closed: tokio::sync::Mutex::new(Vec::new()),
            stream_closures: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn states(&self) -> Vec<TrackerState> {
        self.states.lock().await.clone()
    }

    pub async fn progress(&self) -> Vec<String> {
        self.progress.lock().await.clone()
    }

    pub async fn sessions_started(&self) -> Vec<String> {
        self.sessions_started.lock().await.clone()
    }

    pub async fn sessions_closed(&self) -> Vec<String> {
        self.sessions_closed.lock().await.clone()
    }

    pub async fn stream_closures(&self) -> Vec<Option<JobError>> {
        self.stream_closures.lock().await.clone()
    }
}

impl Default for RecordingCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackerCallback for RecordingCallback {
    async fn on_state_change(&self, state: TrackerState, _handle: Option<&ExecutionHandle>) {
        self.states.lock().await.push(state);
    }

    async fn on_progress(&self, line: &str) {
        self.progress.lock().await.push(line.to_string());
    }

    async fn on_session_started(&self, handle: &ExecutionHandle) {
        self.sessions_started.lock().await.push(handle.to_string());
    }

    async fn on_session_closed(&self, handle: &ExecutionHandle) {
        self.sessions_closed.lock().await.push(handle.to_string());
    }

    async fn on_stream_closed(&self, _handle: &ExecutionHandle, error: Option<&JobError>) {
        self.stream_closures.lock().await.push(error.cloned());
    }
}

enum SessionEvent {
    Stream(ProgressEvent),
    Poll(Result<ExecutionStatus, JobError>),
}

/// Shared teardown state for one session.
struct SessionControl {
    handle: ExecutionHandle,
    generation: u64,
    cancel: CancellationToken,
    closed: AtomicBool,
    callback: Arc<dyn TrackerCallback>,
}

impl SessionControl {
    /// Stop the poller and close the stream. Only the first call has any effect.
    async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        debug!(execution_id = %self.handle, generation = self.generation, "Session closed");
        self.callback.on_session_closed(&self.handle).await;
        true
    }
}

struct Session {
    control: Arc<SessionControl>,
    tasks: Vec<JoinHandle<()>>,
}

/// Tracks one analysis job from submission to a terminal state.
pub struct ExecutionTracker {
    backend: Arc<dyn AnalysisBackend>,
    submitter: JobSubmitter,
    config: TrackerConfig,
    callback: Arc<dyn TrackerCallback>,
    status: Arc<watch::Sender<TrackerSnapshot>>,
    session: Option<Session>,
}

impl ExecutionTracker {
    pub fn new(backend: Arc<dyn AnalysisBackend>, config: TrackerConfig) -> Self {
        let (status, _) = watch::channel(TrackerSnapshot::default());
        Self {
            submitter: JobSubmitter::new(backend.clone()),
            backend,
            config,
            callback: Arc::new(NoOpCallback),
            status: Arc::new(status),
            session: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn TrackerCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> TrackerState {
        self.status.borrow().state
    }

    pub fn progress(&self) -> Vec<String> {
        self.status.borrow().progress.clone()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.status.subscribe()
    }

    /// Submit a job, replacing any job currently tracked.
    ///
    /// The previous session is torn down first: its poller stops and its stream
    /// closes before the new request goes out. On success the tracker is
    /// `Awaiting` and a new session is running. On failure it is `Failed` and
    /// nothing is left running.
    pub async fn submit(&mut self, request: AnalysisRequest) -> Result<ExecutionHandle, JobError> {
        self.end_session().await;

        let generation = self.status.borrow().generation + 1;
        let method = request.method();
        self.status.send_replace(TrackerSnapshot {
            generation,
            state: TrackerState::Submitting,
            method: Some(method),
            submitted_at: Some(Utc::now()),
            ..Default::default()
        });
        self.callback
            .on_state_change(TrackerState::Submitting, None)
            .await;

        let handle = match self.submitter.submit(&request).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "Submission failed");
                self.status.send_modify(|snap| {
                    snap.state = TrackerState::Failed;
                    snap.outcome = Some(JobOutcome::Failed(err.clone()));
                    snap.finished_at = Some(Utc::now());
                });
                self.callback.on_state_change(TrackerState::Failed, None).await;
                return Err(err);
            }
        };

        self.status.send_modify(|snap| {
            snap.state = TrackerState::Awaiting;
            snap.handle = Some(handle.clone());
            snap.stream_open = true;
        });
        self.callback
            .on_state_change(TrackerState::Awaiting, Some(&handle))
            .await;

        self.session = Some(self.start_session(handle.clone(), generation, method).await);
        Ok(handle)
    }

    /// Stop tracking the current job.
    ///
    /// An `Awaiting` job returns to `Idle` with its progress kept. A finished
    /// job keeps its outcome. The backend job itself is not cancelled.
    pub async fn cancel(&mut self) {
        self.end_session().await;
        let handle = self.status.borrow().handle.clone();
        let changed = self.status.send_if_modified(|snap| {
            if snap.state != TrackerState::Awaiting {
                return false;
            }
            snap.state = TrackerState::Idle;
            snap.stream_open = false;
            snap.finished_at = Some(Utc::now());
            true
        });
        if changed {
            info!(execution_id = ?handle.as_ref().map(|h| h.as_str()), "Job tracking cancelled");
            self.callback
                .on_state_change(TrackerState::Idle, handle.as_ref())
                .await;
        }
    }

    /// Wait until the current job leaves `Submitting`/`Awaiting`.
    pub async fn wait_for_terminal(&self) -> TrackerSnapshot {
        let mut rx = self.status.subscribe();
        wait_until_settled(&mut rx).await
    }

    async fn start_session(
        &self,
        handle: ExecutionHandle,
        generation: u64,
        method: Method,
    ) -> Session {
        let control = Arc::new(SessionControl {
            handle: handle.clone(),
            generation,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            callback: self.callback.clone(),
        });
        self.callback.on_session_started(&handle).await;
        info!(
            execution_id = %handle,
            generation,
            poll_interval_ms = self.config.poll_interval().as_millis() as u64,
            "Tracking job"
        );

        let (tx, rx) = mpsc::unbounded_channel();

        let poller = tokio::spawn(poll_status(
            self.backend.clone(),
            handle.clone(),
            self.config.poll_interval(),
            control.cancel.clone(),
            tx.clone(),
        ));

        let listener = ProgressListener::new(self.backend.clone(), handle);
        let cancel = control.cancel.clone();
        let stream = tokio::spawn(async move {
            listener
                .run(cancel, move |event| tx.send(SessionEvent::Stream(event)).is_ok())
                .await;
        });

        let driver = tokio::spawn(drive_session(
            control.clone(),
            self.status.clone(),
            rx,
            method,
        ));

        Session {
            control,
            tasks: vec![poller, stream, driver],
        }
    }

    /// Close the current session and wait for its tasks to exit.
    async fn end_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        session.control.close().await;
        for task in session.tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                warn!(execution_id = %session.control.handle, "Session task panicked");
            }
        }
        let generation = session.control.generation;
        self.status.send_if_modified(|snap| {
            if snap.generation != generation || !snap.stream_open {
                return false;
            }
            snap.stream_open = false;
            true
        });
        true
    }
}

impl Drop for ExecutionTracker {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.control.closed.store(true, Ordering::SeqCst);
            session.control.cancel.cancel();
            for task in &session.tasks {
                task.abort();
            }
        }
    }
}

/// Wait on a snapshot receiver until the job is no longer in flight.
pub async fn wait_until_settled(rx: &mut watch::Receiver<TrackerSnapshot>) -> TrackerSnapshot {
    let settled = rx
        .wait_for(|snap| !snap.state.is_active())
        .await
        .map(|snap| snap.clone());
    settled.unwrap_or_else(|_| rx.borrow().clone())
}

/// Apply `f` only if the snapshot still belongs to `generation`.
fn update_current<F>(status: &watch::Sender<TrackerSnapshot>, generation: u64, f: F) -> bool
where
    F: FnOnce(&mut TrackerSnapshot) -> bool,
{
    status.send_if_modified(|snap| snap.generation == generation && f(snap))
}

fn outcome_for(status: ExecutionStatus, method: Method) -> Option<JobOutcome> {
    match status {
        ExecutionStatus::Running { .. } => None,
        ExecutionStatus::Done(result) => Some(JobOutcome::Completed(Arc::new(
            AnalysisReport::build(&result, method),
        ))),
        ExecutionStatus::Error(payload) => Some(JobOutcome::Failed(JobError::Async { payload })),
    }
}

/// Poll on a fixed interval until a terminal status, a failure, or cancel.
///
/// The first poll happens one interval after start. Poll failures are terminal
/// and stop the loop.
async fn poll_status(
    backend: Arc<dyn AnalysisBackend>,
    handle: ExecutionHandle,
    period: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = backend.fetch_status(&handle) => result,
        };

        let stop = match &result {
            Ok(status) => {
                trace!(execution_id = %handle, status = status.label(), "Polled status");
                status.is_terminal()
            }
            Err(err) => {
                warn!(execution_id = %handle, error = %err, "Status poll failed");
                true
            }
        };
        if events.send(SessionEvent::Poll(result)).is_err() || stop {
            return;
        }
    }
}

/// Apply session events to the snapshot until the job finishes or is cancelled.
async fn drive_session(
    control: Arc<SessionControl>,
    status: Arc<watch::Sender<TrackerSnapshot>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    method: Method,
) {
    let generation = control.generation;
    loop {
        let event = tokio::select! {
            _ = control.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let (outcome, source) = match event {
            SessionEvent::Stream(ProgressEvent::Line(line)) => {
                let applied = update_current(&status, generation, |snap| {
                    if snap.state != TrackerState::Awaiting {
                        return false;
                    }
                    snap.progress.push(line.clone());
                    true
                });
                if applied {
                    control.callback.on_progress(&line).await;
                }
                continue;
            }
            SessionEvent::Stream(ProgressEvent::Closed { error }) => {
                update_current(&status, generation, |snap| {
                    let was_open = snap.stream_open;
                    snap.stream_open = false;
                    was_open
                });
                control
                    .callback
                    .on_stream_closed(&control.handle, error.as_ref())
                    .await;
                continue;
            }
            SessionEvent::Stream(ProgressEvent::Status(s)) => (outcome_for(s, method), "stream"),
            SessionEvent::Poll(Ok(s)) => (outcome_for(s, method), "poll"),
            SessionEvent::Poll(Err(err)) => (Some(JobOutcome::Failed(err)), "poll"),
        };

        let Some(outcome) = outcome else {
            continue;
        };
        finish(&control, &status, outcome, source).await;
        break;
    }
}

/// Terminal transition: close the session, then publish the outcome.
async fn finish(
    control: &SessionControl,
    status: &watch::Sender<TrackerSnapshot>,
    outcome: JobOutcome,
    source: &str,
) {
    control.close().await;

    let state = match outcome {
        JobOutcome::Completed(_) => TrackerState::Done,
        JobOutcome::Failed(_) => TrackerState::Failed,
    };
    let applied = update_current(status, control.generation, |snap| {
        if snap.state != TrackerState::Awaiting {
            return false;
        }
        snap.state = state;
        snap.outcome = Some(outcome);
        snap.stream_open = false;
        snap.finished_at = Some(Utc::now());
        true
    });

    if applied {
        info!(execution_id = %control.handle, state = %state, source, "Job finished");
        control
            .callback
            .on_state_change(state, Some(&control.handle))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, StreamStep};
    use crate::types::DatasetHandle;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> TrackerConfig {
        TrackerConfig {
            poll_interval_ms: 1000,
        }
    }

    fn ols_request() -> AnalysisRequest {
        AnalysisRequest::new(
            DatasetHandle::new("d.csv", &b"y,x1\n"[..]),
            "y",
            ["x1"],
            Method::Ols,
        )
    }

    #[test]
    fn test_state_predicates() {
        assert!(TrackerState::Awaiting.is_active());
        assert!(TrackerState::Submitting.is_active());
        assert!(!TrackerState::Idle.is_active());
        assert!(TrackerState::Done.is_terminal());
        assert!(TrackerState::Failed.is_terminal());
        assert_eq!(TrackerState::Awaiting.to_string(), "awaiting");
    }

    #[test]
    fn test_snapshot_accessors() {
        let snap = TrackerSnapshot {
            outcome: Some(JobOutcome::Failed(JobError::network("down"))),
            ..Default::default()
        };
        assert!(snap.report().is_none());
        assert_eq!(snap.error(), Some(&JobError::network("down")));
        assert!(snap.elapsed().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_waits_one_interval() {
        let mock = Arc::new(MockBackend::new());
        let mut tracker = ExecutionTracker::new(mock.clone(), config());
        tracker.submit(ols_request()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(mock.status_calls(), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(mock.status_calls(), 1);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mock.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_builds_report() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_status_payload(json!({
            "status": "done",
            "result": {"results": [{"variable": "x1", "estimate": 2.0, "std_error": 0.5}]}
        }));
        let mut tracker = ExecutionTracker::new(mock.clone(), config());
        tracker.submit(ols_request()).await.unwrap();

        let snap = tracker.wait_for_terminal().await;
        assert_eq!(snap.state, TrackerState::Done);
        let report = snap.report().unwrap();
        let ols = report.bundle.model(crate::results::ModelKind::Ols).unwrap();
        assert_eq!(ols.row("x1").unwrap().t_stat, Some(4.0));
        assert!(snap.elapsed().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_is_terminal() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_status(Err(JobError::network("connection refused")));
        let mut tracker = ExecutionTracker::new(mock.clone(), config());
        tracker.submit(ols_request()).await.unwrap();

        let snap = tracker.wait_for_terminal().await;
        assert_eq!(snap.state, TrackerState::Failed);
        assert_eq!(snap.error(), Some(&JobError::network("connection refused")));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_to_idle() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_stream(vec![StreamStep::chunk("loading\n")]);
        let callback = Arc::new(RecordingCallback::new());
        let mut tracker =
            ExecutionTracker::new(mock.clone(), config()).with_callback(callback.clone());
        tracker.submit(ols_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        tracker.cancel().await;
        let snap = tracker.snapshot();
        assert_eq!(snap.state, TrackerState::Idle);
        assert_eq!(snap.progress, vec!["loading"]);
        assert!(!snap.stream_open);
        assert_eq!(mock.open_streams(), 0);
        assert_eq!(callback.sessions_closed().await, vec!["exec-1"]);

        let polls = mock.status_calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.status_calls(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_session() {
        let mock = Arc::new(MockBackend::new());
        {
            let mut tracker = ExecutionTracker::new(mock.clone(), config());
            tracker.submit(ols_request()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(mock.open_streams(), 1);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.open_streams(), 0);
        let polls = mock.status_calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.status_calls(), polls);
    }
}
