//! Integration tests for the execution tracker against the scripted mock backend.
//!
//! All tests run on tokio's paused clock, so poll intervals and stream delays
//! advance deterministically.

use async_trait::async_trait;
use econo_core::backend::{AnalysisBackend, MockBackend, StreamStep};
use econo_core::results::ModelKind;
use econo_core::types::{DatasetProfile, ExecutionHandle};
use econo_core::{
    AnalysisRequest, DatasetHandle, ExecutionStatus, ExecutionTracker, JobError, Method,
    RecordingCallback, TrackerCallback, TrackerConfig, TrackerState,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

fn config(ms: u64) -> TrackerConfig {
    TrackerConfig {
        poll_interval_ms: ms,
    }
}

fn dataset() -> DatasetHandle {
    DatasetHandle::new("panel.csv", &b"firm,year,y,x1\n1,2020,3.0,1.0\n"[..])
}

fn ols_request() -> AnalysisRequest {
    AnalysisRequest::new(dataset(), "y", ["x1"], Method::Ols)
}

fn setup(ms: u64) -> (Arc<MockBackend>, Arc<RecordingCallback>, ExecutionTracker) {
    let mock = Arc::new(MockBackend::new());
    let callback = Arc::new(RecordingCallback::new());
    let tracker = ExecutionTracker::new(mock.clone(), config(ms)).with_callback(callback.clone());
    (mock, callback, tracker)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Records like `RecordingCallback`, but parks the driver inside the first
/// `on_progress` call until `gate` is notified.
struct GatedCallback {
    gate: Arc<Notify>,
    held: AtomicBool,
    inner: RecordingCallback,
}

impl GatedCallback {
    fn new(gate: Arc<Notify>) -> Self {
        Self {
            gate,
            held: AtomicBool::new(false),
            inner: RecordingCallback::new(),
        }
    }
}

#[async_trait]
impl TrackerCallback for GatedCallback {
    async fn on_state_change(&self, state: TrackerState, handle: Option<&ExecutionHandle>) {
        self.inner.on_state_change(state, handle).await;
    }

    async fn on_progress(&self, line: &str) {
        if !self.held.swap(true, Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.inner.on_progress(line).await;
    }

    async fn on_session_closed(&self, handle: &ExecutionHandle) {
        self.inner.on_session_closed(handle).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_done_while_streaming_progress() {
    let (mock, callback, mut tracker) = setup(1000);
    mock.queue_status(Ok(ExecutionStatus::running()));
    mock.queue_status(Ok(ExecutionStatus::running()));
    mock.queue_status_payload(json!({
        "status": "done",
        "result": {"results": [
            {"variable": "Intercept", "estimate": 0.3, "std_error": 0.1},
            {"variable": "x1", "estimate": 2.0, "std_error": 0.5, "p_value": 0.02}
        ]}
    }));
    mock.queue_stream(vec![
        StreamStep::chunk("step1\n"),
        StreamStep::delay_ms(500),
        StreamStep::chunk("step2\n"),
    ]);

    let handle = tracker.submit(ols_request()).await.unwrap();
    assert_eq!(handle.as_str(), "exec-1");
    assert_eq!(tracker.state(), TrackerState::Awaiting);

    let snap = tracker.wait_for_terminal().await;
    assert_eq!(snap.state, TrackerState::Done);
    assert_eq!(snap.progress, vec!["step1", "step2"]);
    assert!(!snap.stream_open);

    let report = snap.report().unwrap();
    let ols = report.bundle.model(ModelKind::Ols).unwrap();
    assert_eq!(ols.row("x1").unwrap().t_stat, Some(4.0));
    assert_eq!(report.summary.rows.len(), 1);

    settle().await;
    assert_eq!(mock.streams_opened(), 1);
    assert_eq!(mock.streams_closed(), 1);
    assert_eq!(callback.sessions_closed().await, vec!["exec-1"]);
    assert_eq!(
        callback.states().await,
        vec![
            TrackerState::Submitting,
            TrackerState::Awaiting,
            TrackerState::Done
        ]
    );
    assert_eq!(callback.progress().await, vec!["step1", "step2"]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_terminal_reports_apply_once() {
    let mock = Arc::new(MockBackend::new());
    let gate = Arc::new(Notify::new());
    let callback = Arc::new(GatedCallback::new(gate.clone()));
    let mut tracker =
        ExecutionTracker::new(mock.clone(), config(1000)).with_callback(callback.clone());

    let pushed = json!({"status": "done", "result": {"results": [{"variable": "x1", "estimate": 1.0}]}});
    mock.queue_stream(vec![
        StreamStep::chunk("fitting\n"),
        StreamStep::delay_ms(500),
        StreamStep::chunk(format!("{pushed}\n")),
    ]);
    mock.queue_status_payload(
        json!({"status": "done", "result": {"results": [{"variable": "x1", "estimate": 2.0}]}}),
    );

    tracker.submit(ols_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // The driver is still parked on "fitting"; both terminal reports are queued behind it.
    assert_eq!(mock.chunks_sent(), 2);
    assert_eq!(mock.status_calls(), 1);
    assert_eq!(mock.pending_statuses(), 0);
    assert_eq!(tracker.state(), TrackerState::Awaiting);

    gate.notify_one();
    let snap = tracker.wait_for_terminal().await;
    assert_eq!(snap.state, TrackerState::Done);
    assert_eq!(snap.progress, vec!["fitting"]);
    let report = snap.report().unwrap();
    assert_eq!(report.bundle.model(ModelKind::Ols).unwrap().estimate("x1"), Some(1.0));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        callback.inner.states().await,
        vec![
            TrackerState::Submitting,
            TrackerState::Awaiting,
            TrackerState::Done
        ]
    );
    assert_eq!(callback.inner.sessions_closed().await, vec!["exec-1"]);
    assert_eq!(mock.open_streams(), 0);
    assert_eq!(mock.status_calls(), 1);
    assert_eq!(tracker.snapshot().report().unwrap().bundle, report.bundle);
}

#[tokio::test(start_paused = true)]
async fn test_plain_stream_keeps_every_line() {
    let (mock, callback, mut tracker) = setup(1000);
    mock.queue_stream(vec![StreamStep::chunk(
        "id: 42 rows dropped\n: cleaning panel\nevent: fitting FE\nretry: singular, retrying with ridge\n\nstep5\n",
    )]);
    mock.queue_status_payload(json!({"status": "done", "result": {}}));

    tracker.submit(ols_request()).await.unwrap();
    let snap = tracker.wait_for_terminal().await;

    let expected = vec![
        "id: 42 rows dropped",
        ": cleaning panel",
        "event: fitting FE",
        "retry: singular, retrying with ridge",
        "",
        "step5",
    ];
    assert_eq!(snap.state, TrackerState::Done);
    assert_eq!(snap.progress, expected);
    assert_eq!(callback.progress().await, expected);
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_drops_framing_only() {
    let (mock, _callback, mut tracker) = setup(1000);
    mock.queue_event_stream(vec![
        StreamStep::chunk(": keepalive\nid: 1\nevent: progress\ndata: loading\n\n"),
        StreamStep::chunk("retry: 5000\ndata: fitting FE\n\n"),
    ]);
    mock.queue_status_payload(json!({"status": "done", "result": {}}));

    tracker.submit(ols_request()).await.unwrap();
    let snap = tracker.wait_for_terminal().await;
    assert_eq!(snap.progress, vec!["loading", "fitting FE"]);
}

#[tokio::test(start_paused = true)]
async fn test_request_built_from_inspected_profile() {
    let profile = DatasetProfile {
        columns: vec!["firm".into(), "year".into(), "y".into(), "x1".into()],
        auto_dependent_variable: "y".into(),
        suggested_predictors: vec!["x1".into(), "y".into()],
        auto_id_candidates: vec!["firm".into()],
        auto_time_candidates: vec!["year".into()],
    };
    let mock = Arc::new(MockBackend::new().with_profile(profile));
    let mut tracker = ExecutionTracker::new(mock.clone(), config(1000));

    let inspected = mock.inspect(&dataset()).await.unwrap();
    let request = AnalysisRequest::from_profile(dataset(), &inspected, Method::FixedEffects)
        .with_panel("firm", "year");
    tracker.submit(request).await.unwrap();

    assert_eq!(
        mock.calls()[..2],
        [
            econo_core::backend::BackendCall::Inspect {
                file_name: "panel.csv".into()
            },
            econo_core::backend::BackendCall::Analyze {
                method: "panel_fe".into(),
                dependent: "y".into(),
                predictors: vec!["x1".into()],
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_terminal_status_finishes_before_first_poll() {
    let (mock, _callback, mut tracker) = setup(1000);
    mock.queue_stream(vec![
        StreamStep::chunk("estimating\n"),
        StreamStep::delay_ms(100),
        StreamStep::chunk("data: {\"status\": \"success\", \"result\": {}}\n"),
    ]);

    tracker.submit(ols_request()).await.unwrap();
    let snap = tracker.wait_for_terminal().await;
    assert_eq!(snap.state, TrackerState::Done);
    assert_eq!(snap.progress, vec!["estimating"]);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(mock.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resubmit_tears_down_previous_session() {
    let (mock, callback, mut tracker) = setup(1000);
    mock.queue_stream(vec![StreamStep::chunk("first job\n")]);
    mock.queue_stream(vec![StreamStep::chunk("second job\n")]);

    tracker.submit(ols_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tracker.progress(), vec!["first job"]);
    assert_eq!(mock.open_streams(), 1);

    let second = tracker.submit(ols_request()).await.unwrap();
    assert_eq!(second.as_str(), "exec-2");
    assert_eq!(mock.streams_closed(), 1);
    assert_eq!(callback.sessions_closed().await, vec!["exec-1"]);

    settle().await;
    assert_eq!(mock.streams_opened(), 2);
    assert_eq!(mock.open_streams(), 1);

    let snap = tracker.snapshot();
    assert_eq!(snap.generation, 2);
    assert_eq!(snap.handle.as_ref().map(|h| h.as_str()), Some("exec-2"));
    assert_eq!(snap.progress, vec!["second job"]);

    let first_polls = mock.status_calls_for("exec-1");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mock.status_calls_for("exec-1"), first_polls);
    assert!(mock.status_calls_for("exec-2") >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_makes_no_calls() {
    let (mock, callback, mut tracker) = setup(1000);
    let request = AnalysisRequest::new(dataset(), "y", ["x1"], Method::FixedEffects);

    let err = tracker.submit(request).await.unwrap_err();
    assert!(matches!(err, JobError::Validation { .. }));
    assert_eq!(err.to_string(), "Invalid request: Fixed Effects requires panel_id and panel_time");

    let snap = tracker.snapshot();
    assert_eq!(snap.state, TrackerState::Failed);
    assert_eq!(snap.error(), Some(&err));
    assert!(snap.handle.is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(mock.calls().is_empty());
    assert!(callback.sessions_started().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_submission_error_starts_nothing() {
    let (mock, _callback, mut tracker) = setup(1000);
    mock.queue_analyze(Err(JobError::network("connection refused")));

    let err = tracker.submit(ols_request()).await.unwrap_err();
    assert_eq!(err.kind(), "network");
    assert_eq!(tracker.state(), TrackerState::Failed);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mock.analyze_calls(), 1);
    assert_eq!(mock.status_calls(), 0);
    assert_eq!(mock.streams_opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_does_not_fail_job() {
    let (mock, callback, mut tracker) = setup(1000);
    mock.queue_stream(vec![
        StreamStep::chunk("a\n"),
        StreamStep::delay_ms(100),
        StreamStep::Fail("connection reset".into()),
    ]);
    mock.queue_status(Ok(ExecutionStatus::running()));
    mock.queue_status(Ok(ExecutionStatus::running()));
    mock.queue_status_payload(json!({"status": "done", "result": {}}));

    tracker.submit(ols_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let snap = tracker.snapshot();
    assert_eq!(snap.state, TrackerState::Awaiting);
    assert!(!snap.stream_open);
    assert_eq!(
        callback.stream_closures().await,
        vec![Some(JobError::network("connection reset"))]
    );

    let snap = tracker.wait_for_terminal().await;
    assert_eq!(snap.state, TrackerState::Done);
    assert_eq!(snap.progress, vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn test_async_error_keeps_progress_and_payload() {
    let (mock, callback, mut tracker) = setup(1000);
    mock.queue_stream(vec![
        StreamStep::chunk("loading\n"),
        StreamStep::chunk("fitting\n"),
    ]);
    let payload = json!({"status": "error", "message": "singular matrix", "code": 422});
    mock.queue_status_payload(payload.clone());

    tracker.submit(ols_request()).await.unwrap();
    let snap = tracker.wait_for_terminal().await;

    assert_eq!(snap.state, TrackerState::Failed);
    assert_eq!(snap.progress, vec!["loading", "fitting"]);
    assert_eq!(snap.error(), Some(&JobError::Async { payload }));
    assert!(snap.report().is_none());

    settle().await;
    assert_eq!(mock.open_streams(), 0);
    assert_eq!(callback.sessions_closed().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hausman_job_builds_fe_re_comparison() {
    let (mock, _callback, mut tracker) = setup(500);
    mock.queue_status_payload(json!({
        "status": "Done",
        "result": {
            "fixed_effects": {"results": [{"feature": "x1", "estimate": 1.5, "std_error": 0.3}]},
            "random_effects": {"results": [{"feature": "x1", "estimate": 1.2, "std_error": 0.2}]},
            "hausman": {"df": 1, "statistic": 3.2, "pvalue": 0.07, "interpretation": "RE is consistent"}
        }
    }));
    let request = AnalysisRequest::new(dataset(), "y", ["x1"], Method::Hausman)
        .with_panel("firm", "year");

    tracker.submit(request).await.unwrap();
    let snap = tracker.wait_for_terminal().await;
    let report = snap.report().unwrap();

    let cmp = report.fe_re.as_ref().unwrap();
    assert_eq!(cmp.rows.len(), 1);
    assert!((cmp.rows[0].difference.unwrap() - 0.3).abs() < 1e-12);
    assert_eq!(cmp.hausman.as_ref().unwrap().interpretation, "RE is consistent");
    assert_eq!(
        mock.calls()[0],
        econo_core::backend::BackendCall::Analyze {
            method: "panel_hausman".into(),
            dependent: "y".into(),
            predictors: vec!["x1".into()],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_see_progress() {
    let (mock, _callback, mut tracker) = setup(1000);
    mock.queue_stream(vec![StreamStep::chunk("one\ntwo\n")]);
    mock.queue_status_payload(json!({"status": "done", "result": {}}));

    tracker.submit(ols_request()).await.unwrap();
    let mut rx = tracker.subscribe();
    let snap = econo_core::tracker::wait_until_settled(&mut rx).await;
    assert_eq!(snap.progress, vec!["one", "two"]);
    assert!(rx.borrow().state.is_terminal());
}
