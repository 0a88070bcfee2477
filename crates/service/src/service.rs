use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use file_organizer_core::{
    CancelToken, ChannelSink, DedupeOptions, Engine, EngineConfig, EngineError, EngineEvent,
    OrganizeOutcome, PipelineOptions, PipelineOutput, QuarantineOutcome, RestoreOutcome,
    SortRequest, SummaryReport,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Scan, detect duplicates, classify and sort. Touches no files.
    Pipeline,
    /// Pipeline, optional quarantine, then move files into category folders.
    Organize,
    /// Pipeline with duplicate detection, then quarantine delete candidates.
    Quarantine,
    /// Move everything in the recovery folder back to the root.
    Restore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub job: JobKind,
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub include_subfolders: bool,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default = "default_true")]
    pub detect_duplicates: bool,
    #[serde(default = "default_true")]
    pub classify: bool,
    #[serde(default)]
    pub sort: Option<SortRequest>,
    #[serde(default)]
    pub quarantine_duplicates: bool,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub config: Option<EngineConfig>,
}

fn default_true() -> bool {
    true
}

impl SessionRequest {
    pub fn new(job: JobKind, root: impl Into<PathBuf>) -> Self {
        Self {
            session_id: None,
            job,
            root: root.into(),
            include_subfolders: true,
            include_hidden: false,
            excludes: Vec::new(),
            detect_duplicates: true,
            classify: true,
            sort: None,
            quarantine_duplicates: false,
            output_dir: None,
            config: None,
        }
    }

    fn pipeline_options(&self, engine: &Engine, force_dedupe: bool) -> PipelineOptions {
        PipelineOptions {
            include_subfolders: self.include_subfolders,
            include_hidden: self.include_hidden,
            excludes: self.excludes.clone(),
            dedupe: (self.detect_duplicates || force_dedupe).then(DedupeOptions::default),
            classify: self.classify.then(|| engine.classify_options()),
            sort: self.sort,
            ..PipelineOptions::new(&self.root)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionResult {
    Pipeline(PipelineOutput),
    Organize {
        summary: SummaryReport,
        quarantine: Option<QuarantineOutcome>,
        outcome: OrganizeOutcome,
    },
    Quarantine(QuarantineOutcome),
    Restore(RestoreOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub job: JobKind,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub total_events: u64,
    pub summary: Option<SummaryReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

struct Session {
    job: JobKind,
    status: SessionStatus,
    error: Option<String>,
    result: Option<SessionResult>,
    summary: Option<SummaryReport>,
    events: Vec<EngineEvent>,
    receiver: Receiver<EngineEvent>,
    cancel: CancelToken,
}

impl Session {
    fn drain_events(&mut self) {
        self.events.extend(self.receiver.try_iter());
    }
}

type JobOutput = (SessionResult, Option<SummaryReport>);
type JobRunner = Box<dyn FnOnce(&mut ChannelSink, &CancelToken) -> Result<JobOutput> + Send>;

struct QueuedJob {
    session_id: String,
    runner: JobRunner,
    cancel: CancelToken,
    events: Sender<EngineEvent>,
}

static SESSIONS: Lazy<Mutex<HashMap<String, Session>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Jobs run one at a time on a single background worker, in submission order.
static WORKER: Lazy<Mutex<Sender<QueuedJob>>> = Lazy::new(|| {
    let (sender, receiver) = mpsc::channel::<QueuedJob>();
    thread::spawn(move || {
        for job in receiver {
            run_job(job);
        }
    });
    Mutex::new(sender)
});

/// Queues a job and returns its session id immediately.
pub fn start_session(request: SessionRequest) -> Result<String> {
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let job = request.job;
    submit(
        session_id,
        job,
        Box::new(move |sink: &mut ChannelSink, cancel: &CancelToken| {
            execute(&request, sink, cancel)
        }),
    )
}

fn submit(session_id: String, job: JobKind, runner: JobRunner) -> Result<String> {
    let cancel = CancelToken::new();
    let (events, receiver) = mpsc::channel();

    {
        let mut sessions = lock_sessions()?;
        if sessions
            .get(&session_id)
            .is_some_and(|existing| !existing.status.is_finished())
        {
            bail!("session {session_id} is still active");
        }
        sessions.insert(
            session_id.clone(),
            Session {
                job,
                status: SessionStatus::Queued,
                error: None,
                result: None,
                summary: None,
                events: Vec::new(),
                receiver,
                cancel: cancel.clone(),
            },
        );
    }

    let queued = QueuedJob {
        session_id: session_id.clone(),
        runner,
        cancel,
        events,
    };
    let worker = WORKER
        .lock()
        .map_err(|_| anyhow!("worker queue lock poisoned"))?;
    if worker.send(queued).is_err() {
        drop(worker);
        update_session(&session_id, |session| {
            session.status = SessionStatus::Failed;
            session.error = Some("worker thread is not running".to_string());
        });
        bail!("worker thread is not running");
    }
    Ok(session_id)
}

pub fn poll_session_events(session_id: &str, from_seq: u64) -> Result<Vec<EngineEvent>> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
    session.drain_events();

    Ok(session
        .events
        .iter()
        .filter(|event| event.seq > from_seq)
        .cloned()
        .collect())
}

pub fn get_session(session_id: &str) -> Result<SessionSnapshot> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
    session.drain_events();

    Ok(SessionSnapshot {
        session_id: session_id.to_string(),
        job: session.job,
        status: session.status,
        error: session.error.clone(),
        total_events: session.events.len() as u64,
        summary: session.summary.clone(),
    })
}

/// Full outcome of a finished job; `None` while it is queued or running.
pub fn get_session_result(session_id: &str) -> Result<Option<SessionResult>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
    Ok(session.result.clone())
}

/// Requests cancellation. A queued job ends `Cancelled` at once; a running
/// job stays `Running` until the worker observes the flag and records the
/// final status.
pub fn cancel_session(session_id: &str) -> Result<CancelSessionResponse> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;

    session.cancel.cancel();
    if session.status == SessionStatus::Queued {
        session.status = SessionStatus::Cancelled;
    }

    Ok(CancelSessionResponse {
        session_id: session_id.to_string(),
        status: session.status,
    })
}

fn run_job(job: QueuedJob) {
    let QueuedJob {
        session_id,
        runner,
        cancel,
        events,
    } = job;

    let mut started = false;
    update_session(&session_id, |session| {
        if session.status == SessionStatus::Queued && !cancel.is_cancelled() {
            session.status = SessionStatus::Running;
            started = true;
        }
    });
    if !started {
        info!(%session_id, "skipping job cancelled while queued");
        return;
    }

    let mut sink = ChannelSink::new(events);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner(&mut sink, &cancel)))
        .unwrap_or_else(|payload| Err(anyhow!("job panicked: {}", panic_message(&*payload))));

    update_session(&session_id, |session| match outcome {
        Ok((result, summary)) => {
            session.status = if cancel.is_cancelled() {
                SessionStatus::Cancelled
            } else {
                SessionStatus::Completed
            };
            session.result = Some(result);
            session.summary = summary;
            session.error = None;
        }
        Err(err) => {
            let cancelled = matches!(
                err.downcast_ref::<EngineError>(),
                Some(EngineError::Cancelled)
            );
            if cancelled {
                session.status = SessionStatus::Cancelled;
            } else {
                warn!(%session_id, "job failed: {err:#}");
                session.status = SessionStatus::Failed;
                session.error = Some(format!("{err:#}"));
            }
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn execute(
    request: &SessionRequest,
    sink: &mut ChannelSink,
    cancel: &CancelToken,
) -> Result<JobOutput> {
    let engine = Engine::new(request.config.clone().unwrap_or_default())
        .context("failed to initialise engine")?;
    let root = request.root.as_path();

    match request.job {
        JobKind::Pipeline => {
            let options = request.pipeline_options(&engine, false);
            let output = engine.run_pipeline(&options, sink, cancel)?;
            let summary = output.summary(0);
            Ok((SessionResult::Pipeline(output), Some(summary)))
        }
        JobKind::Organize => {
            let options = request.pipeline_options(&engine, request.quarantine_duplicates);
            let mut output = engine.run_pipeline(&options, sink, cancel)?;
            let quarantine = request
                .quarantine_duplicates
                .then(|| engine.quarantine(&mut output.records, root, sink, cancel));
            let destination = request
                .output_dir
                .clone()
                .unwrap_or_else(|| engine.output_dir(root));
            let outcome = engine.organize(&mut output.records, &destination, sink, cancel);
            let recovered = quarantine.as_ref().map_or(0, |q| q.bytes_freed);
            let summary = output.summary(recovered);
            Ok((
                SessionResult::Organize {
                    summary: summary.clone(),
                    quarantine,
                    outcome,
                },
                Some(summary),
            ))
        }
        JobKind::Quarantine => {
            let options = request.pipeline_options(&engine, true);
            let mut output = engine.run_pipeline(&options, sink, cancel)?;
            let outcome = engine.quarantine(&mut output.records, root, sink, cancel);
            let summary = output.summary(outcome.bytes_freed);
            Ok((SessionResult::Quarantine(outcome), Some(summary)))
        }
        JobKind::Restore => {
            let outcome = engine.restore(root, sink, cancel);
            Ok((SessionResult::Restore(outcome), None))
        }
    }
}

fn update_session(session_id: &str, update: impl FnOnce(&mut Session)) {
    match lock_sessions() {
        Ok(mut sessions) => {
            if let Some(session) = sessions.get_mut(session_id) {
                update(session);
            }
        }
        Err(err) => warn!(%session_id, "{err}"),
    }
}

fn lock_sessions() -> Result<MutexGuard<'static, HashMap<String, Session>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("session registry lock poisoned"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use file_organizer_core::EventKind;
    use tempfile::TempDir;

    use file_organizer_core::{CancelToken, ChannelSink, EngineConfig, EngineError};

    use super::{
        cancel_session, get_session, get_session_result, poll_session_events, start_session,
        submit, JobKind, JobOutput, SessionRequest, SessionResult, SessionSnapshot, SessionStatus,
    };

    fn wait_for(session_id: &str) -> SessionSnapshot {
        let started = Instant::now();
        loop {
            let snapshot = get_session(session_id).expect("session exists");
            if snapshot.status.is_finished() {
                return snapshot;
            }
            assert!(started.elapsed() < Duration::from_secs(30));
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    fn fixture(root: &Path) {
        fs::write(root.join("a.txt"), "hello").expect("write");
        fs::write(root.join("b.txt"), "hello").expect("write");
        fs::write(root.join("c.txt"), "123456789").expect("write");
    }

    #[test]
    fn pipeline_session_completes_with_events() {
        let temp = TempDir::new().expect("tempdir");
        fixture(temp.path());

        let session_id =
            start_session(SessionRequest::new(JobKind::Pipeline, temp.path())).expect("started");
        let snapshot = wait_for(&session_id);
        assert_eq!(snapshot.status, SessionStatus::Completed, "{:?}", snapshot.error);
        assert!(snapshot.total_events >= 5);
        assert_eq!(snapshot.summary.as_ref().map(|s| s.files_processed), Some(3));

        let events = poll_session_events(&session_id, 0).expect("events");
        assert!(events
            .iter()
            .any(|event| event.kind == EventKind::Progress && event.fraction == Some(1.0)));
        let later = poll_session_events(&session_id, events[1].seq).expect("events");
        assert_eq!(later.len(), events.len() - 2);

        match get_session_result(&session_id).expect("result") {
            Some(SessionResult::Pipeline(output)) => assert_eq!(output.duplicates.len(), 1),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn quarantine_and_restore_sessions_round_trip() {
        let temp = TempDir::new().expect("tempdir");
        fixture(temp.path());

        let quarantine =
            start_session(SessionRequest::new(JobKind::Quarantine, temp.path())).expect("started");
        assert_eq!(wait_for(&quarantine).status, SessionStatus::Completed);
        assert!(temp.path().join(".recovery").join("b.txt").is_file());

        let restore =
            start_session(SessionRequest::new(JobKind::Restore, temp.path())).expect("started");
        assert_eq!(wait_for(&restore).status, SessionStatus::Completed);
        match get_session_result(&restore).expect("result") {
            Some(SessionResult::Restore(outcome)) => {
                assert_eq!(outcome.count, 1);
                assert!(outcome.recovery_dir_removed);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(temp.path().join("b.txt").is_file());
    }

    #[test]
    fn missing_root_fails_the_session() {
        let temp = TempDir::new().expect("tempdir");
        let session_id = start_session(SessionRequest::new(
            JobKind::Pipeline,
            temp.path().join("missing"),
        ))
        .expect("started");
        let snapshot = wait_for(&session_id);
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert!(snapshot.error.is_some());
    }

    #[test]
    fn cancelled_session_ends_cancelled() {
        let temp = TempDir::new().expect("tempdir");
        fixture(temp.path());

        let session_id =
            start_session(SessionRequest::new(JobKind::Organize, temp.path())).expect("started");
        let response = cancel_session(&session_id).expect("cancel response");
        assert_eq!(response.session_id, session_id);

        let snapshot = wait_for(&session_id);
        if response.status != SessionStatus::Completed {
            assert_eq!(snapshot.status, SessionStatus::Cancelled);
        }
    }

    #[test]
    fn worker_survives_a_panicking_job() {
        let temp = TempDir::new().expect("tempdir");
        fixture(temp.path());

        let crashed = submit(
            "panicking-job".to_string(),
            JobKind::Pipeline,
            Box::new(
                |_: &mut ChannelSink, _: &CancelToken| -> anyhow::Result<JobOutput> {
                    panic!("boom")
                },
            ),
        )
        .expect("queued");
        let next =
            start_session(SessionRequest::new(JobKind::Pipeline, temp.path())).expect("started");

        let snapshot = wait_for(&crashed);
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert!(snapshot.error.as_deref().is_some_and(|e| e.contains("boom")));
        assert_eq!(wait_for(&next).status, SessionStatus::Completed);
    }

    #[test]
    fn out_of_range_config_fails_without_stopping_the_worker() {
        let temp = TempDir::new().expect("tempdir");
        fixture(temp.path());

        let mut request = SessionRequest::new(JobKind::Pipeline, temp.path());
        request.config = Some(EngineConfig {
            recent_window_days: 1_000_000_000_000,
            ..EngineConfig::default()
        });
        let rejected = start_session(request).expect("started");
        let next =
            start_session(SessionRequest::new(JobKind::Pipeline, temp.path())).expect("started");

        assert_eq!(wait_for(&rejected).status, SessionStatus::Failed);
        assert_eq!(wait_for(&next).status, SessionStatus::Completed);
    }

    #[test]
    fn cancelling_a_running_job_keeps_its_id_reserved() {
        let temp = TempDir::new().expect("tempdir");
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let session_id = "running-cancel".to_string();

        submit(
            session_id.clone(),
            JobKind::Pipeline,
            Box::new(
                move |_: &mut ChannelSink, cancel: &CancelToken| -> anyhow::Result<JobOutput> {
                    started_tx.send(()).expect("signal start");
                    release_rx.recv().expect("released");
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled.into());
                    }
                    Err(anyhow::anyhow!("cancel flag was not observed"))
                },
            ),
        )
        .expect("queued");
        started_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("job started");

        let response = cancel_session(&session_id).expect("cancel response");
        assert_eq!(response.status, SessionStatus::Running);

        let mut reuse = SessionRequest::new(JobKind::Pipeline, temp.path());
        reuse.session_id = Some(session_id.clone());
        assert!(start_session(reuse).is_err());

        release_tx.send(()).expect("release job");
        assert_eq!(wait_for(&session_id).status, SessionStatus::Cancelled);
    }

    #[test]
    fn request_json_uses_defaults() {
        let request: SessionRequest =
            serde_json::from_str(r#"{ "job": "restore", "root": "/data" }"#).expect("parse");
        assert_eq!(request.job, JobKind::Restore);
        assert!(request.include_subfolders);
        assert!(request.detect_duplicates);
        assert!(request.config.is_none());
    }

    #[test]
    fn unknown_session_is_an_error() {
        assert!(get_session("no-such-session").is_err());
        assert!(poll_session_events("no-such-session", 0).is_err());
        assert!(cancel_session("no-such-session").is_err());
    }
}
