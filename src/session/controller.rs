// src/session/controller.rs
//! Session controller
//!
//! Owns the single session slot and drives it through
//! Idle → Opening → Recording → Closing → Idle:
//! - Allocating the session directory, blob store and event log
//! - Attaching to the automation target and dispatching its callbacks
//! - Periodic DOM draining and health probing while recording
//! - Bounded, best-effort finalization (HAR verification and rebuild,
//!   metadata) that always runs once a stop begins

use crate::automation::narration::Narrator;
use crate::automation::raw::RawEvent;
use crate::automation::{normalize_url, with_timeout, AutomationTarget};
use crate::recording::blob_store::BlobStore;
use crate::recording::event::EventType;
use crate::recording::event_log::{EventLog, OffloadConfig, WriteOrigin};
use crate::recording::har::{self, HAR_FILE};
use crate::recording::metadata::{SessionMetadata, BLOB_DIR, EVENT_LOG_FILE};
use crate::session::health::HealthMonitor;
use crate::session::policy::ClosingPolicy;
use crate::session::state::{PhaseCell, SessionPhase};
use crate::tracking::{DomBridge, SessionCounters, Snapshotter, Trackers};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, ErrorClass, LifecycleError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Parameters for a new recording
#[derive(Debug, Clone, Default)]
pub struct RecordingRequest {
    /// Recording user, also the session directory's parent
    pub user: String,

    /// Free-form description stored in `session_start`
    pub description: String,

    /// Page to open once recording has started
    pub initial_url: Option<String>,
}

/// Returned by a successful `start_recording`
#[derive(Debug, Clone, Serialize)]
pub struct SessionStarted {
    pub session_id: String,
    pub session_dir: PathBuf,
    pub start_time: String,
}

/// Best-effort outcome of `stop_recording`
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub success: bool,
    pub session_id: String,
    pub session_dir: PathBuf,
    pub metadata_path: Option<PathBuf>,
    pub duration_seconds: f64,
    pub events_count: u64,
    pub har_reconstructed: bool,
    /// Non-fatal storage and narration problems hit while finalizing
    pub warnings: Vec<String>,
}

/// Live numbers for a status line
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub elapsed_seconds: f64,
    #[serde(flatten)]
    pub counters: SessionCounters,
}

/// Everything owned by the session in the slot
struct ActiveSession {
    session_id: String,
    session_dir: PathBuf,
    start_time: DateTime<Utc>,
    target: Arc<dyn AutomationTarget>,
    log: Arc<EventLog>,
    trackers: Arc<Trackers>,
    dom: Arc<DomBridge>,
    snapshots: Arc<Snapshotter>,
    health: Arc<HealthMonitor>,
    dispatcher: JoinHandle<()>,
    /// Set once narration has started
    narrator: Option<Arc<dyn Narrator>>,
}

/// `<user>_<YYYYmmdd_HHMMSS>_<8 hex>`
pub fn generate_session_id(user: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{:08x}",
        sanitize_user(user),
        now.format("%Y%m%d_%H%M%S"),
        rand::random::<u32>()
    )
}

/// Keep user names usable as a single path component
fn sanitize_user(user: &str) -> String {
    let cleaned: String = user
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        "anonymous".to_string()
    } else {
        cleaned
    }
}

/// Run a blocking narrator call on the blocking pool under a timeout
async fn blocking_with_timeout<T, F>(limit: Duration, what: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(EngineError::ExternalTarget(format!("{} failed: {}", what, e))),
        Err(_) => Err(EngineError::Timeout(format!("{} after {:?}", what, limit))),
    }
}

/// Forward raw callbacks to the trackers until the target hangs up
fn spawn_dispatcher(
    mut events: mpsc::UnboundedReceiver<RawEvent>,
    trackers: Arc<Trackers>,
    snapshots: Arc<Snapshotter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(url) = trackers.dispatch(event) {
                debug!("Navigated to {}", url);
                let snapshots = snapshots.clone();
                tokio::spawn(async move {
                    snapshots
                        .capture_or_report("navigation", WriteOrigin::Producer)
                        .await;
                });
            }
        }
        debug!("Raw event stream ended");
    })
}

/// Single-slot capture session manager
pub struct SessionController {
    /// Engine configuration
    config: EngineConfig,

    /// Clock for session ids, durations and event timestamps
    clock: Arc<dyn Clock>,

    /// Lifecycle phase, shared with every producer through `policy`
    phase: PhaseCell,

    /// Closing policy handed to every producer
    policy: ClosingPolicy,

    /// The session slot
    active: Mutex<Option<ActiveSession>>,

    /// Narration collaborator started with each session
    narrator: Mutex<Option<Arc<dyn Narrator>>>,
}

impl SessionController {
    /// Create a controller using the system clock
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a controller with an injected clock
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let phase = PhaseCell::new();
        Self {
            config,
            clock,
            policy: ClosingPolicy::new(phase.clone()),
            phase,
            active: Mutex::new(None),
            narrator: Mutex::new(None),
        }
    }

    /// Start audio narration alongside every later session
    pub fn attach_narrator(&self, narrator: Arc<dyn Narrator>) {
        *self.narrator.lock() = Some(narrator);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    pub fn is_recording(&self) -> bool {
        self.policy.is_recording()
    }

    /// Start a new session against `target`
    pub async fn start_recording(
        &self,
        target: Arc<dyn AutomationTarget>,
        request: RecordingRequest,
    ) -> Result<SessionStarted> {
        self.phase
            .transition(SessionPhase::Idle, SessionPhase::Opening)?;

        let session = match self.open_session(target, &request).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to start recording: {}", e);
                let _ = self.phase.transition(SessionPhase::Opening, SessionPhase::Idle);
                return Err(e);
            }
        };

        let started = SessionStarted {
            session_id: session.session_id.clone(),
            session_dir: session.session_dir.clone(),
            start_time: session.start_time.to_rfc3339(),
        };
        let target = session.target.clone();
        let snapshots = session.snapshots.clone();
        let session_dir = session.session_dir.clone();

        *self.active.lock() = Some(session);

        if let Some(url) = &request.initial_url {
            let url = normalize_url(url);
            match with_timeout(
                self.config.timeouts.navigation(),
                "initial navigation",
                target.navigate(&url),
            )
            .await
            {
                Ok(status) => info!("Navigated to {} ({:?})", url, status),
                Err(e) => self.policy.report("Initial navigation failed", &e),
            }
        }

        snapshots
            .capture_or_report("recording_start", WriteOrigin::Producer)
            .await;

        self.phase
            .transition(SessionPhase::Opening, SessionPhase::Recording)?;
        info!("Recording started: {}", started.session_id);

        self.start_narration(&started.session_id, &session_dir).await;

        Ok(started)
    }

    /// Allocate storage, write `session_start` and attach to the target
    async fn open_session(
        &self,
        target: Arc<dyn AutomationTarget>,
        request: &RecordingRequest,
    ) -> Result<ActiveSession> {
        let start_time = self.clock.now();
        let session_id = generate_session_id(&request.user, start_time);
        let session_dir = self
            .config
            .capture
            .sessions_root()
            .join(sanitize_user(&request.user))
            .join(&session_id);

        std::fs::create_dir_all(&session_dir)
            .map_err(|e| EngineError::storage("Failed to create session directory", e))?;

        let blobs = Arc::new(BlobStore::open_dir(&session_dir.join(BLOB_DIR))?);
        let offload = OffloadConfig {
            threshold_bytes: self.config.capture.blob_threshold_bytes,
            preview_chars: self.config.capture.preview_chars,
        };
        let log = Arc::new(EventLog::create(
            &session_dir.join(EVENT_LOG_FILE),
            session_id.clone(),
            blobs,
            self.policy.clone(),
            self.clock.clone(),
            offload,
        )?);

        log.append(
            WriteOrigin::Controller,
            EventType::SessionStart,
            serde_json::json!({
                "user": request.user,
                "description": request.description,
                "session_id": session_id,
                "initial_url": request.initial_url,
            }),
        )?;

        let events = match with_timeout(
            self.config.timeouts.navigation(),
            "attach to target",
            target.attach(&session_dir.join(HAR_FILE)),
        )
        .await
        {
            Ok(events) => events,
            Err(e) => {
                let _ = log.close();
                return Err(e);
            }
        };

        let probe_timeout = self.config.timeouts.health_probe();
        let trackers = Arc::new(Trackers::new(
            log.clone(),
            self.policy.clone(),
            self.clock.clone(),
        ));
        let dom = Arc::new(DomBridge::new(
            target.clone(),
            log.clone(),
            self.policy.clone(),
            probe_timeout,
        ));
        let snapshots = Arc::new(Snapshotter::new(
            target.clone(),
            log.clone(),
            dom.clone(),
            self.policy.clone(),
            probe_timeout,
        ));
        let health = Arc::new(HealthMonitor::new(
            target.clone(),
            self.policy.clone(),
            probe_timeout,
        ));

        let dispatcher = spawn_dispatcher(events, trackers.clone(), snapshots.clone());

        if let Err(e) = dom.install().await {
            self.policy.report("Failed to install DOM instrumentation", &e);
        }

        debug!("Session directory: {:?}", session_dir);

        Ok(ActiveSession {
            session_id,
            session_dir,
            start_time,
            target,
            log,
            trackers,
            dom,
            snapshots,
            health,
            dispatcher,
            narrator: None,
        })
    }

    async fn start_narration(&self, session_id: &str, session_dir: &Path) {
        let Some(narrator) = self.narrator.lock().clone() else {
            return;
        };

        let n = narrator.clone();
        let id = session_id.to_string();
        let dir = session_dir.to_path_buf();
        match blocking_with_timeout(
            self.config.timeouts.narration_stop(),
            "start narration",
            move || n.start(&id, true, &dir),
        )
        .await
        {
            Ok(started) => {
                info!("Narration started at {}", started.start_time);
                if let Some(session) = self.active.lock().as_mut() {
                    session.narrator = Some(narrator);
                }
            }
            Err(e) => warn!("Failed to start narration: {}", e),
        }
    }

    /// Stop the active session and finalize its artifacts
    pub async fn stop_recording(&self) -> Result<StopReport> {
        self.phase
            .transition(SessionPhase::Recording, SessionPhase::Closing)?;

        let Some(session) = self.active.lock().take() else {
            let _ = self.phase.transition(SessionPhase::Closing, SessionPhase::Idle);
            return Err(LifecycleError::NoActiveRecording.into());
        };

        info!("Stopping recording {}", session.session_id);
        let report = self.finalize(session).await;

        if let Err(e) = self.phase.transition(SessionPhase::Closing, SessionPhase::Idle) {
            error!("Failed to return to idle: {}", e);
        }

        info!(
            "Recording stopped: {} events in {:.1}s",
            report.events_count, report.duration_seconds
        );
        Ok(report)
    }

    /// Route a finalization failure; storage failures become warnings
    fn note(&self, warnings: &mut Vec<String>, context: &str, err: &EngineError) {
        self.policy.report(context, err);
        if err.class() == ErrorClass::Storage {
            warnings.push(format!("{}: {}", context, err));
        }
    }

    /// Last DOM drain and `recording_stop` snapshot, bounded by `final_capture`
    async fn final_capture(&self, session: &ActiveSession, warnings: &mut Vec<String>) {
        let timeouts = &self.config.timeouts;
        let final_capture = async {
            let drained = session.dom.drain(WriteOrigin::Controller).await;
            let snapshot = session
                .snapshots
                .capture("recording_stop", WriteOrigin::Controller)
                .await;
            (drained, snapshot)
        };
        match tokio::time::timeout(timeouts.final_capture(), final_capture).await {
            Ok((drained, snapshot)) => {
                if let Err(e) = drained {
                    self.note(warnings, "Final DOM drain failed", &e);
                }
                if let Err(e) = snapshot {
                    self.note(warnings, "Final snapshot failed", &e);
                }
            }
            Err(_) => debug!("Final capture timed out"),
        }
    }

    async fn finalize(&self, mut session: ActiveSession) -> StopReport {
        let timeouts = &self.config.timeouts;
        let mut warnings = Vec::new();

        // Final DOM drain and snapshot against a possibly vanished target
        if session.health.is_unhealthy() {
            debug!("Target marked unhealthy, skipping final capture");
        } else {
            self.final_capture(&session, &mut warnings).await;
        }

        if let Some(narrator) = session.narrator.take() {
            self.finish_narration(&session, narrator, &mut warnings).await;
        }

        let end_time = self.clock.now();
        let duration_seconds =
            (end_time - session.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let counters = session.trackers.counters();

        if let Err(e) = session.log.append(
            WriteOrigin::Controller,
            EventType::SessionEnd,
            serde_json::json!({
                "duration_seconds": duration_seconds,
                "total_events": counters.events,
                "total_requests": counters.requests,
                "total_websockets": counters.websockets,
                "total_console_messages": counters.console_messages,
                "total_cookies": counters.cookies,
                "total_blobs": counters.blobs,
            }),
        ) {
            self.note(&mut warnings, "Failed to write session_end", &e);
        }

        if let Err(e) = session.log.close() {
            self.note(&mut warnings, "Failed to close event log", &e);
        }
        let failures = session.log.write_failures();
        if failures > 0 {
            warnings.push(format!("{} event writes failed", failures));
        }
        let blob_failures = session.log.blob_failures();
        if blob_failures > 0 {
            warnings.push(format!("{} blob writes failed", blob_failures));
        }

        match tokio::time::timeout(timeouts.target_close(), session.target.close()).await {
            Ok(Ok(())) => debug!("Recording context closed"),
            Ok(Err(e)) => self.policy.report("Failed to close recording context", &e),
            Err(_) => warn!("Recording context did not close within {:?}", timeouts.target_close()),
        }

        match tokio::time::timeout(timeouts.dispatcher_drain(), &mut session.dispatcher).await {
            Ok(_) => debug!("Dispatcher finished"),
            Err(_) => {
                debug!("Dispatcher still running, aborting");
                session.dispatcher.abort();
            }
        }

        let har_reconstructed = self.ensure_har(&session.session_dir, &mut warnings).await;

        let metadata = SessionMetadata {
            session_id: session.session_id.clone(),
            start_time: session.start_time.to_rfc3339(),
            end_time: end_time.to_rfc3339(),
            duration_seconds,
            total_events: session.log.count(),
            total_blobs: session.log.blobs().count(),
            cookie_timeline_length: counters.cookies,
            har_file: HAR_FILE.to_string(),
            har_reconstructed,
            event_log: EVENT_LOG_FILE.to_string(),
            blob_directory: BLOB_DIR.to_string(),
            audio_file: None,
            audio_events: None,
        }
        .with_audio_artifacts(&session.session_dir);

        let metadata_path = match metadata.write(&session.session_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                self.note(&mut warnings, "Failed to write metadata", &e);
                None
            }
        };

        StopReport {
            success: metadata_path.is_some(),
            session_id: session.session_id,
            session_dir: session.session_dir,
            metadata_path,
            duration_seconds,
            events_count: metadata.total_events,
            har_reconstructed,
            warnings,
        }
    }

    async fn finish_narration(
        &self,
        session: &ActiveSession,
        narrator: Arc<dyn Narrator>,
        warnings: &mut Vec<String>,
    ) {
        let n = narrator.clone();
        let stopped = match blocking_with_timeout(
            self.config.timeouts.narration_stop(),
            "stop narration",
            move || n.stop(),
        )
        .await
        {
            Ok(stopped) => stopped,
            Err(e) => {
                warn!("Failed to stop narration: {}", e);
                warnings.push(format!("Narration stop failed: {}", e));
                return;
            }
        };

        let path = stopped.path.clone();
        let transcript = match blocking_with_timeout(
            self.config.timeouts.transcription(),
            "transcribe narration",
            move || narrator.transcribe(&path),
        )
        .await
        {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!("Failed to transcribe narration: {}", e);
                warnings.push(format!("Transcription failed: {}", e));
                return;
            }
        };

        let audio_file = stopped
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        if let Err(e) = session.log.append(
            WriteOrigin::Controller,
            EventType::AudioTranscript,
            serde_json::json!({
                "text": transcript.text,
                "segments": transcript.segments,
                "audio_file": audio_file,
                "duration_seconds": stopped.duration_seconds,
                "chunk_count": stopped.chunk_count,
            }),
        ) {
            self.note(warnings, "Failed to write transcript", &e);
        }
    }

    /// Wait briefly for the target's HAR export, rebuilding it from the log
    /// when it is missing or empty. Returns whether it was rebuilt.
    async fn ensure_har(&self, session_dir: &Path, warnings: &mut Vec<String>) -> bool {
        let har_path = session_dir.join(HAR_FILE);
        let poll = self.config.polling.stop_poll();

        let settled = tokio::time::timeout(self.config.timeouts.har_settle(), async {
            loop {
                if let Ok(meta) = tokio::fs::metadata(&har_path).await {
                    if meta.len() > 0 {
                        return;
                    }
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .is_ok();

        if settled {
            debug!("HAR export present at {:?}", har_path);
            return false;
        }

        warn!("HAR export missing, rebuilding from event log");
        match har::rebuild(session_dir, EVENT_LOG_FILE) {
            Ok(stats) => {
                info!(
                    "Rebuilt HAR: {} requests, {} responses",
                    stats.requests, stats.responses
                );
                true
            }
            Err(e) => {
                self.note(warnings, "HAR reconstruction failed", &e);
                false
            }
        }
    }

    /// Take a snapshot of the current page
    pub async fn trigger_snapshot(&self, reason: &str) -> Result<Option<String>> {
        let snapshots = self.with_active(|s| s.snapshots.clone())?;
        snapshots.capture(reason, WriteOrigin::Producer).await
    }

    /// Navigate the recorded page, adding `https://` when no scheme is given
    pub async fn navigate_to(&self, url: &str) -> Result<Option<u16>> {
        let target = self.with_active(|s| s.target.clone())?;
        let url = normalize_url(url);
        info!("Navigating to {}", url);
        with_timeout(
            self.config.timeouts.navigation(),
            "navigation",
            target.navigate(&url),
        )
        .await
    }

    /// Probe the target; always healthy when nothing is recording
    pub async fn check_health(&self) -> bool {
        match self.with_active(|s| s.health.clone()) {
            Ok(health) => health.probe().await,
            Err(_) => true,
        }
    }

    /// Snapshot of the live counters
    pub fn status(&self) -> SessionStatus {
        let phase = self.phase.get();
        let active = self.active.lock();
        match active.as_ref() {
            Some(session) => SessionStatus {
                phase,
                session_id: Some(session.session_id.clone()),
                elapsed_seconds: (self.clock.now() - session.start_time)
                    .num_milliseconds()
                    .max(0) as f64
                    / 1000.0,
                counters: session.trackers.counters(),
            },
            None => SessionStatus {
                phase,
                session_id: None,
                elapsed_seconds: 0.0,
                counters: SessionCounters::default(),
            },
        }
    }

    /// Keep the session alive until `token` is cancelled or the target
    /// stops answering, then stop it
    pub async fn run_until_stopped(&self, token: CancellationToken) -> Result<StopReport> {
        let (dom, health) = self.with_active(|s| (s.dom.clone(), s.health.clone()))?;
        let polling = &self.config.polling;

        let mut stop_tick = tokio::time::interval(polling.stop_poll());
        let mut dom_tick = tokio::time::interval(polling.dom_drain());
        let mut health_tick = tokio::time::interval(polling.health_interval());
        for tick in [&mut stop_tick, &mut dom_tick, &mut health_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        // The first tick of an interval completes immediately
        dom_tick.tick().await;
        health_tick.tick().await;

        loop {
            tokio::select! {
                _ = stop_tick.tick() => {
                    if token.is_cancelled() {
                        info!("Stop requested");
                        break;
                    }
                    if !self.policy.is_recording() {
                        debug!("Session no longer recording");
                        break;
                    }
                }
                _ = dom_tick.tick() => {
                    if let Err(e) = dom.drain(WriteOrigin::Producer).await {
                        self.policy.report("DOM drain failed", &e);
                    }
                }
                _ = health_tick.tick() => {
                    if !health.probe().await {
                        warn!("Browser became unresponsive, stopping recording");
                        break;
                    }
                }
            }
        }

        self.stop_recording().await
    }

    fn with_active<T>(&self, f: impl FnOnce(&ActiveSession) -> T) -> Result<T> {
        let active = self.active.lock();
        match active.as_ref() {
            Some(session) if self.policy.is_recording() => Ok(f(session)),
            _ => Err(LifecycleError::NoActiveRecording.into()),
        }
    }
}
