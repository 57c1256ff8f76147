// tests/session_lifecycle.rs
//! End-to-end session tests against the in-memory automation target

use bytes::Bytes;
use harflow_capture::automation::raw::{RawBody, RawEvent, RawRequest, RawResponse};
use harflow_capture::automation::{NarrationStarted, NarrationStopped, Narrator, Transcript};
use harflow_capture::recording::blob_store::{blob_path, content_digest};
use harflow_capture::recording::event::parse_sequence;
use harflow_capture::recording::har::{HarDocument, FALLBACK_CREATOR, HAR_FILE};
use harflow_capture::recording::metadata::{SessionMetadata, AUDIO_FILE, BLOB_DIR, EVENT_LOG_FILE};
use harflow_capture::session::{RecordingRequest, SessionController, SessionPhase};
use harflow_capture::utils::errors::{EngineError, LifecycleError, Result};
use harflow_capture::{AutomationTarget, EngineConfig, ScriptedTarget};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.capture.recordings_dir = root.join("recordings");
    config
}

/// Short timeouts for tests that exercise failure paths
fn fast_config(root: &Path) -> EngineConfig {
    let mut config = config(root);
    config.timeouts.health_probe_ms = 100;
    config.timeouts.final_capture_ms = 200;
    config.timeouts.target_close_ms = 200;
    config.timeouts.har_settle_ms = 200;
    config.timeouts.dispatcher_drain_ms = 200;
    config.polling.dom_drain_ms = 100;
    config.polling.health_interval_ms = 100;
    config
}

fn request(url: Option<&str>) -> RecordingRequest {
    RecordingRequest {
        user: "alice".into(),
        description: "login flow".into(),
        initial_url: url.map(str::to_string),
    }
}

fn read_events(session_dir: &Path) -> Vec<Value> {
    std::fs::read_to_string(session_dir.join(EVENT_LOG_FILE))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn events_of<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == json!(kind)).collect()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));

    controller
        .start_recording(Arc::new(ScriptedTarget::new()), request(None))
        .await
        .unwrap();

    let err = controller
        .start_recording(Arc::new(ScriptedTarget::new()), request(None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Lifecycle(LifecycleError::AlreadyRecording)
    ));
    assert!(controller.is_recording());

    controller.stop_recording().await.unwrap();
}

#[tokio::test]
async fn test_stop_without_session_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));

    let err = controller.stop_recording().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Lifecycle(LifecycleError::NoActiveRecording)
    ));
    assert!(!dir.path().join("recordings").exists());
    assert_eq!(controller.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_session_layout_and_framing_events() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.capture.project = Some("acme".into());
    let controller = SessionController::new(config);

    let started = controller
        .start_recording(Arc::new(ScriptedTarget::new()), request(Some("example.com")))
        .await
        .unwrap();

    let expected_parent = dir.path().join("recordings/acme/recordings/alice");
    assert_eq!(started.session_dir.parent().unwrap(), expected_parent);
    assert!(started.session_id.starts_with("alice_"));
    assert!(started.session_dir.join(BLOB_DIR).is_dir());

    let report = controller.stop_recording().await.unwrap();
    assert!(report.success);
    assert_eq!(controller.phase(), SessionPhase::Idle);

    let events = read_events(&report.session_dir);
    assert_eq!(events.first().unwrap()["type"], json!("session_start"));
    assert_eq!(events.last().unwrap()["type"], json!("session_end"));
    assert_eq!(events[0]["data"]["initial_url"], json!("example.com"));
    assert_eq!(report.events_count, events.len() as u64);

    // Ids are strictly increasing in file order
    let sequences: Vec<u64> = events
        .iter()
        .map(|e| parse_sequence(e["id"].as_str().unwrap()).unwrap())
        .collect();
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));

    let snapshots = events_of(&events, "snapshot");
    assert!(snapshots
        .iter()
        .any(|s| s["data"]["trigger"] == json!("recording_stop")));
    assert!(snapshots
        .iter()
        .all(|s| s["data"]["state"]["url"] == json!("https://example.com")));
}

#[tokio::test]
async fn test_large_dom_value_goes_to_one_blob() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));
    let target = Arc::new(ScriptedTarget::new());

    controller
        .start_recording(target.clone(), request(Some("https://example.com/form")))
        .await
        .unwrap();

    let value = "a".repeat(20 * 1024);
    target.push_dom_event("dom_input", json!({ "tagName": "TEXTAREA", "value": value }));

    let report = controller.stop_recording().await.unwrap();
    let events = read_events(&report.session_dir);

    let inputs = events_of(&events, "dom_input");
    assert_eq!(inputs.len(), 1);
    let blob_ref = &inputs[0]["data"]["value"];
    let digest = content_digest(value.as_bytes());
    assert_eq!(blob_ref["stored_digest"], json!(digest));
    assert_eq!(blob_ref["preview"].as_str().unwrap().len(), 256);
    assert_eq!(blob_ref["size"], json!(20 * 1024));

    let blob = blob_path(&report.session_dir.join(BLOB_DIR), &digest);
    assert_eq!(std::fs::read(blob).unwrap(), value.as_bytes());

    let metadata = SessionMetadata::read(&report.session_dir).unwrap();
    assert_eq!(metadata.total_blobs, 1);
}

#[tokio::test]
async fn test_unresponsive_target_still_stops_in_time() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));
    let target = Arc::new(ScriptedTarget::new());

    controller
        .start_recording(target.clone(), request(Some("https://example.com")))
        .await
        .unwrap();
    target.hang(true);

    let started = Instant::now();
    let report = controller.stop_recording().await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(10));

    assert!(report.success);
    assert!(report.har_reconstructed);
    assert!(report.session_dir.join(HAR_FILE).exists());
    assert_eq!(controller.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_missing_har_export_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));
    let target = Arc::new(ScriptedTarget::new().without_har_export());

    controller
        .start_recording(target.clone(), request(None))
        .await
        .unwrap();

    target.emit(RawEvent::Request(RawRequest {
        url: "https://example.com/api".into(),
        method: "POST".into(),
        headers: vec![("content-type".into(), "application/json".into())],
        post_data: RawBody::Text("{\"q\":1}".into()),
        resource_type: "fetch".into(),
    }));
    target.emit(RawEvent::Response(RawResponse {
        url: "https://example.com/api".into(),
        status: 201,
        status_text: "Created".into(),
        headers: vec![("content-type".into(), "application/json".into())],
        body: RawBody::Binary(Bytes::from_static(b"\x00ok")),
    }));
    target.emit(RawEvent::Request(RawRequest {
        url: "https://example.com/pending".into(),
        method: "GET".into(),
        headers: vec![],
        post_data: RawBody::Absent,
        resource_type: "fetch".into(),
    }));
    wait_until(|| controller.status().counters.requests == 2).await;

    let report = controller.stop_recording().await.unwrap();
    assert!(report.har_reconstructed);

    let har: HarDocument = serde_json::from_str(
        &std::fs::read_to_string(report.session_dir.join(HAR_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(har.log.creator.name, FALLBACK_CREATOR);
    assert_eq!(har.log.entries.len(), 2);
    assert_eq!(har.log.entries[0].response.status, 201);
    assert_eq!(har.log.entries[1].response.status, 0);

    let metadata = SessionMetadata::read(&report.session_dir).unwrap();
    assert!(metadata.har_reconstructed);
    assert_eq!(metadata.total_events, report.events_count);
}

#[tokio::test]
async fn test_connected_har_export_is_kept() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));

    controller
        .start_recording(Arc::new(ScriptedTarget::new()), request(None))
        .await
        .unwrap();
    let report = controller.stop_recording().await.unwrap();

    assert!(!report.har_reconstructed);
    let har: Value = serde_json::from_str(
        &std::fs::read_to_string(report.session_dir.join(HAR_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(har["log"]["creator"]["name"], json!("scripted"));
}

#[tokio::test]
async fn test_run_until_stopped_drains_and_honours_token() {
    let dir = TempDir::new().unwrap();
    let controller = Arc::new(SessionController::new(fast_config(dir.path())));
    let target = Arc::new(ScriptedTarget::new());

    controller
        .start_recording(target.clone(), request(Some("https://example.com")))
        .await
        .unwrap();
    target.push_dom_event("dom_click", json!({ "tagName": "BUTTON" }));

    let token = CancellationToken::new();
    let runner = {
        let controller = controller.clone();
        let token = token.clone();
        tokio::spawn(async move { controller.run_until_stopped(token).await })
    };

    wait_until(|| target.buffered_dom_events() == 0).await;
    token.cancel();

    let report = runner.await.unwrap().unwrap();
    assert!(report.success);

    let events = read_events(&report.session_dir);
    let clicks = events_of(&events, "dom_click");
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0]["data"]["client_event_id"], json!(1));
}

#[tokio::test]
async fn test_failed_health_probe_ends_recording() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(fast_config(dir.path()));
    let target = Arc::new(ScriptedTarget::new());

    controller
        .start_recording(target.clone(), request(Some("https://example.com")))
        .await
        .unwrap();
    target.hang(true);

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        controller.run_until_stopped(CancellationToken::new()),
    )
    .await
    .expect("recording loop did not stop")
    .unwrap();

    assert!(report.success);
    assert!(!controller.is_recording());
}

#[tokio::test]
async fn test_unhealthy_target_skips_final_capture() {
    let dir = TempDir::new().unwrap();
    let mut config = fast_config(dir.path());
    config.timeouts.final_capture_ms = 2000;
    let controller = SessionController::new(config);
    let target = Arc::new(ScriptedTarget::new());

    controller
        .start_recording(target.clone(), request(None))
        .await
        .unwrap();
    target.push_dom_event("dom_click", json!({ "tagName": "A" }));

    target.hang(true);
    assert!(!controller.check_health().await);
    target.hang(false);
    let evaluations = target.evaluations();

    let started = Instant::now();
    let report = controller.stop_recording().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.success);

    assert_eq!(target.evaluations(), evaluations);
    let events = read_events(&report.session_dir);
    assert!(events_of(&events, "dom_click").is_empty());
    assert!(!events_of(&events, "snapshot")
        .iter()
        .any(|s| s["data"]["trigger"] == json!("recording_stop")));
}

#[tokio::test]
async fn test_blob_write_failure_is_reported_on_stop() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));
    let target = Arc::new(ScriptedTarget::new());

    let started = controller
        .start_recording(target.clone(), request(Some("https://example.com/form")))
        .await
        .unwrap();

    let blob_dir = started.session_dir.join(BLOB_DIR);
    std::fs::remove_dir_all(&blob_dir).unwrap();
    std::fs::write(&blob_dir, b"not a directory").unwrap();

    let value = "z".repeat(20 * 1024);
    target.push_dom_event("dom_input", json!({ "tagName": "TEXTAREA", "value": value }));

    let report = controller.stop_recording().await.unwrap();
    assert!(report.success);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("blob writes failed")));

    // The field stays inline instead of being lost
    let events = read_events(&report.session_dir);
    let inputs = events_of(&events, "dom_input");
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0]["data"]["value"], json!(value));
}

#[tokio::test]
async fn test_navigate_and_manual_snapshot() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));
    let target = Arc::new(ScriptedTarget::new());

    controller
        .start_recording(target.clone(), request(None))
        .await
        .unwrap();

    let status = controller.navigate_to("example.com/login").await.unwrap();
    assert_eq!(status, Some(200));
    assert_eq!(
        target.current_url().as_deref(),
        Some("https://example.com/login")
    );
    // session_start plus the dispatched navigation
    wait_until(|| controller.status().counters.events >= 2).await;

    let id = controller.trigger_snapshot("manual").await.unwrap();
    assert!(id.is_some());

    let status = controller.status();
    assert_eq!(status.phase, SessionPhase::Recording);
    assert!(status.counters.events >= 3);

    let report = controller.stop_recording().await.unwrap();
    let events = read_events(&report.session_dir);
    let navigations = events_of(&events, "navigation");
    assert_eq!(navigations[0]["data"]["url"], json!("https://example.com/login"));
    assert!(events_of(&events, "snapshot")
        .iter()
        .any(|s| s["data"]["trigger"] == json!("manual")));
}

struct FakeNarrator;

impl Narrator for FakeNarrator {
    fn start(&self, _session_id: &str, _continuous: bool, dir: &Path) -> Result<NarrationStarted> {
        std::fs::write(dir.join(AUDIO_FILE), b"RIFF").unwrap();
        Ok(NarrationStarted {
            start_time: "2026-01-01T00:00:00Z".into(),
        })
    }

    fn stop(&self) -> Result<NarrationStopped> {
        Ok(NarrationStopped {
            path: AUDIO_FILE.into(),
            duration_seconds: 1.5,
            chunk_count: 1,
        })
    }

    fn transcribe(&self, _path: &Path) -> Result<Transcript> {
        Ok(Transcript {
            text: "clicking the login button".into(),
            segments: vec![],
        })
    }
}

#[tokio::test]
async fn test_narration_transcript_is_logged() {
    let dir = TempDir::new().unwrap();
    let controller = SessionController::new(config(dir.path()));
    controller.attach_narrator(Arc::new(FakeNarrator));

    controller
        .start_recording(Arc::new(ScriptedTarget::new()), request(None))
        .await
        .unwrap();
    let report = controller.stop_recording().await.unwrap();

    let events = read_events(&report.session_dir);
    let transcripts = events_of(&events, "audio_transcript");
    assert_eq!(transcripts.len(), 1);
    assert_eq!(
        transcripts[0]["data"]["text"],
        json!("clicking the login button")
    );

    let metadata = SessionMetadata::read(&report.session_dir).unwrap();
    assert_eq!(metadata.audio_file.as_deref(), Some(AUDIO_FILE));
}
