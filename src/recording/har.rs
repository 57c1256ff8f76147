// src/recording/har.rs
//! HAR 1.2 reconstruction from the event log
//!
//! The automation engine normally writes `recording.har` itself when the
//! browser context closes. When that file is missing, the archive is rebuilt
//! from the `request` and `response` events in `events.ndjson`.
//!
//! Responses are joined to requests by URL and the last response seen for a
//! URL wins. Requests repeated against the same URL therefore all receive
//! the final response; exact pairing cannot be recovered from the URL alone.

use crate::recording::event::EventType;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// File name of the interchange document inside a session directory
pub const HAR_FILE: &str = "recording.har";

/// Creator name stamped on rebuilt archives
pub const FALLBACK_CREATOR: &str = "harflow_fallback";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarDocument {
    pub log: HarLog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: String,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: serde_json::Map<String, serde_json::Value>,
    pub timings: HarTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub headers: Vec<HarHeader>,
    pub query_string: Vec<HarHeader>,
    pub cookies: Vec<serde_json::Value>,
    pub headers_size: i64,
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<HarHeader>,
    pub cookies: Vec<serde_json::Value>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    pub text: String,
    /// Digest of the full body when it was offloaded to the blob store
    #[serde(
        rename = "_storedDigest",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stored_digest: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarTimings {
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

/// Outcome of a rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructionStats {
    pub requests: usize,
    pub responses: usize,
    pub skipped_lines: usize,
}

/// Loosely typed log line; unknown types and fields are tolerated
#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    timestamp: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Build a HAR document from an event log file
pub fn reconstruct_from_log(log_path: &Path) -> Result<(HarDocument, ReconstructionStats)> {
    let file = File::open(log_path)
        .map_err(|e| EngineError::storage("Cannot reconstruct HAR, event log unreadable", e))?;

    let mut stats = ReconstructionStats::default();
    let mut requests: Vec<(String, serde_json::Value)> = Vec::new();
    let mut responses: HashMap<String, serde_json::Value> = HashMap::new();

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| EngineError::storage("Failed to read event log", e))?;
        if line.trim().is_empty() {
            continue;
        }

        let record: LogLine = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping malformed log line: {}", e);
                stats.skipped_lines += 1;
                continue;
            }
        };

        match EventType::parse(&record.kind) {
            Some(EventType::Request) => requests.push((record.timestamp, record.data)),
            Some(EventType::Response) => {
                let url = str_field(&record.data, "url");
                responses.insert(url, record.data);
            }
            _ => {}
        }
    }

    stats.requests = requests.len();
    stats.responses = responses.len();

    let empty = serde_json::Value::Null;
    let entries = requests
        .iter()
        .map(|(timestamp, request)| {
            let url = str_field(request, "url");
            let response = responses.get(&url).unwrap_or(&empty);
            build_entry(timestamp, request, response)
        })
        .collect();

    let document = HarDocument {
        log: HarLog {
            version: "1.2".to_string(),
            creator: HarCreator {
                name: FALLBACK_CREATOR.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            entries,
        },
    };

    Ok((document, stats))
}

/// Rebuild `recording.har` in `session_dir` from its event log
///
/// Safe to re-run; the archive is overwritten each time.
pub fn rebuild(session_dir: &Path, log_file: &str) -> Result<ReconstructionStats> {
    let (document, stats) = reconstruct_from_log(&session_dir.join(log_file))?;

    let json = serde_json::to_string_pretty(&document)?;
    let har_path = session_dir.join(HAR_FILE);
    let tmp_path = session_dir.join(format!("{}.tmp", HAR_FILE));

    std::fs::write(&tmp_path, json)
        .and_then(|_| std::fs::rename(&tmp_path, &har_path))
        .map_err(|e| EngineError::storage("Failed to write reconstructed HAR", e))?;

    if stats.skipped_lines > 0 {
        warn!("Skipped {} unreadable log lines during HAR rebuild", stats.skipped_lines);
    }
    info!(
        "Reconstructed HAR with {} requests and {} responses",
        stats.requests, stats.responses
    );
    metrics::counter!("capture_har_reconstructions_total").increment(1);

    Ok(stats)
}

fn build_entry(
    timestamp: &str,
    request: &serde_json::Value,
    response: &serde_json::Value,
) -> HarEntry {
    let response_headers = header_list(&response["headers"]);
    let mime_type = response_headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-type"))
        .map(|h| h.value.clone())
        .unwrap_or_default();

    HarEntry {
        started_date_time: timestamp.to_string(),
        time: 0.0,
        request: HarRequest {
            method: request["method"].as_str().unwrap_or("GET").to_string(),
            url: str_field(request, "url"),
            http_version: "HTTP/1.1".to_string(),
            headers: header_list(&request["headers"]),
            query_string: Vec::new(),
            cookies: Vec::new(),
            headers_size: -1,
            body_size: -1,
            post_data: post_data(&request["post_data"]),
        },
        response: HarResponse {
            status: response["status"]
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(0),
            status_text: str_field(response, "status_text"),
            http_version: "HTTP/1.1".to_string(),
            headers: response_headers,
            cookies: Vec::new(),
            content: HarContent {
                size: 0,
                mime_type,
            },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: -1,
        },
        cache: serde_json::Map::new(),
        timings: HarTimings::default(),
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

/// Headers logged either as an object or as `[{name, value}]`
fn header_list(headers: &serde_json::Value) -> Vec<HarHeader> {
    match headers {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(name, value)| HarHeader {
                name: name.clone(),
                value: value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()),
            })
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                Some(HarHeader {
                    name: item["name"].as_str()?.to_string(),
                    value: item["value"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn post_data(value: &serde_json::Value) -> Option<HarPostData> {
    let mime_type = "application/x-www-form-urlencoded".to_string();
    match value {
        serde_json::Value::String(text) if !text.is_empty() => Some(HarPostData {
            mime_type,
            text: text.clone(),
            stored_digest: None,
        }),
        serde_json::Value::Object(blob) => Some(HarPostData {
            mime_type,
            text: blob["preview"].as_str().unwrap_or_default().to_string(),
            stored_digest: blob["stored_digest"].as_str().map(str::to_string),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_log(dir: &Path, lines: &[serde_json::Value]) {
        let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        std::fs::write(dir.join("events.ndjson"), body).unwrap();
    }

    fn request(url: &str) -> serde_json::Value {
        json!({
            "id": "s-00000001",
            "timestamp": "2024-01-01T00:00:00+00:00",
            "timestamp_ms": 0,
            "type": "request",
            "data": {"url": url, "method": "POST", "headers": {"accept": "*/*"}, "post_data": "a=1"}
        })
    }

    fn response(url: &str, status: u16) -> serde_json::Value {
        json!({
            "id": "s-00000002",
            "timestamp": "2024-01-01T00:00:01+00:00",
            "timestamp_ms": 1000,
            "type": "response",
            "data": {
                "url": url,
                "status": status,
                "status_text": "OK",
                "headers": {"Content-Type": "text/html"}
            }
        })
    }

    #[test]
    fn test_missing_response_uses_defaults() {
        let dir = tempdir().unwrap();
        write_log(
            dir.path(),
            &[request("https://a.test/"), request("https://b.test/"), response("https://a.test/", 200)],
        );

        let stats = rebuild(dir.path(), "events.ndjson").unwrap();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.responses, 1);

        let har: HarDocument =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(HAR_FILE)).unwrap())
                .unwrap();
        let entries = &har.log.entries;
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].request.url, "https://a.test/");
        assert_eq!(entries[0].response.status, 200);
        assert_eq!(entries[0].response.content.mime_type, "text/html");
        assert_eq!(entries[0].request.post_data.as_ref().unwrap().text, "a=1");

        assert_eq!(entries[1].request.url, "https://b.test/");
        assert_eq!(entries[1].response.status, 0);
        assert_eq!(entries[1].response.status_text, "");
        assert!(entries[1].response.headers.is_empty());
        assert_eq!(har.log.creator.name, FALLBACK_CREATOR);
    }

    #[test]
    fn test_last_response_wins() {
        let dir = tempdir().unwrap();
        write_log(
            dir.path(),
            &[
                request("https://a.test/"),
                response("https://a.test/", 302),
                request("https://a.test/"),
                response("https://a.test/", 200),
            ],
        );

        let (har, _) = reconstruct_from_log(&dir.path().join("events.ndjson")).unwrap();
        let statuses: Vec<u16> = har.log.entries.iter().map(|e| e.response.status).collect();
        assert_eq!(statuses, vec![200, 200]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let body = format!("{}\n{{not json\n{}\n", request("https://a.test/"), response("https://a.test/", 204));
        std::fs::write(dir.path().join("events.ndjson"), body).unwrap();

        let (har, stats) = reconstruct_from_log(&dir.path().join("events.ndjson")).unwrap();
        assert_eq!(stats.skipped_lines, 1);
        assert_eq!(har.log.entries[0].response.status, 204);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), &[request("https://a.test/"), response("https://a.test/", 200)]);

        rebuild(dir.path(), "events.ndjson").unwrap();
        let first = std::fs::read_to_string(dir.path().join(HAR_FILE)).unwrap();
        rebuild(dir.path(), "events.ndjson").unwrap();
        let second = std::fs::read_to_string(dir.path().join(HAR_FILE)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_blob_post_data_keeps_digest() {
        let value = json!({"stored_digest": "abc", "preview": "a=", "size": 20000});
        let post = post_data(&value).unwrap();
        assert_eq!(post.text, "a=");
        assert_eq!(post.stored_digest.as_deref(), Some("abc"));

        let json = serde_json::to_string(&post).unwrap();
        assert!(json.contains("_storedDigest"));
    }

    #[test]
    fn test_missing_log_is_storage_error() {
        let dir = tempdir().unwrap();
        let result = rebuild(dir.path(), "events.ndjson");
        assert!(matches!(result, Err(EngineError::StorageFailed(_))));
    }
}
