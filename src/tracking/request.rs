// src/tracking/request.rs
//! HTTP request/response tracking

use crate::automation::raw::{RawBody, RawRequest, RawResponse};
use crate::recording::event::EventType;
use crate::recording::event_log::{BlobRef, EventLog};
use crate::session::policy::ClosingPolicy;
use crate::utils::errors::Result;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stand-in for a body the automation engine could not read
pub const UNREADABLE_MARKER: &str = "[BINARY_DATA]";

/// Header pairs as a JSON object; repeated names are joined with `\n`
pub fn header_map(headers: &[(String, String)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        match map.get_mut(name) {
            Some(Value::String(existing)) => {
                existing.push('\n');
                existing.push_str(value);
            }
            _ => {
                map.insert(name.clone(), Value::String(value.clone()));
            }
        }
    }
    map
}

/// All values of a header, case-insensitively
pub fn header_values<'a>(headers: &'a [(String, String)], name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .collect()
}

/// JSON form of a body
///
/// Text stays inline (the log offloads it past the threshold); binary is
/// always stored as a blob. `None` for an absent body.
pub fn body_value(log: &EventLog, policy: &ClosingPolicy, body: &RawBody) -> Option<Value> {
    match body {
        RawBody::Absent => None,
        RawBody::Text(text) => Some(Value::String(text.clone())),
        RawBody::Unreadable => Some(Value::String(UNREADABLE_MARKER.to_string())),
        RawBody::Binary(bytes) => match log.store_blob(bytes) {
            Ok(digest) => Some(BlobRef::binary(digest, bytes.len()).to_value()),
            Err(e) => {
                policy.report("Failed to store binary body", &e);
                Some(Value::String(UNREADABLE_MARKER.to_string()))
            }
        },
    }
}

pub struct RequestTracker {
    log: Arc<EventLog>,
    policy: ClosingPolicy,
    requests: AtomicU64,
}

impl RequestTracker {
    pub fn new(log: Arc<EventLog>, policy: ClosingPolicy) -> Self {
        Self {
            log,
            policy,
            requests: AtomicU64::new(0),
        }
    }

    pub fn on_request(&self, request: &RawRequest) -> Result<Option<String>> {
        let mut data = json!({
            "url": request.url,
            "method": request.method,
            "headers": header_map(&request.headers),
            "resource_type": request.resource_type,
        });
        if let Some(body) = body_value(&self.log, &self.policy, &request.post_data) {
            data["post_data"] = body;
        }

        let id = self.log.write(EventType::Request, data)?;
        if id.is_some() {
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
        Ok(id)
    }

    pub fn on_response(&self, response: &RawResponse) -> Result<Option<String>> {
        let mut data = json!({
            "url": response.url,
            "status": response.status,
            "status_text": response.status_text,
            "headers": header_map(&response.headers),
        });
        if let Some(body) = body_value(&self.log, &self.policy, &response.body) {
            data["body"] = body;
        }

        self.log.write(EventType::Response, data)
    }

    /// Requests logged so far
    pub fn count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::blob_store::{content_digest, BlobStore, MemoryBlobSink};
    use crate::recording::event_log::{MemoryLogSink, OffloadConfig};
    use crate::session::state::{PhaseCell, SessionPhase};
    use crate::utils::clock::SystemClock;
    use bytes::Bytes;

    fn tracker() -> (RequestTracker, MemoryLogSink, Arc<MemoryBlobSink>) {
        let cell = PhaseCell::new();
        cell.transition(SessionPhase::Idle, SessionPhase::Opening).unwrap();
        let policy = ClosingPolicy::new(cell);
        let sink = MemoryLogSink::new();
        let blobs = Arc::new(MemoryBlobSink::new());
        let log = Arc::new(EventLog::new(
            "s1",
            Box::new(sink.clone()),
            Arc::new(BlobStore::new(blobs.clone())),
            policy.clone(),
            Arc::new(SystemClock),
            OffloadConfig::default(),
        ));
        (RequestTracker::new(log, policy), sink, blobs)
    }

    #[test]
    fn test_header_map_joins_repeats() {
        let headers = vec![
            ("set-cookie".to_string(), "a=1".to_string()),
            ("content-type".to_string(), "text/html".to_string()),
            ("set-cookie".to_string(), "b=2".to_string()),
        ];
        let map = header_map(&headers);
        assert_eq!(map["set-cookie"], json!("a=1\nb=2"));
        assert_eq!(header_values(&headers, "Content-Type"), vec!["text/html"]);
    }

    #[test]
    fn test_request_with_unreadable_body() {
        let (tracker, sink, _) = tracker();
        tracker
            .on_request(&RawRequest {
                url: "https://example.com/upload".into(),
                method: "POST".into(),
                headers: vec![],
                post_data: RawBody::Unreadable,
                resource_type: "fetch".into(),
            })
            .unwrap();

        let events = sink.events();
        assert_eq!(events[0].data["post_data"], json!(UNREADABLE_MARKER));
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_binary_response_body_becomes_blob() {
        let (tracker, sink, blobs) = tracker();
        let body = Bytes::from_static(&[0xff, 0x00, 0x10]);
        tracker
            .on_response(&RawResponse {
                url: "https://example.com/img".into(),
                status: 200,
                status_text: "OK".into(),
                headers: vec![],
                body: RawBody::Binary(body.clone()),
            })
            .unwrap();

        let digest = content_digest(&body);
        let events = sink.events();
        assert_eq!(events[0].data["body"]["stored_digest"], json!(digest));
        assert_eq!(events[0].data["body"]["encoding"], json!("binary"));
        assert!(blobs.get(&digest).is_some());
    }

    #[test]
    fn test_absent_body_is_omitted() {
        let (tracker, sink, _) = tracker();
        tracker
            .on_request(&RawRequest {
                url: "https://example.com".into(),
                method: "GET".into(),
                headers: vec![],
                post_data: RawBody::Absent,
                resource_type: "document".into(),
            })
            .unwrap();
        assert!(sink.events()[0].data.get("post_data").is_none());
    }
}
