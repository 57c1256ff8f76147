// src/tracking/cookie.rs
//! Set-Cookie tracking
//!
//! Every `Set-Cookie` value on a response is parsed into a structured record
//! and appended to the session's cookie timeline. Attribute names are matched
//! case-insensitively; values keep their case. Unknown attributes are kept in
//! `extra` and the raw header is always retained.

use crate::automation::raw::RawResponse;
use crate::recording::event::EventType;
use crate::recording::event_log::EventLog;
use crate::tracking::request::header_values;
use crate::utils::clock::Clock;
use crate::utils::errors::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One parsed `Set-Cookie` header value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    pub partitioned: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    pub raw: String,
}

/// Parse one `Set-Cookie` value
///
/// A value without `=` in its first part is a nameless cookie.
pub fn parse_set_cookie(header: &str) -> SetCookie {
    let mut parts = header.split(';');
    let first = parts.next().unwrap_or("").trim();

    let (name, value) = match first.split_once('=') {
        Some((n, v)) => (n.trim().to_string(), v.trim().to_string()),
        None => (String::new(), first.to_string()),
    };

    let mut cookie = SetCookie {
        name,
        value,
        raw: header.to_string(),
        ..SetCookie::default()
    };

    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (attr, val) = match part.split_once('=') {
            Some((a, v)) => (a.trim(), Some(v.trim().to_string())),
            None => (part, None),
        };

        match attr.to_ascii_lowercase().as_str() {
            "domain" => cookie.domain = val,
            "path" => cookie.path = val,
            "expires" => cookie.expires = val,
            "max-age" => cookie.max_age = val,
            "samesite" => cookie.same_site = val,
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "partitioned" => cookie.partitioned = true,
            other => {
                cookie
                    .extra
                    .insert(other.to_string(), val.unwrap_or_default());
            }
        }
    }

    cookie
}

/// Every cookie in a response's `Set-Cookie` headers
pub fn cookies_from_response(response: &RawResponse) -> Vec<SetCookie> {
    header_values(&response.headers, "set-cookie")
        .into_iter()
        .flat_map(|v| v.split('\n'))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(parse_set_cookie)
        .collect()
}

/// A cookie observed at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieMutation {
    pub timestamp: String,
    pub url: String,
    pub cookie: SetCookie,
}

pub struct CookieTracker {
    log: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    timeline: Mutex<Vec<CookieMutation>>,
}

impl CookieTracker {
    pub fn new(log: Arc<EventLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            log,
            clock,
            timeline: Mutex::new(Vec::new()),
        }
    }

    /// Record cookies set by `response`; logs nothing when there are none
    pub fn on_response(&self, response: &RawResponse) -> Result<Option<String>> {
        let cookies = cookies_from_response(response);
        if cookies.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now().to_rfc3339();
        {
            let mut timeline = self.timeline.lock();
            timeline.extend(cookies.iter().cloned().map(|cookie| CookieMutation {
                timestamp: now.clone(),
                url: response.url.clone(),
                cookie,
            }));
        }

        self.log.write(
            EventType::CookieSet,
            serde_json::json!({
                "url": response.url,
                "status": response.status,
                "cookies": cookies,
            }),
        )
    }

    pub fn timeline_len(&self) -> usize {
        self.timeline.lock().len()
    }

    pub fn timeline(&self) -> Vec<CookieMutation> {
        self.timeline.lock().clone()
    }
}
