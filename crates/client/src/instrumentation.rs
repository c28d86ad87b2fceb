//! Request metrics and correlation ids
//!
//! Records `fhir_client_requests_total` (counter) and
//! `fhir_client_request_duration_seconds` (histogram) for every exchange,
//! with method/path/status labels.

use reqwest::header::HeaderValue;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

pub fn new_request_id() -> HeaderValue {
    // a hyphenated uuid is always a valid header value
    HeaderValue::from_str(&Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

/// Normalize request paths to avoid high-cardinality labels.
/// Ids become `:id`, history versions `:vid`; types and `$operations` stay.
pub fn normalize_path(base: &Url, url: &Url) -> String {
    let relative = url
        .path()
        .strip_prefix(base.path())
        .unwrap_or(url.path());

    let mut labels: Vec<&str> = Vec::new();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        let label = match labels.last() {
            Some(&"_history") => ":vid",
            Some(prev)
                if is_resource_type(prev)
                    && !segment.starts_with('$')
                    && !segment.starts_with('_') =>
            {
                ":id"
            }
            _ => segment,
        };
        labels.push(label);
    }

    if labels.is_empty() {
        "/".to_string()
    } else {
        labels.join("/")
    }
}

fn is_resource_type(segment: &str) -> bool {
    segment.starts_with(|c: char| c.is_ascii_uppercase())
}

/// Record one exchange. `status` is `None` when no response arrived.
pub fn record_exchange(method: &Method, path: &str, status: Option<StatusCode>, elapsed: Duration) {
    let status = status
        .map(|s| s.as_u16().to_string())
        .unwrap_or_else(|| "error".to_string());

    metrics::counter!(
        "fhir_client_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status
    )
    .increment(1);

    metrics::histogram!(
        "fhir_client_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(elapsed.as_secs_f64());
}
