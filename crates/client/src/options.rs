//! Per-call request options
//!
//! Every recognized option is a named field. Only [`RequestOptions::query_pairs`]
//! decides what reaches the query string, so nothing else can leak onto the wire.

use fhir_core::ResourceKey;
use fhir_core::SearchParameters;
use fhir_core::search::SummaryMode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

/// Options accepted by every client call
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// `_format`
    pub format: Option<String>,
    /// `_pretty`
    pub pretty: Option<bool>,
    /// `_summary`
    pub summary: Option<SummaryMode>,
    /// `_elements`
    pub elements: Vec<String>,
    /// Overrides the client's concurrency-guard default for update/patch
    pub prevent_concurrent_updates: Option<bool>,
    /// Version the `If-Match` guard of a patch refers to
    pub version_id: Option<String>,
    /// Conditional create/update/patch criteria, prepended to the query of
    /// those three calls. Every other call ignores it.
    pub conditional: Option<SearchParameters>,
    pub cancel: Option<CancellationToken>,
    /// Extra request headers; these win over the client's defaults
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = Some(pretty);
        self
    }

    pub fn with_summary(mut self, summary: SummaryMode) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_elements(mut self, elements: &[&str]) -> Self {
        self.elements = elements.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_prevent_concurrent_updates(mut self, enabled: bool) -> Self {
        self.prevent_concurrent_updates = Some(enabled);
        self
    }

    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_conditional(mut self, criteria: impl Into<SearchParameters>) -> Self {
        self.conditional = Some(criteria.into());
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Query parameters contributed by these options, in a fixed order
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(format) = &self.format {
            pairs.push(("_format", format.clone()));
        }
        if let Some(pretty) = self.pretty {
            pairs.push(("_pretty", pretty.to_string()));
        }
        if let Some(summary) = self.summary {
            pairs.push(("_summary", summary.as_str().to_string()));
        }
        if !self.elements.is_empty() {
            pairs.push(("_elements", self.elements.join(",")));
        }
        pairs
    }

    pub fn query_string(&self) -> Option<String> {
        encode_pairs(self.query_pairs())
    }

    /// Options for requests issued on behalf of this call, e.g. following
    /// pagination links: same cancellation and headers, no query options
    /// (links already carry them).
    pub fn for_follow_up(&self) -> RequestOptions {
        RequestOptions {
            cancel: self.cancel.clone(),
            headers: self.headers.clone(),
            ..Default::default()
        }
    }
}

/// `_history` parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryParameters {
    /// `_count`
    pub count: Option<u32>,
    /// `_since` (instant)
    pub since: Option<String>,
    /// `_at` (date/dateTime)
    pub at: Option<String>,
    /// `_list`
    pub list: Option<String>,
}

impl HistoryParameters {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(count) = self.count {
            pairs.push(("_count", count.to_string()));
        }
        if let Some(since) = &self.since {
            pairs.push(("_since", since.clone()));
        }
        if let Some(at) = &self.at {
            pairs.push(("_at", at.clone()));
        }
        if let Some(list) = &self.list {
            pairs.push(("_list", list.clone()));
        }
        pairs
    }

    pub fn query_string(&self) -> Option<String> {
        encode_pairs(self.query_pairs())
    }
}

/// Which history to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryScope {
    /// `/_history`
    System,
    /// `/{type}/_history`
    Type(String),
    /// `/{type}/{id}/_history`
    Instance(ResourceKey),
}

impl HistoryScope {
    pub(crate) fn path(&self) -> String {
        match self {
            HistoryScope::System => "_history".to_string(),
            HistoryScope::Type(resource_type) => format!("{}/_history", resource_type),
            HistoryScope::Instance(key) => format!("{}/_history", key),
        }
    }
}

/// `mode` of the `metadata` interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityMode {
    Full,
    Normative,
    Terminology,
}

impl CapabilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityMode::Full => "full",
            CapabilityMode::Normative => "normative",
            CapabilityMode::Terminology => "terminology",
        }
    }
}

fn encode_pairs(pairs: Vec<(&'static str, String)>) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish(),
    )
}

/// Join query fragments with `&`, skipping empty ones
pub(crate) fn join_query<I>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let joined = parts
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("&");
    (!joined.is_empty()).then_some(joined)
}

/// Append a query string to a path
pub(crate) fn with_query(path: &str, query: Option<String>) -> String {
    match query {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_serialization_is_fixed() {
        let options = RequestOptions::new()
            .with_elements(&["id", "name"])
            .with_summary(SummaryMode::Data)
            .with_pretty(true)
            .with_format("json")
            .with_prevent_concurrent_updates(true)
            .with_version_id("3");

        assert_eq!(
            options.query_string().as_deref(),
            Some("_format=json&_pretty=true&_summary=data&_elements=id%2Cname")
        );
        assert_eq!(RequestOptions::default().query_string(), None);
    }

    #[test]
    fn test_history_parameters() {
        let params = HistoryParameters {
            count: Some(10),
            since: Some("2024-01-01T00:00:00+01:00".into()),
            ..Default::default()
        };
        assert_eq!(
            params.query_string().as_deref(),
            Some("_count=10&_since=2024-01-01T00%3A00%3A00%2B01%3A00")
        );
        assert_eq!(
            HistoryScope::Instance(ResourceKey::new("Patient", "1")).path(),
            "Patient/1/_history"
        );
        assert_eq!(HistoryScope::System.path(), "_history");
    }

    #[test]
    fn test_join_query() {
        assert_eq!(
            join_query([Some("a=1".into()), None, Some(String::new()), Some("b=2".into())]),
            Some("a=1&b=2".to_string())
        );
        assert_eq!(join_query([None, None]), None);
        assert_eq!(with_query("Patient", None), "Patient");
        assert_eq!(with_query("", Some("x=1".into())), "?x=1");
    }

    #[test]
    fn test_follow_up_keeps_cancellation() {
        let token = CancellationToken::new();
        let options = RequestOptions::new().with_cancel(token.clone()).with_format("json");
        let follow_up = options.for_follow_up();

        assert!(follow_up.format.is_none());
        token.cancel();
        assert!(follow_up.cancel.unwrap().is_cancelled());
    }
}
