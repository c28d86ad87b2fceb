use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// FHIR Bundle types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Searchset,
    History,
    Collection,
    Document,
    Message,
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    SubscriptionNotification,
}

/// FHIR Bundle resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "bundle_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

fn bundle_resource_type() -> String {
    "Bundle".to_string()
}

impl Bundle {
    /// Create an empty bundle of the given type
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            id: None,
            bundle_type,
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
        }
    }

    /// Create a searchset bundle
    pub fn searchset(total: u32, entries: Vec<BundleEntry>) -> Self {
        Self {
            total: Some(total),
            entry: entries,
            ..Self::new(BundleType::Searchset)
        }
    }

    /// Create a history bundle
    pub fn history(entries: Vec<BundleEntry>) -> Self {
        Self {
            total: Some(entries.len() as u32),
            entry: entries,
            ..Self::new(BundleType::History)
        }
    }

    /// Create a batch request bundle
    pub fn batch(entries: Vec<BundleEntry>) -> Self {
        Self {
            entry: entries,
            ..Self::new(BundleType::Batch)
        }
    }

    /// Create a transaction request bundle
    pub fn transaction(entries: Vec<BundleEntry>) -> Self {
        Self {
            entry: entries,
            ..Self::new(BundleType::Transaction)
        }
    }

    /// Add a link, e.g. `next` or `self`
    pub fn with_link(mut self, relation: impl Into<String>, url: impl Into<String>) -> Self {
        self.link.push(BundleLink {
            relation: relation.into(),
            url: url.into(),
        });
        self
    }

    /// URL of the first link with the given relation
    pub fn link(&self, relation: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == relation)
            .map(|l| l.url.as_str())
    }
}

/// Bundle navigation link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

/// Entry in a Bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleEntrySearch>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleEntryResponse>,
}

impl BundleEntry {
    pub fn new(full_url: Option<String>, resource: Resource) -> Self {
        Self {
            full_url,
            resource: Some(resource),
            search: None,
            request: None,
            response: None,
        }
    }

    /// Entry carrying a `search.mode`
    pub fn with_search_mode(mut self, mode: SearchEntryMode) -> Self {
        self.search = Some(BundleEntrySearch {
            mode: Some(mode),
            score: None,
        });
        self
    }

    /// Entry carrying a batch/transaction request
    pub fn request(request: BundleEntryRequest) -> Self {
        Self {
            full_url: None,
            resource: None,
            search: None,
            request: Some(request),
            response: None,
        }
    }

    pub fn search_mode(&self) -> Option<SearchEntryMode> {
        self.search.as_ref().and_then(|s| s.mode)
    }
}

/// Why an entry is part of a searchset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchEntryMode {
    Match,
    Include,
    Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntrySearch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SearchEntryMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// HTTP verbs allowed in batch/transaction entries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryRequest {
    pub method: HttpVerb,
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_none_match: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_modified_since: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_none_exist: Option<String>,
}

impl BundleEntryRequest {
    pub fn new(method: HttpVerb, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            if_none_match: None,
            if_modified_since: None,
            if_match: None,
            if_none_exist: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Resource>,
}

impl BundleEntryResponse {
    /// Numeric HTTP status, parsed from e.g. `"201 Created"`
    pub fn status_code(&self) -> Option<u16> {
        self.status.split_whitespace().next()?.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        self.status_code().is_some_and(|s| (200..300).contains(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundle_type_codes() {
        assert_eq!(
            serde_json::to_value(BundleType::TransactionResponse).unwrap(),
            json!("transaction-response")
        );
        assert_eq!(
            serde_json::from_value::<BundleType>(json!("batch-response")).unwrap(),
            BundleType::BatchResponse
        );
    }

    #[test]
    fn test_deserialize_searchset() {
        let bundle: Bundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 1,
            "link": [{"relation": "next", "url": "https://example.org/fhir/Patient?page=2"}],
            "entry": [{
                "fullUrl": "https://example.org/fhir/Patient/1",
                "resource": {"resourceType": "Patient", "id": "1"},
                "search": {"mode": "match", "score": 1}
            }]
        }))
        .unwrap();

        assert_eq!(bundle.bundle_type, BundleType::Searchset);
        assert_eq!(bundle.link("next"), Some("https://example.org/fhir/Patient?page=2"));
        assert_eq!(bundle.link("previous"), None);
        assert_eq!(bundle.entry[0].search_mode(), Some(SearchEntryMode::Match));
    }

    #[test]
    fn test_entry_without_resource() {
        let entry: BundleEntry = serde_json::from_value(json!({
            "response": {"status": "404 Not Found"}
        }))
        .unwrap();

        assert!(entry.resource.is_none());
        let response = entry.response.unwrap();
        assert_eq!(response.status_code(), Some(404));
        assert!(!response.is_success());
    }

    #[test]
    fn test_serialize_omits_empty_fields() {
        let bundle = Bundle::batch(vec![BundleEntry::request(BundleEntryRequest::new(
            HttpVerb::Get,
            "Patient/1",
        ))]);
        let value = serde_json::to_value(&bundle).unwrap();

        assert_eq!(
            value,
            json!({
                "resourceType": "Bundle",
                "type": "batch",
                "entry": [{"request": {"method": "GET", "url": "Patient/1"}}]
            })
        );
    }
}
