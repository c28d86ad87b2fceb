//! Shared fixtures for unit tests

use async_trait::async_trait;
use fhir_core::{FhirResource, TypedResource};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::FhirClient;
use crate::config::ClientConfig;
use crate::transport::{BoxError, HttpRequest, HttpResponse, Transport};

pub const BASE_URL: &str = "https://fhir.example.com/r4";

#[derive(Default)]
struct MockState {
    responses: VecDeque<HttpResponse>,
    requests: Vec<HttpRequest>,
}

/// Transport replaying queued responses and recording every request
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: HttpResponse) {
        self.state.lock().unwrap().responses.push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests().pop().expect("no request was sent")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.requests.push(request);
        state
            .responses
            .pop_front()
            .ok_or_else(|| "no response queued".into())
    }
}

pub fn json_response(status: u16, body: impl Serialize) -> HttpResponse {
    let status = StatusCode::from_u16(status).unwrap();
    HttpResponse::new(status, serde_json::to_vec(&body).unwrap())
}

pub fn patient(id: &str, version_id: Option<&str>) -> JsonValue {
    let mut patient = json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"family": "Doe", "given": ["Jane"]}]
    });
    if let Some(version_id) = version_id {
        patient["meta"] = json!({"versionId": version_id});
    }
    patient
}

/// One searchset page of Doe patients
pub fn bundle_page(ids: &[&str], next: Option<&str>) -> JsonValue {
    let entries: Vec<JsonValue> = ids
        .iter()
        .map(|id| {
            json!({
                "fullUrl": format!("{}/Patient/{}", BASE_URL, id),
                "resource": patient(id, None),
                "search": {"mode": "match"}
            })
        })
        .collect();

    let mut bundle = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": ids.len(),
        "entry": entries
    });
    if let Some(next) = next {
        bundle["link"] = json!([{"relation": "next", "url": next}]);
    }
    bundle
}

pub fn client_with(
    mock: &MockTransport,
    configure: impl FnOnce(ClientConfig) -> ClientConfig,
) -> FhirClient {
    let config = ClientConfig::new(BASE_URL)
        .unwrap()
        .with_transport(mock.clone());
    FhirClient::new(configure(config)).unwrap()
}

/// Caller-defined Patient struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPatient {
    pub resource_type: String,
    pub id: Option<String>,
    #[serde(default)]
    pub name: Vec<TestHumanName>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestHumanName {
    pub family: Option<String>,
}

impl TestPatient {
    pub fn family(&self) -> Option<&str> {
        self.name.first().and_then(|n| n.family.as_deref())
    }
}

impl FhirResource for TestPatient {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn version_id(&self) -> Option<&str> {
        None
    }
}

impl TypedResource for TestPatient {
    const RESOURCE_TYPE: &'static str = "Patient";
}
