//! Integration tests for the FHIR client.
//!
//! Each test starts a small in-memory FHIR server (axum, bound to an
//! ephemeral port) and drives it through the real reqwest transport.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use fhir_client::fhir_core::{Resource, SearchBuilder};
use fhir_client::{AuthSupplier, CapabilityMode, ClientConfig, ClientError, FhirClient, RequestOptions};

// ---------------------------------------------------------------------------
// Mock server
// ---------------------------------------------------------------------------

const TEST_TOKEN: &str = "test-secret-token";

type Reply = (StatusCode, Json<JsonValue>);

#[derive(Default)]
struct Store {
    patients: BTreeMap<String, JsonValue>,
    created: u32,
}

#[derive(Clone)]
struct AppState {
    base: String,
    store: Arc<Mutex<Store>>,
}

fn outcome(status: StatusCode, code: &str, diagnostics: &str) -> Reply {
    (
        status,
        Json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": code, "diagnostics": diagnostics}]
        })),
    )
}

fn check_auth(headers: &HeaderMap) -> Result<(), Reply> {
    let expected = format!("Bearer {}", TEST_TOKEN);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(outcome(StatusCode::UNAUTHORIZED, "login", "Missing or invalid token")),
    }
}

fn version_of(resource: &JsonValue) -> u32 {
    resource["meta"]["versionId"]
        .as_str()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

async fn metadata() -> Reply {
    (
        StatusCode::OK,
        Json(json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "kind": "instance",
            "fhirVersion": "4.0.1",
            "format": ["json"],
            "rest": [{"mode": "server"}]
        })),
    )
}

async fn search_patients(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Reply, Reply> {
    check_auth(&headers)?;
    let count: usize = params.get("_count").and_then(|c| c.parse().ok()).unwrap_or(2);
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);

    let store = state.store.lock().unwrap();
    let matching: Vec<&JsonValue> = store
        .patients
        .values()
        .filter(|p| match params.get("family") {
            Some(family) => p["name"][0]["family"] == family.as_str(),
            None => true,
        })
        .collect();

    let entries: Vec<JsonValue> = matching
        .iter()
        .skip((page - 1) * count)
        .take(count)
        .map(|p| {
            json!({
                "fullUrl": format!("{}/Patient/{}", state.base, p["id"].as_str().unwrap_or_default()),
                "resource": p,
                "search": {"mode": "match"}
            })
        })
        .collect();

    let mut links = vec![json!({
        "relation": "self",
        "url": format!("{}/Patient?_count={}&page={}", state.base, count, page)
    })];
    if page * count < matching.len() {
        links.push(json!({
            "relation": "next",
            "url": format!("{}/Patient?_count={}&page={}", state.base, count, page + 1)
        }));
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": matching.len(),
            "link": links,
            "entry": entries
        })),
    ))
}

async fn create_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut patient): Json<JsonValue>,
) -> Result<Reply, Reply> {
    check_auth(&headers)?;
    let mut store = state.store.lock().unwrap();
    store.created += 1;
    let id = format!("p{}", store.created);

    patient["id"] = json!(id);
    patient["meta"] = json!({"versionId": "1"});
    store.patients.insert(id, patient.clone());
    Ok((StatusCode::CREATED, Json(patient)))
}

async fn read_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Reply, Reply> {
    check_auth(&headers)?;
    let store = state.store.lock().unwrap();
    match store.patients.get(&id) {
        Some(patient) => Ok((StatusCode::OK, Json(patient.clone()))),
        None => Err(outcome(
            StatusCode::NOT_FOUND,
            "not-found",
            &format!("Patient/{} is not known", id),
        )),
    }
}

async fn update_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut patient): Json<JsonValue>,
) -> Result<Reply, Reply> {
    check_auth(&headers)?;
    let mut store = state.store.lock().unwrap();
    let current = store.patients.get(&id).map(version_of).unwrap_or(0);

    if let Some(if_match) = headers.get("if-match").and_then(|v| v.to_str().ok()) {
        if if_match != format!("W/\"{}\"", current) {
            return Err(outcome(
                StatusCode::PRECONDITION_FAILED,
                "conflict",
                &format!("Version {} is no longer current", if_match),
            ));
        }
    }

    patient["id"] = json!(id);
    patient["meta"] = json!({"versionId": (current + 1).to_string()});
    store.patients.insert(id, patient.clone());
    let status = if current == 0 { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(patient)))
}

async fn delete_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, Reply> {
    check_auth(&headers)?;
    state.store.lock().unwrap().patients.remove(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// Start the mock server and return its FHIR base URL.
async fn start_server() -> (String, Arc<Mutex<Store>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local address");

    let state = AppState {
        base: format!("http://{}/fhir", addr),
        store: Arc::new(Mutex::new(Store::default())),
    };
    let app = Router::new()
        .route("/fhir/metadata", get(metadata))
        .route("/fhir/Patient", get(search_patients).post(create_patient))
        .route(
            "/fhir/Patient/{id}",
            get(read_patient).put(update_patient).delete(delete_patient),
        )
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server failed");
    });

    (state.base, state.store)
}

fn client(base: &str) -> FhirClient {
    let config = ClientConfig::new(base)
        .unwrap()
        .with_auth(AuthSupplier::bearer(TEST_TOKEN))
        .with_prevent_concurrent_updates(true);
    FhirClient::new(config).unwrap()
}

fn sample_patient(family: &str, given: &str) -> Resource {
    Resource::build(
        "Patient",
        json!({"name": [{"family": family, "given": [given]}], "active": true}),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_capabilities() {
    let (base, _store) = start_server().await;
    let client = client(&base);

    let statement = client
        .capabilities(Some(CapabilityMode::Full), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(statement.fhir_version.as_deref(), Some("4.0.1"));
    assert_eq!(statement.status.as_deref(), Some("active"));
}

#[tokio::test]
async fn test_crud_lifecycle() {
    let (base, _store) = start_server().await;
    let client = client(&base);

    // Create
    let created = client
        .create(&sample_patient("Doe", "Jane"), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(created.id(), "p1");
    assert_eq!(created.version_id(), Some("1"));

    // Read
    let read = client
        .read("Patient", created.id(), RequestOptions::new())
        .await
        .unwrap()
        .expect("patient should exist");
    assert_eq!(read.get("active"), Some(&json!(true)));

    // Update guarded by the version we read
    let mut changed = read.clone().into_inner();
    changed.set("active", json!(false)).unwrap();
    let updated = client.update(&changed, RequestOptions::new()).await.unwrap();
    assert_eq!(updated.version_id(), Some("2"));

    // A second update with the stale version is rejected
    let err = client.update(&changed, RequestOptions::new()).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.status(), Some(StatusCode::PRECONDITION_FAILED));
    assert_eq!(
        err.outcome().map(|o| o.to_string()).as_deref(),
        Some("Version W/\"1\" is no longer current")
    );

    // Delete, then read reports absence
    client.delete(&*updated, RequestOptions::new()).await.unwrap();
    let gone = client
        .read("Patient", "p1", RequestOptions::new())
        .await
        .unwrap();
    assert!(gone.is_none());
}

#[tokio::test]
async fn test_search_pagination() {
    let (base, _store) = start_server().await;
    let client = client(&base);

    for given in ["Ann", "Bob", "Cid"] {
        client
            .create(&sample_patient("Doe", given), RequestOptions::new())
            .await
            .unwrap();
    }
    client
        .create(&sample_patient("Roe", "Dan"), RequestOptions::new())
        .await
        .unwrap();

    let first = client
        .search(
            "Patient",
            SearchBuilder::new(Some("Patient")).string("family", "Doe", None).count(2),
            RequestOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.total(), Some(3));
    assert_eq!(first.matches().len(), 2);
    assert!(first.next_url().is_some());

    let second = first
        .next_page(RequestOptions::new())
        .await
        .unwrap()
        .expect("a second page");
    assert_eq!(second.matches().len(), 1);
    assert!(second.next_url().is_none());

    let everyone = client
        .search_all_pages("Patient", "_count=3", RequestOptions::new())
        .await
        .unwrap();
    let ids: Vec<&str> = everyone.matches().iter().map(|p| p.id()).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3", "p4"]);
    assert!(everyone.find("Patient", "p4").is_some());
}

#[tokio::test]
async fn test_search_one() {
    let (base, _store) = start_server().await;
    let client = client(&base);

    client
        .create(&sample_patient("Doe", "Jane"), RequestOptions::new())
        .await
        .unwrap();
    client
        .create(&sample_patient("Roe", "Rick"), RequestOptions::new())
        .await
        .unwrap();

    let roe = client
        .search_one("Patient", "family=Roe", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(roe.id(), "p2");

    let nobody = client
        .search_one("Patient", "family=Smith", RequestOptions::new())
        .await;
    assert!(matches!(nobody, Err(ClientError::NoMatch)));
}

#[tokio::test]
async fn test_unauthorized_request_surfaces_outcome() {
    let (base, store) = start_server().await;
    store
        .lock()
        .unwrap()
        .patients
        .insert("p1".into(), json!({"resourceType": "Patient", "id": "p1"}));

    let anonymous = FhirClient::new(ClientConfig::new(&base).unwrap()).unwrap();
    let err = anonymous
        .read("Patient", "p1", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(
        err.outcome().map(|o| o.to_string()).as_deref(),
        Some("Missing or invalid token")
    );
}

#[tokio::test]
async fn test_links_outside_base_are_refused() {
    let (base, _store) = start_server().await;
    let client = client(&base);

    let err = client
        .fetch_page::<Resource>("http://example.org/fhir/Patient?page=2", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::CrossOrigin { .. }));
}
