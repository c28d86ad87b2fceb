//! FHIR RESTful client
//!
//! One method per FHIR interaction. Every method issues at most one HTTP
//! exchange (paging helpers issue one per page) and never retries.

use fhir_core::{
    Bundle, BundleType, CapabilityStatement, FhirError, FhirResource, OperationOutcome, PatchBody,
    Resource, ResourceKey, ResourceKind, Retrieved, SearchParameters, ToResourceKey,
};
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, IF_MATCH,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::executor::BundleExecutor;
use crate::instrumentation::{self, REQUEST_ID_HEADER};
use crate::navigator::{BundleNavigator, WithReferences};
use crate::operation::{Operation, OperationParameters};
use crate::options::{
    CapabilityMode, HistoryParameters, HistoryScope, RequestOptions, join_query, with_query,
};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// Media type of FHIR JSON documents
pub const FHIR_JSON: &str = "application/fhir+json";

/// Media type of JSON Patch documents
pub const JSON_PATCH: &str = "application/json-patch+json";

/// Client for a FHIR REST endpoint. Cheap to clone.
#[derive(Clone)]
pub struct FhirClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    accept: HeaderValue,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for FhirClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FhirClient")
            .field("base_url", &self.inner.config.base_url.as_str())
            .finish()
    }
}

impl FhirClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let accept = match config.accept_fhir_version.as_deref() {
            Some(version) => HeaderValue::from_str(&format!("{}; fhirVersion={}", FHIR_JSON, version))
                .map_err(|_| ClientError::Config(format!("Invalid FHIR version token: {}", version)))?,
            None => HeaderValue::from_static(FHIR_JSON),
        };

        let transport: Arc<dyn Transport> = match (&config.transport, config.timeout) {
            (Some(transport), _) => transport.clone(),
            (None, Some(timeout)) => Arc::new(ReqwestTransport::with_timeout(timeout)?),
            (None, None) => Arc::new(ReqwestTransport::new()),
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                accept,
                transport,
            }),
        })
    }

    /// Client configured from `FHIR_*` environment variables
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.config.base_url
    }

    // ---------------------------------------------------------------------
    // Instance interactions
    // ---------------------------------------------------------------------

    /// `GET {type}/{id}`. A 404 is `Ok(None)`.
    pub async fn read<K: ResourceKind>(
        &self,
        kind: K,
        id: &str,
        options: RequestOptions,
    ) -> Result<Option<Retrieved<K::Resource>>, ClientError> {
        let resource_type = kind.resource_type();
        let id = require_id(resource_type, id)?;
        self.read_path(&format!("{}/{}", resource_type, id), &options)
            .await
    }

    /// `GET {type}/{id}/_history/{vid}`. A 404 is `Ok(None)`.
    pub async fn vread<K: ResourceKind>(
        &self,
        kind: K,
        id: &str,
        version_id: &str,
        options: RequestOptions,
    ) -> Result<Option<Retrieved<K::Resource>>, ClientError> {
        let resource_type = kind.resource_type();
        let id = require_id(resource_type, id)?;
        let version_id = version_id.trim();
        if version_id.is_empty() {
            return Err(FhirError::Invalid(format!("vread of {}/{} without a version", resource_type, id)).into());
        }
        self.read_path(
            &format!("{}/{}/_history/{}", resource_type, id, version_id),
            &options,
        )
        .await
    }

    async fn read_path<R: FhirResource>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Option<Retrieved<R>>, ClientError> {
        let target = with_query(path, options.query_string());
        match self
            .exchange(Method::GET, &target, None, HeaderMap::new(), options)
            .await
        {
            Ok(response) => expect_document(&response, path).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `POST {type}`; `conditional` criteria make it a conditional create
    pub async fn create<R: FhirResource>(
        &self,
        resource: &R,
        mut options: RequestOptions,
    ) -> Result<Retrieved<R>, ClientError> {
        let resource_type = require_type(resource.resource_type())?;
        let query = self.write_query(resource_type, &mut options);
        let body = serde_json::to_vec(resource)?;

        let response = self
            .exchange(
                Method::POST,
                &with_query(resource_type, query),
                Some(body),
                HeaderMap::new(),
                &options,
            )
            .await?;
        expect_document(&response, resource_type)
    }

    /// `PUT {type}/{id}` (or `PUT {type}?criteria` without an id).
    ///
    /// When the concurrency guard is on and the resource carries
    /// `meta.versionId`, sends `If-Match: W/"{versionId}"`.
    pub async fn update<R: FhirResource>(
        &self,
        resource: &R,
        mut options: RequestOptions,
    ) -> Result<Retrieved<R>, ClientError> {
        let resource_type = require_type(resource.resource_type())?;
        let path = match resource.id().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => format!("{}/{}", resource_type, id),
            None => resource_type.to_string(),
        };

        let mut headers = HeaderMap::new();
        if self.guard_enabled(&options) {
            if let Some(version_id) = resource.version_id() {
                headers.insert(IF_MATCH, weak_etag(version_id)?);
            }
        }

        let query = self.write_query(resource_type, &mut options);
        let body = serde_json::to_vec(resource)?;
        let response = self
            .exchange(Method::PUT, &with_query(&path, query), Some(body), headers, &options)
            .await?;
        expect_document(&response, &path)
    }

    /// Create when the resource has no id, update otherwise
    pub async fn save<R: FhirResource>(
        &self,
        resource: &R,
        options: RequestOptions,
    ) -> Result<Retrieved<R>, ClientError> {
        let has_id = resource.id().is_some_and(|id| !id.trim().is_empty());
        if has_id {
            self.update(resource, options).await
        } else {
            self.create(resource, options).await
        }
    }

    /// `PATCH {type}/{id}` with a JSON Patch document.
    ///
    /// `If-Match` is only sent for an explicit `options.version_id`.
    pub async fn patch<K: ResourceKind>(
        &self,
        kind: K,
        id: &str,
        body: impl Into<PatchBody>,
        mut options: RequestOptions,
    ) -> Result<Retrieved<K::Resource>, ClientError> {
        let resource_type = require_type(kind.resource_type())?;
        let id = require_id(resource_type, id)?;
        let path = format!("{}/{}", resource_type, id);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_PATCH));
        if self.guard_enabled(&options) {
            if let Some(version_id) = options.version_id.as_deref() {
                headers.insert(IF_MATCH, weak_etag(version_id)?);
            }
        }

        let operations = body.into().normalize(Some(resource_type));
        let body = serde_json::to_vec(&operations)?;
        let query = self.write_query(resource_type, &mut options);
        let response = self
            .exchange(Method::PATCH, &with_query(&path, query), Some(body), headers, &options)
            .await?;
        expect_document(&response, &path)
    }

    /// `DELETE {type}/{id}` for anything that names a resource
    pub async fn delete<T: ToResourceKey + ?Sized>(
        &self,
        target: &T,
        options: RequestOptions,
    ) -> Result<(), ClientError> {
        let key = self.local_key(target)?;
        let target = with_query(&key.to_string(), options.query_string());
        self.exchange(Method::DELETE, &target, None, HeaderMap::new(), &options)
            .await?;
        Ok(())
    }

    /// `GET [{type}[/{id}]]/_history`
    pub async fn history(
        &self,
        scope: HistoryScope,
        params: HistoryParameters,
        options: RequestOptions,
    ) -> Result<BundleNavigator<Resource>, ClientError> {
        let query = join_query([params.query_string(), options.query_string()]);
        self.fetch_page(&with_query(&scope.path(), query), options)
            .await
    }

    // ---------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------

    /// `GET {type}?criteria`
    pub async fn search<K: ResourceKind>(
        &self,
        kind: K,
        params: impl Into<SearchParameters>,
        options: RequestOptions,
    ) -> Result<BundleNavigator<K::Resource>, ClientError> {
        self.search_path(Some(kind.resource_type()), params.into(), options)
            .await
    }

    /// `GET ?criteria` across all resource types
    pub async fn search_system(
        &self,
        params: impl Into<SearchParameters>,
        options: RequestOptions,
    ) -> Result<BundleNavigator<Resource>, ClientError> {
        self.search_path(None, params.into(), options).await
    }

    async fn search_path<R: FhirResource>(
        &self,
        resource_type: Option<&str>,
        params: SearchParameters,
        options: RequestOptions,
    ) -> Result<BundleNavigator<R>, ClientError> {
        let query = join_query([params.normalize(resource_type), options.query_string()]);
        let target = with_query(resource_type.unwrap_or_default(), query);
        self.fetch_page(&target, options).await
    }

    /// Search that must match exactly one resource
    pub async fn search_one<K: ResourceKind>(
        &self,
        kind: K,
        params: impl Into<SearchParameters>,
        options: RequestOptions,
    ) -> Result<WithReferences<K::Resource>, ClientError> {
        self.search(kind, params, options).await?.match_one()
    }

    /// Run a search and hand every page to `on_page`, following `next` links
    /// until there are none. An error from `on_page` stops the traversal.
    pub async fn search_by_page<K, F, Fut>(
        &self,
        kind: K,
        params: impl Into<SearchParameters>,
        mut on_page: F,
        options: RequestOptions,
    ) -> Result<(), ClientError>
    where
        K: ResourceKind,
        F: FnMut(BundleNavigator<K::Resource>) -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        let follow_up = options.for_follow_up();
        let mut page = self.search(kind, params, options).await?;
        let mut pages = 1usize;

        loop {
            let next = page.next_url().map(str::to_string);
            on_page(page).await?;

            let Some(next) = next else { break };
            page = self.fetch_page(&next, follow_up.for_follow_up()).await?;
            pages += 1;
        }

        tracing::debug!(pages, "Search traversal complete");
        Ok(())
    }

    /// Every page of a search, concatenated into one unpaged navigator
    pub async fn search_all_pages<K: ResourceKind>(
        &self,
        kind: K,
        params: impl Into<SearchParameters>,
        options: RequestOptions,
    ) -> Result<BundleNavigator<K::Resource>, ClientError> {
        let mut pages = Vec::new();
        self.search_by_page(
            kind,
            params,
            |page| {
                pages.push(page);
                async { Ok(()) }
            },
            options,
        )
        .await?;
        Ok(BundleNavigator::concat(pages))
    }

    /// `GET` a pagination link (or any Bundle-returning URL under the base)
    pub async fn fetch_page<R: FhirResource>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<BundleNavigator<R>, ClientError> {
        let response = self
            .exchange(Method::GET, url, None, HeaderMap::new(), &options)
            .await?;
        let document: JsonValue = expect_document(&response, url)?;

        let found = document.get("resourceType").and_then(|t| t.as_str());
        if found != Some("Bundle") {
            return Err(ClientError::NotABundle {
                url: url.to_string(),
                found: found.unwrap_or("no resourceType").to_string(),
            });
        }

        let bundle: Bundle = serde_json::from_value(document)?;
        BundleNavigator::attached(bundle, self.clone())
    }

    // ---------------------------------------------------------------------
    // Whole-system interactions
    // ---------------------------------------------------------------------

    /// `GET metadata[?mode=]`
    pub async fn capabilities(
        &self,
        mode: Option<CapabilityMode>,
        options: RequestOptions,
    ) -> Result<CapabilityStatement, ClientError> {
        let query = join_query([
            mode.map(|m| format!("mode={}", m.as_str())),
            options.query_string(),
        ]);
        let response = self
            .exchange(Method::GET, &with_query("metadata", query), None, HeaderMap::new(), &options)
            .await?;
        expect_document(&response, "metadata")
    }

    /// Submit a batch bundle; its `type` is forced to `batch`
    pub async fn batch(&self, bundle: Bundle, options: RequestOptions) -> Result<Bundle, ClientError> {
        self.submit_bundle(bundle, BundleType::Batch, options).await
    }

    /// Submit a transaction bundle; its `type` is forced to `transaction`
    pub async fn transaction(
        &self,
        bundle: Bundle,
        options: RequestOptions,
    ) -> Result<Bundle, ClientError> {
        self.submit_bundle(bundle, BundleType::Transaction, options)
            .await
    }

    /// Incremental batch builder
    pub fn batch_builder(&self) -> BundleExecutor {
        BundleExecutor::new(self.clone(), BundleType::Batch)
    }

    /// Incremental transaction builder
    pub fn transaction_builder(&self) -> BundleExecutor {
        BundleExecutor::new(self.clone(), BundleType::Transaction)
    }

    async fn submit_bundle(
        &self,
        mut bundle: Bundle,
        bundle_type: BundleType,
        options: RequestOptions,
    ) -> Result<Bundle, ClientError> {
        bundle.bundle_type = bundle_type;
        let body = serde_json::to_vec(&bundle)?;
        let response = self
            .exchange(
                Method::POST,
                &with_query("", options.query_string()),
                Some(body),
                HeaderMap::new(),
                &options,
            )
            .await?;
        expect_document(&response, "bundle")
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    /// Invoke a typed `$operation`
    pub async fn execute<O: Operation>(
        &self,
        operation: &O,
        options: RequestOptions,
    ) -> Result<O::Output, ClientError> {
        let params = operation.parameters();
        let name = params.operation.clone();
        let response = self.execute_exchange(params, &options).await?;
        expect_document(&response, &name)
    }

    /// Invoke an `$operation` described by raw parameters
    pub async fn execute_raw(
        &self,
        params: OperationParameters,
        options: RequestOptions,
    ) -> Result<Option<JsonValue>, ClientError> {
        let response = self.execute_exchange(params, &options).await?;
        Ok(response.json()?)
    }

    async fn execute_exchange(
        &self,
        params: OperationParameters,
        options: &RequestOptions,
    ) -> Result<HttpResponse, ClientError> {
        let path = params.path();
        if params.affects_state {
            let body = serde_json::to_vec(&params.parameters)?;
            let target = with_query(&path, options.query_string());
            self.exchange(Method::POST, &target, Some(body), HeaderMap::new(), options)
                .await
        } else {
            let query = join_query([params.query_string(), options.query_string()]);
            self.exchange(Method::GET, &with_query(&path, query), None, HeaderMap::new(), options)
                .await
        }
    }

    // ---------------------------------------------------------------------
    // Fetch primitive
    // ---------------------------------------------------------------------

    /// Raw exchange against a target under the base URL.
    ///
    /// Returns the parsed JSON body, or `None` when the server sent no content.
    pub async fn fetch(
        &self,
        method: Method,
        target: &str,
        body: Option<Vec<u8>>,
        options: RequestOptions,
    ) -> Result<Option<JsonValue>, ClientError> {
        let response = self
            .exchange(method, target, body, HeaderMap::new(), &options)
            .await?;
        Ok(response.json()?)
    }

    /// Resolve `target` against the base URL, refusing anything that leaves it
    pub fn resolve_url(&self, target: &str) -> Result<Url, ClientError> {
        let base = self.base_url();
        let url = base.join(target.trim()).map_err(|e| ClientError::InvalidUrl {
            url: target.to_string(),
            reason: e.to_string(),
        })?;

        if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
            return Err(ClientError::CrossOrigin {
                url: url.to_string(),
                base: base.to_string(),
            });
        }
        Ok(url)
    }

    /// Key of a target on this server. Absolute targets must live under the
    /// base URL, otherwise the key would be sent to the wrong server.
    pub fn local_key<T: ToResourceKey + ?Sized>(&self, target: &T) -> Result<ResourceKey, ClientError> {
        if let Some(url) = target.absolute_url() {
            self.resolve_url(url)?;
        }
        Ok(target.to_resource_key()?)
    }

    async fn exchange(
        &self,
        method: Method,
        target: &str,
        body: Option<Vec<u8>>,
        call_headers: HeaderMap,
        options: &RequestOptions,
    ) -> Result<HttpResponse, ClientError> {
        ensure_not_cancelled(options.cancel.as_ref())?;
        let url = self.resolve_url(target)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, self.inner.accept.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
        for (name, value) in call_headers.iter().chain(options.headers.iter()) {
            headers.insert(name.clone(), value.clone());
        }

        let request_id = HeaderName::from_static("x-request-id");
        if !headers.contains_key(&request_id) {
            headers.insert(request_id, instrumentation::new_request_id());
        }

        if !headers.contains_key(AUTHORIZATION) {
            if let Some(auth) = &self.inner.config.auth {
                let value = auth.header_value(&url).await?;
                let value = HeaderValue::from_str(&value).map_err(|_| {
                    ClientError::Config("Authorization value is not a valid header".into())
                })?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        let path = instrumentation::normalize_path(self.base_url(), &url);
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let request = HttpRequest {
            method: method.clone(),
            url: url.clone(),
            headers,
            body,
        };

        let started = Instant::now();
        let exchange = self.inner.transport.send(request);
        let result = match &options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        instrumentation::record_exchange(&method, &path, None, started.elapsed());
                        tracing::info!(method = %method, url = %url, request_id = %request_id, "FHIR request cancelled");
                        return Err(ClientError::Cancelled);
                    }
                    result = exchange => result,
                }
            }
            None => exchange.await,
        };
        let elapsed = started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                instrumentation::record_exchange(&method, &path, None, elapsed);
                tracing::warn!(method = %method, url = %url, request_id = %request_id, error = %e, "FHIR request failed");
                return Err(ClientError::Transport(e));
            }
        };
        instrumentation::record_exchange(&method, &path, Some(response.status), elapsed);

        if response.status.is_success() {
            tracing::debug!(
                method = %method,
                url = %url,
                request_id = %request_id,
                status = response.status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "FHIR request completed"
            );
            return Ok(response);
        }

        let outcome = parse_outcome(&response);
        let summary = outcome.as_ref().map(|o| o.to_string()).unwrap_or_default();
        tracing::warn!(
            method = %method,
            url = %url,
            request_id = %request_id,
            status = response.status.as_u16(),
            outcome = %summary,
            "FHIR server rejected request"
        );
        Err(ClientError::Protocol {
            status: response.status,
            outcome,
            response: Box::new(response),
        })
    }

    fn guard_enabled(&self, options: &RequestOptions) -> bool {
        options
            .prevent_concurrent_updates
            .unwrap_or(self.inner.config.prevent_concurrent_updates)
    }

    /// Conditional criteria first, then the generic options
    fn write_query(&self, resource_type: &str, options: &mut RequestOptions) -> Option<String> {
        let conditional = options
            .conditional
            .take()
            .and_then(|c| c.normalize(Some(resource_type)));
        join_query([conditional, options.query_string()])
    }
}

fn ensure_not_cancelled(token: Option<&CancellationToken>) -> Result<(), ClientError> {
    match token {
        Some(token) if token.is_cancelled() => Err(ClientError::Cancelled),
        _ => Ok(()),
    }
}

/// OperationOutcome carried by an error body, if any. Never fails.
fn parse_outcome(response: &HttpResponse) -> Option<OperationOutcome> {
    let document: JsonValue = serde_json::from_slice(&response.body).ok()?;
    if document.get("resourceType").and_then(|t| t.as_str()) != Some("OperationOutcome") {
        return None;
    }
    serde_json::from_value(document).ok()
}

/// Decode a body that must be present
fn expect_document<T: DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T, ClientError> {
    response
        .json()?
        .ok_or_else(|| ClientError::EmptyResponse(what.to_string()))
}

fn weak_etag(version_id: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(&format!("W/\"{}\"", version_id))
        .map_err(|_| FhirError::Invalid(format!("versionId {:?} is not a valid ETag", version_id)).into())
}

fn require_type(resource_type: &str) -> Result<&str, ClientError> {
    let resource_type = resource_type.trim();
    if resource_type.is_empty() {
        return Err(FhirError::MissingResourceType.into());
    }
    Ok(resource_type)
}

fn require_id<'a>(resource_type: &str, id: &'a str) -> Result<&'a str, ClientError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(FhirError::MissingId(resource_type.to_string()).into());
    }
    Ok(id)
}
