//! Incremental batch / transaction builder
//!
//! Entries are accumulated locally and submitted in one exchange by
//! [`BundleExecutor::send`]. Each entry yields an [`EntryHandle`] that picks
//! its counterpart out of the response bundle.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use fhir_core::{
    Bundle, BundleEntry, BundleEntryRequest, BundleType, FhirError, FhirResource, HttpVerb,
    OperationOutcome, PatchBody, Reference, Resource, SearchParameters, ToResourceKey,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::client::{FhirClient, JSON_PATCH};
use crate::error::ClientError;
use crate::options::{RequestOptions, with_query};

/// Position of an entry in the submitted bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(usize);

impl EntryHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Builder returned by [`FhirClient::batch_builder`] and
/// [`FhirClient::transaction_builder`]
#[derive(Debug)]
pub struct BundleExecutor {
    client: FhirClient,
    bundle: Bundle,
}

impl BundleExecutor {
    pub(crate) fn new(client: FhirClient, bundle_type: BundleType) -> Self {
        Self {
            client,
            bundle: Bundle::new(bundle_type),
        }
    }

    fn push(&mut self, entry: BundleEntry) -> EntryHandle {
        self.bundle.entry.push(entry);
        EntryHandle(self.bundle.entry.len() - 1)
    }

    fn push_request(&mut self, method: HttpVerb, url: String) -> EntryHandle {
        self.push(BundleEntry::request(BundleEntryRequest::new(method, url)))
    }

    pub fn read(&mut self, resource_type: &str, id: &str) -> Result<EntryHandle, ClientError> {
        let key = (resource_type, id).to_resource_key()?;
        Ok(self.push_request(HttpVerb::Get, key.to_string()))
    }

    pub fn vread(
        &mut self,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<EntryHandle, ClientError> {
        let key = (resource_type, id).to_resource_key()?;
        if version_id.trim().is_empty() {
            return Err(FhirError::Invalid(format!("vread of {} without a version", key)).into());
        }
        Ok(self.push_request(HttpVerb::Get, format!("{}/_history/{}", key, version_id.trim())))
    }

    pub fn search(
        &mut self,
        resource_type: &str,
        params: impl Into<SearchParameters>,
    ) -> Result<EntryHandle, ClientError> {
        let resource_type = non_empty_type(resource_type)?;
        let query = params.into().normalize(Some(resource_type));
        Ok(self.push_request(HttpVerb::Get, with_query(resource_type, query)))
    }

    /// `POST {type}`. The entry gets a `urn:uuid` fullUrl that later entries
    /// of a transaction can reference (see [`BundleExecutor::reference`]).
    pub fn create<R: FhirResource>(&mut self, resource: &R) -> Result<EntryHandle, ClientError> {
        self.create_entry(resource, None)
    }

    /// Conditional create: `ifNoneExist` carries the criteria
    pub fn create_if_none_exist<R: FhirResource>(
        &mut self,
        resource: &R,
        criteria: impl Into<SearchParameters>,
    ) -> Result<EntryHandle, ClientError> {
        let criteria = criteria.into().normalize(Some(resource.resource_type()));
        self.create_entry(resource, criteria)
    }

    fn create_entry<R: FhirResource>(
        &mut self,
        resource: &R,
        if_none_exist: Option<String>,
    ) -> Result<EntryHandle, ClientError> {
        let resource = to_resource(resource)?;
        let resource_type = non_empty_type(resource.resource_type())?.to_string();

        let mut request = BundleEntryRequest::new(HttpVerb::Post, resource_type);
        request.if_none_exist = if_none_exist;

        let mut entry = BundleEntry::new(Some(format!("urn:uuid:{}", Uuid::new_v4())), resource);
        entry.request = Some(request);
        Ok(self.push(entry))
    }

    /// `PUT {type}/{id}`; `ifMatch` follows the client's concurrency guard
    pub fn update<R: FhirResource>(&mut self, resource: &R) -> Result<EntryHandle, ClientError> {
        let resource = to_resource(resource)?;
        let key = resource.to_resource_key()?;

        let mut request = BundleEntryRequest::new(HttpVerb::Put, key.to_string());
        if self.client.config().prevent_concurrent_updates {
            request.if_match = resource.version_id().map(|v| format!("W/\"{}\"", v));
        }

        let full_url = self.client.base_url().join(&key.to_string()).ok().map(String::from);
        let mut entry = BundleEntry::new(full_url, resource);
        entry.request = Some(request);
        Ok(self.push(entry))
    }

    /// `PATCH {type}/{id}`. The JSON Patch travels as a base64 `Binary`.
    pub fn patch(
        &mut self,
        resource_type: &str,
        id: &str,
        body: impl Into<PatchBody>,
        version_id: Option<&str>,
    ) -> Result<EntryHandle, ClientError> {
        let key = (resource_type, id).to_resource_key()?;
        let operations = body.into().normalize(Some(&key.resource_type));
        let document = serde_json::to_vec(&operations)?;

        let binary = Resource::build(
            "Binary",
            json!({"contentType": JSON_PATCH, "data": STANDARD.encode(document)}),
        )?;

        let mut request = BundleEntryRequest::new(HttpVerb::Patch, key.to_string());
        request.if_match = version_id.map(|v| format!("W/\"{}\"", v));

        let mut entry = BundleEntry::new(None, binary);
        entry.request = Some(request);
        Ok(self.push(entry))
    }

    pub fn delete<T: ToResourceKey + ?Sized>(&mut self, target: &T) -> Result<EntryHandle, ClientError> {
        let key = self.client.local_key(target)?;
        Ok(self.push_request(HttpVerb::Delete, key.to_string()))
    }

    /// Reference to a queued entry, usable inside other entries
    pub fn reference(&self, handle: EntryHandle) -> Option<Reference> {
        let entry = self.bundle.entry.get(handle.0)?;
        if let Some(full_url) = &entry.full_url {
            return Some(Reference::new(full_url.clone()));
        }
        entry
            .resource
            .as_ref()
            .and_then(|r| r.to_resource_key().ok())
            .map(|key| Reference::new(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.bundle.entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.entry.is_empty()
    }

    /// The bundle as it will be submitted
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Submit all entries in one exchange
    pub async fn send(self, options: RequestOptions) -> Result<BundleResponse, ClientError> {
        let bundle_type = self.bundle.bundle_type;
        tracing::debug!(entries = self.bundle.entry.len(), bundle_type = ?bundle_type, "Submitting bundle");

        let bundle = match bundle_type {
            BundleType::Transaction => self.client.transaction(self.bundle, options).await?,
            _ => self.client.batch(self.bundle, options).await?,
        };
        Ok(BundleResponse { bundle })
    }
}

fn to_resource<R: FhirResource>(resource: &R) -> Result<Resource, ClientError> {
    Ok(Resource::try_from(serde_json::to_value(resource)?)?)
}

fn non_empty_type(resource_type: &str) -> Result<&str, ClientError> {
    let resource_type = resource_type.trim();
    if resource_type.is_empty() {
        return Err(FhirError::MissingResourceType.into());
    }
    Ok(resource_type)
}

/// A `batch-response` / `transaction-response`, addressed by [`EntryHandle`]
#[derive(Debug, Clone)]
pub struct BundleResponse {
    bundle: Bundle,
}

impl BundleResponse {
    pub fn entry(&self, handle: EntryHandle) -> Option<&BundleEntry> {
        self.bundle.entry.get(handle.0)
    }

    /// HTTP status of the entry, parsed from `response.status`
    pub fn status(&self, handle: EntryHandle) -> Option<u16> {
        self.entry(handle)?.response.as_ref()?.status_code()
    }

    pub fn is_success(&self, handle: EntryHandle) -> bool {
        self.entry(handle)
            .and_then(|e| e.response.as_ref())
            .is_some_and(|r| r.is_success())
    }

    pub fn resource(&self, handle: EntryHandle) -> Option<&Resource> {
        self.entry(handle)?.resource.as_ref()
    }

    /// Decode the entry's resource; `None` when the server returned none
    pub fn decode<R: DeserializeOwned>(&self, handle: EntryHandle) -> Result<Option<R>, ClientError> {
        self.resource(handle)
            .map(|r| r.decode().map_err(ClientError::from))
            .transpose()
    }

    /// `response.outcome` of a failed (or annotated) entry
    pub fn outcome(&self, handle: EntryHandle) -> Option<OperationOutcome> {
        self.entry(handle)?
            .response
            .as_ref()?
            .outcome
            .as_ref()?
            .decode()
            .ok()
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn into_bundle(self) -> Bundle {
        self.bundle
    }
}
