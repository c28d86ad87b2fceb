//! Navigation over one page of Bundle results
//!
//! A [`BundleNavigator`] splits a page into matches, includes and outcomes,
//! indexes every resource on the page by `Type/id` (and `fullUrl`) and
//! resolves references locally before falling back to the network.

use fhir_core::{
    Bundle, BundleEntry, BundleType, FhirError, FhirResource, OperationOutcome, Reference,
    Resource, ResourceKey, Retrieved, SearchEntryMode,
};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::client::FhirClient;
use crate::error::ClientError;
use crate::options::RequestOptions;

/// Page-wide resource index plus the client used for network fallbacks
#[derive(Debug, Default)]
struct ReferenceResolver {
    by_key: HashMap<ResourceKey, Resource>,
    by_full_url: HashMap<String, Resource>,
    client: Option<FhirClient>,
}

impl ReferenceResolver {
    fn index(entries: &[BundleEntry], client: Option<FhirClient>) -> Self {
        let mut resolver = ReferenceResolver {
            client,
            ..Default::default()
        };
        for entry in entries {
            let Some(resource) = &entry.resource else {
                continue;
            };
            if let Some(id) = resource.id() {
                resolver
                    .by_key
                    .entry(ResourceKey::new(resource.resource_type(), id))
                    .or_insert_with(|| resource.clone());
            }
            if let Some(full_url) = &entry.full_url {
                resolver
                    .by_full_url
                    .entry(full_url.clone())
                    .or_insert_with(|| resource.clone());
            }
        }
        resolver
    }

    fn local(&self, reference: &Reference) -> Option<&Resource> {
        if let Some(raw) = reference.reference.as_deref() {
            if let Some(resource) = self.by_full_url.get(raw.trim()) {
                return Some(resource);
            }
        }
        if !self.on_server(reference) {
            return None;
        }
        reference.key().and_then(|key| self.by_key.get(&key))
    }

    /// Relative references always point at our server; absolute ones only
    /// when they sit under the client's base URL.
    fn on_server(&self, reference: &Reference) -> bool {
        match (reference.absolute_url(), &self.client) {
            (None, _) => true,
            (Some(url), Some(client)) => client.resolve_url(url).is_ok(),
            (Some(_), None) => false,
        }
    }

    async fn resolve(&self, reference: &Reference) -> Result<Option<Resource>, ClientError> {
        if let Some(resource) = self.local(reference) {
            return Ok(Some(resource.clone()));
        }

        let unresolvable =
            || FhirError::UnresolvableReference(reference.reference.clone().unwrap_or_default());
        if reference.key().is_none() {
            return Err(unresolvable().into());
        }
        let client = self.client.as_ref().ok_or(ClientError::Detached)?;
        let key = client.local_key(reference).map_err(|_| unresolvable())?;

        tracing::debug!(reference = %key, "Resolving reference over the network");
        let resource = match reference.version_id() {
            Some(version_id) => {
                client
                    .vread(key.resource_type.as_str(), &key.id, version_id, RequestOptions::new())
                    .await?
            }
            None => {
                client
                    .read(key.resource_type.as_str(), &key.id, RequestOptions::new())
                    .await?
            }
        };
        Ok(resource.map(Retrieved::into_inner))
    }
}

/// One page of a searchset or history Bundle
#[derive(Debug, Clone)]
pub struct BundleNavigator<R = Resource> {
    bundle: Bundle,
    matches: Vec<Retrieved<R>>,
    resolver: Arc<ReferenceResolver>,
}

/// Entries counted as matches: `search.mode == match`, or any entry with a
/// resource when the bundle carries no search modes (history, collections).
fn is_match(entry: &BundleEntry) -> bool {
    match entry.search_mode() {
        Some(mode) => mode == SearchEntryMode::Match,
        None => entry.resource.is_some(),
    }
}

fn decode_match<R: FhirResource>(resource: &Resource) -> Result<Retrieved<R>, ClientError> {
    Ok(serde_json::from_value(resource.clone().into_json())?)
}

impl<R: FhirResource> BundleNavigator<R> {
    /// Navigator over a bundle obtained elsewhere. Network operations
    /// (`next_page`, `resolve` misses) fail with [`ClientError::Detached`].
    pub fn new(bundle: Bundle) -> Result<Self, ClientError> {
        Self::build(bundle, None)
    }

    pub(crate) fn attached(bundle: Bundle, client: FhirClient) -> Result<Self, ClientError> {
        Self::build(bundle, Some(client))
    }

    fn build(bundle: Bundle, client: Option<FhirClient>) -> Result<Self, ClientError> {
        let matches = bundle
            .entry
            .iter()
            .filter(|e| is_match(e))
            .filter_map(|e| e.resource.as_ref())
            .map(decode_match)
            .collect::<Result<Vec<_>, _>>()?;
        let resolver = ReferenceResolver::index(&bundle.entry, client);

        Ok(Self {
            bundle,
            matches,
            resolver: Arc::new(resolver),
        })
    }

    /// Concatenate pages into one unpaged navigator: matches and includes in
    /// page order, no pagination links.
    pub fn concat(pages: Vec<Self>) -> Self {
        let client = pages.iter().find_map(|p| p.resolver.client.clone());
        let bundle_type = pages
            .first()
            .map(|p| p.bundle.bundle_type)
            .unwrap_or(BundleType::Searchset);

        let mut entries = Vec::new();
        let mut matches = Vec::new();
        for page in pages {
            entries.extend(
                page.bundle
                    .entry
                    .into_iter()
                    .filter(|e| e.search_mode() != Some(SearchEntryMode::Outcome)),
            );
            matches.extend(page.matches);
        }

        let mut bundle = Bundle::new(bundle_type);
        bundle.total = Some(matches.len() as u32);
        bundle.entry = entries;
        let resolver = ReferenceResolver::index(&bundle.entry, client);

        Self {
            bundle,
            matches,
            resolver: Arc::new(resolver),
        }
    }

    /// Matched resources, decoded
    pub fn matches(&self) -> &[Retrieved<R>] {
        &self.matches
    }

    pub fn into_matches(self) -> Vec<Retrieved<R>> {
        self.matches
    }

    /// Resources pulled in by `_include` / `_revinclude`
    pub fn includes(&self) -> impl Iterator<Item = &Resource> {
        self.bundle
            .entry
            .iter()
            .filter(|e| e.search_mode() == Some(SearchEntryMode::Include))
            .filter_map(|e| e.resource.as_ref())
    }

    /// OperationOutcomes the server attached to the page
    pub fn outcomes(&self) -> Vec<OperationOutcome> {
        self.bundle
            .entry
            .iter()
            .filter(|e| e.search_mode() == Some(SearchEntryMode::Outcome))
            .filter_map(|e| e.resource.as_ref())
            .filter_map(|r| r.decode().ok())
            .collect()
    }

    /// Every resource on the page, whatever its search mode
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.bundle.entry.iter().filter_map(|e| e.resource.as_ref())
    }

    /// Look up a resource on this page by type and id
    pub fn find(&self, resource_type: &str, id: &str) -> Option<&Resource> {
        self.find_key(&ResourceKey::new(resource_type, id))
    }

    pub fn find_key(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resolver.by_key.get(key)
    }

    /// Resolve a reference against this page only
    pub fn reference(&self, reference: &Reference) -> Option<&Resource> {
        self.resolver.local(reference)
    }

    /// Resolve a reference from this page, reading it from the server when
    /// it is not on the page
    pub async fn resolve(&self, reference: &Reference) -> Result<Option<Resource>, ClientError> {
        self.resolver.resolve(reference).await
    }

    pub async fn resolve_many(
        &self,
        references: &[Reference],
    ) -> Result<Vec<Option<Resource>>, ClientError> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            resolved.push(self.resolver.resolve(reference).await?);
        }
        Ok(resolved)
    }

    /// The only match on the page
    pub fn match_one(&self) -> Result<WithReferences<R>, ClientError> {
        match self.matches.as_slice() {
            [] => Err(ClientError::NoMatch),
            [single] => Ok(WithReferences {
                resource: single.clone(),
                resolver: self.resolver.clone(),
            }),
            many => Err(ClientError::MultipleMatches(many.len())),
        }
    }

    pub fn link(&self, relation: &str) -> Option<&str> {
        self.bundle.link(relation)
    }

    pub fn next_url(&self) -> Option<&str> {
        self.link("next")
    }

    pub fn previous_url(&self) -> Option<&str> {
        // "prev" is the pre-R4 spelling still used by some servers
        self.link("previous").or_else(|| self.link("prev"))
    }

    pub fn self_url(&self) -> Option<&str> {
        self.link("self")
    }

    /// Fetch the page behind the `next` link, if any
    pub async fn next_page(&self, options: RequestOptions) -> Result<Option<Self>, ClientError> {
        self.follow(self.next_url(), options).await
    }

    /// Fetch the page behind the `previous` link, if any
    pub async fn previous_page(&self, options: RequestOptions) -> Result<Option<Self>, ClientError> {
        self.follow(self.previous_url(), options).await
    }

    async fn follow(
        &self,
        url: Option<&str>,
        options: RequestOptions,
    ) -> Result<Option<Self>, ClientError> {
        let Some(url) = url else {
            return Ok(None);
        };
        let client = self.resolver.client.as_ref().ok_or(ClientError::Detached)?;
        client.fetch_page(url, options).await.map(Some)
    }

    /// `Bundle.total`, when the server reported one
    pub fn total(&self) -> Option<u32> {
        self.bundle.total
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn into_bundle(self) -> Bundle {
        self.bundle
    }
}

/// A single search result that can still resolve references against the
/// page it came from
#[derive(Debug, Clone)]
pub struct WithReferences<R = Resource> {
    resource: Retrieved<R>,
    resolver: Arc<ReferenceResolver>,
}

impl<R: FhirResource> WithReferences<R> {
    pub fn resource(&self) -> &Retrieved<R> {
        &self.resource
    }

    pub fn into_inner(self) -> Retrieved<R> {
        self.resource
    }

    /// Resolve against the originating page only
    pub fn reference(&self, reference: &Reference) -> Option<&Resource> {
        self.resolver.local(reference)
    }

    /// Resolve against the originating page, then the server
    pub async fn resolve(&self, reference: &Reference) -> Result<Option<Resource>, ClientError> {
        self.resolver.resolve(reference).await
    }
}

impl<R> Deref for WithReferences<R> {
    type Target = Retrieved<R>;

    fn deref(&self) -> &Retrieved<R> {
        &self.resource
    }
}
