//! Untyped FHIR resources, references and identity normalization
//!
//! [`Resource`] is a JSON object that always carries a `resourceType`
//! discriminant. Everything else is kept as-is: schema validation is left
//! to the server.

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

use crate::error::FhirError;

const RESOURCE_TYPE_FIELD: &str = "resourceType";

/// Anything that travels over the wire as a FHIR resource
pub trait FhirResource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The `resourceType` discriminant
    fn resource_type(&self) -> &str;

    /// The logical id, if assigned
    fn id(&self) -> Option<&str>;

    /// `meta.versionId`, if present
    fn version_id(&self) -> Option<&str>;
}

/// A caller-defined resource struct bound to a single resource type.
///
/// Implement this for domain structs (e.g. a `Patient` with extra helper
/// methods) and pass [`typed::<T>()`](typed) wherever a resource type is
/// expected to get responses decoded straight into `T`.
pub trait TypedResource: FhirResource {
    const RESOURCE_TYPE: &'static str;
}

/// FHIR resource with an untyped payload
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    body: Map<String, JsonValue>,
}

impl Resource {
    /// Create an empty resource of the given type
    pub fn new(resource_type: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert(
            RESOURCE_TYPE_FIELD.to_string(),
            JsonValue::String(resource_type.into()),
        );
        Self { body }
    }

    /// Build a resource of the given type from a JSON object.
    ///
    /// Any `resourceType` present in `fields` is replaced by `resource_type`.
    pub fn build(resource_type: impl Into<String>, fields: JsonValue) -> Result<Self, FhirError> {
        let resource_type = resource_type.into();
        if resource_type.trim().is_empty() {
            return Err(FhirError::MissingResourceType);
        }

        let JsonValue::Object(mut body) = fields else {
            return Err(FhirError::Invalid(format!(
                "{resource_type} fields must be a JSON object"
            )));
        };
        body.insert(
            RESOURCE_TYPE_FIELD.to_string(),
            JsonValue::String(resource_type),
        );

        Ok(Self { body })
    }

    pub fn resource_type(&self) -> &str {
        self.body
            .get(RESOURCE_TYPE_FIELD)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    pub fn id(&self) -> Option<&str> {
        self.body
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.trim().is_empty())
    }

    /// Set or clear the logical id
    pub fn set_id(&mut self, id: Option<String>) {
        match id {
            Some(id) => {
                self.body.insert("id".to_string(), JsonValue::String(id));
            }
            None => {
                self.body.remove("id");
            }
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(Some(id.into()));
        self
    }

    pub fn meta(&self) -> Option<&Map<String, JsonValue>> {
        self.body.get("meta").and_then(|m| m.as_object())
    }

    pub fn version_id(&self) -> Option<&str> {
        self.meta()
            .and_then(|m| m.get("versionId"))
            .and_then(|v| v.as_str())
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.meta()
            .and_then(|m| m.get("lastUpdated"))
            .and_then(|v| v.as_str())
    }

    /// Read a top-level field
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.body.get(field)
    }

    /// Write a top-level field. The discriminant cannot be overwritten.
    pub fn set(&mut self, field: impl Into<String>, value: JsonValue) -> Result<(), FhirError> {
        let field = field.into();
        if field == RESOURCE_TYPE_FIELD {
            return Err(FhirError::Invalid(format!(
                "resourceType of {} is immutable",
                self.resource_type()
            )));
        }
        self.body.insert(field, value);
        Ok(())
    }

    /// Remove a top-level field. The discriminant is never removed.
    pub fn remove(&mut self, field: &str) -> Option<JsonValue> {
        if field == RESOURCE_TYPE_FIELD {
            return None;
        }
        self.body.remove(field)
    }

    /// Decode a top-level field as a [`Reference`]
    pub fn reference(&self, field: &str) -> Option<Reference> {
        self.body
            .get(field)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Decode this resource into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(JsonValue::Object(self.body.clone()))
    }

    pub fn as_object(&self) -> &Map<String, JsonValue> {
        &self.body
    }

    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.body)
    }
}

impl TryFrom<JsonValue> for Resource {
    type Error = FhirError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        let JsonValue::Object(body) = value else {
            return Err(FhirError::Invalid("resource must be a JSON object".into()));
        };
        match body.get(RESOURCE_TYPE_FIELD).and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => Ok(Self { body }),
            _ => Err(FhirError::MissingResourceType),
        }
    }
}

impl From<Resource> for JsonValue {
    fn from(resource: Resource) -> Self {
        resource.into_json()
    }
}

impl Serialize for Resource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Resource::try_from(value).map_err(de::Error::custom)
    }
}

impl FhirResource for Resource {
    fn resource_type(&self) -> &str {
        Resource::resource_type(self)
    }

    fn id(&self) -> Option<&str> {
        Resource::id(self)
    }

    fn version_id(&self) -> Option<&str> {
        Resource::version_id(self)
    }
}

/// A resource known to exist server-side: its id is always present and non-empty
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Retrieved<R = Resource>(R);

impl<R: FhirResource> Retrieved<R> {
    pub fn new(resource: R) -> Result<Self, FhirError> {
        match resource.id() {
            Some(id) if !id.trim().is_empty() => Ok(Self(resource)),
            _ => Err(FhirError::MissingId(resource.resource_type().to_string())),
        }
    }

    pub fn id(&self) -> &str {
        self.0.id().unwrap_or_default()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.0.resource_type(), self.id())
    }

    /// A `Type/id` reference pointing at this resource
    pub fn reference(&self) -> Reference {
        Reference::new(self.key().to_string())
    }

    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R> Deref for Retrieved<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.0
    }
}

impl<'de, R: FhirResource> Deserialize<'de> for Retrieved<R> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let resource = R::deserialize(deserializer)?;
        Retrieved::new(resource).map_err(de::Error::custom)
    }
}

/// Something that names a resource type for a client call.
///
/// Implemented by plain type names (decoding into [`Resource`]) and by
/// [`Typed`] descriptors (decoding into the caller's struct).
pub trait ResourceKind {
    type Resource: FhirResource;

    fn resource_type(&self) -> &str;
}

impl ResourceKind for &str {
    type Resource = Resource;

    fn resource_type(&self) -> &str {
        self
    }
}

impl ResourceKind for String {
    type Resource = Resource;

    fn resource_type(&self) -> &str {
        self.as_str()
    }
}

/// Type descriptor for a [`TypedResource`]
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Clone for Typed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Typed<T> {}

impl<T> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Typed")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

/// Descriptor to pass where a resource type is expected
pub fn typed<T: TypedResource>() -> Typed<T> {
    Typed(PhantomData)
}

impl<T: TypedResource> ResourceKind for Typed<T> {
    type Resource = T;

    fn resource_type(&self) -> &str {
        T::RESOURCE_TYPE
    }
}

/// FHIR Reference datatype
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Default::default()
        }
    }

    /// Reference to anything that normalizes to a [`ResourceKey`]
    pub fn to<T: ToResourceKey + ?Sized>(target: &T) -> Result<Self, FhirError> {
        Ok(Self::new(target.to_resource_key()?.to_string()))
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// The `{type, id}` this reference points to.
    ///
    /// Handles relative (`Patient/1`), versioned (`Patient/1/_history/2`) and
    /// absolute references. Contained (`#id`) and `urn:` references have no
    /// key.
    pub fn key(&self) -> Option<ResourceKey> {
        let raw = self.reference.as_deref()?.trim();
        if raw.is_empty() || raw.starts_with('#') || raw.starts_with("urn:") {
            return None;
        }

        let raw = raw.split(['?', '#']).next().unwrap_or(raw);
        let mut segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() >= 2 && segments[segments.len() - 2] == "_history" {
            segments.truncate(segments.len() - 2);
        }

        match segments.as_slice() {
            [.., resource_type, id] if is_resource_type(resource_type) => {
                Some(ResourceKey::new(*resource_type, *id))
            }
            [.., id] => self
                .reference_type
                .as_deref()
                .map(|resource_type| ResourceKey::new(resource_type, *id)),
            [] => None,
        }
    }

    /// The raw reference when it is an absolute `http(s)` URL
    pub fn absolute_url(&self) -> Option<&str> {
        absolute_http_url(self.reference.as_deref()?)
    }

    /// The `meta.versionId` this reference is pinned to, if any
    pub fn version_id(&self) -> Option<&str> {
        let raw = self.reference.as_deref()?;
        let (_, version) = raw.rsplit_once("/_history/")?;
        Some(version).filter(|v| !v.is_empty())
    }
}

fn absolute_http_url(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let (scheme, _) = raw.split_once("://")?;
    (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")).then_some(raw)
}

fn is_resource_type(segment: &str) -> bool {
    segment.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && segment.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Canonical `{type, id}` pair identifying a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub resource_type: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

/// Normalize a resource, a reference or a `Type/id` string into a [`ResourceKey`]
///
/// [`ResourceKey`] drops the server part of an absolute reference, so
/// callers that send the key to their own base must check
/// [`absolute_url`](ToResourceKey::absolute_url) first.
pub trait ToResourceKey {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError>;

    /// Absolute URL the target was given as, if any
    fn absolute_url(&self) -> Option<&str> {
        None
    }
}

impl ToResourceKey for ResourceKey {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError> {
        Ok(self.clone())
    }
}

impl ToResourceKey for Resource {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError> {
        let id = self
            .id()
            .ok_or_else(|| FhirError::MissingId(self.resource_type().to_string()))?;
        Ok(ResourceKey::new(self.resource_type(), id))
    }
}

impl<R: FhirResource> ToResourceKey for Retrieved<R> {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError> {
        Ok(self.key())
    }
}

impl ToResourceKey for Reference {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError> {
        self.key().ok_or_else(|| {
            FhirError::UnresolvableReference(self.reference.clone().unwrap_or_default())
        })
    }

    fn absolute_url(&self) -> Option<&str> {
        Reference::absolute_url(self)
    }
}

impl ToResourceKey for str {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError> {
        Reference::new(self).to_resource_key()
    }

    fn absolute_url(&self) -> Option<&str> {
        absolute_http_url(self)
    }
}

impl ToResourceKey for String {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError> {
        self.as_str().to_resource_key()
    }

    fn absolute_url(&self) -> Option<&str> {
        self.as_str().absolute_url()
    }
}

impl<A: AsRef<str>, B: AsRef<str>> ToResourceKey for (A, B) {
    fn to_resource_key(&self) -> Result<ResourceKey, FhirError> {
        let (resource_type, id) = (self.0.as_ref(), self.1.as_ref());
        if resource_type.trim().is_empty() {
            return Err(FhirError::MissingResourceType);
        }
        if id.trim().is_empty() {
            return Err(FhirError::MissingId(resource_type.to_string()));
        }
        Ok(ResourceKey::new(resource_type, id))
    }
}

/// The id part of a reference or id string (its last path segment)
pub fn id_of(value: &str) -> Option<&str> {
    value.trim().split('/').next_back().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_forces_discriminant() {
        let patient = Resource::build(
            "Patient",
            json!({"resourceType": "Observation", "gender": "female"}),
        )
        .unwrap();

        assert_eq!(patient.resource_type(), "Patient");
        assert_eq!(patient.get("gender"), Some(&json!("female")));
    }

    #[test]
    fn test_build_rejects_non_objects() {
        assert!(Resource::build("Patient", json!([1, 2])).is_err());
        assert_eq!(
            Resource::build(" ", json!({})),
            Err(FhirError::MissingResourceType)
        );
    }

    #[test]
    fn test_discriminant_is_immutable() {
        let mut patient = Resource::new("Patient");
        assert!(patient.set("resourceType", json!("Observation")).is_err());
        assert_eq!(patient.remove("resourceType"), None);
        assert_eq!(patient.resource_type(), "Patient");
    }

    #[test]
    fn test_deserialize_requires_resource_type() {
        let err = serde_json::from_value::<Resource>(json!({"id": "1"}));
        assert!(err.is_err());

        let ok: Resource = serde_json::from_value(json!({
            "resourceType": "Patient",
            "id": "1",
            "meta": {"versionId": "3", "lastUpdated": "2024-01-01T00:00:00Z"}
        }))
        .unwrap();
        assert_eq!(ok.id(), Some("1"));
        assert_eq!(ok.version_id(), Some("3"));
        assert_eq!(ok.last_updated(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_retrieved_requires_id() {
        assert_eq!(
            Retrieved::new(Resource::new("Patient")),
            Err(FhirError::MissingId("Patient".into()))
        );
        assert!(Retrieved::new(Resource::new("Patient").with_id("  ")).is_err());

        let retrieved = Retrieved::new(Resource::new("Patient").with_id("abc")).unwrap();
        assert_eq!(retrieved.id(), "abc");
        assert_eq!(retrieved.key().to_string(), "Patient/abc");
        assert_eq!(retrieved.reference().reference.as_deref(), Some("Patient/abc"));

        let decoded = serde_json::from_value::<Retrieved>(json!({"resourceType": "Patient"}));
        assert!(decoded.is_err());
    }

    #[test]
    fn test_reference_key() {
        let cases = [
            ("Patient/123", Some(("Patient", "123"))),
            ("Patient/123/_history/4", Some(("Patient", "123"))),
            ("https://fhir.example.org/r4/Observation/o-1", Some(("Observation", "o-1"))),
            ("#contained", None),
            ("urn:uuid:6f1d6f0a-8a3b-4c47-9a57-3f0f1e4a9b11", None),
            ("", None),
        ];

        for (raw, expected) in cases {
            let key = Reference::new(raw).key();
            assert_eq!(
                key,
                expected.map(|(t, id)| ResourceKey::new(t, id)),
                "reference {raw}"
            );
        }

        let typed = Reference {
            reference: Some("123".into()),
            reference_type: Some("Patient".into()),
            display: None,
        };
        assert_eq!(typed.key(), Some(ResourceKey::new("Patient", "123")));
        assert_eq!(Reference::new("Patient/1/_history/7").version_id(), Some("7"));
    }

    #[test]
    fn test_resource_key_normalization() {
        let resource = Resource::new("Patient").with_id("p1");
        let retrieved = Retrieved::new(resource.clone()).unwrap();
        let expected = ResourceKey::new("Patient", "p1");

        assert_eq!(resource.to_resource_key().unwrap(), expected);
        assert_eq!(retrieved.to_resource_key().unwrap(), expected);
        assert_eq!(Reference::new("Patient/p1").to_resource_key().unwrap(), expected);
        assert_eq!("Patient/p1".to_resource_key().unwrap(), expected);
        assert_eq!(("Patient", "p1").to_resource_key().unwrap(), expected);
        assert!(("Patient", "").to_resource_key().is_err());
        assert!(Reference::new("#x").to_resource_key().is_err());
    }

    #[test]
    fn test_absolute_targets_are_reported() {
        let absolute = "https://other.example.org/fhir/Patient/1";
        assert_eq!(Reference::new(absolute).absolute_url(), Some(absolute));
        assert_eq!(absolute.absolute_url(), Some(absolute));
        assert_eq!(" HTTP://x.org/Patient/1".to_string().absolute_url(), Some("HTTP://x.org/Patient/1"));

        assert!("Patient/1".absolute_url().is_none());
        assert!(Reference::new("urn:uuid:1").absolute_url().is_none());
        assert!(ToResourceKey::absolute_url(&("Patient", "1")).is_none());
        assert!(ToResourceKey::absolute_url(&Resource::new("Patient").with_id("1")).is_none());
    }

    #[test]
    fn test_id_of() {
        assert_eq!(id_of("Patient/123"), Some("123"));
        assert_eq!(id_of(" 123 "), Some("123"));
        assert_eq!(id_of("Patient/"), None);
    }
}
