//! JSON Patch builder (RFC 6902) for FHIR `PATCH` interactions

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// One JSON Patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: JsonValue },
    Remove { path: String },
    Replace { path: String, value: JsonValue },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: JsonValue },
}

/// Build a JSON Pointer from path segments, escaping `~` and `/`
pub fn pointer(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| format!("/{}", s.replace('~', "~0").replace('/', "~1")))
        .collect()
}

/// Fluent builder for an ordered JSON Patch document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchBuilder {
    resource_type: Option<String>,
    operations: Vec<PatchOperation>,
}

impl PatchBuilder {
    pub fn new(resource_type: Option<&str>) -> Self {
        Self {
            resource_type: resource_type.map(str::to_string),
            operations: Vec::new(),
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn add(mut self, path: &str, value: impl Serialize) -> Self {
        self.operations.push(PatchOperation::Add {
            path: path.to_string(),
            value: to_json(value),
        });
        self
    }

    pub fn remove(mut self, path: &str) -> Self {
        self.operations.push(PatchOperation::Remove {
            path: path.to_string(),
        });
        self
    }

    pub fn replace(mut self, path: &str, value: impl Serialize) -> Self {
        self.operations.push(PatchOperation::Replace {
            path: path.to_string(),
            value: to_json(value),
        });
        self
    }

    /// Move the value at `from` to `path`
    pub fn move_from(mut self, from: &str, path: &str) -> Self {
        self.operations.push(PatchOperation::Move {
            from: from.to_string(),
            path: path.to_string(),
        });
        self
    }

    /// Copy the value at `from` to `path`
    pub fn copy_from(mut self, from: &str, path: &str) -> Self {
        self.operations.push(PatchOperation::Copy {
            from: from.to_string(),
            path: path.to_string(),
        });
        self
    }

    /// Precondition: the value at `path` equals `value`
    pub fn test(mut self, path: &str, value: impl Serialize) -> Self {
        self.operations.push(PatchOperation::Test {
            path: path.to_string(),
            value: to_json(value),
        });
        self
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn into_operations(self) -> Vec<PatchOperation> {
        self.operations
    }
}

fn to_json(value: impl Serialize) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

/// Patch body accepted by the client: a ready document, a built
/// [`PatchBuilder`], or a callback receiving a fresh builder.
pub enum PatchBody {
    Document(Vec<PatchOperation>),
    Builder(PatchBuilder),
    Deferred(Box<dyn FnOnce(PatchBuilder) -> PatchBody + Send>),
}

impl PatchBody {
    /// Defer building until the resource type is known
    pub fn build<F, P>(f: F) -> Self
    where
        F: FnOnce(PatchBuilder) -> P + Send + 'static,
        P: Into<PatchBody>,
    {
        PatchBody::Deferred(Box::new(move |builder| f(builder).into()))
    }

    /// Reduce to the wire JSON Patch document
    pub fn normalize(self, resource_type: Option<&str>) -> Vec<PatchOperation> {
        match self {
            PatchBody::Document(operations) => operations,
            PatchBody::Builder(builder) => builder.into_operations(),
            PatchBody::Deferred(f) => f(PatchBuilder::new(resource_type)).normalize(resource_type),
        }
    }
}

impl fmt::Debug for PatchBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchBody::Document(ops) => f.debug_tuple("Document").field(ops).finish(),
            PatchBody::Builder(b) => f.debug_tuple("Builder").field(b).finish(),
            PatchBody::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<Vec<PatchOperation>> for PatchBody {
    fn from(operations: Vec<PatchOperation>) -> Self {
        PatchBody::Document(operations)
    }
}

impl From<PatchBuilder> for PatchBody {
    fn from(builder: PatchBuilder) -> Self {
        PatchBody::Builder(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_compiles_in_order() {
        let operations = PatchBuilder::new(Some("Patient"))
            .test("/meta/versionId", "2")
            .replace("/gender", "female")
            .add("/name/-", json!({"family": "Doe"}))
            .remove("/telecom/0")
            .copy_from("/name/0", "/name/-")
            .move_from("/address/1", "/address/0")
            .into_operations();

        assert_eq!(
            serde_json::to_value(&operations).unwrap(),
            json!([
                {"op": "test", "path": "/meta/versionId", "value": "2"},
                {"op": "replace", "path": "/gender", "value": "female"},
                {"op": "add", "path": "/name/-", "value": {"family": "Doe"}},
                {"op": "remove", "path": "/telecom/0"},
                {"op": "copy", "from": "/name/0", "path": "/name/-"},
                {"op": "move", "from": "/address/1", "path": "/address/0"}
            ])
        );
    }

    #[test]
    fn test_pointer_escaping() {
        assert_eq!(pointer(&["extension", "0", "url"]), "/extension/0/url");
        assert_eq!(pointer(&["a/b", "c~d"]), "/a~1b/c~0d");
    }

    #[test]
    fn test_normalize_body() {
        let deferred = PatchBody::build(|patch| {
            assert_eq!(patch.resource_type(), Some("Observation"));
            patch.replace("/status", "final")
        });
        assert_eq!(
            deferred.normalize(Some("Observation")),
            vec![PatchOperation::Replace {
                path: "/status".into(),
                value: json!("final")
            }]
        );

        let document = PatchBody::from(vec![PatchOperation::Remove { path: "/note".into() }]);
        assert_eq!(document.normalize(None).len(), 1);
    }
}
