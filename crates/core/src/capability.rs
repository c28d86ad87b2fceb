use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// FHIR CapabilityStatement resource as returned by a server's `metadata` endpoint.
///
/// Only the parts the client inspects are typed; everything else is kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatement {
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub format: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rest: Vec<CapabilityRest>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl CapabilityStatement {
    /// The `server` mode REST declaration, if any
    pub fn server(&self) -> Option<&CapabilityRest> {
        self.rest.iter().find(|r| r.mode == "server")
    }

    /// Resource types exposed by the server
    pub fn resource_types(&self) -> Vec<&str> {
        self.server()
            .map(|r| r.resource.iter().map(|res| res.resource_type.as_str()).collect())
            .unwrap_or_default()
    }

    /// Whether the server declares `interaction` (e.g. `read`, `search-type`) for a type
    pub fn supports_interaction(&self, resource_type: &str, interaction: &str) -> bool {
        self.server()
            .and_then(|r| r.resource.iter().find(|res| res.resource_type == resource_type))
            .is_some_and(|res| res.interaction.iter().any(|i| i.code == interaction))
    }
}

/// REST capability declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRest {
    pub mode: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<CapabilityResource>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Per-resource capability declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResource {
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interaction: Vec<CapabilityInteraction>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityInteraction {
    pub code: String,
}
