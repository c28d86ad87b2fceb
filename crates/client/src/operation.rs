//! FHIR `$operation` invocation

use fhir_core::{Bundle, OperationOutcome, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue, json};
use url::form_urlencoded;

/// Everything needed to invoke an operation.
///
/// Operations that do not affect state are sent as `GET` with `parameters`
/// in the query string; the others are `POST`ed with `parameters` as body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationParameters {
    /// Operation name including its `$`
    pub operation: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub affects_state: bool,
    pub parameters: Map<String, JsonValue>,
}

impl OperationParameters {
    /// System-level operation; a missing `$` is added
    pub fn new(operation: &str) -> Self {
        let operation = operation.trim();
        let operation = if operation.starts_with('$') {
            operation.to_string()
        } else {
            format!("${}", operation)
        };
        Self {
            operation,
            ..Default::default()
        }
    }

    pub fn on_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn on_instance(mut self, resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(id.into());
        self
    }

    pub fn mutating(mut self) -> Self {
        self.affects_state = true;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(JsonValue::Null);
        self.parameters.insert(name.into(), value);
        self
    }

    /// `[{type}[/{id}]/]{$operation}`
    pub fn path(&self) -> String {
        let prefix: Vec<&str> = [self.resource_type.as_deref(), self.resource_id.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if prefix.is_empty() {
            self.operation.clone()
        } else {
            format!("{}/{}", prefix.join("/"), self.operation)
        }
    }

    /// Parameters as a query string. Arrays repeat the parameter; nulls are dropped.
    pub fn query_string(&self) -> Option<String> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for (name, value) in &self.parameters {
            let values = match value {
                JsonValue::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for value in values {
                let text = match value {
                    JsonValue::Null => continue,
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                serializer.append_pair(name, &text);
                any = true;
            }
        }
        any.then(|| serializer.finish())
    }
}

/// A typed operation with a known result shape
pub trait Operation {
    type Output: DeserializeOwned;

    fn parameters(&self) -> OperationParameters;
}

/// `Patient/{id}/$everything` or `Encounter/{id}/$everything`
#[derive(Debug, Clone, PartialEq)]
pub struct Everything {
    resource_type: String,
    id: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub since: Option<String>,
    pub types: Vec<String>,
    pub count: Option<u32>,
}

impl Everything {
    pub fn patient(id: impl Into<String>) -> Self {
        Self::on("Patient", id)
    }

    pub fn encounter(id: impl Into<String>) -> Self {
        Self::on("Encounter", id)
    }

    fn on(resource_type: &str, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: id.into(),
            start: None,
            end: None,
            since: None,
            types: Vec::new(),
            count: None,
        }
    }

    pub fn with_period(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start = start.map(str::to_string);
        self.end = end.map(str::to_string);
        self
    }

    pub fn with_types(mut self, types: &[&str]) -> Self {
        self.types = types.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl Operation for Everything {
    type Output = Bundle;

    fn parameters(&self) -> OperationParameters {
        let mut params =
            OperationParameters::new("$everything").on_instance(&self.resource_type, &self.id);
        if let Some(start) = &self.start {
            params = params.with_parameter("start", start);
        }
        if let Some(end) = &self.end {
            params = params.with_parameter("end", end);
        }
        if let Some(since) = &self.since {
            params = params.with_parameter("_since", since);
        }
        if !self.types.is_empty() {
            params = params.with_parameter("_type", self.types.join(","));
        }
        if let Some(count) = self.count {
            params = params.with_parameter("_count", count);
        }
        params
    }
}

/// `{type}/$validate`, posting the resource in a `Parameters` body
#[derive(Debug, Clone, PartialEq)]
pub struct Validate {
    resource: Resource,
    /// `create`, `update` or `delete`
    pub mode: Option<String>,
    pub profile: Option<String>,
}

impl Validate {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            mode: None,
            profile: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

impl Operation for Validate {
    type Output = OperationOutcome;

    fn parameters(&self) -> OperationParameters {
        let mut parameter = vec![json!({"name": "resource", "resource": self.resource})];
        if let Some(mode) = &self.mode {
            parameter.push(json!({"name": "mode", "valueCode": mode}));
        }
        if let Some(profile) = &self.profile {
            parameter.push(json!({"name": "profile", "valueUri": profile}));
        }

        let resource_type = self.resource.resource_type();
        let params = match (self.mode.as_deref(), self.resource.id()) {
            (Some("update" | "delete"), Some(id)) => {
                OperationParameters::new("$validate").on_instance(resource_type, id)
            }
            _ => OperationParameters::new("$validate").on_type(resource_type),
        };
        params
            .mutating()
            .with_parameter("resourceType", "Parameters")
            .with_parameter("parameter", parameter)
    }
}
