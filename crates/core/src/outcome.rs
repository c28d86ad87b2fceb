use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Severity of the issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
    Success,
    /// Anything a server sends outside the R4 value set
    #[serde(untagged)]
    Other(String),
}

/// Type of issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    Security,
    Login,
    Unknown,
    Expired,
    Forbidden,
    Suppressed,
    Processing,
    NotSupported,
    Duplicate,
    MultipleMatches,
    NotFound,
    Deleted,
    TooLong,
    CodeInvalid,
    Extension,
    TooCostly,
    BusinessRule,
    Conflict,
    LimitedFilter,
    Incomplete,
    Transient,
    LockError,
    NoStore,
    Exception,
    Timeout,
    Throttled,
    Informational,
    Success,
    /// Codes from later FHIR versions or local extensions, kept verbatim
    #[serde(untagged)]
    Other(String),
}

/// FHIR OperationOutcome resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub issue: Vec<OperationOutcomeIssue>,
}

/// Single issue in an OperationOutcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<String>,
}

impl OperationOutcome {
    /// Create an outcome holding a single issue
    pub fn new(severity: IssueSeverity, code: IssueType, diagnostics: &str) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            id: None,
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                details: None,
                diagnostics: Some(diagnostics.to_string()),
                expression: Vec::new(),
            }],
        }
    }

    /// Create an error outcome
    pub fn error(code: IssueType, diagnostics: &str) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    pub fn not_found(diagnostics: &str) -> Self {
        Self::error(IssueType::NotFound, diagnostics)
    }

    pub fn invalid(diagnostics: &str) -> Self {
        Self::error(IssueType::Invalid, diagnostics)
    }

    pub fn conflict(diagnostics: &str) -> Self {
        Self::error(IssueType::Conflict, diagnostics)
    }

    pub fn success(diagnostics: &str) -> Self {
        Self::new(IssueSeverity::Information, IssueType::Informational, diagnostics)
    }

    /// Whether any issue is an error or fatal
    pub fn has_errors(&self) -> bool {
        self.issue
            .iter()
            .any(|i| matches!(i.severity, IssueSeverity::Error | IssueSeverity::Fatal))
    }

    /// Issues of the given severity
    pub fn issues(&self, severity: IssueSeverity) -> impl Iterator<Item = &OperationOutcomeIssue> {
        self.issue.iter().filter(move |i| i.severity == severity)
    }
}

impl OperationOutcomeIssue {
    /// Human readable text: diagnostics, falling back to `details.text`
    pub fn message(&self) -> Option<&str> {
        self.diagnostics.as_deref().or_else(|| {
            self.details
                .as_ref()
                .and_then(|d| d.get("text"))
                .and_then(|t| t.as_str())
        })
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.issue.iter().filter_map(|i| i.message()).collect();
        if messages.is_empty() {
            write!(f, "{} issue(s)", self.issue.len())
        } else {
            write!(f, "{}", messages.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_server_outcome() {
        let outcome: OperationOutcome = serde_json::from_value(json!({
            "resourceType": "OperationOutcome",
            "issue": [
                {"severity": "error", "code": "not-found", "diagnostics": "Patient/1 is gone"},
                {"severity": "warning", "code": "processing", "details": {"text": "slow query"}}
            ]
        }))
        .unwrap();

        assert!(outcome.has_errors());
        assert_eq!(outcome.issue[0].code, IssueType::NotFound);
        assert_eq!(outcome.issues(IssueSeverity::Warning).count(), 1);
        assert_eq!(outcome.to_string(), "Patient/1 is gone; slow query");
    }

    #[test]
    fn test_constructors() {
        let outcome = OperationOutcome::conflict("version mismatch");
        let value = serde_json::to_value(&outcome).unwrap();

        assert_eq!(value["resourceType"], "OperationOutcome");
        assert_eq!(value["issue"][0]["code"], "conflict");
        assert_eq!(value["issue"][0]["severity"], "error");
        assert!(!OperationOutcome::success("ok").has_errors());
    }

    #[test]
    fn test_unrecognized_codes_are_kept() {
        let body = json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "invalid-profile", "diagnostics": "bad profile"}]
        });
        let outcome: OperationOutcome = serde_json::from_value(body.clone()).unwrap();

        assert_eq!(outcome.issue[0].code, IssueType::Other("invalid-profile".into()));
        assert!(outcome.has_errors());
        assert_eq!(outcome.to_string(), "bad profile");
        assert_eq!(serde_json::to_value(&outcome).unwrap(), body);

        let odd: OperationOutcome = serde_json::from_value(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "advisory", "code": "unknown"}]
        }))
        .unwrap();
        assert_eq!(odd.issue[0].severity, IssueSeverity::Other("advisory".into()));
        assert_eq!(odd.issue[0].code, IssueType::Unknown);
        assert!(!odd.has_errors());
    }
}
