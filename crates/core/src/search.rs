//! Search parameter builder
//!
//! Compiles typed search assertions into a FHIR search query string
//! (without the leading `?`). See <https://hl7.org/fhir/search.html>.
//!
//! ```
//! use fhir_core::search::{SearchBuilder, SearchPrefix, StringModifier};
//!
//! let query = SearchBuilder::new(Some("Patient"))
//!     .string("name", "Doe", Some(StringModifier::Contains))
//!     .date("birthdate", "1990-01-01", Some(SearchPrefix::Ge))
//!     .count(20)
//!     .href();
//!
//! assert_eq!(query, "name:contains=Doe&birthdate=ge1990-01-01&_count=20");
//! ```

use chrono::NaiveDate;
use std::fmt;

use crate::resource::{Reference, ResourceKey};

/// Comparison prefix for ordered values (dates, numbers, quantities)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
    Ap,
}

impl SearchPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchPrefix::Eq => "eq",
            SearchPrefix::Ne => "ne",
            SearchPrefix::Gt => "gt",
            SearchPrefix::Lt => "lt",
            SearchPrefix::Ge => "ge",
            SearchPrefix::Le => "le",
            SearchPrefix::Sa => "sa",
            SearchPrefix::Eb => "eb",
            SearchPrefix::Ap => "ap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringModifier {
    Exact,
    Contains,
    Text,
}

impl StringModifier {
    fn as_str(&self) -> &'static str {
        match self {
            StringModifier::Exact => "exact",
            StringModifier::Contains => "contains",
            StringModifier::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenModifier {
    Not,
    Text,
    Above,
    Below,
    In,
    NotIn,
    OfType,
}

impl TokenModifier {
    fn as_str(&self) -> &'static str {
        match self {
            TokenModifier::Not => "not",
            TokenModifier::Text => "text",
            TokenModifier::Above => "above",
            TokenModifier::Below => "below",
            TokenModifier::In => "in",
            TokenModifier::NotIn => "not-in",
            TokenModifier::OfType => "of-type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceModifier {
    Identifier,
    /// Restrict the target to one resource type, e.g. `subject:Patient`
    Type(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriModifier {
    Above,
    Below,
}

/// `_summary` modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMode {
    True,
    Text,
    Data,
    Count,
    False,
}

impl SummaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryMode::True => "true",
            SummaryMode::Text => "text",
            SummaryMode::Data => "data",
            SummaryMode::Count => "count",
            SummaryMode::False => "false",
        }
    }
}

/// `_total` modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalMode {
    None,
    Estimate,
    Accurate,
}

/// One or more alternative values for a parameter (joined with `,`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Values(Vec<String>);

impl From<&str> for Values {
    fn from(value: &str) -> Self {
        Values(vec![value.to_string()])
    }
}

impl From<String> for Values {
    fn from(value: String) -> Self {
        Values(vec![value])
    }
}

impl From<&String> for Values {
    fn from(value: &String) -> Self {
        Values(vec![value.clone()])
    }
}

impl From<Vec<&str>> for Values {
    fn from(values: Vec<&str>) -> Self {
        Values(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Values {
    fn from(values: Vec<String>) -> Self {
        Values(values)
    }
}

impl From<&[&str]> for Values {
    fn from(values: &[&str]) -> Self {
        Values(values.iter().map(|v| v.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Values {
    fn from(values: [&str; N]) -> Self {
        Values(values.iter().map(|v| v.to_string()).collect())
    }
}

impl From<i64> for Values {
    fn from(value: i64) -> Self {
        Values(vec![value.to_string()])
    }
}

impl From<f64> for Values {
    fn from(value: f64) -> Self {
        Values(vec![value.to_string()])
    }
}

impl From<NaiveDate> for Values {
    fn from(value: NaiveDate) -> Self {
        Values(vec![value.format("%Y-%m-%d").to_string()])
    }
}

/// Token value: `[system|]code`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValue {
    pub system: Option<String>,
    pub code: String,
}

impl TokenValue {
    pub fn new(system: Option<&str>, code: &str) -> Self {
        Self {
            system: system.map(str::to_string),
            code: code.to_string(),
        }
    }

    fn encode(&self) -> String {
        match &self.system {
            Some(system) => format!("{}|{}", escape(system), escape(&self.code)),
            None => escape(&self.code),
        }
    }
}

impl From<&str> for TokenValue {
    /// Parses `system|code`; a bare value is a code
    fn from(value: &str) -> Self {
        match value.split_once('|') {
            Some((system, code)) => TokenValue::new(Some(system), code),
            None => TokenValue::new(None, value),
        }
    }
}

impl From<String> for TokenValue {
    fn from(value: String) -> Self {
        TokenValue::from(value.as_str())
    }
}

/// Reference search value: `Type/id`, an id, or a canonical URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceValue(String);

impl From<&str> for ReferenceValue {
    fn from(value: &str) -> Self {
        ReferenceValue(value.to_string())
    }
}

impl From<String> for ReferenceValue {
    fn from(value: String) -> Self {
        ReferenceValue(value)
    }
}

impl From<ResourceKey> for ReferenceValue {
    fn from(key: ResourceKey) -> Self {
        ReferenceValue(key.to_string())
    }
}

impl From<&ResourceKey> for ReferenceValue {
    fn from(key: &ResourceKey) -> Self {
        ReferenceValue(key.to_string())
    }
}

impl From<&Reference> for ReferenceValue {
    fn from(reference: &Reference) -> Self {
        let value = reference
            .key()
            .map(|k| k.to_string())
            .or_else(|| reference.reference.clone())
            .unwrap_or_default();
        ReferenceValue(value)
    }
}

/// Escape FHIR search special characters in a single value
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',' | '$' | '|') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Fluent builder for one resource type's search parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchBuilder {
    resource_type: Option<String>,
    params: Vec<(String, String)>,
}

impl SearchBuilder {
    pub fn new(resource_type: Option<&str>) -> Self {
        Self {
            resource_type: resource_type.map(str::to_string),
            params: Vec::new(),
        }
    }

    /// The resource type the parameters apply to (`None` for system searches)
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Accumulated `(name, value)` pairs, values unencoded
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    fn push(mut self, name: String, values: Vec<String>) -> Self {
        if !values.is_empty() {
            self.params.push((name, values.join(",")));
        }
        self
    }

    fn modified(name: &str, modifier: Option<&str>) -> String {
        match modifier {
            Some(m) => format!("{name}:{m}"),
            None => name.to_string(),
        }
    }

    fn prefixed(values: Values, prefix: Option<SearchPrefix>) -> Vec<String> {
        let prefix = prefix.map(|p| p.as_str()).unwrap_or_default();
        values
            .0
            .iter()
            .map(|v| format!("{prefix}{}", escape(v)))
            .collect()
    }

    /// Add a parameter verbatim (value is still percent-encoded on output)
    pub fn raw(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn string(self, name: &str, values: impl Into<Values>, modifier: Option<StringModifier>) -> Self {
        let values = values.into().0.iter().map(|v| escape(v)).collect();
        self.push(Self::modified(name, modifier.map(|m| m.as_str())), values)
    }

    pub fn token(self, name: &str, value: impl Into<TokenValue>, modifier: Option<TokenModifier>) -> Self {
        self.tokens(name, [value], modifier)
    }

    /// Token parameter matching any of `values`
    pub fn tokens<T: Into<TokenValue>>(
        self,
        name: &str,
        values: impl IntoIterator<Item = T>,
        modifier: Option<TokenModifier>,
    ) -> Self {
        let values = values.into_iter().map(|v| v.into().encode()).collect();
        self.push(Self::modified(name, modifier.map(|m| m.as_str())), values)
    }

    pub fn date(self, name: &str, values: impl Into<Values>, prefix: Option<SearchPrefix>) -> Self {
        let values = Self::prefixed(values.into(), prefix);
        self.push(name.to_string(), values)
    }

    pub fn number(self, name: &str, values: impl Into<Values>, prefix: Option<SearchPrefix>) -> Self {
        let values = Self::prefixed(values.into(), prefix);
        self.push(name.to_string(), values)
    }

    /// Quantity parameter: `[prefix]value[|system|code]`
    pub fn quantity(
        self,
        name: &str,
        value: f64,
        prefix: Option<SearchPrefix>,
        system: Option<&str>,
        code: Option<&str>,
    ) -> Self {
        let prefix = prefix.map(|p| p.as_str()).unwrap_or_default();
        let value = match (system, code) {
            (None, None) => format!("{prefix}{value}"),
            (system, code) => format!(
                "{prefix}{value}|{}|{}",
                escape(system.unwrap_or_default()),
                escape(code.unwrap_or_default())
            ),
        };
        self.push(name.to_string(), vec![value])
    }

    pub fn reference(
        self,
        name: &str,
        value: impl Into<ReferenceValue>,
        modifier: Option<ReferenceModifier>,
    ) -> Self {
        self.references(name, [value], modifier)
    }

    /// Reference parameter matching any of `values`
    pub fn references<T: Into<ReferenceValue>>(
        self,
        name: &str,
        values: impl IntoIterator<Item = T>,
        modifier: Option<ReferenceModifier>,
    ) -> Self {
        let name = match &modifier {
            Some(ReferenceModifier::Identifier) => format!("{name}:identifier"),
            Some(ReferenceModifier::Type(t)) => format!("{name}:{t}"),
            None => name.to_string(),
        };
        let values = values.into_iter().map(|v| escape(&v.into().0)).collect();
        self.push(name, values)
    }

    pub fn uri(self, name: &str, values: impl Into<Values>, modifier: Option<UriModifier>) -> Self {
        let modifier = modifier.map(|m| match m {
            UriModifier::Above => "above",
            UriModifier::Below => "below",
        });
        let values = values.into().0.iter().map(|v| escape(v)).collect();
        self.push(Self::modified(name, modifier), values)
    }

    /// `name:missing=true|false`
    pub fn missing(self, name: &str, missing: bool) -> Self {
        self.push(format!("{name}:missing"), vec![missing.to_string()])
    }

    /// Chained parameter, e.g. `chain(&["subject:Patient", "name"], "peter")`
    pub fn chain(self, path: &[&str], values: impl Into<Values>) -> Self {
        let values = values.into().0.iter().map(|v| escape(v)).collect();
        self.push(path.join("."), values)
    }

    /// Reverse chaining: `_has:Observation:patient:code=1234`
    pub fn has(self, chain: &str, values: impl Into<Values>) -> Self {
        let values = values.into().0.iter().map(|v| escape(v)).collect();
        self.push(format!("_has:{chain}"), values)
    }

    pub fn id(self, ids: impl Into<Values>) -> Self {
        let values = ids.into().0.iter().map(|v| escape(v)).collect();
        self.push("_id".to_string(), values)
    }

    pub fn last_updated(self, values: impl Into<Values>, prefix: Option<SearchPrefix>) -> Self {
        self.date("_lastUpdated", values, prefix)
    }

    pub fn tag(self, value: impl Into<TokenValue>, modifier: Option<TokenModifier>) -> Self {
        self.token("_tag", value, modifier)
    }

    pub fn security(self, value: impl Into<TokenValue>, modifier: Option<TokenModifier>) -> Self {
        self.token("_security", value, modifier)
    }

    pub fn profile(self, values: impl Into<Values>) -> Self {
        self.uri("_profile", values, None)
    }

    pub fn text(self, value: &str) -> Self {
        self.push("_text".to_string(), vec![escape(value)])
    }

    pub fn content(self, value: &str) -> Self {
        self.push("_content".to_string(), vec![escape(value)])
    }

    pub fn count(self, count: u32) -> Self {
        self.push("_count".to_string(), vec![count.to_string()])
    }

    /// `_sort`, prefix a field with `-` for descending order
    pub fn sort(self, fields: &[&str]) -> Self {
        let fields = fields.iter().map(|f| f.to_string()).collect();
        self.push("_sort".to_string(), fields)
    }

    /// `_include=Source:param[:Target]`, optionally `:iterate`
    pub fn include(self, source_type: &str, param: &str, target_type: Option<&str>, iterate: bool) -> Self {
        self.inclusion("_include", source_type, param, target_type, iterate)
    }

    /// `_revinclude=Source:param[:Target]`, optionally `:iterate`
    pub fn revinclude(self, source_type: &str, param: &str, target_type: Option<&str>, iterate: bool) -> Self {
        self.inclusion("_revinclude", source_type, param, target_type, iterate)
    }

    fn inclusion(
        self,
        name: &str,
        source_type: &str,
        param: &str,
        target_type: Option<&str>,
        iterate: bool,
    ) -> Self {
        let name = if iterate { format!("{name}:iterate") } else { name.to_string() };
        let value = match target_type {
            Some(target) => format!("{source_type}:{param}:{target}"),
            None => format!("{source_type}:{param}"),
        };
        self.push(name, vec![value])
    }

    pub fn summary(self, mode: SummaryMode) -> Self {
        self.push("_summary".to_string(), vec![mode.as_str().to_string()])
    }

    pub fn elements(self, elements: &[&str]) -> Self {
        let elements = elements.iter().map(|e| e.to_string()).collect();
        self.push("_elements".to_string(), elements)
    }

    pub fn total(self, mode: TotalMode) -> Self {
        let mode = match mode {
            TotalMode::None => "none",
            TotalMode::Estimate => "estimate",
            TotalMode::Accurate => "accurate",
        };
        self.push("_total".to_string(), vec![mode.to_string()])
    }

    /// Compile to a query string (no leading `?`)
    pub fn href(&self) -> String {
        self.params
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for SearchBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href())
    }
}

/// Search parameters accepted by the client: a raw query string, a built
/// [`SearchBuilder`], or a callback that receives a fresh builder for the
/// searched resource type.
pub enum SearchParameters {
    Query(String),
    Builder(SearchBuilder),
    Deferred(Box<dyn FnOnce(SearchBuilder) -> SearchParameters + Send>),
}

impl SearchParameters {
    /// Defer building until the resource type is known
    pub fn build<F, P>(f: F) -> Self
    where
        F: FnOnce(SearchBuilder) -> P + Send + 'static,
        P: Into<SearchParameters>,
    {
        SearchParameters::Deferred(Box::new(move |builder| f(builder).into()))
    }

    /// Reduce to the wire query string; `None` when there is nothing to send
    pub fn normalize(self, resource_type: Option<&str>) -> Option<String> {
        match self {
            SearchParameters::Query(query) => {
                let query = query.trim().trim_start_matches('?');
                (!query.is_empty()).then(|| query.to_string())
            }
            SearchParameters::Builder(builder) => {
                (!builder.is_empty()).then(|| builder.href())
            }
            SearchParameters::Deferred(f) => {
                f(SearchBuilder::new(resource_type)).normalize(resource_type)
            }
        }
    }
}

impl Default for SearchParameters {
    fn default() -> Self {
        SearchParameters::Query(String::new())
    }
}

impl fmt::Debug for SearchParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParameters::Query(q) => f.debug_tuple("Query").field(q).finish(),
            SearchParameters::Builder(b) => f.debug_tuple("Builder").field(b).finish(),
            SearchParameters::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<&str> for SearchParameters {
    fn from(query: &str) -> Self {
        SearchParameters::Query(query.to_string())
    }
}

impl From<String> for SearchParameters {
    fn from(query: String) -> Self {
        SearchParameters::Query(query)
    }
}

impl From<SearchBuilder> for SearchParameters {
    fn from(builder: SearchBuilder) -> Self {
        SearchParameters::Builder(builder)
    }
}

impl From<Option<SearchParameters>> for SearchParameters {
    fn from(params: Option<SearchParameters>) -> Self {
        params.unwrap_or_default()
    }
}
