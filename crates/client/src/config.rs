//! Client configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::AuthSupplier;
use crate::error::ClientError;
use crate::transport::Transport;

/// Client configuration, immutable once the client is built
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the FHIR endpoint, always ending with `/`
    pub base_url: Url,
    /// Default for the `If-Match` concurrency guard on update/patch
    pub prevent_concurrent_updates: bool,
    /// FHIR version token sent as `Accept: ...; fhirVersion=`
    pub accept_fhir_version: Option<String>,
    pub auth: Option<AuthSupplier>,
    /// Request timeout of the default transport
    pub timeout: Option<Duration>,
    pub transport: Option<Arc<dyn Transport>>,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            prevent_concurrent_updates: false,
            accept_fhir_version: None,
            auth: None,
            timeout: None,
            transport: None,
        })
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("FHIR_BASE_URL")
            .map_err(|_| ClientError::Config("FHIR_BASE_URL is not set".into()))?;
        let mut config = Self::new(&base_url)?;

        if let Ok(token) = std::env::var("FHIR_AUTH_TOKEN") {
            if !token.trim().is_empty() {
                config.auth = Some(AuthSupplier::from_token(&token));
            }
        }

        if let Ok(flag) = std::env::var("FHIR_PREVENT_CONCURRENT_UPDATES") {
            config.prevent_concurrent_updates = parse_flag(&flag).ok_or_else(|| {
                ClientError::Config(format!("Invalid FHIR_PREVENT_CONCURRENT_UPDATES: {}", flag))
            })?;
        }

        config.accept_fhir_version = std::env::var("FHIR_VERSION")
            .ok()
            .filter(|v| !v.trim().is_empty());

        if let Ok(secs) = std::env::var("FHIR_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ClientError::Config(format!("Invalid FHIR_TIMEOUT_SECS: {}", secs)))?;
            config.timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_prevent_concurrent_updates(mut self, enabled: bool) -> Self {
        self.prevent_concurrent_updates = enabled;
        self
    }

    pub fn with_fhir_version(mut self, version: impl Into<String>) -> Self {
        self.accept_fhir_version = Some(version.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthSupplier) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("prevent_concurrent_updates", &self.prevent_concurrent_updates)
            .field("accept_fhir_version", &self.accept_fhir_version)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

/// Parse an http(s) base URL, dropping query/fragment and forcing a trailing `/`
pub fn normalize_base_url(raw: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }

    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        let url = normalize_base_url("https://fhir.example.com/r4?x=1#top").unwrap();
        assert_eq!(url.as_str(), "https://fhir.example.com/r4/");

        let url = normalize_base_url("http://localhost:8080").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/");

        assert!(matches!(
            normalize_base_url("ftp://example.com/fhir"),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_flags() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_builder_methods() {
        let config = ClientConfig::new("https://fhir.example.com/r4")
            .unwrap()
            .with_prevent_concurrent_updates(true)
            .with_fhir_version("4.0")
            .with_auth(AuthSupplier::bearer("secret"));

        assert!(config.prevent_concurrent_updates);
        assert_eq!(config.accept_fhir_version.as_deref(), Some("4.0"));
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
    }
}
