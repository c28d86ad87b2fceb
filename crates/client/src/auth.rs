//! Authorization header suppliers

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use url::Url;

use crate::error::ClientError;
use crate::transport::BoxError;

/// Computes the `Authorization` header for one request
#[async_trait]
pub trait AuthorizationCallback: Send + Sync {
    async fn authorization(&self, url: &Url) -> Result<String, BoxError>;
}

/// Where the `Authorization` header comes from
#[derive(Clone)]
pub enum AuthSupplier {
    /// Sent verbatim on every request
    Static(String),
    /// Invoked before every request with the resolved URL
    Callback(Arc<dyn AuthorizationCallback>),
}

impl AuthSupplier {
    pub fn bearer(token: impl AsRef<str>) -> Self {
        AuthSupplier::Static(format!("Bearer {}", token.as_ref()))
    }

    /// `Bearer {token}`, or the value verbatim when it already names a
    /// scheme (`Basic ...`)
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.contains(' ') {
            AuthSupplier::Static(token.to_string())
        } else {
            AuthSupplier::bearer(token)
        }
    }

    /// Supplier backed by an async closure, e.g. a token refresher
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(Url) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, BoxError>> + Send + 'static,
    {
        AuthSupplier::Callback(Arc::new(FnCallback(f)))
    }

    pub async fn header_value(&self, url: &Url) -> Result<String, ClientError> {
        match self {
            AuthSupplier::Static(value) => Ok(value.clone()),
            AuthSupplier::Callback(callback) => callback
                .authorization(url)
                .await
                .map_err(ClientError::Transport),
        }
    }
}

impl fmt::Debug for AuthSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthSupplier::Static(_) => f.write_str("Static(<redacted>)"),
            AuthSupplier::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

struct FnCallback<F>(F);

#[async_trait]
impl<F, Fut> AuthorizationCallback for FnCallback<F>
where
    F: Fn(Url) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, BoxError>> + Send,
{
    async fn authorization(&self, url: &Url) -> Result<String, BoxError> {
        (self.0)(url.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_and_callback() {
        let url = Url::parse("https://fhir.example.com/r4/Patient/1").unwrap();

        let value = AuthSupplier::bearer("abc").header_value(&url).await.unwrap();
        assert_eq!(value, "Bearer abc");

        let supplier = AuthSupplier::callback(|url: Url| async move {
            Ok(format!("Bearer for {}", url.path()))
        });
        assert_eq!(
            supplier.header_value(&url).await.unwrap(),
            "Bearer for /r4/Patient/1"
        );
        assert_eq!(format!("{:?}", AuthSupplier::bearer("abc")), "Static(<redacted>)");

        let basic = AuthSupplier::from_token(" Basic dXNlcjpwdw== ");
        assert_eq!(basic.header_value(&url).await.unwrap(), "Basic dXNlcjpwdw==");
    }

    #[tokio::test]
    async fn test_callback_failure_is_transport_error() {
        let url = Url::parse("https://fhir.example.com/").unwrap();
        let supplier = AuthSupplier::callback(|_| async { Err::<String, BoxError>("token endpoint down".into()) });

        let err = supplier.header_value(&url).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
