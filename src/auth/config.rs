//! Session configuration.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::secrets::Secrets;
use super::{MemoryTokenStore, SignatureGrant, TokenStore};
use crate::Error;
use crate::constants::{BACKOFF_UNIT, CONNECT_TIMEOUT, DEFAULT_MAX_RETRIES, REQUEST_TIMEOUT};

/// Connection, retry and credential settings shared by every session.
///
/// Mutable only before it is wrapped in an [`Arc`] and handed to
/// [`crate::Session::new`]; read-only afterwards.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use kwapi_core::{ApiConfig, Session};
///
/// # fn example() -> Result<(), kwapi_core::Error> {
/// let mut config = ApiConfig::new("kw.example.com")?
///     .with_application_id("app-id")
///     .with_redirect_uri("https://kw.example.com/rest/callback.html")
///     .with_retries(5);
/// config.set_client_secret("client-secret")?;
/// let session = Session::new(Arc::new(config), "alice@example.com");
/// # Ok(())
/// # }
/// ```
pub struct ApiConfig {
    /// Server host name, used for `Referer` and error messages.
    pub server: String,
    /// Base URL every API path is joined onto (`https://<server>/` by default).
    pub endpoint: Url,
    /// OAuth client ID.
    pub application_id: String,
    /// OAuth redirect URI registered for the client.
    pub redirect_uri: String,
    /// `User-Agent` override; `kwapi/<version>` when `None`.
    pub agent_string: Option<String>,
    /// Verify TLS certificates.
    pub verify_ssl: bool,
    /// Proxy for all requests.
    pub proxy_uri: Option<String>,
    /// Whole-request limit for ordinary API calls and per-read stall limit for transfers.
    pub request_timeout: Duration,
    /// TCP/TLS connect limit.
    pub connect_timeout: Duration,
    /// Upper bound on negotiated chunk size; zero means the server maximum.
    pub max_chunk_size: u64,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Unit of the quadratic backoff between attempts.
    pub backoff_unit: Duration,
    /// Emit verbose request/response trace on `kwapi::trace`.
    pub trace: bool,
    token_store: Arc<dyn TokenStore>,
    signature_grant: Option<Arc<dyn SignatureGrant>>,
    secrets: Secrets,
}

impl ApiConfig {
    /// Creates a configuration for `server` with default settings and an
    /// in-memory token store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `server` is not a valid host name.
    pub fn new(server: &str) -> Result<Self, Error> {
        let server = server.trim().trim_end_matches('/').to_string();
        if server.is_empty() {
            return Err(Error::configuration("server host name is empty"));
        }
        let endpoint = Url::parse(&format!("https://{server}/"))
            .map_err(|e| Error::configuration(format!("invalid server {server}: {e}")))?;

        Ok(Self {
            server,
            endpoint,
            application_id: String::new(),
            redirect_uri: String::new(),
            agent_string: None,
            verify_ssl: true,
            proxy_uri: None,
            request_timeout: REQUEST_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            max_chunk_size: 0,
            retries: DEFAULT_MAX_RETRIES,
            backoff_unit: BACKOFF_UNIT,
            trace: false,
            token_store: Arc::new(MemoryTokenStore::new()),
            signature_grant: None,
            secrets: Secrets::new(),
        })
    }

    /// Overrides the base URL, e.g. to reach a plain-HTTP test server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `endpoint` is not a valid base URL.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, Error> {
        let mut url = Url::parse(endpoint)
            .map_err(|e| Error::configuration(format!("invalid endpoint {endpoint}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(Error::configuration(format!("endpoint {endpoint} cannot be a base URL")));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.endpoint = url;
        Ok(self)
    }

    /// Sets the OAuth client id registered for this application.
    #[must_use]
    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = id.into();
        self
    }

    /// Sets the redirect URI sent with authorization requests.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// Overrides the `User-Agent` sent with every request.
    #[must_use]
    pub fn with_agent_string(mut self, agent: impl Into<String>) -> Self {
        self.agent_string = Some(agent.into());
        self
    }

    /// Turns TLS certificate verification on or off.
    #[must_use]
    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// Routes all requests through the given proxy URL.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy_uri = Some(proxy.into());
        self
    }

    /// Sets the connect timeout and the per-request timeout.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Caps the upload chunk size in bytes; zero selects the server maximum.
    #[must_use]
    pub fn with_max_chunk_size(mut self, bytes: u64) -> Self {
        self.max_chunk_size = bytes;
        self
    }

    /// Sets how many times a failed call is retried.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the unit scaled by `attempt²` between retries.
    #[must_use]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Logs raw requests and responses under the `kwapi::trace` target.
    #[must_use]
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Replaces the default in-memory token store.
    #[must_use]
    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = store;
        self
    }

    /// Installs the collaborator that mints tokens from the signature key.
    #[must_use]
    pub fn with_signature_grant(mut self, grant: Arc<dyn SignatureGrant>) -> Self {
        self.signature_grant = Some(grant);
        self
    }

    /// Stores the OAuth client secret, encrypted in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenStore`] if encryption fails.
    pub fn set_client_secret(&mut self, secret: &str) -> Result<(), Error> {
        Ok(self.secrets.set_client_secret(secret)?)
    }

    /// Stores the signature key, encrypted in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenStore`] if encryption fails.
    pub fn set_signature_key(&mut self, key: &str) -> Result<(), Error> {
        Ok(self.secrets.set_signature_key(key)?)
    }

    /// Returns the token store.
    #[must_use]
    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.token_store
    }

    pub(crate) fn signature_grant(&self) -> Option<&Arc<dyn SignatureGrant>> {
        self.signature_grant
            .as_ref()
            .filter(|_| self.secrets.has_signature_key())
    }

    pub(crate) fn secrets(&self) -> &Secrets {
        &self.secrets
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("server", &self.server)
            .field("endpoint", &self.endpoint.as_str())
            .field("application_id", &self.application_id)
            .field("verify_ssl", &self.verify_ssl)
            .field("proxy_uri", &self.proxy_uri)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("retries", &self.retries)
            .field("trace", &self.trace)
            .field("signature_grant", &self.signature_grant.is_some())
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::new("kw.example.com").unwrap();
        assert_eq!(config.endpoint.as_str(), "https://kw.example.com/");
        assert_eq!(config.retries, DEFAULT_MAX_RETRIES);
        assert!(config.verify_ssl);
        assert_eq!(config.max_chunk_size, 0);
    }

    #[test]
    fn test_empty_server_rejected() {
        assert!(matches!(
            ApiConfig::new("  "),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_endpoint_override_gets_trailing_slash() {
        let config = ApiConfig::new("kw.example.com")
            .unwrap()
            .with_endpoint("http://127.0.0.1:8080/base")
            .unwrap();
        assert_eq!(config.endpoint.as_str(), "http://127.0.0.1:8080/base/");
        assert_eq!(config.server, "kw.example.com");
    }

    #[test]
    fn test_signature_grant_requires_key() {
        struct Never;
        #[async_trait::async_trait]
        impl SignatureGrant for Never {
            async fn mint(
                &self,
                _session: &crate::Session,
                _signature_key: &str,
            ) -> Result<crate::AuthToken, Error> {
                Err(Error::configuration("unused"))
            }
        }

        let mut config = ApiConfig::new("kw.example.com")
            .unwrap()
            .with_signature_grant(Arc::new(Never));
        assert!(config.signature_grant().is_none());
        config.set_signature_key("sig").unwrap();
        assert!(config.signature_grant().is_some());
    }
}
