//! Per-user session: request construction and token lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use reqwest::{Client, Proxy};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ApiConfig, AuthToken};
use crate::api::{Fields, check_response, decode_body, trace_body};
use crate::auth::token::GrantResponse;
use crate::constants::{DEFAULT_API_VERSION, TOKEN_PATH};
use crate::user_agent::default_agent;
use crate::Error;

const API_VERSION_HEADER: HeaderName = HeaderName::from_static("x-accellion-version");

/// Obtains tokens for sessions configured with a signature key.
///
/// The implementation receives the decrypted key only for the duration of
/// the call. When installed (and a key is set), reauthentication mints a
/// fresh token through it instead of using the refresh grant.
#[async_trait]
pub trait SignatureGrant: Send + Sync {
    /// Mints a token for `session.username()`.
    async fn mint(&self, session: &Session, signature_key: &str) -> Result<AuthToken, Error>;
}

/// An authenticated user on a configured server.
///
/// Cheap to clone; clones share the same [`ApiConfig`].
#[derive(Debug, Clone)]
pub struct Session {
    config: Arc<ApiConfig>,
    username: String,
}

impl Session {
    /// Creates a session for `username`.
    #[must_use]
    pub fn new(config: Arc<ApiConfig>, username: impl Into<String>) -> Self {
        Self {
            config,
            username: username.into(),
        }
    }

    /// Returns the session user.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the shared configuration.
    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Resolves an API path (and query) against the configured endpoint.
    pub(crate) fn url(&self, path: &str, query: &Fields) -> Result<Url, Error> {
        let mut url = self
            .config
            .endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::invalid_request(format!("invalid path {path}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    /// Builds an HTTP client from the session's TLS, proxy and timeout settings.
    ///
    /// Transfers pass `bounded = false`: they are limited per read, not as a whole.
    pub(crate) fn http_client(&self, bounded: bool) -> Result<Client, Error> {
        let config = &self.config;
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .gzip(true);
        if bounded {
            builder = builder.timeout(config.request_timeout);
        }
        if let Some(proxy) = &config.proxy_uri {
            let proxy = Proxy::all(proxy)
                .map_err(|e| Error::configuration(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| Error::configuration(format!("cannot build HTTP client: {e}")))
    }

    /// `User-Agent` and `Referer` headers, sent with every request.
    pub(crate) fn agent_headers(&self) -> Result<HeaderMap, Error> {
        let agent = self
            .config
            .agent_string
            .clone()
            .unwrap_or_else(default_agent);
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&agent)?);
        headers.insert(
            REFERER,
            header_value(&format!("https://{}/", self.config.server))?,
        );
        Ok(headers)
    }

    /// Agent headers plus `X-Accellion-Version`.
    pub(crate) fn api_headers(&self, api_version: u32) -> Result<HeaderMap, Error> {
        let mut headers = self.agent_headers()?;
        headers.insert(API_VERSION_HEADER, HeaderValue::from(api_version));
        Ok(headers)
    }

    /// Returns a usable access token, refreshing an expired one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if nothing is stored and no signature
    /// grant is configured, or [`Error::ReauthRequired`] if refreshing fails.
    pub(crate) async fn access_token(&self) -> Result<String, Error> {
        let stored = self.config.token_store().load(&self.username).await?;
        match stored {
            Some(token) if !token.is_expired() => Ok(token.access_token),
            Some(_) => {
                debug!(user = %self.username, "access token expired");
                self.reauthenticate("access token expired").await
            }
            None if self.config.signature_grant().is_some() => {
                self.reauthenticate("no stored token").await
            }
            None => Err(Error::configuration(format!(
                "no token stored for {}; log in first",
                self.username
            ))),
        }
    }

    /// Obtains a new token (refresh grant, or signature grant when configured),
    /// persists it and returns the access token.
    ///
    /// On failure the stored token is deleted and [`Error::ReauthRequired`]
    /// is returned. Configuration errors are returned unchanged.
    #[instrument(skip(self), fields(user = %self.username))]
    pub(crate) async fn reauthenticate(&self, reason: &str) -> Result<String, Error> {
        let store = self.config.token_store();
        let minted = match self.config.signature_grant() {
            Some(grant) => match self.config.secrets().signature_key()? {
                Some(key) => grant.mint(self, &key).await,
                None => Err(Error::configuration("signature key is not set")),
            },
            None => match store.load(&self.username).await? {
                Some(token) if token.can_refresh() => self.refresh(&token).await,
                _ => Err(Error::ReauthRequired {
                    username: self.username.clone(),
                    reason: format!("{reason}; no refresh token stored"),
                }),
            },
        };

        match minted {
            Ok(token) => {
                store.save(&self.username, &token).await?;
                debug!("token renewed");
                Ok(token.access_token)
            }
            Err(error @ Error::Configuration { .. }) => Err(error),
            Err(error) => {
                warn!(error = %error, "reauthentication failed, discarding stored token");
                store.delete(&self.username).await?;
                match error {
                    Error::ReauthRequired { .. } => Err(error),
                    other => Err(Error::ReauthRequired {
                        username: self.username.clone(),
                        reason: other.to_string(),
                    }),
                }
            }
        }
    }

    /// Performs the password grant and persists the resulting token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no client secret is set, or the
    /// classified error from the token endpoint.
    #[instrument(skip(self, password), fields(user = %self.username))]
    pub async fn authenticate(&self, password: &str) -> Result<AuthToken, Error> {
        let fields = Fields::new()
            .set("client_id", &self.config.application_id)
            .set("client_secret", self.client_secret()?)
            .set("grant_type", "password")
            .set("username", &self.username)
            .set("password", password)
            .set("redirect_uri", &self.config.redirect_uri);
        let token = self.token_grant(&fields).await?;
        self.set_token(&token).await?;
        info!("authenticated");
        Ok(token)
    }

    /// Stores `token` for this user, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenStore`] if the store fails.
    pub async fn set_token(&self, token: &AuthToken) -> Result<(), Error> {
        Ok(self.config.token_store().save(&self.username, token).await?)
    }

    /// Deletes the stored token for this user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenStore`] if the store fails.
    pub async fn logout(&self) -> Result<(), Error> {
        Ok(self.config.token_store().delete(&self.username).await?)
    }

    async fn refresh(&self, token: &AuthToken) -> Result<AuthToken, Error> {
        let fields = Fields::new()
            .set("client_id", &self.config.application_id)
            .set("client_secret", self.client_secret()?)
            .set("grant_type", "refresh_token")
            .set("refresh_token", &token.refresh_token)
            .set("redirect_uri", &self.config.redirect_uri);
        self.token_grant(&fields).await
    }

    fn client_secret(&self) -> Result<String, Error> {
        self.config
            .secrets()
            .client_secret()?
            .ok_or_else(|| Error::configuration("client secret is not set"))
    }

    /// Posts a grant to the token endpoint. Never retried.
    async fn token_grant(&self, fields: &Fields) -> Result<AuthToken, Error> {
        let url = self.url(TOKEN_PATH, &Fields::new())?;
        let body = fields.encode();
        if self.config.trace {
            debug!(target: "kwapi::trace", "POST {TOKEN_PATH}\n{}", trace_body(body.as_bytes()));
        }

        let response = self
            .http_client(true)?
            .post(url)
            .headers(self.api_headers(DEFAULT_API_VERSION)?)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::transport(TOKEN_PATH, e))?;

        let response = check_response(&self.config, TOKEN_PATH, response).await?;
        let grant: GrantResponse = decode_body(&self.config, TOKEN_PATH, response).await?;
        Ok(grant.into())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::configuration(format!("invalid header value {value:?}")))
}
