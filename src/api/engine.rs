//! Retry/reauth loop, response classification and decoding.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::params::Body;
use super::trace::trace_body;
use super::{ApiError, ApiRequest, ErrorFlags};
use crate::auth::{ApiConfig, Session};
use crate::Error;

const DECODE_HINT_TRACE: &str = "see the kwapi::trace output for the raw response";
const DECODE_HINT_NO_TRACE: &str = "enable request tracing with --snoop to see the raw response";

/// Backoff before the attempt following `attempt` (1-based): `attempt² × unit`.
pub(crate) fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(attempt.saturating_mul(attempt))
}

/// Whether a failed attempt is retried after refreshing the token.
fn needs_reauth(error: &Error) -> bool {
    error.is(ErrorFlags::TOKEN_ERROR | ErrorFlags::INTERNAL_SERVER_ERROR)
}

/// Whether a failed attempt is retried as it is.
fn is_transient(error: &Error) -> bool {
    matches!(error, Error::Transport { .. })
}

impl Session {
    /// Executes one API operation and decodes its result.
    ///
    /// Runs up to `retries + 1` attempts. A classified token or internal
    /// server error triggers one reauthentication before the next attempt;
    /// transport failures are retried as they are. Every retry waits
    /// `attempt² × backoff_unit`. Any other error ends the call immediately.
    ///
    /// A 2xx response with an empty body decodes from JSON `null`, so `()`
    /// and `Option<T>` results accept "no content".
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error, [`Error::ReauthRequired`] if
    /// reauthentication failed, or [`Error::Configuration`] if no token is
    /// available.
    #[instrument(skip(self, request), fields(user = %self.username(), request = %request))]
    pub async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, Error> {
        let url = self.url(&request.path, &request.query)?;
        let attempts = self.config().retries.saturating_add(1);
        let mut token = self.access_token().await?;
        let mut attempt = 1;

        loop {
            let error = match self.attempt(&request, &url, &token).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let reauth = needs_reauth(&error);
            if attempt >= attempts || !(reauth || is_transient(&error)) {
                return Err(error);
            }

            warn!(attempt, attempts, reauth, error = %error, "call failed, retrying");
            if reauth {
                token = self.reauthenticate(&error.to_string()).await?;
            }
            tokio::time::sleep(backoff_delay(attempt, self.config().backoff_unit)).await;
            attempt += 1;
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: &str,
    ) -> Result<T, Error> {
        let config = self.config();
        let streaming = matches!(request.body, Body::Multipart(_));
        if config.trace {
            debug!(
                target: "kwapi::trace",
                "{} {} (X-Accellion-Version: {})\n{}",
                request.method,
                url,
                request.api_version,
                request.body.describe().map(|b| trace_body(b.as_bytes())).unwrap_or_default()
            );
        }

        let mut builder = self
            .http_client(!streaming)?
            .request(request.method.clone(), url.clone())
            .headers(self.api_headers(request.api_version)?)
            .bearer_auth(token);
        if let Some(content_type) = request.body.content_type() {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Body::Multipart(factory) = &request.body {
            builder = builder.multipart(factory());
        } else if let Some(bytes) = request.body.bytes() {
            builder = builder.body(bytes);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(request.path(), e))?;
        let response = check_response(config, request.path(), response).await?;
        decode_body(config, request.path(), response).await
    }
}

/// Passes a 2xx response through; classifies anything else.
///
/// A vendor error payload becomes [`Error::Api`]. A 401 without one is
/// classified as `ERR_AUTH_UNAUTHORIZED`; other statuses become [`Error::Http`].
pub(crate) async fn check_response(
    config: &ApiConfig,
    path: &str,
    response: Response,
) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::transport(path, e))?;
    if config.trace {
        debug!(target: "kwapi::trace", "{status} {path}\n{}", trace_body(&body));
    }

    if let Some(api_error) = ApiError::from_body(&body) {
        return Err(api_error.into());
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::from_code("ERR_AUTH_UNAUTHORIZED", "Unauthorized access token").into());
    }
    Err(Error::Http {
        server: config.server.clone(),
        status: status.to_string(),
    })
}

/// Reads and decodes a successful response body; empty bodies decode from `null`.
pub(crate) async fn decode_body<T: DeserializeOwned>(
    config: &ApiConfig,
    path: &str,
    response: Response,
) -> Result<T, Error> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::transport(path, e))?;
    if config.trace {
        debug!(target: "kwapi::trace", "{status} {path}\n{}", trace_body(&body));
    }

    let decoded = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_slice(&body)
    };
    decoded.map_err(|source| Error::Decode {
        server: config.server.clone(),
        hint: if config.trace {
            DECODE_HINT_TRACE
        } else {
            DECODE_HINT_NO_TRACE
        },
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolError;

    #[test]
    fn test_backoff_is_quadratic() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff_delay(1, unit), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, unit), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, unit), Duration::from_secs(9));
    }

    #[test]
    fn test_retry_classification() {
        let internal: Error = ApiError::from_code("ERR_INTERNAL_SERVER_ERROR", "boom").into();
        let changed: Error = ApiError::from_code("ERR_AUTH_PROFILE_CHANGED", "changed").into();
        let exists: Error = ApiError::from_code("ERR_ENTITY_EXISTS", "exists").into();
        assert!(needs_reauth(&internal));
        assert!(needs_reauth(&changed));
        assert!(!is_transient(&internal));
        assert!(!needs_reauth(&exists));
        assert!(!is_transient(&exists));
        let protocol = Error::Protocol(ProtocolError::UploadIdNotFound);
        assert!(!needs_reauth(&protocol));
        assert!(!is_transient(&protocol));
    }
}
