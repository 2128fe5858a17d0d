//! OAuth access/refresh token pair.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds before the recorded expiry at which a token is treated as expired.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Bearer credentials for one user.
///
/// `expires` is an absolute Unix timestamp computed when the token was
/// received; zero means the server did not report an expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Bearer token attached to API calls.
    pub access_token: String,
    /// Token exchanged for a new access token.
    #[serde(default)]
    pub refresh_token: String,
    /// Absolute expiry (Unix seconds).
    #[serde(default)]
    pub expires: i64,
}

impl AuthToken {
    /// Builds a token from the fields returned by the token endpoint.
    #[must_use]
    pub fn from_grant(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        let expires = if expires_in > 0 {
            unix_now() + expires_in
        } else {
            0
        };
        Self {
            access_token,
            refresh_token,
            expires,
        }
    }

    /// Returns true if the access token has expired (or is about to).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires > 0 && unix_now() >= self.expires - EXPIRY_SKEW_SECS
    }

    /// Returns true if the token can be refreshed.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"[HIDDEN]")
            .field("refresh_token", &"[HIDDEN]")
            .field("expires", &self.expires)
            .finish()
    }
}

/// Token endpoint response body.
#[derive(Deserialize)]
pub(crate) struct GrantResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) refresh_token: String,
    #[serde(default)]
    pub(crate) expires_in: i64,
}

impl From<GrantResponse> for AuthToken {
    fn from(grant: GrantResponse) -> Self {
        Self::from_grant(grant.access_token, grant.refresh_token, grant.expires_in)
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
