//! Vendor error classification.
//!
//! kiteworks reports failures inside the response body rather than through
//! status codes alone:
//!
//! ```json
//! {"errors": [{"code": "ERR_AUTH_UNAUTHORIZED", "message": "Unauthorized"}]}
//! {"error": "invalid_grant", "error_description": "Invalid refresh token"}
//! ```
//!
//! [`ApiError`] folds every reported code into a single [`ErrorFlags`] set so
//! retry logic can ask one question: does this error intersect a given mask?

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::Deserialize;

/// Typed bit-set of classified vendor error categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ErrorFlags(u32);

impl ErrorFlags {
    /// No category.
    pub const NONE: Self = Self(0);
    /// Access token rejected.
    pub const AUTH_UNAUTHORIZED: Self = Self(1);
    /// User profile changed since the token was issued.
    pub const AUTH_PROFILE_CHANGED: Self = Self(1 << 1);
    /// User is not allowed to access the resource.
    pub const ACCESS_USER: Self = Self(1 << 2);
    /// Refresh token or grant rejected.
    pub const INVALID_GRANT: Self = Self(1 << 3);
    /// Entity deleted permanently.
    pub const ENTITY_DELETED_PERMANENTLY: Self = Self(1 << 4);
    /// Entity not found.
    pub const ENTITY_NOT_FOUND: Self = Self(1 << 5);
    /// Entity deleted.
    pub const ENTITY_DELETED: Self = Self(1 << 6);
    /// Parent folder of the entity deleted.
    pub const ENTITY_PARENT_FOLDER_DELETED: Self = Self(1 << 7);
    /// HTTP method not allowed for this path.
    pub const REQUEST_METHOD_NOT_ALLOWED: Self = Self(1 << 8);
    /// Any `ERR_INTERNAL_*` code.
    pub const INTERNAL_SERVER_ERROR: Self = Self(1 << 9);
    /// Entity already exists.
    pub const ENTITY_EXISTS: Self = Self(1 << 10);
    /// Role already assigned to the entity.
    pub const ENTITY_ROLE_IS_ASSIGNED: Self = Self(1 << 11);
    /// Resource temporarily unavailable.
    pub const UNAVAILABLE: Self = Self(1 << 12);
    /// Service unavailable.
    pub const SERVICE_UNAVAILABLE: Self = Self(1 << 13);
    /// Entity has not passed scanning yet.
    pub const ENTITY_NOT_SCANNED: Self = Self(1 << 14);
    /// Member already exists on the parent folder.
    pub const ENTITY_PARENT_FOLDER_MEMBER_EXISTS: Self = Self(1 << 15);

    /// Auth token related errors: these trigger reauthentication.
    pub const TOKEN_ERROR: Self =
        Self(Self::AUTH_UNAUTHORIZED.0 | Self::AUTH_PROFILE_CHANGED.0 | Self::INVALID_GRANT.0);

    /// Returns true if any bit of `mask` is set.
    #[must_use]
    pub const fn intersects(self, mask: Self) -> bool {
        self.0 & mask.0 != 0
    }

    /// Returns true if no category is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true for token errors (unauthorized, profile changed, invalid grant).
    #[must_use]
    pub const fn is_token_error(self) -> bool {
        self.intersects(Self::TOKEN_ERROR)
    }

    /// Returns true for internal server errors.
    #[must_use]
    pub const fn is_internal(self) -> bool {
        self.intersects(Self::INTERNAL_SERVER_ERROR)
    }

    /// Returns true for any of the "entity is gone" categories.
    #[must_use]
    pub const fn is_not_found(self) -> bool {
        self.intersects(Self(
            Self::ENTITY_NOT_FOUND.0
                | Self::ENTITY_DELETED.0
                | Self::ENTITY_DELETED_PERMANENTLY.0
                | Self::ENTITY_PARENT_FOLDER_DELETED.0,
        ))
    }

    /// Returns true if the entity already exists.
    #[must_use]
    pub const fn is_exists(self) -> bool {
        self.intersects(Self::ENTITY_EXISTS)
    }
}

impl BitOr for ErrorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ErrorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Maps an upper-cased vendor code to its category.
fn flag_for_code(code: &str) -> ErrorFlags {
    match code {
        "ERR_AUTH_UNAUTHORIZED" | "UNAUTHORIZED_CLIENT" => ErrorFlags::AUTH_UNAUTHORIZED,
        "ERR_AUTH_PROFILE_CHANGED" => ErrorFlags::AUTH_PROFILE_CHANGED,
        "ERR_ACCESS_USER" => ErrorFlags::ACCESS_USER,
        "INVALID_GRANT" => ErrorFlags::INVALID_GRANT,
        "ERR_ENTITY_DELETED_PERMANENTLY" => ErrorFlags::ENTITY_DELETED_PERMANENTLY,
        "ERR_ENTITY_NOT_FOUND" => ErrorFlags::ENTITY_NOT_FOUND,
        "ERR_ENTITY_DELETED" => ErrorFlags::ENTITY_DELETED,
        "ERR_ENTITY_PARENT_FOLDER_DELETED" => ErrorFlags::ENTITY_PARENT_FOLDER_DELETED,
        "ERR_REQUEST_METHOD_NOT_ALLOWED" => ErrorFlags::REQUEST_METHOD_NOT_ALLOWED,
        "ERR_ENTITY_EXISTS" => ErrorFlags::ENTITY_EXISTS,
        "ERR_ENTITY_ROLE_IS_ASSIGNED" => ErrorFlags::ENTITY_ROLE_IS_ASSIGNED,
        "UNAVAILABLE" => ErrorFlags::UNAVAILABLE,
        "SERVICE_UNAVAILABLE" => ErrorFlags::SERVICE_UNAVAILABLE,
        "ERR_ENTITY_NOT_SCANNED" => ErrorFlags::ENTITY_NOT_SCANNED,
        "ERR_ENTITY_PARENT_FOLDER_MEMBER_EXISTS" => ErrorFlags::ENTITY_PARENT_FOLDER_MEMBER_EXISTS,
        other if other.contains("ERR_INTERNAL_") => ErrorFlags::INTERNAL_SERVER_ERROR,
        _ => ErrorFlags::NONE,
    }
}

/// A classified kiteworks error.
///
/// Built once per failed call by [`ApiError::add`]; flags are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiError {
    flags: ErrorFlags,
    messages: Vec<String>,
}

impl ApiError {
    /// Creates an empty error.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an error from a single code/message pair.
    #[must_use]
    pub fn from_code(code: &str, message: &str) -> Self {
        let mut error = Self::new();
        error.add(code, message);
        error
    }

    /// Records one vendor code and its message.
    ///
    /// Codes match case-insensitively. Unknown codes contribute only their
    /// message, except `ERR_INTERNAL_*` codes which set
    /// [`ErrorFlags::INTERNAL_SERVER_ERROR`].
    pub fn add(&mut self, code: &str, message: &str) {
        let code = code.to_uppercase();
        self.flags |= flag_for_code(&code);
        self.messages.push(format!("{message}. (kiteworks:{code})"));
    }

    /// Returns true if the classified flags intersect `mask`.
    #[must_use]
    pub fn is(&self, mask: ErrorFlags) -> bool {
        self.flags.intersects(mask)
    }

    /// Returns the classified flags.
    #[must_use]
    pub fn flags(&self) -> ErrorFlags {
        self.flags
    }

    /// Returns the messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Parses a non-2xx response body into a classified error.
    ///
    /// Returns `None` when the body is not a vendor error payload.
    #[must_use]
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let payload = serde_json::from_slice::<ErrorPayload>(body).ok()?;
        if payload.errors.is_empty() && payload.error_description.is_empty() {
            return None;
        }

        let mut error = Self::new();
        for entry in &payload.errors {
            error.add(&entry.code, &entry.message);
        }
        if !payload.error_description.is_empty() {
            error.add(&payload.error, &payload.error_description);
        }
        Some(error)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.messages.as_slice() {
            return f.write_str(only);
        }
        let lines = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, message)| format!("[{i}] {message}"))
            .collect::<Vec<_>>();
        f.write_str(&lines.join("\n"))
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}
