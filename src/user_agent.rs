//! Default User-Agent for API traffic.

/// Default User-Agent used when the configuration does not provide an agent string.
#[must_use]
pub(crate) fn default_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("kwapi/{version}")
}
