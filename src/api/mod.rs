//! Authenticated call engine.
//!
//! [`crate::Session::call`] executes one [`ApiRequest`]: it encodes the typed
//! parameters, attaches the bearer token, retries failed attempts with a
//! quadratic backoff (reauthenticating on token errors), classifies vendor
//! error payloads into [`ApiError`], and decodes the response into the
//! caller's result type.
//!
//! # Example
//!
//! ```no_run
//! use kwapi_core::{ApiRequest, Fields, Param, Session};
//! use reqwest::Method;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct FileInfo {
//!     name: String,
//!     size: u64,
//! }
//!
//! # async fn example(session: Session) -> Result<(), kwapi_core::Error> {
//! let info: FileInfo = session
//!     .call(ApiRequest::new(
//!         Method::GET,
//!         "/rest/files/42",
//!         vec![Param::Query(Fields::new().set("with", "(name,size)"))],
//!     )?)
//!     .await?;
//! println!("{} is {} bytes", info.name, info.size);
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod params;
mod trace;

pub(crate) use engine::{check_response, decode_body};
pub use error::{ApiError, ErrorFlags};
pub(crate) use params::MultipartFactory;
pub use params::{ApiRequest, Fields, Param, ParamValue};
pub(crate) use trace::trace_body;
