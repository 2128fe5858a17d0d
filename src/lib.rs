//! kiteworks API client library
//!
//! This library drives the kiteworks file-sharing REST API: it authenticates
//! sessions, issues typed requests with classified error handling, and moves
//! files in bounded, resumable chunks while reporting transfer progress.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Call engine, request parameters and vendor error classification
//! - [`auth`] - Session configuration, tokens, token stores and refresh flow
//! - [`transfer`] - Chunked uploads, resumable downloads and the transfer monitor
//! - [`db`] - SQLite connection used by the persistent token store

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod auth;
mod bitflag;
mod constants;
pub mod db;
mod error;
pub mod transfer;
mod user_agent;

// Re-export commonly used types
pub use api::{ApiError, ApiRequest, ErrorFlags, Fields, Param, ParamValue};
pub use auth::{
    ApiConfig, AuthToken, MemoryTokenStore, Session, SignatureGrant, SqliteTokenStore, StoreError,
    TokenStore,
};
pub use bitflag::BitFlag;
pub use constants::{
    DEFAULT_API_VERSION, DEFAULT_MAX_RETRIES, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, TRANSFER_API_VERSION,
};
pub use db::Database;
pub use error::{Error, ProtocolError};
pub use transfer::{
    MonitoredReader, ProgressSink, RemoteReader, TracingSink, TransferMonitor, TransferRecord,
    UploadRecord, chunk_count, chunk_size_for,
};
