//! Protocol constants and configuration defaults.

use std::time::Duration;

/// API version sent in `X-Accellion-Version` when a request does not pin one.
pub const DEFAULT_API_VERSION: u32 = 11;

/// API version used for chunk submission and content downloads.
pub const TRANSFER_API_VERSION: u32 = 7;

/// API version used when initiating an upload into a folder.
pub const FOLDER_UPLOAD_API_VERSION: u32 = 5;

/// Largest chunk the server accepts (65 MiB).
pub const MAX_CHUNK_SIZE: u64 = 68_157_440;

/// Smallest chunk size the client will negotiate (1 MiB).
pub const MIN_CHUNK_SIZE: u64 = 1_048_576;

/// Relay buffer used when streaming a chunk from its source.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Default maximum retries on a failed call (attempts = retries + 1).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default request timeout for ordinary API calls and per-read stall limit for transfers.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Unit of the quadratic retry backoff (`attempt² × unit`).
pub const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Interval between transfer monitor redraws.
pub const MONITOR_TICK: Duration = Duration::from_millis(200);

/// Token endpoint for refresh and password grants.
pub const TOKEN_PATH: &str = "/oauth/token";
