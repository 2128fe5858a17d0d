//! File transfers: chunked uploads, lazy downloads and progress reporting.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use kwapi_core::{Session, TracingSink, TransferMonitor};
//!
//! # async fn example(session: Session) -> Result<(), kwapi_core::Error> {
//! let monitor = TransferMonitor::new(Arc::new(TracingSink));
//! let file_id = session
//!     .upload_file(42, Path::new("report.pdf"), Some(&monitor))
//!     .await?;
//! println!("uploaded as file {file_id}");
//! # Ok(())
//! # }
//! ```

mod chunk;
mod download;
mod monitor;
mod sink;
mod timeout;
mod upload;

pub use chunk::{chunk_count, chunk_size_for};
pub use download::RemoteReader;
pub use monitor::{MonitoredReader, TransferMonitor, TransferRecord, human_size};
pub use sink::{ProgressSink, TracingSink};
pub use upload::UploadRecord;
