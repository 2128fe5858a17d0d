//! Resumable chunked uploads.
//!
//! An upload is initiated once ([`Session::new_upload`] or
//! [`Session::new_version`]) and then streamed by [`Session::upload`], which
//! always re-reads the server's record first. Interrupted uploads therefore
//! resume from the last chunk the server acknowledged.

use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::chunk::chunk_count;
use super::{TransferMonitor, TransferRecord};
use crate::api::{ApiRequest, Fields, MultipartFactory, Param};
use crate::auth::Session;
use crate::constants::{FOLDER_UPLOAD_API_VERSION, RELAY_BUFFER_SIZE, TRANSFER_API_VERSION};
use crate::{Error, ProtocolError};

const UPLOAD_FIELDS: &str = "(id,totalSize,totalChunks,uploadedChunks,finished,uploadedSize)";

/// Server-side state of one upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// Upload ID.
    pub id: u64,
    /// Bytes the upload will hold.
    #[serde(default)]
    pub total_size: u64,
    /// Chunks the upload was initiated with.
    #[serde(default)]
    pub total_chunks: u64,
    /// Chunks already acknowledged.
    #[serde(default)]
    pub uploaded_chunks: u64,
    /// Bytes already acknowledged.
    #[serde(default)]
    pub uploaded_size: u64,
    /// Server marked the upload complete.
    #[serde(default)]
    pub finished: bool,
    /// Chunk submission path, relative to the server root.
    #[serde(default)]
    pub uri: String,
}

impl UploadRecord {
    /// Size of every chunk but possibly the last.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        if self.total_chunks == 0 {
            self.total_size
        } else {
            self.total_size / self.total_chunks
        }
    }

    /// Path chunks are posted to.
    fn submit_path(&self) -> String {
        if self.uri.is_empty() {
            format!("/rest/uploads/{}", self.id)
        } else {
            format!("/{}", self.uri.trim_start_matches('/'))
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.uploaded_chunks > self.total_chunks.max(1) {
            return Err(ProtocolError::InconsistentUploadRecord {
                detail: format!(
                    "{} of {} chunks uploaded",
                    self.uploaded_chunks, self.total_chunks
                ),
            });
        }
        if self.uploaded_size > self.total_size {
            return Err(ProtocolError::InconsistentUploadRecord {
                detail: format!(
                    "{} of {} bytes uploaded",
                    self.uploaded_size, self.total_size
                ),
            });
        }
        if self.total_chunks == 0 && self.total_size > 0 {
            return Err(ProtocolError::InconsistentUploadRecord {
                detail: format!("{} bytes in zero chunks", self.total_size),
            });
        }
        // Completed chunks are full-sized; only the last one carries the remainder.
        let expected = if self.uploaded_chunks >= self.total_chunks {
            self.total_size
        } else {
            self.uploaded_chunks
                .saturating_mul(self.chunk_size())
                .min(self.total_size)
        };
        if self.uploaded_size != expected {
            return Err(ProtocolError::InconsistentUploadRecord {
                detail: format!(
                    "{} bytes in {} of {} chunks, expected {expected}",
                    self.uploaded_size, self.uploaded_chunks, self.total_chunks
                ),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct UploadList {
    #[serde(default)]
    data: Vec<UploadRecord>,
}

#[derive(Deserialize)]
struct Created {
    id: u64,
}

/// Closes the progress record however the upload ends.
struct CloseOnDrop(Option<Arc<TransferRecord>>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(record) = &self.0 {
            record.close();
        }
    }
}

/// One chunk's worth of source bytes, streamed through a relay buffer.
struct ChunkReader<S> {
    source: Arc<Mutex<S>>,
    start: u64,
    remaining: u64,
    positioned: bool,
    read_timeout: Duration,
    progress: Option<Arc<TransferRecord>>,
    progress_base: u64,
    sent: u64,
}

impl<S> ChunkReader<S>
where
    S: AsyncRead + AsyncSeek + Unpin + Send + 'static,
{
    async fn next_block(mut self) -> io::Result<Option<(Vec<u8>, Self)>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let mut source = Arc::clone(&self.source).lock_owned().await;
        if !self.positioned {
            source.seek(SeekFrom::Start(self.start)).await?;
            self.positioned = true;
        }

        let want = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(RELAY_BUFFER_SIZE);
        let mut block = vec![0_u8; want];
        let read = tokio::time::timeout(self.read_timeout, source.read(&mut block))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upload source stalled"))??;
        drop(source);

        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended {} bytes short of the chunk", self.remaining),
            ));
        }
        block.truncate(read);
        self.remaining -= read as u64;
        self.sent += read as u64;
        if let Some(progress) = &self.progress {
            progress.advance_to(self.progress_base + self.sent);
        }
        Ok(Some((block, self)))
    }
}

/// Describes one chunk submission.
#[derive(Clone)]
struct ChunkSpec {
    filename: String,
    index: u64,
    declared: u64,
    start: u64,
    progress_base: u64,
}

fn chunk_form<S>(
    spec: &ChunkSpec,
    source: &Arc<Mutex<S>>,
    read_timeout: Duration,
    progress: Option<&Arc<TransferRecord>>,
) -> Form
where
    S: AsyncRead + AsyncSeek + Unpin + Send + 'static,
{
    let reader = ChunkReader {
        source: Arc::clone(source),
        start: spec.start,
        remaining: spec.declared,
        positioned: false,
        read_timeout,
        progress: progress.cloned(),
        progress_base: spec.progress_base,
        sent: 0,
    };
    let body = reqwest::Body::wrap_stream(stream::try_unfold(reader, ChunkReader::next_block));
    let content = Part::stream_with_length(body, spec.declared).file_name(spec.filename.clone());

    Form::new()
        .text("compressionMode", "NORMAL")
        .text("index", spec.index.to_string())
        .text("compressionSize", spec.declared.to_string())
        .text("originalSize", spec.declared.to_string())
        .part("content", content)
}

fn initiate_body(filename: &str, size: u64, max_chunk_size: u64) -> Value {
    json!({
        "filename": filename,
        "totalSize": size,
        "totalChunks": chunk_count(size, max_chunk_size),
    })
}

impl Session {
    /// Initiates an upload of a new file into a folder.
    ///
    /// # Errors
    ///
    /// Returns the classified call error.
    #[instrument(skip(self), fields(user = %self.username()))]
    pub async fn new_upload(&self, folder_id: u64, filename: &str, size: u64) -> Result<u64, Error> {
        let request = ApiRequest::new(
            Method::POST,
            format!("/rest/folders/{folder_id}/actions/initiateUpload"),
            vec![
                Param::Json(initiate_body(filename, size, self.config().max_chunk_size)),
                Param::Query(Fields::new().set("returnEntity", true)),
            ],
        )?
        .api_version(FOLDER_UPLOAD_API_VERSION);
        let created: Created = self.call(request).await?;
        debug!(upload_id = created.id, "upload initiated");
        Ok(created.id)
    }

    /// Initiates an upload of a new version of an existing file.
    ///
    /// # Errors
    ///
    /// Returns the classified call error.
    #[instrument(skip(self), fields(user = %self.username()))]
    pub async fn new_version(&self, file_id: u64, filename: &str, size: u64) -> Result<u64, Error> {
        let request = ApiRequest::new(
            Method::POST,
            format!("/rest/files/{file_id}/actions/initiateUpload"),
            vec![
                Param::Json(initiate_body(filename, size, self.config().max_chunk_size)),
                Param::Query(Fields::new().set("returnEntity", true)),
            ],
        )?;
        let created: Created = self.call(request).await?;
        debug!(upload_id = created.id, "version upload initiated");
        Ok(created.id)
    }

    /// Fetches the server's record of an upload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UploadIdNotFound`] if the server does not
    /// list the upload, or the classified call error.
    pub async fn upload_record(&self, upload_id: u64) -> Result<UploadRecord, Error> {
        let request = ApiRequest::get("/rest/uploads").with_query(
            &Fields::new()
                .set("locate_id", upload_id)
                .set("limit", 1_u32)
                .set("with", UPLOAD_FIELDS),
        );
        let list: UploadList = self.call(request).await?;
        list.data
            .into_iter()
            .next()
            .filter(|record| record.id == upload_id)
            .ok_or_else(|| ProtocolError::UploadIdNotFound.into())
    }

    /// Streams `source` into an initiated upload and returns the resulting file ID.
    ///
    /// Resumes from the server's record: the source is sought to the first
    /// unacknowledged chunk. Each chunk is relayed through a small buffer and
    /// rebuilt from the source if its submission is retried. An upload the
    /// server already holds in full is not resubmitted; its ID is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UploadIdNotFound`],
    /// [`ProtocolError::InconsistentUploadRecord`] or
    /// [`ProtocolError::EmptyUploadResponse`] for contract violations, or the
    /// classified error of the failing chunk.
    #[instrument(skip(self, source, monitor), fields(user = %self.username()))]
    pub async fn upload<S>(
        &self,
        filename: &str,
        upload_id: u64,
        source: S,
        monitor: Option<&TransferMonitor>,
    ) -> Result<u64, Error>
    where
        S: AsyncRead + AsyncSeek + Unpin + Send + 'static,
    {
        let record = self.upload_record(upload_id).await?;
        record.validate()?;

        let total = record.total_size;
        let chunk_size = record.chunk_size();
        let mut index = record.uploaded_chunks;
        let mut transferred = record.uploaded_size;

        let progress = monitor.map(|m| m.register(filename, total));
        let _closer = CloseOnDrop(progress.clone());
        if let Some(progress) = &progress {
            progress.set_offset(transferred);
        }

        if total > 0 && transferred >= total {
            info!(upload_id, "upload already complete on server");
            return Ok(record.id);
        }
        if index > 0 {
            debug!(upload_id, chunk = index + 1, "resuming upload");
        }

        let source = Arc::new(Mutex::new(source));
        let read_timeout = self.config().request_timeout;
        let submit_path = record.submit_path();
        let last_index = record.total_chunks.saturating_sub(1);
        let mut result_id = 0;

        loop {
            let is_last = index >= last_index;
            let declared = if is_last {
                total - transferred
            } else {
                chunk_size
            };
            let spec = ChunkSpec {
                filename: filename.to_string(),
                index: index + 1,
                declared,
                start: chunk_size * index,
                progress_base: transferred,
            };

            let factory: MultipartFactory = {
                let source = Arc::clone(&source);
                let progress = progress.clone();
                Arc::new(move || chunk_form(&spec, &source, read_timeout, progress.as_ref()))
            };
            let mut request = ApiRequest::multipart(Method::POST, submit_path.clone(), factory)
                .api_version(TRANSFER_API_VERSION);
            if is_last {
                request = request
                    .with_query(&Fields::new().set("returnEntity", true).set("mode", "full"));
            }

            debug!(chunk = index + 1, of = record.total_chunks, bytes = declared, "sending chunk");
            let response: Option<Value> = self.call(request).await?;
            result_id = response
                .as_ref()
                .and_then(|body| body.get("id"))
                .and_then(Value::as_u64)
                .unwrap_or(0);

            index += 1;
            transferred += declared;
            if transferred >= total {
                break;
            }
        }

        if result_id == 0 {
            return Err(ProtocolError::EmptyUploadResponse.into());
        }
        info!(upload_id, file_id = result_id, "upload finished");
        Ok(result_id)
    }

    /// Uploads a local file into a folder: initiates the upload and streams it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened, or any error from
    /// [`Session::new_upload`] and [`Session::upload`].
    pub async fn upload_file(
        &self,
        folder_id: u64,
        path: &Path,
        monitor: Option<&TransferMonitor>,
    ) -> Result<u64, Error> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let size = file.metadata().await.map_err(|e| Error::io(path, e))?.len();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::invalid_request(format!("{} has no file name", path.display())))?;

        let upload_id = self.new_upload(folder_id, &filename, size).await?;
        self.upload(&filename, upload_id, file, monitor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total_size: u64, total_chunks: u64, uploaded_chunks: u64, uploaded_size: u64) -> UploadRecord {
        UploadRecord {
            id: 9,
            total_size,
            total_chunks,
            uploaded_chunks,
            uploaded_size,
            ..UploadRecord::default()
        }
    }

    #[test]
    fn test_chunk_size_from_record() {
        assert_eq!(record(100, 4, 0, 0).chunk_size(), 25);
        assert_eq!(record(0, 1, 0, 0).chunk_size(), 0);
    }

    #[test]
    fn test_validate_rejects_excess_progress() {
        assert!(record(100, 4, 5, 0).validate().is_err());
        assert!(record(100, 4, 1, 101).validate().is_err());
        assert!(record(100, 0, 0, 0).validate().is_err());
        assert!(record(100, 4, 4, 100).validate().is_ok());
        assert!(record(0, 1, 0, 0).validate().is_ok());
    }

    #[test]
    fn test_validate_reconciles_size_with_chunks() {
        assert!(record(40, 4, 3, 30).validate().is_ok());
        assert!(record(40, 4, 3, 35).validate().is_err());
        assert!(record(40, 4, 3, 20).validate().is_err());
        assert!(record(40, 4, 0, 5).validate().is_err());
        // Every chunk done but bytes missing.
        assert!(record(40, 4, 4, 30).validate().is_err());
        // Remainder rides on the last chunk.
        assert!(record(41, 4, 3, 30).validate().is_ok());
        assert!(record(41, 4, 4, 41).validate().is_ok());
        assert!(record(41, 4, 4, 40).validate().is_err());
    }

    #[test]
    fn test_submit_path() {
        let mut upload = record(1, 1, 0, 0);
        assert_eq!(upload.submit_path(), "/rest/uploads/9");
        upload.uri = "rest/uploads/9?x=1".to_string();
        assert_eq!(upload.submit_path(), "/rest/uploads/9?x=1");
    }

    #[test]
    fn test_initiate_body() {
        let body = initiate_body("a.bin", 0, 0);
        assert_eq!(body["totalChunks"], 1);
        assert_eq!(body["filename"], "a.bin");
    }
}
