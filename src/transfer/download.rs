//! Lazy, range-aware downloads.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue, RANGE};
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};
use url::Url;

use super::timeout::ReadTimeout;
use super::{MonitoredReader, TransferMonitor};
use crate::api::{ApiRequest, Fields};
use crate::auth::Session;
use crate::constants::TRANSFER_API_VERSION;
use crate::{Error, ProtocolError};

type BodyReader = Pin<Box<dyn AsyncRead + Send>>;
type Connecting = Pin<Box<dyn Future<Output = io::Result<BodyReader>> + Send>>;

enum State {
    /// No request sent yet; seeks adjust the starting offset.
    Idle,
    Connecting(Connecting),
    Reading(ReadTimeout<BodyReader>),
    Finished,
}

/// Streams one remote resource, sending the GET on the first read.
///
/// Seeking before the first read sets the `Range: bytes=<n>-` start; the
/// server's `Content-Range` must then begin at the same byte. Seeking after
/// reading has begun fails. Errors from the stream carry a [`crate::Error`]
/// that can be recovered with [`std::io::Error::get_ref`].
pub struct RemoteReader {
    client: Client,
    url: Url,
    headers: HeaderMap,
    read_timeout: Duration,
    offset: u64,
    pending_seek: Option<u64>,
    state: State,
}

impl RemoteReader {
    pub(crate) fn new(client: Client, url: Url, headers: HeaderMap, read_timeout: Duration) -> Self {
        Self {
            client,
            url,
            headers,
            read_timeout,
            offset: 0,
            pending_seek: None,
            state: State::Idle,
        }
    }

    /// The URL this reader fetches.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Byte offset the download starts from.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn connect(&self) -> Connecting {
        let mut request = self.client.get(self.url.clone()).headers(self.headers.clone());
        if self.offset > 0 {
            request = request.header(RANGE, format_range(self.offset));
        }
        let offset = self.offset;
        let url = self.url.clone();

        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|e| io::Error::other(Error::transport(url.as_str(), e)))?;
            if !response.status().is_success() {
                return Err(io::Error::other(Error::Http {
                    server: url.host_str().unwrap_or_default().to_string(),
                    status: response.status().to_string(),
                }));
            }
            if offset > 0 {
                check_content_range(&response, offset).map_err(io::Error::other)?;
            }
            debug!(%url, offset, "download started");

            let stream = response.bytes_stream().map_err(io::Error::other);
            let reader: BodyReader = Box::pin(StreamReader::new(stream));
            Ok(reader)
        })
    }
}

fn format_range(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// Start offset of a `bytes <start>-<end>/<total>` header value.
fn range_start(value: &str) -> Option<u64> {
    let bounds = value.trim().strip_prefix("bytes")?.trim();
    let (start, _) = bounds.split_once('-')?;
    start.trim().parse().ok()
}

/// A resumed response must report a `Content-Range` starting at `offset`.
///
/// A missing or unparseable header means the server ignored the `Range`
/// request and is sending the file from the beginning.
fn check_content_range(response: &Response, offset: u64) -> Result<(), Error> {
    let raw = response
        .headers()
        .get(CONTENT_RANGE)
        .map(|v| v.to_str().unwrap_or_default());
    match raw.and_then(range_start) {
        Some(start) if start == offset => Ok(()),
        Some(start) => Err(ProtocolError::RangeMismatch {
            requested: offset,
            got: start.to_string(),
        }
        .into()),
        None => Err(ProtocolError::RangeMismatch {
            requested: offset,
            got: raw.map_or_else(|| "no Content-Range".to_string(), str::to_string),
        }
        .into()),
    }
}

impl std::fmt::Debug for RemoteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReader")
            .field("url", &self.url.as_str())
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for RemoteReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                State::Idle => this.state = State::Connecting(this.connect()),
                State::Connecting(future) => match future.as_mut().poll(cx) {
                    Poll::Ready(Ok(body)) => {
                        this.state = State::Reading(ReadTimeout::new(body, this.read_timeout));
                    }
                    Poll::Ready(Err(error)) => {
                        this.state = State::Finished;
                        return Poll::Ready(Err(error));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                State::Reading(body) => {
                    let before = buf.filled().len();
                    let result = Pin::new(body).poll_read(cx, buf);
                    match &result {
                        // End of body or failure: drop the connection.
                        Poll::Ready(Ok(())) if buf.filled().len() == before => {
                            this.state = State::Finished;
                        }
                        Poll::Ready(Err(_)) => this.state = State::Finished,
                        _ => {}
                    }
                    return result;
                }
                State::Finished => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncSeek for RemoteReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        if !matches!(this.state, State::Idle) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot seek once the download has started",
            ));
        }
        let target = match position {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => this.offset.checked_add_signed(delta),
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cannot seek from the end of a remote stream",
                ));
            }
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "can't read before the start of the file",
            )
        })?;
        this.pending_seek = Some(target);
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        if let Some(target) = this.pending_seek.take() {
            this.offset = target;
        }
        Poll::Ready(Ok(this.offset))
    }
}

#[derive(Deserialize)]
struct FileInfo {
    name: String,
    #[serde(default)]
    size: u64,
}

impl Session {
    /// Opens a monitored stream over a stored file's content.
    ///
    /// Fetches the file's name and size first; the content request itself is
    /// deferred until the first read, so the caller may seek to resume.
    ///
    /// # Errors
    ///
    /// Returns the metadata call's error, or [`Error::Configuration`] if the
    /// HTTP client cannot be built.
    #[instrument(skip(self, monitor), fields(user = %self.username()))]
    pub async fn download(
        &self,
        file_id: u64,
        monitor: &TransferMonitor,
    ) -> Result<MonitoredReader<RemoteReader>, Error> {
        let info: FileInfo = self
            .call(
                ApiRequest::get(format!("/rest/files/{file_id}"))
                    .with_query(&Fields::new().set("with", "(name,size)")),
            )
            .await?;

        let url = self.url(&format!("/rest/files/{file_id}/content"), &Fields::new())?;
        let token = self.access_token().await?;
        let mut headers = self.api_headers(TRANSFER_API_VERSION)?;
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::configuration("access token is not a valid header value"))?,
        );

        let reader = RemoteReader::new(
            self.http_client(false)?,
            url,
            headers,
            self.config().request_timeout,
        );
        Ok(monitor.wrap(&info.name, info.size, reader))
    }

    /// Opens a lazy stream over an arbitrary URL, sending only agent headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an unparseable URL or
    /// [`Error::Configuration`] if the HTTP client cannot be built.
    pub fn external_download(&self, url: &str) -> Result<RemoteReader, Error> {
        let url =
            Url::parse(url).map_err(|e| Error::invalid_request(format!("invalid URL {url}: {e}")))?;
        Ok(RemoteReader::new(
            self.http_client(false)?,
            url,
            self.agent_headers()?,
            self.config().request_timeout,
        ))
    }
}
