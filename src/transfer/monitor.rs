//! Concurrent transfer progress reporting.
//!
//! A [`TransferMonitor`] owns a registry of [`TransferRecord`]s. Registering
//! the first record starts a background task that redraws every open record
//! once per tick through the [`ProgressSink`], drops closed records, and
//! exits once the registry is empty. Streams report progress by updating
//! their record's atomic counters, usually through a [`MonitoredReader`].

use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tracing::{debug, warn};

use super::ProgressSink;
use crate::bitflag::BitFlag;
use crate::constants::MONITOR_TICK;

const ACTIVE: u32 = 1;
const CLOSED: u32 = 1 << 1;
const COMPLETE: u32 = 1 << 2;

const BAR_CELLS: u64 = 25;
const SHORT_NAME_CHARS: usize = 8;

/// Formats a byte count with decimal units, e.g. `1.5MB`.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    scaled(bytes as f64, &["Bytes", "KB", "MB", "GB"])
}

fn scaled(mut value: f64, units: &[&str]) -> String {
    let mut unit = 0;
    while value >= 1000.0 && unit < units.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1}{}", units[unit])
}

fn shorten(name: &str) -> String {
    let mut chars = name.chars();
    let head: String = chars.by_ref().take(SHORT_NAME_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Progress of one transfer.
pub struct TransferRecord {
    name: String,
    short_name: String,
    total: u64,
    transferred: AtomicU64,
    offset: AtomicU64,
    started: Instant,
    rate: Mutex<String>,
    state: BitFlag,
    sink: Arc<dyn ProgressSink>,
}

impl TransferRecord {
    fn new(name: &str, total: u64, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            name: name.to_string(),
            short_name: shorten(name),
            total,
            transferred: AtomicU64::new(0),
            offset: AtomicU64::new(0),
            started: Instant::now(),
            rate: Mutex::new("0.0bps".to_string()),
            state: BitFlag::new(ACTIVE),
            sink,
        }
    }

    /// Full display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected size in bytes.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes transferred so far, including pre-existing progress.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Progress that existed before this run started.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Adds `bytes` to the transferred count.
    pub fn record(&self, bytes: u64) {
        let now = self.transferred.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.mark_complete_at(now);
    }

    /// Raises the transferred count to `position`; never lowers it.
    pub fn advance_to(&self, position: u64) {
        let now = self.transferred.fetch_max(position, Ordering::AcqRel).max(position);
        self.mark_complete_at(now);
    }

    /// Declares pre-existing progress: excluded from the rate, counted in the total.
    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Release);
        self.advance_to(offset);
    }

    fn mark_complete_at(&self, transferred: u64) {
        if transferred >= self.total {
            self.state.set(COMPLETE);
        }
    }

    /// Returns true once the transfer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.has(CLOSED)
    }

    /// Returns true once every byte has been transferred.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.has(COMPLETE)
    }

    /// Closes the record and logs its final line. Later calls do nothing.
    pub fn close(&self) {
        if self.state.set(CLOSED) {
            self.state.unset(ACTIVE);
            self.sink.log(&self.render(&self.name));
        }
    }

    /// Average rate since start, e.g. `12.5mbps`. Frozen once complete.
    pub fn rate(&self) -> String {
        let mut rate = self.rate.lock().unwrap_or_else(PoisonError::into_inner);
        let transferred = self.transferred();
        if transferred == 0 || (self.is_complete() && rate.as_str() != "0.0bps") {
            return rate.clone();
        }

        let elapsed = self.started.elapsed().as_secs_f64().max(0.1);
        let bits = transferred.saturating_sub(self.offset()) as f64 * 8.0 / elapsed;
        *rate = scaled(bits, &["bps", "kbps", "mbps", "gbps"]);
        rate.clone()
    }

    /// Ephemeral status line with the shortened name.
    #[must_use]
    pub fn status_line(&self) -> String {
        self.render(&self.short_name)
    }

    fn render(&self, name: &str) -> String {
        let transferred = self.transferred();
        let percent = if self.total == 0 {
            100
        } else {
            (u128::from(transferred) * 100 / u128::from(self.total)).min(100) as u64
        };
        let filled = percent * BAR_CELLS / 100;
        let bar: String = (0..BAR_CELLS)
            .map(|cell| if cell < filled { '░' } else { '.' })
            .collect();
        format!(
            "[{name}] {} [{bar}] {percent}% ({}/{})",
            self.rate(),
            human_size(transferred),
            human_size(self.total)
        )
    }
}

impl std::fmt::Debug for TransferRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRecord")
            .field("name", &self.name)
            .field("total", &self.total)
            .field("transferred", &self.transferred())
            .field("state", &self.state.bits())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Registry {
    records: Vec<Arc<TransferRecord>>,
    looping: bool,
}

struct Shared {
    registry: RwLock<Registry>,
    sink: Arc<dyn ProgressSink>,
    tick: Duration,
}

/// Registry of in-flight transfers with a background display loop.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct TransferMonitor {
    shared: Arc<Shared>,
}

impl TransferMonitor {
    /// Creates a monitor that redraws every 200 ms.
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self::with_tick(sink, MONITOR_TICK)
    }

    /// Creates a monitor with a custom redraw interval.
    #[must_use]
    pub fn with_tick(sink: Arc<dyn ProgressSink>, tick: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                sink,
                tick,
            }),
        }
    }

    /// Registers a transfer and starts the display loop if it is idle.
    ///
    /// Without a tokio runtime the record is tracked but never redrawn.
    pub fn register(&self, name: &str, total: u64) -> Arc<TransferRecord> {
        let record = Arc::new(TransferRecord::new(
            name,
            total,
            Arc::clone(&self.shared.sink),
        ));
        let mut registry = self
            .shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registry.records.push(Arc::clone(&record));

        if !registry.looping {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    registry.looping = true;
                    handle.spawn(display_loop(Arc::clone(&self.shared)));
                }
                Err(_) => warn!("no tokio runtime, transfer progress will not be displayed"),
            }
        }
        record
    }

    /// Wraps `reader` so reads are counted against a new record.
    pub fn wrap<R>(&self, name: &str, total: u64, reader: R) -> MonitoredReader<R> {
        MonitoredReader::new(reader, self.register(name, total))
    }

    /// Number of records not yet pruned from the registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_registry().records.len()
    }

    /// Returns true when no transfers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true while the display loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.read_registry().looping
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.shared
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TransferMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferMonitor")
            .field("tick", &self.shared.tick)
            .field("records", &self.len())
            .finish()
    }
}

async fn display_loop(shared: Arc<Shared>) {
    debug!("transfer display started");
    let mut interval = tokio::time::interval(shared.tick);
    loop {
        interval.tick().await;
        let lines: Vec<String> = {
            let mut registry = shared
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            registry.records.retain(|record| !record.is_closed());
            if registry.records.is_empty() {
                registry.looping = false;
                break;
            }
            registry
                .records
                .iter()
                .map(|record| record.status_line())
                .collect()
        };
        for line in &lines {
            shared.sink.flash(line);
        }
    }
    debug!("transfer display stopped");
}

/// Reader that counts bytes against a [`TransferRecord`].
///
/// Closes the record at end of stream, on the first read error, or when
/// dropped.
pub struct MonitoredReader<R> {
    inner: R,
    record: Arc<TransferRecord>,
    read_started: bool,
}

impl<R> MonitoredReader<R> {
    /// Wraps `inner`, reporting to `record`.
    pub fn new(inner: R, record: Arc<TransferRecord>) -> Self {
        Self {
            inner,
            record,
            read_started: false,
        }
    }

    /// The record this reader reports to.
    #[must_use]
    pub fn record(&self) -> &Arc<TransferRecord> {
        &self.record
    }
}

impl<R> Drop for MonitoredReader<R> {
    fn drop(&mut self) {
        self.record.close();
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for MonitoredReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = buf.filled().len() - before;
                this.read_started = true;
                if read == 0 {
                    this.record.close();
                } else {
                    this.record.record(read as u64);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(error)) => {
                this.record.close();
                Poll::Ready(Err(error))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R: AsyncSeek + Unpin> AsyncSeek for MonitoredReader<R> {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        let this = &mut *self;
        let result = Pin::new(&mut this.inner).poll_complete(cx);
        if let Poll::Ready(Ok(position)) = result {
            if this.read_started {
                this.record.advance_to(position);
            } else {
                this.record.set_offset(position);
            }
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    use super::*;

    #[derive(Default)]
    struct CaptureSink {
        flashes: StdMutex<Vec<String>>,
        logs: StdMutex<Vec<String>>,
    }

    impl ProgressSink for CaptureSink {
        fn flash(&self, line: &str) {
            self.flashes.lock().unwrap().push(line.to_string());
        }
        fn log(&self, line: &str) {
            self.logs.lock().unwrap().push(line.to_string());
        }
    }

    fn record(name: &str, total: u64) -> (TransferRecord, Arc<CaptureSink>) {
        let sink = Arc::new(CaptureSink::default());
        (TransferRecord::new(name, total, sink.clone()), sink)
    }

    // ==================== Formatting Tests ====================

    #[test]
    fn test_human_size_units() {
        assert_eq!(human_size(0), "0.0Bytes");
        assert_eq!(human_size(999), "999.0Bytes");
        assert_eq!(human_size(1500), "1.5KB");
        assert_eq!(human_size(2_000_000), "2.0MB");
        assert_eq!(human_size(5_000_000_000_000), "5000.0GB");
    }

    #[test]
    fn test_short_name() {
        assert_eq!(shorten("report.pdf"), "report.p...");
        assert_eq!(shorten("a.txt"), "a.txt");
        assert_eq!(shorten("12345678"), "12345678");
    }

    #[test]
    fn test_status_line_layout() {
        let (record, _) = record("quarterly-report.pdf", 1000);
        record.record(500);
        let line = record.status_line();
        assert!(line.starts_with("[quarterl...] "), "{line}");
        assert!(line.contains(&format!("[{}{}] 50%", "░".repeat(12), ".".repeat(13))), "{line}");
        assert!(line.ends_with("(500.0Bytes/1.0KB)"), "{line}");
    }

    #[test]
    fn test_zero_total_is_full() {
        let (record, _) = record("empty", 0);
        assert!(record.status_line().contains("100%"));
    }

    #[test]
    fn test_rate_excludes_offset() {
        let (record, _) = record("resumed", 1_000_000);
        record.set_offset(900_000);
        assert_eq!(record.transferred(), 900_000);
        // Nothing moved in this run beyond the offset.
        assert_eq!(record.rate(), "0.0bps");
    }

    // ==================== Counter Tests ====================

    #[test]
    fn test_advance_to_never_decreases() {
        let (record, _) = record("f", 100);
        record.advance_to(60);
        record.advance_to(40);
        assert_eq!(record.transferred(), 60);
        assert!(!record.is_complete());
        record.advance_to(100);
        assert!(record.is_complete());
    }

    #[test]
    fn test_close_logs_once_with_full_name() {
        let (record, sink) = record("a-long-file-name.bin", 10);
        record.close();
        record.close();
        let logs = sink.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("[a-long-file-name.bin]"));
        assert!(record.is_closed());
    }

    // ==================== Reader Tests ====================

    #[tokio::test]
    async fn test_monitored_reader_counts_and_closes_at_eof() {
        let sink = Arc::new(CaptureSink::default());
        let monitor = TransferMonitor::with_tick(sink.clone(), Duration::from_millis(10));
        let data = vec![7_u8; 10_000];
        let mut reader = monitor.wrap("data.bin", 10_000, std::io::Cursor::new(data));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out.len(), 10_000);
        assert_eq!(reader.record().transferred(), 10_000);
        assert!(reader.record().is_complete());
        assert!(reader.record().is_closed());
        assert_eq!(sink.logs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_seek_before_read_sets_offset() {
        let sink = Arc::new(CaptureSink::default());
        let monitor = TransferMonitor::new(sink);
        let mut reader = monitor.wrap("data.bin", 100, std::io::Cursor::new(vec![0_u8; 100]));

        reader.seek(SeekFrom::Start(40)).await.unwrap();
        assert_eq!(reader.record().offset(), 40);
        assert_eq!(reader.record().transferred(), 40);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), 60);
        assert_eq!(reader.record().transferred(), 100);
    }

    // ==================== Display Loop Tests ====================

    #[tokio::test]
    async fn test_display_loop_exits_after_last_close() {
        let sink = Arc::new(CaptureSink::default());
        let tick = Duration::from_millis(20);
        let monitor = TransferMonitor::with_tick(sink.clone(), tick);

        let records: Vec<_> = (0..3)
            .map(|i| monitor.register(&format!("file-{i}"), 100))
            .collect();
        assert!(monitor.is_running());
        assert_eq!(monitor.len(), 3);

        tokio::time::sleep(tick * 3).await;
        assert!(!sink.flashes.lock().unwrap().is_empty());

        for record in &records {
            record.close();
        }
        tokio::time::sleep(tick * 3).await;

        assert!(monitor.is_empty());
        assert!(!monitor.is_running());
        assert_eq!(sink.logs.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_register_after_idle_restarts_loop() {
        let sink = Arc::new(CaptureSink::default());
        let tick = Duration::from_millis(10);
        let monitor = TransferMonitor::with_tick(sink, tick);

        monitor.register("first", 1).close();
        tokio::time::sleep(tick * 4).await;
        assert!(!monitor.is_running());

        let second = monitor.register("second", 1);
        assert!(monitor.is_running());
        second.close();
    }

    #[test]
    fn test_register_without_runtime_tracks_record() {
        let monitor = TransferMonitor::new(Arc::new(CaptureSink::default()));
        let record = monitor.register("offline", 10);
        assert_eq!(monitor.len(), 1);
        assert!(!monitor.is_running());
        record.close();
    }
}
