//! Stream-based ingest.
//!
//! Reads newline-delimited JSON [`Envelope`]s from an async byte stream and
//! publishes them into a [`ChannelFeed`]. Useful for TCP connections or
//! message bus bridges.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ChannelFeed, Envelope};

/// Background task feeding envelopes from a stream into a [`ChannelFeed`].
///
/// # Example
///
/// ```
/// use std::io::Cursor;
/// use transformer_watch::{ChannelFeed, StreamIngest};
///
/// # tokio_test::block_on(async {
/// let feed = ChannelFeed::new("example");
/// let data = b"{\"sourceId\":\"T1\",\"record\":{\"H2\":4}}\n";
/// let _ingest = StreamIngest::spawn(Cursor::new(data.to_vec()), feed.clone(), "example");
/// # });
/// ```
#[derive(Debug)]
pub struct StreamIngest {
    description: String,
    last_error: Arc<Mutex<Option<String>>>,
    applied: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl StreamIngest {
    /// Spawn a background task that reads from the given async reader.
    ///
    /// Each line is parsed as one [`Envelope`]. Lines that fail to parse are
    /// skipped and recorded as the last error.
    pub fn spawn<R>(reader: R, feed: ChannelFeed, description: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let last_error = Arc::new(Mutex::new(None));
        let applied = Arc::new(AtomicU64::new(0));
        let error_handle = last_error.clone();
        let applied_handle = applied.clone();
        let desc = description.to_string();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(source = %desc, "Stream reached EOF");
                        *error_handle.lock() = Some("Connection closed".to_string());
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Envelope>(trimmed) {
                            Ok(envelope) => {
                                *error_handle.lock() = None;
                                envelope.apply(&feed);
                                applied_handle.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                warn!(source = %desc, error = %e, "Skipping malformed envelope");
                                *error_handle.lock() = Some(format!("Parse error: {}", e));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(source = %desc, error = %e, "Stream read failed");
                        *error_handle.lock() = Some(format!("Read error: {}", e));
                        break;
                    }
                }
            }
        });

        Self {
            description: format!("stream: {}", description),
            last_error,
            applied,
            task,
        }
    }

    /// Ingest from a channel of raw JSON payloads, one envelope each.
    ///
    /// This is useful when another component (like a message bus consumer)
    /// already frames messages and has no `AsyncRead` to offer.
    pub fn from_bytes_channel(
        mut rx: mpsc::Receiver<Vec<u8>>,
        feed: ChannelFeed,
        description: &str,
    ) -> Self {
        let last_error = Arc::new(Mutex::new(None));
        let applied = Arc::new(AtomicU64::new(0));
        let error_handle = last_error.clone();
        let applied_handle = applied.clone();

        let task = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                match serde_json::from_slice::<Envelope>(&bytes) {
                    Ok(envelope) => {
                        *error_handle.lock() = None;
                        envelope.apply(&feed);
                        applied_handle.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        *error_handle.lock() = Some(format!("Parse error: {}", e));
                    }
                }
            }
        });

        Self {
            description: format!("stream: {}", description),
            last_error,
            applied,
            task,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the last error message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Number of envelopes published so far.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Whether the reader task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop reading.
    pub fn abort(&self) {
        self.task.abort();
    }
}
