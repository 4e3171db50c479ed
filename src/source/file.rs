//! File-based feed.
//!
//! Polls a JSON [`StoreSnapshot`] file and publishes whatever changed since
//! the previous read into a [`ChannelFeed`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ChannelFeed, StoreSnapshot};

/// Publishes the contents of a JSON store file.
///
/// The feed tracks the file's modification time and only re-reads it when
/// the file has been touched.
#[derive(Debug)]
pub struct FileFeed {
    path: PathBuf,
    description: String,
    feed: ChannelFeed,
    last_error: Option<String>,
    last_modified: Option<SystemTime>,
    current: StoreSnapshot,
}

impl FileFeed {
    /// Create a file feed publishing into `feed`.
    pub fn new<P: AsRef<Path>>(path: P, feed: ChannelFeed) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("file: {}", path.display());
        Self {
            path,
            description,
            feed,
            last_error: None,
            last_modified: None,
            current: StoreSnapshot::default(),
        }
    }

    /// Returns the path being monitored.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The feed this file publishes into.
    pub fn feed(&self) -> &ChannelFeed {
        &self.feed
    }

    /// Last read or parse error, cleared by the next good read.
    pub fn error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn modified_time(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).ok()?.modified().ok()
    }

    fn read_file(&mut self) -> Option<StoreSnapshot> {
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(snapshot) => {
                    self.last_error = None;
                    Some(snapshot)
                }
                Err(e) => {
                    self.last_error = Some(format!("Parse error: {}", e));
                    None
                }
            },
            Err(e) => {
                self.last_error = Some(format!("Read error: {}", e));
                None
            }
        }
    }

    /// Re-read the file if it changed and publish the differences.
    ///
    /// Returns the number of updates published.
    pub fn poll(&mut self) -> usize {
        let current_modified = self.modified_time();

        let file_changed = match (&self.last_modified, &current_modified) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(last), Some(current)) => current != last,
        };
        if !file_changed {
            return 0;
        }

        let Some(snapshot) = self.read_file() else {
            return 0;
        };
        self.last_modified = current_modified;

        let published = snapshot.publish_changes(&self.current, &self.feed);
        self.current = snapshot;
        if published > 0 {
            debug!(path = %self.path.display(), published, "Store file changed");
        }
        published
    }

    /// Poll on a fixed interval in a background task.
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut reported: Option<String> = None;
            loop {
                ticker.tick().await;
                self.poll();
                if self.last_error != reported {
                    if let Some(e) = &self.last_error {
                        warn!(path = %self.path.display(), error = %e, "Store file unreadable");
                    }
                    reported = self.last_error.clone();
                }
            }
        })
    }
}
