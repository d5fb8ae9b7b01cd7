//! Nagios spool file ingestion
//!
//! The [`collector`] scans the spool folder and hands files that are old
//! enough to a pool of [`worker`]s. A worker parses every line of a file,
//! fans the samples out and removes the file.

pub mod collector;
pub mod worker;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::watch;

pub use collector::{SpoolCollectorHandle, SpoolSettings};
pub use worker::{SpoolWorker, SpoolWorkerHandle};

/// Files younger than this may still be written to
pub const MIN_FILE_AGE: Duration = Duration::from_secs(3);

pub const SCAN_INTERVAL: Duration = Duration::from_millis(1500);

/// Capacity of the queue between collector and workers
pub const JOB_QUEUE_CAPACITY: usize = 100;

/// How long the collector waits to hand a file to the workers
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Paths handed to the workers that were not processed yet
pub type InFlight = Arc<Mutex<HashSet<PathBuf>>>;

/// Resolves once `true` was sent on the stop channel.
///
/// Never resolves if the sending side is gone.
pub async fn stop_requested(mut stop: watch::Receiver<bool>) {
    let closed = stop.wait_for(|stopped| *stopped).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// List files in `folder` last modified at least `age` ago.
///
/// Returns the old files sorted by name and the number of directory entries.
pub async fn files_older_than(folder: &Path, age: Duration) -> io::Result<(Vec<PathBuf>, usize)> {
    let mut entries = tokio::fs::read_dir(folder).await?;
    let now = SystemTime::now();
    let mut old_files = Vec::new();
    let mut total = 0;

    while let Some(entry) = entries.next_entry().await? {
        total += 1;
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let old_enough = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|elapsed| elapsed >= age);
        if old_enough {
            old_files.push(entry.path());
        }
    }

    old_files.sort();
    Ok((old_files, total))
}
