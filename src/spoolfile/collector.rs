//! Spool folder collector
//!
//! ```text
//! Timer tick → pause check → list folder → old files → job queue → workers
//!     ↑
//!     └─── Commands (ScanNow, Shutdown)
//! ```
//!
//! A file stays marked as in flight from dispatch until a worker is done with
//! it, so a slow worker never gets the same file twice.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::interval;
use tracing::{debug, error, instrument, trace, warn};

use super::worker::SpoolWorkerHandle;
use super::{
    DISPATCH_TIMEOUT, InFlight, JOB_QUEUE_CAPACITY, MIN_FILE_AGE, SCAN_INTERVAL,
    files_older_than, stop_requested,
};
use crate::Stoppable;
use crate::messages::{ScanReport, SpoolCommand};
use crate::pause::SharedPauseState;
use crate::pipeline::PerfdataPipeline;

#[derive(Debug, Clone)]
pub struct SpoolSettings {
    pub folder: PathBuf,
    pub worker_count: usize,
    pub min_file_age: Duration,
    pub scan_interval: Duration,
    pub dispatch_timeout: Duration,
    pub job_queue_capacity: usize,
}

impl SpoolSettings {
    pub fn new(folder: impl Into<PathBuf>, worker_count: usize) -> Self {
        Self {
            folder: folder.into(),
            worker_count,
            min_file_age: MIN_FILE_AGE,
            scan_interval: SCAN_INTERVAL,
            dispatch_timeout: DISPATCH_TIMEOUT,
            job_queue_capacity: JOB_QUEUE_CAPACITY,
        }
    }
}

pub struct SpoolCollectorActor {
    settings: SpoolSettings,
    jobs: flume::Sender<PathBuf>,
    workers: Vec<SpoolWorkerHandle>,
    in_flight: InFlight,
    pause: SharedPauseState,
    files_on_disk: Arc<AtomicUsize>,
    stop: watch::Receiver<bool>,
    command_rx: mpsc::Receiver<SpoolCommand>,
}

impl SpoolCollectorActor {
    #[instrument(skip(self), fields(folder = %self.settings.folder.display()))]
    pub async fn run(mut self) {
        debug!("starting spool collector");

        let mut ticker = interval(self.settings.scan_interval);

        let shutdown_ack = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        error!("failed to scan spool folder: {e:#}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SpoolCommand::ScanNow { respond_to } => {
                            debug!("received ScanNow command");
                            let _ = respond_to.send(self.scan().await);
                        }

                        SpoolCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            break Some(respond_to);
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break None;
                }
            }
        };

        for worker in &self.workers {
            if let Err(e) = worker.shutdown().await {
                warn!(worker = worker.id, "failed to stop spool worker: {e:#}");
            }
        }
        if let Some(respond_to) = shutdown_ack {
            let _ = respond_to.send(());
        }

        debug!("spool collector stopped");
    }

    async fn scan(&self) -> Result<ScanReport> {
        if *self.stop.borrow() {
            return Ok(ScanReport::default());
        }
        if self.pause.is_any_target_paused() {
            debug!("spool collector paused");
            return Ok(ScanReport {
                paused: true,
                ..ScanReport::default()
            });
        }

        let (files, files_total) =
            files_older_than(&self.settings.folder, self.settings.min_file_age)
                .await
                .with_context(|| {
                    format!("failed to read {}", self.settings.folder.display())
                })?;
        self.files_on_disk.store(files_total, Ordering::Relaxed);
        trace!(files_total, eligible = files.len(), "spool folder listed");

        let mut dispatched = 0;
        for path in files {
            if !self.in_flight.lock().insert(path.clone()) {
                trace!("{} is still being processed", path.display());
                continue;
            }

            debug!("dispatching {}", path.display());
            let send = self.jobs.send_async(path.clone());
            let result = tokio::select! {
                result = tokio::time::timeout(self.settings.dispatch_timeout, send) => result,
                _ = stop_requested(self.stop.clone()) => {
                    self.in_flight.lock().remove(&path);
                    debug!("stop requested, ending scan");
                    break;
                }
            };
            match result {
                Ok(Ok(())) => dispatched += 1,
                Ok(Err(_)) => {
                    self.in_flight.lock().remove(&path);
                    warn!("spool job queue closed");
                    break;
                }
                Err(_) => {
                    self.in_flight.lock().remove(&path);
                    warn!(
                        "could not hand {} to a worker within {:?}",
                        path.display(),
                        self.settings.dispatch_timeout
                    );
                }
            }
        }

        Ok(ScanReport {
            files_total,
            dispatched,
            paused: false,
        })
    }
}

#[derive(Clone)]
pub struct SpoolCollectorHandle {
    sender: mpsc::Sender<SpoolCommand>,
    stop: Arc<watch::Sender<bool>>,
    files_on_disk: Arc<AtomicUsize>,
}

impl SpoolCollectorHandle {
    /// Spawn the collector and its workers
    pub fn spawn(
        settings: SpoolSettings,
        pipeline: PerfdataPipeline,
        pause: SharedPauseState,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (jobs_tx, jobs_rx) = flume::bounded(settings.job_queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let in_flight = InFlight::default();
        let files_on_disk = Arc::new(AtomicUsize::new(0));

        let workers = (0..settings.worker_count)
            .map(|id| {
                SpoolWorkerHandle::spawn(
                    id,
                    jobs_rx.clone(),
                    pipeline.clone(),
                    in_flight.clone(),
                    stop_rx.clone(),
                )
            })
            .collect();

        let actor = SpoolCollectorActor {
            settings,
            jobs: jobs_tx,
            workers,
            in_flight,
            pause,
            files_on_disk: files_on_disk.clone(),
            stop: stop_rx,
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            stop: Arc::new(stop_tx),
            files_on_disk,
        }
    }

    /// Files seen in the spool folder by the last scan
    pub fn files_on_disk(&self) -> usize {
        self.files_on_disk.load(Ordering::Relaxed)
    }

    pub async fn scan_now(&self) -> Result<ScanReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SpoolCommand::ScanNow { respond_to: tx })
            .await
            .context("failed to send ScanNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Stop the collector, then every worker in order.
    ///
    /// A dispatch or delivery in progress is abandoned, the affected files
    /// stay in the spool folder.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop.send_replace(true);

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SpoolCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await
            .context("spool collector did not acknowledge shutdown")
    }
}

#[async_trait]
impl Stoppable for SpoolCollectorHandle {
    fn name(&self) -> &str {
        "spool file collector"
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown().await
    }
}
