//! Spool file worker
//!
//! Takes file paths from the collector's job queue, runs every line through
//! the [`PerfdataPipeline`] and removes the file afterwards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, instrument, warn};

use super::{InFlight, stop_requested};
use crate::messages::WorkerCommand;
use crate::pipeline::PerfdataPipeline;

pub struct SpoolWorker {
    id: usize,
    jobs: flume::Receiver<PathBuf>,
    pipeline: PerfdataPipeline,
    in_flight: InFlight,
    stop: watch::Receiver<bool>,
    command_rx: mpsc::Receiver<WorkerCommand>,
}

impl SpoolWorker {
    pub fn new(
        id: usize,
        jobs: flume::Receiver<PathBuf>,
        pipeline: PerfdataPipeline,
        in_flight: InFlight,
        stop: watch::Receiver<bool>,
        command_rx: mpsc::Receiver<WorkerCommand>,
    ) -> Self {
        Self {
            id,
            jobs,
            pipeline,
            in_flight,
            stop,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(worker = self.id))]
    pub async fn run(mut self) {
        debug!("starting spool worker");

        loop {
            tokio::select! {
                biased;

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        WorkerCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }

                job = self.jobs.recv_async() => {
                    let Ok(path) = job else {
                        debug!("job queue closed");
                        break;
                    };
                    if let Err(e) = self.process_file(&path).await {
                        warn!("failed to process spool file: {e:#}");
                    }
                    self.in_flight.lock().remove(&path);
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("spool worker stopped");
    }

    /// Parse every line of a spool file and delete it.
    ///
    /// Returns the number of samples read from the file. When a stop is
    /// requested halfway the file is kept for the next run.
    #[instrument(skip(self), fields(worker = self.id))]
    pub async fn process_file(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let content = String::from_utf8_lossy(&content);

        let mut samples = 0;
        for line in content.lines() {
            tokio::select! {
                biased;

                _ = stop_requested(self.stop.clone()) => {
                    debug!("stop requested, keeping {}", path.display());
                    return Ok(samples);
                }

                delivered = self.pipeline.process_line(line) => samples += delivered,
            }
        }
        debug!("read {samples} samples from {}", path.display());

        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("failed to remove {}", path.display()))?;

        Ok(samples)
    }
}

#[derive(Clone)]
pub struct SpoolWorkerHandle {
    sender: mpsc::Sender<WorkerCommand>,
    pub id: usize,
}

impl SpoolWorkerHandle {
    pub fn spawn(
        id: usize,
        jobs: flume::Receiver<PathBuf>,
        pipeline: PerfdataPipeline,
        in_flight: InFlight,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let worker = SpoolWorker::new(id, jobs, pipeline, in_flight, stop, cmd_rx);
        tokio::spawn(worker.run());

        Self { sender: cmd_tx, id }
    }

    /// Stop the worker. The command is read between files, the collector's
    /// stop signal interrupts a file in progress.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("spool worker did not acknowledge shutdown")
    }
}
