//! Command types for the ingestion actors
//!
//! Every actor owns an mpsc receiver for its commands. Requests that expect
//! an answer carry a oneshot sender. `Shutdown` is acknowledged once the
//! actor loop has finished, which makes stopping synchronous for the caller.

use tokio::sync::oneshot;

/// Commands for the downtime cache builder
#[derive(Debug)]
pub enum CacheCommand {
    /// Rebuild the downtime index immediately
    RefreshNow {
        /// Number of hosts in the new index
        respond_to: oneshot::Sender<usize>,
    },

    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands for the livestatus event collector
#[derive(Debug)]
pub enum LivestatusCommand {
    /// Query notifications, comments and downtimes immediately
    QueryNow {
        /// Number of events handed to the target queues
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Outcome of one spool directory scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files found in the spool folder, regardless of age
    pub files_total: usize,

    /// Files handed to the worker pool
    pub dispatched: usize,

    /// The scan was skipped because a target is paused
    pub paused: bool,
}

/// Commands for the spool file collector
#[derive(Debug)]
pub enum SpoolCommand {
    /// Scan the spool folder immediately
    ScanNow {
        respond_to: oneshot::Sender<anyhow::Result<ScanReport>>,
    },

    /// Stop the collector and every worker it owns
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands for spool and gearman workers
#[derive(Debug)]
pub enum WorkerCommand {
    Shutdown { respond_to: oneshot::Sender<()> },
}
