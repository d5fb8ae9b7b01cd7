//! Downtime cache
//!
//! The cache builder asks livestatus for all downtimes and for the hosts and
//! services currently in downtime, merges the answers into a
//! [`DowntimeIndex`] and swaps it into the shared [`DowntimeCache`].
//!
//! ```text
//! Timer tick → 3 queries → merge → replace snapshot
//!     ↑
//!     └─── Commands (RefreshNow, Shutdown)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, instrument, trace, warn};

use super::LivestatusError;
use super::connector::Connector;
use crate::Stoppable;
use crate::messages::CacheCommand;

/// How often the index is rebuilt
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub const QUERY_DOWNTIME_IDS: &str = "GET downtimes\nColumns: id start_time entry_time\nOutputFormat: csv\n\n";

pub const QUERY_HOSTS_IN_DOWNTIME: &str = "GET hosts\nColumns: downtimes name\nFilter: scheduled_downtime_depth > 0\nOutputFormat: csv\n\n";

pub const QUERY_SERVICES_IN_DOWNTIME: &str = "GET services\nColumns: downtimes host_name display_name\nFilter: scheduled_downtime_depth > 0\nOutputFormat: csv\n\n";

/// host → service (empty for the host itself) → downtime start in epoch seconds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DowntimeIndex {
    entries: HashMap<String, HashMap<String, i64>>,
}

impl DowntimeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a downtime, keeping the earliest start per host/service
    pub fn add(&mut self, host: &str, service: &str, since: i64) {
        self.entries
            .entry(host.to_string())
            .or_default()
            .entry(service.to_string())
            .and_modify(|existing| *existing = (*existing).min(since))
            .or_insert(since);
    }

    pub fn since(&self, host: &str, service: &str) -> Option<i64> {
        self.entries.get(host)?.get(service).copied()
    }

    /// True if the host/service has a downtime that started at or before `time`.
    ///
    /// Fractional seconds in `time` are ignored.
    pub fn is_in_downtime(&self, host: &str, service: &str, time: &str) -> bool {
        let Some(since) = self.since(host, service) else {
            return false;
        };
        let seconds = time.trim().split('.').next().unwrap_or_default();
        match seconds.parse::<i64>() {
            Ok(time) => since <= time,
            Err(_) => {
                debug!("cannot compare downtime against time {time:?}");
                false
            }
        }
    }

    /// Number of hosts with at least one downtime
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Shared, atomically replaced downtime index
#[derive(Debug, Clone, Default)]
pub struct DowntimeCache {
    snapshot: Arc<RwLock<Arc<DowntimeIndex>>>,
}

impl DowntimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<DowntimeIndex> {
        self.snapshot.read().clone()
    }

    pub fn replace(&self, index: DowntimeIndex) {
        *self.snapshot.write() = Arc::new(index);
    }

    pub fn is_in_downtime(&self, host: &str, service: &str, time: &str) -> bool {
        self.snapshot.read().is_in_downtime(host, service, time)
    }
}

/// Store `max(start_time, entry_time)` for every id of a downtime row
fn record_downtime_row(downtimes: &mut HashMap<String, i64>, row: &[String]) {
    let [ids, start, entry, ..] = row else {
        debug!("skipping short downtime row {row:?}");
        return;
    };
    let start = start.trim().parse::<i64>().unwrap_or(0);
    let entry = entry.trim().parse::<i64>().unwrap_or(0);
    let latest = start.max(entry);

    for id in ids.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        downtimes.insert(id.to_string(), latest);
    }
}

/// Add a host (`ids;host`) or service (`ids;host;service`) row to the index
fn merge_host_service_row(
    index: &mut DowntimeIndex,
    downtimes: &HashMap<String, i64>,
    row: &[String],
) {
    let (ids, host, service) = match row {
        [ids, host] => (ids, host, ""),
        [ids, host, service] => (ids, host, service.as_str()),
        _ => {
            debug!("skipping host/service row of unexpected width {row:?}");
            return;
        }
    };

    for id in ids.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        match downtimes.get(id) {
            Some(since) => index.add(host, service, *since),
            None => trace!("downtime {id} of {host}/{service} not in downtime list"),
        }
    }
}

async fn run_query(connector: Connector, query: &'static str, rows: mpsc::Sender<Vec<String>>) {
    match connector.query(query, rows).await {
        Ok(()) => {}
        Err(LivestatusError::ReceiverClosed) => debug!("downtime query abandoned"),
        Err(e) => warn!("downtime query failed: {e}"),
    }
}

/// Query livestatus and merge the answers into a fresh index.
///
/// Each wait for the next row is bounded by `timeout`. When it elapses the
/// index built so far is returned.
pub async fn build_index(connector: &Connector, timeout: Duration) -> DowntimeIndex {
    let (downtime_tx, mut downtime_rx) = mpsc::channel(256);
    let (host_service_tx, mut host_service_rx) = mpsc::channel(256);

    tokio::spawn(run_query(connector.clone(), QUERY_DOWNTIME_IDS, downtime_tx));
    tokio::spawn(run_query(
        connector.clone(),
        QUERY_HOSTS_IN_DOWNTIME,
        host_service_tx.clone(),
    ));
    tokio::spawn(run_query(
        connector.clone(),
        QUERY_SERVICES_IN_DOWNTIME,
        host_service_tx,
    ));

    let mut index = DowntimeIndex::new();
    let mut downtimes = HashMap::new();

    loop {
        match tokio::time::timeout(timeout, downtime_rx.recv()).await {
            Ok(Some(row)) => record_downtime_row(&mut downtimes, &row),
            Ok(None) => break,
            Err(_) => {
                info!("livestatus timed out while listing downtimes");
                return index;
            }
        }
    }

    loop {
        match tokio::time::timeout(timeout, host_service_rx.recv()).await {
            Ok(Some(row)) => merge_host_service_row(&mut index, &downtimes, &row),
            Ok(None) => break,
            Err(_) => {
                info!("livestatus timed out while listing hosts and services in downtime");
                return index;
            }
        }
    }

    index
}

pub struct CacheBuilderActor {
    connector: Connector,
    cache: DowntimeCache,
    command_rx: mpsc::Receiver<CacheCommand>,
    interval_duration: Duration,
}

impl CacheBuilderActor {
    pub fn new(
        connector: Connector,
        cache: DowntimeCache,
        command_rx: mpsc::Receiver<CacheCommand>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            connector,
            cache,
            command_rx,
            interval_duration,
        }
    }

    #[instrument(skip(self), fields(address = %self.connector.address))]
    pub async fn run(mut self) {
        debug!("starting downtime cache builder");

        // first tick fires immediately, so the cache is filled on start-up
        let mut ticker = interval(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CacheCommand::RefreshNow { respond_to } => {
                            debug!("received RefreshNow command");
                            let hosts = self.refresh().await;
                            let _ = respond_to.send(hosts);
                        }

                        CacheCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("downtime cache builder stopped");
    }

    async fn refresh(&self) -> usize {
        let index = build_index(&self.connector, self.interval_duration / 3).await;
        let hosts = index.len();
        debug!("downtime index rebuilt with {hosts} hosts");
        self.cache.replace(index);
        hosts
    }
}

#[derive(Clone)]
pub struct CacheBuilderHandle {
    sender: mpsc::Sender<CacheCommand>,
    cache: DowntimeCache,
}

impl CacheBuilderHandle {
    pub fn spawn(connector: Connector) -> Self {
        Self::spawn_with_interval(connector, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn spawn_with_interval(connector: Connector, refresh_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let cache = DowntimeCache::new();

        let actor = CacheBuilderActor::new(connector, cache.clone(), cmd_rx, refresh_interval);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            cache,
        }
    }

    /// Shared cache, for the parsers that annotate downtimes
    pub fn cache(&self) -> DowntimeCache {
        self.cache.clone()
    }

    pub fn is_in_downtime(&self, host: &str, service: &str, time: &str) -> bool {
        self.cache.is_in_downtime(host, service, time)
    }

    /// Rebuild the index now and return the number of hosts in it
    pub async fn refresh_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CacheCommand::RefreshNow { respond_to: tx })
            .await
            .context("failed to send RefreshNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CacheCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("cache builder did not acknowledge shutdown")
    }
}

#[async_trait]
impl Stoppable for CacheBuilderHandle {
    fn name(&self) -> &str {
        "livestatus cache builder"
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown().await
    }
}
