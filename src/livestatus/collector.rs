//! Livestatus event collector
//!
//! Every two minutes the collector asks livestatus for recent notifications,
//! comments and downtimes. Each row becomes a printable event that is fanned
//! out to the target queues.
//!
//! ```text
//! Timer tick → 3 queries (concurrent) → row filter → event → fan-out
//!     ↑
//!     └─── Commands (QueryNow, Shutdown)
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use super::connector::{Connector, add_time_cutoff, build_query, query_cutoff};
use super::events::{CommentEvent, DowntimeEvent, EventData, NotificationEvent};
use crate::Stoppable;
use crate::filter::LineFilter;
use crate::messages::LivestatusCommand;
use crate::printable::Event;
use crate::queue::{DELIVERY_TIMEOUT, TargetQueues};
use crate::routing::RoutingFilter;

pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(120);

/// Pause between two attempts to detect the livestatus flavour
pub const DETECTION_RETRY: Duration = Duration::from_secs(60);

pub const QUERY_VERSION: &str = "GET status\nColumns: livestatus_version\nOutputFormat: csv\n\n";

pub const QUERY_NOTIFICATIONS: &str = "GET log\nColumns: type time contact_name message\nFilter: type ~ .*NOTIFICATION\nFilter: time > %d\nOutputFormat: csv\n\n";

/// Icinga2 needs the time filter negated
pub const QUERY_NOTIFICATIONS_ICINGA2: &str = "GET log\nColumns: type time contact_name message\nFilter: type ~ .*NOTIFICATION\nFilter: time < %d\nNegate:\nOutputFormat: csv\n\n";

pub const QUERY_COMMENTS: &str = "GET comments\nColumns: host_name service_display_name comment entry_time author entry_type\nFilter: entry_time > %d\nOutputFormat: csv\n\n";

pub const QUERY_DOWNTIMES: &str = "GET downtimes\nColumns: host_name service_display_name comment entry_time author end_time\nFilter: entry_time > %d\nOutputFormat: csv\n\n";

/// Monitoring core behind the livestatus socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Nagios,
    Icinga2,
    Naemon,
}

impl Flavor {
    /// Classify a `livestatus_version` string
    pub fn from_version(version: &str) -> Option<Self> {
        let matches = |pattern: &str| Regex::new(pattern).is_ok_and(|re| re.is_match(version));

        if matches(r"^r[\d.-]+$") {
            Some(Flavor::Icinga2)
        } else if matches(r"^[\d.]+p[\d.]+$") {
            Some(Flavor::Nagios)
        } else if matches(r"^[\d.]+(source-naemon|-naemon)?$") {
            Some(Flavor::Naemon)
        } else {
            None
        }
    }

    fn notification_query(self) -> &'static str {
        match self {
            Flavor::Icinga2 => QUERY_NOTIFICATIONS_ICINGA2,
            Flavor::Nagios | Flavor::Naemon => QUERY_NOTIFICATIONS,
        }
    }
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nagios" => Ok(Flavor::Nagios),
            "icinga2" => Ok(Flavor::Icinga2),
            "naemon" => Ok(Flavor::Naemon),
            other => Err(format!("unknown livestatus flavour {other:?}")),
        }
    }
}

/// Ask livestatus for its version and classify it.
///
/// Retries up to `attempts` times, `retry_every` apart. Falls back to
/// Nagios when nothing could be detected.
#[instrument(skip(connector), fields(address = %connector.address))]
pub async fn detect_flavor(connector: &Connector, attempts: u32, retry_every: Duration) -> Flavor {
    let mut attempt = 0;
    let version = loop {
        match connector.query_rows(QUERY_VERSION).await {
            Ok(rows) => {
                if let Some(version) = rows.into_iter().find_map(|row| match row.as_slice() {
                    [version] => Some(version.clone()),
                    _ => None,
                }) {
                    break version;
                }
                warn!("livestatus version query returned no usable row");
            }
            Err(e) => debug!("livestatus version query failed: {e}"),
        }

        if attempt >= attempts {
            break String::new();
        }
        attempt += 1;
        info!(
            "could not detect livestatus version, waiting {retry_every:?} ({attempt}/{attempts})"
        );
        tokio::time::sleep(retry_every).await;
    };

    info!("livestatus version: {version}");
    Flavor::from_version(&version).unwrap_or_else(|| {
        warn!("could not detect livestatus type with version {version:?}, assuming Nagios");
        Flavor::Nagios
    })
}

/// The three event queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Notifications,
    Comments,
    Downtimes,
}

/// Extra clauses appended to the event queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilters {
    pub notifications: Vec<String>,
    pub comments: Vec<String>,
    pub downtimes: Vec<String>,
}

#[derive(Debug, Clone)]
struct Queries {
    notifications: String,
    comments: String,
    downtimes: String,
}

impl Queries {
    fn new(flavor: Flavor, filters: &QueryFilters) -> Self {
        Self {
            notifications: build_query(flavor.notification_query(), &filters.notifications),
            comments: build_query(QUERY_COMMENTS, &filters.comments),
            downtimes: build_query(QUERY_DOWNTIMES, &filters.downtimes),
        }
    }
}

fn event_data(host: &str, service: &str, comment: &str, time: &str, author: &str) -> EventData {
    EventData {
        host: host.to_string(),
        service: service.to_string(),
        comment: comment.to_string(),
        entry_time: time.to_string(),
        author: author.to_string(),
    }
}

/// Convert a `log` row into a notification.
///
/// Column layouts differ between cores and notification commands, the row
/// length tells them apart.
pub fn notification_from_row(row: &[String]) -> Option<NotificationEvent> {
    let notification_type = row.first()?;
    let (data, level) = match (notification_type.as_str(), row.len()) {
        ("HOST NOTIFICATION", 10) => (event_data(&row[4], "", &row[9], &row[1], &row[8]), &row[5]),
        ("HOST NOTIFICATION", 8 | 9) => (event_data(&row[4], "", &row[7], &row[1], &row[2]), &row[5]),
        ("SERVICE NOTIFICATION", 11) => {
            (event_data(&row[4], &row[5], &row[10], &row[1], &row[9]), &row[6])
        }
        ("SERVICE NOTIFICATION", 9 | 10) => {
            (event_data(&row[4], &row[5], &row[8], &row[1], &row[2]), &row[6])
        }
        ("HOST NOTIFICATION" | "SERVICE NOTIFICATION", len) => {
            warn!("{notification_type}, undefined line length {len}: {row:?}");
            return None;
        }
        (other, _) if other.contains("NOTIFICATION SUPPRESSED") => {
            debug!("ignoring suppressed notification {other:?}: {row:?}");
            return None;
        }
        (other, _) => {
            warn!("unknown notification type {other:?}: {row:?}");
            return None;
        }
    };

    Some(NotificationEvent {
        routing: RoutingFilter::all(),
        data,
        notification_type: notification_type.clone(),
        level: level.clone(),
    })
}

/// Convert one response row into an event, `None` for rows that are skipped
pub fn row_to_event(kind: QueryKind, row: &[String]) -> Option<Event> {
    match kind {
        QueryKind::Notifications => {
            notification_from_row(row).map(|event| Arc::new(event) as Event)
        }
        QueryKind::Comments => match row {
            [host, service, comment, time, author, entry_type] => Some(Arc::new(CommentEvent {
                routing: RoutingFilter::all(),
                data: event_data(host, service, comment, time, author),
                entry_type: entry_type.clone(),
            })),
            _ => {
                warn!("comment row out of range: {row:?}");
                None
            }
        },
        QueryKind::Downtimes => match row {
            [host, service, comment, time, author, end_time] => Some(Arc::new(DowntimeEvent {
                routing: RoutingFilter::all(),
                data: event_data(host, service, comment, time, author),
                end_time: end_time.clone(),
            })),
            _ => {
                warn!("downtime row out of range: {row:?}");
                None
            }
        },
    }
}

/// Collector settings taken from the configuration
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Skip detection and use this flavour
    pub flavor: Option<Flavor>,
    /// Detection attempts before falling back to Nagios
    pub minutes_to_wait: u32,
    pub filters: QueryFilters,
    pub line_filter: LineFilter,
    /// Joins row columns before the line filter is applied
    pub field_separator: String,
    pub interval: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            flavor: None,
            minutes_to_wait: 3,
            filters: QueryFilters::default(),
            line_filter: LineFilter::default(),
            field_separator: "&".to_string(),
            interval: DEFAULT_QUERY_INTERVAL,
        }
    }
}

pub struct LivestatusCollectorActor {
    connector: Connector,
    queues: TargetQueues,
    settings: CollectorSettings,
    queries: Queries,
    command_rx: mpsc::Receiver<LivestatusCommand>,
}

impl LivestatusCollectorActor {
    pub fn new(
        connector: Connector,
        queues: TargetQueues,
        settings: CollectorSettings,
        command_rx: mpsc::Receiver<LivestatusCommand>,
    ) -> Self {
        let queries = Queries::new(settings.flavor.unwrap_or(Flavor::Nagios), &settings.filters);
        Self {
            connector,
            queues,
            settings,
            queries,
            command_rx,
        }
    }

    /// Detect the flavour unless configured, still answering commands.
    ///
    /// Returns false if a shutdown arrived while waiting.
    async fn resolve_flavor(&mut self) -> bool {
        let flavor = match self.settings.flavor {
            Some(flavor) => {
                info!("livestatus flavour set to {flavor:?}");
                flavor
            }
            None => {
                let detection = detect_flavor(
                    &self.connector,
                    self.settings.minutes_to_wait,
                    DETECTION_RETRY,
                );
                tokio::pin!(detection);

                loop {
                    tokio::select! {
                        flavor = &mut detection => {
                            info!("livestatus flavour: {flavor:?}");
                            break flavor;
                        }

                        cmd = self.command_rx.recv() => match cmd {
                            Some(LivestatusCommand::QueryNow { respond_to }) => {
                                let _ = respond_to.send(Err(anyhow::anyhow!(
                                    "livestatus flavour detection still running"
                                )));
                            }
                            Some(LivestatusCommand::Shutdown { respond_to }) => {
                                debug!("received shutdown command during detection");
                                let _ = respond_to.send(());
                                return false;
                            }
                            None => return false,
                        }
                    }
                }
            }
        };

        self.queries = Queries::new(flavor, &self.settings.filters);
        debug!(queries = ?self.queries, "livestatus queries");
        true
    }

    #[instrument(skip(self), fields(address = %self.connector.address))]
    pub async fn run(mut self) {
        debug!("starting livestatus collector");

        if !self.resolve_flavor().await {
            debug!("livestatus collector stopped");
            return;
        }

        let mut ticker = interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.query_data().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        LivestatusCommand::QueryNow { respond_to } => {
                            debug!("received QueryNow command");
                            let delivered = self.query_data().await;
                            let _ = respond_to.send(Ok(delivered));
                        }

                        LivestatusCommand::Shutdown { respond_to } => {
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

        debug!("livestatus collector stopped");
    }

    /// Run all three queries concurrently, returns the number of events
    async fn query_data(&self) -> usize {
        let cutoff = query_cutoff(Utc::now().timestamp(), self.settings.interval);

        let (notifications, comments, downtimes) = tokio::join!(
            self.request_events(QueryKind::Notifications, &self.queries.notifications, cutoff),
            self.request_events(QueryKind::Comments, &self.queries.comments, cutoff),
            self.request_events(QueryKind::Downtimes, &self.queries.downtimes, cutoff),
        );

        debug!(notifications, comments, downtimes, "livestatus events collected");
        notifications + comments + downtimes
    }

    async fn request_events(&self, kind: QueryKind, query: &str, cutoff: i64) -> usize {
        let query = add_time_cutoff(query, cutoff);
        let (tx, mut rx) = mpsc::channel::<Vec<String>>(64);

        let forward = async {
            let mut events = 0;
            while let Some(row) = rx.recv().await {
                if !self
                    .settings
                    .line_filter
                    .accepts_row(&row, &self.settings.field_separator)
                {
                    debug!("skipping filtered row {row:?}");
                    continue;
                }
                if let Some(event) = row_to_event(kind, &row) {
                    self.queues.fan_out(event, DELIVERY_TIMEOUT).await;
                    events += 1;
                }
            }
            events
        };

        let (result, events) = tokio::join!(self.connector.query(&query, tx), forward);
        if let Err(e) = result {
            warn!(?kind, "livestatus query failed: {e}");
        }
        events
    }
}

#[derive(Clone)]
pub struct LivestatusCollectorHandle {
    sender: mpsc::Sender<LivestatusCommand>,
}

impl LivestatusCollectorHandle {
    pub fn spawn(connector: Connector, queues: TargetQueues, settings: CollectorSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = LivestatusCollectorActor::new(connector, queues, settings, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Query livestatus now, returns the number of events delivered
    pub async fn query_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LivestatusCommand::QueryNow { respond_to: tx })
            .await
            .context("failed to send QueryNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LivestatusCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await
            .context("livestatus collector did not acknowledge shutdown")
    }
}

#[async_trait]
impl Stoppable for LivestatusCollectorHandle {
    fn name(&self) -> &str {
        "livestatus collector"
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown().await
    }
}
