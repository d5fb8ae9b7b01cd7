//! Livestatus ingestion
//!
//! - [`connector`]: one query per connection, rows streamed back as CSV
//! - [`cache`]: periodically rebuilt host/service downtime index
//! - [`collector`]: notifications, comments and downtimes as events
//! - [`events`]: printable livestatus events

pub mod cache;
pub mod collector;
pub mod connector;
pub mod events;

use thiserror::Error;

pub use cache::{CacheBuilderHandle, DowntimeCache, DowntimeIndex};
pub use collector::{Flavor, LivestatusCollectorHandle};
pub use connector::{ConnectionType, Connector};

#[derive(Debug, Error)]
pub enum LivestatusError {
    #[error("could not connect to livestatus at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("livestatus connection type {0:?} is not supported on this platform")]
    UnsupportedConnection(ConnectionType),

    #[error("failed to send query: {0}")]
    Write(#[source] std::io::Error),

    #[error("row receiver went away")]
    ReceiverClosed,
}
