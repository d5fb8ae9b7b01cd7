//! mod_gearman ingestion
//!
//! Workers pull check results from a gearman job server, decrypt them and
//! feed them through the same line pipeline as the spool files.

pub mod protocol;
pub mod secret;
pub mod worker;

use thiserror::Error;

pub use protocol::{Packet, PacketType};
pub use secret::{DecryptError, Decrypter, get_secret, shape_key};
pub use worker::{GearmanSettings, GearmanWorkerHandle, JobHandler};

#[derive(Debug, Error)]
pub enum GearmanError {
    #[error("could not connect to gearmand at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to gearmand failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid gearman packet: {0}")]
    Protocol(String),

    #[error("gearmand reported error {code}: {message}")]
    Server { code: String, message: String },
}
