pub mod config;
pub mod filter;
pub mod gearman;
pub mod livestatus;
pub mod messages;
pub mod pause;
pub mod perfdata;
pub mod pipeline;
pub mod printable;
pub mod queue;
pub mod record;
pub mod routing;
pub mod spoolfile;
pub mod util;

use async_trait::async_trait;

/// A running component that can be stopped.
///
/// `stop` returns once the component has finished its loop.
#[async_trait]
pub trait Stoppable: Send + Sync {
    fn name(&self) -> &str;

    async fn stop(&self) -> anyhow::Result<()>;
}
