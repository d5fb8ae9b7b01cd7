//! Line processing shared by the spool and gearman workers
//!
//! A line is split into a record, checked against the line filter, parsed
//! into performance samples and every sample is fanned out to the target
//! queues.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::filter::LineFilter;
use crate::livestatus::cache::DowntimeCache;
use crate::perfdata::parse_record;
use crate::queue::{DELIVERY_TIMEOUT, TargetQueues};
use crate::record::RawRecord;
use crate::routing::RoutingFilter;

#[derive(Debug, Clone)]
pub struct PerfdataPipeline {
    queues: TargetQueues,
    filter: LineFilter,
    default_target: RoutingFilter,
    cache: Option<DowntimeCache>,
    delivery_timeout: Duration,
}

impl PerfdataPipeline {
    pub fn new(queues: TargetQueues, filter: LineFilter, default_target: RoutingFilter) -> Self {
        Self {
            queues,
            filter,
            default_target,
            cache: None,
            delivery_timeout: DELIVERY_TIMEOUT,
        }
    }

    /// Tag samples of hosts and services in downtime
    pub fn with_downtime_cache(mut self, cache: DowntimeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn queues(&self) -> &TargetQueues {
        &self.queues
    }

    /// Process one spool formatted line, returns the number of samples
    /// parsed from it
    pub async fn process_line(&self, line: &str) -> usize {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return 0;
        }

        let record = RawRecord::from_spool_line(line);
        if !self.filter.accepts(line, &record) {
            trace!("line filtered out");
            return 0;
        }

        let mut samples = 0;
        for sample in parse_record(&record, &self.default_target, self.cache.as_ref()) {
            samples += 1;
            let delivered = self
                .queues
                .fan_out(Arc::new(sample), self.delivery_timeout)
                .await;
            if delivered == 0 {
                debug!("sample was not delivered to any target");
            }
        }
        samples
    }
}
