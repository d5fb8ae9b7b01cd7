//! Nagios performance data
//!
//! [`parse_record`] turns a spool record into [`PerformanceSample`]s, which
//! are rendered for the configured targets.

pub mod parser;
pub mod threshold;

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::printable::{
    MIN_ELASTICSEARCH_VERSION, MIN_INFLUXDB_VERSION, Printable, RenderOptions, gen_index,
    join_influx_pairs, json_value, sanitize_influx,
};
use crate::routing::RoutingFilter;
use crate::util::version_at_least;

pub use parser::{PerformanceDataIter, RecordKind, parse_record, tokenize_perfdata};
pub use threshold::{ThresholdSpec, normalize_number};

/// Reasons a single perfdata token is skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("not a number: {0:?}")]
    InvalidNumber(String),

    #[error("token has no value: {0:?}")]
    MissingValue(String),

    #[error("value of {0:?} is unknown")]
    UnknownValue(String),
}

/// One metric of one check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceSample {
    pub host: String,
    /// Empty for host checks, the hostcheck alias is substituted on render
    pub service: String,
    pub command: String,
    /// Epoch milliseconds
    pub time: String,
    pub label: String,
    pub unit: String,
    pub tags: HashMap<String, String>,
    pub fields: HashMap<String, String>,
    #[serde(skip)]
    pub routing: RoutingFilter,
}

impl PerformanceSample {
    fn service_or_alias<'a>(&'a self, opts: &'a RenderOptions) -> &'a str {
        if self.service.is_empty() {
            &opts.hostcheck_alias
        } else {
            &self.service
        }
    }
}

impl Printable for PerformanceSample {
    fn routing(&self) -> &RoutingFilter {
        &self.routing
    }

    fn print_for_influxdb(&self, version: &str, opts: &RenderOptions) -> Option<String> {
        if !version_at_least(version, MIN_INFLUXDB_VERSION) {
            return None;
        }

        let mut line = format!(
            "metrics,host={},service={},command={},performanceLabel={}",
            sanitize_influx(&self.host, opts),
            sanitize_influx(self.service_or_alias(opts), opts),
            sanitize_influx(&self.command, opts),
            sanitize_influx(&self.label, opts),
        );
        if !self.tags.is_empty() {
            line.push(',');
            line.push_str(&join_influx_pairs(&self.tags, opts));
        }
        if !self.unit.is_empty() {
            line.push_str(",unit=");
            line.push_str(&sanitize_influx(&self.unit, opts));
        }
        line.push(' ');
        line.push_str(&join_influx_pairs(&self.fields, opts));
        line.push(' ');
        line.push_str(&self.time);

        Some(line)
    }

    fn print_for_elasticsearch(
        &self,
        version: &str,
        index: &str,
        opts: &RenderOptions,
    ) -> Option<String> {
        if !version_at_least(version, MIN_ELASTICSEARCH_VERSION) {
            return None;
        }

        let head = serde_json::json!({
            "index": {
                "_index": gen_index(index, &self.time, opts.index_rotation),
                "_type": "metrics",
            }
        });

        let mut data = serde_json::Map::new();
        data.insert("timestamp".to_string(), json_value(&self.time));
        data.insert("host".to_string(), self.host.clone().into());
        data.insert(
            "service".to_string(),
            self.service_or_alias(opts).to_string().into(),
        );
        data.insert("command".to_string(), self.command.clone().into());
        data.insert(
            "performanceLabel".to_string(),
            self.label.trim_matches('\'').to_string().into(),
        );
        if !self.unit.is_empty() {
            data.insert("unit".to_string(), self.unit.clone().into());
        }
        for (key, value) in self.tags.iter().chain(self.fields.iter()) {
            data.insert(key.clone(), json_value(value));
        }

        Some(format!("{head}\n{}\n", serde_json::Value::Object(data)))
    }
}
