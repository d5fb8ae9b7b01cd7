//! Printable events
//!
//! Everything that travels through a target queue implements [`Printable`]:
//! it carries a routing filter and knows how to render itself for the
//! datatype of the target that drains the queue.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};

use crate::routing::RoutingFilter;

/// Lowest InfluxDB version with line protocol support
pub const MIN_INFLUXDB_VERSION: &str = "0.9";

/// Lowest Elasticsearch version with bulk index support
pub const MIN_ELASTICSEARCH_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    #[serde(alias = "influx")]
    InfluxDb,
    #[serde(alias = "elastic")]
    Elasticsearch,
}

/// A configured output target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub name: String,
    pub datatype: Datatype,
    pub version: String,
    /// Index prefix, only used by Elasticsearch targets
    pub index: String,
}

impl Target {
    pub fn new(name: impl Into<String>, datatype: Datatype, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datatype,
            version: version.into(),
            index: String::new(),
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.name, self.datatype)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexRotation {
    #[default]
    Monthly,
    Yearly,
}

/// Options shared by every renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Service name used for host checks, which carry no service
    pub hostcheck_alias: String,
    pub nasty_string: String,
    pub nasty_string_to_replace: String,
    pub index_rotation: IndexRotation,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            hostcheck_alias: "hostcheck".to_string(),
            nasty_string: String::new(),
            nasty_string_to_replace: String::new(),
            index_rotation: IndexRotation::Monthly,
        }
    }
}

pub trait Printable: fmt::Debug + Send + Sync {
    fn routing(&self) -> &RoutingFilter;

    /// Render as InfluxDB line protocol, `None` for unsupported versions
    fn print_for_influxdb(&self, version: &str, opts: &RenderOptions) -> Option<String>;

    /// Render as Elasticsearch bulk lines, `None` for unsupported versions
    fn print_for_elasticsearch(
        &self,
        version: &str,
        index: &str,
        opts: &RenderOptions,
    ) -> Option<String>;

    fn test_target_filter(&self, filter: &str) -> bool {
        self.routing().matches_str(filter)
    }

    fn render(&self, target: &Target, opts: &RenderOptions) -> Option<String> {
        match target.datatype {
            Datatype::InfluxDb => self.print_for_influxdb(&target.version, opts),
            Datatype::Elasticsearch => {
                self.print_for_elasticsearch(&target.version, &target.index, opts)
            }
        }
    }
}

/// Events are shared between every queue they are delivered to
pub type Event = Arc<dyn Printable>;

/// Plain text that is only printed for one datatype
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleEvent {
    pub routing: RoutingFilter,
    pub text: String,
    pub datatype: Datatype,
}

impl Printable for SimpleEvent {
    fn routing(&self) -> &RoutingFilter {
        &self.routing
    }

    fn print_for_influxdb(&self, _version: &str, _opts: &RenderOptions) -> Option<String> {
        (self.datatype == Datatype::InfluxDb).then(|| self.text.clone())
    }

    fn print_for_elasticsearch(
        &self,
        _version: &str,
        _index: &str,
        _opts: &RenderOptions,
    ) -> Option<String> {
        (self.datatype == Datatype::Elasticsearch).then(|| self.text.clone())
    }
}

/// Escape a value for use in an InfluxDB tag or measurement
pub fn sanitize_influx(input: &str, opts: &RenderOptions) -> String {
    if input.is_empty() {
        return String::new();
    }
    if input.len() > 1 && input.starts_with('"') && input.ends_with('"') {
        return input.to_string();
    }

    let replaced = if opts.nasty_string.is_empty() {
        input.to_string()
    } else {
        input.replace(&opts.nasty_string, &opts.nasty_string_to_replace)
    };

    replaced
        .trim_matches('\'')
        .replace(' ', "\\ ")
        .replace(',', "\\,")
}

/// Escape a value for an Elasticsearch JSON string
pub fn sanitize_elastic(input: &str) -> String {
    input
        .trim_matches('\'')
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

/// Render a map as `k=v` pairs in key order
pub fn join_influx_pairs<'a>(
    pairs: impl IntoIterator<Item = (&'a String, &'a String)>,
    opts: &RenderOptions,
) -> String {
    let mut pairs: Vec<_> = pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", sanitize_influx(k, opts), sanitize_influx(v, opts)))
        .collect();
    pairs.sort();
    pairs.join(",")
}

/// Build the index name for a millisecond timestamp
pub fn gen_index(index: &str, timestamp_ms: &str, rotation: IndexRotation) -> String {
    let (year, month) = timestamp_ms
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|time| (time.year(), time.month()))
        .unwrap_or((1970, 1));

    match rotation {
        IndexRotation::Monthly => format!("{index}-{year}.{month:02}"),
        IndexRotation::Yearly => format!("{index}-{year}"),
    }
}

/// JSON value for a string, numbers stay numbers
pub fn json_value(input: &str) -> serde_json::Value {
    if let Ok(integer) = input.parse::<i64>() {
        return integer.into();
    }
    input
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(input.to_string()))
}
