//! Printable livestatus events
//!
//! Comments, downtimes and notifications all end up in the `messages`
//! measurement (InfluxDB) or the `messages` type (Elasticsearch).

use crate::printable::{
    MIN_ELASTICSEARCH_VERSION, MIN_INFLUXDB_VERSION, Printable, RenderOptions, gen_index,
    json_value, sanitize_influx,
};
use crate::routing::RoutingFilter;
use crate::util::{cast_seconds_to_ms, version_at_least};

pub use crate::printable::SimpleEvent;

const MEASUREMENT: &str = "messages";

/// Columns shared by every livestatus event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventData {
    pub host: String,
    pub service: String,
    pub comment: String,
    /// Epoch seconds
    pub entry_time: String,
    pub author: String,
}

impl EventData {
    fn influx_prefix(&self, opts: &RenderOptions) -> String {
        let service = if self.service.is_empty() {
            &opts.hostcheck_alias
        } else {
            &self.service
        };
        format!(
            "{MEASUREMENT},host={},service={}",
            sanitize_influx(&self.host, opts),
            sanitize_influx(service, opts)
        )
    }

    fn influx_line(
        &self,
        opts: &RenderOptions,
        event_type: &str,
        message: &str,
        time: &str,
    ) -> String {
        format!(
            "{},type={event_type},author={} message=\"{}\" {}",
            self.influx_prefix(opts),
            sanitize_influx(&self.author, opts),
            escape_field_string(message),
            cast_seconds_to_ms(time),
        )
    }

    fn elastic_lines(
        &self,
        index: &str,
        opts: &RenderOptions,
        event_type: &str,
        message: &str,
        time: &str,
    ) -> String {
        let timestamp = cast_seconds_to_ms(time);
        let head = serde_json::json!({
            "index": {
                "_index": gen_index(index, &timestamp, opts.index_rotation),
                "_type": MEASUREMENT,
            }
        });
        let service = if self.service.is_empty() {
            opts.hostcheck_alias.as_str()
        } else {
            self.service.as_str()
        };
        let data = serde_json::json!({
            "timestamp": json_value(&timestamp),
            "message": message,
            "author": self.author,
            "host": self.host,
            "service": service,
            "type": event_type,
        });

        format!("{head}\n{data}\n")
    }
}

/// Escape a string for a double quoted InfluxDB field value
fn escape_field_string(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A host or service comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub routing: RoutingFilter,
    pub data: EventData,
    /// Livestatus `entry_type` column
    pub entry_type: String,
}

impl CommentEvent {
    pub fn comment_type(&self) -> &'static str {
        match self.entry_type.trim() {
            "2" => "downtime",
            "3" => "flapping",
            "4" => "acknowledgement",
            _ => "comment",
        }
    }
}

impl Printable for CommentEvent {
    fn routing(&self) -> &RoutingFilter {
        &self.routing
    }

    fn print_for_influxdb(&self, version: &str, opts: &RenderOptions) -> Option<String> {
        version_at_least(version, MIN_INFLUXDB_VERSION).then(|| {
            self.data.influx_line(
                opts,
                self.comment_type(),
                self.data.comment.trim(),
                &self.data.entry_time,
            )
        })
    }

    fn print_for_elasticsearch(
        &self,
        version: &str,
        index: &str,
        opts: &RenderOptions,
    ) -> Option<String> {
        version_at_least(version, MIN_ELASTICSEARCH_VERSION).then(|| {
            self.data.elastic_lines(
                index,
                opts,
                self.comment_type(),
                self.data.comment.trim(),
                &self.data.entry_time,
            )
        })
    }
}

/// A scheduled downtime, rendered as a start and an end message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DowntimeEvent {
    pub routing: RoutingFilter,
    pub data: EventData,
    /// Epoch seconds
    pub end_time: String,
}

impl DowntimeEvent {
    fn messages(&self) -> (String, String) {
        (
            format!("Downtime start: <br>{}", self.data.comment)
                .trim()
                .to_string(),
            format!("Downtime end: <br>{}", self.data.comment)
                .trim()
                .to_string(),
        )
    }
}

impl Printable for DowntimeEvent {
    fn routing(&self) -> &RoutingFilter {
        &self.routing
    }

    fn print_for_influxdb(&self, version: &str, opts: &RenderOptions) -> Option<String> {
        if !version_at_least(version, MIN_INFLUXDB_VERSION) {
            return None;
        }
        let (start, end) = self.messages();
        Some(format!(
            "{}\n{}",
            self.data
                .influx_line(opts, "downtime", &start, &self.data.entry_time),
            self.data.influx_line(opts, "downtime", &end, &self.end_time),
        ))
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
        let (start, end) = self.messages();
        Some(format!(
            "{}{}",
            self.data
                .elastic_lines(index, opts, "downtime", &start, &self.data.entry_time),
            self.data
                .elastic_lines(index, opts, "downtime", &end, &self.end_time),
        ))
    }
}

/// A host or service notification from the livestatus log table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub routing: RoutingFilter,
    pub data: EventData,
    /// `HOST NOTIFICATION` or `SERVICE NOTIFICATION`
    pub notification_type: String,
    /// Notification level, e.g. `CRITICAL` or `DOWN`
    pub level: String,
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        if self.notification_type.starts_with("HOST") {
            "host_notification"
        } else {
            "service_notification"
        }
    }

    fn message(&self) -> String {
        format!("{}:<br> {}", self.level, self.data.comment)
            .trim()
            .to_string()
    }
}

impl Printable for NotificationEvent {
    fn routing(&self) -> &RoutingFilter {
        &self.routing
    }

    fn print_for_influxdb(&self, version: &str, opts: &RenderOptions) -> Option<String> {
        version_at_least(version, MIN_INFLUXDB_VERSION).then(|| {
            self.data
                .influx_line(opts, self.event_type(), &self.message(), &self.data.entry_time)
        })
    }

    fn print_for_elasticsearch(
        &self,
        version: &str,
        index: &str,
        opts: &RenderOptions,
    ) -> Option<String> {
        version_at_least(version, MIN_ELASTICSEARCH_VERSION).then(|| {
            self.data.elastic_lines(
                index,
                opts,
                self.event_type(),
                &self.message(),
                &self.data.entry_time,
            )
        })
    }
}
