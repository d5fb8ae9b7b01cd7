//! Performance data parser
//!
//! Turns one spool record into a lazy sequence of [`PerformanceSample`]s,
//! one per metric token of the perfdata field:
//!
//! ```text
//! label=value[unit][;warn[;crit[;min[;max]]]]
//! ```
//!
//! Labels may be single quoted and contain spaces. Tokens wrapped in square
//! brackets are plugin annotations and are skipped.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::threshold::{ThresholdSpec, normalize_number};
use super::{ParseError, PerformanceSample};
use crate::livestatus::cache::DowntimeCache;
use crate::record::RawRecord;
use crate::routing::RoutingFilter;
use crate::util::cast_seconds_to_ms;

pub const DATATYPE: &str = "DATATYPE";
pub const TIMET: &str = "TIMET";
pub const HOSTNAME: &str = "HOSTNAME";
pub const SERVICEDESC: &str = "SERVICEDESC";
pub const TAG_DIRECTIVE: &str = "NAGFLUX:TAG";
pub const FIELD_DIRECTIVE: &str = "NAGFLUX:FIELD";
pub const TARGET_DIRECTIVE: &str = "NAGFLUX:TARGET";

/// Which kind of check produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Host,
    Service,
}

impl RecordKind {
    fn prefix(self) -> &'static str {
        match self {
            RecordKind::Host => "HOST",
            RecordKind::Service => "SERVICE",
        }
    }

    pub fn perfdata_key(self) -> String {
        format!("{}PERFDATA", self.prefix())
    }

    pub fn command_key(self) -> String {
        format!("{}CHECKCOMMAND", self.prefix())
    }

    /// Detect the kind from `DATATYPE`, falling back to the perfdata keys
    pub fn detect(record: &RawRecord) -> Option<Self> {
        match record.get(DATATYPE) {
            Some("HOSTPERFDATA") => Some(RecordKind::Host),
            Some("SERVICEPERFDATA") => Some(RecordKind::Service),
            _ if record.contains("SERVICEPERFDATA") => Some(RecordKind::Service),
            _ if record.contains("HOSTPERFDATA") => Some(RecordKind::Host),
            _ => None,
        }
    }
}

/// Tokenizer that keeps labels with spaces or quotes together and drops
/// bracketed annotations
#[derive(Debug, Clone)]
pub struct PerfTokens<'a> {
    input: &'a str,
    pos: usize,
}

pub fn tokenize_perfdata(input: &str) -> PerfTokens<'_> {
    PerfTokens { input, pos: 0 }
}

impl<'a> Iterator for PerfTokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            let rest = &self.input[self.pos..];
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.is_empty() {
                return None;
            }

            if trimmed.starts_with('[') {
                match trimmed.find(']') {
                    Some(end) => self.pos += end + 1,
                    None => self.pos = self.input.len(),
                }
                continue;
            }

            // Labels run up to the first unquoted `=` and may contain
            // spaces, the value part ends at the next whitespace. Only a
            // leading `'` opens a quoted label.
            let mut quoted = false;
            let mut in_value = false;
            let mut end = trimmed.len();
            for (i, c) in trimmed.char_indices() {
                match c {
                    '\'' if !in_value && (quoted || i == 0) => quoted = !quoted,
                    '=' if !quoted && !in_value => in_value = true,
                    c if c.is_whitespace() && in_value => {
                        end = i;
                        break;
                    }
                    _ => {}
                }
            }

            self.pos += end;
            return Some(&trimmed[..end]);
        }
    }
}

/// Split a value segment into its numeric part and its unit
pub fn split_value_unit(segment: &str) -> (&str, &str) {
    let end = segment
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+')))
        .map(|(i, _)| i)
        .unwrap_or(segment.len());
    segment.split_at(end)
}

/// Split `label=rest`, honouring a quoted label that may contain `=`
fn split_label(token: &str) -> Option<(&str, &str)> {
    let search_from = if token.starts_with('\'') {
        token[1..].find('\'').map(|i| i + 2).unwrap_or(0)
    } else {
        0
    };
    let eq = token[search_from..].find('=')? + search_from;
    let label = &token[..eq];
    if label.is_empty() {
        return None;
    }
    Some((label, &token[eq + 1..]))
}

/// Metric part of one token, before record context is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub label: String,
    pub unit: String,
    pub fields: HashMap<String, String>,
    pub tags: HashMap<String, String>,
}

/// Parse a single perfdata token
pub fn parse_token(token: &str) -> Result<ParsedToken, ParseError> {
    let (label, rest) =
        split_label(token).ok_or_else(|| ParseError::MissingValue(token.to_string()))?;

    let mut segments = rest.split(';');
    let value_segment = segments.next().unwrap_or_default();
    let (number, unit) = split_value_unit(value_segment);

    if value_segment.starts_with('U') {
        return Err(ParseError::UnknownValue(label.to_string()));
    }

    let mut fields = HashMap::new();
    let mut tags = HashMap::new();
    fields.insert("value".to_string(), normalize_number(number)?);

    for kind in ["warn", "crit"] {
        if let Some(segment) = segments.next() {
            ThresholdSpec::classify(segment)?.apply(kind, &mut fields, &mut tags);
        }
    }

    for kind in ["min", "max"] {
        if let Some(segment) = segments.next().map(str::trim).filter(|s| !s.is_empty()) {
            fields.insert(kind.to_string(), normalize_number(segment)?);
        }
    }

    Ok(ParsedToken {
        label: label.to_string(),
        unit: unit.to_string(),
        fields,
        tags,
    })
}

/// Parse a `key=value key=value` directive.
///
/// Pairs that still contain unresolved macros (`$...$`), lack a `=` or have
/// an empty key are ignored.
pub fn parse_directive(directive: &str) -> HashMap<String, String> {
    directive
        .split_whitespace()
        .filter(|pair| !pair.contains('$'))
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Lazy iterator over the samples of one record
pub struct PerformanceDataIter<'a> {
    tokens: PerfTokens<'a>,
    host: String,
    service: String,
    command: String,
    time: String,
    extra_tags: HashMap<String, String>,
    extra_fields: HashMap<String, String>,
    routing: RoutingFilter,
}

impl PerformanceDataIter<'_> {
    fn empty() -> Self {
        Self {
            tokens: tokenize_perfdata(""),
            host: String::new(),
            service: String::new(),
            command: String::new(),
            time: String::new(),
            extra_tags: HashMap::new(),
            extra_fields: HashMap::new(),
            routing: RoutingFilter::all(),
        }
    }
}

impl Iterator for PerformanceDataIter<'_> {
    type Item = PerformanceSample;

    fn next(&mut self) -> Option<PerformanceSample> {
        for token in self.tokens.by_ref() {
            let parsed = match parse_token(token) {
                Ok(parsed) => parsed,
                Err(ParseError::UnknownValue(label)) => {
                    debug!(host = %self.host, "skipping unknown value for {label}");
                    continue;
                }
                Err(e) => {
                    warn!(host = %self.host, service = %self.service, "skipping perfdata token {token:?}: {e}");
                    continue;
                }
            };

            let mut tags = self.extra_tags.clone();
            tags.extend(parsed.tags);
            let mut fields = self.extra_fields.clone();
            fields.extend(parsed.fields);

            return Some(PerformanceSample {
                host: self.host.clone(),
                service: self.service.clone(),
                command: self.command.clone(),
                time: self.time.clone(),
                label: parsed.label,
                unit: parsed.unit,
                tags,
                fields,
                routing: self.routing.clone(),
            });
        }
        None
    }
}

/// Parse a record into its performance samples.
///
/// `default_filter` is used unless the record carries its own target
/// directive. With a downtime cache, samples of hosts and services that are
/// in downtime at the record's time get a `downtime=true` tag.
pub fn parse_record<'a>(
    record: &'a RawRecord,
    default_filter: &RoutingFilter,
    cache: Option<&DowntimeCache>,
) -> PerformanceDataIter<'a> {
    let Some(kind) = RecordKind::detect(record) else {
        if record.len() > 1 {
            info!("line does not match the spool scheme: {:?}", record.fields());
        }
        return PerformanceDataIter::empty();
    };

    let perfdata = record.get(&kind.perfdata_key()).unwrap_or_default();
    let host = record.get(HOSTNAME).unwrap_or_default().to_string();
    let service = match kind {
        RecordKind::Host => String::new(),
        RecordKind::Service => record.get(SERVICEDESC).unwrap_or_default().to_string(),
    };
    let command = record
        .get(&kind.command_key())
        .unwrap_or_default()
        .split('!')
        .next()
        .unwrap_or_default()
        .to_string();
    let timet = record.get(TIMET).unwrap_or_default();

    let mut extra_tags = record.get(TAG_DIRECTIVE).map(parse_directive).unwrap_or_default();
    let extra_fields = record
        .get(FIELD_DIRECTIVE)
        .map(parse_directive)
        .unwrap_or_default();

    let routing = record
        .get(TARGET_DIRECTIVE)
        .map(str::trim)
        .filter(|target| !target.is_empty() && !target.contains('$'))
        .map(RoutingFilter::new)
        .unwrap_or_else(|| default_filter.clone());

    if cache.is_some_and(|cache| cache.is_in_downtime(&host, &service, timet)) {
        extra_tags.insert("downtime".to_string(), "true".to_string());
    }

    PerformanceDataIter {
        tokens: tokenize_perfdata(perfdata),
        host,
        service,
        command,
        time: cast_seconds_to_ms(timet),
        extra_tags,
        extra_fields,
        routing,
    }
}
