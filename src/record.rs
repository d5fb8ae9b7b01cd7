//! Raw spool records
//!
//! One spool or gearman line is split on the record separator (a tab for
//! Nagios spool files) and every field once more on the key/value separator
//! (`::` by default).

use std::collections::HashMap;

/// Separator between fields of a spool line
pub const RECORD_SEPARATOR: &str = "\t";

/// Separator between a field name and its value
pub const KEY_VALUE_SEPARATOR: &str = "::";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: HashMap<String, String>,
}

impl RawRecord {
    /// Split a line into a record. Fields without the key/value separator are
    /// dropped, duplicate keys keep the last value.
    pub fn parse(line: &str, record_separator: &str, kv_separator: &str) -> Self {
        let fields = line
            .split(record_separator)
            .filter_map(|field| field.split_once(kv_separator))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Self { fields }
    }

    /// Parse a Nagios spool file line
    pub fn from_spool_line(line: &str) -> Self {
        Self::parse(line, RECORD_SEPARATOR, KEY_VALUE_SEPARATOR)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }
}

impl FromIterator<(String, String)> for RawRecord {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
