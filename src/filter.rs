//! Line filters
//!
//! Spool lines and livestatus rows can be restricted with regular expression
//! terms. An empty filter lets everything through.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::record::RawRecord;

#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    line_terms: Vec<Regex>,
    field_terms: HashMap<String, Vec<Regex>>,
}

fn compile_terms<'a>(terms: impl IntoIterator<Item = &'a String>) -> Vec<Regex> {
    terms
        .into_iter()
        .filter_map(|term| match Regex::new(term) {
            Ok(regex) => {
                debug!("compiled filter term {term}");
                Some(regex)
            }
            Err(e) => {
                warn!("could not compile filter term {term}: {e}");
                None
            }
        })
        .collect()
}

impl LineFilter {
    /// Filter on whole lines only
    pub fn new(line_terms: &[String]) -> Self {
        Self::with_fields(line_terms, &HashMap::new())
    }

    /// Filter on whole lines and on single record fields
    pub fn with_fields(line_terms: &[String], field_terms: &HashMap<String, Vec<String>>) -> Self {
        let field_terms = field_terms
            .iter()
            .map(|(field, terms)| (field.clone(), compile_terms(terms)))
            .filter(|(_, terms)| !terms.is_empty())
            .collect();

        Self {
            line_terms: compile_terms(line_terms),
            field_terms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line_terms.is_empty() && self.field_terms.is_empty()
    }

    /// True if no line terms are configured or any of them matches
    pub fn test_line(&self, line: &str) -> bool {
        self.line_terms.is_empty() || self.line_terms.iter().any(|term| term.is_match(line))
    }

    /// True if no field terms are configured or any configured field matches
    pub fn test_fields(&self, record: &RawRecord) -> bool {
        if self.field_terms.is_empty() {
            return true;
        }

        self.field_terms.iter().any(|(field, terms)| match record.get(field) {
            Some(value) => terms.iter().any(|term| term.is_match(value)),
            None => {
                debug!("no field {field} in record for field filter");
                false
            }
        })
    }

    /// Combined check used for spool and gearman lines
    pub fn accepts(&self, line: &str, record: &RawRecord) -> bool {
        self.test_line(line) && self.test_fields(record)
    }

    /// Check a livestatus row, joined with the field separator
    pub fn accepts_row(&self, row: &[String], separator: &str) -> bool {
        self.test_line(&row.join(separator))
    }
}
