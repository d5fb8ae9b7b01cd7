//! Livestatus connector
//!
//! A query is written to a fresh TCP or unix socket connection. The response
//! is read line by line until the peer closes, an empty line arrives or a read
//! times out. Every line is a `;` separated CSV row.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use super::LivestatusError;

/// Column separator of livestatus CSV output
pub const FIELD_SEPARATOR: char = ';';

/// Placeholder that [`add_time_cutoff`] replaces
pub const CUTOFF_PLACEHOLDER: &str = "%d";

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Tcp,
    /// Unix domain socket
    #[serde(alias = "unix")]
    File,
}

#[derive(Debug, Clone)]
pub struct Connector {
    pub address: String,
    pub connection_type: ConnectionType,
    read_timeout: Duration,
}

impl Connector {
    pub fn new(address: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self {
            address: address.into(),
            connection_type,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Run one query and stream every response row into `rows`.
    ///
    /// A read timeout or read error ends the response early with a warning,
    /// rows received until then are kept.
    #[instrument(skip(self, query, rows), fields(address = %self.address))]
    pub async fn query(
        &self,
        query: &str,
        rows: mpsc::Sender<Vec<String>>,
    ) -> Result<(), LivestatusError> {
        debug!("livestatus query: {query:?}");

        match self.connection_type {
            ConnectionType::Tcp => {
                let stream = TcpStream::connect(&self.address)
                    .await
                    .map_err(|source| self.connect_error(source))?;
                self.exchange(stream, query, rows).await
            }
            #[cfg(unix)]
            ConnectionType::File => {
                let stream = tokio::net::UnixStream::connect(&self.address)
                    .await
                    .map_err(|source| self.connect_error(source))?;
                self.exchange(stream, query, rows).await
            }
            #[cfg(not(unix))]
            ConnectionType::File => Err(LivestatusError::UnsupportedConnection(
                self.connection_type,
            )),
        }
    }

    /// Run one query and collect all rows
    pub async fn query_rows(&self, query: &str) -> Result<Vec<Vec<String>>, LivestatusError> {
        let (tx, mut rx) = mpsc::channel(64);
        let collect = async {
            let mut rows = Vec::new();
            while let Some(row) = rx.recv().await {
                rows.push(row);
            }
            rows
        };

        let (result, rows) = tokio::join!(self.query(query, tx), collect);
        result.map(|()| rows)
    }

    fn connect_error(&self, source: std::io::Error) -> LivestatusError {
        LivestatusError::Connect {
            address: self.address.clone(),
            source,
        }
    }

    async fn exchange<S>(
        &self,
        mut stream: S,
        query: &str,
        rows: mpsc::Sender<Vec<String>>,
    ) -> Result<(), LivestatusError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream
            .write_all(query.as_bytes())
            .await
            .map_err(LivestatusError::Write)?;
        stream.flush().await.map_err(LivestatusError::Write)?;

        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf);
            match tokio::time::timeout(self.read_timeout, read).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("failed to read livestatus response: {e}");
                    break;
                }
                Err(_) => {
                    warn!(
                        "livestatus did not answer within {:?}, finishing query",
                        self.read_timeout
                    );
                    break;
                }
            }

            // non UTF-8 bytes in comments or authors must not end the response
            let line = String::from_utf8_lossy(trim_line_end(&buf));
            if line.is_empty() {
                break;
            }

            trace!("livestatus line {line:?}");
            rows.send(parse_row(&line))
                .await
                .map_err(|_| LivestatusError::ReceiverClosed)?;
        }

        Ok(())
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Split one CSV row on `;`.
///
/// Quoting is lenient: a field that starts with `"` is quoted, `""` inside
/// it is an escaped quote, and a stray quote is kept as a literal character.
pub fn parse_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut at_field_start = true;
    let mut quoted = false;

    while let Some(c) = chars.next() {
        if quoted {
            if c == '"' {
                match chars.peek() {
                    Some('"') => {
                        field.push('"');
                        chars.next();
                    }
                    Some(&FIELD_SEPARATOR) | None => quoted = false,
                    Some(_) => field.push('"'),
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            FIELD_SEPARATOR => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
                continue;
            }
            '"' if at_field_start => quoted = true,
            c => field.push(c),
        }
        at_field_start = false;
    }

    fields.push(field);
    fields
}

/// Append extra filter clauses to a query.
///
/// Clauses are trimmed and a literal `\\n` inside a clause becomes a line
/// break, so one configured clause may carry several header lines.
pub fn build_query(base: &str, filters: &[String]) -> String {
    if filters.is_empty() {
        return base.to_string();
    }

    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| filter.trim().replace("\\\\n", "\n"))
        .filter(|filter| !filter.is_empty())
        .collect();

    format!("{}\n{}\n\n", base.trim(), clauses.join("\n").trim())
}

/// Insert the epoch seconds cutoff into a parametrised query
pub fn add_time_cutoff(query: &str, cutoff: i64) -> String {
    query.replace(CUTOFF_PLACEHOLDER, &cutoff.to_string())
}

/// Oldest timestamp worth asking for: one and a half intervals back
pub fn query_cutoff(now: i64, interval: Duration) -> i64 {
    let lookback = interval.as_secs() as i64 * 3 / 2;
    now - lookback
}
