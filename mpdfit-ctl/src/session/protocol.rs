//! MPD line protocol codec
//!
//! Requests are single lines. Responses are `key: value` lines terminated by
//! `OK`, or a single `ACK [error@index] {command} message` line. A command
//! batch is written as `command_list_ok_begin`, the commands, and
//! `command_list_end`; the daemon answers `list_OK` per command and a final
//! `OK`, or stops at the first failing command with an `ACK`.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use mpdfit_common::{Error, Result};

use crate::track::{QueuedTrack, Track};

/// One `key: value` response line
pub type Pair = (String, String);

/// Framed connection to one daemon
pub(crate) struct Connection<S> {
    stream: BufReader<S>,
    host: String,
    version: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Read the `OK MPD <version>` greeting
    pub async fn handshake(stream: S, host: &str) -> Result<Self> {
        let mut conn = Self {
            stream: BufReader::new(stream),
            host: host.to_string(),
            version: String::new(),
        };
        let greeting = conn.read_line().await?;
        conn.version = parse_greeting(&greeting)?;
        trace!(host, version = %conn.version, "Daemon greeting");
        Ok(conn)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Send one command and collect its response pairs
    pub async fn request(&mut self, command: &str) -> Result<Vec<Pair>> {
        trace!(host = %self.host, command, ">>");
        self.write(&format!("{}\n", command)).await?;

        let mut pairs = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(pairs);
            }
            if line.starts_with("ACK ") {
                return Err(parse_ack(&line, command));
            }
            match parse_pair(&line) {
                Some(pair) => pairs.push(pair),
                None => {
                    return Err(Error::Protocol(format!(
                        "unexpected line from {} after `{}`: {:?}",
                        self.host, command, line
                    )))
                }
            }
        }
    }

    /// Send `commands` as one command list and wait for every `list_OK`
    pub async fn request_list(&mut self, commands: &[String]) -> Result<()> {
        let mut payload = String::from("command_list_ok_begin\n");
        for command in commands {
            trace!(host = %self.host, command = %command, ">> (batched)");
            payload.push_str(command);
            payload.push('\n');
        }
        payload.push_str("command_list_end\n");
        self.write(&payload).await?;

        let mut acknowledged = 0usize;
        loop {
            let line = self.read_line().await?;
            if line == "list_OK" {
                acknowledged += 1;
            } else if line == "OK" {
                if acknowledged != commands.len() {
                    return Err(Error::Protocol(format!(
                        "command batch on {} acknowledged {} of {} commands",
                        self.host,
                        acknowledged,
                        commands.len()
                    )));
                }
                return Ok(());
            } else if line.starts_with("ACK ") {
                let failed = commands.get(acknowledged).map(String::as_str).unwrap_or("command_list_end");
                return Err(parse_ack(&line, failed));
            } else if parse_pair(&line).is_none() {
                return Err(Error::Protocol(format!(
                    "unexpected line from {} in command batch: {:?}",
                    self.host, line
                )));
            }
        }
    }

    /// Say goodbye and shut the write half
    pub async fn close(&mut self) -> Result<()> {
        self.write("close\n").await?;
        self.stream
            .shutdown()
            .await
            .map_err(|e| Error::connection(&self.host, e))
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        self.stream
            .write_all(data.as_bytes())
            .await
            .map_err(|e| Error::connection(&self.host, e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::connection(&self.host, e))
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .await
            .map_err(|e| Error::connection(&self.host, e))?;
        if read == 0 {
            return Err(Error::connection(&self.host, "connection closed by daemon"));
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        trace!(host = %self.host, line = %line, "<<");
        Ok(line)
    }
}

/// Quote a command argument
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Split `key: value`
pub fn parse_pair(line: &str) -> Option<Pair> {
    let (key, value) = line.split_once(": ")?;
    if key.is_empty() || key.contains(' ') {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

fn parse_greeting(line: &str) -> Result<String> {
    line.strip_prefix("OK MPD ")
        .map(|version| version.trim().to_string())
        .ok_or_else(|| Error::Protocol(format!("unexpected greeting: {:?}", line)))
}

/// Turn `ACK [50@0] {play} No such song` into [`Error::Ack`]
fn parse_ack(line: &str, sent: &str) -> Error {
    let rest = line.strip_prefix("ACK ").unwrap_or(line);
    let (command, message) = match (rest.find('{'), rest.find('}')) {
        (Some(open), Some(close)) if open < close => {
            let command = &rest[open + 1..close];
            let message = rest[close + 1..].trim();
            (command, message)
        }
        _ => ("", rest.trim()),
    };
    let command = if command.is_empty() {
        sent.split_whitespace().next().unwrap_or(sent)
    } else {
        command
    };
    Error::Ack {
        command: command.to_string(),
        message: message.to_string(),
    }
}

/// Group a flat response into records, each starting at `first_key`
pub fn split_records(pairs: Vec<Pair>, first_key: &str) -> Vec<Vec<Pair>> {
    let mut records: Vec<Vec<Pair>> = Vec::new();
    for pair in pairs {
        if pair.0 == first_key || records.is_empty() {
            records.push(Vec::new());
        }
        if let Some(record) = records.last_mut() {
            record.push(pair);
        }
    }
    records.retain(|record| record.iter().any(|(key, _)| key == first_key));
    records
}

fn field<'a>(record: &'a [Pair], key: &str) -> Option<&'a str> {
    record
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, value)| value.as_str())
}

/// Duration in whole seconds; unreadable values become 0 so the pool drops them
fn record_duration(record: &[Pair]) -> i64 {
    if let Some(time) = field(record, "Time") {
        if let Ok(secs) = time.trim().parse::<i64>() {
            return secs;
        }
    }
    field(record, "duration")
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .map(|d| d.round() as i64)
        .unwrap_or(0)
}

/// Track from a `file:` record
pub fn parse_track(record: &[Pair]) -> Option<Track> {
    let path = field(record, "file")?;
    Some(Track::new(path, record_duration(record)))
}

/// Queue entry from a `playlistinfo` record
pub fn parse_queue_entry(record: &[Pair]) -> Option<QueuedTrack> {
    let track = parse_track(record)?;
    let id = field(record, "Id")?.parse().ok()?;
    let position = field(record, "Pos")?.parse().ok()?;
    Some(QueuedTrack {
        id,
        position,
        track,
    })
}
