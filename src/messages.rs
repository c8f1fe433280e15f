//! Line-delimited JSON output: one `SCHEMA`, `RECORD` or `STATE` message per line.

use crate::state::SyncState;
use crate::transform::Record;
use chrono::{DateTime, SecondsFormat, Utc};
use log::error;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Failed to write {kind} message for stream {stream}")]
    Io {
        kind: &'static str,
        stream: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize {kind} message for stream {stream}")]
    Serialize {
        kind: &'static str,
        stream: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message<'a> {
    Schema {
        stream: &'a str,
        schema: &'a Value,
        key_properties: &'a [String],
    },
    Record {
        stream: &'a str,
        record: &'a Record,
        time_extracted: String,
    },
    State {
        value: &'a SyncState,
    },
}

impl Message<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Message::Schema { .. } => "schema",
            Message::Record { .. } => "record",
            Message::State { .. } => "state",
        }
    }

    fn stream(&self) -> &str {
        match self {
            Message::Schema { stream, .. } | Message::Record { stream, .. } => stream,
            Message::State { value } => value.currently_syncing.as_deref().unwrap_or("-"),
        }
    }
}

/// Writes messages to any [`Write`] sink, flushing after every line.
pub struct Emitter<W: Write> {
    out: W,
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn write_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
    ) -> Result<(), EmitError> {
        self.write(&Message::Schema {
            stream,
            schema,
            key_properties,
        })
    }

    pub fn write_record(
        &mut self,
        stream: &str,
        record: &Record,
        time_extracted: DateTime<Utc>,
    ) -> Result<(), EmitError> {
        self.write(&Message::Record {
            stream,
            record,
            time_extracted: time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true),
        })
        .inspect_err(|_| error!("record: {}", Value::Object(record.clone())))
    }

    pub fn write_state(&mut self, state: &SyncState) -> Result<(), EmitError> {
        self.write(&Message::State { value: state })
    }

    fn write(&mut self, message: &Message<'_>) -> Result<(), EmitError> {
        let kind = message.kind();
        let line = serde_json::to_string(message).map_err(|e| {
            error!("Serialization error writing {} for: {}", kind, message.stream());
            EmitError::Serialize {
                kind,
                stream: message.stream().to_string(),
                source: e,
            }
        })?;

        writeln!(self.out, "{line}")
            .and_then(|_| self.out.flush())
            .map_err(|e| {
                error!("OS Error writing {} for: {}", kind, message.stream());
                EmitError::Io {
                    kind,
                    stream: message.stream().to_string(),
                    source: e,
                }
            })
    }
}
