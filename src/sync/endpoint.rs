//! The incremental sync engine for one (stream, location) pair.
//!
//! Walks day by day from the stored bookmark through today, requests one forecast per
//! day, normalizes it, trims it to the catalog's schema and selection, filters it against
//! the bookmark and checkpoints after every day.
//! The bookmark day itself is fetched again on every run so that late corrections to
//! that day are picked up; consumers deduplicate on the primary key.

use crate::catalog::CatalogError;
use crate::client::{Fetched, ForecastApi};
use crate::error::TapError;
use crate::streams::{BookmarkType, StreamDefinition};
use crate::sync::Tap;
use crate::transform::{prune_to_schema, transform_json, Record};
use crate::utils::{date_range, format_bookmark, parse_datetime};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::Write;

/// A parsed bookmark value, ordered according to the stream's bookmark type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Watermark {
    Datetime(DateTime<Utc>),
    Integer(i64),
}

impl Watermark {
    pub fn parse(bookmark_type: BookmarkType, value: &str) -> Option<Self> {
        match bookmark_type {
            BookmarkType::Datetime => parse_datetime(value).map(Watermark::Datetime),
            BookmarkType::Integer => value.trim().parse().ok().map(Watermark::Integer),
        }
    }

    /// Reads a watermark from a record field. `None` for null, empty or unparseable values.
    pub fn from_field(bookmark_type: BookmarkType, value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Self::parse(bookmark_type, s),
            Value::Number(n) if bookmark_type == BookmarkType::Integer => {
                n.as_i64().map(Watermark::Integer)
            }
            _ => None,
        }
    }

    pub fn to_bookmark(self) -> String {
        match self {
            Watermark::Datetime(dt) => format_bookmark(dt),
            Watermark::Integer(i) => i.to_string(),
        }
    }
}

impl<C: ForecastApi, W: Write> Tap<C, W> {
    /// Syncs one location of one stream.
    ///
    /// `url` is the fully rendered request URL with a `<forecast_date>` placeholder. Returns
    /// the number of records emitted. An empty API response ends the walk for this location
    /// early without failing the run.
    pub async fn sync_endpoint(
        &mut self,
        stream: &StreamDefinition,
        url: &str,
        location: &str,
    ) -> Result<u64, TapError> {
        let bookmark_field = stream.bookmark_field();
        let last_value = self
            .state
            .get_bookmark(stream.name, location, &self.config.start_date);
        let invalid_bookmark = || TapError::InvalidBookmark {
            stream: stream.name.to_string(),
            location: location.to_string(),
            value: last_value.clone(),
        };

        // The date walk always runs on calendar days, whatever the bookmark type.
        let start_day = parse_datetime(&last_value)
            .ok_or_else(invalid_bookmark)?
            .date_naive();
        let last_watermark =
            Watermark::parse(stream.bookmark_type, &last_value).ok_or_else(invalid_bookmark)?;
        let mut max_watermark = last_watermark;

        let today = self.now().date_naive();
        let mut total_records = 0;
        let mut removed_fields = BTreeSet::new();

        for bookmark_date in date_range(start_day, today) {
            info!(
                "Stream: {}, Syncing bookmark_date = {}",
                stream.name, bookmark_date
            );
            let forecast_url =
                url.replace("<forecast_date>", &format!("{bookmark_date}T00:00:00"));
            info!("URL for Stream {}: {}", stream.name, forecast_url);

            let payload = match self.client.get(&forecast_url).await? {
                Fetched::Payload(payload) => payload,
                Fetched::Empty => {
                    info!(
                        "Stream {}, location: {}, no data for {}, stopping",
                        stream.name, location, bookmark_date
                    );
                    break;
                }
            };
            let time_extracted = self.now();
            let mut record = transform_json(payload, time_extracted.timestamp())?;
            removed_fields.extend(self.filter_record(stream, &mut record)?);

            let record_count = self.process_record(
                stream,
                &record,
                time_extracted,
                bookmark_field,
                &mut max_watermark,
                last_watermark,
            )?;
            total_records += record_count;
            info!(
                "Stream {}, location: {}, batch processed {} records",
                stream.name, location, record_count
            );

            if bookmark_field.is_some() {
                self.state.write_bookmark(
                    &mut self.emitter,
                    stream.name,
                    location,
                    &max_watermark.to_bookmark(),
                )?;
            }
        }

        if !removed_fields.is_empty() {
            warn!(
                "Stream {}, location: {}, removed fields outside the schema or selection: {:?}",
                stream.name, location, removed_fields
            );
        }
        Ok(total_records)
    }

    /// Drops the fields of `record` that the stream's catalog schema does not declare or
    /// its metadata deselects. Returns the removed field paths.
    fn filter_record(
        &self,
        stream: &StreamDefinition,
        record: &mut Record,
    ) -> Result<BTreeSet<String>, TapError> {
        let entry = self
            .catalog
            .get_stream(stream.name)
            .ok_or_else(|| CatalogError::MissingStream(stream.name.to_string()))?;
        let mut removed = prune_to_schema(record, &entry.schema);
        removed.extend(entry.apply_selection(record));
        Ok(removed)
    }

    /// Advances `max_watermark` and emits `record` if it is not older than `last_watermark`.
    /// Records without the bookmark field are always emitted. Returns the number emitted.
    fn process_record(
        &mut self,
        stream: &StreamDefinition,
        record: &Record,
        time_extracted: DateTime<Utc>,
        bookmark_field: Option<&str>,
        max_watermark: &mut Watermark,
        last_watermark: Watermark,
    ) -> Result<u64, TapError> {
        let Some(field_value) = bookmark_field.and_then(|field| record.get(field)) else {
            self.emitter
                .write_record(stream.name, record, time_extracted)?;
            return Ok(1);
        };

        let Some(record_watermark) = Watermark::from_field(stream.bookmark_type, field_value)
        else {
            warn!(
                "Stream {}: skipping record with unusable bookmark value {}",
                stream.name, field_value
            );
            return Ok(0);
        };

        if record_watermark > *max_watermark {
            *max_watermark = record_watermark;
        }
        if record_watermark >= last_watermark {
            self.emitter
                .write_record(stream.name, record, time_extracted)?;
            return Ok(1);
        }
        Ok(0)
    }
}
