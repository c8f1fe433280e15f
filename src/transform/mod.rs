//! Turns a raw Dark Sky forecast document into a single flat record.
//!
//! Keys are converted to snake_case at every depth, the time span covered by the daily
//! and hourly datapoints is attached, and the one-element `daily.data` array is collapsed
//! into the `daily` object itself.

use chrono::DateTime;
use chrono_tz::Tz;
use log::warn;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use thiserror::Error;

/// A normalized forecast record.
pub type Record = Map<String, Value>;

const TIME_FRAMES: [&str; 2] = ["daily", "hourly"];

static CAPITALIZED_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"));
static LOWER_UPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Forecast payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("Unknown timezone '{0}'")]
    UnknownTimezone(String),
}

/// Time span of the datapoints in a forecast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub start_time: i64,
    pub end_time: i64,
    /// `start_time` as a calendar date in the forecast's own timezone.
    pub local_date: String,
}

/// Converts a camelCase or mixed-case name to snake_case.
///
/// ```
/// use darksky_tap::convert_key;
///
/// assert_eq!(convert_key("apparentTemperatureHigh"), "apparent_temperature_high");
/// assert_eq!(convert_key("uvIndexTime"), "uv_index_time");
/// assert_eq!(convert_key("latitude"), "latitude");
/// ```
pub fn convert_key(name: &str) -> String {
    let split_words = CAPITALIZED_WORD.replace_all(name, "${1}_${2}");
    LOWER_UPPER
        .replace_all(&split_words, "${1}_${2}")
        .to_lowercase()
}

/// Recursively converts every object key in `value` to snake_case.
///
/// Arrays stay arrays, objects stay objects and scalars are returned unchanged. When two
/// keys of one object convert to the same name, the one that comes later in the map wins.
///
/// # Examples
///
/// ```
/// use darksky_tap::convert_json;
/// use serde_json::json;
///
/// let converted = convert_json(json!({"hourly": {"data": [{"apparentTemperature": 14.2}]}}));
/// assert_eq!(converted, json!({"hourly": {"data": [{"apparent_temperature": 14.2}]}}));
/// ```
pub fn convert_json(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(convert_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(convert_json).collect()),
        scalar => scalar,
    }
}

fn convert_object(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        let converted = convert_key(&key);
        if out.contains_key(&converted) {
            warn!("Key '{}' overwrites an earlier value for '{}'", key, converted);
        }
        out.insert(converted, convert_json(value));
    }
    out
}

fn datapoint_time(datapoint: &Value) -> i64 {
    match datapoint.get("time") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Scans the `daily` and `hourly` datapoints for the earliest and latest `time`.
///
/// `start_time` starts out at `now` and `end_time` at 0, so a forecast without any
/// datapoints yields `start_time == now` and `end_time == 0`.
pub fn min_max_times(record: &Record, now: i64) -> Result<TimeRange, TransformError> {
    let mut max_time = 0;
    let mut min_time = now;

    for frame in TIME_FRAMES {
        let datapoints = record
            .get(frame)
            .and_then(|f| f.get("data"))
            .and_then(Value::as_array);
        for datapoint in datapoints.into_iter().flatten() {
            let time = datapoint_time(datapoint);
            max_time = max_time.max(time);
            min_time = min_time.min(time);
        }
    }

    let time_zone = record
        .get("timezone")
        .and_then(Value::as_str)
        .unwrap_or("UTC");
    let tz: Tz = time_zone
        .parse()
        .map_err(|_| TransformError::UnknownTimezone(time_zone.to_string()))?;
    let utc = DateTime::from_timestamp(min_time, 0)
        .ok_or(TransformError::InvalidTimestamp(min_time))?;
    let local_date = utc.with_timezone(&tz).format("%Y-%m-%d").to_string();

    Ok(TimeRange {
        start_time: min_time,
        end_time: max_time,
        local_date,
    })
}

/// Replaces `daily` with its first datapoint when `daily.data` is a non-empty array.
pub fn denest_daily(record: &mut Record) {
    let first = record
        .get_mut("daily")
        .and_then(|daily| daily.get_mut("data"))
        .and_then(Value::as_array_mut)
        .filter(|data| !data.is_empty())
        .map(|data| data.swap_remove(0));

    if let Some(first) = first {
        record.insert("daily".to_string(), first);
    }
}

/// Runs the full normalization on one API response.
///
/// # Arguments
///
/// * `payload` - The raw forecast document as returned by the API.
/// * `now` - Unix seconds used as the `start_time` of a forecast without datapoints.
///
/// # Returns
///
/// Exactly one record with snake_case keys, the derived `start_time`, `end_time`,
/// `local_date` and `forecast_date` fields, and `daily` collapsed to its first datapoint.
///
/// # Errors
///
/// Fails when the payload is not an object, a timestamp is out of range, or the payload
/// names a timezone that does not exist.
pub fn transform_json(payload: Value, now: i64) -> Result<Record, TransformError> {
    let mut record = match convert_json(payload) {
        Value::Object(map) => map,
        other => return Err(TransformError::NotAnObject(json_type(&other))),
    };

    let range = min_max_times(&record, now)?;
    let forecast_date = format!("{}T00:00:00Z", range.local_date);
    record.insert("start_time".to_string(), range.start_time.into());
    record.insert("end_time".to_string(), range.end_time.into());
    record.insert("local_date".to_string(), range.local_date.into());
    record.insert("forecast_date".to_string(), forecast_date.into());

    denest_daily(&mut record);
    Ok(record)
}

/// Drops every field that `schema` does not declare, at any depth.
///
/// Objects are checked against their schema's `properties` and array items against
/// `items`. Values whose schema declares neither are kept as they are.
///
/// # Returns
///
/// The dotted paths of the removed fields, e.g. `alerts` or `hourly.data.storm_bearing`.
pub fn prune_to_schema(record: &mut Record, schema: &Value) -> BTreeSet<String> {
    let mut removed = BTreeSet::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        prune_object(record, properties, "", &mut removed);
    }
    removed
}

fn prune_object(
    object: &mut Map<String, Value>,
    properties: &Map<String, Value>,
    path: &str,
    removed: &mut BTreeSet<String>,
) {
    object.retain(|key, value| {
        let field_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        match properties.get(key) {
            Some(field_schema) => {
                prune_value(value, field_schema, &field_path, removed);
                true
            }
            None => {
                removed.insert(field_path);
                false
            }
        }
    });
}

fn prune_value(value: &mut Value, schema: &Value, path: &str, removed: &mut BTreeSet<String>) {
    match value {
        Value::Object(object) => {
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                prune_object(object, properties, path, removed);
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    prune_value(item, item_schema, path, removed);
                }
            }
        }
        _ => {}
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
