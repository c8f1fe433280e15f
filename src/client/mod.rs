//! Access to the Dark Sky forecast API.
//!
//! The sync engine only depends on the [`ForecastApi`] trait;
//! [`DarkskyClient`](darksky_client::DarkskyClient) is the HTTP implementation with credential checking, rate limiting and retries.

pub mod darksky_client;
pub mod error;
pub mod rate_limit;
pub mod retry;

use crate::client::error::DarkskyError;
use serde_json::Value;

/// Outcome of a successful request.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// The API returned a non-empty JSON document.
    Payload(Value),
    /// The API answered but had nothing to say: an empty body or a falsy document such as
    /// `null`, `false`, `0`, `""`, `[]` or `{}`.
    Empty,
}

impl Fetched {
    pub(crate) fn from_value(value: Value) -> Self {
        let is_empty = match &value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
        };
        if is_empty {
            Fetched::Empty
        } else {
            Fetched::Payload(value)
        }
    }
}

/// The capability the sync engine needs from the HTTP layer.
#[allow(async_fn_in_trait)]
pub trait ForecastApi {
    /// Base URL that stream paths are appended to.
    fn base_url(&self) -> &str;

    /// Issues a GET for `url`. The URL may still contain the `<secret_key>` placeholder.
    async fn get(&self, url: &str) -> Result<Fetched, DarkskyError>;
}
