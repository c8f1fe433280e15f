use crate::catalog::Catalog;
use crate::client::error::DarkskyError;
use crate::client::{Fetched, ForecastApi};
use crate::config::Config;
use crate::messages::Emitter;
use crate::sync::Tap;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use std::sync::Mutex;

type Responder = Box<dyn Fn(NaiveDate) -> Result<Fetched, DarkskyError>>;

/// In-memory [`ForecastApi`] that answers by requested date and records every URL.
pub(crate) struct ScriptedClient {
    respond: Responder,
    empty: Vec<(Option<String>, NaiveDate)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub(crate) fn with(
        respond: impl Fn(NaiveDate) -> Result<Fetched, DarkskyError> + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            empty: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers each request with the forecast for the requested date.
    pub(crate) fn forecasts() -> Self {
        Self::with(|date| Ok(Fetched::Payload(forecast_payload(date))))
    }

    pub(crate) fn empty_on(mut self, date: NaiveDate) -> Self {
        self.empty.push((None, date));
        self
    }

    /// Answers with an empty body for `date` at `location` only.
    pub(crate) fn empty_at(mut self, location: &str, date: NaiveDate) -> Self {
        self.empty.push((Some(location.to_string()), date));
        self
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn dates_requested(&self) -> Vec<NaiveDate> {
        self.urls().iter().filter_map(|url| requested_date(url)).collect()
    }

    pub(crate) fn requests_for(&self, location: &str) -> usize {
        self.urls().iter().filter(|url| url.contains(location)).count()
    }
}

impl ForecastApi for ScriptedClient {
    fn base_url(&self) -> &str {
        "https://api.darksky.net"
    }

    async fn get(&self, url: &str) -> Result<Fetched, DarkskyError> {
        self.calls.lock().unwrap().push(url.to_string());
        let date = requested_date(url).expect("url carries a forecast date");
        let is_empty = self.empty.iter().any(|(location, day)| {
            *day == date && location.as_ref().is_none_or(|l| url.contains(l.as_str()))
        });
        if is_empty {
            return Ok(Fetched::Empty);
        }
        (self.respond)(date)
    }
}

fn requested_date(url: &str) -> Option<NaiveDate> {
    let end = url.find("T00:00:00")?;
    let start = end.checked_sub(10)?;
    NaiveDate::parse_from_str(&url[start..end], "%Y-%m-%d").ok()
}

/// A raw Dark Sky response for `date` in UTC, keys in the API's camelCase.
pub(crate) fn forecast_payload(date: NaiveDate) -> Value {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
    json!({
        "latitude": 38.8,
        "longitude": -105.0,
        "timezone": "UTC",
        "offset": 0,
        "hourly": {
            "summary": "Partly cloudy",
            "data": [
                {"time": midnight, "temperature": 28.1, "apparentTemperature": 22.0},
                {"time": midnight + 3600, "temperature": 27.4, "apparentTemperature": 21.2}
            ]
        },
        "daily": {
            "data": [{
                "time": midnight,
                "summary": "Partly cloudy throughout the day.",
                "temperatureHigh": 41.2,
                "temperatureLow": 19.8,
                "precipProbability": 0.1
            }]
        },
        "flags": {"sources": ["cmc"], "nearest-station": 2.1, "units": "us"}
    })
}

pub(crate) fn tap(
    client: ScriptedClient,
    start_date: &str,
    location_list: &str,
    now: DateTime<Utc>,
) -> Tap<ScriptedClient, Vec<u8>> {
    let config = Config {
        secret_key: "test-key".to_string(),
        start_date: start_date.to_string(),
        user_agent: None,
        language: "en".to_string(),
        units: "auto".to_string(),
        location_list: location_list.to_string(),
    };
    Tap::builder()
        .client(client)
        .config(config)
        .catalog(Catalog::discover().unwrap().select_all())
        .emitter(Emitter::new(Vec::new()))
        .now(now)
        .build()
}

pub(crate) fn messages_of(emitter: Emitter<Vec<u8>>) -> Vec<Value> {
    String::from_utf8(emitter.into_inner())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
