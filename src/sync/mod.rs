//! Stream orchestration: walks the selected streams and configured locations and hands
//! each (stream, location) pair to the incremental sync engine in [`endpoint`].

pub mod endpoint;
#[cfg(test)]
mod test_support;

use crate::catalog::{Catalog, CatalogEntry, CatalogError};
use crate::client::ForecastApi;
use crate::config::Config;
use crate::error::TapError;
use crate::messages::Emitter;
use crate::state::StateStore;
use crate::streams::{StreamDefinition, STREAMS};
use bon::bon;
use chrono::{DateTime, Utc};
use log::info;
use std::io::Write;

/// One tap run: a client, the run's configuration and catalog, the checkpoint state and
/// the output stream.
///
/// Built with [`Tap::builder()`]. Only `state` and `now` are optional.
///
/// # Examples
///
/// ```rust,no_run
/// # use darksky_tap::{Catalog, Config, DarkskyClient, Emitter, StateStore, Tap, TapError};
/// # async fn run(config: Config) -> Result<(), TapError> {
/// let client = DarkskyClient::builder()
///     .secret_key(config.secret_key.clone())
///     .build();
/// let mut tap = Tap::builder()
///     .client(client)
///     .config(config)
///     .catalog(Catalog::discover()?.select_all())
///     .state(StateStore::load("state.json".as_ref())?)
///     .emitter(Emitter::new(std::io::stdout()))
///     .build();
/// let records = tap.sync().await?;
/// # Ok(())
/// # }
/// ```
pub struct Tap<C, W: Write> {
    client: C,
    config: Config,
    catalog: Catalog,
    state: StateStore,
    emitter: Emitter<W>,
    now: Option<DateTime<Utc>>,
}

#[bon]
impl<C: ForecastApi, W: Write> Tap<C, W> {
    /// Creates a tap for one run.
    ///
    /// # Arguments
    ///
    /// * `client` - The [`ForecastApi`] implementation requests go through.
    /// * `config` - Start date, locations, language and units.
    /// * `catalog` - Streams and fields to sync. Only selected streams run.
    /// * `state` - Bookmarks from a previous run. Defaults to an empty in-memory state.
    /// * `emitter` - Where `SCHEMA`, `RECORD` and `STATE` lines are written.
    /// * `now` - Pins the clock for the run. The current time is used when it is not set.
    #[builder]
    pub fn new(
        client: C,
        config: Config,
        catalog: Catalog,
        #[builder(default)] state: StateStore,
        emitter: Emitter<W>,
        now: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            client,
            config,
            catalog,
            state,
            emitter,
            now,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn into_parts(self) -> (StateStore, Emitter<W>) {
        (self.state, self.emitter)
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Syncs every selected stream for every configured location.
    ///
    /// Streams run in definition order, starting with the one a previous run was
    /// interrupted in. Each stream emits its `SCHEMA` once, then every location is walked
    /// from its bookmark through today.
    ///
    /// # Returns
    ///
    /// The number of records emitted. `Ok(0)` when nothing is selected.
    ///
    /// # Errors
    ///
    /// Any API, transform, state or output error aborts the run. The state keeps every
    /// bookmark written up to the last completed date and still names the stream that
    /// was in flight.
    pub async fn sync(&mut self) -> Result<u64, TapError> {
        let last_stream = self.state.currently_syncing().map(str::to_string);
        info!("last/currently syncing stream: {:?}", last_stream);

        let selected: Vec<String> = self
            .catalog
            .selected_streams()
            .into_iter()
            .map(str::to_string)
            .collect();
        info!("selected_streams: {:?}", selected);
        if selected.is_empty() {
            return Ok(0);
        }

        let locations = self.config.locations();
        let mut total = 0;

        for stream in resume_order(STREAMS, last_stream.as_deref()) {
            if !selected.iter().any(|name| name == stream.name) {
                continue;
            }
            info!("START Syncing: {}", stream.name);
            self.state
                .set_currently_syncing(&mut self.emitter, Some(stream.name))?;

            let entry = self
                .catalog
                .get_stream(stream.name)
                .ok_or_else(|| CatalogError::MissingStream(stream.name.to_string()))?;
            self.emitter
                .write_schema(stream.name, &entry.schema, &entry.key_properties)?;

            let exclusions = exclusions_list(stream, entry);
            let query = stream.render_query(&self.config.language, &self.config.units, &exclusions);

            let mut stream_total = 0;
            for location in &locations {
                let url = stream.render_url(self.client.base_url(), location, &query);
                let location_total = self.sync_endpoint(stream, &url, location).await?;

                self.state.set_currently_syncing(&mut self.emitter, None)?;
                info!(
                    "FINISHED Syncing: {}, location: {}, total_records: {}",
                    stream.name, location, location_total
                );
                stream_total += location_total;
            }

            info!(
                "FINISHED Syncing: {}, total_records: {}",
                stream.name, stream_total
            );
            total += stream_total;
        }

        Ok(total)
    }
}

/// Comma-separated sections to exclude from the API response.
///
/// Base exclusions are always present; each optional section is appended unless the
/// catalog explicitly selects it.
pub fn exclusions_list(stream: &StreamDefinition, entry: &CatalogEntry) -> String {
    stream
        .base_exclusions
        .iter()
        .chain(
            stream
                .optional_sections
                .iter()
                .filter(|section| !entry.is_property_selected(section)),
        )
        .copied()
        .collect::<Vec<_>>()
        .join(",")
}

/// Stream order for a run: starts at the stream that was in flight when the previous run
/// stopped, followed by the rest in definition order.
pub fn resume_order<'a>(
    streams: &'a [StreamDefinition],
    last_stream: Option<&str>,
) -> Vec<&'a StreamDefinition> {
    let start = last_stream
        .and_then(|name| streams.iter().position(|stream| stream.name == name))
        .unwrap_or(0);
    streams[start..].iter().chain(&streams[..start]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::error::DarkskyError;
    use crate::client::Fetched;
    use crate::streams::FORECAST;
    use crate::sync::test_support::{forecast_payload, messages_of, tap, ScriptedClient};
    use chrono::{NaiveDate, TimeZone};
    use reqwest::StatusCode;
    use serde_json::{json, Value};

    const DENVER: &str = "38.8,-105.0";
    const NEW_YORK: &str = "40.7,-74.0";
    const BOTH: &str = "38.8,-105.0;40.7,-74.0";

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    fn noon(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 12, 0, 0).unwrap()
    }

    fn types(messages: &[Value]) -> Vec<&str> {
        messages.iter().filter_map(|m| m["type"].as_str()).collect()
    }

    #[tokio::test]
    async fn test_sync_two_locations() {
        let mut tap = tap(ScriptedClient::forecasts(), "2020-01-01", BOTH, noon(3));

        let total = tap.sync().await.unwrap();

        assert_eq!(total, 6);
        assert_eq!(tap.client.requests_for(DENVER), 3);
        assert_eq!(tap.client.requests_for(NEW_YORK), 3);
        assert!(tap
            .client
            .urls()
            .iter()
            .all(|url| url.ends_with("?exclude=currently,minutely&lang=en&units=auto")));

        let state = tap.state().state();
        assert_eq!(state.bookmark("forecast", DENVER), Some("2020-01-03T00:00:00Z"));
        assert_eq!(state.bookmark("forecast", NEW_YORK), Some("2020-01-03T00:00:00Z"));
        assert_eq!(state.currently_syncing, None);

        let (_, emitter) = tap.into_parts();
        let messages = messages_of(emitter);
        assert_eq!(types(&messages).iter().filter(|t| **t == "RECORD").count(), 6);
        assert_eq!(types(&messages).iter().filter(|t| **t == "SCHEMA").count(), 1);
    }

    #[tokio::test]
    async fn test_message_order() {
        let mut tap = tap(ScriptedClient::forecasts(), "2020-01-01", DENVER, noon(1));
        tap.sync().await.unwrap();

        let (_, emitter) = tap.into_parts();
        let messages = messages_of(emitter);
        assert_eq!(
            types(&messages),
            vec!["STATE", "SCHEMA", "RECORD", "STATE", "STATE"]
        );
        assert_eq!(messages[0]["value"]["currently_syncing"], json!("forecast"));
        assert_eq!(messages[1]["stream"], json!("forecast"));
        assert_eq!(
            messages[1]["key_properties"],
            json!(["latitude", "longitude", "forecast_date"])
        );
        assert_eq!(messages[2]["record"]["forecast_date"], json!("2020-01-01T00:00:00Z"));
        assert_eq!(
            messages[3]["value"]["bookmarks"]["forecast"][DENVER],
            json!("2020-01-01T00:00:00Z")
        );
        assert!(messages[4]["value"].get("currently_syncing").is_none());
    }

    #[tokio::test]
    async fn test_rerun_with_same_state_is_idempotent() {
        let mut first = tap(ScriptedClient::forecasts(), "2020-01-01", BOTH, noon(3));
        first.sync().await.unwrap();
        let (state, _) = first.into_parts();
        let state = state.into_state();

        let mut second = tap(ScriptedClient::forecasts(), "2020-01-01", BOTH, noon(3));
        second.state = StateStore::in_memory(state.clone());
        let total = second.sync().await.unwrap();

        // Only the bookmark day is fetched again, once per location.
        assert_eq!(total, 2);
        assert_eq!(second.client.dates_requested(), vec![day(3), day(3)]);
        assert_eq!(second.state().state(), &state);
    }

    #[tokio::test]
    async fn test_empty_response_does_not_stop_other_locations() {
        let client = ScriptedClient::forecasts().empty_at(DENVER, day(2));
        let mut tap = tap(client, "2020-01-01", BOTH, noon(3));

        let total = tap.sync().await.unwrap();

        assert_eq!(total, 4);
        assert_eq!(tap.client.requests_for(DENVER), 2);
        assert_eq!(tap.client.requests_for(NEW_YORK), 3);
        let state = tap.state().state();
        assert_eq!(state.bookmark("forecast", DENVER), Some("2020-01-01T00:00:00Z"));
        assert_eq!(state.bookmark("forecast", NEW_YORK), Some("2020-01-03T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_records_match_emitted_schema() {
        let client = ScriptedClient::with(|date| {
            let mut payload = forecast_payload(date);
            payload["alerts"] = json!([{"title": "Red Flag Warning", "regions": ["Colorado"]}]);
            Ok(Fetched::Payload(payload))
        });
        let mut tap = tap(client, "2020-01-01", DENVER, noon(2));

        assert_eq!(tap.sync().await.unwrap(), 2);

        let (_, emitter) = tap.into_parts();
        let messages = messages_of(emitter);
        let schema = &messages[1]["schema"];
        assert_eq!(schema["additionalProperties"], json!(false));
        let properties = schema["properties"].as_object().unwrap();
        let records: Vec<&Value> = messages.iter().filter(|m| m["type"] == "RECORD").collect();
        assert_eq!(records.len(), 2);
        for message in records {
            let record = message["record"].as_object().unwrap();
            assert!(record.keys().all(|key| properties.contains_key(key)));
        }
    }

    #[tokio::test]
    async fn test_client_error_aborts_run() {
        let client = ScriptedClient::with(|_| {
            Err(DarkskyError::from_response(
                "http://localhost",
                StatusCode::FORBIDDEN,
                br#"{"code":403,"error":"daily usage limit exceeded"}"#,
            ))
        });
        let mut tap = tap(client, "2020-01-01", BOTH, noon(3));

        let result = tap.sync().await;

        assert!(matches!(
            result,
            Err(TapError::Api(DarkskyError::Forbidden { .. }))
        ));
        assert_eq!(tap.client.urls().len(), 1);
        assert_eq!(tap.state().currently_syncing(), Some("forecast"));
    }

    #[tokio::test]
    async fn test_nothing_selected() {
        let mut tap = tap(ScriptedClient::forecasts(), "2020-01-01", DENVER, noon(3));
        tap.catalog = Catalog::discover().unwrap();

        assert_eq!(tap.sync().await.unwrap(), 0);
        assert!(tap.client.urls().is_empty());
        let (_, emitter) = tap.into_parts();
        assert!(messages_of(emitter).is_empty());
    }

    #[test]
    fn test_exclusions_list() {
        let all = Catalog::discover().unwrap().select_all();
        assert_eq!(
            exclusions_list(&FORECAST, all.get_stream("forecast").unwrap()),
            "currently,minutely"
        );

        let daily_only: Catalog = serde_json::from_value(json!({
            "streams": [{
                "tap_stream_id": "forecast",
                "stream": "forecast",
                "schema": {"type": "object"},
                "metadata": [
                    {"breadcrumb": [], "metadata": {"selected": true}},
                    {"breadcrumb": ["properties", "daily"], "metadata": {"selected": true}}
                ]
            }]
        }))
        .unwrap();
        assert_eq!(
            exclusions_list(&FORECAST, daily_only.get_stream("forecast").unwrap()),
            "currently,minutely,hourly,flags"
        );
    }

    #[test]
    fn test_resume_order() {
        let streams = [
            StreamDefinition { name: "a", ..FORECAST },
            StreamDefinition { name: "b", ..FORECAST },
            StreamDefinition { name: "c", ..FORECAST },
        ];
        let names = |last: Option<&'static str>| -> Vec<&'static str> {
            resume_order(&streams, last)
                .into_iter()
                .map(|stream| stream.name)
                .collect()
        };

        assert_eq!(names(None), vec!["a", "b", "c"]);
        assert_eq!(names(Some("b")), vec!["b", "c", "a"]);
        assert_eq!(names(Some("gone")), vec!["a", "b", "c"]);
    }
}
