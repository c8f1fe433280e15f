//! Static definitions of the streams this tap can extract.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationMethod {
    FullTable,
    Incremental,
}

impl ReplicationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationMethod::FullTable => "FULL_TABLE",
            ReplicationMethod::Incremental => "INCREMENTAL",
        }
    }
}

impl fmt::Display for ReplicationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stream's bookmark values compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookmarkType {
    Datetime,
    Integer,
}

/// Describes one API endpoint and how it is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDefinition {
    pub name: &'static str,
    /// Path relative to the API base URL, with `<secret_key>`, `<location>` and
    /// `<forecast_date>` placeholders.
    pub path: &'static str,
    pub key_properties: &'static [&'static str],
    pub replication_method: ReplicationMethod,
    pub replication_keys: &'static [&'static str],
    /// Query parameters with `<exclusions_list>`, `<language>` and `<units>` placeholders.
    pub params: &'static [(&'static str, &'static str)],
    pub bookmark_type: BookmarkType,
    /// Sections always left out of the response.
    pub base_exclusions: &'static [&'static str],
    /// Sections left out unless the catalog selects them.
    pub optional_sections: &'static [&'static str],
    /// JSON schema for the normalized records.
    pub schema: &'static str,
}

pub const FORECAST: StreamDefinition = StreamDefinition {
    name: "forecast",
    path: "forecast/<secret_key>/<location>,<forecast_date>",
    key_properties: &["latitude", "longitude", "forecast_date"],
    replication_method: ReplicationMethod::Incremental,
    replication_keys: &["forecast_date"],
    params: &[
        ("exclude", "<exclusions_list>"),
        ("lang", "<language>"),
        ("units", "<units>"),
    ],
    bookmark_type: BookmarkType::Datetime,
    base_exclusions: &["currently", "minutely"],
    optional_sections: &["hourly", "daily", "flags"],
    schema: include_str!("../schemas/forecast.json"),
};

pub const STREAMS: &[StreamDefinition] = &[FORECAST];

impl StreamDefinition {
    /// The field used for incremental progress, if the stream has one.
    pub fn bookmark_field(&self) -> Option<&'static str> {
        match self.replication_method {
            ReplicationMethod::Incremental => self.replication_keys.first().copied(),
            ReplicationMethod::FullTable => None,
        }
    }

    pub fn key_properties(&self) -> Vec<String> {
        self.key_properties.iter().map(|k| k.to_string()).collect()
    }

    /// Renders the query string for this stream, e.g. `exclude=currently,minutely&lang=en&units=us`.
    pub fn render_query(&self, language: &str, units: &str, exclusions: &str) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
            .replace("<language>", language)
            .replace("<units>", units)
            .replace("<exclusions_list>", exclusions)
    }

    /// Full request URL for one location. `<secret_key>` and `<forecast_date>` are left in
    /// place for the client and the sync engine to fill in.
    pub fn render_url(&self, base_url: &str, location: &str, query: &str) -> String {
        let path = self.path.replace("<location>", location);
        format!("{}/{}?{}", base_url.trim_end_matches('/'), path, query)
    }
}
