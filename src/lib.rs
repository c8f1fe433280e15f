mod catalog;
mod client;
mod config;
mod error;
mod messages;
mod state;
mod streams;
mod sync;
mod transform;
mod utils;

pub use error::TapError;

pub use catalog::{Catalog, CatalogEntry, CatalogError, MetadataEntry};
pub use client::darksky_client::{DarkskyClient, BASE_URL};
pub use client::error::DarkskyError;
pub use client::rate_limit::RateLimiter;
pub use client::retry::{with_backoff, Backoff};
pub use client::{Fetched, ForecastApi};
pub use config::{sanitize_locations, Config, ConfigError};
pub use messages::{EmitError, Emitter, Message};
pub use state::{StateError, StateStore, SyncState};
pub use streams::{BookmarkType, ReplicationMethod, StreamDefinition, FORECAST, STREAMS};
pub use sync::endpoint::Watermark;
pub use sync::{exclusions_list, resume_order, Tap};
pub use transform::{
    convert_json, convert_key, denest_daily, min_max_times, prune_to_schema, transform_json,
    Record, TimeRange, TransformError,
};
pub use utils::{date_range, format_bookmark, parse_datetime};
