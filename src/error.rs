use crate::catalog::CatalogError;
use crate::client::error::DarkskyError;
use crate::config::ConfigError;
use crate::messages::EmitError;
use crate::state::StateError;
use crate::transform::TransformError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapError {
    #[error(transparent)]
    Api(#[from] DarkskyError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Bookmark '{value}' for stream {stream}, location {location} is not a valid datetime")]
    InvalidBookmark {
        stream: String,
        location: String,
        value: String,
    },
}
