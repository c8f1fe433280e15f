//! Catalog discovery and selection metadata.
//!
//! A catalog lists each stream with its schema and a metadata list keyed by breadcrumb:
//! `[]` for the stream itself and `["properties", <field>]` for each top-level field.
//! Selection is read from the `selected` flag of those entries.

use crate::streams::{StreamDefinition, STREAMS};
use crate::transform::Record;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse catalog file '{0}'")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Bundled schema for stream {0} is invalid")]
    Schema(&'static str, #[source] serde_json::Error),

    #[error("Stream {0} is selected but missing from the catalog")]
    MissingStream(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Vec<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    pub stream: String,
    #[serde(default)]
    pub key_properties: Vec<String>,
    pub schema: Value,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    /// Builds the catalog for every defined stream from its bundled schema.
    ///
    /// # Returns
    ///
    /// A catalog with stream metadata (key properties, replication method and keys) and
    /// an `inclusion` entry per top-level field. Nothing is selected; chain
    /// [`Catalog::select_all`] to sync everything.
    ///
    /// # Examples
    ///
    /// ```
    /// use darksky_tap::Catalog;
    ///
    /// let catalog = Catalog::discover().unwrap();
    /// assert!(catalog.selected_streams().is_empty());
    /// assert_eq!(catalog.select_all().selected_streams(), vec!["forecast"]);
    /// ```
    pub fn discover() -> Result<Self, CatalogError> {
        let streams = STREAMS
            .iter()
            .map(CatalogEntry::discover)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { streams })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let bytes =
            std::fs::read(path).map_err(|e| CatalogError::Read(path.to_path_buf(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| CatalogError::Parse(path.to_path_buf(), e))
    }

    /// Marks every stream and every field as selected.
    pub fn select_all(mut self) -> Self {
        for entry in &mut self.streams {
            for metadata in &mut entry.metadata {
                metadata
                    .metadata
                    .insert("selected".to_string(), Value::Bool(true));
            }
        }
        self
    }

    pub fn get_stream(&self, name: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|entry| entry.stream == name)
    }

    pub fn selected_streams(&self) -> Vec<&str> {
        self.streams
            .iter()
            .filter(|entry| entry.is_selected())
            .map(|entry| entry.stream.as_str())
            .collect()
    }
}

impl CatalogEntry {
    fn discover(stream: &StreamDefinition) -> Result<Self, CatalogError> {
        let schema: Value = serde_json::from_str(stream.schema)
            .map_err(|e| CatalogError::Schema(stream.name, e))?;

        let mut metadata = vec![MetadataEntry {
            breadcrumb: vec![],
            metadata: object(json!({
                "table-key-properties": stream.key_properties,
                "forced-replication-method": stream.replication_method.as_str(),
                "valid-replication-keys": stream.replication_keys,
                "inclusion": "available",
            })),
        }];

        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|props| props.keys());
        for field in properties {
            let inclusion = if stream.key_properties.contains(&field.as_str())
                || stream.replication_keys.contains(&field.as_str())
            {
                "automatic"
            } else {
                "available"
            };
            metadata.push(MetadataEntry {
                breadcrumb: vec!["properties".to_string(), field.clone()],
                metadata: object(json!({ "inclusion": inclusion })),
            });
        }

        Ok(Self {
            tap_stream_id: stream.name.to_string(),
            stream: stream.name.to_string(),
            key_properties: stream.key_properties(),
            schema,
            metadata,
        })
    }

    pub fn metadata_for(&self, breadcrumb: &[&str]) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|entry| entry.breadcrumb.iter().map(String::as_str).eq(breadcrumb.iter().copied()))
            .map(|entry| &entry.metadata)
    }

    fn flag(&self, breadcrumb: &[&str], key: &str) -> bool {
        self.metadata_for(breadcrumb)
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_selected(&self) -> bool {
        self.flag(&[], "selected")
    }

    /// Whether the top-level field `name` carries `selected: true`.
    pub fn is_property_selected(&self, name: &str) -> bool {
        self.flag(&["properties", name], "selected")
    }

    /// Whether the top-level field `name` belongs in emitted records.
    ///
    /// `automatic` fields are always kept. A field is dropped when it is explicitly
    /// deselected or marked `unsupported`; fields without metadata are kept.
    pub fn should_emit_property(&self, name: &str) -> bool {
        let Some(metadata) = self.metadata_for(&["properties", name]) else {
            return true;
        };
        match metadata.get("inclusion").and_then(Value::as_str) {
            Some("automatic") => true,
            Some("unsupported") => false,
            _ => metadata.get("selected").and_then(Value::as_bool) != Some(false),
        }
    }

    /// Removes the top-level fields of `record` that the catalog deselects.
    ///
    /// # Returns
    ///
    /// The names of the removed fields.
    pub fn apply_selection(&self, record: &mut Record) -> Vec<String> {
        let mut removed = Vec::new();
        record.retain(|field, _| {
            let keep = self.should_emit_property(field);
            if !keep {
                removed.push(field.clone());
            }
            keep
        });
        removed
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
