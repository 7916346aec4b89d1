//! JSON pipeline configuration.
//!
//! A configuration names the worker count, guard and timeout policy, the
//! readout descriptions of every subdetector, and the root of the action tree.
//! Action and processor parameters stay untyped (`serde_json::Value`) until
//! the registry builder for their kind deserializes them.

use crate::guard::GuardScope;
use digi_core::{BitFieldCoder, Error, HitCollection, Readout, ReadoutGeometry, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker pool size (0 = available parallelism).
    #[serde(default)]
    pub workers: usize,
    /// Lifetime of named resource guards.
    #[serde(default)]
    pub guard_scope: GuardScope,
    /// Default bound on guard acquisition.
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
    /// Default bound on barrier waits.
    #[serde(default)]
    pub barrier_timeout_ms: Option<u64>,
    /// Readout descriptions, one per subdetector.
    #[serde(default)]
    pub readouts: Vec<ReadoutSpec>,
    /// Root of the action tree.
    pub root: ActionSpec,
}

impl PipelineConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|err| Error::config(format!("cannot open {}: {err}", path.display())))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| Error::config(format!("invalid pipeline config {}: {err}", path.display())))
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    /// Returns a configuration error if the JSON does not match the schema.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| Error::config(format!("invalid pipeline config: {err}")))
    }

    /// Builds the readout geometry described by `readouts`.
    ///
    /// # Errors
    /// Fails on malformed ID descriptors or duplicate subdetectors.
    pub fn geometry(&self) -> Result<ReadoutGeometry> {
        let mut geometry = ReadoutGeometry::new();
        for spec in &self.readouts {
            if geometry.readout(&spec.subdetector).is_some() {
                return Err(Error::config(format!(
                    "subdetector '{}' has more than one readout",
                    spec.subdetector
                )));
            }
            geometry = geometry.with_readout(spec.subdetector.clone(), spec.readout()?);
        }
        Ok(geometry)
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }
}

/// Readout of one subdetector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadoutSpec {
    pub subdetector: String,
    pub name: String,
    /// Bit field descriptor, e.g. `"system:8,layer:8,module:16"`.
    pub id_spec: String,
    /// Field used as segmentation identifier; the whole cell id when absent.
    #[serde(default)]
    pub segmentation_field: Option<String>,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

impl ReadoutSpec {
    /// # Errors
    /// Fails if the descriptor or a collection key is invalid.
    pub fn readout(&self) -> Result<Readout> {
        let coder = BitFieldCoder::parse(&self.id_spec)?;
        let mut readout = Readout::new(self.name.clone(), coder, self.segmentation_field.clone())?;
        for c in &self.collections {
            readout = readout.with_collection(HitCollection::new(
                c.name.clone(),
                c.key.clone(),
                c.key_min,
                c.key_max,
            ))?;
        }
        Ok(readout)
    }
}

/// Hit collection selected by a key field range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub key: String,
    pub key_min: i64,
    pub key_max: i64,
}

/// Configuration of one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Registry key of the action kind.
    pub kind: String,
    pub name: String,
    /// Kind-specific parameters.
    #[serde(default)]
    pub params: Value,
}

impl ActionSpec {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            params,
        }
    }

    /// Deserializes the parameters into the kind's parameter struct.
    ///
    /// # Errors
    /// Returns a configuration error naming the action on a schema mismatch.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        decode_params(&self.params).map_err(|err| {
            Error::config(format!("{} '{}': invalid params: {err}", self.kind, self.name))
        })
    }
}

/// Configuration of one signal processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSpec {
    pub kind: String,
    /// Defaults to the kind.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl ProcessorSpec {
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    /// # Errors
    /// Returns a configuration error naming the processor on a schema mismatch.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        decode_params(&self.params).map_err(|err| {
            Error::config(format!(
                "processor {} '{}': invalid params: {err}",
                self.kind,
                self.name()
            ))
        })
    }
}

fn decode_params<T: DeserializeOwned>(params: &Value) -> serde_json::Result<T> {
    match params {
        Value::Null => serde_json::from_value(Value::Object(serde_json::Map::new())),
        other => T::deserialize(other),
    }
}
