//! Read-only geometry collaborator: readouts and segmentation decoding.
//!
//! A readout describes how raw cell identifiers are packed (the ID
//! descriptor, e.g. `"system:8,layer:4,module:8,x:32:-16,y:-16"`) and which
//! field the segmentation splitter partitions on.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Decodes a raw cell identifier into the identifier used for splitting.
pub trait SegmentationDecoder: Send + Sync {
    /// Returns the geometric cell identifier of `cell_id`.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] when the identifier does not match the
    /// geometry.
    fn decode(&self, cell_id: u64) -> Result<u64>;
}

/// Geometry queries consumed by the pipeline.
pub trait Geometry: Send + Sync {
    /// Returns the segmentation decoder of a subdetector.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for unknown subdetectors.
    fn segmentation_for(&self, subdetector: &str) -> Result<Arc<dyn SegmentationDecoder>>;
}

/// One field of a bit-field ID descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldElement {
    name: String,
    offset: u32,
    width: u32,
    signed: bool,
    mask: u64,
}

impl BitFieldElement {
    fn new(name: &str, offset: u32, width: u32, signed: bool) -> Result<Self> {
        if width == 0 || offset.saturating_add(width) > 64 {
            return Err(Error::config(format!(
                "bit field '{name}': offset {offset} + width {width} does not fit in 64 bits"
            )));
        }
        let mask = low_bits(width) << offset;
        Ok(Self {
            name: name.to_string(),
            offset,
            width,
            signed,
            mask,
        })
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bit offset of the field.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Width of the field in bits.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// True for two's-complement fields.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Bits occupied by the field.
    #[must_use]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Smallest encodable value.
    #[must_use]
    pub fn min_value(&self) -> i64 {
        if self.signed {
            i64::MIN >> (64 - self.width)
        } else {
            0
        }
    }

    /// Largest encodable value.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn max_value(&self) -> i64 {
        if self.signed {
            i64::MAX >> (64 - self.width)
        } else if self.width >= 63 {
            i64::MAX
        } else {
            (1i64 << self.width) - 1
        }
    }

    /// Extracts the field value from `cell_id`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn value(&self, cell_id: u64) -> i64 {
        let raw = (cell_id & self.mask) >> self.offset;
        if self.signed && self.width < 64 && raw & (1 << (self.width - 1)) != 0 {
            (raw | !low_bits(self.width)) as i64
        } else {
            raw as i64
        }
    }

    /// Writes `value` into the field of `cell_id`.
    ///
    /// # Errors
    /// Fails if `value` does not fit the field.
    #[allow(clippy::cast_sign_loss)]
    pub fn set(&self, cell_id: &mut u64, value: i64) -> Result<()> {
        if value < self.min_value() || value > self.max_value() {
            return Err(Error::config(format!(
                "value {value} does not fit bit field '{}' [{}, {}]",
                self.name,
                self.min_value(),
                self.max_value()
            )));
        }
        let bits = (value as u64) & low_bits(self.width);
        *cell_id = (*cell_id & !self.mask) | (bits << self.offset);
        Ok(())
    }
}

fn low_bits(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Bit-field coder built from an ID descriptor string.
///
/// Each comma-separated entry is `name:width` or `name:offset:width`; a
/// negative width marks a signed field. Entries without an explicit offset
/// start where the previous field ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldCoder {
    descriptor: String,
    elements: Vec<BitFieldElement>,
    mask: u64,
}

impl BitFieldCoder {
    /// Parses an ID descriptor.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for malformed, duplicate, or overlapping fields.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut elements: Vec<BitFieldElement> = Vec::new();
        let mut mask = 0u64;
        let mut next_offset = 0u32;

        for entry in descriptor.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let (name, offset, width) = match parts.as_slice() {
                [name, width] => (*name, next_offset, parse_int(entry, width)?),
                [name, offset, width] => {
                    let offset = parse_int(entry, offset)?;
                    let offset = u32::try_from(offset).map_err(|_| {
                        Error::config(format!("bit field '{entry}': negative offset"))
                    })?;
                    (*name, offset, parse_int(entry, width)?)
                }
                _ => {
                    return Err(Error::config(format!(
                        "malformed bit field entry '{entry}' in '{descriptor}'"
                    )))
                }
            };
            if name.is_empty() {
                return Err(Error::config(format!("unnamed bit field in '{descriptor}'")));
            }
            if elements.iter().any(|e| e.name == name) {
                return Err(Error::config(format!(
                    "duplicate bit field '{name}' in '{descriptor}'"
                )));
            }
            let width_bits = u32::try_from(width.unsigned_abs()).unwrap_or(u32::MAX);
            let element = BitFieldElement::new(name, offset, width_bits, width < 0)?;
            if element.mask & mask != 0 {
                return Err(Error::config(format!(
                    "bit field '{name}' overlaps another field in '{descriptor}'"
                )));
            }
            mask |= element.mask;
            next_offset = element.offset + element.width;
            elements.push(element);
        }

        if elements.is_empty() {
            return Err(Error::config("empty ID descriptor"));
        }

        Ok(Self {
            descriptor: descriptor.to_string(),
            elements,
            mask,
        })
    }

    /// The descriptor string this coder was built from.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// All fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[BitFieldElement] {
        &self.elements
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&BitFieldElement> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Union of all field masks.
    #[must_use]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Reads field `name` of `cell_id`.
    ///
    /// # Errors
    /// Fails for unknown fields.
    pub fn get(&self, cell_id: u64, name: &str) -> Result<i64> {
        Ok(self.require(name)?.value(cell_id))
    }

    /// Writes field `name` of `cell_id`.
    ///
    /// # Errors
    /// Fails for unknown fields or values that do not fit.
    pub fn set(&self, cell_id: &mut u64, name: &str, value: i64) -> Result<()> {
        self.require(name)?.set(cell_id, value)
    }

    /// Builds a cell identifier from `(field, value)` pairs.
    ///
    /// # Errors
    /// Fails for unknown fields or values that do not fit.
    pub fn encode(&self, values: &[(&str, i64)]) -> Result<u64> {
        let mut cell_id = 0u64;
        for &(name, value) in values {
            self.set(&mut cell_id, name, value)?;
        }
        Ok(cell_id)
    }

    fn require(&self, name: &str) -> Result<&BitFieldElement> {
        self.field(name).ok_or_else(|| {
            Error::config(format!(
                "unknown bit field '{name}' in '{}'",
                self.descriptor
            ))
        })
    }
}

impl FromStr for BitFieldCoder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_int(entry: &str, text: &str) -> Result<i64> {
    text.parse::<i64>()
        .map_err(|_| Error::config(format!("bit field '{entry}': '{text}' is not an integer")))
}

/// A hit collection declared by a readout, selected by a key field range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitCollection {
    pub name: String,
    pub key: String,
    pub key_min: i64,
    pub key_max: i64,
}

impl HitCollection {
    pub fn new(name: impl Into<String>, key: impl Into<String>, key_min: i64, key_max: i64) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            key_min,
            key_max,
        }
    }

    /// True if the key field of `cell_id` lies in `[key_min, key_max]`.
    #[must_use]
    pub fn accepts(&self, coder: &BitFieldCoder, cell_id: u64) -> bool {
        coder
            .get(cell_id, &self.key)
            .is_ok_and(|v| (self.key_min..=self.key_max).contains(&v))
    }
}

/// Readout description of one subdetector.
#[derive(Debug, Clone)]
pub struct Readout {
    name: String,
    id_spec: Arc<BitFieldCoder>,
    segmentation_field: Option<String>,
    collections: Vec<HitCollection>,
}

impl Readout {
    /// Creates a readout splitting on `segmentation_field` (or on the whole
    /// cell identifier when `None`).
    ///
    /// # Errors
    /// Fails if the segmentation field is not part of the ID descriptor.
    pub fn new(
        name: impl Into<String>,
        id_spec: BitFieldCoder,
        segmentation_field: Option<String>,
    ) -> Result<Self> {
        let name = name.into();
        if let Some(field) = &segmentation_field {
            if id_spec.field(field).is_none() {
                return Err(Error::config(format!(
                    "readout '{name}': segmentation field '{field}' not in '{}'",
                    id_spec.descriptor()
                )));
            }
        }
        Ok(Self {
            name,
            id_spec: Arc::new(id_spec),
            segmentation_field,
            collections: Vec::new(),
        })
    }

    /// Adds a hit collection.
    ///
    /// # Errors
    /// Fails if the collection key is not part of the ID descriptor.
    pub fn with_collection(mut self, collection: HitCollection) -> Result<Self> {
        if self.id_spec.field(&collection.key).is_none() {
            return Err(Error::config(format!(
                "readout '{}': collection key '{}' not in ID descriptor",
                self.name, collection.key
            )));
        }
        self.collections.push(collection);
        Ok(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id_spec(&self) -> &BitFieldCoder {
        &self.id_spec
    }

    #[must_use]
    pub fn collections(&self) -> &[HitCollection] {
        &self.collections
    }

    /// Names of the declared hit collections.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }

    /// First declared collection accepting `cell_id`.
    #[must_use]
    pub fn collection_of(&self, cell_id: u64) -> Option<&HitCollection> {
        self.collections
            .iter()
            .find(|c| c.accepts(&self.id_spec, cell_id))
    }

    /// Builds the segmentation decoder for this readout.
    #[must_use]
    pub fn decoder(&self) -> FieldDecoder {
        FieldDecoder {
            readout: Arc::new(self.clone()),
            field: self.segmentation_field.clone(),
        }
    }
}

/// Decoder returning one bit field (or the validated cell id).
///
/// When the readout declares hit collections, a cell id outside all of them
/// does not decode.
#[derive(Debug, Clone)]
pub struct FieldDecoder {
    readout: Arc<Readout>,
    field: Option<String>,
}

impl SegmentationDecoder for FieldDecoder {
    #[allow(clippy::cast_sign_loss)]
    fn decode(&self, cell_id: u64) -> Result<u64> {
        let stray = cell_id & !self.readout.id_spec.mask();
        if stray != 0 {
            return Err(Error::Decode {
                cell_id,
                reason: format!(
                    "bits {stray:#x} outside ID descriptor '{}'",
                    self.readout.id_spec.descriptor()
                ),
            });
        }
        if !self.readout.collections.is_empty() && self.readout.collection_of(cell_id).is_none() {
            return Err(Error::Decode {
                cell_id,
                reason: format!(
                    "no hit collection of readout '{}' accepts it",
                    self.readout.name
                ),
            });
        }
        let Some(field) = &self.field else {
            return Ok(cell_id);
        };
        let value = self.readout.id_spec.get(cell_id, field)?;
        if value < 0 {
            return Err(Error::Decode {
                cell_id,
                reason: format!("negative segmentation value {value} in field '{field}'"),
            });
        }
        Ok(value as u64)
    }
}

/// Geometry backed by readout descriptions keyed by subdetector.
#[derive(Debug, Clone, Default)]
pub struct ReadoutGeometry {
    readouts: HashMap<String, Readout>,
}

impl ReadoutGeometry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the readout of `subdetector`.
    #[must_use]
    pub fn with_readout(mut self, subdetector: impl Into<String>, readout: Readout) -> Self {
        self.readouts.insert(subdetector.into(), readout);
        self
    }

    /// Returns the readout of `subdetector`.
    #[must_use]
    pub fn readout(&self, subdetector: &str) -> Option<&Readout> {
        self.readouts.get(subdetector)
    }

    /// Registered subdetector names, sorted.
    #[must_use]
    pub fn subdetectors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.readouts.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Geometry for ReadoutGeometry {
    fn segmentation_for(&self, subdetector: &str) -> Result<Arc<dyn SegmentationDecoder>> {
        let readout = self
            .readouts
            .get(subdetector)
            .ok_or_else(|| Error::config(format!("no readout for subdetector '{subdetector}'")))?;
        Ok(Arc::new(readout.decoder()))
    }
}
