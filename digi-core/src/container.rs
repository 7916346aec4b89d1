//! Hit containers: named, ordered sequences of records of one kind.

use crate::error::{Error, Result};
use crate::hit::{EnergyDeposit, Hit, RawHit};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Record type tag of a hit container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RecordKind {
    /// Simulated energy deposits.
    Deposit,
    /// Readout-level raw hits.
    RawHit,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => f.write_str("deposit"),
            Self::RawHit => f.write_str("raw-hit"),
        }
    }
}

/// Records of a container, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "records"))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HitRecords {
    Deposits(Vec<EnergyDeposit>),
    RawHits(Vec<RawHit>),
}

impl HitRecords {
    /// Creates an empty record list of the given kind.
    #[must_use]
    pub fn empty(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Deposit => Self::Deposits(Vec::new()),
            RecordKind::RawHit => Self::RawHits(Vec::new()),
        }
    }

    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Deposits(_) => RecordKind::Deposit,
            Self::RawHits(_) => RecordKind::RawHit,
        }
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Deposits(v) => v.len(),
            Self::RawHits(v) => v.len(),
        }
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over the records as hits.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &dyn Hit> + '_> {
        match self {
            Self::Deposits(v) => Box::new(v.iter().map(|h| h as &dyn Hit)),
            Self::RawHits(v) => Box::new(v.iter().map(|h| h as &dyn Hit)),
        }
    }

    /// Returns the cell identifiers in record order.
    #[must_use]
    pub fn cell_ids(&self) -> Vec<u64> {
        self.iter().map(Hit::cell_id).collect()
    }

    /// Returns the records at `indices`, in the order given.
    ///
    /// # Panics
    /// Panics if an index is out of bounds.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            Self::Deposits(v) => Self::Deposits(indices.iter().map(|&i| v[i]).collect()),
            Self::RawHits(v) => Self::RawHits(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Appends `other` after the existing records.
    ///
    /// Returns the offending kind if the kinds differ; nothing is appended then.
    pub fn extend_from(&mut self, other: &HitRecords) -> std::result::Result<(), RecordKind> {
        match (self, other) {
            (Self::Deposits(dst), Self::Deposits(src)) => dst.extend_from_slice(src),
            (Self::RawHits(dst), Self::RawHits(src)) => dst.extend_from_slice(src),
            (_, other) => return Err(other.kind()),
        }
        Ok(())
    }

    /// Visits every record mutably, stopping at the first error.
    pub fn try_for_each_mut<E, F>(&mut self, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(&mut dyn Hit) -> std::result::Result<(), E>,
    {
        match self {
            Self::Deposits(v) => v.iter_mut().try_for_each(|h| f(h as &mut dyn Hit)),
            Self::RawHits(v) => v.iter_mut().try_for_each(|h| f(h as &mut dyn Hit)),
        }
    }
}

impl From<Vec<EnergyDeposit>> for HitRecords {
    fn from(records: Vec<EnergyDeposit>) -> Self {
        Self::Deposits(records)
    }
}

impl From<Vec<RawHit>> for HitRecords {
    fn from(records: Vec<RawHit>) -> Self {
        Self::RawHits(records)
    }
}

/// A named, ordered collection of hit records of one kind.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitContainer {
    /// Container name (its key in the event store).
    pub name: String,
    /// Records in insertion order.
    pub records: HitRecords,
}

impl HitContainer {
    /// Creates a container holding `records`.
    pub fn new(name: impl Into<String>, records: impl Into<HitRecords>) -> Self {
        Self {
            name: name.into(),
            records: records.into(),
        }
    }

    /// Creates an empty container of the given kind.
    pub fn empty(name: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            name: name.into(),
            records: HitRecords::empty(kind),
        }
    }

    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.records.kind()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the container holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the cell identifiers in record order.
    #[must_use]
    pub fn cell_ids(&self) -> Vec<u64> {
        self.records.cell_ids()
    }

    /// Appends records of the same kind, preserving their order.
    ///
    /// # Errors
    /// Returns [`Error::RecordKindMismatch`] if `records` is of another kind.
    pub fn append(&mut self, records: &HitRecords) -> Result<()> {
        let expected = self.kind();
        self.records
            .extend_from(records)
            .map_err(|found| Error::RecordKindMismatch {
                container: self.name.clone(),
                expected,
                found,
            })
    }
}
