//! digi-core: Core types for the digitization action pipeline.
//!
//! This crate provides the per-event data model shared by every action:
//! event identity, hit records and containers, the event store, and the
//! read-only geometry collaborator used for segmentation lookup.
//!

pub mod container;
pub mod error;
pub mod event;
pub mod geometry;
pub mod hit;
pub mod store;

pub use container::{HitContainer, HitRecords, RecordKind};
pub use error::{Error, ErrorKind, ProcessorError, Result, SequenceFailure};
pub use event::EventContext;
pub use geometry::{
    BitFieldCoder, BitFieldElement, FieldDecoder, Geometry, HitCollection, Readout,
    ReadoutGeometry, SegmentationDecoder,
};
pub use hit::{EnergyDeposit, Hit, RawHit, Signal};
pub use store::{ContainerSummary, EventStore, RecordIssue};
