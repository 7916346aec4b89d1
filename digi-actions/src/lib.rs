//! digi-actions: The action tree of the digitization pipeline.
//!
//! This crate provides the composable units of work that run against one
//! event's store:
//! - **Sequences** - sequential or parallel (joined) execution of children
//! - **Synchronize** - rendezvous barrier for parallel branches
//! - **Locked actions** - delegates run under a named resource guard
//! - **Splitter / Combine** - partitioning and merging of hit containers
//! - **Signal processors** - per-record amplitude transformations
//!
//! Actions are built from JSON configuration through an [`ActionRegistry`]
//! and driven per event by a [`Pipeline`].
//!

pub mod action;
mod attenuator;
mod chain;
mod combine;
pub mod config;
mod dump;
pub mod guard;
mod locked;
mod pipeline;
mod pool;
mod processor;
pub mod registry;
mod sequence;
mod splitter;
mod subdetector;
mod sync;

pub use action::{collect_access, describe_tree, Action, ActionKind, ContainerAccess};
pub use attenuator::{AttenuationVariable, ExponentialAttenuator};
pub use chain::ProcessorChainAction;
pub use combine::{ContainerCombine, ContainerSelection};
pub use config::{ActionSpec, PipelineConfig, ProcessorSpec, ReadoutSpec};
pub use dump::StoreDump;
pub use guard::{GuardRegistry, GuardScope, GuardToken, ResourceGuard};
pub use locked::LockedAction;
pub use pipeline::{EventOutcome, FailureSummary, Pipeline};
pub use pool::WorkerPool;
pub use processor::{FnProcessor, Gain, SignalProcessor, SignalProcessorSequence, Threshold};
pub use registry::{ActionRegistry, BuildContext, ProcessorRegistry};
pub use sequence::{ActionSequence, ExecutionMode};
pub use splitter::SegmentationSplitter;
pub use subdetector::SubdetectorSequence;
pub use sync::Synchronize;
