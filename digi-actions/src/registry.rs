//! Registries mapping configuration kinds to constructors.
//!
//! Each kind name is resolved once, when the pipeline is built. Built-in
//! kinds are registered by `with_builtins`; plugins add their own with
//! `register`.

use crate::action::Action;
use crate::attenuator::{AttenuationVariable, ExponentialAttenuator};
use crate::chain::ProcessorChainAction;
use crate::combine::{ContainerCombine, ContainerSelection};
use crate::config::{ActionSpec, ProcessorSpec};
use crate::dump::StoreDump;
use crate::guard::GuardRegistry;
use crate::locked::LockedAction;
use crate::pool::WorkerPool;
use crate::processor::{Gain, SignalProcessor, SignalProcessorSequence, Threshold};
use crate::sequence::{ActionSequence, ExecutionMode};
use crate::splitter::SegmentationSplitter;
use crate::subdetector::SubdetectorSequence;
use crate::sync::Synchronize;
use digi_core::{Error, Geometry, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Constructor of one action kind.
pub type ActionBuilder =
    dyn Fn(&ActionSpec, &mut BuildContext<'_>) -> Result<Box<dyn Action>> + Send + Sync;

/// Constructor of one signal processor kind.
pub type ProcessorBuilder =
    dyn Fn(&ProcessorSpec, &ProcessorRegistry) -> Result<Arc<dyn SignalProcessor>> + Send + Sync;

/// Kind name to signal processor constructor.
#[derive(Default)]
pub struct ProcessorRegistry {
    builders: HashMap<String, Box<ProcessorBuilder>>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in processor kind.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("exponential_attenuator", build_attenuator);
        registry.register("gain", build_gain);
        registry.register("threshold", build_threshold);
        registry.register("sequence", build_processor_sequence);
        registry
    }

    /// Registers (or replaces) the constructor of `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&ProcessorSpec, &ProcessorRegistry) -> Result<Arc<dyn SignalProcessor>>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(kind.into(), Box::new(builder));
    }

    /// Builds one processor.
    ///
    /// # Errors
    /// Unknown kinds and invalid parameters are configuration errors.
    pub fn build(&self, spec: &ProcessorSpec) -> Result<Arc<dyn SignalProcessor>> {
        let builder = self
            .builders
            .get(&spec.kind)
            .ok_or_else(|| Error::config(format!("unknown signal processor kind '{}'", spec.kind)))?;
        builder(spec, self)
    }

    /// Builds a processor sequence from `specs`, in order.
    ///
    /// # Errors
    /// Fails on the first processor that cannot be built.
    pub fn build_sequence(
        &self,
        name: impl Into<String>,
        specs: &[ProcessorSpec],
    ) -> Result<SignalProcessorSequence> {
        let mut sequence = SignalProcessorSequence::new(name);
        for spec in specs {
            sequence.push(self.build(spec)?);
        }
        Ok(sequence)
    }

    /// Registered kind names, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Kind name to action constructor, plus the processor registry.
#[derive(Default)]
pub struct ActionRegistry {
    builders: HashMap<String, Box<ActionBuilder>>,
    processors: ProcessorRegistry,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in action and processor kind.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
            processors: ProcessorRegistry::with_builtins(),
        };
        registry.register("sequence", build_sequence);
        registry.register("subdetector", build_subdetector);
        registry.register("locked", build_locked);
        registry.register("synchronize", build_synchronize);
        registry.register("segmentation_splitter", build_splitter);
        registry.register("container_combine", build_combine);
        registry.register("processor_chain", build_chain);
        registry.register("store_dump", build_dump);
        registry
    }

    /// Registers (or replaces) the constructor of `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&ActionSpec, &mut BuildContext<'_>) -> Result<Box<dyn Action>> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Box::new(builder));
    }

    #[must_use]
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    pub fn processors_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.processors
    }

    /// Builds the action described by `spec`.
    ///
    /// # Errors
    /// Unknown kinds and invalid parameters are configuration errors.
    pub fn build(&self, spec: &ActionSpec, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
        let builder = self
            .builders
            .get(&spec.kind)
            .ok_or_else(|| Error::config(format!("unknown action kind '{}' for '{}'", spec.kind, spec.name)))?;
        log::trace!("building {} '{}'", spec.kind, spec.name);
        builder(spec, ctx)
    }

    /// Registered kind names, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Shared resources available while building one pipeline.
pub struct BuildContext<'a> {
    registry: &'a ActionRegistry,
    geometry: &'a dyn Geometry,
    pool: Arc<WorkerPool>,
    guards: Arc<GuardRegistry>,
    lock_timeout: Option<Duration>,
    barrier_timeout: Option<Duration>,
    barriers: HashMap<String, (Arc<Synchronize>, usize)>,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        registry: &'a ActionRegistry,
        geometry: &'a dyn Geometry,
        pool: Arc<WorkerPool>,
        guards: Arc<GuardRegistry>,
    ) -> Self {
        Self {
            registry,
            geometry,
            pool,
            guards,
            lock_timeout: None,
            barrier_timeout: None,
            barriers: HashMap::new(),
        }
    }

    /// Sets the default guard and barrier timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, lock: Option<Duration>, barrier: Option<Duration>) -> Self {
        self.lock_timeout = lock;
        self.barrier_timeout = barrier;
        self
    }

    /// Builds a nested action through the registry.
    ///
    /// # Errors
    /// Propagates the nested builder's error.
    pub fn build(&mut self, spec: &ActionSpec) -> Result<Box<dyn Action>> {
        let registry = self.registry;
        registry.build(spec, self)
    }

    #[must_use]
    pub fn geometry(&self) -> &'a dyn Geometry {
        self.geometry
    }

    #[must_use]
    pub fn processors(&self) -> &'a ProcessorRegistry {
        &self.registry.processors
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    #[must_use]
    pub fn guards(&self) -> &Arc<GuardRegistry> {
        &self.guards
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    /// Returns the barrier named `name`, creating it on first use.
    ///
    /// Every `synchronize` entry with the same name shares one instance and
    /// counts as one arriving branch.
    ///
    /// # Errors
    /// Fails if the width disagrees with an earlier declaration or exceeds the
    /// worker pool size (such a barrier could never release).
    pub fn barrier(
        &mut self,
        name: &str,
        width: usize,
        timeout: Option<Duration>,
    ) -> Result<Arc<Synchronize>> {
        if let Some((existing, entries)) = self.barriers.get_mut(name) {
            if existing.width() != width {
                return Err(Error::config(format!(
                    "synchronize '{name}' declared with widths {} and {width}",
                    existing.width()
                )));
            }
            *entries += 1;
            return Ok(existing.clone());
        }
        if width > self.pool.threads() {
            return Err(Error::config(format!(
                "synchronize '{name}' has width {width} but the pool has only {} workers",
                self.pool.threads()
            )));
        }
        let timeout = timeout.or(self.barrier_timeout);
        if timeout.is_none() && width > 1 {
            log::warn!(
                "synchronize '{name}' has no timeout; a branch that never arrives blocks the event"
            );
        }
        let barrier = Arc::new(Synchronize::new(name, width)?.with_timeout(timeout));
        self.barriers.insert(name.to_string(), (barrier.clone(), 1));
        Ok(barrier)
    }

    /// Checks that every barrier is reached by exactly as many entries as its
    /// width.
    ///
    /// # Errors
    /// Returns a configuration error naming the first barrier that could never
    /// release, or would strand an entry.
    pub fn check_barriers(&self) -> Result<()> {
        let mut names: Vec<&String> = self.barriers.keys().collect();
        names.sort();
        for name in names {
            let (barrier, entries) = &self.barriers[name];
            if *entries != barrier.width() {
                return Err(Error::config(format!(
                    "synchronize '{name}' has width {} but {entries} entries reach it",
                    barrier.width()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SequenceParams {
    #[serde(default)]
    mode: ExecutionMode,
    #[serde(default)]
    children: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubdetectorParams {
    subdetector: String,
    #[serde(default)]
    mode: ExecutionMode,
    #[serde(default)]
    children: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LockedParams {
    guard: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
    action: ActionSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SynchronizeParams {
    width: usize,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn strict_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SplitterParams {
    subdetector: String,
    input: String,
    output_prefix: String,
    #[serde(default = "strict_default")]
    strict: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CombineParams {
    inputs: ContainerSelection,
    output: String,
    #[serde(default)]
    erase_inputs: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChainParams {
    containers: ContainerSelection,
    processors: Vec<ProcessorSpec>,
    #[serde(default)]
    strict: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

fn build_children(
    name: &str,
    mode: ExecutionMode,
    children: &[ActionSpec],
    ctx: &mut BuildContext<'_>,
) -> Result<ActionSequence> {
    let mut sequence = ActionSequence::with_mode(name, mode, Some(ctx.pool().clone()))?;
    for child in children {
        sequence.push(ctx.build(child)?);
    }
    Ok(sequence)
}

fn build_sequence(spec: &ActionSpec, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let params: SequenceParams = spec.params()?;
    Ok(Box::new(build_children(&spec.name, params.mode, &params.children, ctx)?))
}

fn build_subdetector(spec: &ActionSpec, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let params: SubdetectorParams = spec.params()?;
    let sequence = build_children(&spec.name, params.mode, &params.children, ctx)?;
    Ok(Box::new(SubdetectorSequence::new(params.subdetector, sequence)))
}

fn build_locked(spec: &ActionSpec, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let params: LockedParams = spec.params()?;
    let delegate = ctx.build(&params.action)?;
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .or(ctx.lock_timeout());
    Ok(Box::new(
        LockedAction::new(spec.name.clone(), params.guard, delegate, ctx.guards().clone())
            .with_timeout(timeout),
    ))
}

fn build_synchronize(spec: &ActionSpec, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let params: SynchronizeParams = spec.params()?;
    let barrier = ctx.barrier(
        &spec.name,
        params.width,
        params.timeout_ms.map(Duration::from_millis),
    )?;
    Ok(Box::new(barrier))
}

fn build_splitter(spec: &ActionSpec, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let params: SplitterParams = spec.params()?;
    let splitter = SegmentationSplitter::new(
        spec.name.clone(),
        params.subdetector,
        params.input,
        params.output_prefix,
        ctx.geometry(),
    )?;
    Ok(Box::new(splitter.with_strict(params.strict)))
}

fn build_combine(spec: &ActionSpec, _ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let params: CombineParams = spec.params()?;
    let combine = ContainerCombine::new(spec.name.clone(), params.inputs, params.output)?;
    Ok(Box::new(combine.with_erase_inputs(params.erase_inputs)))
}

fn build_chain(spec: &ActionSpec, ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let params: ChainParams = spec.params()?;
    let chain = ctx
        .processors()
        .build_sequence(spec.name.clone(), &params.processors)?;
    Ok(Box::new(
        ProcessorChainAction::new(spec.name.clone(), params.containers, chain)
            .with_strict(params.strict),
    ))
}

fn build_dump(spec: &ActionSpec, _ctx: &mut BuildContext<'_>) -> Result<Box<dyn Action>> {
    let _: NoParams = spec.params()?;
    Ok(Box::new(StoreDump::new(spec.name.clone())))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttenuatorParams {
    decay: f64,
    #[serde(default)]
    floor: f64,
    #[serde(default)]
    variable: AttenuationVariable,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GainParams {
    factor: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThresholdParams {
    min: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProcessorSequenceParams {
    processors: Vec<ProcessorSpec>,
}

fn build_attenuator(
    spec: &ProcessorSpec,
    _registry: &ProcessorRegistry,
) -> Result<Arc<dyn SignalProcessor>> {
    let params: AttenuatorParams = spec.params()?;
    let attenuator = ExponentialAttenuator::new(spec.name(), params.decay, params.floor)?;
    Ok(Arc::new(attenuator.with_variable(params.variable)))
}

fn build_gain(spec: &ProcessorSpec, _registry: &ProcessorRegistry) -> Result<Arc<dyn SignalProcessor>> {
    let params: GainParams = spec.params()?;
    Ok(Arc::new(Gain::new(spec.name(), params.factor)?))
}

fn build_threshold(
    spec: &ProcessorSpec,
    _registry: &ProcessorRegistry,
) -> Result<Arc<dyn SignalProcessor>> {
    let params: ThresholdParams = spec.params()?;
    Ok(Arc::new(Threshold::new(spec.name(), params.min)?))
}

fn build_processor_sequence(
    spec: &ProcessorSpec,
    registry: &ProcessorRegistry,
) -> Result<Arc<dyn SignalProcessor>> {
    let params: ProcessorSequenceParams = spec.params()?;
    Ok(Arc::new(registry.build_sequence(spec.name(), &params.processors)?))
}
