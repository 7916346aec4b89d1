//! A built action tree together with its worker pool and guards.

use crate::action::{describe_tree, Action};
use crate::config::PipelineConfig;
use crate::guard::{GuardRegistry, GuardScope};
use crate::pool::WorkerPool;
use crate::registry::{ActionRegistry, BuildContext};
use digi_core::{
    Error, ErrorKind, EventContext, EventStore, Geometry, Result, SequenceFailure,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Processes events through one action tree.
pub struct Pipeline {
    root: Box<dyn Action>,
    pool: Arc<WorkerPool>,
    guards: Arc<GuardRegistry>,
}

impl Pipeline {
    pub fn new(root: Box<dyn Action>, pool: Arc<WorkerPool>, guards: Arc<GuardRegistry>) -> Self {
        Self { root, pool, guards }
    }

    /// Builds a pipeline whose geometry comes from the configured readouts.
    ///
    /// # Errors
    /// Any configuration problem found while building the tree.
    pub fn from_config(config: &PipelineConfig, registry: &ActionRegistry) -> Result<Self> {
        let geometry = config.geometry()?;
        Self::from_config_with_geometry(config, registry, &geometry)
    }

    /// Builds a pipeline against an externally provided geometry.
    ///
    /// # Errors
    /// Any configuration problem found while building the tree.
    pub fn from_config_with_geometry(
        config: &PipelineConfig,
        registry: &ActionRegistry,
        geometry: &dyn Geometry,
    ) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(config.workers)?);
        let guards = Arc::new(GuardRegistry::new(config.guard_scope));
        let mut ctx = BuildContext::new(registry, geometry, pool.clone(), guards.clone())
            .with_timeouts(config.lock_timeout(), config.barrier_timeout());
        let root = ctx.build(&config.root)?;
        ctx.check_barriers()?;
        log::info!(
            "pipeline '{}' built: {} workers, {:?} guards",
            root.name(),
            pool.threads(),
            guards.scope()
        );
        Ok(Self::new(root, pool, guards))
    }

    #[must_use]
    pub fn root(&self) -> &dyn Action {
        self.root.as_ref()
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    #[must_use]
    pub fn guard_scope(&self) -> GuardScope {
        self.guards.scope()
    }

    /// Renders the action tree.
    #[must_use]
    pub fn describe(&self) -> String {
        describe_tree(self.root.as_ref())
    }

    /// Runs the whole action tree for the event owning `store`.
    ///
    /// The outcome carries the store back together with the event's result;
    /// a failure (or panic) is confined to this event.
    pub fn process_event(&self, store: EventStore) -> EventOutcome {
        let context = *store.context();
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| self.root.execute(&context, &store)))
            .unwrap_or_else(|payload| Err(Error::from_panic(self.root.name(), &*payload)));
        self.guards.end_event(&context);
        let elapsed = started.elapsed();

        match &result {
            Ok(()) => log::info!(
                "{context}: {} containers, {} issues in {elapsed:?}",
                store.len(),
                store.issues().len()
            ),
            Err(err) => log::error!("{context}: failed after {elapsed:?}: {err}"),
        }
        EventOutcome {
            context,
            store,
            result,
            elapsed,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("root", &self.root.name())
            .field("pool", &self.pool)
            .field("guards", &self.guards.scope())
            .finish()
    }
}

/// Result of processing one event.
#[derive(Debug)]
pub struct EventOutcome {
    pub context: EventContext,
    pub store: EventStore,
    pub result: Result<()>,
    pub elapsed: Duration,
}

/// Condensed description of a failed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSummary {
    pub kind: ErrorKind,
    /// Message of the first failure.
    pub first: String,
    /// Failures reported along the path to the first one.
    pub count: usize,
    /// Failed sequences, outermost first, with their own failure counts.
    pub sequences: Vec<SequenceFailure>,
}

impl EventOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Summarizes the failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<FailureSummary> {
        self.result.as_ref().err().map(|err| FailureSummary {
            kind: err.kind(),
            first: err.root_cause().to_string(),
            count: err.total_failures(),
            sequences: err.sequence_path(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::sequence::ActionSequence;
    use digi_core::{EnergyDeposit, HitContainer};

    struct Explode;

    impl Action for Explode {
        fn name(&self) -> &str {
            "explode"
        }

        fn kind(&self) -> ActionKind {
            ActionKind::Custom
        }

        fn execute(&self, _: &EventContext, _: &EventStore) -> Result<()> {
            panic!("explode");
        }
    }

    fn pipeline(root: impl Action + 'static) -> Pipeline {
        Pipeline::new(
            Box::new(root),
            Arc::new(WorkerPool::new(1).unwrap()),
            Arc::new(GuardRegistry::new(GuardScope::Event)),
        )
    }

    #[test]
    fn test_panic_is_confined_to_event() {
        let pipeline = pipeline(Explode);
        let outcome = pipeline.process_event(EventStore::new(EventContext::new(1, 0)));
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Internal);
        assert!(failure.first.contains("explode"));

        let next = pipeline.process_event(EventStore::new(EventContext::new(2, 0)));
        assert!(!next.is_ok());
        assert_eq!(next.context.event_number, 2);
    }

    struct Fails(&'static str);

    impl Action for Fails {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> ActionKind {
            ActionKind::Custom
        }

        fn execute(&self, _: &EventContext, _: &EventStore) -> Result<()> {
            Err(Error::config(format!("{} failed", self.0)))
        }
    }

    #[test]
    fn test_failure_counts_nested_parallel_children() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let inner = ActionSequence::parallel("subdetectors", pool.clone())
            .with(Fails("a"))
            .with(Fails("b"))
            .with(Fails("c"));
        let root = ActionSequence::sequential("digitize").with(inner);
        let pipeline = Pipeline::new(Box::new(root), pool, Arc::new(GuardRegistry::default()));

        let outcome = pipeline.process_event(EventStore::new(EventContext::new(0, 0)));
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.count, 3);
        assert!(failure.first.contains("a failed"));
        let counts: Vec<(&str, usize)> = failure
            .sequences
            .iter()
            .map(|s| (s.sequence.as_str(), s.count))
            .collect();
        assert_eq!(counts, vec![("digitize", 1), ("subdetectors", 3)]);
    }

    #[test]
    fn test_event_guards_released() {
        let pipeline = pipeline(ActionSequence::sequential("noop"));
        pipeline.guards.guard(&EventContext::new(1, 0), "db");
        let outcome = pipeline.process_event(EventStore::new(EventContext::new(1, 0)));
        assert!(outcome.is_ok());
        assert!(outcome.failure().is_none());
        assert!(pipeline.guards.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = PipelineConfig::from_json(
            r#"{
                "workers": 2,
                "readouts": [{"subdetector": "ecal", "name": "EcalHits",
                              "id_spec": "system:8,module:8", "segmentation_field": "module"}],
                "root": {"kind": "sequence", "name": "main", "params": {"children": [
                    {"kind": "segmentation_splitter", "name": "split", "params": {
                        "subdetector": "ecal", "input": "ecal.deposits", "output_prefix": "ecal.m"}},
                    {"kind": "container_combine", "name": "merge", "params": {
                        "inputs": {"prefix": "ecal.m."}, "output": "ecal.merged"}}
                ]}}
            }"#,
        )
        .unwrap();
        let pipeline = Pipeline::from_config(&config, &ActionRegistry::with_builtins()).unwrap();
        assert_eq!(pipeline.pool().threads(), 2);
        assert!(pipeline.describe().starts_with("sequence 'main'"));

        let store = EventStore::with_containers(
            EventContext::new(7, 0),
            [HitContainer::new(
                "ecal.deposits",
                vec![
                    EnergyDeposit::new(0x0201, [0.0; 3], 1.0, 0.0),
                    EnergyDeposit::new(0x0101, [0.0; 3], 2.0, 0.0),
                ],
            )],
        )
        .unwrap();
        let outcome = pipeline.process_event(store);
        assert!(outcome.is_ok());
        assert_eq!(
            outcome.store.names(),
            vec!["ecal.deposits", "ecal.m.1", "ecal.m.2", "ecal.merged"]
        );
        let merged = outcome
            .store
            .with_container("test", "ecal.merged", HitContainer::cell_ids)
            .unwrap();
        assert_eq!(merged, vec![0x0101, 0x0201]);
    }

    #[test]
    fn test_barrier_without_enough_branches_is_rejected() {
        let config = PipelineConfig::from_json(
            r#"{
                "workers": 2,
                "root": {"kind": "sequence", "name": "main", "params": {"mode": "parallel", "children": [
                    {"kind": "synchronize", "name": "sync", "params": {"width": 2}},
                    {"kind": "store_dump", "name": "dump"}
                ]}}
            }"#,
        )
        .unwrap();
        let err = Pipeline::from_config(&config, &ActionRegistry::with_builtins())
            .err()
            .unwrap();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("'sync'")), "{err}");
    }
}
