//! Action sequences: the scheduler of the pipeline.
//!
//! A sequence runs its children either in declared order on the calling
//! thread, or concurrently on the shared [`WorkerPool`] with join semantics.
//! Sequences nest freely in both directions.

use crate::action::{Action, ActionKind};
use crate::pool::WorkerPool;
use digi_core::{Error, EventContext, EventStore, Result};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// Execution mode of a sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Children run in declared order on the invoking thread.
    #[default]
    Sequential,
    /// Children are dispatched to the worker pool and joined.
    Parallel,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

/// Ordered list of actions with an execution mode.
pub struct ActionSequence {
    name: String,
    mode: ExecutionMode,
    children: Vec<Box<dyn Action>>,
    pool: Option<Arc<WorkerPool>>,
}

impl ActionSequence {
    /// Creates an empty sequential sequence.
    pub fn sequential(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: ExecutionMode::Sequential,
            children: Vec::new(),
            pool: None,
        }
    }

    /// Creates an empty parallel sequence dispatching onto `pool`.
    pub fn parallel(name: impl Into<String>, pool: Arc<WorkerPool>) -> Self {
        Self {
            name: name.into(),
            mode: ExecutionMode::Parallel,
            children: Vec::new(),
            pool: Some(pool),
        }
    }

    /// Creates a sequence of the given mode.
    ///
    /// # Errors
    /// Parallel mode requires a pool.
    pub fn with_mode(
        name: impl Into<String>,
        mode: ExecutionMode,
        pool: Option<Arc<WorkerPool>>,
    ) -> Result<Self> {
        let name = name.into();
        match (mode, pool) {
            (ExecutionMode::Sequential, _) => Ok(Self::sequential(name)),
            (ExecutionMode::Parallel, Some(pool)) => Ok(Self::parallel(name, pool)),
            (ExecutionMode::Parallel, None) => Err(Error::config(format!(
                "parallel sequence '{name}' has no worker pool"
            ))),
        }
    }

    /// Appends a child action.
    #[must_use]
    pub fn with(mut self, child: impl Action + 'static) -> Self {
        self.children.push(Box::new(child));
        self
    }

    /// Appends a boxed child action.
    pub fn push(&mut self, child: Box<dyn Action>) {
        self.children.push(child);
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn run_sequential(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
        for child in &self.children {
            log::debug!("{}: running '{}' for {}", self.name, child.name(), ctx);
            child.execute(ctx, store).map_err(|err| Error::Sequence {
                sequence: self.name.clone(),
                first: Box::new(err),
                additional: 0,
            })?;
        }
        Ok(())
    }

    fn run_parallel(&self, pool: &WorkerPool, ctx: &EventContext, store: &EventStore) -> Result<()> {
        let failures: Mutex<Vec<(usize, Error)>> = Mutex::new(Vec::new());

        pool.scope(|scope| {
            for (index, child) in self.children.iter().enumerate() {
                let failures = &failures;
                scope.spawn(move |_| {
                    log::debug!("{}: dispatching '{}' for {}", self.name, child.name(), ctx);
                    let result = catch_unwind(AssertUnwindSafe(|| child.execute(ctx, store)))
                        .unwrap_or_else(|payload| Err(Error::from_panic(child.name(), &*payload)));
                    if let Err(err) = result {
                        failures
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((index, err));
                    }
                });
            }
        });

        let mut failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
        if failures.is_empty() {
            return Ok(());
        }
        failures.sort_by_key(|(index, _)| *index);
        let additional = failures.len() - 1;
        let (index, first) = failures.swap_remove(0);
        log::warn!(
            "{}: {} of {} children failed, first at position {}",
            self.name,
            additional + 1,
            self.children.len(),
            index
        );
        Err(Error::Sequence {
            sequence: self.name.clone(),
            first: Box::new(first),
            additional,
        })
    }
}

impl Action for ActionSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Sequence
    }

    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
        match (self.mode, &self.pool) {
            (ExecutionMode::Parallel, Some(pool)) if !self.children.is_empty() => {
                self.run_parallel(pool, ctx, store)
            }
            _ => self.run_sequential(ctx, store),
        }
    }

    fn children(&self) -> Vec<&dyn Action> {
        self.children.iter().map(AsRef::as_ref).collect()
    }

    fn details(&self) -> String {
        self.mode.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::ThreadId;

    struct Record {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Record {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                fail: false,
            }
        }

        fn failing(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                fail: true,
                ..Self::new(name, log)
            }
        }
    }

    impl Action for Record {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ActionKind {
            ActionKind::Custom
        }

        fn execute(&self, _: &EventContext, _: &EventStore) -> Result<()> {
            self.log.lock().unwrap().push(self.name.clone());
            if self.fail {
                Err(Error::config(format!("{} failed", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn store() -> EventStore {
        EventStore::new(EventContext::new(0, 0))
    }

    #[test]
    fn test_sequential_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seq = ActionSequence::sequential("main")
            .with(Record::new("a", &log))
            .with(Record::new("b", &log))
            .with(Record::new("c", &log));
        let store = store();
        seq.execute(store.context(), &store).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sequential_failure_stops_remaining() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seq = ActionSequence::sequential("main")
            .with(Record::new("a", &log))
            .with(Record::failing("b", &log))
            .with(Record::new("c", &log));
        let store = store();
        let err = seq.execute(store.context(), &store).unwrap_err();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(err.failure_count(), 1);
        assert!(err.to_string().contains("b failed"));
    }

    #[test]
    fn test_parallel_collects_all_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = Arc::new(WorkerPool::new(4).unwrap());
        let seq = ActionSequence::parallel("par", pool)
            .with(Record::new("a", &log))
            .with(Record::failing("b", &log))
            .with(Record::new("c", &log))
            .with(Record::failing("d", &log));
        let store = store();
        let err = seq.execute(store.context(), &store).unwrap_err();

        // Siblings are never interrupted.
        assert_eq!(log.lock().unwrap().len(), 4);
        match &err {
            Error::Sequence {
                sequence,
                first,
                additional,
            } => {
                assert_eq!(sequence, "par");
                assert_eq!(*additional, 1);
                assert!(first.to_string().contains("b failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct ThreadProbe {
        threads: Arc<Mutex<Vec<ThreadId>>>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Action for ThreadProbe {
        fn name(&self) -> &str {
            "probe"
        }

        fn kind(&self) -> ActionKind {
            ActionKind::Custom
        }

        fn execute(&self, _: &EventContext, _: &EventStore) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_sequential_never_uses_pool() {
        let threads = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut seq = ActionSequence::sequential("main");
        for _ in 0..3 {
            seq.push(Box::new(ThreadProbe {
                threads: threads.clone(),
                running: running.clone(),
                peak: peak.clone(),
            }));
        }
        let store = store();
        seq.execute(store.context(), &store).unwrap();
        let me = std::thread::current().id();
        assert!(threads.lock().unwrap().iter().all(|id| *id == me));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parallel_is_bounded_by_pool() {
        let threads = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let mut seq = ActionSequence::parallel("par", pool);
        for _ in 0..6 {
            seq.push(Box::new(ThreadProbe {
                threads: threads.clone(),
                running: running.clone(),
                peak: peak.clone(),
            }));
        }
        let store = store();
        seq.execute(store.context(), &store).unwrap();
        assert_eq!(threads.lock().unwrap().len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_nested_parallel_in_sequential_is_joined() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let inner = ActionSequence::parallel("inner", pool)
            .with(Record::new("p1", &log))
            .with(Record::new("p2", &log));
        let seq = ActionSequence::sequential("outer")
            .with(Record::new("first", &log))
            .with(inner)
            .with(Record::new("last", &log));
        let store = store();
        seq.execute(store.context(), &store).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.first().map(String::as_str), Some("first"));
        assert_eq!(log.last().map(String::as_str), Some("last"));
        assert_eq!(log.len(), 4);
    }

    struct Panics;

    impl Action for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn kind(&self) -> ActionKind {
            ActionKind::Custom
        }

        fn execute(&self, _: &EventContext, _: &EventStore) -> Result<()> {
            panic!("boom");
        }
    }

    #[test]
    fn test_parallel_contains_panics() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let seq = ActionSequence::parallel("par", pool).with(Panics);
        let store = store();
        let err = seq.execute(store.context(), &store).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            Error::ActionPanicked { action, message } if action == "panics" && message == "boom"
        ));
    }

    #[test]
    fn test_with_mode_requires_pool_for_parallel() {
        assert!(ActionSequence::with_mode("x", ExecutionMode::Parallel, None).is_err());
        let seq = ActionSequence::with_mode("x", ExecutionMode::Sequential, None).unwrap();
        assert_eq!(seq.mode(), ExecutionMode::Sequential);
        assert!(seq.is_empty());
    }
}
