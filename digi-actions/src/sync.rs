//! Rendezvous barrier for parallel branches of one event.

use crate::action::{Action, ActionKind};
use digi_core::{Error, EventContext, EventStore, Result};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    event: Option<u64>,
}

/// Blocks callers until `width` of them for the same event have arrived.
///
/// The barrier is reusable: once a generation is released it resets for the
/// next one. Share one instance between branches through an `Arc`.
pub struct Synchronize {
    name: String,
    width: usize,
    timeout: Option<Duration>,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl Synchronize {
    /// Creates a barrier for `width` participants.
    ///
    /// # Errors
    /// A width of zero is rejected.
    pub fn new(name: impl Into<String>, width: usize) -> Result<Self> {
        let name = name.into();
        if width == 0 {
            return Err(Error::config(format!(
                "synchronize '{name}' needs a width of at least 1"
            )));
        }
        Ok(Self {
            name,
            width,
            timeout: None,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        })
    }

    /// Bounds the wait of each participant.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of generations released so far.
    #[must_use]
    pub fn generations(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Arrives at the barrier and waits for the rest of the generation.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a generation for another event is still
    /// open, [`Error::ConcurrencyTimeout`] if the wait exceeds the timeout.
    pub fn wait(&self, ctx: &EventContext) -> Result<()> {
        let mut state = self.state.lock()?;
        let pending = state.event.filter(|_| state.arrived > 0);
        if let Some(open) = pending.filter(|open| *open != ctx.event_number) {
            return Err(Error::config(format!(
                "synchronize '{}': event {} arrived while event {} is pending",
                self.name, ctx.event_number, open
            )));
        }
        state.event = Some(ctx.event_number);

        state.arrived += 1;
        let generation = state.generation;
        if state.arrived == self.width {
            state.arrived = 0;
            state.event = None;
            state.generation += 1;
            drop(state);
            self.released.notify_all();
            log::debug!("{}: released generation {} for {}", self.name, generation, ctx);
            return Ok(());
        }

        log::trace!(
            "{}: {} of {} arrived for {}",
            self.name,
            state.arrived,
            self.width,
            ctx
        );
        let started = Instant::now();
        match self.timeout {
            None => {
                let _state = self
                    .released
                    .wait_while(state, |s| s.generation == generation)?;
                Ok(())
            }
            Some(timeout) => {
                let (mut state, result) =
                    self.released
                        .wait_timeout_while(state, timeout, |s| s.generation == generation)?;
                if result.timed_out() && state.generation == generation {
                    state.arrived -= 1;
                    if state.arrived == 0 {
                        state.event = None;
                    }
                    return Err(Error::ConcurrencyTimeout {
                        resource: format!("synchronize '{}'", self.name),
                        waited: started.elapsed(),
                    });
                }
                Ok(())
            }
        }
    }
}

impl Action for Synchronize {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Synchronize
    }

    fn execute(&self, ctx: &EventContext, _store: &EventStore) -> Result<()> {
        self.wait(ctx)
    }

    fn details(&self) -> String {
        format!("width={}", self.width)
    }
}

impl std::fmt::Debug for Synchronize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronize")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
