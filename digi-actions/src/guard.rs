//! Named mutual-exclusion guards.
//!
//! A [`ResourceGuard`] protects a resource that is not safe for concurrent
//! use. Holding it is represented by a [`GuardToken`]; dropping the token
//! (normally or while unwinding) releases the guard.

use digi_core::{Error, EventContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Lifetime of the guards handed out by a [`GuardRegistry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardScope {
    /// One guard per name, shared across every event of the pipeline.
    #[default]
    Pipeline,
    /// One guard per name and event; dropped when the event ends.
    Event,
}

/// Named mutual-exclusion token.
#[derive(Debug)]
pub struct ResourceGuard {
    name: String,
    holder: Mutex<Option<ThreadId>>,
    freed: Condvar,
}

impl ResourceGuard {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            holder: Mutex::new(None),
            freed: Condvar::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while some thread holds the guard.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Blocks until the guard is free, then takes it.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the calling thread already holds the
    /// guard, [`Error::ConcurrencyTimeout`] if `timeout` elapses first.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<GuardToken<'_>> {
        let me = std::thread::current().id();
        let started = Instant::now();
        let mut holder = self.holder.lock()?;
        if *holder == Some(me) {
            return Err(Error::config(format!(
                "guard '{}' is already held by this thread",
                self.name
            )));
        }

        holder = match timeout {
            None => self.freed.wait_while(holder, |h| h.is_some())?,
            Some(timeout) => {
                let (holder, result) = self
                    .freed
                    .wait_timeout_while(holder, timeout, |h| h.is_some())?;
                if result.timed_out() && holder.is_some() {
                    return Err(Error::ConcurrencyTimeout {
                        resource: format!("guard '{}'", self.name),
                        waited: started.elapsed(),
                    });
                }
                holder
            }
        };
        *holder = Some(me);
        log::trace!("guard '{}' acquired after {:?}", self.name, started.elapsed());
        Ok(GuardToken { guard: self })
    }

    fn release(&self) {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.freed.notify_one();
    }
}

/// Proof of holding a [`ResourceGuard`]; releases it on drop.
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a ResourceGuard,
}

impl GuardToken<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        self.guard.name()
    }
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.release();
        log::trace!("guard '{}' released", self.guard.name);
    }
}

type GuardKey = (Option<u64>, String);

/// Hands out guard instances by name.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    scope: GuardScope,
    guards: Mutex<HashMap<GuardKey, Arc<ResourceGuard>>>,
}

impl GuardRegistry {
    #[must_use]
    pub fn new(scope: GuardScope) -> Self {
        Self {
            scope,
            guards: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn scope(&self) -> GuardScope {
        self.scope
    }

    /// Returns the guard named `name` for the event of `ctx`.
    pub fn guard(&self, ctx: &EventContext, name: &str) -> Arc<ResourceGuard> {
        let event = match self.scope {
            GuardScope::Pipeline => None,
            GuardScope::Event => Some(ctx.event_number),
        };
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((event, name.to_string()))
            .or_insert_with(|| Arc::new(ResourceGuard::new(name)))
            .clone()
    }

    /// Drops the event-scoped guards of `ctx`.
    pub fn end_event(&self, ctx: &EventContext) {
        if self.scope == GuardScope::Event {
            self.guards
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(event, _), _| *event != Some(ctx.event_number));
        }
    }

    /// Number of live guard instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
