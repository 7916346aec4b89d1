//! Action wrapper that runs its delegate under a named guard.

use crate::action::{Action, ActionKind};
use crate::guard::GuardRegistry;
use digi_core::{EventContext, EventStore, Result};
use std::sync::Arc;
use std::time::Duration;

/// Runs `delegate` while holding the guard `guard_name`.
///
/// The guard is released on every exit path, including failures and panics
/// of the delegate.
pub struct LockedAction {
    name: String,
    guard_name: String,
    delegate: Box<dyn Action>,
    registry: Arc<GuardRegistry>,
    timeout: Option<Duration>,
}

impl LockedAction {
    pub fn new(
        name: impl Into<String>,
        guard_name: impl Into<String>,
        delegate: Box<dyn Action>,
        registry: Arc<GuardRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            guard_name: guard_name.into(),
            delegate,
            registry,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn guard_name(&self) -> &str {
        &self.guard_name
    }
}

impl Action for LockedAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Locked
    }

    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
        let guard = self.registry.guard(ctx, &self.guard_name);
        let _token = guard.acquire(self.timeout)?;
        log::debug!("{}: holding guard '{}' for {}", self.name, self.guard_name, ctx);
        self.delegate.execute(ctx, store)
    }

    fn children(&self) -> Vec<&dyn Action> {
        vec![self.delegate.as_ref()]
    }

    fn details(&self) -> String {
        format!("guard={}", self.guard_name)
    }
}
