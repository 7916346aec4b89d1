//! Diagnostic action logging the store contents.

use crate::action::{Action, ActionKind};
use digi_core::{EventContext, EventStore, Result};
use std::fmt::Write as _;

/// Logs container names, record kinds and counts at `info` level.
pub struct StoreDump {
    name: String,
}

impl StoreDump {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Renders the store summary as text.
    ///
    /// # Errors
    /// Fails if a container is being written by another action.
    pub fn render(store: &EventStore) -> Result<String> {
        let summary = store.summary()?;
        let mut out = format!(
            "{}: {} containers, {} issues",
            store.context(),
            summary.len(),
            store.issues().len()
        );
        for entry in &summary {
            let _ = write!(out, "\n  {:<32} {:>8} x {}", entry.name, entry.len, entry.kind);
        }
        Ok(out)
    }
}

impl Action for StoreDump {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::StoreDump
    }

    fn execute(&self, _ctx: &EventContext, store: &EventStore) -> Result<()> {
        log::info!("{}: {}", self.name, Self::render(store)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digi_core::{HitContainer, RawHit};

    #[test]
    fn test_render_lists_containers() {
        let store = EventStore::with_containers(
            EventContext::new(12, 5),
            [HitContainer::new("trk.hits", vec![RawHit::new(1, 1.0, 0.0, 0.0)])],
        )
        .unwrap();
        store.report_issue("x", "trk.hits", "odd");
        let text = StoreDump::render(&store).unwrap();
        assert!(text.starts_with("event #12"));
        assert!(text.contains("1 containers, 1 issues"));
        assert!(text.contains("trk.hits"));
        assert!(text.contains("raw-hit"));

        let dump = StoreDump::new("dump");
        dump.execute(store.context(), &store).unwrap();
    }
}
