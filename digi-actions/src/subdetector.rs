//! Sequences bound to one subdetector.

use crate::action::{collect_access, Action, ActionKind, ContainerAccess};
use crate::sequence::ActionSequence;
use digi_core::{EventContext, EventStore, Result};

/// An [`ActionSequence`] whose children work on one subdetector's containers.
///
/// By convention every container a child touches is named with the
/// subdetector as prefix, which lets subdetector sequences run side by side
/// in a parallel parent without locking.
pub struct SubdetectorSequence {
    subdetector: String,
    sequence: ActionSequence,
}

impl SubdetectorSequence {
    /// Wraps `sequence` and warns about descendants that declare containers
    /// outside the subdetector's prefix.
    pub fn new(subdetector: impl Into<String>, sequence: ActionSequence) -> Self {
        let this = Self {
            subdetector: subdetector.into(),
            sequence,
        };
        for name in this.foreign_containers() {
            log::warn!(
                "subdetector '{}': action tree declares container '{}' outside its prefix",
                this.subdetector,
                name
            );
        }
        this
    }

    #[must_use]
    pub fn subdetector(&self) -> &str {
        &self.subdetector
    }

    /// Declared container names outside `"{subdetector}."`.
    #[must_use]
    pub fn foreign_containers(&self) -> Vec<String> {
        let prefix = format!("{}.", self.subdetector);
        let access = collect_access(&self.sequence);
        access
            .all()
            .filter(|name| *name != self.subdetector && !name.starts_with(&prefix))
            .map(str::to_string)
            .collect()
    }
}

impl Action for SubdetectorSequence {
    fn name(&self) -> &str {
        self.sequence.name()
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Subdetector
    }

    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
        log::debug!("subdetector '{}' running for {}", self.subdetector, ctx);
        self.sequence.execute(ctx, store)
    }

    fn access(&self) -> ContainerAccess {
        self.sequence.access()
    }

    fn children(&self) -> Vec<&dyn Action> {
        self.sequence.children()
    }

    fn details(&self) -> String {
        format!("{}, {}", self.subdetector, self.sequence.details())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Touches(&'static str);

    impl Action for Touches {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> ActionKind {
            ActionKind::Custom
        }

        fn execute(&self, _: &EventContext, _: &EventStore) -> Result<()> {
            Ok(())
        }

        fn access(&self) -> ContainerAccess {
            ContainerAccess {
                reads: vec![self.0.to_string()],
                writes: Vec::new(),
            }
        }
    }

    #[test]
    fn test_foreign_containers_reported() {
        let seq = ActionSequence::sequential("ecal")
            .with(Touches("ecal.deposits"))
            .with(Touches("hcal.deposits"))
            .with(Touches("ecal2.hits"))
            .with(Touches("ecalhits"));
        let sub = SubdetectorSequence::new("ecal", seq);
        assert_eq!(
            sub.foreign_containers(),
            vec!["hcal.deposits", "ecal2.hits", "ecalhits"]
        );
        assert_eq!(sub.kind(), ActionKind::Subdetector);
        assert_eq!(sub.children().len(), 4);
    }

    #[test]
    fn test_runs_wrapped_sequence() {
        let sub = SubdetectorSequence::new(
            "ecal",
            ActionSequence::sequential("ecal-seq").with(Touches("ecal.x")),
        );
        let store = EventStore::new(EventContext::new(1, 0));
        sub.execute(store.context(), &store).unwrap();
        assert!(sub.foreign_containers().is_empty());
        assert_eq!(sub.details(), "ecal, sequential");
    }
}
