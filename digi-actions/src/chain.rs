//! Applies a signal processor chain to stored records in place.

use crate::action::{Action, ActionKind, ContainerAccess};
use crate::combine::ContainerSelection;
use crate::processor::SignalProcessorSequence;
use digi_core::{Error, EventContext, EventStore, Hit, ProcessorError, Result};

/// Runs a [`SignalProcessorSequence`] over every record of the selected
/// containers.
///
/// A record whose chain fails keeps its previous value. In strict mode the
/// first failure stops the action; otherwise the failure is reported in the
/// store's issue ledger and processing continues.
pub struct ProcessorChainAction {
    name: String,
    containers: ContainerSelection,
    chain: SignalProcessorSequence,
    strict: bool,
}

impl ProcessorChainAction {
    pub fn new(
        name: impl Into<String>,
        containers: ContainerSelection,
        chain: SignalProcessorSequence,
    ) -> Self {
        Self {
            name: name.into(),
            containers,
            chain,
            strict: false,
        }
    }

    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn chain(&self) -> &SignalProcessorSequence {
        &self.chain
    }

    fn process_container(&self, ctx: &EventContext, store: &EventStore, name: &str) -> Result<()> {
        let mut rejected: Vec<(u64, ProcessorError)> = Vec::new();
        let outcome = store.with_container_mut(&self.name, name, |container| {
            container.records.try_for_each_mut(|hit: &mut dyn Hit| {
                match self.chain.apply(ctx, hit.signal()) {
                    Ok(signal) => hit.apply_signal(&signal),
                    Err(err) if self.strict => return Err(err),
                    Err(err) => rejected.push((hit.cell_id(), err)),
                }
                Ok(())
            })
        })?;

        for (cell_id, err) in &rejected {
            log::warn!("{}: record {:#x} in '{}' kept unchanged: {}", self.name, cell_id, name, err);
            store.report_issue(&self.name, name, format!("cell {cell_id:#x}: {err}"));
        }
        outcome.map_err(Error::from)
    }
}

impl Action for ProcessorChainAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::ProcessorChain
    }

    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
        let names = self.containers.resolve(&self.name, store)?;
        log::debug!(
            "{}: applying {} processors to {} containers for {}",
            self.name,
            self.chain.len(),
            names.len(),
            ctx
        );
        for name in &names {
            self.process_container(ctx, store, name)?;
        }
        Ok(())
    }

    fn access(&self) -> ContainerAccess {
        let declared = self.containers.declared();
        ContainerAccess {
            reads: declared.clone(),
            writes: declared,
        }
    }

    fn details(&self) -> String {
        format!(
            "{} on {}{}",
            self.chain.names().join(" > "),
            self.containers,
            if self.strict { ", strict" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use crate::processor::{FnProcessor, Gain};
    use digi_core::{HitContainer, RawHit, Signal};

    fn store() -> EventStore {
        EventStore::with_containers(
            EventContext::new(1, 0),
            [HitContainer::new(
                "trk.hits",
                vec![
                    RawHit::new(1, 1.0, 0.0, 0.0),
                    RawHit::new(2, -1.0, 0.0, 0.0),
                    RawHit::new(3, 2.0, 0.0, 0.0),
                ],
            )],
        )
        .unwrap()
    }

    fn amplitudes(store: &EventStore) -> Vec<f64> {
        store
            .with_container("test", "trk.hits", |c| {
                c.records.iter().map(Hit::amplitude).collect()
            })
            .unwrap()
    }

    fn chain() -> SignalProcessorSequence {
        let positive = FnProcessor::new("positive", |_: &EventContext, s: Signal| {
            if s.amplitude < 0.0 {
                Err(ProcessorError::Rejected {
                    processor: "positive".into(),
                    reason: "negative amplitude".into(),
                })
            } else {
                Ok(s)
            }
        });
        SignalProcessorSequence::new("chain")
            .with(positive)
            .with(Gain::new("gain", 10.0).unwrap())
    }

    #[test]
    fn test_lenient_keeps_failed_record() {
        let store = store();
        let action = ProcessorChainAction::new(
            "digitize",
            ContainerSelection::Named(vec!["trk.hits".into()]),
            chain(),
        );
        action.execute(store.context(), &store).unwrap();
        assert_eq!(amplitudes(&store), vec![10.0, -1.0, 20.0]);
        assert_eq!(store.issues().len(), 1);
    }

    #[test]
    fn test_strict_stops_at_first_failure() {
        let store = store();
        let action = ProcessorChainAction::new(
            "digitize",
            ContainerSelection::Prefix("trk.".into()),
            chain(),
        )
        .with_strict(true);
        let err = action.execute(store.context(), &store).unwrap_err();
        assert!(matches!(err, Error::Processor(ProcessorError::Rejected { .. })));
        assert_eq!(amplitudes(&store), vec![10.0, -1.0, 2.0]);
        assert!(store.issues().is_empty());
    }

    #[test]
    fn test_missing_container() {
        let store = store();
        let action = ProcessorChainAction::new(
            "digitize",
            ContainerSelection::Named(vec!["ecal.hits".into()]),
            chain(),
        );
        assert!(matches!(
            action.execute(store.context(), &store),
            Err(Error::MissingContainer { .. })
        ));
    }
}
