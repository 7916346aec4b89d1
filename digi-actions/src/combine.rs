//! Merges several hit containers into one.

use crate::action::{Action, ActionKind, ContainerAccess};
use digi_core::{Error, EventContext, EventStore, HitRecords, Result};
use serde::{Deserialize, Serialize};

/// Set of containers an action works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerSelection {
    /// Explicit names; each one must exist in the store.
    Named(Vec<String>),
    /// Every container whose name starts with the prefix, in name order.
    Prefix(String),
}

impl ContainerSelection {
    /// Resolves the selection against `store`.
    ///
    /// # Errors
    /// Returns [`Error::MissingContainer`] for an absent named container.
    pub fn resolve(&self, action: &str, store: &EventStore) -> Result<Vec<String>> {
        match self {
            Self::Named(names) => {
                if let Some(missing) = names.iter().find(|name| !store.contains(name)) {
                    return Err(Error::MissingContainer {
                        action: action.to_string(),
                        container: missing.clone(),
                    });
                }
                Ok(names.clone())
            }
            Self::Prefix(prefix) => Ok(store.names_with_prefix(prefix)),
        }
    }

    /// True if `name` is part of this selection by declaration.
    #[must_use]
    pub fn covers(&self, name: &str) -> bool {
        match self {
            Self::Named(names) => names.iter().any(|n| n == name),
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }

    /// Declared names, prefix selections rendered as `"{prefix}*"`.
    #[must_use]
    pub fn declared(&self) -> Vec<String> {
        match self {
            Self::Named(names) => names.clone(),
            Self::Prefix(prefix) => vec![format!("{prefix}*")],
        }
    }
}

impl std::fmt::Display for ContainerSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(names) => write!(f, "{}", names.join(", ")),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Appends the records of several input containers into one output.
pub struct ContainerCombine {
    name: String,
    inputs: ContainerSelection,
    output: String,
    erase_inputs: bool,
}

impl ContainerCombine {
    /// Creates a combiner.
    ///
    /// # Errors
    /// Fails if the output is one of the inputs.
    pub fn new(
        name: impl Into<String>,
        inputs: ContainerSelection,
        output: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let output = output.into();
        if inputs.covers(&output) {
            return Err(Error::config(format!(
                "combine '{name}': output '{output}' is also an input"
            )));
        }
        Ok(Self {
            name,
            inputs,
            output,
            erase_inputs: false,
        })
    }

    /// Removes the inputs from the store once they are combined.
    ///
    /// The inputs are removed together after the output is written. If one
    /// of them is still in use the action fails with every input in place,
    /// and the output keeps the appended records.
    #[must_use]
    pub fn with_erase_inputs(mut self, erase: bool) -> Self {
        self.erase_inputs = erase;
        self
    }

    fn gather(&self, store: &EventStore, inputs: &[String]) -> Result<Option<HitRecords>> {
        let mut merged: Option<HitRecords> = None;
        for input in inputs {
            store.with_container(&self.name, input, |container| match &mut merged {
                None => {
                    merged = Some(container.records.clone());
                    Ok(())
                }
                Some(acc) => acc.extend_from(&container.records).map_err(|found| {
                    Error::RecordKindMismatch {
                        container: input.clone(),
                        expected: acc.kind(),
                        found,
                    }
                }),
            })??;
        }
        Ok(merged)
    }
}

impl Action for ContainerCombine {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Combine
    }

    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
        let inputs = self.inputs.resolve(&self.name, store)?;
        match self.gather(store, &inputs)? {
            Some(records) => {
                log::debug!(
                    "{}: {} records from {} containers into '{}' for {}",
                    self.name,
                    records.len(),
                    inputs.len(),
                    self.output,
                    ctx
                );
                store.append(&self.output, &records)?;
            }
            None => match store.kind_of(&self.output) {
                Some(kind) => store.append(&self.output, &HitRecords::empty(kind))?,
                None => log::debug!("{}: no inputs matched {}", self.name, self.inputs),
            },
        }
        if self.erase_inputs {
            store.remove_all(&inputs)?;
        }
        Ok(())
    }

    fn access(&self) -> ContainerAccess {
        ContainerAccess {
            reads: self.inputs.declared(),
            writes: vec![self.output.clone()],
        }
    }

    fn details(&self) -> String {
        format!("{} -> {}", self.inputs, self.output)
    }
}
