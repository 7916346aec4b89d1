//! Per-event store of hit containers.
//!
//! The store is the single shared-mutable hub of an event: every action reads
//! and writes containers through it, possibly from several worker threads at
//! once. Containers are never locked implicitly. Each one carries a
//! non-blocking borrow flag, so two actions touching the same container at
//! the same time (without a resource guard or subdetector partitioning to keep
//! them apart) fail with [`Error::ContainerBusy`] instead of racing or
//! silently serializing.

use crate::container::{HitContainer, HitRecords, RecordKind};
use crate::error::{Error, Result};
use crate::event::EventContext;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

type Slot = Arc<RwLock<HitContainer>>;

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, Slot>,
    kinds: HashMap<String, RecordKind>,
}

/// A recoverable per-record problem reported by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIssue {
    /// Reporting action.
    pub action: String,
    /// Container holding the record.
    pub container: String,
    /// Human-readable description.
    pub detail: String,
}

/// Short description of one stored container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub name: String,
    pub kind: RecordKind,
    pub len: usize,
}

/// Mapping from container name to [`HitContainer`] for one event.
pub struct EventStore {
    context: EventContext,
    inner: RwLock<Inner>,
    issues: Mutex<Vec<RecordIssue>>,
}

impl EventStore {
    /// Creates an empty store for `context`.
    #[must_use]
    pub fn new(context: EventContext) -> Self {
        Self {
            context,
            inner: RwLock::new(Inner::default()),
            issues: Mutex::new(Vec::new()),
        }
    }

    /// Creates a store populated with `containers`.
    ///
    /// # Errors
    /// Fails if two containers share a name.
    pub fn with_containers<I>(context: EventContext, containers: I) -> Result<Self>
    where
        I: IntoIterator<Item = HitContainer>,
    {
        let store = Self::new(context);
        for container in containers {
            store.insert(container)?;
        }
        Ok(store)
    }

    /// Returns the event this store belongs to.
    #[must_use]
    pub fn context(&self) -> &EventContext {
        &self.context
    }

    /// Adds a new container.
    ///
    /// # Errors
    /// Fails if the name is already present, or if it was used earlier in this
    /// event with another record kind.
    pub fn insert(&self, container: HitContainer) -> Result<()> {
        let mut inner = self.inner.write()?;
        if inner.containers.contains_key(&container.name) {
            return Err(Error::config(format!(
                "container '{}' already exists in the event store",
                container.name
            )));
        }
        check_kind(&mut inner, &container.name, container.kind())?;
        inner
            .containers
            .insert(container.name.clone(), Arc::new(RwLock::new(container)));
        Ok(())
    }

    /// Returns true if a container named `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.containers.contains_key(name))
            .unwrap_or(false)
    }

    /// Returns all container names in lexicographic order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|inner| inner.containers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the names starting with `prefix`, in lexicographic order.
    #[must_use]
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .containers
                    .range(prefix.to_string()..)
                    .take_while(|(name, _)| name.starts_with(prefix))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.containers.len()).unwrap_or(0)
    }

    /// Returns true if the store holds no containers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the record kind registered for `name` in this event.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<RecordKind> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.kinds.get(name).copied())
    }

    fn slot(&self, name: &str) -> Result<Option<Slot>> {
        Ok(self.inner.read()?.containers.get(name).cloned())
    }

    /// Reads a container if present.
    ///
    /// # Errors
    /// Returns [`Error::ContainerBusy`] if another action is writing it.
    pub fn try_with<R>(&self, name: &str, f: impl FnOnce(&HitContainer) -> R) -> Result<Option<R>> {
        let Some(slot) = self.slot(name)? else {
            return Ok(None);
        };
        let guard = match slot.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(busy(name)),
            Err(TryLockError::Poisoned(err)) => return Err(err.into()),
        };
        Ok(Some(f(&guard)))
    }

    /// Reads a container that `action` declared as input.
    ///
    /// # Errors
    /// Returns [`Error::MissingContainer`] if absent, [`Error::ContainerBusy`]
    /// if another action is writing it.
    pub fn with_container<R>(
        &self,
        action: &str,
        name: &str,
        f: impl FnOnce(&HitContainer) -> R,
    ) -> Result<R> {
        self.try_with(name, f)?
            .ok_or_else(|| missing(action, name))
    }

    /// Mutates an existing container.
    ///
    /// The closure must keep the record kind; a kind change is reported as
    /// [`Error::RecordKindMismatch`] and the records are restored to their
    /// state before the call.
    ///
    /// # Errors
    /// Returns [`Error::MissingContainer`] if absent, [`Error::ContainerBusy`]
    /// if any other action is reading or writing it.
    pub fn with_container_mut<R>(
        &self,
        action: &str,
        name: &str,
        f: impl FnOnce(&mut HitContainer) -> R,
    ) -> Result<R> {
        let slot = self.slot(name)?.ok_or_else(|| missing(action, name))?;
        mutate(&slot, name, f)
    }

    /// Mutates `name`, creating an empty container of `kind` on first use.
    ///
    /// # Errors
    /// Fails if the name is registered with another kind or is busy.
    pub fn with_or_create_mut<R>(
        &self,
        name: &str,
        kind: RecordKind,
        f: impl FnOnce(&mut HitContainer) -> R,
    ) -> Result<R> {
        let existing = self.slot(name)?;
        let slot = if let Some(slot) = existing {
            slot
        } else {
            let mut inner = self.inner.write()?;
            if let Some(slot) = inner.containers.get(name) {
                slot.clone()
            } else {
                check_kind(&mut inner, name, kind)?;
                let slot = Arc::new(RwLock::new(HitContainer::empty(name, kind)));
                inner.containers.insert(name.to_string(), slot.clone());
                slot
            }
        };
        let found = read_kind(&slot, name)?;
        if found != kind {
            return Err(Error::RecordKindMismatch {
                container: name.to_string(),
                expected: found,
                found: kind,
            });
        }
        mutate(&slot, name, f)
    }

    /// Appends `records` to `name`, creating the container on first use.
    ///
    /// # Errors
    /// Fails on a record kind mismatch or if the container is busy.
    pub fn append(&self, name: &str, records: &HitRecords) -> Result<()> {
        self.with_or_create_mut(name, records.kind(), |c| c.append(records))?
    }

    /// Appends each batch to its named container, creating missing ones.
    ///
    /// Either every batch is written or none is.
    ///
    /// # Errors
    /// Fails without writing anything on a repeated name, a record kind
    /// mismatch, or a target in use by another action.
    pub fn append_all(&self, batches: &[(String, HitRecords)]) -> Result<()> {
        let mut inner = self.inner.write()?;
        for (index, (name, records)) in batches.iter().enumerate() {
            if batches[..index].iter().any(|(earlier, _)| earlier == name) {
                return Err(Error::config(format!("container '{name}' appears twice in one batch")));
            }
            if let Some(&expected) = inner.kinds.get(name) {
                if expected != records.kind() {
                    return Err(Error::RecordKindMismatch {
                        container: name.clone(),
                        expected,
                        found: records.kind(),
                    });
                }
            }
        }

        let existing: Vec<Option<Slot>> = batches
            .iter()
            .map(|(name, _)| inner.containers.get(name).cloned())
            .collect();
        let mut guards = Vec::with_capacity(batches.len());
        for ((name, _), slot) in batches.iter().zip(&existing) {
            guards.push(match slot {
                None => None,
                Some(slot) => match slot.try_write() {
                    Ok(guard) => Some(guard),
                    Err(TryLockError::WouldBlock) => return Err(busy(name)),
                    Err(TryLockError::Poisoned(err)) => return Err(err.into()),
                },
            });
        }

        for ((name, records), guard) in batches.iter().zip(guards) {
            match guard {
                Some(mut guard) => guard.append(records)?,
                None => {
                    inner.kinds.insert(name.clone(), records.kind());
                    let container = HitContainer::new(name.clone(), records.clone());
                    inner
                        .containers
                        .insert(name.clone(), Arc::new(RwLock::new(container)));
                }
            }
        }
        Ok(())
    }

    /// Removes every named container that exists, all or none.
    ///
    /// Absent names are skipped. The names keep their record kinds.
    ///
    /// # Errors
    /// Returns [`Error::ContainerBusy`] without removing anything if one of
    /// them is still in use.
    pub fn remove_all(&self, names: &[String]) -> Result<Vec<HitContainer>> {
        let mut inner = self.inner.write()?;
        if let Some(name) = names.iter().find(|name| {
            inner
                .containers
                .get(name.as_str())
                .is_some_and(|slot| Arc::strong_count(slot) > 1)
        }) {
            return Err(busy(name));
        }
        let slots: Vec<(String, Slot)> = names
            .iter()
            .filter_map(|name| inner.containers.remove(name).map(|slot| (name.clone(), slot)))
            .collect();
        drop(inner);
        slots
            .into_iter()
            .map(|(name, slot)| unwrap_slot(slot, &name))
            .collect()
    }

    /// Removes a container and returns it.
    ///
    /// The name keeps its record kind for the rest of the event.
    ///
    /// # Errors
    /// Returns [`Error::ContainerBusy`] if an action is still using it.
    pub fn remove(&self, name: &str) -> Result<Option<HitContainer>> {
        let mut inner = self.inner.write()?;
        match inner.containers.get(name) {
            None => return Ok(None),
            Some(slot) if Arc::strong_count(slot) > 1 => return Err(busy(name)),
            Some(_) => {}
        }
        let Some(slot) = inner.containers.remove(name) else {
            return Ok(None);
        };
        drop(inner);
        unwrap_slot(slot, name).map(Some)
    }

    /// Total number of records across all containers.
    ///
    /// # Errors
    /// Returns [`Error::ContainerBusy`] if a container is being written.
    pub fn total_records(&self) -> Result<usize> {
        Ok(self.summary()?.iter().map(|s| s.len).sum())
    }

    /// Describes every container in name order.
    ///
    /// # Errors
    /// Returns [`Error::ContainerBusy`] if a container is being written.
    pub fn summary(&self) -> Result<Vec<ContainerSummary>> {
        let slots: Vec<(String, Slot)> = self
            .inner
            .read()?
            .containers
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .map(|(name, slot)| {
                let guard = match slot.try_read() {
                    Ok(guard) => guard,
                    Err(TryLockError::WouldBlock) => return Err(busy(&name)),
                    Err(TryLockError::Poisoned(err)) => return Err(err.into()),
                };
                Ok(ContainerSummary {
                    kind: guard.kind(),
                    len: guard.len(),
                    name,
                })
            })
            .collect()
    }

    /// Records a recoverable per-record problem.
    pub fn report_issue(&self, action: &str, container: &str, detail: impl Into<String>) {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordIssue {
                action: action.to_string(),
                container: container.to_string(),
                detail: detail.into(),
            });
    }

    /// Returns the issues reported so far.
    #[must_use]
    pub fn issues(&self) -> Vec<RecordIssue> {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tears the store down, releasing containers in name order.
    ///
    /// # Errors
    /// Returns [`Error::ContainerBusy`] if a container handle is still shared.
    pub fn into_containers(self) -> Result<Vec<HitContainer>> {
        let inner = self
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        inner
            .containers
            .into_iter()
            .map(|(name, slot)| unwrap_slot(slot, &name))
            .collect()
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("context", &self.context)
            .field("containers", &self.names())
            .finish_non_exhaustive()
    }
}

fn check_kind(inner: &mut Inner, name: &str, kind: RecordKind) -> Result<()> {
    match inner.kinds.get(name) {
        Some(&expected) if expected != kind => Err(Error::RecordKindMismatch {
            container: name.to_string(),
            expected,
            found: kind,
        }),
        Some(_) => Ok(()),
        None => {
            inner.kinds.insert(name.to_string(), kind);
            Ok(())
        }
    }
}

fn read_kind(slot: &Slot, name: &str) -> Result<RecordKind> {
    match slot.try_read() {
        Ok(guard) => Ok(guard.kind()),
        Err(TryLockError::WouldBlock) => Err(busy(name)),
        Err(TryLockError::Poisoned(err)) => Err(err.into()),
    }
}

fn mutate<R>(slot: &Slot, name: &str, f: impl FnOnce(&mut HitContainer) -> R) -> Result<R> {
    let mut guard = match slot.try_write() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => return Err(busy(name)),
        Err(TryLockError::Poisoned(err)) => return Err(err.into()),
    };
    let expected = guard.kind();
    let snapshot = guard.records.clone();
    let result = f(&mut guard);
    guard.name = name.to_string();
    if guard.kind() != expected {
        let found = std::mem::replace(&mut guard.records, snapshot).kind();
        return Err(Error::RecordKindMismatch {
            container: name.to_string(),
            expected,
            found,
        });
    }
    Ok(result)
}

fn unwrap_slot(slot: Slot, name: &str) -> Result<HitContainer> {
    Arc::try_unwrap(slot)
        .map_err(|_| busy(name))?
        .into_inner()
        .map_err(Into::into)
}

fn busy(name: &str) -> Error {
    Error::ContainerBusy {
        container: name.to_string(),
    }
}

fn missing(action: &str, name: &str) -> Error {
    Error::MissingContainer {
        action: action.to_string(),
        container: name.to_string(),
    }
}
