//! Event sources feeding the pipeline.

use crate::{Error, Result};
use digi_core::{BitFieldCoder, EnergyDeposit, EventContext, EventStore, HitContainer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Supplies the initial containers of each event.
pub trait EventSource {
    /// Produces the store for the event `ctx`.
    ///
    /// # Errors
    /// Returns [`digi_core::Error::EndOfInput`] (wrapped) once exhausted.
    fn next(&mut self, ctx: &EventContext) -> Result<EventStore>;
}

fn end_of_input() -> Error {
    Error::Core(digi_core::Error::EndOfInput)
}

/// Queue of prepared container sets.
#[derive(Debug, Default)]
pub struct MemorySource {
    events: VecDeque<Vec<HitContainer>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the containers of one more event.
    pub fn push(&mut self, containers: Vec<HitContainer>) {
        self.events.push_back(containers);
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl FromIterator<Vec<HitContainer>> for MemorySource {
    fn from_iter<I: IntoIterator<Item = Vec<HitContainer>>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

impl EventSource for MemorySource {
    fn next(&mut self, ctx: &EventContext) -> Result<EventStore> {
        let containers = self.events.pop_front().ok_or_else(end_of_input)?;
        Ok(EventStore::with_containers(*ctx, containers)?)
    }
}

/// One serialized event: the containers present before any action runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub containers: Vec<HitContainer>,
}

/// Reads one JSON [`EventRecord`] per line; blank lines are skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl JsonLinesSource<BufReader<File>> {
    /// Opens a JSON lines file.
    ///
    /// # Errors
    /// Fails if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    /// Line number of the last line read.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> EventSource for JsonLinesSource<R> {
    fn next(&mut self, ctx: &EventContext) -> Result<EventStore> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Err(end_of_input());
            }
            self.line += 1;
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            let record: EventRecord = serde_json::from_str(text)?;
            return EventStore::with_containers(*ctx, record.containers).map_err(|err| {
                Error::InvalidEvent {
                    line: self.line,
                    reason: err.to_string(),
                }
            });
        }
    }
}

/// Deterministic generator of energy deposits.
///
/// Each event draws from its own generator seeded with the source seed and
/// the event number, so the content of an event does not depend on which
/// events were generated before it.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    seed: u64,
    deposits_per_container: usize,
    containers: Vec<(String, BitFieldCoder)>,
    limit: Option<u64>,
    produced: u64,
}

impl SyntheticSource {
    #[must_use]
    pub fn new(seed: u64, deposits_per_container: usize) -> Self {
        Self {
            seed,
            deposits_per_container,
            containers: Vec::new(),
            limit: None,
            produced: 0,
        }
    }

    /// Adds a container whose cell ids follow `coder`.
    #[must_use]
    pub fn with_container(mut self, name: impl Into<String>, coder: BitFieldCoder) -> Self {
        self.containers.push((name.into(), coder));
        self
    }

    /// Stops after `events` events.
    #[must_use]
    pub fn with_limit(mut self, events: u64) -> Self {
        self.limit = Some(events);
        self
    }

    fn cell_id(rng: &mut StdRng, coder: &BitFieldCoder) -> u64 {
        let mut cell_id = 0u64;
        for field in coder.fields() {
            let max = field.max_value().min(15);
            let value = rng.gen_range(field.min_value().max(0)..=max);
            // Range is within the field, so set cannot fail.
            let _ = field.set(&mut cell_id, value);
        }
        cell_id
    }

    fn generate(&self, ctx: &EventContext) -> Vec<HitContainer> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ ctx.event_number.rotate_left(32));
        self.containers
            .iter()
            .map(|(name, coder)| {
                let deposits: Vec<EnergyDeposit> = (0..self.deposits_per_container)
                    .map(|_| {
                        let cell_id = Self::cell_id(&mut rng, coder);
                        let position = [
                            rng.gen_range(-100.0..100.0),
                            rng.gen_range(-100.0..100.0),
                            rng.gen_range(-100.0..100.0),
                        ];
                        EnergyDeposit::new(cell_id, position, rng.gen_range(0.0..1.0), rng.gen_range(0.0..50.0))
                    })
                    .collect();
                HitContainer::new(name.clone(), deposits)
            })
            .collect()
    }
}

impl EventSource for SyntheticSource {
    fn next(&mut self, ctx: &EventContext) -> Result<EventStore> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Err(end_of_input());
        }
        self.produced += 1;
        Ok(EventStore::with_containers(*ctx, self.generate(ctx))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digi_core::{HitRecords, RawHit};
    use std::io::Cursor;

    #[test]
    fn test_memory_source_drains_in_order() {
        let mut source: MemorySource = vec![
            vec![HitContainer::new("a", vec![RawHit::new(1, 1.0, 0.0, 0.0)])],
            vec![HitContainer::new("b", vec![RawHit::new(2, 1.0, 0.0, 0.0)])],
        ]
        .into_iter()
        .collect();
        assert_eq!(source.len(), 2);
        let first = source.next(&EventContext::new(0, 0)).unwrap();
        assert_eq!(first.names(), vec!["a"]);
        let second = source.next(&EventContext::new(1, 0)).unwrap();
        assert_eq!(second.context().event_number, 1);
        assert!(source.next(&EventContext::new(2, 0)).unwrap_err().is_end_of_input());
    }

    #[test]
    fn test_json_lines_source() {
        let record = EventRecord {
            containers: vec![HitContainer::new(
                "ecal.deposits",
                vec![EnergyDeposit::new(7, [1.0, 2.0, 3.0], 0.5, 1.0)],
            )],
        };
        let line = serde_json::to_string(&record).unwrap();
        let input = format!("{line}\n\n{line}\nnot json\n");
        let mut source = JsonLinesSource::new(Cursor::new(input));

        let store = source.next(&EventContext::new(0, 0)).unwrap();
        assert_eq!(store.names(), vec!["ecal.deposits"]);
        let records = store
            .with_container("test", "ecal.deposits", |c| c.records.clone())
            .unwrap();
        assert_eq!(
            records,
            HitRecords::Deposits(vec![EnergyDeposit::new(7, [1.0, 2.0, 3.0], 0.5, 1.0)])
        );

        assert!(source.next(&EventContext::new(1, 0)).is_ok());
        assert_eq!(source.line(), 3);

        let err = source.next(&EventContext::new(2, 0)).unwrap_err();
        assert!(err.is_event_local());
        assert!(source.next(&EventContext::new(3, 0)).unwrap_err().is_end_of_input());
    }

    #[test]
    fn test_json_lines_duplicate_container_is_invalid_event() {
        let input = r#"{"containers": [
            {"name": "a", "records": {"kind": "raw_hits", "records": []}},
            {"name": "a", "records": {"kind": "raw_hits", "records": []}}
        ]}"#
        .replace('\n', " ");
        let mut source = JsonLinesSource::new(Cursor::new(input));
        let err = source.next(&EventContext::new(0, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidEvent { line: 1, .. }));
    }

    #[test]
    fn test_synthetic_is_deterministic_per_event() {
        let coder = BitFieldCoder::parse("system:8,module:8,cell:16").unwrap();
        let mut a = SyntheticSource::new(42, 10).with_container("ecal.deposits", coder.clone());
        let mut b = SyntheticSource::new(42, 10)
            .with_container("ecal.deposits", coder.clone())
            .with_limit(1);

        a.next(&EventContext::new(0, 0)).unwrap();
        let from_a = a.next(&EventContext::new(5, 0)).unwrap().into_containers().unwrap();
        let from_b = b.next(&EventContext::new(5, 0)).unwrap().into_containers().unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_a[0].len(), 10);
        assert!(from_a[0]
            .cell_ids()
            .iter()
            .all(|id| id & !coder.mask() == 0));

        assert!(b.next(&EventContext::new(6, 0)).unwrap_err().is_end_of_input());
    }
}
