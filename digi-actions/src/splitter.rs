//! Splits a hit container by segmentation identifier.

use crate::action::{Action, ActionKind, ContainerAccess};
use digi_core::{EventContext, EventStore, Geometry, Hit, HitRecords, Result, SegmentationDecoder};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Distributes the records of one input container over per-segment outputs
/// named `"{output_prefix}.{id}"`.
///
/// The outputs are written together: if one of them cannot take its records,
/// none is touched.
pub struct SegmentationSplitter {
    name: String,
    subdetector: String,
    input: String,
    output_prefix: String,
    decoder: Arc<dyn SegmentationDecoder>,
    strict: bool,
}

impl SegmentationSplitter {
    /// Creates a splitter, resolving the subdetector's decoder once.
    ///
    /// # Errors
    /// Fails if the geometry has no segmentation for `subdetector`.
    pub fn new(
        name: impl Into<String>,
        subdetector: impl Into<String>,
        input: impl Into<String>,
        output_prefix: impl Into<String>,
        geometry: &dyn Geometry,
    ) -> Result<Self> {
        let subdetector = subdetector.into();
        let decoder = geometry.segmentation_for(&subdetector)?;
        Ok(Self {
            name: name.into(),
            subdetector,
            input: input.into(),
            output_prefix: output_prefix.into(),
            decoder,
            strict: true,
        })
    }

    /// In non-strict mode undecodable records are skipped and reported.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Output container name for segment `id`.
    #[must_use]
    pub fn output_name(&self, id: u64) -> String {
        format!("{}.{}", self.output_prefix, id)
    }

    fn partition(&self, store: &EventStore, records: &HitRecords) -> Result<Vec<(u64, HitRecords)>> {
        let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (index, hit) in records.iter().enumerate() {
            match self.decoder.decode(hit.cell_id()) {
                Ok(id) => groups.entry(id).or_default().push(index),
                Err(err) if !self.strict => {
                    log::warn!("{}: skipping record {} of '{}': {}", self.name, index, self.input, err);
                    store.report_issue(&self.name, &self.input, err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(groups
            .into_iter()
            .map(|(id, indices)| (id, records.select(&indices)))
            .collect())
    }
}

impl Action for SegmentationSplitter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Splitter
    }

    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
        let parts = store.with_container(&self.name, &self.input, |input| {
            self.partition(store, &input.records)
        })??;
        log::debug!(
            "{}: split '{}' into {} segments for {}",
            self.name,
            self.input,
            parts.len(),
            ctx
        );
        let batches: Vec<(String, HitRecords)> = parts
            .into_iter()
            .map(|(id, records)| (self.output_name(id), records))
            .collect();
        store.append_all(&batches)
    }

    fn access(&self) -> ContainerAccess {
        ContainerAccess {
            reads: vec![self.input.clone()],
            writes: vec![format!("{}.*", self.output_prefix)],
        }
    }

    fn details(&self) -> String {
        format!(
            "{}: {} -> {}.*{}",
            self.subdetector,
            self.input,
            self.output_prefix,
            if self.strict { "" } else { ", lenient" }
        )
    }
}
