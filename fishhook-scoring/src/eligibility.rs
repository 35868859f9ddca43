//!
//! Eligible territory per hypothesis and observed event counts.
//!
//! The eligible slice of a hypothesis is its intersection with the
//! (reduced) eligible territory. Everything downstream, covariate
//! annotation and event counting included, is measured against slices.
//!
use std::ops::Range;

use fishhook_core::models::{Region, RegionSet};
use fishhook_overlaprs::{GenomeIndex, OverlapOptions};
use fxhash::FxHashMap;
use log::debug;

use crate::errors::{FishHookError, Result};

///
/// Eligible slices of every hypothesis, stored flat and grouped by owner:
/// the slices of hypothesis `h` are `slices.regions[offsets[h]..offsets[h + 1]]`.
///
#[derive(Debug, Clone, Default)]
pub struct EligibleSlices {
    pub slices: RegionSet,
    pub owners: Vec<usize>,
    pub offsets: Vec<usize>,
    pub eligible_bases: Vec<u64>,
}

impl EligibleSlices {
    ///
    /// Intersect every hypothesis with `eligible`, which must already be
    /// reduced (sorted, non-overlapping).
    ///
    pub fn new(hypotheses: &RegionSet, eligible: &RegionSet) -> Result<Self> {
        hypotheses.validate()?;
        let index = GenomeIndex::try_from(eligible)?;
        let hits = index.find_overlaps(hypotheses, OverlapOptions::default());

        let mut slices = Vec::new();
        let mut owners = Vec::new();
        let mut offsets = Vec::with_capacity(hypotheses.len() + 1);
        let mut eligible_bases = Vec::with_capacity(hypotheses.len());

        for (h, (hypothesis, hits)) in hypotheses.regions.iter().zip(hits).enumerate() {
            offsets.push(slices.len());
            let mut bases = 0u64;
            for hit in hits {
                let territory = &eligible.regions[hit.subject];
                slices.push(Region {
                    chr: hypothesis.chr.clone(),
                    start: hypothesis.start.max(territory.start),
                    end: hypothesis.end.min(territory.end),
                    strand: hypothesis.strand,
                    meta: Default::default(),
                });
                owners.push(h);
                bases += hit.width as u64;
            }
            eligible_bases.push(bases);
        }
        offsets.push(slices.len());

        debug!(
            "Computed {} eligible slices for {} hypotheses",
            slices.len(),
            hypotheses.len()
        );

        Ok(EligibleSlices {
            slices: RegionSet::from(slices),
            owners,
            offsets,
            eligible_bases,
        })
    }

    pub fn num_hypotheses(&self) -> usize {
        self.eligible_bases.len()
    }

    /// Positions in `slices` belonging to the hypotheses in `hypotheses`.
    pub fn slice_range(&self, hypotheses: Range<usize>) -> Range<usize> {
        self.offsets[hypotheses.start]..self.offsets[hypotheses.end]
    }

    ///
    /// Keep the slices of the given hypotheses, renumbered in the order
    /// given. Indices must be in range.
    ///
    pub fn subset(&self, indices: &[usize]) -> EligibleSlices {
        let mut slices = Vec::new();
        let mut owners = Vec::new();
        let mut offsets = Vec::with_capacity(indices.len() + 1);
        let mut eligible_bases = Vec::with_capacity(indices.len());

        for (new_h, &h) in indices.iter().enumerate() {
            offsets.push(slices.len());
            for region in &self.slices.regions[self.slice_range(h..h + 1)] {
                slices.push(region.clone());
                owners.push(new_h);
            }
            eligible_bases.push(self.eligible_bases[h]);
        }
        offsets.push(slices.len());

        EligibleSlices {
            slices: RegionSet::from(slices),
            owners,
            offsets,
            eligible_bases,
        }
    }
}

/// How events are tallied into observed counts.
#[derive(Debug, Clone, Default)]
pub struct EventCounting {
    /// Metadata field naming the sample of an event.
    pub dedup_key: Option<String>,
    pub max_events_per_sample: u32,
}

///
/// Make sure every event carries the deduplication field.
///
pub fn check_event_fields(events: &RegionSet, counting: &EventCounting) -> Result<()> {
    if let Some(key) = &counting.dedup_key {
        if let Some(event) = events.regions.iter().find(|e| e.get(key).is_none()) {
            return Err(FishHookError::MissingEventField {
                event: event.to_string(),
                field: key.clone(),
            });
        }
    }
    Ok(())
}

///
/// Count events overlapping the eligible slice of each hypothesis.
///
/// An event overlapping several slices of the same hypothesis counts once.
/// With a dedup key, each sample contributes at most
/// `max_events_per_sample` events to any one hypothesis.
///
pub fn observed_counts(
    slices: &EligibleSlices,
    events: &RegionSet,
    counting: &EventCounting,
) -> Result<Vec<u64>> {
    events.validate()?;
    check_event_fields(events, counting)?;

    let mut counts = vec![0u64; slices.num_hypotheses()];
    if slices.slices.is_empty() || events.is_empty() {
        return Ok(counts);
    }

    let index = GenomeIndex::try_from(&slices.slices)?;
    let hits = index.find_overlaps(events, OverlapOptions::default());

    // (hypothesis, sample) -> events counted so far
    let mut per_sample: FxHashMap<(usize, &str), u32> = FxHashMap::default();

    for (event, hits) in events.regions.iter().zip(hits) {
        let mut owners: Vec<usize> = hits.iter().map(|hit| slices.owners[hit.subject]).collect();
        owners.dedup();

        for owner in owners {
            match &counting.dedup_key {
                Some(key) => {
                    let sample = event.get(key).unwrap_or_default();
                    let seen = per_sample.entry((owner, sample)).or_insert(0);
                    if *seen < counting.max_events_per_sample {
                        *seen += 1;
                        counts[owner] += 1;
                    }
                }
                None => counts[owner] += 1,
            }
        }
    }

    Ok(counts)
}
