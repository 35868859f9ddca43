use std::ops::Range;
use std::sync::Arc;

use fishhook_core::models::RegionSet;
use fishhook_overlaprs::{GenomeIndex, OverlapOptions};
use serde::{Deserialize, Serialize};

use crate::eligibility::EligibleSlices;
use crate::errors::{FishHookError, Result};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CovariateKind {
    /// Each interval carries a value; a hypothesis gets the
    /// overlap-width-weighted mean over its eligible slice.
    Numeric,
    /// Presence track; a hypothesis gets the covered fraction of its
    /// eligible slice.
    Interval,
}

///
/// One covariate: a track of intervals and, for numeric covariates, one
/// value per interval. Several numeric covariates built from the fields
/// of one source share a single geometry.
///
#[derive(Debug, Clone)]
pub struct Covariate {
    name: String,
    kind: CovariateKind,
    track: Arc<RegionSet>,
    values: Option<Arc<Vec<f64>>>,
    na_default: Option<f64>,
}

fn parse_field(track: &RegionSet, field: &str, name: &str) -> Result<Vec<f64>> {
    track
        .regions
        .iter()
        .map(|region| {
            let raw = region.get(field).ok_or_else(|| FishHookError::InvalidCovariate {
                covariate: name.to_string(),
                reason: format!("field '{field}' missing at {region}"),
            })?;
            match raw.trim() {
                "" | "NA" | "NaN" | "nan" | "." => Ok(f64::NAN),
                value => value.parse::<f64>().map_err(|_| FishHookError::InvalidCovariate {
                    covariate: name.to_string(),
                    reason: format!("non-numeric value '{value}' in field '{field}' at {region}"),
                }),
            }
        })
        .collect()
}

impl Covariate {
    ///
    /// A presence covariate. The track is reduced first so overlapping
    /// intervals are not counted twice.
    ///
    pub fn interval(name: impl Into<String>, track: &RegionSet) -> Result<Covariate> {
        track.validate()?;
        Ok(Covariate {
            name: name.into(),
            kind: CovariateKind::Interval,
            track: Arc::new(track.reduce()),
            values: None,
            na_default: None,
        })
    }

    ///
    /// A numeric covariate read from metadata field `field` of `track`.
    ///
    pub fn numeric(name: impl Into<String>, track: &RegionSet, field: &str) -> Result<Covariate> {
        track.validate()?;
        let name = name.into();
        let values = parse_field(track, field, &name)?;
        Ok(Covariate {
            name,
            kind: CovariateKind::Numeric,
            track: Arc::new(track.clone()),
            values: Some(Arc::new(values)),
            na_default: None,
        })
    }

    ///
    /// One numeric covariate per field, named after the field, all sharing
    /// the geometry of `track`.
    ///
    pub fn numeric_fields(track: &RegionSet, fields: &[&str]) -> Result<CovariateList> {
        track.validate()?;
        let geometry = Arc::new(track.clone());

        let mut list = CovariateList::new();
        for field in fields {
            let values = parse_field(track, field, field)?;
            list.push(Covariate {
                name: field.to_string(),
                kind: CovariateKind::Numeric,
                track: Arc::clone(&geometry),
                values: Some(Arc::new(values)),
                na_default: None,
            })?;
        }
        Ok(list)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Value used for hypotheses the track does not reach.
    pub fn with_na_default(mut self, value: f64) -> Self {
        self.na_default = Some(value);
        self
    }

    ///
    /// Widen every track interval by `bases` on both sides. Interval tracks
    /// are reduced again afterwards.
    ///
    pub fn with_pad(mut self, bases: u32) -> Self {
        if bases == 0 {
            return self;
        }
        let padded = self.track.pad(bases);
        self.track = Arc::new(match self.kind {
            CovariateKind::Interval => padded.reduce(),
            CovariateKind::Numeric => padded,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CovariateKind {
        self.kind
    }

    pub fn track(&self) -> &RegionSet {
        &self.track
    }

    pub fn na_default(&self) -> Option<f64> {
        self.na_default
    }

    /// Whether both covariates read the same interval geometry.
    pub fn shares_geometry(&self, other: &Covariate) -> bool {
        Arc::ptr_eq(&self.track, &other.track)
    }

    pub(crate) fn index(&self) -> Result<GenomeIndex> {
        Ok(GenomeIndex::try_from(self.track.as_ref())?)
    }

    ///
    /// Covariate values of the hypotheses in `hypotheses`, measured over
    /// their eligible slices. `index` must be built from this covariate's
    /// track.
    ///
    pub(crate) fn annotate_range(
        &self,
        index: &GenomeIndex,
        slices: &EligibleSlices,
        hypotheses: Range<usize>,
    ) -> Vec<f64> {
        let slice_range = slices.slice_range(hypotheses.clone());
        let queries = RegionSet::from(slices.slices.regions[slice_range.clone()].to_vec());
        let hits = index.find_overlaps(&queries, OverlapOptions::default());

        let first = hypotheses.start;
        let mut covered = vec![0f64; hypotheses.len()];
        let mut weighted = vec![0f64; hypotheses.len()];

        for (slice_hits, &owner) in hits.iter().zip(&slices.owners[slice_range]) {
            let local = owner - first;
            for hit in slice_hits {
                let width = hit.width as f64;
                match &self.values {
                    Some(values) => {
                        let value = values[hit.subject];
                        if value.is_nan() {
                            continue;
                        }
                        weighted[local] += value * width;
                        covered[local] += width;
                    }
                    None => covered[local] += width,
                }
            }
        }

        hypotheses
            .zip(covered.into_iter().zip(weighted))
            .map(|(h, (covered, weighted))| {
                let eligible = slices.eligible_bases[h] as f64;
                let value = match self.kind {
                    CovariateKind::Numeric if covered > 0.0 => weighted / covered,
                    CovariateKind::Interval if eligible > 0.0 => covered / eligible,
                    _ => f64::NAN,
                };
                match (value.is_nan(), self.na_default) {
                    (true, Some(default)) => default,
                    _ => value,
                }
            })
            .collect()
    }
}

///
/// Ordered covariates with unique names. Column order here is column order
/// in the design matrix.
///
#[derive(Debug, Clone, Default)]
pub struct CovariateList {
    covariates: Vec<Covariate>,
}

impl CovariateList {
    pub fn new() -> Self {
        CovariateList::default()
    }

    pub fn push(&mut self, covariate: Covariate) -> Result<()> {
        if self.position(covariate.name()).is_some() {
            return Err(FishHookError::DuplicateCovariate(covariate.name));
        }
        self.covariates.push(covariate);
        Ok(())
    }

    /// All covariates of `self` followed by all of `other`.
    pub fn concat(&self, other: &CovariateList) -> Result<CovariateList> {
        let mut merged = self.clone();
        for covariate in other {
            merged.push(covariate.clone())?;
        }
        Ok(merged)
    }

    pub fn select(&self, names: &[&str]) -> Result<CovariateList> {
        let mut selected = CovariateList::new();
        for name in names {
            let covariate = self
                .get(name)
                .ok_or_else(|| FishHookError::UnknownCovariate(name.to_string()))?;
            selected.push(covariate.clone())?;
        }
        Ok(selected)
    }

    pub fn get(&self, name: &str) -> Option<&Covariate> {
        self.covariates.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.covariates.iter().position(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.covariates.iter().map(|c| c.name.clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Covariate> {
        self.covariates.iter()
    }

    pub fn len(&self) -> usize {
        self.covariates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covariates.is_empty()
    }
}

impl TryFrom<Vec<Covariate>> for CovariateList {
    type Error = FishHookError;

    fn try_from(covariates: Vec<Covariate>) -> Result<Self> {
        let mut list = CovariateList::new();
        for covariate in covariates {
            list.push(covariate)?;
        }
        Ok(list)
    }
}

impl<'a> IntoIterator for &'a CovariateList {
    type Item = &'a Covariate;
    type IntoIter = std::slice::Iter<'a, Covariate>;

    fn into_iter(self) -> Self::IntoIter {
        self.covariates.iter()
    }
}
