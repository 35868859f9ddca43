use std::fmt::{self, Display};
use std::io::Write;
use std::ops::Range;
use std::sync::Arc;

use fishhook_core::models::{Region, RegionSet};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ExecutionContext;
use crate::covariates::Covariate;
use crate::eligibility::EligibleSlices;
use crate::errors::Result;

/// Why a hypothesis does or does not enter the regression.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Fitted,
    EmptyEligibleTerritory,
    BelowEligibleThreshold,
    MissingCovariateValue,
    /// Entered the fit, but its predicted count is zero or not finite, so
    /// it cannot be tested.
    DegeneratePrediction,
}

impl RowStatus {
    pub fn is_fitted(&self) -> bool {
        matches!(self, RowStatus::Fitted)
    }
}

impl Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowStatus::Fitted => "fitted",
            RowStatus::EmptyEligibleTerritory => "empty_eligible_territory",
            RowStatus::BelowEligibleThreshold => "below_eligible_threshold",
            RowStatus::MissingCovariateValue => "missing_covariate_value",
            RowStatus::DegeneratePrediction => "degenerate_prediction",
        };
        write!(f, "{s}")
    }
}

/// One hypothesis with its annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow<'a> {
    pub index: usize,
    pub hypothesis: &'a Region,
    pub eligible_bases: u64,
    pub observed: u64,
    pub covariates: Vec<f64>,
}

///
/// Column-oriented annotation of every hypothesis: eligible bases, observed
/// counts and one column per covariate. Columns are shared, so cloning a
/// table or deriving one from another is cheap.
///
#[derive(Debug, Clone)]
pub struct AnnotationTable {
    pub hypotheses: Arc<RegionSet>,
    pub eligible_bases: Arc<Vec<u64>>,
    pub observed: Arc<Vec<u64>>,
    pub covariate_names: Vec<String>,
    pub columns: Vec<Arc<Vec<f64>>>,
}

impl AnnotationTable {
    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<AnnotationRow<'_>> {
        let hypothesis = self.hypotheses.regions.get(index)?;
        Some(AnnotationRow {
            index,
            hypothesis,
            eligible_bases: self.eligible_bases[index],
            observed: self.observed[index],
            covariates: self.columns.iter().map(|c| c[index]).collect(),
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = AnnotationRow<'_>> {
        (0..self.len()).filter_map(|i| self.row(i))
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.covariate_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn status(&self, index: usize, min_eligible: u64) -> RowStatus {
        let eligible = self.eligible_bases[index];
        if eligible == 0 {
            RowStatus::EmptyEligibleTerritory
        } else if eligible < min_eligible {
            RowStatus::BelowEligibleThreshold
        } else if self.columns.iter().any(|c| !c[index].is_finite()) {
            RowStatus::MissingCovariateValue
        } else {
            RowStatus::Fitted
        }
    }

    pub fn statuses(&self, min_eligible: u64) -> Vec<RowStatus> {
        (0..self.len())
            .map(|i| self.status(i, min_eligible))
            .collect()
    }

    ///
    /// Write the table as TSV: hypothesis coordinates and metadata, eligible
    /// bases, observed count, one column per covariate and the row status.
    ///
    pub fn write_tsv<W: Write>(&self, mut writer: W, min_eligible: u64) -> std::io::Result<()> {
        let meta_names = self.hypotheses.meta_columns();

        let mut header: Vec<&str> = vec!["chr", "start", "end"];
        header.extend(meta_names.iter().map(|s| s.as_str()));
        header.extend(["eligible", "observed"]);
        header.extend(self.covariate_names.iter().map(String::as_str));
        header.push("status");
        writeln!(writer, "{}", header.join("\t"))?;

        for row in self.rows() {
            let region = row.hypothesis;
            let mut fields = vec![region.chr.clone(), region.start.to_string(), region.end.to_string()];
            fields.extend(
                meta_names
                    .iter()
                    .map(|name| region.get(name).unwrap_or("NA").to_string()),
            );
            fields.push(row.eligible_bases.to_string());
            fields.push(row.observed.to_string());
            fields.extend(row.covariates.iter().map(|v| {
                if v.is_nan() { "NA".to_string() } else { v.to_string() }
            }));
            fields.push(self.status(row.index, min_eligible).to_string());
            writeln!(writer, "{}", fields.join("\t"))?;
        }
        Ok(())
    }
}

/// Contiguous hypothesis ranges, a few per worker thread.
fn chunks(len: usize, threads: usize) -> Vec<Range<usize>> {
    let size = len.div_ceil(threads.max(1) * 4).max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

///
/// Annotate every hypothesis with every covariate in `covariates`.
///
/// Work is split into (covariate, hypothesis range) units and run on the
/// pool described by `exec`. Each value only depends on its own hypothesis
/// slice, so results are identical for any thread count.
///
pub fn annotate_covariates(
    covariates: &[&Covariate],
    slices: &EligibleSlices,
    exec: &ExecutionContext,
) -> Result<Vec<Vec<f64>>> {
    if covariates.is_empty() {
        return Ok(Vec::new());
    }

    let pool = exec.pool()?;
    let n = slices.num_hypotheses();
    info!(
        "Annotating {} hypotheses with {} covariate(s) on {} thread(s)",
        n,
        covariates.len(),
        pool.current_num_threads()
    );

    pool.install(|| -> Result<Vec<Vec<f64>>> {
        let indexes = covariates
            .par_iter()
            .map(|c| c.index())
            .collect::<Result<Vec<_>>>()?;

        let ranges = chunks(n, pool.current_num_threads());
        let units: Vec<(usize, Range<usize>)> = (0..covariates.len())
            .flat_map(|c| ranges.iter().map(move |r| (c, r.clone())))
            .collect();
        debug!("Split annotation into {} units", units.len());

        let parts: Vec<(usize, Vec<f64>)> = units
            .into_par_iter()
            .map(|(c, range)| (c, covariates[c].annotate_range(&indexes[c], slices, range)))
            .collect();

        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); covariates.len()];
        for (c, part) in parts {
            columns[c].extend(part);
        }
        Ok(columns)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    #[case(10, 1, vec![0..3, 3..6, 6..9, 9..10])]
    #[case(2, 4, vec![0..1, 1..2])]
    #[case(0, 4, vec![])]
    fn test_chunks_cover_range(
        #[case] len: usize,
        #[case] threads: usize,
        #[case] expected: Vec<Range<usize>>,
    ) {
        assert_eq!(chunks(len, threads), expected);
    }

    fn table(eligible: Vec<u64>, column: Vec<f64>) -> AnnotationTable {
        let hypotheses: RegionSet = (0..eligible.len() as u32)
            .map(|i| Region::new("chr1", i * 100, i * 100 + 50).unwrap())
            .collect();
        AnnotationTable {
            hypotheses: Arc::new(hypotheses),
            observed: Arc::new(vec![0; eligible.len()]),
            eligible_bases: Arc::new(eligible),
            covariate_names: vec!["x".to_string()],
            columns: vec![Arc::new(column)],
        }
    }

    #[rstest]
    fn test_row_status() {
        let t = table(vec![0, 5, 50, 50], vec![1.0, 1.0, f64::NAN, 2.0]);
        assert_eq!(
            t.statuses(10),
            vec![
                RowStatus::EmptyEligibleTerritory,
                RowStatus::BelowEligibleThreshold,
                RowStatus::MissingCovariateValue,
                RowStatus::Fitted,
            ]
        );
    }

    #[rstest]
    fn test_write_tsv_marks_missing_values() {
        let t = table(vec![0, 20], vec![f64::NAN, 0.25]);
        let mut buffer = Vec::new();
        t.write_tsv(&mut buffer, 1).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "chr\tstart\tend\teligible\tobserved\tx\tstatus");
        assert_eq!(lines[1], "chr1\t0\t50\t0\t0\tNA\tempty_eligible_territory");
        assert_eq!(lines[2], "chr1\t100\t150\t20\t0\t0.25\tfitted");
    }

    #[rstest]
    fn test_write_tsv_keeps_metadata_of_later_rows() {
        let mut t = table(vec![10, 20], vec![0.5, 0.25]);
        t.hypotheses = Arc::new(RegionSet::from(vec![
            Region::new("chr1", 0, 50).unwrap().with_meta("name", "a"),
            Region::new("chr1", 100, 150)
                .unwrap()
                .with_meta("name", "b")
                .with_meta("biotype", "lncRNA"),
        ]));

        let mut buffer = Vec::new();
        t.write_tsv(&mut buffer, 1).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "chr\tstart\tend\tname\tbiotype\teligible\tobserved\tx\tstatus");
        assert_eq!(lines[1], "chr1\t0\t50\ta\tNA\t10\t0\t0.5\tfitted");
        assert_eq!(lines[2], "chr1\t100\t150\tb\tlncRNA\t20\t0\t0.25\tfitted");
    }

    #[rstest]
    fn test_row_view() {
        let t = table(vec![10, 20], vec![0.5, 0.25]);
        let row = t.row(1).unwrap();
        assert_eq!(row.eligible_bases, 20);
        assert_eq!(row.covariates, vec![0.25]);
        assert_eq!(t.column("x"), Some(&[0.5, 0.25][..]));
        assert!(t.row(2).is_none());
    }
}
