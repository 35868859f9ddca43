use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::path::Path;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;

use fishhook_core::models::RegionSet;
use fishhook_core::utils::get_dynamic_reader;
use fishhook_scoring::{Diagnostics, HypothesisSet};

///
/// Read hypothesis sets from a two-column TSV of `set<TAB>identifier`.
/// Identifiers are matched against metadata field `field` of the
/// hypotheses. Sets keep the order in which they first appear.
///
pub fn read_sets(path: &Path, hypotheses: &RegionSet, field: &str) -> Result<Vec<HypothesisSet>> {
    let reader = get_dynamic_reader(path)?;
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((set, identifier)) = line.split_once('\t') else {
            bail!("Line {} of {} is not `set<TAB>identifier`", number + 1, path.display());
        };
        grouped
            .entry(set.trim().to_string())
            .or_default()
            .push(identifier.trim().to_string());
    }

    grouped
        .into_iter()
        .map(|(name, identifiers)| {
            let identifiers: Vec<&str> = identifiers.iter().map(String::as_str).collect();
            HypothesisSet::from_identifiers(name, &identifiers, hypotheses, field)
                .with_context(|| format!("Failed to resolve sets from {}", path.display()))
        })
        .collect()
}

pub fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

pub fn write_diagnostics(path: &Path, diagnostics: &Diagnostics) -> Result<()> {
    let writer = create_writer(path)?;
    serde_json::to_writer_pretty(writer, diagnostics)?;
    Ok(())
}
