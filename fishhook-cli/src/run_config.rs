use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use fishhook_core::models::RegionSet;
use fishhook_core::utils::remove_all_extensions;
use fishhook_scoring::{
    Covariate, CovariateKind, CovariateList, ExecutionContext, FishHook, FishHookConfig,
};

/// One `[[covariates]]` entry of a run file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CovariateSpec {
    /// Defaults to the file name for interval tracks and to the field name
    /// for numeric tracks.
    pub name: Option<String>,
    pub kind: CovariateKind,
    pub path: PathBuf,
    /// Numeric metadata fields; each becomes its own covariate.
    #[serde(default)]
    pub fields: Vec<String>,
    pub na_default: Option<f64>,
    #[serde(default)]
    pub pad: u32,
}

///
/// A TOML run file: input paths, analysis parameters and covariates.
/// Relative paths are resolved against the directory of the run file.
///
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub hypotheses: PathBuf,
    pub events: PathBuf,
    pub eligible: PathBuf,
    #[serde(default)]
    pub num_threads: usize,
    #[serde(default)]
    pub analysis: FishHookConfig,
    #[serde(default)]
    pub covariates: Vec<CovariateSpec>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl TryFrom<&Path> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(path: &Path) -> Result<Self> {
        let toml_str = read_to_string(path)
            .with_context(|| format!("Failed to read run file: {}", path.display()))?;
        let mut config: RunConfig = toml::from_str(&toml_str)
            .with_context(|| format!("Failed to parse run file: {}", path.display()))?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }
}

fn read_regions(path: &Path) -> Result<RegionSet> {
    RegionSet::try_from(path).with_context(|| format!("Failed to read regions from {}", path.display()))
}

impl RunConfig {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn exec(&self) -> ExecutionContext {
        ExecutionContext::new(self.num_threads)
    }

    pub fn load_covariates(&self) -> Result<CovariateList> {
        let mut list = CovariateList::new();

        for spec in &self.covariates {
            let path = self.resolve(&spec.path);
            let track = read_regions(&path)?;

            let loaded = match spec.kind {
                CovariateKind::Interval => {
                    if !spec.fields.is_empty() {
                        bail!("Interval covariate {} takes no fields", path.display());
                    }
                    let name = spec.name.clone().unwrap_or_else(|| remove_all_extensions(&path));
                    vec![Covariate::interval(name, &track)?.with_pad(spec.pad)]
                }
                CovariateKind::Numeric => {
                    // pad once so every field keeps sharing the geometry
                    let track = if spec.pad > 0 { track.pad(spec.pad) } else { track };
                    match (spec.fields.as_slice(), &spec.name) {
                        ([], _) => bail!("Numeric covariate {} needs at least one field", path.display()),
                        ([field], Some(name)) => vec![Covariate::numeric(name.clone(), &track, field)?],
                        (fields, _) => {
                            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
                            Covariate::numeric_fields(&track, &fields)?.iter().cloned().collect()
                        }
                    }
                }
            };

            for covariate in loaded {
                let covariate = match spec.na_default {
                    Some(value) => covariate.with_na_default(value),
                    None => covariate,
                };
                list.push(covariate)?;
            }
        }

        Ok(list)
    }

    ///
    /// Read every input and assemble the analysis state.
    ///
    pub fn build(&self) -> Result<FishHook> {
        let hypotheses = read_regions(&self.resolve(&self.hypotheses))?;
        let events = read_regions(&self.resolve(&self.events))?;
        let eligible = read_regions(&self.resolve(&self.eligible))?;
        let covariates = self.load_covariates()?;

        let fish = FishHook::new(hypotheses, events, eligible, self.analysis.clone())?
            .with_covariates(&covariates)?;
        Ok(fish)
    }
}
