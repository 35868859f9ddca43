use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use log::info;

use crate::io::create_writer;
use crate::run_config::RunConfig;

pub fn run_annotate(matches: &ArgMatches) -> Result<()> {
    let config = matches
        .get_one::<String>("config")
        .context("A path to a run file is required.")?;
    let output = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .context("An output path is required.")?;

    let mut run = RunConfig::try_from(Path::new(config))?;
    if let Some(&threads) = matches.get_one::<usize>("threads") {
        run.num_threads = threads;
    }

    let mut fish = run.build()?;
    let table = fish.annotate(&run.exec())?;

    table.write_tsv(create_writer(&output)?, run.analysis.min_eligible)?;
    info!("Wrote annotations of {} hypotheses to {}", table.len(), output.display());

    Ok(())
}
