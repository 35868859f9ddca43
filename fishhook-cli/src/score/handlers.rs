use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use log::info;

use crate::io::{create_writer, read_sets, write_diagnostics};
use crate::run_config::RunConfig;

pub fn run_score(matches: &ArgMatches) -> Result<()> {
    let config = matches
        .get_one::<String>("config")
        .context("A path to a run file is required.")?;
    let prefix = matches
        .get_one::<String>("prefix")
        .context("An output prefix is required.")?;
    let set_field = matches
        .get_one::<String>("set-field")
        .context("A set identifier field is required.")?;

    let mut run = RunConfig::try_from(Path::new(config))?;
    if let Some(&threads) = matches.get_one::<usize>("threads") {
        run.num_threads = threads;
    }
    let exec = run.exec();

    let mut fish = run.build()?;
    let scores = fish.score(&exec)?;

    let scores_path = PathBuf::from(format!("{prefix}.scores.tsv"));
    scores.write_tsv(create_writer(&scores_path)?)?;
    info!("Wrote scores of {} hypotheses to {}", scores.len(), scores_path.display());

    let diagnostics_path = PathBuf::from(format!("{prefix}.diagnostics.json"));
    write_diagnostics(&diagnostics_path, &scores.diagnostics)?;

    if let Some(sets_path) = matches.get_one::<String>("sets") {
        let sets = read_sets(Path::new(sets_path), fish.hypotheses(), set_field)?;
        let table = fish.score_sets(&sets, &exec)?;

        let out = PathBuf::from(format!("{prefix}.sets.tsv"));
        table.write_tsv(create_writer(&out)?)?;
        info!("Wrote scores of {} sets to {}", table.len(), out.display());
    }

    Ok(())
}
