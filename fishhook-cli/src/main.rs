mod annotate;
mod io;
mod run_config;
mod score;

use std::str::FromStr;

use anyhow::Result;
use clap::{Command, arg};
use log::LevelFilter;

pub mod consts {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const BIN_NAME: &str = "fishhook";
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

fn build_parser() -> Command {
    Command::new(consts::BIN_NAME)
        .bin_name(consts::BIN_NAME)
        .version(consts::VERSION)
        .about("Find genomic regions carrying more somatic mutations than a covariate-corrected background model predicts.")
        .subcommand_required(true)
        .arg(
            arg!(--"log-level" <level> "Log verbosity")
                .global(true)
                .required(false)
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value(consts::DEFAULT_LOG_LEVEL),
        )
        .subcommand(annotate::cli::create_annotate_cli())
        .subcommand(score::cli::create_score_cli())
}

fn init_logging(level: &str) -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::from_str(level)?)
        .format_module_path(false)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let app = build_parser();
    let matches = app.get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or(consts::DEFAULT_LOG_LEVEL);
    init_logging(level)?;

    match matches.subcommand() {
        //
        // ANNOTATE
        //
        Some((annotate::cli::ANNOTATE_CMD, matches)) => {
            annotate::handlers::run_annotate(matches)?;
        }

        //
        // SCORE
        //
        Some((score::cli::SCORE_CMD, matches)) => {
            score::handlers::run_score(matches)?;
        }

        _ => unreachable!("Subcommand not found"),
    };

    Ok(())
}
