use clap::{Arg, Command, arg};

pub const SCORE_CMD: &str = "score";
pub const DEFAULT_PREFIX: &str = "fishhook";
pub const DEFAULT_SET_FIELD: &str = "name";

pub fn create_score_cli() -> Command {
    Command::new(SCORE_CMD)
        .about("Fit the background model and score every hypothesis, optionally also sets of hypotheses.")
        .arg_required_else_help(true)
        .arg(Arg::new("config").required(true).help("TOML run file"))
        .arg(
            arg!(-p --prefix <prefix> "Output prefix for <prefix>.scores.tsv, <prefix>.diagnostics.json and <prefix>.sets.tsv")
                .required(false)
                .default_value(DEFAULT_PREFIX),
        )
        .arg(
            arg!(-s --sets <sets> "Two-column TSV of set name and hypothesis identifier")
                .required(false),
        )
        .arg(
            arg!(--"set-field" <field> "Hypothesis metadata field holding set identifiers")
                .required(false)
                .default_value(DEFAULT_SET_FIELD),
        )
        .arg(
            arg!(-t --threads <threads> "Worker threads, overrides the run file")
                .required(false)
                .value_parser(clap::value_parser!(usize)),
        )
}
