use clap::{Arg, Command, arg};

pub const ANNOTATE_CMD: &str = "annotate";
pub const DEFAULT_OUT: &str = "fishhook.annotations.tsv";

pub fn create_annotate_cli() -> Command {
    Command::new(ANNOTATE_CMD)
        .about("Annotate hypotheses with eligible territory, observed event counts and covariates.")
        .arg_required_else_help(true)
        .arg(Arg::new("config").required(true).help("TOML run file"))
        .arg(
            arg!(-o --output <output> "Output TSV")
                .required(false)
                .default_value(DEFAULT_OUT),
        )
        .arg(
            arg!(-t --threads <threads> "Worker threads, overrides the run file")
                .required(false)
                .value_parser(clap::value_parser!(usize)),
        )
}
