use std::ffi::OsStr;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;

///
/// Get a reader for either a gzip'd or non-gzip'd file.
///
/// # Arguments
///
/// - path: path to the file to read
///
pub fn get_dynamic_reader(path: &Path) -> Result<BufReader<Box<dyn Read>>> {
    let is_gzipped = path.extension() == Some(OsStr::new("gz"));
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let file: Box<dyn Read> = match is_gzipped {
        true => Box::new(MultiGzDecoder::new(file)),
        false => Box::new(file),
    };

    let reader = BufReader::new(file);

    Ok(reader)
}

///
/// Strip every extension from a file name, e.g. `rt.bed.gz` -> `rt`.
///
pub fn remove_all_extensions(path: &Path) -> String {
    let mut stem = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    while let Some((head, _ext)) = stem.rsplit_once('.') {
        if head.is_empty() {
            break;
        }
        stem = head.to_string();
    }

    stem
}

///
/// Name given to an unnamed metadata column at zero-based position `idx`.
///
pub fn default_column_name(idx: usize) -> String {
    format!("V{}", idx + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::path::PathBuf;

    #[rstest]
    #[case("tests/data/rt.bed.gz", "rt")]
    #[case("covariates/het.bed", "het")]
    #[case("plain", "plain")]
    fn test_remove_all_extensions(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(remove_all_extensions(&PathBuf::from(path)), expected);
    }

    #[rstest]
    fn test_default_column_name_is_one_based() {
        assert_eq!(default_column_name(3), "V4");
    }
}
