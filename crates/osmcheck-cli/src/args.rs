use clap::Args;
use osmcheck::{Timestamp, DEFAULT_PROGRESS_EVERY};
use std::path::PathBuf;

/// A condition found after argument parsing that still counts as misuse
/// (exit code 2), e.g. an input file that lacks a required feature.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Arguments shared by every analyzer.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// OSM PBF file to check
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Directory for result files and databases; created if missing
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Only include objects at least DAYS days old
    #[arg(short = 'a', long = "age", value_name = "DAYS", conflicts_with = "before")]
    pub age: Option<u32>,

    /// Only include objects changed last before this time (yyyy-mm-ddThh:mm:ssZ)
    #[arg(short = 'b', long, value_name = "TIMESTAMP", value_parser = parse_timestamp)]
    pub before: Option<Timestamp>,

    /// Work quietly (warnings and errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Log a progress line every N entities
    #[arg(long, value_name = "N", env = "OSMCHECK_PROGRESS_EVERY", default_value_t = DEFAULT_PROGRESS_EVERY)]
    pub progress_every: u64,
}

impl CommonArgs {
    /// The modification-time cutoff; `Timestamp::MAX` when neither
    /// `--age` nor `--before` was given.
    pub fn cutoff(&self, now: Timestamp) -> Timestamp {
        match (self.age, self.before) {
            (Some(days), _) => Timestamp::days_before(now, days),
            (None, Some(before)) => before,
            (None, None) => Timestamp::MAX,
        }
    }
}

fn parse_timestamp(text: &str) -> Result<Timestamp, String> {
    Timestamp::from_iso(text).map_err(|err| format!("expected yyyy-mm-ddThh:mm:ssZ ({err})"))
}

pub(crate) fn parse_power_of_two(text: &str) -> Result<usize, String> {
    let n: usize = text.parse().map_err(|err| format!("{err}"))?;
    if n.is_power_of_two() && n <= 1 << 16 {
        Ok(n)
    } else {
        Err(format!("{n} is not a power of two between 1 and 65536"))
    }
}

pub(crate) fn parse_positive(text: &str) -> Result<usize, String> {
    match text.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(format!("{err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_from_age_or_before() {
        let now = Timestamp::from_secs(100 * 86_400);
        let mut args = CommonArgs {
            input: "in.osm.pbf".into(),
            output_dir: "out".into(),
            age: None,
            before: None,
            quiet: false,
            progress_every: 1,
        };
        assert_eq!(args.cutoff(now), Timestamp::MAX);

        args.age = Some(30);
        assert_eq!(args.cutoff(now), Timestamp::from_secs(70 * 86_400));

        args.age = None;
        args.before = Some(Timestamp::from_secs(5));
        assert_eq!(args.cutoff(now), Timestamp::from_secs(5));
    }

    #[test]
    fn number_parsers() {
        assert_eq!(parse_power_of_two("256"), Ok(256));
        assert!(parse_power_of_two("100").is_err());
        assert!(parse_power_of_two("0").is_err());
        assert!(parse_positive("0").is_err());
        assert_eq!(parse_positive("3"), Ok(3));
        assert!(parse_timestamp("2020-01-01").is_err());
        assert!(parse_timestamp("2020-01-01T00:00:00Z").is_ok());
    }
}
