//! The analyzers. Each one has a `scan` that works on any entity source and
//! sink (tested in memory) and a `run` that wires it to the PBF input and
//! the result files.

pub mod colocated;
pub mod multipolygon;
pub mod orphans;
pub mod relations;
pub mod tags;

use crate::output::{write_stats, FileSink};
use crate::pbf::PbfSource;
use anyhow::Result;
use log::info;
use osmcheck::{Stats, TagList, Timestamp};
use std::path::Path;

/// Inputs shared by every analyzer run.
pub struct RunContext<'a> {
    pub source: &'a PbfSource,
    pub output_dir: &'a Path,
    /// Only entities modified before this are judged.
    pub before: Timestamp,
    pub progress_every: u64,
}

impl RunContext<'_> {
    pub fn open_sink(&self, analyzer: &str, categories: &[&str]) -> Result<FileSink> {
        let mut sink = FileSink::create(self.output_dir, analyzer)?;
        sink.declare(categories)?;
        Ok(sink)
    }

    /// Commits the sink, then writes the stats database.
    pub fn finish(
        &self,
        analyzer: &str,
        sink: FileSink,
        stats: &Stats,
        timestamp: Timestamp,
    ) -> Result<()> {
        sink.close()?;
        info!("Writing stats (data as of {})", timestamp);
        write_stats(self.output_dir, analyzer, timestamp, stats)
    }
}

/// Keys that say nothing about what a feature is.
const INSIGNIFICANT_KEYS: [&str; 4] = ["type", "created_by", "source", "note"];

pub(crate) fn is_significant_key(key: &str) -> bool {
    !INSIGNIFICANT_KEYS.contains(&key)
}

/// Tags with a significant key, in input order.
pub(crate) fn significant_tags(tags: &TagList) -> impl Iterator<Item = (&str, &str)> + Clone {
    tags.iter().filter(|(k, _)| is_significant_key(k))
}
