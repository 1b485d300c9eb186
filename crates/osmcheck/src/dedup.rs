//! Per-bucket exact-duplicate detection and the merged duplicate set.
//!
//! Each bucket is loaded whole (copy-on-write mapping with the `mmap`
//! feature, a heap read otherwise), sorted in place and scanned for runs of
//! equal records. Buckets are independent, so they are processed in parallel
//! and their results combined by a collect followed by one sort/unique.
//!
//! Known degenerate case: many points on one coordinate all land in the same
//! bucket, so that bucket's sort dominates.

use crate::bucket::{SpilledBucket, SpilledBuckets, RECORD_SIZE};
use crate::error::{Error, Result};
use crate::location::Location;
use log::debug;
use rayon::prelude::*;
use std::fs::File;

/// Every location that occurred at least twice, sorted, each exactly once.
///
/// Immutable once built; `Sync`, so any number of readers may query it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateLocationSet {
    locations: Vec<Location>,
}

impl DuplicateLocationSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Combines per-bucket results into one globally sorted unique set.
    fn merge(parts: Vec<Vec<Location>>) -> Self {
        let mut locations: Vec<Location> =
            Vec::with_capacity(parts.iter().map(Vec::len).sum());
        for part in parts {
            locations.extend(part);
        }
        locations.sort_unstable();
        locations.dedup();
        Self { locations }
    }

    /// Binary search over the sorted set.
    #[inline]
    pub fn contains(&self, location: &Location) -> bool {
        self.locations.binary_search(location).is_ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    pub fn as_slice(&self) -> &[Location] {
        &self.locations
    }
}

/// Appends the first location of every run of two or more equal,
/// adjacent records.
fn collect_runs(sorted: &[Location], out: &mut Vec<Location>) {
    let mut i = 0usize;
    while i < sorted.len() {
        let value = sorted[i];
        let mut run = 1usize;
        while i + run < sorted.len() && sorted[i + run] == value {
            run += 1;
        }
        if run >= 2 {
            out.push(value);
        }
        i += run;
    }
}

fn open_checked(bucket: &SpilledBucket) -> Result<Option<(File, usize)>> {
    let read_err = |source| Error::BucketRead {
        path: bucket.path().to_path_buf(),
        source,
    };

    let file = File::open(bucket.path()).map_err(read_err)?;
    let len = file.metadata().map_err(read_err)?.len();

    if len == 0 {
        return Ok(None);
    }

    if len % RECORD_SIZE as u64 != 0 {
        return Err(Error::BucketCorrupt {
            path: bucket.path().to_path_buf(),
            len,
            record: RECORD_SIZE,
        });
    }

    Ok(Some((file, (len / RECORD_SIZE as u64) as usize)))
}

/// Sort-and-scan over a private copy-on-write mapping of the bucket file;
/// the sort never reaches the file itself.
#[cfg(feature = "mmap")]
fn sorted_runs(bucket: &SpilledBucket, file: File, _records: usize) -> Result<Vec<Location>> {
    let mut map = unsafe { memmap2::MmapOptions::new().map_copy(&file) }.map_err(|source| {
        Error::BucketRead {
            path: bucket.path().to_path_buf(),
            source,
        }
    })?;

    // Safety of the cast: the mapping is page aligned and its length is a
    // multiple of the record size (checked in `open_checked`).
    let records: &mut [Location] =
        bytemuck::try_cast_slice_mut(&mut map[..]).map_err(|_| Error::BucketCorrupt {
            path: bucket.path().to_path_buf(),
            len: file_len(&file),
            record: RECORD_SIZE,
        })?;

    records.sort_unstable();

    let mut out = Vec::new();
    collect_runs(records, &mut out);
    Ok(out)
}

#[cfg(feature = "mmap")]
fn file_len(file: &File) -> u64 {
    file.metadata().map(|m| m.len()).unwrap_or(0)
}

#[cfg(not(feature = "mmap"))]
fn sorted_runs(bucket: &SpilledBucket, mut file: File, records: usize) -> Result<Vec<Location>> {
    use std::io::Read;

    let mut data = vec![Location::default(); records];
    file.read_exact(bytemuck::cast_slice_mut(&mut data))
        .map_err(|source| Error::BucketRead {
            path: bucket.path().to_path_buf(),
            source,
        })?;

    data.sort_unstable();

    let mut out = Vec::new();
    collect_runs(&data, &mut out);
    Ok(out)
}

/// Finds the duplicated locations of one bucket, then deletes the bucket
/// file whatever the outcome.
pub fn dedup_bucket(bucket: SpilledBucket) -> Result<Vec<Location>> {
    let found = match open_checked(&bucket)? {
        None => Vec::new(),
        Some((file, records)) => sorted_runs(&bucket, file, records)?,
    };

    debug!(
        "Bucket {:>4}: {:>11} records, {:>9} duplicated locations",
        bucket.index(),
        bucket.records(),
        found.len()
    );

    // `bucket` drops here and removes its file.
    Ok(found)
}

/// Deduplicates every bucket (in parallel) and merges the results.
///
/// On error all remaining bucket files are still removed, because every
/// `SpilledBucket` deletes its file on drop.
pub fn find_duplicates(buckets: SpilledBuckets) -> Result<DuplicateLocationSet> {
    let parts = buckets
        .into_inner()
        .into_par_iter()
        .map(dedup_bucket)
        .collect::<Result<Vec<_>>>()?;

    Ok(DuplicateLocationSet::merge(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{BucketConfig, Partitioner};
    use crate::timestamp::Timestamp;
    use std::fs;
    use tempfile::tempdir;

    fn loc(x: i32, y: i32) -> Location {
        Location::new(x, y)
    }

    #[test]
    fn runs_are_reported_once() {
        let sorted = [loc(1, 1), loc(1, 1), loc(1, 1), loc(1, 2), loc(3, 0), loc(3, 0)];
        let mut out = Vec::new();
        collect_runs(&sorted, &mut out);
        assert_eq!(out, vec![loc(1, 1), loc(3, 0)]);
    }

    #[test]
    fn no_runs_in_distinct_input() {
        let mut out = Vec::new();
        collect_runs(&[], &mut out);
        collect_runs(&[loc(0, 0)], &mut out);
        collect_runs(&[loc(0, 0), loc(0, 1)], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn same_x_different_y_is_not_a_duplicate() {
        let dir = tempdir().unwrap();
        let config = BucketConfig {
            count: 2,
            capacity: 1,
        };
        let mut partitioner = Partitioner::create(dir.path(), config, Timestamp::MAX).unwrap();
        for l in [loc(4, 1), loc(4, 2), loc(4, 1), loc(5, 5)] {
            partitioner.push(l).unwrap();
        }

        let set = find_duplicates(partitioner.finish().unwrap()).unwrap();
        assert_eq!(set.as_slice(), &[loc(4, 1)]);
        assert!(set.contains(&loc(4, 1)));
        assert!(!set.contains(&loc(4, 2)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_bucket_is_fatal_and_still_removed() {
        let dir = tempdir().unwrap();
        let config = BucketConfig {
            count: 1,
            capacity: 4,
        };
        let partitioner = Partitioner::create(dir.path(), config, Timestamp::MAX).unwrap();
        let buckets = partitioner.finish().unwrap();
        let path = buckets.iter().next().unwrap().path().to_path_buf();
        fs::write(&path, [0u8; 5]).unwrap();

        let err = find_duplicates(buckets).unwrap_err();
        assert!(matches!(err, Error::BucketCorrupt { len: 5, .. }));
        assert!(!path.exists());
    }
}
