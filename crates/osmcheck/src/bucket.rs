//! Coordinate partitioning into disk-backed buckets.
//!
//! Every accepted location goes to bucket `x & (count - 1)`. Equal locations
//! have equal `x`, so a duplicate can never straddle two buckets and each
//! bucket can be deduplicated on its own.
//!
//! Bucket files hold raw native-endian [`Location`] records in append order:
//!
//! ```text
//!   <work-dir>/locations_<hex index>.dat
//!   [i32 x, i32 y] * records
//! ```
//!
//! They live for one partition → dedup cycle. Every handle to a bucket file
//! removes the file when dropped, so a failed run cleans up after itself; only
//! a killed process leaves files behind, which [`sweep_stale_buckets`] removes.

use crate::error::{Error, Result};
use crate::location::Location;
use crate::timestamp::Timestamp;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};

/// Default number of buckets.
pub const DEFAULT_BUCKET_COUNT: usize = 1 << 8;

/// Default in-memory records per bucket before it is flushed to disk.
pub const DEFAULT_BUCKET_CAPACITY: usize = 512 * 1024;

const MAX_BUCKET_COUNT: usize = 1 << 16;
const BUCKET_PREFIX: &str = "locations_";
const BUCKET_SUFFIX: &str = ".dat";

/// Bytes per on-disk record.
pub const RECORD_SIZE: usize = mem::size_of::<Location>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Number of buckets; a power of two.
    pub count: usize,
    /// Records buffered per bucket before a flush.
    pub capacity: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_BUCKET_COUNT,
            capacity: DEFAULT_BUCKET_CAPACITY,
        }
    }
}

impl BucketConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.count.is_power_of_two() || self.count > MAX_BUCKET_COUNT {
            return Err(Error::InvalidBucketCount(self.count));
        }
        if self.capacity == 0 {
            return Err(Error::InvalidBucketCapacity);
        }
        Ok(())
    }

    /// Upper bound on resident buffer memory in bytes.
    pub fn buffer_bytes(&self) -> usize {
        self.count * self.capacity * RECORD_SIZE
    }
}

/// Bucket index of a location. Depends only on `x`, so equal locations
/// always land in the same bucket. `count` must be a power of two.
#[inline(always)]
pub fn partition(location: Location, count: usize) -> usize {
    debug_assert!(count.is_power_of_two());
    (location.x as u32 as usize) & (count - 1)
}

/// Deterministic file name for bucket `index` of `count`.
pub fn bucket_path(dir: &Path, index: usize, count: usize) -> PathBuf {
    let bits = count.max(2).trailing_zeros() as usize;
    let digits = ((bits + 3) / 4).max(2);
    dir.join(format!("{BUCKET_PREFIX}{index:0digits$x}{BUCKET_SUFFIX}"))
}

fn is_bucket_file_name(name: &str) -> bool {
    name.strip_prefix(BUCKET_PREFIX)
        .and_then(|rest| rest.strip_suffix(BUCKET_SUFFIX))
        .map(|hex| !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Removes bucket files left in `dir` by an interrupted run. Returns how
/// many were removed.
pub fn sweep_stale_buckets(dir: &Path) -> Result<usize> {
    let mut removed = 0usize;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name();
        if name.to_str().map(is_bucket_file_name).unwrap_or(false) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    if removed > 0 {
        warn!(
            "Removed {} stale bucket file(s) from {}",
            removed,
            dir.display()
        );
    }

    Ok(removed)
}

/// Owns a bucket file on disk and deletes it when dropped.
#[derive(Debug)]
struct BucketFile {
    path: PathBuf,
}

impl Drop for BucketFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("can't remove bucket file '{}': {}", self.path.display(), err);
            }
        }
    }
}

/// Bounded in-memory append buffer in front of one bucket file.
#[derive(Debug)]
pub struct BucketBuffer {
    index: usize,
    capacity: usize,
    data: Vec<Location>,
    written: u64,
    file: File,
    guard: BucketFile,
}

impl BucketBuffer {
    /// Creates (truncating) the backing file for bucket `index`.
    pub fn create(dir: &Path, index: usize, count: usize, capacity: usize) -> Result<Self> {
        let path = bucket_path(dir, index, count);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| Error::BucketCreate {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            index,
            capacity,
            data: Vec::with_capacity(capacity),
            written: 0,
            file,
            guard: BucketFile { path },
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Records currently buffered in memory.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.data.len()
    }

    /// Records already written to the file.
    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends a record, flushing when the buffer reaches capacity.
    #[inline]
    pub fn push(&mut self, location: Location) -> Result<()> {
        self.data.push(location);
        if self.data.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes all buffered records to the file. No-op when empty.
    pub fn flush(&mut self) -> Result<()> {
        if self.data.is_empty() {
            return Ok(());
        }

        let bytes: &[u8] = bytemuck::cast_slice(&self.data);
        self.file
            .write_all(bytes)
            .map_err(|source| Error::BucketWrite {
                path: self.guard.path.clone(),
                source,
            })?;

        self.written += self.data.len() as u64;
        self.data.clear();
        Ok(())
    }

    /// Flushes, closes the writer and hands the file over for reading.
    pub fn finish(mut self) -> Result<SpilledBucket> {
        self.flush()?;
        self.file.flush().map_err(|source| Error::BucketWrite {
            path: self.guard.path.clone(),
            source,
        })?;

        let BucketBuffer {
            index,
            written,
            file,
            guard,
            ..
        } = self;
        drop(file);

        Ok(SpilledBucket {
            index,
            records: written,
            guard,
        })
    }
}

/// A fully written bucket file awaiting deduplication. Dropping it deletes
/// the file.
#[derive(Debug)]
pub struct SpilledBucket {
    index: usize,
    records: u64,
    guard: BucketFile,
}

impl SpilledBucket {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }
}

/// All buckets of one partition phase, ordered by index.
#[derive(Debug)]
pub struct SpilledBuckets {
    pub(crate) buckets: Vec<SpilledBucket>,
}

impl SpilledBuckets {
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total_records(&self) -> u64 {
        self.buckets.iter().map(SpilledBucket::records).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpilledBucket> {
        self.buckets.iter()
    }

    pub fn into_inner(self) -> Vec<SpilledBucket> {
        self.buckets
    }
}

/// Fans a location stream out into `count` buckets.
#[derive(Debug)]
pub struct Partitioner {
    buckets: Vec<BucketBuffer>,
    before: Timestamp,
    accepted: u64,
    skipped: u64,
}

impl Partitioner {
    /// Opens all bucket files in `dir`. Fails (removing any files already
    /// created) if one of them can't be created.
    pub fn create(dir: &Path, config: BucketConfig, before: Timestamp) -> Result<Self> {
        config.validate()?;

        let buckets = (0..config.count)
            .map(|index| BucketBuffer::create(dir, index, config.count, config.capacity))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Opened {} buckets in {} ({} records each, {} MiB of buffers)",
            config.count,
            dir.display(),
            config.capacity,
            config.buffer_bytes() >> 20
        );

        Ok(Self {
            buckets,
            before,
            accepted: 0,
            skipped: 0,
        })
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Appends a location unconditionally.
    #[inline]
    pub fn push(&mut self, location: Location) -> Result<()> {
        let index = partition(location, self.buckets.len());
        self.buckets[index].push(location)?;
        self.accepted += 1;
        Ok(())
    }

    /// Appends a location unless its entity was modified at or after the
    /// cutoff. Returns whether it was accepted.
    #[inline]
    pub fn offer(&mut self, location: Location, modified: Timestamp) -> Result<bool> {
        if modified >= self.before {
            self.skipped += 1;
            return Ok(false);
        }
        self.push(location)?;
        Ok(true)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Flushes every bucket and returns the written files.
    pub fn finish(self) -> Result<SpilledBuckets> {
        let buckets = self
            .buckets
            .into_iter()
            .map(BucketBuffer::finish)
            .collect::<Result<Vec<_>>>()?;

        Ok(SpilledBuckets { buckets })
    }
}
