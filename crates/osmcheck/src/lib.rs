//! Out-of-core building blocks for finding anomalies in OSM extracts.
//!
//! Two structures carry every analysis:
//!
//! * a **duplicate location set**: point locations are fanned out into
//!   disk-backed buckets by the low bits of `x`, each bucket is sorted on
//!   its own and scanned for adjacent equal records, and the per-bucket hits
//!   are merged into one sorted set ([`bucket`], [`dedup`]);
//! * an **owner index**: `(member, owner, mark)` entries appended while
//!   containers stream past, sorted once, then queried by member id
//!   ([`owner_index`]).
//!
//! [`driver`] wires them into the two passes an analyzer makes over its
//! input. Memory use scales with the number of matches, plus
//! `buckets * capacity * 8` bytes of bucket buffers, never with the size of
//! the input.
//!
//! ```
//! use osmcheck::{ColocatedConfig, ColocatedScan, Entity, Location, MemorySink, Point, TagList,
//!                Timestamp, VecSource};
//!
//! let point = |id, x, y| Entity::Point(Point {
//!     id,
//!     location: Location::new(x, y),
//!     tags: TagList::new(),
//!     timestamp: Timestamp::from_secs(0),
//! });
//! let source = VecSource::new(vec![point(1, 5, 5), point(2, 5, 5), point(3, 6, 5)]);
//!
//! let dir = tempfile::tempdir().unwrap();
//! let scan = ColocatedScan::new(&source, ColocatedConfig::new(dir.path()));
//! let mut sink = MemorySink::new();
//! let summary = scan.run(&mut sink).unwrap();
//!
//! assert_eq!(summary.locations_with_colocated_nodes, 1);
//! assert_eq!(summary.colocated_nodes, 2);
//! ```

pub mod bucket;
pub mod dedup;
pub mod driver;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod id_set;
pub mod location;
pub mod owner_index;
pub mod progress;
pub mod sink;
pub mod source;
pub mod timestamp;

pub use bucket::{
    bucket_path, partition, sweep_stale_buckets, BucketBuffer, BucketConfig, Partitioner,
    SpilledBucket, SpilledBuckets, DEFAULT_BUCKET_CAPACITY, DEFAULT_BUCKET_COUNT,
};
pub use dedup::{dedup_bucket, find_duplicates, DuplicateLocationSet};
pub use driver::{
    ColocatedConfig, ColocatedScan, ColocatedSummary, ContainerRule, DriverConfig,
    ResolveSummary, TwoPassDriver,
};
pub use entity::{ByKind, Container, Entity, EntityKind, KindSet, Member, Path, Point, TagList};
pub use error::{Error, GeometryError, Result};
pub use geometry::{geometry_of, Geometry};
pub use id_set::{IdSet, IdSetBuilder};
pub use location::{Location, COORDINATE_PRECISION};
pub use owner_index::{MemberCollector, MemberLookup, OwnerEntry, OwnerIndex, OwnerIndexBuilder};
pub use progress::{PassProgress, Tick, DEFAULT_PROGRESS_EVERY};
pub use sink::{AnomalySink, GeometryRecord, MemorySink, Stats, StatsSink};
pub use source::{EntitySource, Filter, VecSource};
pub use timestamp::Timestamp;
