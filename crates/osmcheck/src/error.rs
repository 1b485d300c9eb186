use std::io;
use std::path::PathBuf;

/// Fatal errors. Any of these means a dedup or index result would be
/// incomplete, so callers abort the run instead of recovering.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("can't create bucket file '{}'", .path.display())]
    BucketCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't write to bucket file '{}'", .path.display())]
    BucketWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't read bucket file '{}'", .path.display())]
    BucketRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "bucket file '{}' is {len} bytes, not a multiple of the {record}-byte record",
        .path.display()
    )]
    BucketCorrupt {
        path: PathBuf,
        len: u64,
        record: usize,
    },

    #[error("bucket count must be a power of two between 1 and 65536, got {0}")]
    InvalidBucketCount(usize),

    #[error("bucket capacity must be at least 1 record")]
    InvalidBucketCapacity,

    #[error("point {id} appeared after paths or containers; input must be sorted by kind")]
    UnorderedInput { id: u64 },

    #[error("entity source failed")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("output sink failed")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn source_failed(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Source(err.into())
    }

    pub fn sink_failed(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Sink(err.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A geometry that cannot be built. Recoverable: the feature is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("path {0} carries no node locations")]
    MissingLocations(u64),

    #[error("path {0} has fewer than two distinct locations")]
    TooFewPoints(u64),

    #[error("point {0} has an invalid location")]
    InvalidLocation(u64),
}
