//! Property tests for partition → bucket dedup → merge


use osmcheck::{
    find_duplicates, partition, BucketConfig, DuplicateLocationSet, Location, Partitioner,
    Timestamp,
};
use proptest::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Distinct values that occur at least twice, by a full in-memory sort.
fn reference(locations: &[Location]) -> Vec<Location> {
    let mut sorted = locations.to_vec();
    sorted.sort();

    let mut out: Vec<Location> = sorted
        .windows(2)
        .filter(|w| w[0] == w[1])
        .map(|w| w[0])
        .collect();
    out.dedup();
    out
}

fn run(dir: &Path, config: BucketConfig, locations: &[Location]) -> DuplicateLocationSet {
    let mut partitioner = Partitioner::create(dir, config, Timestamp::MAX).unwrap();
    for &location in locations {
        partitioner.push(location).unwrap();
    }
    find_duplicates(partitioner.finish().unwrap()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Equal locations always land in the same bucket
    #[test]
    fn partition_is_consistent(
        location in generators::arb_location(),
        config in generators::arb_bucket_config()
    ) {
        let copy = Location::new(location.x, location.y);
        let bucket = partition(location, config.count);
        prop_assert_eq!(bucket, partition(copy, config.count));
        prop_assert!(bucket < config.count);
    }

    /// The bucketed result matches a full in-memory sort-and-scan
    #[test]
    fn dedup_matches_reference(
        locations in generators::arb_locations(),
        config in generators::arb_bucket_config()
    ) {
        let dir = tempdir().unwrap();
        let set = run(dir.path(), config, &locations);
        let expected = reference(&locations);

        prop_assert_eq!(set.as_slice(), expected.as_slice());
        for location in &locations {
            let occurrences = locations.iter().filter(|l| *l == location).count();
            prop_assert_eq!(set.contains(location), occurrences >= 2);
        }
    }

    /// No bucket file survives a run, duplicates or not
    #[test]
    fn buckets_are_removed(
        locations in generators::arb_locations(),
        config in generators::arb_bucket_config()
    ) {
        let dir = tempdir().unwrap();
        run(dir.path(), config, &locations);
        prop_assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Two runs over the same input give byte-identical sets
    #[test]
    fn dedup_is_idempotent(
        locations in generators::arb_locations(),
        config in generators::arb_bucket_config()
    ) {
        let dir = tempdir().unwrap();
        let first = run(dir.path(), config, &locations);
        let second = run(dir.path(), config, &locations);

        let a: &[u8] = bytemuck::cast_slice(first.as_slice());
        let b: &[u8] = bytemuck::cast_slice(second.as_slice());
        prop_assert_eq!(a, b);
    }
}

#[test]
fn no_duplicates_anywhere_still_cleans_up() {
    let dir = tempdir().unwrap();
    let locations: Vec<Location> = (0..1000).map(|i| Location::new(i, -i)).collect();
    let config = BucketConfig {
        count: 8,
        capacity: 16,
    };

    let set = run(dir.path(), config, &locations);
    assert!(set.is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn duplicates_straddling_flushes_are_found() {
    let dir = tempdir().unwrap();
    let hot = Location::new(256, 7);
    let mut locations = vec![hot];
    locations.extend((0..50).map(|i| Location::new(256 * i, i)));
    locations.push(hot);

    let config = BucketConfig {
        count: 256,
        capacity: 3,
    };
    let set = run(dir.path(), config, &locations);
    assert_eq!(set.as_slice(), &[hot]);
}

#[test]
fn empty_input_gives_empty_set() {
    let dir = tempdir().unwrap();
    let set = run(dir.path(), BucketConfig::default(), &[]);
    assert_eq!(set, DuplicateLocationSet::empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}
