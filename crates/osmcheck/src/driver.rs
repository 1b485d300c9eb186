//! The two-pass drivers.
//!
//! [`TwoPassDriver`] runs container rules over every container (pass 1),
//! prepares the member indexes they filled, then streams the whole input
//! again and emits every entity some index knows about (pass 2).
//!
//! [`ColocatedScan`] is the coordinate variant: pass 1 partitions and
//! deduplicates point locations on disk, pass 2 emits the points at those
//! locations and the paths and containers referencing them.
//!
//! In both, pass 2 only receives prepared (read-only) structures, so no
//! query can reach an index that is still being built.

use crate::bucket::{sweep_stale_buckets, BucketConfig, Partitioner};
use crate::dedup::{find_duplicates, DuplicateLocationSet};
use crate::entity::{Container, Entity, EntityKind, KindSet};
use crate::error::{Error, Result};
use crate::geometry::{geometry_of, Geometry};
use crate::id_set::{IdSet, IdSetBuilder};
use crate::owner_index::{MemberCollector, MemberLookup};
use crate::progress::{PassProgress, DEFAULT_PROGRESS_EVERY};
use crate::sink::{AnomalySink, GeometryRecord, Stats};
use crate::source::{EntitySource, Filter};
use crate::timestamp::Timestamp;
use log::{debug, info};
use std::mem;
use std::path::PathBuf;

/// Stat name for skipped geometries.
pub const GEOMETRY_ERRORS: &str = "geometry_errors";

/// A set of checks over containers.
///
/// `check` sees every container older than the cutoff, once, in input
/// order. It may write the container to any category and add its members
/// to the rule's collectors. Once pass 1 is over the driver takes the
/// collectors and prepares them for pass 2.
pub trait ContainerRule {
    fn check(&mut self, container: &Container, sink: &mut dyn AnomalySink) -> Result<()>;

    /// Called once, after the last `check`.
    fn take_collectors(&mut self) -> Vec<MemberCollector>;

    fn report(&self, stats: &mut Stats);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Pass 1 judges only containers modified before this.
    pub before: Timestamp,
    pub progress_every: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            before: Timestamp::MAX,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Outcome of pass 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveSummary {
    pub seen: u64,
    /// Entities written per member category, in lookup order.
    pub emitted: Vec<(String, u64)>,
    pub geometry_errors: u64,
    /// Latest timestamp in the input; `Timestamp::MIN` if it was empty.
    pub max_timestamp: Timestamp,
}

/// Builds the geometry for `entity` at most once, counting failures.
struct LazyGeometry {
    state: Option<Option<Geometry>>,
}

impl LazyGeometry {
    fn new() -> Self {
        Self { state: None }
    }

    fn get(&mut self, entity: &Entity, errors: &mut u64) -> Option<&Geometry> {
        self.state
            .get_or_insert_with(|| match geometry_of(entity) {
                Ok(geometry) => geometry,
                Err(err) => {
                    debug!("skipping geometry: {}", err);
                    *errors += 1;
                    None
                }
            })
            .as_ref()
    }
}

pub struct TwoPassDriver<S> {
    source: S,
    config: DriverConfig,
}

impl<S: EntitySource> TwoPassDriver<S> {
    pub fn new(source: S, config: DriverConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Pass 1: runs `rule` over the containers, then prepares its
    /// collectors.
    pub fn build(
        &self,
        rule: &mut dyn ContainerRule,
        sink: &mut dyn AnomalySink,
    ) -> Result<Vec<MemberLookup>> {
        let filter = Filter::kinds(KindSet::CONTAINERS).before(self.config.before);
        let mut progress = PassProgress::new("Pass 1", self.config.progress_every);

        self.source.for_each_entity(&filter, &mut |entity| {
            progress.step();
            if let Entity::Container(container) = &entity {
                rule.check(container, sink)?;
            }
            Ok(())
        })?;
        progress.done();

        let lookups: Vec<MemberLookup> = rule
            .take_collectors()
            .into_iter()
            .map(|collector| {
                let lookup = collector.prepare();
                debug!(
                    "Prepared member index '{}' with {} entries",
                    lookup.category(),
                    lookup.len()
                );
                lookup
            })
            .collect();

        Ok(lookups)
    }

    /// Pass 2: streams every entity and writes each one found in a lookup to
    /// that lookup's category, plus one geometry row per owner entry.
    pub fn resolve(
        &self,
        lookups: &[MemberLookup],
        sink: &mut dyn AnomalySink,
    ) -> Result<ResolveSummary> {
        let mut emitted = vec![0u64; lookups.len()];
        let mut geometry_errors = 0u64;
        let mut max_timestamp = Timestamp::MIN;
        let mut progress = PassProgress::new("Pass 2", self.config.progress_every);

        self.source.for_each_entity(&Filter::all(), &mut |entity| {
            progress.step();
            max_timestamp = max_timestamp.max(entity.timestamp());

            let kind = entity.kind();
            let id = entity.id();
            let mut geometry = LazyGeometry::new();

            for (slot, lookup) in lookups.iter().enumerate() {
                let owners = lookup.query(kind, id);
                if owners.is_empty() {
                    continue;
                }

                sink.write(lookup.category(), &entity)?;
                emitted[slot] += 1;

                if let Some(geom) = geometry.get(&entity, &mut geometry_errors) {
                    for entry in owners {
                        let record = GeometryRecord {
                            geometry: geom.clone(),
                            owner_id: Some(entry.owner_id),
                            kind,
                            entity_id: id,
                            timestamp: entity.timestamp(),
                            marked: entry.marked,
                        };
                        sink.write_geometry(lookup.category(), &record)?;
                    }
                }
            }
            Ok(())
        })?;
        progress.done();

        if geometry_errors > 0 {
            info!("Skipped {} geometries that could not be built", geometry_errors);
        }

        Ok(ResolveSummary {
            seen: progress.seen(),
            emitted: lookups
                .iter()
                .zip(emitted)
                .map(|(lookup, count)| (lookup.category().to_owned(), count))
                .collect(),
            geometry_errors,
            max_timestamp,
        })
    }

    /// Both passes, then the rule's counters, the per-category member counts
    /// and the geometry error count into `stats`.
    pub fn run(
        &self,
        rule: &mut dyn ContainerRule,
        sink: &mut dyn AnomalySink,
        stats: &mut Stats,
    ) -> Result<ResolveSummary> {
        let lookups = self.build(rule, sink)?;
        let summary = self.resolve(&lookups, sink)?;

        rule.report(stats);
        for (category, count) in &summary.emitted {
            stats.set(category, *count);
        }
        stats.set(GEOMETRY_ERRORS, summary.geometry_errors);

        Ok(summary)
    }
}

pub const COLOCATED_NODES: &str = "colocated_nodes";
pub const WAYS_REFERENCING_COLOCATED_NODES: &str = "ways_referencing_colocated_nodes";
pub const RELATIONS_REFERENCING_COLOCATED_NODES: &str = "relations_referencing_colocated_nodes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColocatedConfig {
    pub buckets: BucketConfig,
    /// Where bucket files go.
    pub work_dir: PathBuf,
    /// Remove bucket files of an interrupted earlier run first.
    pub sweep: bool,
    /// Only points modified before this are partitioned.
    pub before: Timestamp,
    pub progress_every: u64,
}

impl ColocatedConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            buckets: BucketConfig::default(),
            work_dir: work_dir.into(),
            sweep: true,
            before: Timestamp::MAX,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColocatedSummary {
    pub points_partitioned: u64,
    pub locations_with_colocated_nodes: u64,
    pub colocated_nodes: u64,
    pub ways_referencing_colocated_nodes: u64,
    pub relations_referencing_colocated_nodes: u64,
    pub geometry_errors: u64,
    pub max_timestamp: Timestamp,
}

impl ColocatedSummary {
    pub fn report(&self, stats: &mut Stats) {
        stats.set(
            "locations_with_colocated_nodes",
            self.locations_with_colocated_nodes,
        );
        stats.set(COLOCATED_NODES, self.colocated_nodes);
        stats.set(
            WAYS_REFERENCING_COLOCATED_NODES,
            self.ways_referencing_colocated_nodes,
        );
        stats.set(
            RELATIONS_REFERENCING_COLOCATED_NODES,
            self.relations_referencing_colocated_nodes,
        );
    }
}

/// Ids of emitted points. Filled while points stream past, sealed at the
/// first path or container.
#[derive(Default)]
struct PointIds {
    building: IdSetBuilder,
    sealed: Option<IdSet>,
}

impl PointIds {
    fn insert(&mut self, id: u64) {
        self.building.insert(id);
    }

    fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    fn sealed(&mut self) -> &IdSet {
        let building = &mut self.building;
        self.sealed
            .get_or_insert_with(|| mem::take(building).seal())
    }
}

pub struct ColocatedScan<S> {
    source: S,
    config: ColocatedConfig,
}

impl<S: EntitySource> ColocatedScan<S> {
    pub fn new(source: S, config: ColocatedConfig) -> Self {
        Self { source, config }
    }

    /// Pass 1: partition point locations into buckets and deduplicate them.
    /// Returns the duplicate set and the number of points partitioned.
    pub fn duplicates(&self) -> Result<(DuplicateLocationSet, u64)> {
        let dir = &self.config.work_dir;
        if self.config.sweep {
            sweep_stale_buckets(dir)?;
        }

        let mut partitioner = Partitioner::create(dir, self.config.buckets, self.config.before)?;
        let mut progress = PassProgress::new("Partitioning", self.config.progress_every);

        self.source
            .for_each_entity(&Filter::kinds(KindSet::POINTS), &mut |entity| {
                progress.step();
                if let Entity::Point(point) = &entity {
                    partitioner.offer(point.location, point.timestamp)?;
                }
                Ok(())
            })?;
        progress.done();

        let accepted = partitioner.accepted();
        info!(
            "Partitioned {} locations into {} buckets ({} skipped by age)",
            accepted,
            partitioner.bucket_count(),
            partitioner.skipped()
        );

        let buckets = partitioner.finish()?;
        let duplicates = find_duplicates(buckets)?;
        info!("Found {} locations with multiple nodes", duplicates.len());

        Ok((duplicates, accepted))
    }

    /// Pass 2: emits points on a duplicated location, then every path and
    /// container referencing one of those points (each at most once).
    pub fn emit(
        &self,
        duplicates: &DuplicateLocationSet,
        sink: &mut dyn AnomalySink,
    ) -> Result<ColocatedSummary> {
        let mut summary = ColocatedSummary {
            locations_with_colocated_nodes: duplicates.len() as u64,
            max_timestamp: Timestamp::MIN,
            ..ColocatedSummary::default()
        };
        let mut points = PointIds::default();
        let mut progress = PassProgress::new("Pass 2", self.config.progress_every);

        self.source.for_each_entity(&Filter::all(), &mut |entity| {
            progress.step();
            summary.max_timestamp = summary.max_timestamp.max(entity.timestamp());

            match &entity {
                Entity::Point(point) => {
                    if points.is_sealed() {
                        return Err(Error::UnorderedInput { id: point.id });
                    }
                    if !duplicates.contains(&point.location) {
                        return Ok(());
                    }

                    points.insert(point.id);
                    summary.colocated_nodes += 1;
                    sink.write(COLOCATED_NODES, &entity)?;

                    match geometry_of(&entity) {
                        Ok(Some(geometry)) => {
                            let record = GeometryRecord {
                                geometry,
                                owner_id: None,
                                kind: EntityKind::Point,
                                entity_id: point.id,
                                timestamp: point.timestamp,
                                marked: false,
                            };
                            sink.write_geometry(COLOCATED_NODES, &record)?;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            debug!("skipping geometry: {}", err);
                            summary.geometry_errors += 1;
                        }
                    }
                }
                Entity::Path(path) => {
                    let ids = points.sealed();
                    if path.nodes.iter().any(|&id| ids.contains(id)) {
                        summary.ways_referencing_colocated_nodes += 1;
                        sink.write(WAYS_REFERENCING_COLOCATED_NODES, &entity)?;
                    }
                }
                Entity::Container(container) => {
                    let ids = points.sealed();
                    let hit = container
                        .members
                        .iter()
                        .any(|m| m.kind == EntityKind::Point && ids.contains(m.id));
                    if hit {
                        summary.relations_referencing_colocated_nodes += 1;
                        sink.write(RELATIONS_REFERENCING_COLOCATED_NODES, &entity)?;
                    }
                }
            }
            Ok(())
        })?;
        progress.done();

        Ok(summary)
    }

    /// Both passes.
    pub fn run(&self, sink: &mut dyn AnomalySink) -> Result<ColocatedSummary> {
        let (duplicates, partitioned) = self.duplicates()?;
        let mut summary = self.emit(&duplicates, sink)?;
        summary.points_partitioned = partitioned;

        info!(
            "{} colocated nodes, {} ways and {} relations referencing them",
            summary.colocated_nodes,
            summary.ways_referencing_colocated_nodes,
            summary.relations_referencing_colocated_nodes
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Member, Path, Point, TagList};
    use crate::location::Location;
    use crate::sink::MemorySink;
    use crate::source::VecSource;

    fn point(id: u64, x: i32, y: i32) -> Entity {
        Entity::Point(Point {
            id,
            location: Location::new(x, y),
            tags: TagList::new(),
            timestamp: Timestamp::from_secs(id as i64),
        })
    }

    fn container(id: u64, members: Vec<Member>, tags: TagList) -> Entity {
        Entity::Container(Container {
            id,
            members,
            tags,
            timestamp: Timestamp::from_secs(1000 + id as i64),
        })
    }

    /// Indexes the members of untagged containers.
    struct Untagged {
        collector: Option<MemberCollector>,
        untagged: u64,
    }

    impl ContainerRule for Untagged {
        fn check(&mut self, container: &Container, sink: &mut dyn AnomalySink) -> Result<()> {
            if container.tags.is_empty() {
                self.untagged += 1;
                sink.write("untagged", &Entity::Container(container.clone()))?;
                if let Some(collector) = self.collector.as_mut() {
                    collector.add_members(container);
                }
            }
            Ok(())
        }

        fn take_collectors(&mut self) -> Vec<MemberCollector> {
            self.collector.take().into_iter().collect()
        }

        fn report(&self, stats: &mut Stats) {
            stats.set("untagged", self.untagged);
        }
    }

    #[test]
    fn driver_emits_members_of_flagged_containers() {
        let tagged: TagList = [("type", "route")].into_iter().collect();
        let source = VecSource::new(vec![
            point(1, 10, 10),
            point(2, 20, 20),
            container(
                7,
                vec![
                    Member::new(EntityKind::Point, 1, ""),
                    Member::new(EntityKind::Point, 1, ""),
                ],
                TagList::new(),
            ),
            container(8, vec![Member::new(EntityKind::Point, 2, "")], tagged),
        ]);

        let driver = TwoPassDriver::new(&source, DriverConfig::default());
        let mut rule = Untagged {
            collector: Some(MemberCollector::new("untagged_members")),
            untagged: 0,
        };
        let mut sink = MemorySink::new();
        let mut stats = Stats::new();
        let summary = driver.run(&mut rule, &mut sink, &mut stats).unwrap();

        assert_eq!(sink.ids("untagged"), vec![(EntityKind::Container, 7)]);
        assert_eq!(sink.ids("untagged_members"), vec![(EntityKind::Point, 1)]);
        let geoms = sink.geometries("untagged_members");
        assert_eq!(geoms.len(), 2);
        assert!(geoms.iter().all(|g| g.owner_id == Some(7)));

        assert_eq!(summary.seen, 4);
        assert_eq!(summary.max_timestamp, Timestamp::from_secs(1008));
        assert_eq!(stats.get("untagged"), Some(1));
        assert_eq!(stats.get("untagged_members"), Some(1));
        assert_eq!(stats.get(GEOMETRY_ERRORS), Some(0));
    }

    #[test]
    fn pass_one_honours_cutoff() {
        let source = VecSource::new(vec![container(5, Vec::new(), TagList::new())]);
        let config = DriverConfig {
            before: Timestamp::from_secs(1005),
            ..DriverConfig::default()
        };
        let driver = TwoPassDriver::new(&source, config);
        let mut rule = Untagged {
            collector: None,
            untagged: 0,
        };
        let mut sink = MemorySink::new();
        let lookups = driver.build(&mut rule, &mut sink).unwrap();
        assert!(lookups.is_empty());
        assert_eq!(rule.untagged, 0);
    }

    #[test]
    fn late_point_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = VecSource::new(vec![
            point(1, 5, 5),
            Entity::Path(Path {
                id: 1,
                nodes: vec![1],
                locations: Vec::new(),
                tags: TagList::new(),
                timestamp: Timestamp::default(),
            }),
            point(2, 5, 5),
        ]);
        let mut config = ColocatedConfig::new(dir.path());
        config.buckets = BucketConfig {
            count: 4,
            capacity: 2,
        };

        let scan = ColocatedScan::new(&source, config);
        let err = scan.run(&mut MemorySink::new()).unwrap_err();
        assert!(matches!(err, Error::UnorderedInput { id: 2 }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
