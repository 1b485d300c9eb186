//! Entities nothing refers to that carry no tags, or only tags that say
//! nothing about the feature.

use super::RunContext;
use crate::args::CommonArgs;
use anyhow::{Context, Result};
use clap::Args;
use log::{debug, info};
use osmcheck::{
    geometry_of, AnomalySink, ByKind, Entity, EntityKind, EntitySource, Filter, GeometryRecord,
    KindSet, PassProgress, Stats, TagList, Timestamp, DEFAULT_PROGRESS_EVERY,
};
use roaring::RoaringTreemap;

pub const ANALYZER: &str = "orphans";

pub const ORPHAN_NODES: &str = "orphan_nodes";
pub const ORPHAN_WAYS: &str = "orphan_ways";
pub const ORPHAN_RELATIONS: &str = "orphan_relations";

const CATEGORIES: [&str; 3] = [ORPHAN_NODES, ORPHAN_WAYS, ORPHAN_RELATIONS];

/// Tags that still leave an entity an orphan.
const MINOR_KEYS: [&str; 2] = ["created_by", "source"];

const fn category(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Point => ORPHAN_NODES,
        EntityKind::Path => ORPHAN_WAYS,
        EntityKind::Container => ORPHAN_RELATIONS,
    }
}

#[derive(Args, Debug, Clone)]
pub struct OrphansArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Untagged objects only
    #[arg(short = 'u', long, conflicts_with = "no_untagged")]
    pub untagged_only: bool,

    /// No untagged objects
    #[arg(short = 'U', long)]
    pub no_untagged: bool,
}

impl OrphansArgs {
    pub fn options(&self, before: Timestamp, progress_every: u64) -> OrphanOptions {
        OrphanOptions {
            untagged: !self.no_untagged,
            tagged: !self.untagged_only,
            before,
            progress_every,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanOptions {
    pub untagged: bool,
    /// Report entities tagged only with minor keys.
    pub tagged: bool,
    pub before: Timestamp,
    pub progress_every: u64,
}

impl Default for OrphanOptions {
    fn default() -> Self {
        Self {
            untagged: true,
            tagged: true,
            before: Timestamp::MAX,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl OrphanOptions {
    fn wants(&self, tags: &TagList) -> bool {
        if tags.is_empty() {
            self.untagged
        } else {
            self.tagged && tags.iter().all(|(k, _)| MINOR_KEYS.contains(&k))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanSummary {
    pub orphans: ByKind<u64>,
    pub geometry_errors: u64,
    pub max_timestamp: Timestamp,
}

impl OrphanSummary {
    pub fn report(&self, stats: &mut Stats) {
        for (kind, count) in self.orphans.iter() {
            stats.set(category(kind), *count);
        }
    }
}

/// Pass 1: every id a path or container refers to, per kind.
fn referenced_ids<S: EntitySource>(
    source: &S,
    progress_every: u64,
) -> osmcheck::Result<ByKind<RoaringTreemap>> {
    let mut referenced = ByKind::from_fn(|_| RoaringTreemap::new());
    let mut progress = PassProgress::new("Pass 1", progress_every);

    let filter = Filter::kinds(KindSet::PATHS | KindSet::CONTAINERS);
    source.for_each_entity(&filter, &mut |entity| {
        progress.step();
        match &entity {
            Entity::Path(path) => referenced[EntityKind::Point].extend(path.nodes.iter().copied()),
            Entity::Container(container) => {
                for member in &container.members {
                    referenced[member.kind].insert(member.id);
                }
            }
            Entity::Point(_) => {}
        }
        Ok(())
    })?;
    progress.done();

    for (kind, ids) in referenced.iter() {
        debug!("{} distinct {} ids referenced", ids.len(), kind.as_str());
    }
    Ok(referenced)
}

pub fn scan<S: EntitySource>(
    source: S,
    sink: &mut dyn AnomalySink,
    options: OrphanOptions,
) -> osmcheck::Result<OrphanSummary> {
    let referenced = referenced_ids(&source, options.progress_every)?;

    let mut summary = OrphanSummary {
        max_timestamp: Timestamp::MIN,
        ..OrphanSummary::default()
    };
    let mut progress = PassProgress::new("Pass 2", options.progress_every);

    source.for_each_entity(&Filter::all(), &mut |entity| {
        progress.step();
        summary.max_timestamp = summary.max_timestamp.max(entity.timestamp());

        let kind = entity.kind();
        if entity.timestamp() >= options.before
            || referenced[kind].contains(entity.id())
            || !options.wants(entity.tags())
        {
            return Ok(());
        }

        summary.orphans[kind] += 1;
        sink.write(category(kind), &entity)?;

        match geometry_of(&entity) {
            Ok(Some(geometry)) => {
                let record = GeometryRecord {
                    geometry,
                    owner_id: None,
                    kind,
                    entity_id: entity.id(),
                    timestamp: entity.timestamp(),
                    marked: false,
                };
                sink.write_geometry(category(kind), &record)?;
            }
            Ok(None) => {}
            Err(err) => {
                debug!("skipping geometry: {}", err);
                summary.geometry_errors += 1;
            }
        }
        Ok(())
    })?;
    progress.done();

    if summary.geometry_errors > 0 {
        info!("Skipped {} geometries that could not be built", summary.geometry_errors);
    }
    Ok(summary)
}

pub fn run(ctx: &RunContext<'_>, args: &OrphansArgs) -> Result<()> {
    let options = args.options(ctx.before, ctx.progress_every);
    info!(
        "Finding untagged objects: {}, minimally tagged objects: {}",
        if options.untagged { "yes" } else { "no" },
        if options.tagged { "yes" } else { "no" }
    );

    let mut sink = ctx.open_sink(ANALYZER, &CATEGORIES)?;
    let summary = scan(ctx.source, &mut sink, options).context("orphan check failed")?;

    let mut stats = Stats::new();
    summary.report(&mut stats);
    ctx.finish(ANALYZER, sink, &stats, summary.max_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmcheck::{Container, Location, Member, MemorySink, Path, Point, VecSource};

    fn node(id: u64, tags: &[(&str, &str)], secs: i64) -> Entity {
        Entity::Point(Point {
            id,
            location: Location::new(id as i32, 0),
            tags: tags.iter().copied().collect(),
            timestamp: Timestamp::from_secs(secs),
        })
    }

    fn way(id: u64, nodes: &[u64], tags: &[(&str, &str)]) -> Entity {
        Entity::Path(Path {
            id,
            nodes: nodes.to_vec(),
            locations: nodes.iter().map(|&n| Location::new(n as i32, 0)).collect(),
            tags: tags.iter().copied().collect(),
            timestamp: Timestamp::from_secs(1),
        })
    }

    fn relation(id: u64, members: Vec<Member>, tags: &[(&str, &str)]) -> Entity {
        Entity::Container(Container {
            id,
            members,
            tags: tags.iter().copied().collect(),
            timestamp: Timestamp::from_secs(2),
        })
    }

    fn source() -> VecSource {
        VecSource::new(vec![
            node(1, &[], 0),
            node(2, &[], 0),
            node(3, &[("created_by", "JOSM")], 0),
            node(4, &[("amenity", "bench")], 0),
            node(5, &[], 50),
            way(10, &[1, 2], &[]),
            way(11, &[1, 1], &[("source", "bing")]),
            relation(20, vec![Member::new(EntityKind::Path, 10, "")], &[]),
        ])
    }

    fn ids(sink: &MemorySink, category: &str) -> Vec<u64> {
        sink.ids(category).into_iter().map(|(_, id)| id).collect()
    }

    #[test]
    fn finds_untagged_and_minimally_tagged_orphans() {
        let mut sink = MemorySink::new();
        let summary = scan(&source(), &mut sink, OrphanOptions::default()).unwrap();

        assert_eq!(ids(&sink, ORPHAN_NODES), vec![3, 5]);
        assert_eq!(ids(&sink, ORPHAN_WAYS), vec![11]);
        assert_eq!(ids(&sink, ORPHAN_RELATIONS), vec![20]);
        assert_eq!(summary.orphans, ByKind::new(2, 1, 1));
        // way 11 collapses to a single point
        assert_eq!(summary.geometry_errors, 1);
        assert_eq!(sink.geometries(ORPHAN_NODES).len(), 2);
        assert_eq!(summary.max_timestamp, Timestamp::from_secs(50));
    }

    #[test]
    fn tag_modes_and_cutoff() {
        let mut sink = MemorySink::new();
        let options = OrphanOptions {
            tagged: false,
            before: Timestamp::from_secs(10),
            ..OrphanOptions::default()
        };
        let summary = scan(&source(), &mut sink, options).unwrap();
        assert!(sink.ids(ORPHAN_NODES).is_empty());
        assert_eq!(ids(&sink, ORPHAN_RELATIONS), vec![20]);
        assert_eq!(summary.max_timestamp, Timestamp::from_secs(50));

        let mut sink = MemorySink::new();
        let options = OrphanOptions {
            untagged: false,
            ..OrphanOptions::default()
        };
        scan(&source(), &mut sink, options).unwrap();
        assert_eq!(ids(&sink, ORPHAN_NODES), vec![3]);
        assert!(sink.ids(ORPHAN_RELATIONS).is_empty());
    }

    #[test]
    fn stats_use_category_names() {
        let summary = OrphanSummary {
            orphans: ByKind::new(3, 2, 1),
            ..OrphanSummary::default()
        };
        let mut stats = Stats::new();
        summary.report(&mut stats);
        assert_eq!(
            stats.iter().collect::<Vec<_>>(),
            vec![(ORPHAN_NODES, 3), (ORPHAN_WAYS, 2), (ORPHAN_RELATIONS, 1)]
        );
    }
}
