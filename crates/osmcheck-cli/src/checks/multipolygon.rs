//! Multipolygon relations whose tags are repeated on their member ways.
//!
//! Pass 1a keeps the multipolygon relations and indexes their way members,
//! pass 1b keeps the tags of those ways only. After evaluating each relation
//! the flagged relations' ways are written in a last pass, with the
//! offending ways marked.

use super::{significant_tags, RunContext};
use anyhow::{Context, Result};
use hashbrown::HashMap;
use log::{debug, info};
use nohash_hasher::BuildNoHashHasher;
use osmcheck::{
    AnomalySink, Container, DriverConfig, Entity, EntityKind, EntitySource, Filter, KindSet,
    MemberCollector, OwnerIndexBuilder, PassProgress, Stats, TagList, Timestamp, TwoPassDriver,
};
use osmcheck::driver::GEOMETRY_ERRORS;

pub const ANALYZER: &str = "multipolygon-problems";

pub const SAME_TAGS: &str = "multipolygon_relations_with_same_tags";
pub const SAME_KEYS: &str = "multipolygon_relations_with_same_keys";

const SAME_TAGS_MEMBERS: &str = "multipolygon_relations_with_same_tags_members";
const SAME_KEYS_MEMBERS: &str = "multipolygon_relations_with_same_keys_members";

const CATEGORIES: [&str; 4] = [SAME_TAGS, SAME_KEYS, SAME_TAGS_MEMBERS, SAME_KEYS_MEMBERS];

/// What pass 1b keeps of a member way.
#[derive(Debug)]
struct WayInfo {
    tags: TagList,
    closed: bool,
}

type WayMap = HashMap<u64, WayInfo, BuildNoHashHasher<u64>>;

/// The way has significant tags and they equal the relation's, in order.
fn same_tags(relation: &TagList, way: &TagList) -> bool {
    let way_tags = significant_tags(way);
    way_tags.clone().next().is_some() && way_tags.eq(significant_tags(relation))
}

/// Like [`same_tags`], comparing keys only.
fn same_keys(relation: &TagList, way: &TagList) -> bool {
    let way_keys = significant_tags(way).map(|(k, _)| k);
    way_keys.clone().next().is_some() && way_keys.eq(significant_tags(relation).map(|(k, _)| k))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Counters {
    relations: u64,
    without_tags: u64,
    incomplete: u64,
    members: u64,
    way_members: u64,
    members_with_same_tags: u64,
    members_with_same_keys: u64,
    flagged_same_tags: u64,
    flagged_same_keys: u64,
}

struct Evaluation {
    counters: Counters,
    same_tags: MemberCollector,
    same_keys: MemberCollector,
}

impl Evaluation {
    fn new(counters: Counters) -> Self {
        Self {
            counters,
            same_tags: MemberCollector::new(SAME_TAGS_MEMBERS),
            same_keys: MemberCollector::new(SAME_KEYS_MEMBERS),
        }
    }

    fn relation(
        &mut self,
        relation: &Container,
        ways: &WayMap,
        sink: &mut dyn AnomalySink,
    ) -> osmcheck::Result<()> {
        if significant_tags(&relation.tags).next().is_none() {
            self.counters.without_tags += 1;
            return Ok(());
        }

        let way_members = relation.members.iter().filter(|m| m.kind == EntityKind::Path);
        if let Some(missing) = way_members.clone().find(|m| !ways.contains_key(&m.id)) {
            debug!("relation {} is missing way {}", relation.id, missing.id);
            self.counters.incomplete += 1;
            return Ok(());
        }

        let mut marks = Vec::new();
        let mut tags_repeated = false;
        let mut keys_repeated = false;

        for member in way_members {
            let Some(way) = ways.get(&member.id) else {
                continue;
            };

            if same_tags(&relation.tags, &way.tags) {
                self.counters.members_with_same_tags += 1;
                marks.push(member.id);
                tags_repeated = true;
            } else if way.closed && member.role != "inner" && same_keys(&relation.tags, &way.tags) {
                // inner rings may well be a different feature
                self.counters.members_with_same_keys += 1;
                marks.push(member.id);
                keys_repeated = true;
            }
        }

        let entity = || Entity::Container(relation.clone());
        if tags_repeated {
            self.counters.flagged_same_tags += 1;
            sink.write(SAME_TAGS, &entity())?;
            self.same_tags.add_members_of_kind(relation, EntityKind::Path);
            self.same_tags.mark(EntityKind::Path, relation.id, marks.iter().copied());
        }
        if keys_repeated {
            self.counters.flagged_same_keys += 1;
            sink.write(SAME_KEYS, &entity())?;
            self.same_keys.add_members_of_kind(relation, EntityKind::Path);
            self.same_keys.mark(EntityKind::Path, relation.id, marks.iter().copied());
        }
        Ok(())
    }
}

/// Pass 1a: multipolygon relations older than the cutoff, plus the index of
/// their way members.
fn collect_relations<S: EntitySource>(
    source: &S,
    config: &DriverConfig,
    counters: &mut Counters,
) -> osmcheck::Result<(Vec<Container>, OwnerIndexBuilder)> {
    let mut relations = Vec::new();
    let mut owners = OwnerIndexBuilder::new();
    let mut progress = PassProgress::new("Reading relations", config.progress_every);

    let filter = Filter::kinds(KindSet::CONTAINERS).before(config.before);
    source.for_each_entity(&filter, &mut |entity| {
        progress.step();
        let Entity::Container(relation) = entity else {
            return Ok(());
        };
        if !relation.tags.has_tag("type", "multipolygon") {
            return Ok(());
        }

        counters.relations += 1;
        counters.members += relation.members.len() as u64;
        for member in relation.members.iter().filter(|m| m.kind == EntityKind::Path) {
            counters.way_members += 1;
            owners.insert(member.id, relation.id);
        }
        relations.push(relation);
        Ok(())
    })?;
    progress.done();

    Ok((relations, owners))
}

/// Pass 1b: tags and closedness of the indexed ways.
fn collect_ways<S: EntitySource>(
    source: &S,
    owners: OwnerIndexBuilder,
    progress_every: u64,
) -> osmcheck::Result<WayMap> {
    let index = owners.prepare();
    let mut ways = WayMap::default();
    let mut progress = PassProgress::new("Reading ways", progress_every);

    source.for_each_entity(&Filter::kinds(KindSet::PATHS), &mut |entity| {
        progress.step();
        if let Entity::Path(path) = entity {
            if index.contains(path.id) {
                let closed = path.is_closed();
                ways.insert(
                    path.id,
                    WayInfo {
                        tags: path.tags,
                        closed,
                    },
                );
            }
        }
        Ok(())
    })?;
    progress.done();

    debug!("Kept tags of {} member ways", ways.len());
    Ok(ways)
}

pub fn scan<S: EntitySource>(
    source: S,
    sink: &mut dyn AnomalySink,
    config: DriverConfig,
) -> osmcheck::Result<(Stats, Timestamp)> {
    let mut counters = Counters::default();
    let (relations, owners) = collect_relations(&source, &config, &mut counters)?;
    info!(
        "{} multipolygon relations with {} way members",
        counters.relations, counters.way_members
    );

    let ways = collect_ways(&source, owners, config.progress_every)?;

    let mut evaluation = Evaluation::new(counters);
    for relation in &relations {
        evaluation.relation(relation, &ways, sink)?;
    }
    drop(ways);
    drop(relations);

    let Evaluation {
        counters: c,
        same_tags,
        same_keys,
    } = evaluation;
    if c.incomplete > 0 {
        info!("Skipped {} relations with ways missing from the input", c.incomplete);
    }

    let driver = TwoPassDriver::new(source, config);
    let lookups = [same_tags.prepare(), same_keys.prepare()];
    let summary = driver.resolve(&lookups, sink)?;

    let mut stats = Stats::new();
    stats.set("multipolygon_relations", c.relations);
    stats.set("multipolygon_relations_without_tags", c.without_tags);
    stats.set("multipolygon_relation_members", c.members);
    stats.set("multipolygon_relation_way_members", c.way_members);
    stats.set("multipolygon_relation_members_with_same_tags", c.members_with_same_tags);
    stats.set("multipolygon_relation_members_with_same_keys", c.members_with_same_keys);
    stats.set(SAME_TAGS, c.flagged_same_tags);
    stats.set(SAME_KEYS, c.flagged_same_keys);
    for (category, count) in &summary.emitted {
        stats.set(category, *count);
    }
    stats.set(GEOMETRY_ERRORS, summary.geometry_errors);

    Ok((stats, summary.max_timestamp))
}

pub fn run(ctx: &RunContext<'_>) -> Result<()> {
    let mut sink = ctx.open_sink(ANALYZER, &CATEGORIES)?;
    let config = DriverConfig {
        before: ctx.before,
        progress_every: ctx.progress_every,
    };
    let (stats, timestamp) =
        scan(ctx.source, &mut sink, config).context("multipolygon check failed")?;
    ctx.finish(ANALYZER, sink, &stats, timestamp)
}
