//! Structural problems of relations, multipolygons and boundaries.
//!
//! Pass 1 judges every relation; for some problems the relation's members
//! are indexed so pass 2 can write them (with geometry) as well.

use super::{is_significant_key, RunContext};
use anyhow::{Context, Result};
use osmcheck::{
    AnomalySink, Container, ContainerRule, DriverConfig, Entity, EntityKind, EntitySource,
    MemberCollector, Stats, Timestamp, TwoPassDriver,
};

pub const ANALYZER: &str = "relation-problems";

/// Relations with at least this many members are reported as large.
const LARGE_RELATION: usize = 1000;

pub const RELATION_NO_MEMBERS: &str = "relation_no_members";
pub const RELATION_LARGE: &str = "relation_large";
pub const RELATION_NO_TAG: &str = "relation_no_tag";
pub const RELATION_NO_TYPE_TAG: &str = "relation_no_type_tag";
pub const RELATION_ONLY_TYPE_TAG: &str = "relation_only_type_tag";
pub const MULTIPOLYGON_NON_WAY_MEMBER: &str = "multipolygon_non_way_member";
pub const MULTIPOLYGON_UNKNOWN_ROLE: &str = "multipolygon_unknown_role";
pub const MULTIPOLYGON_EMPTY_ROLE: &str = "multipolygon_empty_role";
pub const MULTIPOLYGON_SINGLE_WAY: &str = "multipolygon_single_way";
pub const MULTIPOLYGON_DUPLICATE_WAY: &str = "multipolygon_duplicate_way";
pub const MULTIPOLYGON_OLD_STYLE: &str = "multipolygon_old_style";
pub const MULTIPOLYGON_AREA_TAG: &str = "multipolygon_area_tag";
pub const MULTIPOLYGON_BOUNDARY_ADMINISTRATIVE_TAG: &str =
    "multipolygon_boundary_administrative_tag";
pub const BOUNDARY_EMPTY_ROLE: &str = "boundary_empty_role";
pub const BOUNDARY_DUPLICATE_WAY: &str = "boundary_duplicate_way";
pub const BOUNDARY_AREA_TAG: &str = "boundary_area_tag";
pub const BOUNDARY_NO_BOUNDARY_TAG: &str = "boundary_no_boundary_tag";

/// Relations whose members are written in pass 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indexed {
    NoTag,
    NoTypeTag,
    OnlyTypeTag,
    MultipolygonDuplicateWay,
    BoundaryDuplicateWay,
}

impl Indexed {
    const ALL: [Indexed; 5] = [
        Indexed::NoTag,
        Indexed::NoTypeTag,
        Indexed::OnlyTypeTag,
        Indexed::MultipolygonDuplicateWay,
        Indexed::BoundaryDuplicateWay,
    ];

    fn category(self) -> &'static str {
        match self {
            Indexed::NoTag => "relation_no_tag_members",
            Indexed::NoTypeTag => "relation_no_type_tag_members",
            Indexed::OnlyTypeTag => "relation_only_type_tag_members",
            Indexed::MultipolygonDuplicateWay => "multipolygon_duplicate_way_members",
            Indexed::BoundaryDuplicateWay => "boundary_duplicate_way_members",
        }
    }
}

/// Every category this analyzer may write.
pub fn categories() -> Vec<&'static str> {
    let mut all = vec![
        RELATION_NO_MEMBERS,
        RELATION_LARGE,
        RELATION_NO_TAG,
        RELATION_NO_TYPE_TAG,
        RELATION_ONLY_TYPE_TAG,
        MULTIPOLYGON_NON_WAY_MEMBER,
        MULTIPOLYGON_UNKNOWN_ROLE,
        MULTIPOLYGON_EMPTY_ROLE,
        MULTIPOLYGON_SINGLE_WAY,
        MULTIPOLYGON_DUPLICATE_WAY,
        MULTIPOLYGON_OLD_STYLE,
        MULTIPOLYGON_AREA_TAG,
        MULTIPOLYGON_BOUNDARY_ADMINISTRATIVE_TAG,
        BOUNDARY_EMPTY_ROLE,
        BOUNDARY_DUPLICATE_WAY,
        BOUNDARY_AREA_TAG,
        BOUNDARY_NO_BOUNDARY_TAG,
    ];
    all.extend(Indexed::ALL.iter().map(|i| i.category()));
    all
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Counters {
    member_count: u64,
    no_members: u64,
    no_tag: u64,
    only_type_tag: u64,
    no_type_tag: u64,
    large: u64,
    multipolygon_node_member: u64,
    multipolygon_relation_member: u64,
    multipolygon_unknown_role: u64,
    multipolygon_empty_role: u64,
    multipolygon_area_tag: u64,
    multipolygon_boundary_administrative_tag: u64,
    multipolygon_old_style: u64,
    multipolygon_single_way: u64,
    multipolygon_duplicate_way: u64,
    boundary_empty_role: u64,
    boundary_duplicate_way: u64,
    boundary_area_tag: u64,
    boundary_no_boundary_tag: u64,
}

/// Way ids that appear more than once among the members, each once.
fn duplicate_ways(relation: &Container) -> Vec<u64> {
    let mut ids: Vec<u64> = relation
        .members
        .iter()
        .filter(|m| m.kind == EntityKind::Path)
        .map(|m| m.id)
        .collect();
    ids.sort_unstable();

    let mut dups: Vec<u64> = ids
        .windows(2)
        .filter(|w| w[0] == w[1])
        .map(|w| w[0])
        .collect();
    dups.dedup();
    dups
}

/// Old-style multipolygons keep their tags on the outer way, so the
/// relation itself has nothing but bookkeeping tags.
fn is_old_style(relation: &Container) -> bool {
    relation.tags.len() == 1 || !relation.tags.iter().any(|(k, _)| is_significant_key(k))
}

fn write(sink: &mut dyn AnomalySink, category: &str, relation: &Container) -> osmcheck::Result<()> {
    sink.write(category, &Entity::Container(relation.clone()))
}

pub struct RelationProblems {
    counters: Counters,
    collectors: Vec<MemberCollector>,
}

impl Default for RelationProblems {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationProblems {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            collectors: Indexed::ALL
                .iter()
                .map(|i| MemberCollector::new(i.category()))
                .collect(),
        }
    }

    fn collector(&mut self, which: Indexed) -> &mut MemberCollector {
        &mut self.collectors[which as usize]
    }

    /// Indexes all members, marking the duplicated ways.
    fn index_duplicates(&mut self, which: Indexed, relation: &Container, ways: Vec<u64>) {
        let collector = self.collector(which);
        collector.add_members(relation);
        collector.mark(EntityKind::Path, relation.id, ways);
    }

    fn multipolygon(&mut self, relation: &Container, sink: &mut dyn AnomalySink) -> osmcheck::Result<()> {
        let mut non_way = false;
        let mut unknown_role = false;
        let mut empty_role = false;

        for member in &relation.members {
            match member.kind {
                EntityKind::Point => {
                    self.counters.multipolygon_node_member += 1;
                    non_way = true;
                }
                EntityKind::Container => {
                    self.counters.multipolygon_relation_member += 1;
                    non_way = true;
                }
                EntityKind::Path if member.role.is_empty() => {
                    self.counters.multipolygon_empty_role += 1;
                    empty_role = true;
                }
                EntityKind::Path if member.role != "inner" && member.role != "outer" => {
                    self.counters.multipolygon_unknown_role += 1;
                    unknown_role = true;
                }
                EntityKind::Path => {}
            }
        }

        if non_way {
            write(sink, MULTIPOLYGON_NON_WAY_MEMBER, relation)?;
        }
        if unknown_role {
            write(sink, MULTIPOLYGON_UNKNOWN_ROLE, relation)?;
        }
        if empty_role {
            write(sink, MULTIPOLYGON_EMPTY_ROLE, relation)?;
        }

        if let [only] = relation.members.as_slice() {
            if only.kind == EntityKind::Path {
                self.counters.multipolygon_single_way += 1;
                write(sink, MULTIPOLYGON_SINGLE_WAY, relation)?;
            }
        }

        let dups = duplicate_ways(relation);
        if !dups.is_empty() {
            self.counters.multipolygon_duplicate_way += 1;
            write(sink, MULTIPOLYGON_DUPLICATE_WAY, relation)?;
            self.index_duplicates(Indexed::MultipolygonDuplicateWay, relation, dups);
        }

        if is_old_style(relation) {
            self.counters.multipolygon_old_style += 1;
            return write(sink, MULTIPOLYGON_OLD_STYLE, relation);
        }

        if relation.tags.has_key("area") {
            self.counters.multipolygon_area_tag += 1;
            write(sink, MULTIPOLYGON_AREA_TAG, relation)?;
        }

        if relation.tags.has_tag("boundary", "administrative") {
            self.counters.multipolygon_boundary_administrative_tag += 1;
            write(sink, MULTIPOLYGON_BOUNDARY_ADMINISTRATIVE_TAG, relation)?;
        }

        Ok(())
    }

    fn boundary(&mut self, relation: &Container, sink: &mut dyn AnomalySink) -> osmcheck::Result<()> {
        let empty_roles = relation.members.iter().filter(|m| m.role.is_empty()).count();
        if empty_roles > 0 {
            self.counters.boundary_empty_role += empty_roles as u64;
            write(sink, BOUNDARY_EMPTY_ROLE, relation)?;
        }

        let dups = duplicate_ways(relation);
        if !dups.is_empty() {
            self.counters.boundary_duplicate_way += 1;
            write(sink, BOUNDARY_DUPLICATE_WAY, relation)?;
            self.index_duplicates(Indexed::BoundaryDuplicateWay, relation, dups);
        }

        if relation.tags.has_key("area") {
            self.counters.boundary_area_tag += 1;
            write(sink, BOUNDARY_AREA_TAG, relation)?;
        }

        if !relation.tags.has_key("boundary") {
            self.counters.boundary_no_boundary_tag += 1;
            write(sink, BOUNDARY_NO_BOUNDARY_TAG, relation)?;
        }

        Ok(())
    }
}

impl ContainerRule for RelationProblems {
    fn check(&mut self, relation: &Container, sink: &mut dyn AnomalySink) -> osmcheck::Result<()> {
        let members = relation.members.len();
        self.counters.member_count += members as u64;

        if members == 0 {
            self.counters.no_members += 1;
            write(sink, RELATION_NO_MEMBERS, relation)?;
        } else if members >= LARGE_RELATION {
            self.counters.large += 1;
            write(sink, RELATION_LARGE, relation)?;
        }

        if relation.tags.is_empty() {
            self.counters.no_tag += 1;
            write(sink, RELATION_NO_TAG, relation)?;
            self.collector(Indexed::NoTag).add_members(relation);
            return Ok(());
        }

        let Some(kind) = relation.tags.get("type") else {
            self.counters.no_type_tag += 1;
            write(sink, RELATION_NO_TYPE_TAG, relation)?;
            self.collector(Indexed::NoTypeTag).add_members(relation);
            return Ok(());
        };

        if relation.tags.len() == 1 {
            self.counters.only_type_tag += 1;
            write(sink, RELATION_ONLY_TYPE_TAG, relation)?;
            self.collector(Indexed::OnlyTypeTag).add_members(relation);
        }

        match kind {
            "multipolygon" => self.multipolygon(relation, sink),
            "boundary" => self.boundary(relation, sink),
            _ => Ok(()),
        }
    }

    fn take_collectors(&mut self) -> Vec<MemberCollector> {
        std::mem::take(&mut self.collectors)
    }

    fn report(&self, stats: &mut Stats) {
        let c = &self.counters;
        stats.set("relation_member_count", c.member_count);
        stats.set(RELATION_NO_MEMBERS, c.no_members);
        stats.set(RELATION_NO_TAG, c.no_tag);
        stats.set(RELATION_ONLY_TYPE_TAG, c.only_type_tag);
        stats.set(RELATION_NO_TYPE_TAG, c.no_type_tag);
        stats.set(RELATION_LARGE, c.large);
        stats.set("multipolygon_node_member", c.multipolygon_node_member);
        stats.set("multipolygon_relation_member", c.multipolygon_relation_member);
        stats.set(MULTIPOLYGON_UNKNOWN_ROLE, c.multipolygon_unknown_role);
        stats.set(MULTIPOLYGON_EMPTY_ROLE, c.multipolygon_empty_role);
        stats.set(MULTIPOLYGON_AREA_TAG, c.multipolygon_area_tag);
        stats.set(
            MULTIPOLYGON_BOUNDARY_ADMINISTRATIVE_TAG,
            c.multipolygon_boundary_administrative_tag,
        );
        stats.set(MULTIPOLYGON_OLD_STYLE, c.multipolygon_old_style);
        stats.set(MULTIPOLYGON_SINGLE_WAY, c.multipolygon_single_way);
        stats.set(MULTIPOLYGON_DUPLICATE_WAY, c.multipolygon_duplicate_way);
        stats.set(BOUNDARY_EMPTY_ROLE, c.boundary_empty_role);
        stats.set(BOUNDARY_DUPLICATE_WAY, c.boundary_duplicate_way);
        stats.set(BOUNDARY_AREA_TAG, c.boundary_area_tag);
        stats.set(BOUNDARY_NO_BOUNDARY_TAG, c.boundary_no_boundary_tag);
    }
}

/// Runs both passes; returns the stats and the stats timestamp.
pub fn scan<S: EntitySource>(
    source: S,
    sink: &mut dyn AnomalySink,
    config: DriverConfig,
) -> osmcheck::Result<(Stats, Timestamp)> {
    let driver = TwoPassDriver::new(source, config);
    let mut rule = RelationProblems::new();
    let mut stats = Stats::new();
    let summary = driver.run(&mut rule, sink, &mut stats)?;
    Ok((stats, summary.max_timestamp))
}

pub fn run(ctx: &RunContext<'_>) -> Result<()> {
    let mut sink = ctx.open_sink(ANALYZER, &categories())?;
    let config = DriverConfig {
        before: ctx.before,
        progress_every: ctx.progress_every,
    };
    let (stats, timestamp) =
        scan(ctx.source, &mut sink, config).context("relation check failed")?;
    ctx.finish(ANALYZER, sink, &stats, timestamp)
}
