//! Keys and values that are almost certainly mistakes, and tags that belong
//! on a different kind of entity.

use super::RunContext;
use anyhow::{Context, Result};
use osmcheck::{AnomalySink, Entity, EntitySource, Filter, PassProgress, Stats, Timestamp};

pub const ANALYZER: &str = "unusual-tags";

/// Keys longer than this (in bytes) are reported.
const MAX_KEY_LEN: usize = 80;

const BAD_CHARACTERS: &[char] = &['=', '/', '&', '<', '>', ';', '\'', '"', '?', '%', '#', '@', '\\', ','];

pub const NW_TAG_TYPE_MULTIPOLYGON: &str = "nw_tag_type_multipolygon";
pub const NW_TAG_TYPE_BOUNDARY: &str = "nw_tag_type_boundary";
pub const NR_TAG_NATURAL_COASTLINE: &str = "nr_tag_natural_coastline";
pub const R_TAG_BOUNDARY_MULTIPOLYGON: &str = "r_tag_boundary_multipolygon";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagProblem {
    KeyEmpty,
    KeyShort,
    KeyLong,
    KeyRole,
    KeyBadChars,
    KeyUnusualChars,
    ValueEmpty,
    ValueWhitespace,
}

impl TagProblem {
    pub const ALL: [TagProblem; 8] = [
        TagProblem::KeyEmpty,
        TagProblem::KeyShort,
        TagProblem::KeyLong,
        TagProblem::KeyRole,
        TagProblem::KeyBadChars,
        TagProblem::KeyUnusualChars,
        TagProblem::ValueEmpty,
        TagProblem::ValueWhitespace,
    ];

    /// Category and stat name.
    pub fn name(self) -> &'static str {
        match self {
            TagProblem::KeyEmpty => "nwr_key_empty",
            TagProblem::KeyShort => "nwr_key_short",
            TagProblem::KeyLong => "nwr_key_long",
            TagProblem::KeyRole => "nwr_key_role",
            TagProblem::KeyBadChars => "nwr_key_bad_chars",
            TagProblem::KeyUnusualChars => "nwr_key_unusual_chars",
            TagProblem::ValueEmpty => "nwr_value_empty",
            TagProblem::ValueWhitespace => "nwr_value_whitespace",
        }
    }
}

fn key_shape(key: &str) -> Option<TagProblem> {
    match key.len() {
        0 => Some(TagProblem::KeyEmpty),
        1 => Some(TagProblem::KeyShort),
        n if n > MAX_KEY_LEN => Some(TagProblem::KeyLong),
        _ if key == "role" => Some(TagProblem::KeyRole),
        _ => None,
    }
}

fn is_usual(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn key_chars(key: &str) -> Option<TagProblem> {
    if key.contains(BAD_CHARACTERS) {
        Some(TagProblem::KeyBadChars)
    } else if !key.chars().all(is_usual) {
        Some(TagProblem::KeyUnusualChars)
    } else {
        None
    }
}

fn value_shape(value: &str) -> Option<TagProblem> {
    if value.is_empty() {
        Some(TagProblem::ValueEmpty)
    } else if value.starts_with(char::is_whitespace) || value.ends_with(char::is_whitespace) {
        Some(TagProblem::ValueWhitespace)
    } else {
        None
    }
}

/// At most one problem each for the key's shape, the key's characters and
/// the value.
pub fn tag_problems(key: &str, value: &str) -> [Option<TagProblem>; 3] {
    [key_shape(key), key_chars(key), value_shape(value)]
}

pub fn categories() -> Vec<&'static str> {
    let mut all: Vec<&'static str> = TagProblem::ALL.iter().map(|p| p.name()).collect();
    all.extend([
        NW_TAG_TYPE_MULTIPOLYGON,
        NW_TAG_TYPE_BOUNDARY,
        NR_TAG_NATURAL_COASTLINE,
        R_TAG_BOUNDARY_MULTIPOLYGON,
    ]);
    all
}

/// Counts problems per tag; writes each entity at most once per category.
pub struct UnusualTags {
    stats: Stats,
    written: Vec<&'static str>,
}

impl Default for UnusualTags {
    fn default() -> Self {
        Self::new()
    }
}

impl UnusualTags {
    pub fn new() -> Self {
        let mut stats = Stats::new();
        for name in ["nodes", "ways", "relations"] {
            stats.set(name, 0);
        }
        for problem in TagProblem::ALL {
            stats.set(problem.name(), 0);
        }
        for name in [
            "n_tag_type_multipolygon",
            "w_tag_type_multipolygon",
            "n_tag_type_boundary",
            "w_tag_type_boundary",
            "n_tag_natural_coastline",
            "r_tag_natural_coastline",
            "r_tag_boundary_multipolygon",
        ] {
            stats.set(name, 0);
        }

        Self {
            stats,
            written: Vec::new(),
        }
    }

    fn hit(
        &mut self,
        stat: &str,
        category: &'static str,
        entity: &Entity,
        sink: &mut dyn AnomalySink,
    ) -> osmcheck::Result<()> {
        self.stats.add(stat, 1);
        if !self.written.contains(&category) {
            self.written.push(category);
            sink.write(category, entity)?;
        }
        Ok(())
    }

    pub fn check(&mut self, entity: &Entity, sink: &mut dyn AnomalySink) -> osmcheck::Result<()> {
        self.written.clear();
        let tags = entity.tags();

        for (key, value) in tags.iter() {
            for problem in tag_problems(key, value).into_iter().flatten() {
                self.hit(problem.name(), problem.name(), entity, sink)?;
            }
        }

        match entity {
            Entity::Point(_) => {
                self.stats.add("nodes", 1);
                match tags.get("type") {
                    Some("multipolygon") => {
                        self.hit("n_tag_type_multipolygon", NW_TAG_TYPE_MULTIPOLYGON, entity, sink)?
                    }
                    Some("boundary") => {
                        self.hit("n_tag_type_boundary", NW_TAG_TYPE_BOUNDARY, entity, sink)?
                    }
                    _ => {}
                }
                if tags.has_tag("natural", "coastline") {
                    self.hit("n_tag_natural_coastline", NR_TAG_NATURAL_COASTLINE, entity, sink)?;
                }
            }
            Entity::Path(_) => {
                self.stats.add("ways", 1);
                match tags.get("type") {
                    Some("multipolygon") => {
                        self.hit("w_tag_type_multipolygon", NW_TAG_TYPE_MULTIPOLYGON, entity, sink)?
                    }
                    Some("boundary") => {
                        self.hit("w_tag_type_boundary", NW_TAG_TYPE_BOUNDARY, entity, sink)?
                    }
                    _ => {}
                }
            }
            Entity::Container(_) => {
                self.stats.add("relations", 1);
                if tags.has_tag("natural", "coastline") {
                    self.hit("r_tag_natural_coastline", NR_TAG_NATURAL_COASTLINE, entity, sink)?;
                }
                if tags.has_tag("type", "multipolygon") && tags.has_tag("boundary", "administrative") {
                    self.hit(R_TAG_BOUNDARY_MULTIPOLYGON, R_TAG_BOUNDARY_MULTIPOLYGON, entity, sink)?;
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// One pass over everything; entities at or after `before` are skipped but
/// still count towards the stats timestamp.
pub fn scan<S: EntitySource>(
    source: S,
    sink: &mut dyn AnomalySink,
    before: Timestamp,
    progress_every: u64,
) -> osmcheck::Result<(Stats, Timestamp)> {
    let mut checker = UnusualTags::new();
    let mut max_timestamp = Timestamp::MIN;
    let mut progress = PassProgress::new("Checking tags", progress_every);

    source.for_each_entity(&Filter::all(), &mut |entity| {
        progress.step();
        max_timestamp = max_timestamp.max(entity.timestamp());
        if entity.timestamp() < before {
            checker.check(&entity, sink)?;
        }
        Ok(())
    })?;
    progress.done();

    Ok((checker.stats, max_timestamp))
}

pub fn run(ctx: &RunContext<'_>) -> Result<()> {
    let mut sink = ctx.open_sink(ANALYZER, &categories())?;
    let (stats, timestamp) = scan(ctx.source, &mut sink, ctx.before, ctx.progress_every)
        .context("tag check failed")?;
    ctx.finish(ANALYZER, sink, &stats, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmcheck::{Container, EntityKind, Location, MemorySink, Path, Point, VecSource};

    #[test]
    fn key_checks() {
        assert_eq!(key_shape(""), Some(TagProblem::KeyEmpty));
        assert_eq!(key_shape("x"), Some(TagProblem::KeyShort));
        assert_eq!(key_shape(&"k".repeat(81)), Some(TagProblem::KeyLong));
        assert_eq!(key_shape(&"k".repeat(80)), None);
        assert_eq!(key_shape("role"), Some(TagProblem::KeyRole));
        assert_eq!(key_shape("name"), None);

        assert_eq!(key_chars("a=b"), Some(TagProblem::KeyBadChars));
        assert_eq!(key_chars("a\\b"), Some(TagProblem::KeyBadChars));
        assert_eq!(key_chars("name:de"), None);
        assert_eq!(key_chars("addr_street2"), None);
        assert_eq!(key_chars("name de"), Some(TagProblem::KeyUnusualChars));
        assert_eq!(key_chars("straße"), Some(TagProblem::KeyUnusualChars));
        assert_eq!(key_chars(""), None);
    }

    #[test]
    fn value_checks() {
        assert_eq!(value_shape(""), Some(TagProblem::ValueEmpty));
        assert_eq!(value_shape(" x"), Some(TagProblem::ValueWhitespace));
        assert_eq!(value_shape("x\t"), Some(TagProblem::ValueWhitespace));
        assert_eq!(value_shape("a b"), None);
    }

    fn point(id: u64, tags: &[(&str, &str)], secs: i64) -> Entity {
        Entity::Point(Point {
            id,
            location: Location::new(0, 0),
            tags: tags.iter().copied().collect(),
            timestamp: Timestamp::from_secs(secs),
        })
    }

    #[test]
    fn counts_per_tag_writes_once() {
        let entities = vec![
            point(1, &[("a", "x"), ("b", "y"), ("name", " padded")], 0),
            point(2, &[("type", "boundary"), ("natural", "coastline")], 0),
            point(3, &[("x", "late")], 100),
            Entity::Path(Path {
                id: 4,
                nodes: vec![1, 2],
                locations: Vec::new(),
                tags: [("type", "multipolygon")].into_iter().collect(),
                timestamp: Timestamp::from_secs(0),
            }),
            Entity::Container(Container {
                id: 5,
                members: Vec::new(),
                tags: [("type", "multipolygon"), ("boundary", "administrative"), ("natural", "coastline")]
                    .into_iter()
                    .collect(),
                timestamp: Timestamp::from_secs(0),
            }),
        ];
        let source = VecSource::new(entities);
        let mut sink = MemorySink::new();
        let (stats, max) = scan(&source, &mut sink, Timestamp::from_secs(50), 1_000).unwrap();

        assert_eq!(sink.ids("nwr_key_short"), vec![(EntityKind::Point, 1)]);
        assert_eq!(stats.get("nwr_key_short"), Some(2));
        assert_eq!(stats.get("nwr_value_whitespace"), Some(1));
        assert_eq!(stats.get("nodes"), Some(2));
        assert_eq!(stats.get("n_tag_type_boundary"), Some(1));
        assert_eq!(stats.get("n_tag_natural_coastline"), Some(1));
        assert_eq!(stats.get("w_tag_type_multipolygon"), Some(1));
        assert_eq!(stats.get("r_tag_natural_coastline"), Some(1));
        assert_eq!(stats.get("r_tag_boundary_multipolygon"), Some(1));
        assert_eq!(
            sink.ids(NR_TAG_NATURAL_COASTLINE),
            vec![(EntityKind::Point, 2), (EntityKind::Container, 5)]
        );
        assert_eq!(sink.ids(NW_TAG_TYPE_MULTIPOLYGON), vec![(EntityKind::Path, 4)]);
        assert_eq!(max, Timestamp::from_secs(100));
    }

    #[test]
    fn stats_start_at_zero_in_report_order() {
        let checker = UnusualTags::new();
        let names: Vec<&str> = checker.stats().iter().map(|(n, _)| n).collect();
        assert_eq!(names.len(), 18);
        assert_eq!(names[0], "nodes");
        assert_eq!(names[17], "r_tag_boundary_multipolygon");
        assert!(checker.stats().iter().all(|(_, v)| v == 0));
    }
}
