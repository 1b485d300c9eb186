use anyhow::{Context, Result};
use osmcheck::{
    Container, Entity, EntityKind, EntitySource, Error, Filter, Location, Member, Path, Point,
    TagList, Timestamp,
};
use osmpbf::{BlobDecode, BlobReader, Element, RelMemberType};
use std::path::{Path as FsPath, PathBuf};

const LOCATIONS_ON_WAYS: &str = "LocationsOnWays";

/// Reads entities from an OSM PBF file. Every pass reopens the file.
#[derive(Debug, Clone)]
pub struct PbfSource {
    path: PathBuf,
    locations_on_ways: bool,
}

impl PbfSource {
    /// Opens `path` and reads its header block.
    pub fn open(path: &FsPath) -> Result<Self> {
        let reader = BlobReader::from_path(path)
            .with_context(|| format!("can't open '{}'", path.display()))?;

        let mut locations_on_ways = false;
        for blob in reader {
            let blob = blob.with_context(|| format!("can't read '{}'", path.display()))?;
            if let BlobDecode::OsmHeader(header) = blob.decode()? {
                locations_on_ways = header
                    .required_features()
                    .iter()
                    .chain(header.optional_features())
                    .any(|f| f == LOCATIONS_ON_WAYS);
                break;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            locations_on_ways,
        })
    }

    pub fn path(&self) -> &FsPath {
        &self.path
    }

    /// Ways carry their node locations (`osmium add-locations-to-ways`).
    pub fn has_locations_on_ways(&self) -> bool {
        self.locations_on_ways
    }
}

#[inline]
fn seconds(milli: i64) -> Timestamp {
    Timestamp::from_secs(milli.div_euclid(1000))
}

fn member_kind(kind: RelMemberType) -> EntityKind {
    match kind {
        RelMemberType::Node => EntityKind::Point,
        RelMemberType::Way => EntityKind::Path,
        RelMemberType::Relation => EntityKind::Container,
    }
}

/// Converts one element, or returns `None` when the filter rejects it.
fn convert(element: Element<'_>, filter: &Filter, with_locations: bool) -> Option<Entity> {
    let kinds = filter.kinds;

    let entity = match element {
        Element::Node(node) => {
            if !kinds.contains(EntityKind::Point) {
                return None;
            }
            Entity::Point(Point {
                id: node.id().unsigned_abs(),
                location: Location::new(node.decimicro_lon(), node.decimicro_lat()),
                tags: node.tags().collect(),
                timestamp: seconds(node.info().milli_timestamp().unwrap_or(0)),
            })
        }
        Element::DenseNode(node) => {
            if !kinds.contains(EntityKind::Point) {
                return None;
            }
            Entity::Point(Point {
                id: node.id().unsigned_abs(),
                location: Location::new(node.decimicro_lon(), node.decimicro_lat()),
                tags: node.tags().collect(),
                timestamp: seconds(node.info().map(|i| i.milli_timestamp()).unwrap_or(0)),
            })
        }
        Element::Way(way) => {
            if !kinds.contains(EntityKind::Path) {
                return None;
            }
            let locations = if with_locations {
                way.node_locations()
                    .map(|l| Location::new(l.decimicro_lon(), l.decimicro_lat()))
                    .collect()
            } else {
                Vec::new()
            };
            Entity::Path(Path {
                id: way.id().unsigned_abs(),
                nodes: way.refs().map(i64::unsigned_abs).collect(),
                locations,
                tags: way.tags().collect(),
                timestamp: seconds(way.info().milli_timestamp().unwrap_or(0)),
            })
        }
        Element::Relation(rel) => {
            if !kinds.contains(EntityKind::Container) {
                return None;
            }
            let members = rel
                .members()
                .map(|m| Member {
                    kind: member_kind(m.member_type.clone()),
                    id: m.member_id.unsigned_abs(),
                    role: m.role().unwrap_or_default().to_owned(),
                })
                .collect();
            Entity::Container(Container {
                id: rel.id().unsigned_abs(),
                members,
                tags: rel.tags().collect::<TagList>(),
                timestamp: seconds(rel.info().milli_timestamp().unwrap_or(0)),
            })
        }
    };

    filter.accepts(&entity).then_some(entity)
}

impl EntitySource for PbfSource {
    fn for_each_entity(
        &self,
        filter: &Filter,
        f: &mut dyn FnMut(Entity) -> osmcheck::Result<()>,
    ) -> osmcheck::Result<()> {
        let reader = BlobReader::from_path(&self.path).map_err(Error::source_failed)?;

        for blob in reader {
            let blob = blob.map_err(Error::source_failed)?;
            let block = match blob.decode().map_err(Error::source_failed)? {
                BlobDecode::OsmData(block) => block,
                _ => continue,
            };

            for element in block.elements() {
                if let Some(entity) = convert(element, filter, self.locations_on_ways) {
                    f(entity)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_down_to_seconds() {
        assert_eq!(seconds(1_500), Timestamp::from_secs(1));
        assert_eq!(seconds(-1), Timestamp::from_secs(-1));
    }

    #[test]
    fn member_types_map_to_kinds() {
        assert_eq!(member_kind(RelMemberType::Node), EntityKind::Point);
        assert_eq!(member_kind(RelMemberType::Way), EntityKind::Path);
        assert_eq!(member_kind(RelMemberType::Relation), EntityKind::Container);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PbfSource::open(&dir.path().join("missing.osm.pbf")).is_err());
    }
}
