//! Typed map entities.
//!
//! Ids are scoped by kind: point 5 and path 5 are unrelated. Every lookup
//! that involves an id therefore also takes an [`EntityKind`].

use crate::location::Location;
use crate::timestamp::Timestamp;
use serde::Serialize;
use std::ops::{BitOr, Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Point = 0,
    Path = 1,
    Container = 2,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Point, EntityKind::Path, EntityKind::Container];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Point => "point",
            EntityKind::Path => "path",
            EntityKind::Container => "container",
        }
    }
}

/// A subset of entity kinds, used to restrict a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSet(u8);

impl KindSet {
    pub const NONE: KindSet = KindSet(0);
    pub const POINTS: KindSet = KindSet(1 << 0);
    pub const PATHS: KindSet = KindSet(1 << 1);
    pub const CONTAINERS: KindSet = KindSet(1 << 2);
    pub const ALL: KindSet = KindSet(0b111);

    #[inline]
    pub const fn contains(self, kind: EntityKind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }
}

impl BitOr for KindSet {
    type Output = KindSet;

    fn bitor(self, rhs: KindSet) -> KindSet {
        KindSet(self.0 | rhs.0)
    }
}

impl From<EntityKind> for KindSet {
    fn from(kind: EntityKind) -> Self {
        KindSet(1 << kind as u8)
    }
}

/// One value per entity kind, indexed by [`EntityKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByKind<T>([T; 3]);

impl<T> ByKind<T> {
    pub fn new(point: T, path: T, container: T) -> Self {
        Self([point, path, container])
    }

    pub fn from_fn(mut f: impl FnMut(EntityKind) -> T) -> Self {
        Self(EntityKind::ALL.map(&mut f))
    }

    pub fn map<U>(self, mut f: impl FnMut(EntityKind, T) -> U) -> ByKind<U> {
        let [point, path, container] = self.0;
        ByKind([
            f(EntityKind::Point, point),
            f(EntityKind::Path, path),
            f(EntityKind::Container, container),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &T)> {
        EntityKind::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<EntityKind> for ByKind<T> {
    type Output = T;

    #[inline]
    fn index(&self, kind: EntityKind) -> &T {
        &self.0[kind.index()]
    }
}

impl<T> IndexMut<EntityKind> for ByKind<T> {
    #[inline]
    fn index_mut(&mut self, kind: EntityKind) -> &mut T {
        &mut self.0[kind.index()]
    }
}

/// Key/value tags in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagList(Vec<(String, String)>);

impl TagList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Value of the first tag with this key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find_map(|(k, v)| if k == key { Some(v.as_str()) } else { None })
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + Clone {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub id: u64,
    pub location: Location,
    pub tags: TagList,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    pub id: u64,
    /// Referenced point ids in order; may repeat.
    pub nodes: Vec<u64>,
    /// Point locations parallel to `nodes`, when the input carries them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    pub tags: TagList,
    pub timestamp: Timestamp,
}

impl Path {
    /// First and last node are the same (and there is more than one).
    pub fn is_closed(&self) -> bool {
        self.nodes.len() > 1 && self.nodes.first() == self.nodes.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub kind: EntityKind,
    pub id: u64,
    pub role: String,
}

impl Member {
    pub fn new(kind: EntityKind, id: u64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Container {
    pub id: u64,
    pub members: Vec<Member>,
    pub tags: TagList,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entity {
    Point(Point),
    Path(Path),
    Container(Container),
}

impl Entity {
    #[inline]
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Point(_) => EntityKind::Point,
            Entity::Path(_) => EntityKind::Path,
            Entity::Container(_) => EntityKind::Container,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        match self {
            Entity::Point(p) => p.id,
            Entity::Path(p) => p.id,
            Entity::Container(c) => c.id,
        }
    }

    pub fn tags(&self) -> &TagList {
        match self {
            Entity::Point(p) => &p.tags,
            Entity::Path(p) => &p.tags,
            Entity::Container(c) => &c.tags,
        }
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Entity::Point(p) => p.timestamp,
            Entity::Path(p) => p.timestamp,
            Entity::Container(c) => c.timestamp,
        }
    }
}
