//! Reverse membership index: which owners reference a given member.
//!
//! Entries are appended unsorted while containers stream past, then sorted by
//! member id once. Lookups are an equal-range over the sorted array, so the
//! index costs 24 bytes per reference and no hash table sized to the input.
//!
//! The two states are two types. [`OwnerIndexBuilder`] only appends;
//! [`OwnerIndexBuilder::prepare`] consumes it and yields an [`OwnerIndex`],
//! which only answers queries:
//!
//! ```compile_fail
//! let mut builder = osmcheck::OwnerIndexBuilder::new();
//! builder.insert(7, 1);
//! builder.query(7);
//! ```
//!
//! ```
//! let mut builder = osmcheck::OwnerIndexBuilder::new();
//! builder.insert(7, 1);
//! builder.insert(7, 2);
//! builder.mark(2, [7]);
//!
//! let index = builder.prepare();
//! let owners: Vec<_> = index.query(7).iter().map(|e| (e.owner_id, e.marked)).collect();
//! assert_eq!(owners, vec![(1, false), (2, true)]);
//! ```
//!
//! A member listed twice by the same owner yields two entries. Counters
//! downstream count references, not distinct owners.

use crate::entity::{ByKind, Container, EntityKind};
use hashbrown::HashMap;
use nohash_hasher::BuildNoHashHasher;

type MarkMap = HashMap<u64, Vec<u64>, BuildNoHashHasher<u64>>;

/// One `(member, owner)` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerEntry {
    pub member_id: u64,
    pub owner_id: u64,
    /// The owner marked this member (e.g. "this is the duplicated way").
    pub marked: bool,
}

/// Append-only half of the index.
#[derive(Debug, Default)]
pub struct OwnerIndexBuilder {
    entries: Vec<OwnerEntry>,
    marks: MarkMap,
}

impl OwnerIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn insert(&mut self, member_id: u64, owner_id: u64) {
        self.entries.push(OwnerEntry {
            member_id,
            owner_id,
            marked: false,
        });
    }

    pub fn insert_all(&mut self, owner_id: u64, members: impl IntoIterator<Item = u64>) {
        for member_id in members {
            self.insert(member_id, owner_id);
        }
    }

    /// Marks some of `owner_id`'s members. Every entry of that owner for one
    /// of these members comes out of [`prepare`](Self::prepare) marked.
    /// An empty list records nothing.
    pub fn mark(&mut self, owner_id: u64, members: impl IntoIterator<Item = u64>) {
        let mut members = members.into_iter().peekable();
        if members.peek().is_none() {
            return;
        }
        self.marks.entry(owner_id).or_default().extend(members);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owners that have at least one mark.
    pub fn marked_owners(&self) -> usize {
        self.marks.len()
    }

    /// Sorts the entries by member and resolves marks.
    pub fn prepare(self) -> OwnerIndex {
        let OwnerIndexBuilder {
            mut entries,
            mut marks,
        } = self;

        for members in marks.values_mut() {
            members.sort_unstable();
            members.dedup();
        }

        entries.sort_unstable_by_key(|e| (e.member_id, e.owner_id));

        if !marks.is_empty() {
            for entry in &mut entries {
                entry.marked = marks
                    .get(&entry.owner_id)
                    .map(|members| members.binary_search(&entry.member_id).is_ok())
                    .unwrap_or(false);
            }
        }

        entries.shrink_to_fit();
        OwnerIndex { entries }
    }
}

/// Read-only half of the index, sorted by `(member_id, owner_id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerIndex {
    entries: Vec<OwnerEntry>,
}

impl OwnerIndex {
    /// All entries for `member_id`; empty when it was never inserted.
    pub fn query(&self, member_id: u64) -> &[OwnerEntry] {
        let start = self.entries.partition_point(|e| e.member_id < member_id);
        let len = self.entries[start..].partition_point(|e| e.member_id == member_id);
        &self.entries[start..start + len]
    }

    #[inline]
    pub fn contains(&self, member_id: u64) -> bool {
        !self.query(member_id).is_empty()
    }

    /// Distinct members with at least one marked entry, ascending.
    pub fn marked_members(&self) -> impl Iterator<Item = u64> + '_ {
        let mut last = None;
        self.entries.iter().filter(|e| e.marked).filter_map(move |e| {
            if last == Some(e.member_id) {
                None
            } else {
                last = Some(e.member_id);
                Some(e.member_id)
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[OwnerEntry] {
        &self.entries
    }
}

/// Members of flagged containers for one output category, one index per
/// member kind.
#[derive(Debug)]
pub struct MemberCollector {
    category: String,
    builders: ByKind<OwnerIndexBuilder>,
}

impl MemberCollector {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            builders: ByKind::from_fn(|_| OwnerIndexBuilder::new()),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Indexes every member of `container` (repeats included).
    pub fn add_members(&mut self, container: &Container) {
        for member in &container.members {
            self.builders[member.kind].insert(member.id, container.id);
        }
    }

    /// Indexes only the members of one kind.
    pub fn add_members_of_kind(&mut self, container: &Container, kind: EntityKind) {
        let ids = container
            .members
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.id);
        self.builders[kind].insert_all(container.id, ids);
    }

    pub fn mark(&mut self, kind: EntityKind, owner_id: u64, members: impl IntoIterator<Item = u64>) {
        self.builders[kind].mark(owner_id, members);
    }

    pub fn len(&self) -> usize {
        self.builders.iter().map(|(_, b)| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prepare(self) -> MemberLookup {
        MemberLookup {
            category: self.category,
            indexes: self.builders.map(|_, builder| builder.prepare()),
        }
    }
}

/// Prepared form of a [`MemberCollector`].
#[derive(Debug)]
pub struct MemberLookup {
    category: String,
    indexes: ByKind<OwnerIndex>,
}

impl MemberLookup {
    pub fn category(&self) -> &str {
        &self.category
    }

    #[inline]
    pub fn query(&self, kind: EntityKind, member_id: u64) -> &[OwnerEntry] {
        self.indexes[kind].query(member_id)
    }

    pub fn index(&self, kind: EntityKind) -> &OwnerIndex {
        &self.indexes[kind]
    }

    pub fn len(&self) -> usize {
        self.indexes.iter().map(|(_, i)| i.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Member, TagList};
    use crate::timestamp::Timestamp;

    fn owners(index: &OwnerIndex, member: u64) -> Vec<(u64, bool)> {
        index
            .query(member)
            .iter()
            .map(|e| (e.owner_id, e.marked))
            .collect()
    }

    #[test]
    fn query_returns_equal_range() {
        let mut builder = OwnerIndexBuilder::new();
        builder.insert_all(10, [3, 1, 2]);
        builder.insert_all(20, [2, 5]);
        let index = builder.prepare();

        assert_eq!(index.len(), 5);
        assert_eq!(owners(&index, 2), vec![(10, false), (20, false)]);
        assert_eq!(owners(&index, 5), vec![(20, false)]);
        assert!(index.query(4).is_empty());
        assert!(index.query(0).is_empty());
        assert!(index.query(u64::MAX).is_empty());
    }

    #[test]
    fn marks_apply_per_owner() {
        let mut builder = OwnerIndexBuilder::new();
        builder.insert_all(1, [7, 8]);
        builder.insert_all(2, [7]);
        builder.mark(1, [7]);
        builder.mark(2, std::iter::empty());
        assert_eq!(builder.marked_owners(), 1);

        let index = builder.prepare();
        assert_eq!(owners(&index, 7), vec![(1, true), (2, false)]);
        assert_eq!(owners(&index, 8), vec![(1, false)]);
        assert_eq!(index.marked_members().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn repeated_member_keeps_multiplicity() {
        let container = Container {
            id: 99,
            members: vec![
                Member::new(EntityKind::Path, 4, "outer"),
                Member::new(EntityKind::Path, 4, "outer"),
                Member::new(EntityKind::Point, 4, ""),
            ],
            tags: TagList::new(),
            timestamp: Timestamp::default(),
        };

        let mut collector = MemberCollector::new("dupes");
        collector.add_members(&container);
        collector.mark(EntityKind::Path, 99, [4]);
        assert_eq!(collector.len(), 3);

        let lookup = collector.prepare();
        assert_eq!(lookup.category(), "dupes");
        let paths = lookup.query(EntityKind::Path, 4);
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|e| e.owner_id == 99 && e.marked));

        let points = lookup.query(EntityKind::Point, 4);
        assert_eq!(points.len(), 1);
        assert!(!points[0].marked);
        assert!(lookup.query(EntityKind::Container, 4).is_empty());
    }

    #[test]
    fn members_of_one_kind() {
        let container = Container {
            id: 5,
            members: vec![
                Member::new(EntityKind::Point, 1, ""),
                Member::new(EntityKind::Path, 2, "outer"),
                Member::new(EntityKind::Path, 3, "inner"),
            ],
            tags: TagList::new(),
            timestamp: Timestamp::default(),
        };

        let mut collector = MemberCollector::new("ways");
        collector.add_members_of_kind(&container, EntityKind::Path);
        let lookup = collector.prepare();
        assert_eq!(lookup.len(), 2);
        assert!(lookup.query(EntityKind::Point, 1).is_empty());
        assert_eq!(lookup.index(EntityKind::Path).query(3)[0].owner_id, 5);
    }
}
