//! Sorted id arrays with a build/query split.

/// Collects ids in any order, duplicates allowed.
#[derive(Debug, Clone, Default)]
pub struct IdSetBuilder {
    ids: Vec<u64>,
}

impl IdSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn insert(&mut self, id: u64) {
        self.ids.push(id);
    }

    /// Ids inserted so far, counting repeats.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sorts and deduplicates; the result is read-only.
    pub fn seal(mut self) -> IdSet {
        self.ids.sort_unstable();
        self.ids.dedup();
        self.ids.shrink_to_fit();
        IdSet { ids: self.ids }
    }
}

impl Extend<u64> for IdSetBuilder {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

/// Sorted, unique ids; membership by binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet {
    ids: Vec<u64>,
}

impl IdSet {
    #[inline]
    pub fn contains(&self, id: u64) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<u64> for IdSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut builder = IdSetBuilder::new();
        builder.extend(iter);
        builder.seal()
    }
}
