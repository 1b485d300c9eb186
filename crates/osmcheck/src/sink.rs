//! Where anomalies and statistics go.

use crate::entity::{Entity, EntityKind};
use crate::error::Result;
use crate::geometry::Geometry;
use crate::timestamp::Timestamp;
use std::collections::BTreeMap;

/// One row of a category's geometry table.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    pub geometry: Geometry,
    /// Container that caused the entity to be reported, if any.
    pub owner_id: Option<u64>,
    pub kind: EntityKind,
    pub entity_id: u64,
    pub timestamp: Timestamp,
    pub marked: bool,
}

/// Per-category result collections. Opened before the first pass and
/// closed by the owner after the last one.
pub trait AnomalySink {
    fn write(&mut self, category: &str, entity: &Entity) -> Result<()>;

    fn write_geometry(&mut self, category: &str, record: &GeometryRecord) -> Result<()>;
}

impl<T: AnomalySink + ?Sized> AnomalySink for &mut T {
    fn write(&mut self, category: &str, entity: &Entity) -> Result<()> {
        (**self).write(category, entity)
    }

    fn write_geometry(&mut self, category: &str, record: &GeometryRecord) -> Result<()> {
        (**self).write_geometry(category, record)
    }
}

/// Keeps everything in memory, keyed by category.
#[derive(Debug, Default)]
pub struct MemorySink {
    entities: BTreeMap<String, Vec<Entity>>,
    geometries: BTreeMap<String, Vec<GeometryRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities(&self, category: &str) -> &[Entity] {
        self.entities.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn geometries(&self, category: &str) -> &[GeometryRecord] {
        self.geometries
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `(kind, id)` of every entity written to `category`, in write order.
    pub fn ids(&self, category: &str) -> Vec<(EntityKind, u64)> {
        self.entities(category)
            .iter()
            .map(|e| (e.kind(), e.id()))
            .collect()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

impl AnomalySink for MemorySink {
    fn write(&mut self, category: &str, entity: &Entity) -> Result<()> {
        self.entities
            .entry(category.to_owned())
            .or_default()
            .push(entity.clone());
        Ok(())
    }

    fn write_geometry(&mut self, category: &str, record: &GeometryRecord) -> Result<()> {
        self.geometries
            .entry(category.to_owned())
            .or_default()
            .push(record.clone());
        Ok(())
    }
}

/// Receives `(name, value)` pairs. The timestamp every pair is filed under
/// is fixed when the sink is opened.
pub trait StatsSink {
    fn add(&mut self, name: &str, value: u64) -> Result<()>;
}

/// Named counters in first-touched order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    counters: Vec<(String, u64)>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, name: &str) -> &mut u64 {
        let pos = match self.counters.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.counters.push((name.to_owned(), 0));
                self.counters.len() - 1
            }
        };
        &mut self.counters[pos].1
    }

    pub fn set(&mut self, name: &str, value: u64) {
        *self.slot(name) = value;
    }

    pub fn add(&mut self, name: &str, value: u64) {
        *self.slot(name) += value;
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find_map(|(n, v)| if n == name { Some(*v) } else { None })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Sends every counter to `sink`, in order.
    pub fn write_to(&self, sink: &mut dyn StatsSink) -> Result<()> {
        for (name, value) in self.iter() {
            sink.add(name, value)?;
        }
        Ok(())
    }
}

impl StatsSink for Stats {
    fn add(&mut self, name: &str, value: u64) -> Result<()> {
        Stats::add(self, name, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_keep_first_touched_order() {
        let mut stats = Stats::new();
        stats.set("b", 2);
        stats.add("a", 1);
        stats.add("b", 3);

        assert_eq!(stats.iter().collect::<Vec<_>>(), vec![("b", 5), ("a", 1)]);
        assert_eq!(stats.get("c"), None);

        let mut copy = Stats::new();
        stats.write_to(&mut copy).unwrap();
        assert_eq!(copy, stats);
    }
}
