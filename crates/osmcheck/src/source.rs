use crate::entity::{Entity, KindSet};
use crate::error::Result;
use crate::timestamp::Timestamp;

/// Restriction applied by a source before entities reach the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub kinds: KindSet,
    /// Only entities last modified strictly before this time.
    pub before: Timestamp,
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl Filter {
    /// Every entity of every kind.
    pub const fn all() -> Self {
        Self {
            kinds: KindSet::ALL,
            before: Timestamp::MAX,
        }
    }

    pub const fn kinds(kinds: KindSet) -> Self {
        Self {
            kinds,
            before: Timestamp::MAX,
        }
    }

    pub const fn before(self, before: Timestamp) -> Self {
        Self {
            kinds: self.kinds,
            before,
        }
    }

    #[inline]
    pub fn accepts(&self, entity: &Entity) -> bool {
        self.kinds.contains(entity.kind()) && entity.timestamp() < self.before
    }
}

/// A finite entity stream that can be read from the start any number of
/// times. Each call is one full pass; entities arrive in file order
/// (points, then paths, then containers, for sorted input).
pub trait EntitySource {
    fn for_each_entity(
        &self,
        filter: &Filter,
        f: &mut dyn FnMut(Entity) -> Result<()>,
    ) -> Result<()>;
}

impl<S: EntitySource + ?Sized> EntitySource for &S {
    fn for_each_entity(
        &self,
        filter: &Filter,
        f: &mut dyn FnMut(Entity) -> Result<()>,
    ) -> Result<()> {
        (**self).for_each_entity(filter, f)
    }
}

/// In-memory source.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    entities: Vec<Entity>,
}

impl VecSource {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }
}

impl FromIterator<Entity> for VecSource {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl EntitySource for VecSource {
    fn for_each_entity(
        &self,
        filter: &Filter,
        f: &mut dyn FnMut(Entity) -> Result<()>,
    ) -> Result<()> {
        for entity in self.entities.iter().filter(|e| filter.accepts(e)) {
            f(entity.clone())?;
        }
        Ok(())
    }
}
