use crate::archetype::ArchetypeId;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

/// An opaque entity id. Ids come from a monotonically increasing sequence and
/// are never handed out twice.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    index: u32,
}

impl Entity {
    pub(crate) const fn from_index(index: u32) -> Self {
        Self { index }
    }

    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.index)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype_id: ArchetypeId,
    pub row: usize,
}

/// Id sequence and location index for every live entity.
///
/// The sequence sits in a [`Cell`] so deferred commands can reserve ids
/// through a shared borrow while a system runs.
pub(crate) struct Entities {
    next_index: Cell<u32>,
    locations: HashMap<Entity, EntityLocation>,
}

impl Entities {
    pub fn new() -> Self {
        Self {
            next_index: Cell::new(0),
            locations: HashMap::new(),
        }
    }

    /// Hands out the next id without placing it anywhere.
    pub fn reserve(&self) -> Entity {
        let index = self.next_index.get();
        assert!(index != u32::MAX, "entity id space exhausted");
        self.next_index.set(index + 1);
        Entity::from_index(index)
    }

    pub fn get(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.get(&entity).copied()
    }

    pub fn set(&mut self, entity: Entity, location: EntityLocation) {
        self.locations.insert(entity, location);
    }

    pub fn free(&mut self, entity: Entity) -> Option<EntityLocation> {
        self.locations.remove(&entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.locations.contains_key(&entity)
    }

    /// Reserved by a command but not yet spawned.
    pub fn is_pending(&self, entity: Entity) -> bool {
        entity.index < self.next_index.get() && !self.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, EntityLocation)> + '_ {
        self.locations.iter().map(|(entity, location)| (*entity, *location))
    }
}
