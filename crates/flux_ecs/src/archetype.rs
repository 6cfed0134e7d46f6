use crate::column::{Column, ErasedColumn};
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::entity::Entity;
use crate::tick::Tick;
use bitvec::vec::BitVec;
use std::hash::Hash;
use std::ops;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComponentSet {
    bits: BitVec,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self {
            bits: BitVec::new(),
        }
    }

    pub fn insert(&mut self, id: ComponentId) {
        let index = id as usize;
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits.set(index, true);
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        let index = id as usize;
        index < self.bits.len() && self.bits[index]
    }

    pub fn union(&self, other: &Self) -> Self {
        let max_len = self.bits.len().max(other.bits.len());
        let mut new_bits = self.bits.clone();
        new_bits.resize(max_len, false);
        for index in other.bits.iter_ones() {
            new_bits.set(index, true);
        }

        Self { bits: new_bits }
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.bits
            .iter_ones()
            .all(|index| index < other.bits.len() && other.bits[index])
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        !self
            .bits
            .iter_ones()
            .any(|index| index < other.bits.len() && other.bits[index])
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.bits.iter_ones().map(|index| index as ComponentId)
    }
}

impl ops::BitOr for ComponentSet {
    type Output = Self;

    fn bitor(self, other: Self) -> Self::Output {
        self.union(&other)
    }
}

impl FromIterator<ComponentId> for ComponentSet {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl Hash for ComponentSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for index in self.bits.iter_ones() {
            index.hash(state);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The archetype of entities without components. Always exists.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or_else(|_| panic!("archetype id {index} overflows u32")))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Every entity with exactly this set of component types.
///
/// `columns[i]` stores the component `signature[i]`, and row `r` of every
/// column belongs to `entities[r]`.
pub struct Archetype {
    id: ArchetypeId,
    signature: Box<[ComponentId]>,
    component_set: ComponentSet,
    columns: Vec<Box<dyn ErasedColumn>>,
    entities: Vec<Entity>,
}

impl Archetype {
    pub(crate) fn new(id: ArchetypeId, signature: Box<[ComponentId]>, registry: &ComponentRegistry) -> Self {
        debug_assert!(signature.windows(2).all(|pair| pair[0] < pair[1]), "unsorted signature");
        let component_set = signature.iter().copied().collect();
        let columns = signature
            .iter()
            .map(|&component| registry.info(component).new_column())
            .collect();

        Self {
            id,
            signature,
            component_set,
            columns,
            entities: Vec::new(),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn signature(&self) -> &[ComponentId] {
        &self.signature
    }

    pub fn component_set(&self) -> &ComponentSet {
        &self.component_set
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, component: ComponentId) -> bool {
        self.component_set.contains(component)
    }

    pub(crate) fn column_index(&self, component: ComponentId) -> Option<usize> {
        self.signature.binary_search(&component).ok()
    }

    pub(crate) fn column(&self, component: ComponentId) -> Option<&dyn ErasedColumn> {
        self.column_index(component)
            .map(|index| self.columns[index].as_ref())
    }

    pub(crate) fn column_mut(&mut self, component: ComponentId) -> Option<&mut dyn ErasedColumn> {
        let index = self.column_index(component)?;
        Some(self.columns[index].as_mut())
    }

    pub(crate) fn column_at_mut(&mut self, index: usize) -> &mut dyn ErasedColumn {
        self.columns[index].as_mut()
    }

    pub(crate) fn typed_column<T: Component>(&self, component: ComponentId) -> Option<&Column<T>> {
        self.column(component)?.as_any().downcast_ref()
    }

    pub(crate) fn typed_column_mut<T: Component>(&mut self, component: ComponentId) -> Option<&mut Column<T>> {
        self.column_mut(component)?.as_any_mut().downcast_mut()
    }

    /// Resolves a typed column through a raw archetype pointer so several
    /// query terms can hold pointers into different columns at once.
    ///
    /// # Safety
    /// `this` must point to a live archetype and no other reference to the
    /// returned column may be alive while the result is used.
    pub(crate) unsafe fn column_ptr<T: Component>(this: *mut Archetype, component: ComponentId) -> Option<*mut Column<T>> {
        let index = unsafe { (*this).column_index(component)? };
        let slot = unsafe { (*this).columns.as_mut_ptr().add(index) };
        let column: &mut dyn ErasedColumn = unsafe { (*slot).as_mut() };
        column
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .map(|column| column as *mut Column<T>)
    }

    pub(crate) fn push_entity(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Removes `row` from every column, dropping the values. Returns the entity
    /// that was moved into `row`, if any.
    pub(crate) fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        self.remove_entity_row(row)
    }

    /// Removes `row` from the entity list only; the columns must already have
    /// dropped or exported it.
    pub(crate) fn remove_entity_row(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    pub(crate) fn check_changed(&mut self, component: ComponentId, tick: Tick) -> usize {
        match self.column_mut(component) {
            Some(column) => column.check_changed(tick),
            None => 0,
        }
    }

    pub fn last_added(&self, component: ComponentId) -> Tick {
        self.column(component)
            .map_or(Tick::NONE, |column| column.last_added())
    }

    pub fn last_changed(&self, component: ComponentId) -> Tick {
        self.column(component)
            .map_or(Tick::NONE, |column| column.last_changed())
    }

    pub fn row_ticks(&self, component: ComponentId, row: usize) -> Option<(Tick, Tick)> {
        let column = self.column(component)?;
        (row < column.len()).then(|| (column.row_added(row), column.row_changed(row)))
    }

    pub(crate) fn rebase_ticks(&mut self, offset: u32) {
        for column in &mut self.columns {
            column.rebase_ticks(offset);
        }
    }

    /// Every column has one row per entity.
    pub fn is_consistent(&self) -> bool {
        self.columns.iter().all(|column| column.len() == self.entities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[derive(Component, Debug, PartialEq)]
    struct A(u32);

    #[derive(Component, Debug, PartialEq)]
    struct B(u32);

    fn archetype_with_a_and_b() -> (Archetype, ComponentId, ComponentId) {
        let mut registry = ComponentRegistry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();
        let archetype = Archetype::new(ArchetypeId::new(1), vec![a, b].into(), &registry);
        (archetype, a, b)
    }

    #[test]
    fn component_set_operations() {
        let left: ComponentSet = [1, 3].into_iter().collect();
        let right: ComponentSet = [3, 7].into_iter().collect();
        let both = left.clone() | right.clone();

        assert!(both.contains(1) && both.contains(3) && both.contains(7));
        assert!(left.is_subset(&both));
        assert!(!both.is_subset(&left));
        assert!(!left.is_disjoint(&right));
        assert!(left.is_disjoint(&[2, 9].into_iter().collect()));
        assert_eq!(both.ids().collect::<Vec<_>>(), vec![1, 3, 7]);
    }

    #[test]
    fn component_set_equality_ignores_trailing_capacity() {
        let mut grown = ComponentSet::new();
        grown.insert(2);
        let small: ComponentSet = [2].into_iter().collect();
        assert!(grown.is_subset(&small) && small.is_subset(&grown));
    }

    #[test]
    fn swap_remove_reports_moved_entity() {
        let (mut archetype, a, b) = archetype_with_a_and_b();
        for index in 0..3 {
            let row = archetype.push_entity(Entity::from_index(index));
            archetype.typed_column_mut::<A>(a).unwrap().append(Tick::new(1), A(index));
            archetype.typed_column_mut::<B>(b).unwrap().append(Tick::new(1), B(index * 10));
            assert_eq!(row, index as usize);
        }

        let moved = archetype.swap_remove(0);

        assert_eq!(moved, Some(Entity::from_index(2)));
        assert!(archetype.is_consistent());
        assert_eq!(archetype.typed_column::<A>(a).unwrap().get(0), Some(&A(2)));
        assert_eq!(archetype.typed_column::<B>(b).unwrap().get(0), Some(&B(20)));
        assert_eq!(archetype.swap_remove(1), None);
    }

    #[test]
    fn columns_follow_signature_order() {
        let (archetype, a, b) = archetype_with_a_and_b();
        assert_eq!(archetype.column_index(a), Some(0));
        assert_eq!(archetype.column_index(b), Some(1));
        assert!(archetype.typed_column::<B>(a).is_none());
    }
}
