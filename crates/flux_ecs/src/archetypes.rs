use crate::archetype::{Archetype, ArchetypeId};
use crate::archetype_graph::{signature_with, signature_without, ArchetypeGraph, ArchetypeSignature};
use crate::component::{ComponentId, ComponentRegistry};
use crate::entity::Entity;

/// Owns every archetype, indexed by [`ArchetypeId`] in creation order.
pub struct Archetypes {
    graph: ArchetypeGraph,
    storage: Vec<Archetype>,
}

impl Archetypes {
    pub(crate) fn new(registry: &ComponentRegistry) -> Self {
        let mut archetypes = Self {
            graph: ArchetypeGraph::default(),
            storage: Vec::new(),
        };
        let empty = archetypes.get_or_create(Box::new([]), registry);
        debug_assert_eq!(empty, ArchetypeId::EMPTY);
        archetypes
    }

    /// Resolves a sorted signature, creating the archetype on first use.
    pub(crate) fn get_or_create(&mut self, signature: ArchetypeSignature, registry: &ComponentRegistry) -> ArchetypeId {
        if let Some(id) = self.graph.get(&signature) {
            return id;
        }

        let id = self.graph.insert(signature.clone());
        log::debug!(
            "created archetype {:?} with [{}]",
            id,
            signature
                .iter()
                .map(|&component| registry.info(component).name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.storage.push(Archetype::new(id, signature, registry));
        id
    }

    /// The archetype reached by adding `component` to `start`.
    pub(crate) fn insert_target(
        &mut self,
        start: ArchetypeId,
        component: ComponentId,
        registry: &ComponentRegistry,
    ) -> ArchetypeId {
        if let Some(id) = self.graph.get_add_edge(start, component) {
            return id;
        }

        let signature = self.signature(start);
        let Some(larger) = signature_with(signature, component) else {
            return start;
        };
        let target = self.get_or_create(larger, registry);
        self.graph.cache_edge(start, component, target);
        target
    }

    /// The archetype reached by removing `component` from `start`, or `None`
    /// if `start` does not have it.
    pub(crate) fn remove_target(
        &mut self,
        start: ArchetypeId,
        component: ComponentId,
        registry: &ComponentRegistry,
    ) -> Option<ArchetypeId> {
        if let Some(id) = self.graph.get_remove_edge(start, component) {
            return Some(id);
        }

        let smaller = signature_without(self.signature(start), component)?;
        let target = self.get_or_create(smaller, registry);
        self.graph.cache_edge(target, component, start);
        Some(target)
    }

    pub(crate) fn bundle_target(
        &mut self,
        start: ArchetypeId,
        components: &[ComponentId],
        registry: &ComponentRegistry,
    ) -> ArchetypeId {
        components
            .iter()
            .fold(start, |current, &component| self.insert_target(current, component, registry))
    }

    fn signature(&self, id: ArchetypeId) -> &[ComponentId] {
        self.graph
            .get_signature(id)
            .unwrap_or_else(|| panic!("archetype {id:?} has no signature"))
    }

    /// Moves the entity in `row` of `source` into `target`, carrying over every
    /// component both archetypes share and dropping the rest. Returns the new
    /// row and the entity that took over the old row in `source`.
    pub(crate) fn move_entity(
        &mut self,
        source_id: ArchetypeId,
        row: usize,
        target_id: ArchetypeId,
    ) -> (usize, Option<Entity>) {
        assert_ne!(source_id, target_id, "moving an entity into its own archetype");
        let (low, high) = self.storage.split_at_mut(source_id.index().max(target_id.index()));
        let (source, target) = if source_id < target_id {
            (&mut low[source_id.index()], &mut high[0])
        } else {
            (&mut high[0], &mut low[target_id.index()])
        };

        let entity = source.entities()[row];
        for index in 0..source.signature().len() {
            let component = source.signature()[index];
            let column = source.column_at_mut(index);
            match target.column_mut(component) {
                Some(destination) => destination.import(column, row),
                None => column.swap_remove(row),
            }
        }

        let moved = source.remove_entity_row(row);
        let new_row = target.push_entity(entity);
        (new_row, moved)
    }

    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.storage.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.storage.get_mut(id.index())
    }

    /// # Safety
    /// `id` must be in range and the caller must respect the aliasing rules
    /// for whatever it reaches through the pointer.
    pub(crate) unsafe fn get_ptr(this: *mut Archetypes, id: ArchetypeId) -> *mut Archetype {
        unsafe {
            debug_assert!(id.index() < (*this).storage.len());
            (*this).storage.as_mut_ptr().add(id.index())
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Archetype> {
        self.storage.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Archetype> {
        self.storage.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::tick::Tick;

    #[derive(Component, Debug, PartialEq)]
    struct A(u32);

    #[derive(Component, Debug, PartialEq)]
    struct B(u32);

    fn setup() -> (Archetypes, ComponentRegistry, ComponentId, ComponentId) {
        let mut registry = ComponentRegistry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();
        (Archetypes::new(&registry), registry, a, b)
    }

    #[test]
    fn transitions_are_idempotent() {
        let (mut archetypes, registry, a, b) = setup();
        let with_a = archetypes.insert_target(ArchetypeId::EMPTY, a, &registry);
        let with_ab = archetypes.insert_target(with_a, b, &registry);
        let with_b = archetypes.insert_target(ArchetypeId::EMPTY, b, &registry);

        assert_eq!(archetypes.insert_target(with_b, a, &registry), with_ab);
        assert_eq!(archetypes.remove_target(with_ab, b, &registry), Some(with_a));
        assert_eq!(archetypes.remove_target(with_a, b, &registry), None);
        assert_eq!(archetypes.insert_target(with_ab, a, &registry), with_ab);
        assert_eq!(archetypes.bundle_target(ArchetypeId::EMPTY, &[b, a], &registry), with_ab);
        assert_eq!(archetypes.len(), 4);
    }

    #[test]
    fn move_carries_shared_columns() {
        let (mut archetypes, registry, a, b) = setup();
        let with_a = archetypes.insert_target(ArchetypeId::EMPTY, a, &registry);
        let with_ab = archetypes.insert_target(with_a, b, &registry);

        let source = archetypes.get_mut(with_a).unwrap();
        for index in 0..2 {
            source.push_entity(Entity::from_index(index));
            source.typed_column_mut::<A>(a).unwrap().append(Tick::new(1), A(index));
        }

        let (row, moved) = archetypes.move_entity(with_a, 0, with_ab);
        let target = archetypes.get_mut(with_ab).unwrap();
        target.typed_column_mut::<B>(b).unwrap().append(Tick::new(2), B(7));

        assert_eq!(row, 0);
        assert_eq!(moved, Some(Entity::from_index(1)));
        assert_eq!(target.typed_column::<A>(a).unwrap().get(0), Some(&A(0)));
        assert!(target.is_consistent());
        assert!(archetypes.get(with_a).unwrap().is_consistent());
        assert_eq!(archetypes.get(with_a).unwrap().len(), 1);
    }
}
