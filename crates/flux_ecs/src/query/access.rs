use crate::archetype::ComponentSet;
use crate::component::ComponentId;
use std::any::{type_name, TypeId};
use std::collections::HashSet;

/// Components one query reads and writes, plus the archetype constraints that
/// keep it apart from other queries.
#[derive(Clone, Debug, Default)]
pub struct FilteredAccess {
    reads: ComponentSet,
    writes: ComponentSet,
    with: ComponentSet,
    without: ComponentSet,
}

impl FilteredAccess {
    pub fn has_read(&self, component: ComponentId) -> bool {
        self.reads.contains(component)
    }

    pub fn has_write(&self, component: ComponentId) -> bool {
        self.writes.contains(component)
    }

    pub fn add_read(&mut self, component: ComponentId) {
        self.reads.insert(component);
    }

    pub fn add_write(&mut self, component: ComponentId) {
        self.writes.insert(component);
    }

    /// Matched archetypes are guaranteed to contain `component`.
    pub fn and_with(&mut self, component: ComponentId) {
        self.with.insert(component);
    }

    pub fn and_without(&mut self, component: ComponentId) {
        self.without.insert(component);
    }

    /// Takes over the reads and writes of `other` but none of its archetype
    /// constraints. Used for optional terms.
    pub fn extend_access(&mut self, other: &FilteredAccess) {
        self.reads = self.reads.union(&other.reads);
        self.writes = self.writes.union(&other.writes);
    }

    pub fn writes(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.writes.ids()
    }

    pub fn reads(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.reads.ids()
    }

    /// No archetype can match both queries.
    pub fn is_disjoint(&self, other: &FilteredAccess) -> bool {
        !self.with.is_disjoint(&other.without) || !self.without.is_disjoint(&other.with)
    }

    /// Components one side writes and the other touches.
    pub fn conflicts(&self, other: &FilteredAccess) -> Vec<ComponentId> {
        let mine = self.reads.clone() | self.writes.clone();
        let theirs = other.reads.clone() | other.writes.clone();
        let mut conflicts: Vec<ComponentId> = self.writes.ids().filter(|&id| theirs.contains(id)).collect();
        conflicts.extend(other.writes.ids().filter(|&id| mine.contains(id)));
        conflicts.sort_unstable();
        conflicts.dedup();
        conflicts
    }
}

/// Everything a system touches. Used to reject parameter combinations that
/// would alias.
#[derive(Clone, Debug, Default)]
pub struct Access {
    queries: Vec<FilteredAccess>,
    resource_reads: HashSet<TypeId>,
    resource_writes: HashSet<TypeId>,
}

impl Access {
    pub(crate) fn add_query(&mut self, system: &str, query: &str, access: FilteredAccess) {
        for existing in &self.queries {
            if existing.is_disjoint(&access) {
                continue;
            }
            let conflicts = existing.conflicts(&access);
            if !conflicts.is_empty() {
                panic!(
                    "{query} in system '{system}' conflicts with a previous query on components {conflicts:?}; \
                     make them disjoint with Without<..> filters"
                );
            }
        }
        self.queries.push(access);
    }

    pub(crate) fn add_resource_read<T: 'static>(&mut self, system: &str) {
        if self.resource_writes.contains(&TypeId::of::<T>()) {
            panic!(
                "Res<{}> in system '{system}' conflicts with a previous ResMut of the same resource",
                type_name::<T>()
            );
        }
        self.resource_reads.insert(TypeId::of::<T>());
    }

    pub(crate) fn add_resource_write<T: 'static>(&mut self, system: &str) {
        let id = TypeId::of::<T>();
        if self.resource_reads.contains(&id) || self.resource_writes.contains(&id) {
            panic!(
                "ResMut<{}> in system '{system}' conflicts with a previous access to the same resource",
                type_name::<T>()
            );
        }
        self.resource_writes.insert(id);
    }

    pub fn queries(&self) -> &[FilteredAccess] {
        &self.queries
    }

    pub fn reads_resource<T: 'static>(&self) -> bool {
        self.resource_reads.contains(&TypeId::of::<T>())
    }

    pub fn writes_resource<T: 'static>(&self) -> bool {
        self.resource_writes.contains(&TypeId::of::<T>())
    }

    /// Components written by any query of the system.
    pub fn component_writes(&self) -> ComponentSet {
        self.queries
            .iter()
            .flat_map(FilteredAccess::writes)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(reads: &[ComponentId], writes: &[ComponentId]) -> FilteredAccess {
        let mut access = FilteredAccess::default();
        for &id in reads {
            access.add_read(id);
            access.and_with(id);
        }
        for &id in writes {
            access.add_write(id);
            access.and_with(id);
        }
        access
    }

    #[test]
    fn readers_do_not_conflict() {
        assert!(access(&[1, 2], &[]).conflicts(&access(&[1], &[])).is_empty());
    }

    #[test]
    fn writer_conflicts_with_reader() {
        assert_eq!(access(&[], &[1]).conflicts(&access(&[1, 2], &[])), vec![1]);
        assert_eq!(access(&[1, 2], &[]).conflicts(&access(&[], &[2])), vec![2]);
    }

    #[test]
    fn without_makes_queries_disjoint() {
        let left = access(&[], &[1]);
        let mut right = access(&[1], &[]);
        assert!(!left.is_disjoint(&right));
        right.and_without(1);
        assert!(left.is_disjoint(&right));
    }

    #[test]
    #[should_panic(expected = "conflicts")]
    fn overlapping_queries_are_rejected() {
        let mut system = Access::default();
        system.add_query("test", "Query<&mut A>", access(&[], &[1]));
        system.add_query("test", "Query<&A>", access(&[1], &[]));
    }
}
