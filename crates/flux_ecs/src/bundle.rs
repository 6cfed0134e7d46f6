use crate::archetype::Archetype;
use crate::column::ErasedColumn;
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::tick::Tick;
use variadics_please::all_tuples;

/// A statically known group of components inserted together.
///
/// Every component is a bundle of one, and tuples of bundles are bundles.
pub trait Bundle: 'static {
    /// Appends the ids of every component in the bundle, in declaration order.
    fn component_ids(registry: &mut ComponentRegistry, ids: &mut Vec<ComponentId>);

    /// Writes the values into `row` of `archetype`. Columns that already hold
    /// the row are overwritten, the rest get the value appended.
    fn write(self, registry: &ComponentRegistry, archetype: &mut Archetype, row: usize, tick: Tick);
}

impl<C: Component> Bundle for C {
    fn component_ids(registry: &mut ComponentRegistry, ids: &mut Vec<ComponentId>) {
        ids.push(registry.register::<C>());
    }

    fn write(self, registry: &ComponentRegistry, archetype: &mut Archetype, row: usize, tick: Tick) {
        let id = registry
            .get_id::<C>()
            .unwrap_or_else(|| panic!("{} was written before being registered", std::any::type_name::<C>()));
        let column = archetype
            .typed_column_mut::<C>(id)
            .unwrap_or_else(|| panic!("target archetype has no column for {}", std::any::type_name::<C>()));
        if row < column.len() {
            column.update(tick, row, self);
        } else {
            debug_assert_eq!(row, column.len());
            column.append(tick, self);
        }
    }
}

macro_rules! impl_bundle_tuple {
    ($($B:ident),*) => {
        #[allow(non_snake_case, unused_variables)]
        impl<$($B: Bundle),*> Bundle for ($($B,)*) {
            fn component_ids(registry: &mut ComponentRegistry, ids: &mut Vec<ComponentId>) {
                $($B::component_ids(registry, ids);)*
            }

            fn write(self, registry: &ComponentRegistry, archetype: &mut Archetype, row: usize, tick: Tick) {
                let ($($B,)*) = self;
                $($B.write(registry, archetype, row, tick);)*
            }
        }
    };
}

all_tuples!(impl_bundle_tuple, 0, 15, B);

/// Component ids of `B`, registering them on the way. Panics if a type
/// appears twice.
pub(crate) fn bundle_ids<B: Bundle>(registry: &mut ComponentRegistry) -> Vec<ComponentId> {
    let mut ids = Vec::new();
    B::component_ids(registry, &mut ids);
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
        panic!(
            "bundle {} contains {} more than once",
            std::any::type_name::<B>(),
            registry.info(pair[0]).name
        );
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::ArchetypeId;
    use crate::entity::Entity;

    #[derive(Component, Debug, PartialEq)]
    struct A(u32);

    #[derive(Component, Debug, PartialEq)]
    struct B(&'static str);

    #[derive(Component, Debug, PartialEq)]
    struct C;

    #[test]
    fn nested_tuples_flatten_in_order() {
        let mut registry = ComponentRegistry::new();
        let ids = bundle_ids::<(A, (B, C))>(&mut registry);
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn duplicate_types_are_rejected() {
        let mut registry = ComponentRegistry::new();
        bundle_ids::<(A, B, A)>(&mut registry);
    }

    #[test]
    fn write_appends_then_overwrites() {
        let mut registry = ComponentRegistry::new();
        let ids = bundle_ids::<(A, B)>(&mut registry);
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        let mut archetype = Archetype::new(ArchetypeId::new(1), sorted.into(), &registry);

        let row = archetype.push_entity(Entity::from_index(0));
        (A(1), B("one")).write(&registry, &mut archetype, row, Tick::new(1));
        (A(2), B("two")).write(&registry, &mut archetype, row, Tick::new(2));

        assert!(archetype.is_consistent());
        let a = archetype.typed_column::<A>(ids[0]).unwrap();
        assert_eq!(a.get(0), Some(&A(2)));
        assert_eq!(a.row_changed(0), Tick::new(2));
        assert_eq!(a.row_added(0), Tick::new(1));
    }
}
