use crate::archetype::{Archetype, ComponentSet};
use crate::component::{Component, ComponentId, ComponentKind, ComponentRegistry};
use crate::entity::Entity;
use crate::query::access::FilteredAccess;
use std::any::type_name;
use std::marker::PhantomData;
use std::ptr::NonNull;
use variadics_please::all_tuples;

/// Something a query can fetch per entity: component references, optional
/// references, presence flags, the entity itself, or tuples of those.
///
/// # Safety
/// `update_access` must report every component `fetch` reads or writes, and
/// `matches_component_set` must reject archetypes `init_fetch` cannot serve.
pub unsafe trait QueryData {
    type Item<'w>;

    /// The same shape with every `&mut` turned into `&`.
    type ReadOnly: ReadOnlyQueryData<State = Self::State>;

    type State: 'static;

    /// Per-archetype column pointers.
    type Fetch: Copy;

    fn init_state(components: &mut ComponentRegistry) -> Self::State;

    fn update_access(state: &Self::State, access: &mut FilteredAccess);

    fn matches_component_set(state: &Self::State, set: &ComponentSet) -> bool;

    /// # Safety
    /// `archetype` must be live and match this query.
    unsafe fn init_fetch(state: &Self::State, archetype: *mut Archetype) -> Self::Fetch;

    /// # Safety
    /// `row` must be in bounds for the archetype the fetch was built from, and
    /// the columns must not have been resized since.
    unsafe fn fetch<'w>(fetch: Self::Fetch, entity: Entity, row: usize) -> Self::Item<'w>;
}

/// Query data that never hands out mutable references.
///
/// # Safety
/// Implementors must only register reads.
pub unsafe trait ReadOnlyQueryData: QueryData<ReadOnly = Self> {}

pub type QueryItem<'w, D> = <D as QueryData>::Item<'w>;

pub type ROQueryItem<'w, D> = <<D as QueryData>::ReadOnly as QueryData>::Item<'w>;

fn column_values<T: Component>(archetype: *mut Archetype, component: ComponentId, mutable: bool) -> Option<NonNull<T>> {
    // SAFETY: the caller of `init_fetch` guarantees the archetype is live; the
    // column borrow ends before this returns.
    let column = unsafe { Archetype::column_ptr::<T>(archetype, component)? };
    let access = unsafe {
        if mutable {
            (*column).access()
        } else {
            (*column).read_access()
        }
    };
    Some(access.values)
}

fn required_column<T: Component>(archetype: *mut Archetype, component: ComponentId, mutable: bool) -> NonNull<T> {
    column_values(archetype, component, mutable).unwrap_or_else(|| {
        panic!(
            "matched archetype {:?} has no column for {}",
            unsafe { (*archetype).signature() },
            type_name::<T>()
        )
    })
}

unsafe impl<T: Component> QueryData for &T {
    type Item<'w> = &'w T;
    type ReadOnly = Self;
    type State = ComponentId;
    type Fetch = NonNull<T>;

    fn init_state(components: &mut ComponentRegistry) -> ComponentId {
        components.register::<T>()
    }

    fn update_access(&component: &ComponentId, access: &mut FilteredAccess) {
        if access.has_write(component) {
            panic!(
                "&{0} conflicts with a previous &mut {0} in the same query",
                type_name::<T>()
            );
        }
        access.add_read(component);
        access.and_with(component);
    }

    fn matches_component_set(&component: &ComponentId, set: &ComponentSet) -> bool {
        set.contains(component)
    }

    unsafe fn init_fetch(&component: &ComponentId, archetype: *mut Archetype) -> NonNull<T> {
        required_column(archetype, component, false)
    }

    unsafe fn fetch<'w>(values: NonNull<T>, _: Entity, row: usize) -> &'w T {
        unsafe { values.add(row).as_ref() }
    }
}

unsafe impl<T: Component> ReadOnlyQueryData for &T {}

unsafe impl<T: Component> QueryData for &mut T {
    type Item<'w> = &'w mut T;
    type ReadOnly = &'static T;
    type State = ComponentId;
    type Fetch = NonNull<T>;

    fn init_state(components: &mut ComponentRegistry) -> ComponentId {
        if T::KIND == ComponentKind::Immutable {
            panic!(
                "cannot query &mut {0}: {0} is immutable and can only be replaced",
                type_name::<T>()
            );
        }
        components.register::<T>()
    }

    fn update_access(&component: &ComponentId, access: &mut FilteredAccess) {
        if access.has_read(component) || access.has_write(component) {
            panic!(
                "&mut {0} conflicts with a previous access to {0} in the same query",
                type_name::<T>()
            );
        }
        access.add_write(component);
        access.and_with(component);
    }

    fn matches_component_set(&component: &ComponentId, set: &ComponentSet) -> bool {
        set.contains(component)
    }

    unsafe fn init_fetch(&component: &ComponentId, archetype: *mut Archetype) -> NonNull<T> {
        required_column(archetype, component, true)
    }

    unsafe fn fetch<'w>(values: NonNull<T>, _: Entity, row: usize) -> &'w mut T {
        unsafe { values.add(row).as_mut() }
    }
}

unsafe impl<D: QueryData> QueryData for Option<D> {
    type Item<'w> = Option<D::Item<'w>>;
    type ReadOnly = Option<D::ReadOnly>;
    type State = D::State;
    type Fetch = Option<D::Fetch>;

    fn init_state(components: &mut ComponentRegistry) -> D::State {
        D::init_state(components)
    }

    fn update_access(state: &D::State, access: &mut FilteredAccess) {
        let mut inner = access.clone();
        D::update_access(state, &mut inner);
        access.extend_access(&inner);
    }

    fn matches_component_set(_: &D::State, _: &ComponentSet) -> bool {
        true
    }

    unsafe fn init_fetch(state: &D::State, archetype: *mut Archetype) -> Option<D::Fetch> {
        let matches = unsafe { D::matches_component_set(state, (*archetype).component_set()) };
        matches.then(|| unsafe { D::init_fetch(state, archetype) })
    }

    unsafe fn fetch<'w>(fetch: Option<D::Fetch>, entity: Entity, row: usize) -> Option<D::Item<'w>> {
        fetch.map(|fetch| unsafe { D::fetch(fetch, entity, row) })
    }
}

unsafe impl<D: ReadOnlyQueryData> ReadOnlyQueryData for Option<D> {}

/// Whether the entity has a `T`, without touching its data.
pub struct Has<T>(PhantomData<T>);

unsafe impl<T: Component> QueryData for Has<T> {
    type Item<'w> = bool;
    type ReadOnly = Self;
    type State = ComponentId;
    type Fetch = bool;

    fn init_state(components: &mut ComponentRegistry) -> ComponentId {
        components.register::<T>()
    }

    fn update_access(_: &ComponentId, _: &mut FilteredAccess) {}

    fn matches_component_set(_: &ComponentId, _: &ComponentSet) -> bool {
        true
    }

    unsafe fn init_fetch(&component: &ComponentId, archetype: *mut Archetype) -> bool {
        unsafe { (*archetype).contains(component) }
    }

    unsafe fn fetch<'w>(has: bool, _: Entity, _: usize) -> Self::Item<'w> {
        has
    }
}

unsafe impl<T: Component> ReadOnlyQueryData for Has<T> {}

unsafe impl QueryData for Entity {
    type Item<'w> = Entity;
    type ReadOnly = Self;
    type State = ();
    type Fetch = ();

    fn init_state(_: &mut ComponentRegistry) {}

    fn update_access(_: &(), _: &mut FilteredAccess) {}

    fn matches_component_set(_: &(), _: &ComponentSet) -> bool {
        true
    }

    unsafe fn init_fetch(_: &(), _: *mut Archetype) {}

    unsafe fn fetch<'w>(_: (), entity: Entity, _: usize) -> Self::Item<'w> {
        entity
    }
}

unsafe impl ReadOnlyQueryData for Entity {}

macro_rules! impl_query_data_tuple {
    ($(($D:ident, $d:ident)),*) => {
        #[allow(non_snake_case, unused_variables, clippy::unused_unit)]
        unsafe impl<$($D: QueryData),*> QueryData for ($($D,)*) {
            type Item<'w> = ($($D::Item<'w>,)*);
            type ReadOnly = ($($D::ReadOnly,)*);
            type State = ($($D::State,)*);
            type Fetch = ($($D::Fetch,)*);

            fn init_state(components: &mut ComponentRegistry) -> Self::State {
                ($($D::init_state(components),)*)
            }

            fn update_access(state: &Self::State, access: &mut FilteredAccess) {
                let ($($d,)*) = state;
                $($D::update_access($d, access);)*
            }

            fn matches_component_set(state: &Self::State, set: &ComponentSet) -> bool {
                let ($($d,)*) = state;
                true $(&& $D::matches_component_set($d, set))*
            }

            unsafe fn init_fetch(state: &Self::State, archetype: *mut Archetype) -> Self::Fetch {
                let ($($d,)*) = state;
                ($(unsafe { $D::init_fetch($d, archetype) },)*)
            }

            unsafe fn fetch<'w>(fetch: Self::Fetch, entity: Entity, row: usize) -> Self::Item<'w> {
                let ($($d,)*) = fetch;
                ($(unsafe { $D::fetch($d, entity, row) },)*)
            }
        }

        unsafe impl<$($D: ReadOnlyQueryData),*> ReadOnlyQueryData for ($($D,)*) {}
    };
}

all_tuples!(impl_query_data_tuple, 0, 15, D, d);
