use crate::archetype::{Archetype, ComponentSet};
use crate::component::{Component, ComponentId, ComponentKind, ComponentRegistry};
use crate::query::access::FilteredAccess;
use crate::tick::Tick;
use std::any::type_name;
use std::marker::PhantomData;
use std::ptr::NonNull;
use variadics_please::all_tuples;

/// Narrows the entities a query visits without fetching anything.
///
/// Archetype filters (`With`, `Without`) are decided once per archetype. Row
/// filters (`Added`, `Changed`) also look at per-row ticks, but skip whole
/// archetypes whose newest tick is older than the system's last run.
///
/// # Safety
/// `init_fetch` must accept any live archetype, matching or not, and
/// `filter_row` must only read the tick columns it resolved there.
pub unsafe trait QueryFilter {
    type State: 'static;

    type Fetch: Copy;

    const IS_ROW_FILTER: bool;

    fn init_state(components: &mut ComponentRegistry) -> Self::State;

    fn update_access(state: &Self::State, access: &mut FilteredAccess);

    fn matches_component_set(state: &Self::State, set: &ComponentSet) -> bool;

    /// Cheap per-archetype pre-check against the column high-water ticks.
    fn archetype_may_match(state: &Self::State, archetype: &Archetype, last_run: Tick) -> bool;

    /// # Safety
    /// `archetype` must be live.
    unsafe fn init_fetch(state: &Self::State, archetype: *mut Archetype, last_run: Tick) -> Self::Fetch;

    /// # Safety
    /// `row` must be in bounds for the archetype the fetch was built from.
    unsafe fn filter_row(fetch: Self::Fetch, row: usize) -> bool;
}

/// Only entities that have a `T`.
pub struct With<T>(PhantomData<T>);

/// Only entities that do not have a `T`.
pub struct Without<T>(PhantomData<T>);

/// Only entities whose `T` was inserted since the system last ran.
pub struct Added<T>(PhantomData<T>);

/// Only entities whose `T` was inserted, replaced or (for comparable
/// components) mutated since the system last ran.
pub struct Changed<T>(PhantomData<T>);

/// Entities that pass at least one of the filters in the tuple.
pub struct Or<T>(PhantomData<T>);

unsafe impl<T: Component> QueryFilter for With<T> {
    type State = ComponentId;
    type Fetch = ();
    const IS_ROW_FILTER: bool = false;

    fn init_state(components: &mut ComponentRegistry) -> ComponentId {
        components.register::<T>()
    }

    fn update_access(&component: &ComponentId, access: &mut FilteredAccess) {
        access.and_with(component);
    }

    fn matches_component_set(&component: &ComponentId, set: &ComponentSet) -> bool {
        set.contains(component)
    }

    fn archetype_may_match(_: &ComponentId, _: &Archetype, _: Tick) -> bool {
        true
    }

    unsafe fn init_fetch(_: &ComponentId, _: *mut Archetype, _: Tick) {}

    unsafe fn filter_row(_: (), _: usize) -> bool {
        true
    }
}

unsafe impl<T: Component> QueryFilter for Without<T> {
    type State = ComponentId;
    type Fetch = ();
    const IS_ROW_FILTER: bool = false;

    fn init_state(components: &mut ComponentRegistry) -> ComponentId {
        components.register::<T>()
    }

    fn update_access(&component: &ComponentId, access: &mut FilteredAccess) {
        access.and_without(component);
    }

    fn matches_component_set(&component: &ComponentId, set: &ComponentSet) -> bool {
        !set.contains(component)
    }

    fn archetype_may_match(_: &ComponentId, _: &Archetype, _: Tick) -> bool {
        true
    }

    unsafe fn init_fetch(_: &ComponentId, _: *mut Archetype, _: Tick) {}

    unsafe fn filter_row(_: (), _: usize) -> bool {
        true
    }
}

/// Per-row ticks of one column, compared against a system's last run.
#[derive(Copy, Clone)]
pub struct TickFetch {
    ticks: Option<NonNull<Tick>>,
    last_run: Tick,
}

impl TickFetch {
    unsafe fn is_newer(self, row: usize) -> bool {
        match self.ticks {
            Some(ticks) => unsafe { ticks.add(row).read() }.is_newer_than(self.last_run),
            None => false,
        }
    }
}

unsafe fn tick_fetch<T: Component>(
    archetype: *mut Archetype,
    component: ComponentId,
    last_run: Tick,
    changed: bool,
) -> TickFetch {
    let ticks = unsafe { Archetype::column_ptr::<T>(archetype, component) }.map(|column| {
        let access = unsafe { (*column).read_access() };
        if changed { access.changed } else { access.added }
    });
    TickFetch { ticks, last_run }
}

unsafe impl<T: Component> QueryFilter for Added<T> {
    type State = ComponentId;
    type Fetch = TickFetch;
    const IS_ROW_FILTER: bool = true;

    fn init_state(components: &mut ComponentRegistry) -> ComponentId {
        components.register::<T>()
    }

    fn update_access(&component: &ComponentId, access: &mut FilteredAccess) {
        access.and_with(component);
    }

    fn matches_component_set(&component: &ComponentId, set: &ComponentSet) -> bool {
        set.contains(component)
    }

    fn archetype_may_match(&component: &ComponentId, archetype: &Archetype, last_run: Tick) -> bool {
        archetype.last_added(component).is_newer_than(last_run)
    }

    unsafe fn init_fetch(&component: &ComponentId, archetype: *mut Archetype, last_run: Tick) -> TickFetch {
        unsafe { tick_fetch::<T>(archetype, component, last_run, false) }
    }

    unsafe fn filter_row(fetch: TickFetch, row: usize) -> bool {
        unsafe { fetch.is_newer(row) }
    }
}

unsafe impl<T: Component> QueryFilter for Changed<T> {
    type State = ComponentId;
    type Fetch = TickFetch;
    const IS_ROW_FILTER: bool = true;

    fn init_state(components: &mut ComponentRegistry) -> ComponentId {
        if T::KIND == ComponentKind::Plain {
            panic!(
                "Changed<{}> requires a comparable or immutable component",
                type_name::<T>()
            );
        }
        components.register::<T>()
    }

    fn update_access(&component: &ComponentId, access: &mut FilteredAccess) {
        access.and_with(component);
    }

    fn matches_component_set(&component: &ComponentId, set: &ComponentSet) -> bool {
        set.contains(component)
    }

    fn archetype_may_match(&component: &ComponentId, archetype: &Archetype, last_run: Tick) -> bool {
        archetype.last_changed(component).is_newer_than(last_run)
    }

    unsafe fn init_fetch(&component: &ComponentId, archetype: *mut Archetype, last_run: Tick) -> TickFetch {
        unsafe { tick_fetch::<T>(archetype, component, last_run, true) }
    }

    unsafe fn filter_row(fetch: TickFetch, row: usize) -> bool {
        unsafe { fetch.is_newer(row) }
    }
}

macro_rules! impl_query_filter_tuple {
    ($(($F:ident, $f:ident)),*) => {
        #[allow(non_snake_case, unused_variables, clippy::unused_unit)]
        unsafe impl<$($F: QueryFilter),*> QueryFilter for ($($F,)*) {
            type State = ($($F::State,)*);
            type Fetch = ($($F::Fetch,)*);
            const IS_ROW_FILTER: bool = false $(|| $F::IS_ROW_FILTER)*;

            fn init_state(components: &mut ComponentRegistry) -> Self::State {
                ($($F::init_state(components),)*)
            }

            fn update_access(state: &Self::State, access: &mut FilteredAccess) {
                let ($($f,)*) = state;
                $($F::update_access($f, access);)*
            }

            fn matches_component_set(state: &Self::State, set: &ComponentSet) -> bool {
                let ($($f,)*) = state;
                true $(&& $F::matches_component_set($f, set))*
            }

            fn archetype_may_match(state: &Self::State, archetype: &Archetype, last_run: Tick) -> bool {
                let ($($f,)*) = state;
                true $(&& $F::archetype_may_match($f, archetype, last_run))*
            }

            unsafe fn init_fetch(state: &Self::State, archetype: *mut Archetype, last_run: Tick) -> Self::Fetch {
                let ($($f,)*) = state;
                ($(unsafe { $F::init_fetch($f, archetype, last_run) },)*)
            }

            unsafe fn filter_row(fetch: Self::Fetch, row: usize) -> bool {
                let ($($f,)*) = fetch;
                true $(&& unsafe { $F::filter_row($f, row) })*
            }
        }
    };
}

all_tuples!(impl_query_filter_tuple, 0, 15, F, f);

macro_rules! impl_or_filter {
    ($(($F:ident, $f:ident)),*) => {
        #[allow(non_snake_case, unused_variables, clippy::unused_unit)]
        unsafe impl<$($F: QueryFilter),*> QueryFilter for Or<($($F,)*)> {
            type State = ($($F::State,)*);
            /// Each member's fetch, paired with whether that member matches
            /// the archetype at all.
            type Fetch = ($((bool, $F::Fetch),)*);
            const IS_ROW_FILTER: bool = false $(|| $F::IS_ROW_FILTER)*;

            fn init_state(components: &mut ComponentRegistry) -> Self::State {
                ($($F::init_state(components),)*)
            }

            // An alternative guarantees nothing about the archetype, so none of
            // the members' constraints carry over.
            fn update_access(_: &Self::State, _: &mut FilteredAccess) {}

            fn matches_component_set(state: &Self::State, set: &ComponentSet) -> bool {
                let ($($f,)*) = state;
                false $(|| $F::matches_component_set($f, set))*
            }

            fn archetype_may_match(state: &Self::State, archetype: &Archetype, last_run: Tick) -> bool {
                let ($($f,)*) = state;
                false $(|| ($F::matches_component_set($f, archetype.component_set())
                    && $F::archetype_may_match($f, archetype, last_run)))*
            }

            unsafe fn init_fetch(state: &Self::State, archetype: *mut Archetype, last_run: Tick) -> Self::Fetch {
                let ($($f,)*) = state;
                let set = unsafe { (*archetype).component_set() };
                ($(($F::matches_component_set($f, set), unsafe { $F::init_fetch($f, archetype, last_run) }),)*)
            }

            unsafe fn filter_row(fetch: Self::Fetch, row: usize) -> bool {
                let ($($f,)*) = fetch;
                false $(|| ($f.0 && unsafe { $F::filter_row($f.1, row) }))*
            }
        }
    };
}

all_tuples!(impl_or_filter, 1, 15, F, f);
