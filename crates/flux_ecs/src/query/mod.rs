mod access;
mod fetch;
mod filter;
mod state;

pub use access::{Access, FilteredAccess};
pub use fetch::{Has, QueryData, QueryItem, ROQueryItem, ReadOnlyQueryData};
pub use filter::{Added, Changed, Or, QueryFilter, TickFetch, With, Without};
pub use state::QueryState;

use crate::archetype::ArchetypeId;
use crate::entity::Entity;
use crate::system::{SystemMeta, SystemParam};
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QuerySingleError {
    #[error("no entity matches {0}")]
    NoEntities(&'static str),
    #[error("more than one entity matches {0}")]
    MultipleEntities(&'static str),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueryEntityError {
    #[error("{0} does not exist")]
    NoSuchEntity(Entity),
    #[error("{0} does not match the query")]
    QueryDoesNotMatch(Entity),
}

/// Iterates and looks up the entities matching `D` and `F`.
///
/// Inside a system, row filters compare against the system's previous run.
pub struct Query<'w, 's, D: QueryData, F: QueryFilter = ()> {
    world: UnsafeWorldCell<'w>,
    state: &'s QueryState<D, F>,
    last_run: Tick,
    this_run: Tick,
}

impl<'w, 's, D: QueryData, F: QueryFilter> Query<'w, 's, D, F> {
    /// # Safety
    /// `world` must permit every access recorded in `state`, for `'w`.
    pub(crate) unsafe fn new(
        world: UnsafeWorldCell<'w>,
        state: &'s QueryState<D, F>,
        last_run: Tick,
        this_run: Tick,
    ) -> Self {
        Self {
            world,
            state,
            last_run,
            this_run,
        }
    }

    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    pub fn this_run(&self) -> Tick {
        self.this_run
    }

    pub fn iter(&self) -> QueryIter<'_, 's, D::ReadOnly, F> {
        // SAFETY: read-only items, borrowed from `self`.
        unsafe { self.iter_unchecked() }
    }

    pub fn iter_mut(&mut self) -> QueryIter<'_, 's, D, F> {
        // SAFETY: `self` is borrowed mutably for as long as the items live.
        unsafe { self.iter_unchecked() }
    }

    pub fn get(&self, entity: Entity) -> Result<ROQueryItem<'_, D>, QueryEntityError> {
        unsafe { self.get_unchecked::<D::ReadOnly>(entity) }
    }

    pub fn get_mut(&mut self, entity: Entity) -> Result<QueryItem<'_, D>, QueryEntityError> {
        unsafe { self.get_unchecked::<D>(entity) }
    }

    pub fn single(&self) -> Result<ROQueryItem<'_, D>, QuerySingleError> {
        single(self.iter())
    }

    pub fn single_mut(&mut self) -> Result<QueryItem<'_, D>, QuerySingleError> {
        single(self.iter_mut())
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.get(entity).is_ok()
    }

    /// # Safety
    /// The caller decides how long items borrowed from the world may live and
    /// must not let mutable items alias.
    unsafe fn iter_unchecked<'a, Q: QueryData<State = D::State>>(&self) -> QueryIter<'a, 's, Q, F>
    where
        'w: 'a,
    {
        QueryIter {
            world: self.world,
            data_state: &self.state.data_state,
            filter_state: &self.state.filter_state,
            archetypes: self.state.matched_archetypes().iter(),
            entities: std::ptr::null(),
            fetch: None,
            row: 0,
            len: 0,
            last_run: self.last_run,
        }
    }

    /// # Safety
    /// Same as [`iter_unchecked`](Self::iter_unchecked).
    unsafe fn get_unchecked<'a, Q: QueryData<State = D::State>>(
        &self,
        entity: Entity,
    ) -> Result<Q::Item<'a>, QueryEntityError> {
        let location = unsafe { self.world.entities() }
            .get(entity)
            .ok_or(QueryEntityError::NoSuchEntity(entity))?;
        if !self.state.matches_archetype(location.archetype_id) {
            return Err(QueryEntityError::QueryDoesNotMatch(entity));
        }

        let archetype = unsafe { self.world.archetype_ptr(location.archetype_id) };
        if F::IS_ROW_FILTER {
            let filter = unsafe { F::init_fetch(&self.state.filter_state, archetype, self.last_run) };
            if !unsafe { F::filter_row(filter, location.row) } {
                return Err(QueryEntityError::QueryDoesNotMatch(entity));
            }
        }
        let fetch = unsafe { Q::init_fetch(&self.state.data_state, archetype) };
        Ok(unsafe { Q::fetch(fetch, entity, location.row) })
    }

    fn into_single(self) -> Result<D::Item<'w>, QuerySingleError> {
        single(self.into_iter())
    }
}

fn single<'w, 's, D: QueryData, F: QueryFilter>(
    mut iter: QueryIter<'w, 's, D, F>,
) -> Result<D::Item<'w>, QuerySingleError> {
    let name = type_name::<(D, F)>();
    let first = iter.next().ok_or(QuerySingleError::NoEntities(name))?;
    if iter.next().is_some() {
        return Err(QuerySingleError::MultipleEntities(name));
    }
    Ok(first)
}

impl<D: QueryData, F: QueryFilter> fmt::Debug for Query<'_, '_, D, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("data", &type_name::<D>())
            .field("filter", &type_name::<F>())
            .field("archetypes", &self.state.matched_archetypes().len())
            .field("last_run", &self.last_run)
            .finish()
    }
}

impl<'w, 's, D: QueryData, F: QueryFilter> IntoIterator for Query<'w, 's, D, F> {
    type Item = D::Item<'w>;
    type IntoIter = QueryIter<'w, 's, D, F>;

    fn into_iter(self) -> Self::IntoIter {
        // SAFETY: the query is consumed, so nothing else can hand out items.
        unsafe { self.iter_unchecked() }
    }
}

impl<'a, 's, D: QueryData, F: QueryFilter> IntoIterator for &'a Query<'_, 's, D, F> {
    type Item = ROQueryItem<'a, D>;
    type IntoIter = QueryIter<'a, 's, D::ReadOnly, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, 's, D: QueryData, F: QueryFilter> IntoIterator for &'a mut Query<'_, 's, D, F> {
    type Item = QueryItem<'a, D>;
    type IntoIter = QueryIter<'a, 's, D, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Walks the matched archetypes in id order and their rows in storage order.
///
/// Column pointers are resolved when an archetype is entered, so the iterator
/// never holds on to storage across archetypes.
pub struct QueryIter<'w, 's, D: QueryData, F: QueryFilter> {
    world: UnsafeWorldCell<'w>,
    data_state: &'s D::State,
    filter_state: &'s F::State,
    archetypes: std::slice::Iter<'s, ArchetypeId>,
    entities: *const Entity,
    fetch: Option<(D::Fetch, F::Fetch)>,
    row: usize,
    len: usize,
    last_run: Tick,
}

impl<D: QueryData, F: QueryFilter> QueryIter<'_, '_, D, F> {
    /// Moves to the next archetype with rows worth visiting.
    fn next_archetype(&mut self) -> bool {
        for &id in self.archetypes.by_ref() {
            let archetype = unsafe { self.world.archetype_ptr(id) };
            let (entities, len, may_match) = {
                let archetype = unsafe { &*archetype };
                let may_match = !F::IS_ROW_FILTER
                    || F::archetype_may_match(self.filter_state, archetype, self.last_run);
                (archetype.entities().as_ptr(), archetype.len(), may_match)
            };
            if len == 0 || !may_match {
                continue;
            }

            // SAFETY: the archetype matched the query when the state was
            // updated, and archetypes are never destroyed.
            let fetch = unsafe {
                (
                    D::init_fetch(self.data_state, archetype),
                    F::init_fetch(self.filter_state, archetype, self.last_run),
                )
            };
            self.fetch = Some(fetch);
            self.entities = entities;
            self.row = 0;
            self.len = len;
            return true;
        }
        false
    }
}

impl<'w, D: QueryData, F: QueryFilter> Iterator for QueryIter<'w, '_, D, F> {
    type Item = D::Item<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.row >= self.len {
                if !self.next_archetype() {
                    return None;
                }
                continue;
            }

            let row = self.row;
            self.row += 1;
            let (data, filter) = self.fetch?;
            if F::IS_ROW_FILTER && !unsafe { F::filter_row(filter, row) } {
                continue;
            }
            let entity = unsafe { *self.entities.add(row) };
            return Some(unsafe { D::fetch(data, entity, row) });
        }
    }
}

/// The item of a query that must match exactly one entity. A system taking
/// `Single` panics otherwise; take `Option<Single<..>>` to skip instead.
pub struct Single<'w, D: QueryData, F: QueryFilter = ()> {
    item: D::Item<'w>,
    _filter: PhantomData<fn() -> F>,
}

impl<'w, D: QueryData, F: QueryFilter> Single<'w, D, F> {
    pub fn into_inner(self) -> D::Item<'w> {
        self.item
    }
}

impl<'w, D: QueryData, F: QueryFilter> Deref for Single<'w, D, F> {
    type Target = D::Item<'w>;

    fn deref(&self) -> &Self::Target {
        &self.item
    }
}

impl<D: QueryData, F: QueryFilter> DerefMut for Single<'_, D, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.item
    }
}

fn init_query_state<D: QueryData, F: QueryFilter, P>(world: &mut World, meta: &mut SystemMeta) -> QueryState<D, F> {
    let state = QueryState::new(world);
    let system = meta.name();
    meta.access_mut()
        .add_query(system, type_name::<P>(), state.access().clone());
    state
}

impl<D: QueryData + 'static, F: QueryFilter + 'static> SystemParam for Query<'_, '_, D, F> {
    type State = QueryState<D, F>;

    type Item<'world, 'state> = Query<'world, 'state, D, F>;

    fn init_state(world: &mut World, meta: &mut SystemMeta) -> Self::State {
        init_query_state::<D, F, Self>(world, meta)
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        state.update_archetypes(unsafe { world.archetypes() });
        unsafe { Query::new(world, state, meta.last_run(), meta.this_run()) }
    }

    fn apply_buffers(state: &mut Self::State, meta: &SystemMeta, world: &mut World) {
        state.check_changed(world, meta.this_run());
    }
}

impl<D: QueryData + 'static, F: QueryFilter + 'static> SystemParam for Single<'_, D, F> {
    type State = QueryState<D, F>;

    type Item<'world, 'state> = Single<'world, D, F>;

    fn init_state(world: &mut World, meta: &mut SystemMeta) -> Self::State {
        init_query_state::<D, F, Self>(world, meta)
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        state.update_archetypes(unsafe { world.archetypes() });
        let query = unsafe { Query::new(world, &*state, meta.last_run(), meta.this_run()) };
        match query.into_single() {
            Ok(item) => Single {
                item,
                _filter: PhantomData,
            },
            Err(error) => panic!("system '{}' takes a Single but {error}", meta.name()),
        }
    }

    fn apply_buffers(state: &mut Self::State, meta: &SystemMeta, world: &mut World) {
        state.check_changed(world, meta.this_run());
    }
}

impl<D: QueryData + 'static, F: QueryFilter + 'static> SystemParam for Option<Single<'_, D, F>> {
    type State = QueryState<D, F>;

    type Item<'world, 'state> = Option<Single<'world, D, F>>;

    fn init_state(world: &mut World, meta: &mut SystemMeta) -> Self::State {
        init_query_state::<D, F, Self>(world, meta)
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        state.update_archetypes(unsafe { world.archetypes() });
        let query = unsafe { Query::new(world, &*state, meta.last_run(), meta.this_run()) };
        query.into_single().ok().map(|item| Single {
            item,
            _filter: PhantomData,
        })
    }

    fn apply_buffers(state: &mut Self::State, meta: &SystemMeta, world: &mut World) {
        state.check_changed(world, meta.this_run());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[derive(Component, Debug, Clone, Copy, PartialEq)]
    struct Position(i32);

    #[derive(Component, Debug, Clone, Copy, PartialEq)]
    struct Velocity(i32);

    #[derive(Component, Debug, Clone, PartialEq)]
    #[component(comparable)]
    struct Health(u32);

    #[derive(Component)]
    #[component(immutable)]
    struct Name(#[allow(dead_code)] &'static str);

    #[derive(Component)]
    struct Frozen;

    fn positions(world: &mut World) -> Vec<i32> {
        let mut state = world.query::<&Position>();
        let mut values: Vec<i32> = state.query(world).iter().map(|p| p.0).collect();
        values.sort();
        values
    }

    #[test]
    fn iterates_only_matching_archetypes() {
        let mut world = World::new();
        world.spawn((Position(1), Velocity(1)));
        world.spawn((Position(2), Velocity(1), Frozen));
        world.spawn(Position(10));
        world.spawn(Velocity(5));

        let mut state = world.query::<(&mut Position, &Velocity)>();
        for (position, velocity) in state.query_mut(&mut world) {
            position.0 += velocity.0;
        }
        assert_eq!(positions(&mut world), vec![2, 3, 10]);
    }

    #[test]
    fn filters_narrow_the_match() {
        let mut world = World::new();
        let moving = world.spawn((Position(1), Velocity(1)));
        let frozen = world.spawn((Position(2), Velocity(1), Frozen));

        let mut state = world.query_filtered::<Entity, (With<Velocity>, Without<Frozen>)>();
        let matched: Vec<Entity> = state.query(&world).iter().collect();
        assert_eq!(matched, vec![moving]);

        let mut state = world.query_filtered::<Entity, Or<(With<Frozen>, Without<Velocity>)>>();
        let matched: Vec<Entity> = state.query(&world).iter().collect();
        assert_eq!(matched, vec![frozen]);
    }

    #[test]
    fn optional_and_has_terms_do_not_restrict() {
        let mut world = World::new();
        world.spawn((Position(1), Velocity(3)));
        world.spawn(Position(2));

        let mut state = world.query::<(&Position, Option<&Velocity>, Has<Velocity>)>();
        let mut rows: Vec<(i32, Option<i32>, bool)> = state
            .query(&world)
            .iter()
            .map(|(p, v, has)| (p.0, v.map(|v| v.0), has))
            .collect();
        rows.sort_by_key(|row| row.0);
        assert_eq!(rows, vec![(1, Some(3), true), (2, None, false)]);
    }

    #[test]
    fn get_reports_why_an_entity_is_missing() {
        let mut world = World::new();
        let with = world.spawn((Position(1), Velocity(1)));
        let without = world.spawn(Position(1));
        let gone = world.spawn(Position(1));
        world.despawn(gone);

        let mut state = world.query::<&Velocity>();
        let query = state.query(&world);
        assert_eq!(query.get(with).map(|v| v.0), Ok(1));
        assert_eq!(query.get(without).err(), Some(QueryEntityError::QueryDoesNotMatch(without)));
        assert_eq!(query.get(gone).err(), Some(QueryEntityError::NoSuchEntity(gone)));
        assert!(query.contains(with));
    }

    #[test]
    fn single_needs_exactly_one_match() {
        let mut world = World::new();
        let mut state = world.query::<&Velocity>();
        assert!(matches!(state.query(&world).single(), Err(QuerySingleError::NoEntities(_))));

        world.spawn(Velocity(1));
        let mut state = world.query::<&Velocity>();
        assert_eq!(state.query(&world).single().map(|v| v.0), Ok(1));

        world.spawn(Velocity(2));
        let mut state = world.query::<&Velocity>();
        assert!(matches!(
            state.query(&world).single(),
            Err(QuerySingleError::MultipleEntities(_))
        ));
    }

    #[test]
    fn added_sees_each_insertion_once() {
        let mut world = World::new();
        let mut state = world.query_filtered::<Entity, Added<Position>>();
        let first = world.spawn(Position(1));

        assert_eq!(state.query(&world).iter().collect::<Vec<_>>(), vec![first]);
        assert_eq!(state.query(&world).count(), 0);

        let second = world.spawn(Position(2));
        assert_eq!(state.query(&world).iter().collect::<Vec<_>>(), vec![second]);
    }

    #[test]
    fn changed_ignores_writes_that_keep_the_value() {
        let mut world = World::new();
        let e = world.spawn(Health(10));
        let mut changed = world.query_filtered::<Entity, Changed<Health>>();
        assert_eq!(changed.query(&world).count(), 1);
        assert_eq!(changed.query(&world).count(), 0);

        let mut writer = world.query::<&mut Health>();
        for health in writer.query_mut(&mut world) {
            health.0 = 10;
        }
        writer.apply_changes(&mut world);
        assert_eq!(changed.query(&world).count(), 0);

        for health in writer.query_mut(&mut world) {
            health.0 = 7;
        }
        writer.apply_changes(&mut world);
        assert_eq!(changed.query(&world).iter().collect::<Vec<_>>(), vec![e]);
        assert_eq!(changed.query(&world).count(), 0);
    }

    #[test]
    fn queries_see_archetypes_created_later() {
        let mut world = World::new();
        let mut state = world.query::<&Position>();
        assert!(state.query(&world).is_empty());
        world.spawn((Position(4), Frozen));
        assert_eq!(state.query(&world).count(), 1);
    }

    #[test]
    #[should_panic(expected = "immutable")]
    fn mutable_access_to_immutable_components_is_rejected() {
        let mut world = World::new();
        world.query::<&mut Name>();
    }

    #[test]
    #[should_panic(expected = "requires a comparable or immutable component")]
    fn changed_needs_a_comparable_component() {
        let mut world = World::new();
        world.query_filtered::<Entity, Changed<Position>>();
    }

    #[test]
    #[should_panic(expected = "conflicts")]
    fn aliasing_terms_are_rejected() {
        let mut world = World::new();
        world.query::<(&Position, &mut Position)>();
    }

    #[test]
    #[should_panic(expected = "conflicts")]
    fn overlapping_query_parameters_are_rejected() {
        let mut world = World::new();
        world.run_system_once(|_: Query<&mut Position>, _: Query<&Position>| {});
    }

    #[test]
    fn disjoint_query_parameters_are_accepted() {
        let mut world = World::new();
        world.spawn((Position(1), Frozen));
        world.spawn(Position(2));
        let count = world.run_system_once(
            |frozen: Query<&mut Position, With<Frozen>>, free: Query<&Position, Without<Frozen>>| {
                frozen.count() + free.count()
            },
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn changed_in_systems_tracks_the_last_run() {
        let mut world = World::new();
        let e = world.spawn(Health(1));
        let id = world.register_system(|query: Query<Entity, Changed<Health>>| query.iter().collect::<Vec<_>>());

        assert_eq!(world.run_system(id), Ok(vec![e]));
        assert_eq!(world.run_system(id), Ok(vec![]));

        world.run_system_once(|mut query: Query<&mut Health>| {
            for health in &mut query {
                health.0 = 2;
            }
        });
        assert_eq!(world.run_system(id), Ok(vec![e]));
        assert_eq!(world.run_system(id), Ok(vec![]));
    }

    #[test]
    fn optional_single_skips_instead_of_panicking() {
        let mut world = World::new();
        let seen = world.run_system_once(|single: Option<Single<&Velocity>>| single.map(|v| v.0));
        assert_eq!(seen, None);
        world.spawn(Velocity(9));
        let seen = world.run_system_once(|single: Option<Single<&Velocity>>| single.map(|v| v.0));
        assert_eq!(seen, Some(9));
    }

    #[test]
    #[should_panic(expected = "takes a Single")]
    fn single_panics_without_a_match() {
        let mut world = World::new();
        world.run_system_once(|_: Single<&Velocity>| {});
    }
}
