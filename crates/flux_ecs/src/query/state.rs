use crate::archetype::ArchetypeId;
use crate::archetypes::Archetypes;
use crate::component::{ComponentId, ComponentKind};
use crate::query::access::FilteredAccess;
use crate::query::fetch::{QueryData, ReadOnlyQueryData};
use crate::query::filter::QueryFilter;
use crate::query::Query;
use crate::tick::Tick;
use crate::world::World;
use std::marker::PhantomData;

/// A parsed query together with the archetypes it matches.
///
/// The match list only grows: archetypes are never destroyed, so
/// [`update_archetypes`](Self::update_archetypes) just looks at the ones
/// created since the last call.
pub struct QueryState<D: QueryData, F: QueryFilter = ()> {
    pub(crate) data_state: D::State,
    pub(crate) filter_state: F::State,
    access: FilteredAccess,
    matched_archetypes: Vec<ArchetypeId>,
    seen_archetypes: usize,
    /// Comparable components this query can write; scanned after it ran.
    mutated: Vec<ComponentId>,
    last_run: Tick,
    pending_scan: Option<Tick>,
    _marker: PhantomData<fn() -> (D, F)>,
}

impl<D: QueryData, F: QueryFilter> QueryState<D, F> {
    pub fn new(world: &mut World) -> Self {
        let data_state = D::init_state(&mut world.components);
        let filter_state = F::init_state(&mut world.components);

        let mut access = FilteredAccess::default();
        D::update_access(&data_state, &mut access);
        F::update_access(&filter_state, &mut access);

        let mutated = access
            .writes()
            .filter(|&id| world.components.info(id).kind == ComponentKind::Comparable)
            .collect();

        let mut state = Self {
            data_state,
            filter_state,
            access,
            matched_archetypes: Vec::new(),
            seen_archetypes: 0,
            mutated,
            last_run: Tick::NONE,
            pending_scan: None,
            _marker: PhantomData,
        };
        state.update_archetypes(&world.archetypes);
        state
    }

    pub fn access(&self) -> &FilteredAccess {
        &self.access
    }

    pub(crate) fn update_archetypes(&mut self, archetypes: &Archetypes) {
        for archetype in archetypes.iter().skip(self.seen_archetypes) {
            let set = archetype.component_set();
            if D::matches_component_set(&self.data_state, set) && F::matches_component_set(&self.filter_state, set) {
                self.matched_archetypes.push(archetype.id());
            }
        }
        self.seen_archetypes = archetypes.len();
    }

    pub fn matched_archetypes(&self) -> &[ArchetypeId] {
        &self.matched_archetypes
    }

    pub fn matches_archetype(&self, id: ArchetypeId) -> bool {
        self.matched_archetypes.binary_search(&id).is_ok()
    }

    /// Compares every comparable column this query could have written against
    /// its snapshot, stamping differing rows with `tick`.
    pub(crate) fn check_changed(&self, world: &mut World, tick: Tick) {
        if self.mutated.is_empty() {
            return;
        }
        let mut changed = 0;
        for &id in &self.matched_archetypes {
            let Some(archetype) = world.archetypes.get_mut(id) else {
                continue;
            };
            for &component in &self.mutated {
                changed += archetype.check_changed(component, tick);
            }
        }
        log::trace!("change scan at {tick} found {changed} modified rows");
    }

    /// A read-only view for code running outside systems. Each call counts as
    /// one run: row filters see what changed since the previous call.
    pub fn query<'w>(&'w mut self, world: &'w World) -> Query<'w, 'w, D, F>
    where
        D: ReadOnlyQueryData,
    {
        self.update_archetypes(&world.archetypes);
        let this_run = world.increment_tick();
        let last_run = std::mem::replace(&mut self.last_run, this_run);
        // SAFETY: `D` is read-only and `world` stays borrowed for `'w`.
        unsafe { Query::new(world.as_unsafe_world_cell_readonly(), self, last_run, this_run) }
    }

    /// A mutable view for code running outside systems. Comparable
    /// components written through it are scanned on the next call or on
    /// [`apply_changes`](Self::apply_changes).
    pub fn query_mut<'w>(&'w mut self, world: &'w mut World) -> Query<'w, 'w, D, F> {
        self.apply_changes(world);
        self.update_archetypes(&world.archetypes);
        let this_run = world.increment_tick();
        let last_run = std::mem::replace(&mut self.last_run, this_run);
        self.pending_scan = Some(this_run);
        // SAFETY: `world` is exclusively borrowed for `'w`.
        unsafe { Query::new(world.as_unsafe_world_cell(), self, last_run, this_run) }
    }

    /// Runs the change scan for the last [`query_mut`](Self::query_mut), if
    /// it has not run yet.
    pub fn apply_changes(&mut self, world: &mut World) {
        if let Some(tick) = self.pending_scan.take() {
            self.check_changed(world, tick);
        }
    }
}
