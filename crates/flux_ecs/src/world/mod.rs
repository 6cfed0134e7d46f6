mod unsafe_world_cell;

pub use unsafe_world_cell::UnsafeWorldCell;

use crate::archetype::ArchetypeId;
use crate::archetypes::Archetypes;
use crate::bundle::{bundle_ids, Bundle};
use crate::change_detection::Mut;
use crate::commands::{Command, CommandQueue};
use crate::component::{Component, ComponentId, ComponentKind, ComponentRegistry};
use crate::entity::{Entities, Entity, EntityLocation};
use crate::event::{Event, Events};
use crate::hierarchy::Child;
use crate::observer::{Observer, TriggerContext};
use crate::plugin::Plugin;
use crate::query::{QueryData, QueryFilter, QueryState};
use crate::removal_detection::RemovedComponentEvents;
use crate::resource::{Resource, Resources};
use crate::schedule::{IntoSetConfigs, IntoSystemConfigs, ScheduleLabel, Schedules};
use crate::system::{IntoSystem, RegisteredSystems, RunSystemError, System, SystemId, SystemOutput};
use crate::tick::Tick;
use crate::time::TimePlugin;
use std::any::{type_name, Any, TypeId};
use std::cell::Cell;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

/// Owns every entity, component, resource and schedule.
pub struct World {
    pub(crate) entities: Entities,
    pub(crate) archetypes: Archetypes,
    pub(crate) components: ComponentRegistry,
    pub(crate) resources: Resources,
    pub(crate) schedules: Schedules,
    pub(crate) command_queue: CommandQueue,
    pub(crate) removed_components: RemovedComponentEvents,
    pub(crate) registered_systems: RegisteredSystems,
    pub(crate) input_stack: Vec<Option<Box<dyn Any>>>,
    pub(crate) trigger_stack: Vec<TriggerContext>,
    event_updaters: Vec<(TypeId, fn(&mut World))>,
    change_tick: Cell<Tick>,
    startup_done: bool,
    plugins: HashSet<TypeId>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        let components = ComponentRegistry::new();
        let archetypes = Archetypes::new(&components);
        let mut world = Self {
            entities: Entities::new(),
            archetypes,
            components,
            resources: Resources::new(),
            schedules: Schedules::new(),
            command_queue: CommandQueue::new(),
            removed_components: RemovedComponentEvents::default(),
            registered_systems: RegisteredSystems::default(),
            input_stack: Vec::new(),
            trigger_stack: Vec::new(),
            event_updaters: Vec::new(),
            change_tick: Cell::new(Tick::new(1)),
            startup_done: false,
            plugins: HashSet::new(),
        };
        world.add_plugin(TimePlugin);
        world
    }

    pub fn change_tick(&self) -> Tick {
        self.change_tick.get()
    }

    /// Hands out the current tick as the `this_run` of whatever is about to
    /// run, then advances the counter.
    pub fn increment_tick(&self) -> Tick {
        let tick = self.change_tick.get();
        self.change_tick.set(tick.next());
        tick
    }

    pub fn as_unsafe_world_cell(&mut self) -> UnsafeWorldCell<'_> {
        UnsafeWorldCell::new_mutable(self)
    }

    pub fn as_unsafe_world_cell_readonly(&self) -> UnsafeWorldCell<'_> {
        UnsafeWorldCell::new_readonly(self)
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    pub fn register_component<C: Component>(&mut self) -> ComponentId {
        self.components.register::<C>()
    }

    // ---------------------------------------------------------------- entities

    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.entities.reserve();
        self.spawn_at(entity, bundle);
        entity
    }

    pub fn spawn_empty(&mut self) -> Entity {
        self.spawn(())
    }

    /// Places an id reserved earlier (by [`Commands`](crate::commands::Commands))
    /// into storage.
    pub(crate) fn spawn_at<B: Bundle>(&mut self, entity: Entity, bundle: B) {
        assert!(
            !self.entities.contains(entity),
            "{entity} was spawned twice"
        );
        self.reject_relationship_targets::<B>("spawn");

        let empty = self
            .archetypes
            .get_mut(ArchetypeId::EMPTY)
            .unwrap_or_else(|| panic!("the empty archetype is missing"));
        let row = empty.push_entity(entity);
        self.entities.set(
            entity,
            EntityLocation {
                archetype_id: ArchetypeId::EMPTY,
                row,
            },
        );
        log::trace!("spawned {entity}");
        self.insert_bundle(entity, bundle);
    }

    /// Spawns `bundle` as a child of `parent`.
    pub fn spawn_child<B: Bundle>(&mut self, parent: Entity, bundle: B) -> Entity {
        self.spawn((bundle, Child::new(parent)))
    }

    /// Inserts or replaces the components of `bundle` on `entity`. Returns
    /// `false` if the entity does not exist.
    pub fn insert<B: Bundle>(&mut self, entity: Entity, bundle: B) -> bool {
        self.reject_relationship_targets::<B>("insert");
        self.insert_bundle(entity, bundle)
    }

    pub(crate) fn insert_internal<B: Bundle>(&mut self, entity: Entity, bundle: B) -> bool {
        self.insert_bundle(entity, bundle)
    }

    fn reject_relationship_targets<B: Bundle>(&mut self, operation: &str) {
        let ids = bundle_ids::<B>(&mut self.components);
        if let Some(info) = ids
            .iter()
            .map(|&id| self.components.info(id))
            .find(|info| info.relationship_target)
        {
            panic!(
                "cannot {operation} {} directly: it is maintained by the world from its relationship",
                info.name
            );
        }
    }

    fn insert_bundle<B: Bundle>(&mut self, entity: Entity, bundle: B) -> bool {
        let Some(location) = self.entities.get(entity) else {
            log::warn!("cannot insert {} into {entity}: it does not exist", type_name::<B>());
            return false;
        };

        let ids = bundle_ids::<B>(&mut self.components);

        // Components about to be replaced get their removal hook first.
        let replaced: Vec<ComponentId> = {
            let archetype = self.archetype(location.archetype_id);
            ids.iter().copied().filter(|&id| archetype.contains(id)).collect()
        };
        for &id in &replaced {
            if let Some(hook) = self.components.info(id).on_remove {
                hook(self, entity);
            }
        }
        let Some(location) = self.entities.get(entity) else {
            return false;
        };

        let target = self
            .archetypes
            .bundle_target(location.archetype_id, &ids, &self.components);
        let row = if target == location.archetype_id {
            location.row
        } else {
            self.move_entity(entity, location, target)
        };

        let tick = self.change_tick();
        let archetype = self
            .archetypes
            .get_mut(target)
            .unwrap_or_else(|| panic!("archetype {target:?} vanished during insert"));
        bundle.write(&self.components, archetype, row, tick);
        debug_assert!(
            archetype.is_consistent(),
            "archetype {:?} is inconsistent after inserting {} into {entity}",
            archetype.signature(),
            type_name::<B>()
        );

        for id in ids {
            if let Some(hook) = self.components.info(id).on_insert {
                hook(self, entity);
            }
        }
        true
    }

    fn move_entity(&mut self, entity: Entity, location: EntityLocation, target: ArchetypeId) -> usize {
        let (row, moved) = self
            .archetypes
            .move_entity(location.archetype_id, location.row, target);
        if let Some(moved) = moved {
            self.entities.set(moved, location);
        }
        self.entities.set(
            entity,
            EntityLocation {
                archetype_id: target,
                row,
            },
        );
        row
    }

    /// Removes whichever components of `B` the entity has. Returns `false` if
    /// the entity does not exist or had none of them.
    pub fn remove<B: Bundle>(&mut self, entity: Entity) -> bool {
        self.reject_relationship_targets::<B>("remove");
        self.remove_internal::<B>(entity)
    }

    pub(crate) fn remove_internal<B: Bundle>(&mut self, entity: Entity) -> bool {
        let ids = bundle_ids::<B>(&mut self.components);
        self.remove_by_ids(entity, &ids)
    }

    pub fn remove_by_id(&mut self, entity: Entity, component: ComponentId) -> bool {
        self.remove_by_ids(entity, &[component])
    }

    fn remove_by_ids(&mut self, entity: Entity, ids: &[ComponentId]) -> bool {
        let Some(location) = self.entities.get(entity) else {
            log::warn!("cannot remove components from {entity}: it does not exist");
            return false;
        };
        let present: Vec<ComponentId> = {
            let archetype = self.archetype(location.archetype_id);
            ids.iter().copied().filter(|&id| archetype.contains(id)).collect()
        };
        if present.is_empty() {
            return false;
        }

        for &id in &present {
            if let Some(hook) = self.components.info(id).on_remove {
                hook(self, entity);
            }
        }

        let Some(location) = self.entities.get(entity) else {
            return false;
        };
        let mut target = location.archetype_id;
        let mut removed = Vec::with_capacity(present.len());
        for &id in &present {
            if let Some(next) = self.archetypes.remove_target(target, id, &self.components) {
                target = next;
                removed.push(id);
            }
        }
        if target != location.archetype_id {
            self.move_entity(entity, location, target);
        }
        for id in removed {
            self.removed_components.send(id, entity);
        }
        true
    }

    /// Despawns `entity` and, recursively, every entity linked to it through a
    /// relationship such as [`Parent`](crate::hierarchy::Parent).
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.entities.contains(entity) {
            log::warn!("cannot despawn {entity}: it does not exist");
            return false;
        }
        let mut visited = HashSet::new();
        self.despawn_recursive(entity, &mut visited);
        true
    }

    fn despawn_recursive(&mut self, entity: Entity, visited: &mut HashSet<Entity>) {
        if !visited.insert(entity) {
            return;
        }
        for related in self.related_entities(entity) {
            if visited.contains(&related) {
                continue;
            }
            if !self.entities.contains(related) {
                panic!("despawning {entity} cascades into {related}, which does not exist");
            }
            self.despawn_recursive(related, visited);
        }
        self.despawn_single(entity);
    }

    fn related_entities(&self, entity: Entity) -> Vec<Entity> {
        let Some(location) = self.entities.get(entity) else {
            return Vec::new();
        };
        self.archetype(location.archetype_id)
            .signature()
            .iter()
            .filter_map(|&id| self.components.info(id).related)
            .flat_map(|related| related(self, entity))
            .collect()
    }

    /// Despawns only `entity`; relationship hooks still run.
    pub fn despawn_single(&mut self, entity: Entity) -> bool {
        let Some(location) = self.entities.get(entity) else {
            return false;
        };
        let signature = self.archetype(location.archetype_id).signature().to_vec();
        for id in signature {
            if let Some(hook) = self.components.info(id).on_remove {
                hook(self, entity);
            }
        }

        let Some(location) = self.entities.get(entity) else {
            return false;
        };
        let archetype = self
            .archetypes
            .get_mut(location.archetype_id)
            .unwrap_or_else(|| panic!("{entity} points at missing archetype {:?}", location.archetype_id));
        let signature = archetype.signature().to_vec();
        if let Some(moved) = archetype.swap_remove(location.row) {
            self.entities.set(moved, location);
        }
        self.entities.free(entity);
        for id in signature {
            self.removed_components.send(id, entity);
        }
        log::trace!("despawned {entity}");
        true
    }

    fn archetype(&self, id: ArchetypeId) -> &crate::archetype::Archetype {
        self.archetypes
            .get(id)
            .unwrap_or_else(|| panic!("archetype {id:?} does not exist"))
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter().map(|(entity, _)| entity)
    }

    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.get(entity)
    }

    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeId> {
        self.entities.get(entity).map(|location| location.archetype_id)
    }

    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        match (self.components.get_id::<C>(), self.entities.get(entity)) {
            (Some(id), Some(location)) => self.archetype(location.archetype_id).contains(id),
            _ => false,
        }
    }

    pub fn get<C: Component>(&self, entity: Entity) -> Option<&C> {
        let id = self.components.get_id::<C>()?;
        let location = self.entities.get(entity)?;
        self.archetype(location.archetype_id)
            .typed_column::<C>(id)?
            .get(location.row)
    }

    /// Panics for immutable components, which can only be replaced.
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Option<Mut<'_, C>> {
        if C::KIND == ComponentKind::Immutable {
            panic!(
                "cannot take a mutable reference to {}: it is immutable",
                type_name::<C>()
            );
        }
        let tick = self.change_tick();
        let id = self.components.get_id::<C>()?;
        let location = self.entities.get(entity)?;
        let column = self
            .archetypes
            .get_mut(location.archetype_id)?
            .typed_column_mut::<C>(id)?;
        Some(Mut::new(column, location.row, tick))
    }

    /// Mutable access without change detection or the immutability check.
    pub(crate) fn get_mut_untracked<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        let id = self.components.get_id::<C>()?;
        let location = self.entities.get(entity)?;
        self.archetypes
            .get_mut(location.archetype_id)?
            .typed_column_mut::<C>(id)?
            .get_mut(location.row)
    }

    /// The added and changed ticks of `entity`'s `C`.
    pub fn component_ticks<C: Component>(&self, entity: Entity) -> Option<(Tick, Tick)> {
        let id = self.components.get_id::<C>()?;
        let location = self.entities.get(entity)?;
        self.archetype(location.archetype_id)
            .row_ticks(id, location.row)
    }

    pub fn query<D: QueryData>(&mut self) -> QueryState<D, ()> {
        QueryState::new(self)
    }

    pub fn query_filtered<D: QueryData, F: QueryFilter>(&mut self) -> QueryState<D, F> {
        QueryState::new(self)
    }

    // --------------------------------------------------------------- resources

    pub fn insert_resource<R: Resource>(&mut self, resource: R) {
        let tick = self.change_tick();
        self.resources.insert(resource, tick);
    }

    pub fn init_resource<R: Resource + Default>(&mut self) {
        if !self.resources.contains::<R>() {
            self.insert_resource(R::default());
        }
    }

    pub fn remove_resource<R: Resource>(&mut self) -> Option<R> {
        self.resources.remove::<R>()
    }

    pub fn contains_resource<R: Resource>(&self) -> bool {
        self.resources.contains::<R>()
    }

    pub fn get_resource<R: Resource>(&self) -> Option<&R> {
        self.resources.get::<R>()
    }

    pub fn get_resource_mut<R: Resource>(&mut self) -> Option<&mut R> {
        self.resources.get_mut::<R>()
    }

    pub fn resource<R: Resource>(&self) -> &R {
        self.get_resource::<R>()
            .unwrap_or_else(|| panic!("resource {} does not exist", type_name::<R>()))
    }

    pub fn resource_mut<R: Resource>(&mut self) -> &mut R {
        self.get_resource_mut::<R>()
            .unwrap_or_else(|| panic!("resource {} does not exist", type_name::<R>()))
    }

    /// Runs `f` with the resource taken out of the world, then puts it back.
    pub fn resource_scope<R: Resource, T>(&mut self, f: impl FnOnce(&mut World, &mut R) -> T) -> T {
        let mut resource = self
            .remove_resource::<R>()
            .unwrap_or_else(|| panic!("resource {} does not exist", type_name::<R>()));
        let result = f(self, &mut resource);
        self.insert_resource(resource);
        result
    }

    // ----------------------------------------------------------------- events

    /// Registers the message stream for `E`; its buffers swap once per frame.
    pub fn add_event<E: Event>(&mut self) {
        if self.resources.contains::<Events<E>>() {
            return;
        }
        self.insert_resource(Events::<E>::default());
        self.event_updaters.push((TypeId::of::<E>(), |world| {
            if let Some(events) = world.get_resource_mut::<Events<E>>() {
                events.update();
            }
        }));
    }

    pub fn send_event<E: Event>(&mut self, event: E) {
        self.add_event::<E>();
        self.resource_mut::<Events<E>>().send(event);
    }

    /// Swaps message and removal buffers. Runs after `Last` in every frame.
    pub fn clear_trackers(&mut self) {
        let updaters: Vec<fn(&mut World)> = self.event_updaters.iter().map(|(_, update)| *update).collect();
        for update in updaters {
            update(self);
        }
        self.removed_components.update();
        log::trace!("swapped {} message buffers", self.event_updaters.len());
    }

    // --------------------------------------------------------------- observers

    pub fn add_observer(&mut self, observer: Observer) -> Entity {
        log::debug!("adding observer for {}", observer.event_name());
        self.spawn(observer)
    }

    /// Runs every observer of `E` that watches no particular entity.
    pub fn trigger<E: Event>(&mut self, event: E) {
        self.trigger_internal(event, None);
    }

    /// Runs every observer of `E` that watches `target` or nothing in particular.
    pub fn trigger_targets<E: Event>(&mut self, event: E, target: Entity) {
        self.trigger_internal(event, Some(target));
    }

    fn trigger_internal<E: Event>(&mut self, event: E, target: Option<Entity>) {
        let observer_id = self.components.register::<Observer>();
        let event_type = TypeId::of::<E>();
        let observers: Vec<Entity> = self
            .archetypes
            .iter()
            .filter_map(|archetype| {
                let column = archetype.typed_column::<Observer>(observer_id)?;
                Some(
                    column
                        .values()
                        .iter()
                        .zip(archetype.entities())
                        .filter(|(observer, _)| observer.watches(event_type, target))
                        .map(|(_, entity)| *entity)
                        .collect::<Vec<_>>(),
                )
            })
            .flatten()
            .collect();

        log::trace!(
            "triggering {} on {:?} for {} observers",
            type_name::<E>(),
            target,
            observers.len()
        );
        self.trigger_stack.push(TriggerContext::new(event, target));
        for observer in observers {
            let Some(mut system) = self
                .get_mut_untracked::<Observer>(observer)
                .and_then(Observer::take_system)
            else {
                log::warn!(
                    "observer {observer} of {} triggered itself and was skipped",
                    type_name::<E>()
                );
                continue;
            };
            system.run(self);
            if let Some(slot) = self.get_mut_untracked::<Observer>(observer) {
                slot.put_system(system);
            }
        }
        self.trigger_stack.pop();
    }

    // ---------------------------------------------------------------- commands

    pub fn push_command(&mut self, command: impl Command) {
        self.command_queue.push(command);
    }

    pub(crate) fn append_commands(&mut self, queue: &mut CommandQueue) {
        self.command_queue.append(queue);
    }

    /// Applies deferred commands until none are left, including those queued
    /// by the commands themselves.
    ///
    /// Each pass owns the commands queued so far, so a system run by one of
    /// them only flushes what it queued itself and later commands keep their
    /// place in line.
    pub fn flush(&mut self) {
        let mut applied = 0usize;
        while !self.command_queue.is_empty() {
            let mut queue = std::mem::take(&mut self.command_queue);
            while let Some(command) = queue.pop() {
                command.execute(self);
                applied += 1;
            }
        }
        if applied > 0 {
            log::trace!("flushed {applied} commands");
        }
    }

    // ----------------------------------------------------------------- systems

    pub fn add_systems<M>(&mut self, label: impl Into<ScheduleLabel>, systems: impl IntoSystemConfigs<M>) {
        self.schedules.add_systems(label.into(), systems.into_configs());
    }

    pub fn configure_sets(&mut self, label: impl Into<ScheduleLabel>, sets: impl IntoSetConfigs) {
        self.schedules.configure_sets(label.into(), sets.into_set_configs());
    }

    pub fn run_schedule(&mut self, label: impl Into<ScheduleLabel>) {
        let label = label.into();
        if label == ScheduleLabel::Main {
            crate::schedule::run_main(self);
        } else {
            self.run_schedule_systems(label);
        }
    }

    /// Runs the systems of one schedule without fanning out, even for `Main`.
    pub(crate) fn run_schedule_systems(&mut self, label: ScheduleLabel) {
        let Some(mut schedule) = self.schedules.take(label) else {
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| schedule.run(self)));
        self.schedules.restore(schedule);
        if let Err(payload) = result {
            log::error!("a system in schedule {label:?} panicked");
            panic::resume_unwind(payload);
        }
    }

    /// Drives one frame: the startup schedules the first time, then `Main`.
    pub fn update(&mut self) {
        if !self.startup_done {
            self.startup_done = true;
            for label in ScheduleLabel::STARTUP {
                self.run_schedule_systems(label);
            }
        }
        self.run_schedule(ScheduleLabel::Main);
    }

    pub fn register_system<O: 'static, M, S>(&mut self, system: S) -> SystemId<O>
    where
        S: IntoSystem<M>,
        S::System: System<Out = O>,
    {
        let mut system = system.into_system();
        system.initialize(self);
        self.registered_systems.register(Box::new(system))
    }

    pub fn unregister_system<O: 'static>(&mut self, id: SystemId<O>) -> bool {
        self.registered_systems.remove(id)
    }

    pub fn run_system<O: 'static>(&mut self, id: SystemId<O>) -> Result<O, RunSystemError> {
        let mut system = self.registered_systems.take(id)?;
        let output = system.run(self);
        self.registered_systems.restore(id, system);
        Ok(output)
    }

    /// Runs a registered system whose parameters include [`In<I>`](crate::system::In).
    pub fn run_system_with<I: 'static, O: 'static>(
        &mut self,
        id: SystemId<O>,
        input: I,
    ) -> Result<O, RunSystemError> {
        self.input_stack.push(Some(Box::new(input)));
        let result = self.run_system(id);
        self.input_stack.pop();
        result
    }

    /// Builds, runs and discards a system.
    pub fn run_system_once<M, S: IntoSystem<M>>(&mut self, system: S) -> <S::System as System>::Out {
        let mut system = system.into_system();
        system.initialize(self);
        system.run(self)
    }

    pub fn run_system_once_with<I: 'static, M, S: IntoSystem<M>>(
        &mut self,
        system: S,
        input: I,
    ) -> <S::System as System>::Out {
        self.input_stack.push(Some(Box::new(input)));
        let output = self.run_system_once(system);
        self.input_stack.pop();
        output
    }

    /// Runs a system and routes its output through [`SystemOutput`], the way
    /// schedules do.
    pub(crate) fn run_system_reporting<O: SystemOutput + 'static>(&mut self, id: SystemId<O>) {
        let name = self.registered_systems.name(id);
        match self.run_system(id) {
            Ok(output) => output.handle(name.unwrap_or("<unregistered>")),
            Err(error) => log::error!("{error}"),
        }
    }

    // ----------------------------------------------------------------- plugins

    /// Applies `plugin` once; adding the same plugin type again does nothing.
    pub fn add_plugin<P: Plugin>(&mut self, plugin: P) -> &mut Self {
        if self.plugins.insert(TypeId::of::<P>()) {
            log::debug!("adding plugin {}", type_name::<P>());
            plugin.init(self);
        } else {
            log::debug!("plugin {} was already added", type_name::<P>());
        }
        self
    }

    // ------------------------------------------------------------------- ticks

    /// Rebases every stored tick once the counter grows past
    /// [`Tick::RENORMALISE_THRESHOLD`]. Ticks older than [`Tick::MAX_AGE`]
    /// collapse to zero.
    pub fn renormalise_ticks(&mut self) {
        let current = self.change_tick().get();
        if current < Tick::RENORMALISE_THRESHOLD {
            return;
        }
        let offset = current - Tick::MAX_AGE;
        self.rebase_ticks(offset);
        log::debug!("renormalised ticks by {offset}");
    }

    pub(crate) fn rebase_ticks(&mut self, offset: u32) {
        for archetype in self.archetypes.iter_mut() {
            archetype.rebase_ticks(offset);
        }
        self.resources.rebase_ticks(offset);
        self.schedules.rebase_ticks(offset);
        self.registered_systems.rebase_ticks(offset);

        let observer_id = self.components.register::<Observer>();
        for archetype in self.archetypes.iter_mut() {
            if let Some(column) = archetype.typed_column_mut::<Observer>(observer_id) {
                for row in 0..crate::column::ErasedColumn::len(column) {
                    if let Some(observer) = column.get_mut(row) {
                        observer.rebase_ticks(offset);
                    }
                }
            }
        }

        let mut tick = self.change_tick();
        tick.rebase(offset);
        self.change_tick.set(tick);
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

    #[derive(Component, Debug, Clone, PartialEq)]
    #[component(comparable)]
    struct Health(u32);

    #[derive(Component)]
    #[component(immutable)]
    struct Seed(#[allow(dead_code)] u64);

    fn assert_consistent(world: &World) {
        for archetype in world.archetypes().iter() {
            assert!(archetype.is_consistent(), "archetype {:?}", archetype.signature());
            for (row, entity) in archetype.entities().iter().enumerate() {
                assert_eq!(
                    world.location(*entity),
                    Some(EntityLocation {
                        archetype_id: archetype.id(),
                        row
                    })
                );
            }
        }
    }

    #[test]
    fn insert_then_remove_restores_archetype() {
        let mut world = World::new();
        let e = world.spawn(A(1));
        let before = world.archetype_of(e);

        world.insert(e, B(2));
        assert_ne!(world.archetype_of(e), before);
        world.remove::<B>(e);

        assert_eq!(world.archetype_of(e), before);
        assert_eq!(world.get::<A>(e), Some(&A(1)));
        assert_consistent(&world);
    }

    #[test]
    fn inserting_twice_replaces_value() {
        let mut world = World::new();
        let e = world.spawn(A(1));
        let (added, _) = world.component_ticks::<A>(e).unwrap();

        world.increment_tick();
        world.insert(e, A(2));

        let (added_after, changed_after) = world.component_ticks::<A>(e).unwrap();
        assert_eq!(world.get::<A>(e), Some(&A(2)));
        assert_eq!(added, added_after);
        assert!(changed_after.is_newer_than(added));
    }

    #[test]
    fn despawn_moves_last_row() {
        let mut world = World::new();
        let first = world.spawn(A(1));
        let second = world.spawn(A(2));
        let third = world.spawn(A(3));

        assert!(world.despawn(first));
        assert!(!world.contains(first));
        assert_eq!(world.get::<A>(third), Some(&A(3)));
        assert_eq!(world.get::<A>(second), Some(&A(2)));
        assert_eq!(world.entity_count(), 2);
        assert_consistent(&world);
    }

    #[test]
    fn despawning_missing_entity_is_reported() {
        let mut world = World::new();
        let e = world.spawn(A(1));
        world.despawn(e);
        assert!(!world.despawn(e));
    }

    #[test]
    fn get_mut_marks_only_real_changes() {
        let mut world = World::new();
        let e = world.spawn(Health(10));
        let (_, changed) = world.component_ticks::<Health>(e).unwrap();

        world.increment_tick();
        {
            let health = world.get_mut::<Health>(e).unwrap();
            assert_eq!(health.0, 10);
        }
        assert_eq!(world.component_ticks::<Health>(e).unwrap().1, changed);

        world.get_mut::<Health>(e).unwrap().0 = 5;
        assert!(world.component_ticks::<Health>(e).unwrap().1.is_newer_than(changed));
    }

    #[test]
    #[should_panic(expected = "immutable")]
    fn immutable_components_reject_get_mut() {
        let mut world = World::new();
        let e = world.spawn(Seed(3));
        world.get_mut::<Seed>(e);
    }

    #[test]
    fn resources_overwrite_and_remove() {
        #[derive(crate::resource::Resource, Debug, PartialEq)]
        struct Gravity(i32);

        let mut world = World::new();
        world.insert_resource(Gravity(1));
        world.insert_resource(Gravity(2));
        assert_eq!(world.get_resource::<Gravity>(), Some(&Gravity(2)));
        world.resource_mut::<Gravity>().0 = 3;
        assert_eq!(world.remove_resource::<Gravity>(), Some(Gravity(3)));
        assert!(!world.contains_resource::<Gravity>());
    }

    #[test]
    fn removals_are_recorded() {
        let mut world = World::new();
        let e = world.spawn((A(1), B(1)));
        let b = world.register_component::<B>();
        world.remove::<B>(e);
        assert_eq!(world.removed_components.iter_current(b).collect::<Vec<_>>(), vec![e]);
    }

    #[test]
    fn deferred_commands_drain_to_fixed_point() {
        let mut world = World::new();
        world.push_command(|world: &mut World| {
            world.spawn(A(1));
            world.push_command(|world: &mut World| {
                world.spawn(A(2));
            });
        });
        world.flush();
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    fn renormalising_keeps_change_detection_working() {
        use crate::query::{Changed, Query};

        let mut world = World::new();
        let changed = world.register_system(|query: Query<Entity, Changed<Health>>| query.iter().count());
        let e = world.spawn(Health(1));
        assert_eq!(world.run_system(changed), Ok(1));

        world.change_tick.set(Tick::new(Tick::RENORMALISE_THRESHOLD + 10));
        world.get_mut::<Health>(e).unwrap().0 = 2;
        world.update();

        assert!(world.change_tick().get() < Tick::RENORMALISE_THRESHOLD);
        assert_eq!(world.run_system(changed), Ok(1));
        assert_eq!(world.run_system(changed), Ok(0));
    }

    #[test]
    fn a_panicking_system_leaves_its_schedule_usable() {
        use crate::resource::{ResMut, Resource};

        #[derive(Resource, Default)]
        struct Runs(u32);

        let mut world = World::new();
        world.init_resource::<Runs>();
        world.add_systems(ScheduleLabel::Update, |mut runs: ResMut<Runs>| {
            runs.0 += 1;
            if runs.0 == 1 {
                panic!("boom");
            }
        });

        let first = panic::catch_unwind(AssertUnwindSafe(|| world.update()));
        assert!(first.is_err());
        assert!(world.schedules.get_schedule(ScheduleLabel::Update).is_some());

        world.update();
        assert_eq!(world.resource::<Runs>().0, 2);
    }
}
