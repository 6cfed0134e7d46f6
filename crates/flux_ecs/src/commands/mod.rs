use crate::bundle::Bundle;
use crate::entity::{Entities, Entity};
use crate::event::Event;
use crate::observer::Observer;
use crate::resource::Resource;
use crate::system::parameter::SystemParam;
use crate::system::{IntoSystem, System, SystemId, SystemMeta, SystemOutput};
use crate::world::{UnsafeWorldCell, World};
use std::any::type_name;
use std::collections::VecDeque;
use std::marker::PhantomData;

/// A deferred world mutation.
pub trait Command: 'static {
    fn execute(self: Box<Self>, world: &mut World);
}

impl<F> Command for F
where
    F: FnOnce(&mut World) + 'static,
{
    fn execute(self: Box<Self>, world: &mut World) {
        (*self)(world)
    }
}

pub struct Spawn<B: Bundle> {
    pub entity: Entity,
    pub bundle: B,
}

impl<B: Bundle> Command for Spawn<B> {
    fn execute(self: Box<Self>, world: &mut World) {
        world.spawn_at(self.entity, self.bundle);
    }
}

pub struct Insert<B: Bundle> {
    pub entity: Entity,
    pub bundle: B,
}

impl<B: Bundle> Command for Insert<B> {
    fn execute(self: Box<Self>, world: &mut World) {
        world.insert(self.entity, self.bundle);
    }
}

pub struct Remove<B: Bundle> {
    pub entity: Entity,
    _marker: PhantomData<fn() -> B>,
}

impl<B: Bundle> Command for Remove<B> {
    fn execute(self: Box<Self>, world: &mut World) {
        world.remove::<B>(self.entity);
    }
}

pub struct Despawn {
    pub entity: Entity,
}

impl Command for Despawn {
    fn execute(self: Box<Self>, world: &mut World) {
        world.despawn(self.entity);
    }
}

pub struct InsertResource<T: Resource> {
    pub resource: T,
}

impl<T: Resource> Command for InsertResource<T> {
    fn execute(self: Box<Self>, world: &mut World) {
        world.insert_resource(self.resource);
    }
}

pub struct RemoveResource<T: Resource> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> Command for RemoveResource<T> {
    fn execute(self: Box<Self>, world: &mut World) {
        if world.remove_resource::<T>().is_none() {
            log::debug!("resource {} was already absent", type_name::<T>());
        }
    }
}

pub struct SendEvent<E: Event> {
    pub event: E,
}

impl<E: Event> Command for SendEvent<E> {
    fn execute(self: Box<Self>, world: &mut World) {
        world.send_event(self.event);
    }
}

pub struct Trigger<E: Event> {
    pub event: E,
    pub target: Option<Entity>,
}

impl<E: Event> Command for Trigger<E> {
    fn execute(self: Box<Self>, world: &mut World) {
        match self.target {
            Some(target) => world.trigger_targets(self.event, target),
            None => world.trigger(self.event),
        }
    }
}

/// Commands applied in the order they were pushed.
#[derive(Default)]
pub struct CommandQueue {
    commands: VecDeque<Box<dyn Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
        }
    }

    pub fn push(&mut self, command: impl Command) {
        self.commands.push_back(Box::new(command));
    }

    pub fn pop(&mut self) -> Option<Box<dyn Command>> {
        self.commands.pop_front()
    }

    /// Moves every command of `other` to the back of this queue.
    pub fn append(&mut self, other: &mut CommandQueue) {
        self.commands.append(&mut other.commands);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Queues world mutations from inside a system. They are applied after the
/// system returns.
pub struct Commands<'w, 's> {
    queue: &'s mut CommandQueue,
    entities: &'w Entities,
}

impl<'w, 's> Commands<'w, 's> {
    pub fn add(&mut self, command: impl Command) {
        self.queue.push(command);
    }

    /// Reserves an id now; the entity is stored when the commands are applied.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> EntityCommands<'_> {
        let entity = self.entities.reserve();
        self.queue.push(Spawn { entity, bundle });
        EntityCommands {
            entity,
            queue: self.queue,
        }
    }

    pub fn spawn_empty(&mut self) -> EntityCommands<'_> {
        self.spawn(())
    }

    pub fn entity(&mut self, entity: Entity) -> EntityCommands<'_> {
        EntityCommands {
            entity,
            queue: self.queue,
        }
    }

    pub fn insert_resource<T: Resource>(&mut self, resource: T) {
        self.queue.push(InsertResource { resource });
    }

    pub fn init_resource<T: Resource + Default>(&mut self) {
        self.queue.push(|world: &mut World| world.init_resource::<T>());
    }

    pub fn remove_resource<T: Resource>(&mut self) {
        self.queue.push(RemoveResource::<T> {
            _marker: PhantomData,
        });
    }

    pub fn send_event<E: Event>(&mut self, event: E) {
        self.queue.push(SendEvent { event });
    }

    /// Runs a registered system. An `Err` output panics the way it would in a
    /// schedule.
    pub fn run_system<O: SystemOutput + 'static>(&mut self, id: SystemId<O>) {
        self.queue
            .push(move |world: &mut World| world.run_system_reporting(id));
    }

    pub fn run_system_with<I: 'static, O: SystemOutput + 'static>(&mut self, id: SystemId<O>, input: I) {
        self.queue.push(move |world: &mut World| {
            world.input_stack.push(Some(Box::new(input)));
            world.run_system_reporting(id);
            world.input_stack.pop();
        });
    }

    pub fn trigger<E: Event>(&mut self, event: E) {
        self.queue.push(Trigger { event, target: None });
    }

    pub fn trigger_targets<E: Event>(&mut self, event: E, target: Entity) {
        self.queue.push(Trigger {
            event,
            target: Some(target),
        });
    }
}

/// Deferred operations on one entity.
pub struct EntityCommands<'a> {
    entity: Entity,
    queue: &'a mut CommandQueue,
}

impl EntityCommands<'_> {
    pub fn id(&self) -> Entity {
        self.entity
    }

    pub fn insert<B: Bundle>(&mut self, bundle: B) -> &mut Self {
        self.queue.push(Insert {
            entity: self.entity,
            bundle,
        });
        self
    }

    pub fn remove<B: Bundle>(&mut self) -> &mut Self {
        self.queue.push(Remove::<B> {
            entity: self.entity,
            _marker: PhantomData,
        });
        self
    }

    pub fn despawn(&mut self) {
        self.queue.push(Despawn { entity: self.entity });
    }

    /// Spawns an observer of `E` that only fires for this entity.
    pub fn observe<E: Event, M>(&mut self, system: impl IntoSystem<M, System: System<Out = ()>>) -> &mut Self {
        let observer = Observer::new::<E, M>(system).with_target(self.entity);
        self.queue.push(move |world: &mut World| {
            world.add_observer(observer);
        });
        self
    }
}

impl SystemParam for Commands<'_, '_> {
    type State = CommandQueue;

    type Item<'world, 'state> = Commands<'world, 'state>;

    fn init_state(_: &mut World, _: &mut SystemMeta) -> Self::State {
        CommandQueue::new()
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        _: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        Commands {
            queue: state,
            // SAFETY: ids are reserved through a `Cell`; nothing borrows the
            // index mutably while systems run.
            entities: unsafe { world.entities() },
        }
    }

    fn apply_buffers(state: &mut Self::State, meta: &SystemMeta, world: &mut World) {
        if !state.is_empty() {
            log::trace!("system '{}' queued {} commands", meta.name(), state.len());
            world.append_commands(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::resource::{Res, ResMut};
    use crate::system::In;

    #[derive(Component, Debug, PartialEq)]
    struct Marker(u32);

    #[derive(Resource, Debug, Default, PartialEq)]
    struct Score(u32);

    #[test]
    fn spawned_ids_are_valid_for_later_commands() {
        let mut world = World::new();
        let spawned = world.run_system_once(|mut commands: Commands| {
            let entity = commands.spawn(Marker(1)).id();
            commands.entity(entity).insert(Marker(2));
            entity
        });
        assert_eq!(world.get::<Marker>(spawned), Some(&Marker(2)));
    }

    #[test]
    fn commands_apply_in_push_order() {
        let mut world = World::new();
        world.run_system_once(|mut commands: Commands| {
            commands.insert_resource(Score(1));
            commands.add(|world: &mut World| world.resource_mut::<Score>().0 *= 10);
            commands.insert_resource(Score(5));
        });
        assert_eq!(world.resource::<Score>(), &Score(5));
    }

    #[test]
    fn resources_can_be_initialised_and_removed() {
        let mut world = World::new();
        world.run_system_once(|mut commands: Commands| commands.init_resource::<Score>());
        assert_eq!(world.resource::<Score>(), &Score(0));
        world.run_system_once(|mut commands: Commands| commands.remove_resource::<Score>());
        assert!(!world.contains_resource::<Score>());
    }

    #[test]
    fn despawn_and_remove_are_deferred() {
        let mut world = World::new();
        let kept = world.spawn(Marker(1));
        let gone = world.spawn(Marker(2));
        world.run_system_once(move |mut commands: Commands| {
            commands.entity(kept).remove::<Marker>();
            commands.entity(gone).despawn();
        });
        assert!(world.contains(kept));
        assert!(!world.has::<Marker>(kept));
        assert!(!world.contains(gone));
    }

    #[test]
    fn registered_systems_run_through_commands() {
        let mut world = World::new();
        world.insert_resource(Score(0));
        let bump = world.register_system(|In(amount): In<u32>, mut score: ResMut<Score>| {
            score.0 += amount;
        });
        world.run_system_once(move |mut commands: Commands| {
            commands.run_system_with(bump, 4u32);
            commands.run_system_with(bump, 3u32);
        });
        let total = world.run_system_once(|score: Res<Score>| score.0);
        assert_eq!(total, 7);
    }
}
