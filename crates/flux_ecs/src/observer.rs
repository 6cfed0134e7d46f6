use crate::component::Component;
use crate::entity::Entity;
use crate::event::Event;
use crate::system::{BoxedSystem, IntoSystem, System, SystemMeta, SystemParam};
use crate::world::{UnsafeWorldCell, World};
use std::any::{type_name, Any, TypeId};

/// An entity-scoped callback for one event type.
///
/// Observers live on their own entities. [`World::trigger`] runs those with
/// no targets; [`World::trigger_targets`] additionally runs those watching the
/// given entity.
pub struct Observer {
    event: TypeId,
    event_name: &'static str,
    targets: Vec<Entity>,
    /// Taken out while the observer runs.
    system: Option<BoxedSystem>,
}

impl Component for Observer {}

impl Observer {
    pub fn new<E: Event, M>(system: impl IntoSystem<M, System: System<Out = ()>>) -> Self {
        Self {
            event: TypeId::of::<E>(),
            event_name: type_name::<E>(),
            targets: Vec::new(),
            system: Some(Box::new(system.into_system())),
        }
    }

    pub fn with_target(mut self, entity: Entity) -> Self {
        if !self.targets.contains(&entity) {
            self.targets.push(entity);
        }
        self
    }

    pub fn event_name(&self) -> &'static str {
        self.event_name
    }

    pub fn targets(&self) -> &[Entity] {
        &self.targets
    }

    pub(crate) fn watches(&self, event: TypeId, target: Option<Entity>) -> bool {
        if self.event != event {
            return false;
        }
        self.targets.is_empty() || target.is_some_and(|target| self.targets.contains(&target))
    }

    pub(crate) fn take_system(&mut self) -> Option<BoxedSystem> {
        self.system.take()
    }

    pub(crate) fn put_system(&mut self, system: BoxedSystem) {
        self.system = Some(system);
    }

    pub(crate) fn rebase_ticks(&mut self, offset: u32) {
        if let Some(system) = &mut self.system {
            system.rebase_ticks(offset);
        }
    }
}

/// The event currently being delivered to observers.
pub(crate) struct TriggerContext {
    event: Box<dyn Any>,
    target: Option<Entity>,
}

impl TriggerContext {
    pub(crate) fn new<E: Event>(event: E, target: Option<Entity>) -> Self {
        Self {
            event: Box::new(event),
            target,
        }
    }
}

/// The event an observer was triggered with.
pub struct On<'w, E: Event> {
    event: &'w E,
    target: Option<Entity>,
}

impl<'w, E: Event> On<'w, E> {
    pub fn event(&self) -> &'w E {
        self.event
    }

    /// The entity the event was triggered on, if any.
    pub fn target(&self) -> Option<Entity> {
        self.target
    }
}

impl<E: Event> SystemParam for On<'_, E> {
    type State = ();

    type Item<'world, 'state> = On<'world, E>;

    fn init_state(_: &mut World, _: &mut SystemMeta) -> Self::State {}

    unsafe fn get_param<'world, 'state>(
        _: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        // SAFETY: the trigger stack is only pushed and popped around observer
        // runs, never while a parameter borrows it.
        let context = unsafe { world.trigger_stack() }.last().unwrap_or_else(|| {
            panic!(
                "system '{}' takes On<{}> but is not running as an observer",
                meta.name(),
                type_name::<E>()
            )
        });
        let event = context.event.downcast_ref::<E>().unwrap_or_else(|| {
            panic!(
                "system '{}' takes On<{}> but was triggered by another event",
                meta.name(),
                type_name::<E>()
            )
        });
        On {
            event,
            target: context.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Commands;
    use crate::resource::{ResMut, Resource};

    #[derive(Event, Debug, Clone, PartialEq)]
    struct Hit(u32);

    #[derive(Event)]
    struct Other;

    #[derive(Resource, Default)]
    struct Received(Vec<(u32, Option<Entity>)>);

    fn record(hit: On<Hit>, mut received: ResMut<Received>) {
        received.0.push((hit.event().0, hit.target()));
    }

    #[test]
    fn untargeted_observers_see_every_trigger() {
        let mut world = World::new();
        world.init_resource::<Received>();
        world.add_observer(Observer::new::<Hit, _>(record));
        let target = world.spawn_empty();

        world.trigger(Hit(1));
        world.trigger_targets(Hit(2), target);
        world.trigger(Other);

        assert_eq!(world.resource::<Received>().0, vec![(1, None), (2, Some(target))]);
    }

    #[test]
    fn targeted_observers_only_see_their_entity() {
        let mut world = World::new();
        world.init_resource::<Received>();
        let watched = world.spawn_empty();
        let ignored = world.spawn_empty();
        world.add_observer(Observer::new::<Hit, _>(record).with_target(watched));

        world.trigger_targets(Hit(5), watched);
        world.trigger_targets(Hit(6), ignored);
        world.trigger(Hit(7));

        assert_eq!(world.resource::<Received>().0, vec![(5, Some(watched))]);
    }

    #[test]
    fn every_queued_trigger_reaches_the_observer() {
        let mut world = World::new();
        world.init_resource::<Received>();
        world.add_observer(Observer::new::<Hit, _>(record));
        world.run_system_once(|mut commands: Commands| {
            commands.trigger(Hit(1));
            commands.trigger(Hit(2));
        });
        assert_eq!(world.resource::<Received>().0, vec![(1, None), (2, None)]);
    }

    #[test]
    fn observers_attach_and_trigger_through_commands() {
        let mut world = World::new();
        world.init_resource::<Received>();
        let entity = world.run_system_once(|mut commands: Commands| {
            let entity = commands.spawn_empty().observe::<Hit, _>(record).id();
            commands.trigger_targets(Hit(3), entity);
            entity
        });
        assert_eq!(world.resource::<Received>().0, vec![(3, Some(entity))]);
    }

    #[test]
    fn observers_can_trigger_further_events() {
        let mut world = World::new();
        world.init_resource::<Received>();
        world.add_observer(Observer::new::<Other, _>(|mut commands: Commands| {
            commands.trigger(Hit(9));
        }));
        world.add_observer(Observer::new::<Hit, _>(record));
        world.trigger(Other);
        assert_eq!(world.resource::<Received>().0, vec![(9, None)]);
    }

    #[test]
    #[should_panic(expected = "not running as an observer")]
    fn on_outside_an_observer_panics() {
        let mut world = World::new();
        world.run_system_once(|_: On<Hit>| {});
    }
}
