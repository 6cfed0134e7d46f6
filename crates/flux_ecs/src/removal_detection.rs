use crate::component::{Component, ComponentId};
use crate::entity::Entity;
use crate::event::{Event, EventCursor, Events};
use crate::system::{SystemMeta, SystemParam};
use crate::world::{UnsafeWorldCell, World};
use std::collections::HashMap;
use std::marker::PhantomData;

/// An entity that lost a component, by removal or despawn.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RemovedComponentEntity(pub Entity);

impl Event for RemovedComponentEntity {}

/// One removal stream per component type, swapped with the message buffers.
#[derive(Default)]
pub(crate) struct RemovedComponentEvents {
    streams: HashMap<ComponentId, Events<RemovedComponentEntity>>,
}

impl RemovedComponentEvents {
    pub fn send(&mut self, component: ComponentId, entity: Entity) {
        self.streams
            .entry(component)
            .or_default()
            .send(RemovedComponentEntity(entity));
    }

    pub fn get(&self, component: ComponentId) -> Option<&Events<RemovedComponentEntity>> {
        self.streams.get(&component)
    }

    pub fn update(&mut self) {
        for stream in self.streams.values_mut() {
            stream.update();
        }
    }

    pub fn iter_current(&self, component: ComponentId) -> impl Iterator<Item = Entity> + '_ {
        self.streams
            .get(&component)
            .into_iter()
            .flat_map(|stream| stream.iter_current().map(|removed| removed.0))
    }
}

/// Entities that lost a `C` since this system last read the stream.
pub struct RemovedComponents<'w, 's, C: Component> {
    component: ComponentId,
    cursor: &'s mut EventCursor<RemovedComponentEntity>,
    events: &'w RemovedComponentEvents,
    _marker: PhantomData<C>,
}

impl<C: Component> RemovedComponents<'_, '_, C> {
    pub fn read(&mut self) -> impl Iterator<Item = Entity> + '_ {
        let events = self.events.get(self.component);
        let cursor = &mut *self.cursor;
        events
            .into_iter()
            .flat_map(move |events| cursor.read(events).map(|removed| removed.0))
    }

    pub fn len(&self) -> usize {
        self.events
            .get(self.component)
            .map_or(0, |events| self.cursor.len(events))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        if let Some(events) = self.events.get(self.component) {
            self.cursor.clear(events);
        }
    }
}

impl<C: Component> SystemParam for RemovedComponents<'_, '_, C> {
    type State = (ComponentId, EventCursor<RemovedComponentEntity>);

    type Item<'world, 'state> = RemovedComponents<'world, 'state, C>;

    fn init_state(world: &mut World, _meta: &mut SystemMeta) -> Self::State {
        (world.register_component::<C>(), EventCursor::default())
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        _meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        let (component, cursor) = state;
        RemovedComponents {
            component: *component,
            cursor,
            events: unsafe { world.removed_components() },
            _marker: PhantomData,
        }
    }
}
