use crate::resource::{Res, ResMut, Resource};
use crate::system::{Local, SystemMeta, SystemParam};
use crate::world::{UnsafeWorldCell, World};
use std::fmt;
use std::marker::PhantomData;

pub use flux_ecs_macros::Event;

/// A message type. Messages double as observer triggers.
pub trait Event: 'static {}

/// Position of a message in its stream.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId<E> {
    pub id: usize,
    _marker: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for EventId<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId<{}>({})", std::any::type_name::<E>(), self.id)
    }
}

struct EventInstance<E> {
    id: usize,
    event: E,
}

/// Double-buffered message stream.
///
/// Writers append to the current buffer. [`Events::update`] runs once per
/// frame, turning the current buffer into the previous one and dropping the
/// old previous buffer, so every message is readable during the frame it was
/// sent and the one after.
pub struct Events<E: Event> {
    previous: Vec<EventInstance<E>>,
    current: Vec<EventInstance<E>>,
    next_id: usize,
}

impl<E: Event> Default for Events<E> {
    fn default() -> Self {
        Self {
            previous: Vec::new(),
            current: Vec::new(),
            next_id: 0,
        }
    }
}

impl<E: Event> Resource for Events<E> {}

impl<E: Event> Events<E> {
    pub fn send(&mut self, event: E) -> EventId<E> {
        let id = self.next_id;
        self.next_id += 1;
        self.current.push(EventInstance { id, event });
        EventId {
            id,
            _marker: PhantomData,
        }
    }

    pub fn send_batch(&mut self, events: impl IntoIterator<Item = E>) {
        for event in events {
            self.send(event);
        }
    }

    pub fn update(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        self.current.clear();
    }

    /// Drops both buffers. Readers that have not caught up lose the messages.
    pub fn clear(&mut self) {
        self.previous.clear();
        self.current.clear();
    }

    pub fn len(&self) -> usize {
        self.previous.len() + self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty() && self.current.is_empty()
    }

    /// The id the next message will get.
    pub fn next_id(&self) -> usize {
        self.next_id
    }

    /// Every buffered message with an id of at least `from`, oldest first.
    pub fn iter_from(&self, from: usize) -> impl Iterator<Item = (usize, &E)> + '_ {
        self.previous
            .iter()
            .chain(self.current.iter())
            .filter(move |instance| instance.id >= from)
            .map(|instance| (instance.id, &instance.event))
    }

    pub fn iter_current(&self) -> impl Iterator<Item = &E> + '_ {
        self.current.iter().map(|instance| &instance.event)
    }

    pub fn get_reader(&self) -> EventCursor<E> {
        EventCursor::default()
    }
}

/// How far a reader has read into an [`Events`] stream.
pub struct EventCursor<E> {
    next: usize,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Default for EventCursor<E> {
    fn default() -> Self {
        Self {
            next: 0,
            _marker: PhantomData,
        }
    }
}

impl<E: Event> EventCursor<E> {
    /// Reads every message not seen yet and moves past them.
    pub fn read<'a>(&mut self, events: &'a Events<E>) -> impl Iterator<Item = &'a E> + use<'a, E> {
        let from = self.next;
        self.next = events.next_id();
        events.iter_from(from).map(|(_, event)| event)
    }

    pub fn len(&self, events: &Events<E>) -> usize {
        events.iter_from(self.next).count()
    }

    pub fn is_empty(&self, events: &Events<E>) -> bool {
        self.len(events) == 0
    }

    pub fn clear(&mut self, events: &Events<E>) {
        self.next = events.next_id();
    }
}

/// Reads messages of type `E` sent since this system last read them.
pub struct EventReader<'w, 's, E: Event> {
    cursor: Local<'s, EventCursor<E>>,
    events: Res<'w, Events<E>>,
}

impl<E: Event> EventReader<'_, '_, E> {
    pub fn read(&mut self) -> impl Iterator<Item = &E> + '_ {
        self.cursor.read(&self.events)
    }

    pub fn len(&self) -> usize {
        self.cursor.len(&self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty(&self.events)
    }

    /// Marks every pending message as read.
    pub fn clear(&mut self) {
        self.cursor.clear(&self.events);
    }
}

impl<E: Event> SystemParam for EventReader<'_, '_, E> {
    type State = (EventCursor<E>, ());

    type Item<'world, 'state> = EventReader<'world, 'state, E>;

    fn init_state(world: &mut World, meta: &mut SystemMeta) -> Self::State {
        world.add_event::<E>();
        (
            <Local<EventCursor<E>> as SystemParam>::init_state(world, meta),
            <Res<Events<E>> as SystemParam>::init_state(world, meta),
        )
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        let (cursor, events) = state;
        unsafe {
            EventReader {
                cursor: <Local<EventCursor<E>> as SystemParam>::get_param(cursor, meta, world),
                events: <Res<Events<E>> as SystemParam>::get_param(events, meta, world),
            }
        }
    }
}

/// Sends messages of type `E`.
pub struct EventWriter<'w, E: Event> {
    events: ResMut<'w, Events<E>>,
}

impl<E: Event> EventWriter<'_, E> {
    pub fn send(&mut self, event: E) -> EventId<E> {
        self.events.send(event)
    }

    pub fn send_batch(&mut self, events: impl IntoIterator<Item = E>) {
        self.events.send_batch(events);
    }
}

impl<E: Event> SystemParam for EventWriter<'_, E> {
    type State = ();

    type Item<'world, 'state> = EventWriter<'world, E>;

    fn init_state(world: &mut World, meta: &mut SystemMeta) -> Self::State {
        world.add_event::<E>();
        <ResMut<Events<E>> as SystemParam>::init_state(world, meta)
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        EventWriter {
            events: unsafe { <ResMut<Events<E>> as SystemParam>::get_param(state, meta, world) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Event, Debug, PartialEq)]
    struct Ping(u32);

    #[test]
    fn messages_live_for_two_updates() {
        let mut events = Events::<Ping>::default();
        let mut cursor = EventCursor::default();
        events.send(Ping(1));

        events.update();
        assert_eq!(events.len(), 1);
        events.update();
        assert!(events.is_empty());
        assert_eq!(cursor.read(&events).count(), 0);
    }

    #[test]
    fn cursor_reads_each_message_once() {
        let mut events = Events::<Ping>::default();
        let mut cursor = EventCursor::default();
        events.send(Ping(1));
        events.update();
        events.send(Ping(2));

        assert_eq!(cursor.read(&events).collect::<Vec<_>>(), vec![&Ping(1), &Ping(2)]);
        assert_eq!(cursor.read(&events).count(), 0);

        events.send(Ping(3));
        assert_eq!(cursor.len(&events), 1);
        cursor.clear(&events);
        assert!(cursor.is_empty(&events));
    }
}
