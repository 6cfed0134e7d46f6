use crate::system::{SystemMeta, SystemParam};
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

pub use flux_ecs_macros::Resource;

/// A singleton value stored in the [`World`], keyed by its type.
pub trait Resource: 'static {}

struct ResourceCell {
    name: &'static str,
    added: Tick,
    changed: Tick,
    value: Box<dyn Any>,
}

/// Type-keyed resource storage.
///
/// Every resource lives in its own heap cell so a system can hold references
/// to several of them at once. Inserting over an existing resource writes into
/// the same cell.
pub struct Resources {
    cells: HashMap<TypeId, NonNull<ResourceCell>>,
}

impl Resources {
    pub fn new() -> Self {
        Self {
            cells: HashMap::new(),
        }
    }

    pub fn insert<T: Resource>(&mut self, value: T, tick: Tick) {
        match self.cells.get(&TypeId::of::<T>()) {
            Some(cell) => {
                // SAFETY: the cell is owned by this map and `&mut self` excludes other borrows.
                let cell = unsafe { &mut *cell.as_ptr() };
                let slot = cell
                    .value
                    .downcast_mut::<T>()
                    .unwrap_or_else(|| panic!("resource cell for {} holds another type", type_name::<T>()));
                *slot = value;
                cell.changed = tick;
            }
            None => {
                let cell = Box::new(ResourceCell {
                    name: type_name::<T>(),
                    added: tick,
                    changed: tick,
                    value: Box::new(value),
                });
                self.cells
                    .insert(TypeId::of::<T>(), NonNull::from(Box::leak(cell)));
            }
        }
    }

    pub fn get<T: Resource>(&self) -> Option<&T> {
        let cell = self.cells.get(&TypeId::of::<T>())?;
        // SAFETY: shared borrow of the map, no `&mut` to the cell can be alive.
        unsafe { (*cell.as_ptr()).value.downcast_ref() }
    }

    pub fn get_mut<T: Resource>(&mut self) -> Option<&mut T> {
        let cell = self.cells.get(&TypeId::of::<T>())?;
        unsafe { (*cell.as_ptr()).value.downcast_mut() }
    }

    pub fn remove<T: Resource>(&mut self) -> Option<T> {
        let cell = self.cells.remove(&TypeId::of::<T>())?;
        // SAFETY: the pointer came from `Box::leak` and has just left the map.
        let cell = unsafe { Box::from_raw(cell.as_ptr()) };
        cell.value.downcast().ok().map(|value| *value)
    }

    pub fn contains<T: Resource>(&self) -> bool {
        self.cells.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Raw access used by system parameters.
    ///
    /// # Safety
    /// `this` must be valid, and the caller must not create a second mutable
    /// reference to the same resource while the returned pointers are in use.
    pub(crate) unsafe fn cell_ptr<T: Resource>(this: *const Resources) -> Option<ResourcePtr<T>> {
        let cell = unsafe { (*this).cells.get(&TypeId::of::<T>())?.as_ptr() };
        let value = unsafe { (*cell).value.downcast_mut::<T>()? };
        Some(ResourcePtr {
            value: NonNull::from(value),
            added: unsafe { NonNull::new_unchecked(&raw mut (*cell).added) },
            changed: unsafe { NonNull::new_unchecked(&raw mut (*cell).changed) },
        })
    }

    pub(crate) fn rebase_ticks(&mut self, offset: u32) {
        for cell in self.cells.values() {
            let cell = unsafe { &mut *cell.as_ptr() };
            cell.added.rebase(offset);
            cell.changed.rebase(offset);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cells
            .values()
            .map(|cell| unsafe { (*cell.as_ptr()).name })
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        for (_, cell) in self.cells.drain() {
            drop(unsafe { Box::from_raw(cell.as_ptr()) });
        }
    }
}

pub(crate) struct ResourcePtr<T> {
    pub value: NonNull<T>,
    pub added: NonNull<Tick>,
    pub changed: NonNull<Tick>,
}

/// Shared access to a resource from a system.
///
/// Panics when the resource is missing; use `Option<Res<T>>` (or
/// [`ResOpt`]) when it may be absent.
pub struct Res<'w, T: Resource> {
    value: &'w T,
    added: Tick,
    changed: Tick,
    last_run: Tick,
}

pub type ResOpt<'w, T> = Option<Res<'w, T>>;

impl<'w, T: Resource> Res<'w, T> {
    pub fn into_inner(self) -> &'w T {
        self.value
    }

    /// Inserted since the system last ran.
    pub fn is_added(&self) -> bool {
        self.added.is_newer_than(self.last_run)
    }

    /// Inserted or mutably accessed since the system last ran.
    pub fn is_changed(&self) -> bool {
        self.changed.is_newer_than(self.last_run)
    }
}

impl<T: Resource> Deref for Res<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<T: Resource + std::fmt::Debug> std::fmt::Debug for Res<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Res").field(self.value).finish()
    }
}

/// Exclusive access to a resource from a system. Dereferencing mutably marks
/// the resource changed.
pub struct ResMut<'w, T: Resource> {
    value: &'w mut T,
    added: Tick,
    changed: &'w mut Tick,
    last_run: Tick,
    this_run: Tick,
}

impl<'w, T: Resource> ResMut<'w, T> {
    pub fn is_added(&self) -> bool {
        self.added.is_newer_than(self.last_run)
    }

    pub fn is_changed(&self) -> bool {
        self.changed.is_newer_than(self.last_run)
    }

    /// Mutable access that leaves the change tick alone.
    pub fn bypass_change_detection(&mut self) -> &mut T {
        self.value
    }
}

impl<T: Resource> Deref for ResMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<T: Resource> DerefMut for ResMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        *self.changed = self.this_run;
        self.value
    }
}

unsafe fn fetch_res<'w, T: Resource>(meta: &SystemMeta, world: UnsafeWorldCell<'w>) -> Option<Res<'w, T>> {
    let ptr = unsafe { world.resource_ptr::<T>()? };
    Some(Res {
        value: unsafe { ptr.value.as_ref() },
        added: unsafe { *ptr.added.as_ptr() },
        changed: unsafe { *ptr.changed.as_ptr() },
        last_run: meta.last_run,
    })
}

unsafe fn fetch_res_mut<'w, T: Resource>(meta: &SystemMeta, world: UnsafeWorldCell<'w>) -> Option<ResMut<'w, T>> {
    let mut ptr = unsafe { world.resource_ptr::<T>()? };
    Some(ResMut {
        value: unsafe { ptr.value.as_mut() },
        added: unsafe { *ptr.added.as_ptr() },
        changed: unsafe { ptr.changed.as_mut() },
        last_run: meta.last_run,
        this_run: meta.this_run,
    })
}

fn missing_resource<T>(meta: &SystemMeta) -> ! {
    panic!(
        "resource {} requested by system '{}' does not exist",
        type_name::<T>(),
        meta.name()
    )
}

impl<T: Resource> SystemParam for Res<'_, T> {
    type State = ();

    type Item<'world, 'state> = Res<'world, T>;

    fn init_state(_: &mut World, meta: &mut SystemMeta) -> Self::State {
        let name = meta.name();
        meta.access_mut().add_resource_read::<T>(name);
    }

    unsafe fn get_param<'world, 'state>(
        _: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        unsafe { fetch_res(meta, world) }.unwrap_or_else(|| missing_resource::<T>(meta))
    }
}

impl<T: Resource> SystemParam for Option<Res<'_, T>> {
    type State = ();

    type Item<'world, 'state> = Option<Res<'world, T>>;

    fn init_state(_: &mut World, meta: &mut SystemMeta) -> Self::State {
        let name = meta.name();
        meta.access_mut().add_resource_read::<T>(name);
    }

    unsafe fn get_param<'world, 'state>(
        _: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        unsafe { fetch_res(meta, world) }
    }
}

impl<T: Resource> SystemParam for ResMut<'_, T> {
    type State = ();

    type Item<'world, 'state> = ResMut<'world, T>;

    fn init_state(_: &mut World, meta: &mut SystemMeta) -> Self::State {
        let name = meta.name();
        meta.access_mut().add_resource_write::<T>(name);
    }

    unsafe fn get_param<'world, 'state>(
        _: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        unsafe { fetch_res_mut(meta, world) }.unwrap_or_else(|| missing_resource::<T>(meta))
    }
}

impl<T: Resource> SystemParam for Option<ResMut<'_, T>> {
    type State = ();

    type Item<'world, 'state> = Option<ResMut<'world, T>>;

    fn init_state(_: &mut World, meta: &mut SystemMeta) -> Self::State {
        let name = meta.name();
        meta.access_mut().add_resource_write::<T>(name);
    }

    unsafe fn get_param<'world, 'state>(
        _: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        unsafe { fetch_res_mut(meta, world) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Resource, Debug, PartialEq)]
    struct Score(u32);

    struct Tracked(Rc<Cell<u32>>);

    impl Resource for Tracked {}

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn insert_overwrites_in_place() {
        let mut resources = Resources::new();
        resources.insert(Score(1), Tick::new(1));
        let before = resources.get::<Score>().map(|score| score as *const Score);
        resources.insert(Score(2), Tick::new(2));
        let after = resources.get::<Score>().map(|score| score as *const Score);

        assert_eq!(before, after);
        assert_eq!(resources.get::<Score>(), Some(&Score(2)));
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn remove_returns_value() {
        let mut resources = Resources::new();
        resources.insert(Score(5), Tick::new(1));
        assert_eq!(resources.remove::<Score>(), Some(Score(5)));
        assert!(!resources.contains::<Score>());
        assert_eq!(resources.remove::<Score>(), None);
    }

    #[test]
    fn dropping_storage_drops_resources() {
        let drops = Rc::new(Cell::new(0));
        {
            let mut resources = Resources::new();
            resources.insert(Tracked(drops.clone()), Tick::new(1));
            resources.insert(Tracked(drops.clone()), Tick::new(2));
            assert_eq!(drops.get(), 1);
        }
        assert_eq!(drops.get(), 2);
    }
}
