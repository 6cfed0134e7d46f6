use crate::archetype::{Archetype, ArchetypeId};
use crate::archetypes::Archetypes;
use crate::component::ComponentRegistry;
use crate::entity::Entities;
use crate::observer::TriggerContext;
use crate::removal_detection::RemovedComponentEvents;
use crate::resource::{Resource, ResourcePtr, Resources};
use crate::tick::Tick;
use crate::world::World;
use std::any::Any;
use std::marker::PhantomData;

/// A world pointer that system parameters split into disjoint borrows.
///
/// Which parts may be touched is decided by the access sets recorded in each
/// system's [`SystemMeta`](crate::system::SystemMeta); the cell itself
/// checks nothing.
#[derive(Copy, Clone)]
pub struct UnsafeWorldCell<'w> {
    ptr: *mut World,
    _marker: PhantomData<&'w World>,
}

impl<'w> UnsafeWorldCell<'w> {
    pub(crate) fn new_mutable(world: &'w mut World) -> Self {
        Self {
            ptr: world,
            _marker: PhantomData,
        }
    }

    /// Only read access may be performed through a cell built this way.
    pub(crate) fn new_readonly(world: &'w World) -> Self {
        Self {
            ptr: (world as *const World).cast_mut(),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// No mutable reference to any part of the world may be alive.
    pub unsafe fn world(self) -> &'w World {
        unsafe { &*self.ptr }
    }

    /// # Safety
    /// The cell must come from a mutable borrow and no other reference into
    /// the world may be alive.
    pub unsafe fn world_mut(self) -> &'w mut World {
        unsafe { &mut *self.ptr }
    }

    pub fn change_tick(self) -> Tick {
        unsafe { (*self.ptr).change_tick() }
    }

    /// # Safety
    /// The entity index must not be borrowed mutably.
    pub(crate) unsafe fn entities(self) -> &'w Entities {
        unsafe { &(*self.ptr).entities }
    }

    /// # Safety
    /// The registry must not be borrowed mutably.
    pub(crate) unsafe fn components(self) -> &'w ComponentRegistry {
        unsafe { &(*self.ptr).components }
    }

    /// # Safety
    /// The archetype list must not be borrowed mutably.
    pub(crate) unsafe fn archetypes(self) -> &'w Archetypes {
        unsafe { &(*self.ptr).archetypes }
    }

    /// # Safety
    /// `id` must exist, and whatever the caller reaches through the pointer
    /// must not alias a live mutable reference.
    pub(crate) unsafe fn archetype_ptr(self, id: ArchetypeId) -> *mut Archetype {
        unsafe { Archetypes::get_ptr(&raw mut (*self.ptr).archetypes, id) }
    }

    /// # Safety
    /// Removal streams must not be borrowed mutably.
    pub(crate) unsafe fn removed_components(self) -> &'w RemovedComponentEvents {
        unsafe { &(*self.ptr).removed_components }
    }

    /// # Safety
    /// The trigger stack must not be borrowed mutably.
    pub(crate) unsafe fn trigger_stack(self) -> &'w [TriggerContext] {
        unsafe { &(*self.ptr).trigger_stack }
    }

    /// # Safety
    /// No other reference to the input stack may be alive.
    pub(crate) unsafe fn input_stack_mut(self) -> &'w mut Vec<Option<Box<dyn Any>>> {
        unsafe { &mut (*self.ptr).input_stack }
    }

    /// # Safety
    /// The caller must hold access to `T` as declared in its system meta.
    pub(crate) unsafe fn resource_ptr<T: Resource>(self) -> Option<ResourcePtr<T>> {
        unsafe { Resources::cell_ptr::<T>(&raw const (*self.ptr).resources) }
    }
}
