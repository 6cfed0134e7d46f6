use crate::system::SystemMeta;
use crate::world::{UnsafeWorldCell, World};
use std::any::type_name;
use std::ops::{Deref, DerefMut};
use variadics_please::all_tuples;

/// A value a system function can take as an argument.
///
/// `init_state` runs once when the system is initialised and records the
/// parameter's access in the [`SystemMeta`]. `get_param` builds the value for
/// a single run, and `apply_buffers` runs after the system returns.
pub trait SystemParam: Sized {
    type State: 'static;

    type Item<'world, 'state>: SystemParam<State = Self::State>;

    fn init_state(world: &mut World, meta: &mut SystemMeta) -> Self::State;

    /// # Safety
    /// The world must only be accessed the way `init_state` declared, and no
    /// conflicting borrow may be alive.
    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state>;

    #[allow(unused_variables)]
    fn apply_buffers(state: &mut Self::State, meta: &SystemMeta, world: &mut World) {}
}

pub type SystemParamItem<'world, 'state, P> = <P as SystemParam>::Item<'world, 'state>;

macro_rules! impl_system_param_tuple {
    ($(($P:ident, $p:ident)),*) => {
        #[allow(non_snake_case, unused_variables, clippy::unused_unit)]
        impl<$($P: SystemParam),*> SystemParam for ($($P,)*) {
            type State = ($($P::State,)*);

            type Item<'world, 'state> = ($($P::Item<'world, 'state>,)*);

            fn init_state(world: &mut World, meta: &mut SystemMeta) -> Self::State {
                ($($P::init_state(world, meta),)*)
            }

            unsafe fn get_param<'world, 'state>(
                state: &'state mut Self::State,
                meta: &SystemMeta,
                world: UnsafeWorldCell<'world>,
            ) -> Self::Item<'world, 'state> {
                let ($($p,)*) = state;
                // SAFETY: access conflicts between the members were rejected
                // when their states were initialised.
                ($(unsafe { $P::get_param($p, meta, world) },)*)
            }

            fn apply_buffers(state: &mut Self::State, meta: &SystemMeta, world: &mut World) {
                let ($($p,)*) = state;
                $($P::apply_buffers($p, meta, world);)*
            }
        }
    };
}

all_tuples!(impl_system_param_tuple, 0, 15, P, p);

/// Per-system storage that persists between runs.
#[derive(Debug)]
pub struct Local<'s, T: Default + 'static>(pub(crate) &'s mut T);

impl<T: Default + 'static> Deref for Local<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0
    }
}

impl<T: Default + 'static> DerefMut for Local<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.0
    }
}

impl<T: Default + 'static> SystemParam for Local<'_, T> {
    type State = T;

    type Item<'world, 'state> = Local<'state, T>;

    fn init_state(_: &mut World, _: &mut SystemMeta) -> Self::State {
        T::default()
    }

    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        _: &SystemMeta,
        _: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        Local(state)
    }
}

/// The input passed to
/// [`World::run_system_with`](crate::world::World::run_system_with).
#[derive(Debug)]
pub struct In<T>(pub T);

impl<T> Deref for In<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for In<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: 'static> SystemParam for In<T> {
    type State = ();

    type Item<'world, 'state> = In<T>;

    fn init_state(_: &mut World, _: &mut SystemMeta) -> Self::State {}

    unsafe fn get_param<'world, 'state>(
        _: &'state mut Self::State,
        meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
    ) -> Self::Item<'world, 'state> {
        let input = unsafe { world.input_stack_mut() }
            .last_mut()
            .and_then(Option::take)
            .unwrap_or_else(|| {
                panic!(
                    "system '{}' takes In<{}> but was run without an input",
                    meta.name(),
                    type_name::<T>()
                )
            });
        match input.downcast::<T>() {
            Ok(input) => In(*input),
            Err(_) => panic!(
                "system '{}' takes In<{}> but was given another input type",
                meta.name(),
                type_name::<T>()
            ),
        }
    }
}
