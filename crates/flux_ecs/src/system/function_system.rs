use crate::tick::Tick;
use crate::world::World;
use crate::{
    system::parameter::{SystemParam, SystemParamItem},
    system::{IntoSystem, System, SystemMeta},
};
use std::marker::PhantomData;
use variadics_please::all_tuples;

/// The user-defined function that will be executed as a system.
pub trait SystemParamFunction<Marker>: 'static {
    type Param: SystemParam;
    type Out: 'static;

    fn run(&mut self, param: SystemParamItem<Self::Param>) -> Self::Out;
}

/// A system that runs a user-defined function with system parameters.
pub struct FunctionSystem<Marker, F>
where
    F: SystemParamFunction<Marker>,
{
    func: F,
    state: Option<FunctionSystemState<F::Param>>,
    meta: SystemMeta,
    _marker: PhantomData<fn() -> Marker>,
}

/// The state of the function system that holds data over multiple runs.
struct FunctionSystemState<P: SystemParam> {
    param: P::State,
}

pub struct IsFunctionSystem;

impl<Marker, F> IntoSystem<(IsFunctionSystem, Marker)> for F
where
    Marker: 'static,
    F: SystemParamFunction<Marker>,
{
    type System = FunctionSystem<Marker, F>;

    fn into_system(self) -> Self::System {
        FunctionSystem {
            func: self,
            state: None,
            meta: SystemMeta::new(std::any::type_name::<F>()),
            _marker: PhantomData,
        }
    }
}

impl<Marker, F> System for FunctionSystem<Marker, F>
where
    Marker: 'static,
    F: SystemParamFunction<Marker>,
{
    type Out = F::Out;

    fn name(&self) -> &'static str {
        self.meta.name()
    }

    fn run(&mut self, world: &mut World) -> F::Out {
        if self.state.is_none() {
            self.initialize(world);
        }

        let this_run = world.increment_tick();
        self.meta.this_run = this_run;
        log::trace!("running system '{}' at {}", self.meta.name(), this_run);

        let state = self
            .state
            .as_mut()
            .unwrap_or_else(|| panic!("system '{}' ran before it was initialized", self.meta.name()));
        // SAFETY: parameter access was validated against the meta in
        // `initialize`, and `world` is exclusively borrowed for the call.
        let params = unsafe { F::Param::get_param(&mut state.param, &self.meta, world.as_unsafe_world_cell()) };
        let out = self.func.run(params);

        F::Param::apply_buffers(&mut state.param, &self.meta, world);
        self.meta.last_run = this_run;
        world.flush();
        out
    }

    fn initialize(&mut self, world: &mut World) {
        if self.state.is_some() {
            return;
        }

        self.state = Some(FunctionSystemState {
            param: F::Param::init_state(world, &mut self.meta),
        });
    }

    fn last_run(&self) -> Tick {
        self.meta.last_run
    }

    fn rebase_ticks(&mut self, offset: u32) {
        self.meta.last_run.rebase(offset);
        self.meta.this_run.rebase(offset);
    }
}

macro_rules! impl_system_param_function {
    ($(($P:ident, $p:ident)),*) => {
        #[allow(non_snake_case)]
        impl<Out, Func, $($P: SystemParam),*> SystemParamFunction<fn($($P,)*) -> Out> for Func
        where
            Func: 'static,
            Out: 'static,
            for<'a> &'a mut Func: FnMut($($P),*) -> Out + FnMut($(SystemParamItem<$P>),*) -> Out,
        {
            type Param = ($($P,)*);
            type Out = Out;

            fn run(&mut self, param: SystemParamItem<Self::Param>) -> Out {
                fn call_inner<Out, $($P),*>(mut f: impl FnMut($($P),*) -> Out, $($p: $P),*) -> Out {
                    f($($p),*)
                }
                let ($($p,)*) = param;
                call_inner(self, $($p),*)
            }
        }
    };
}

all_tuples!(impl_system_param_function, 0, 15, P, p);

#[cfg(test)]
mod tests {
    use crate::resource::{Res, ResMut, Resource};
    use crate::system::{IntoSystem, System};
    use crate::world::World;
    use std::fmt;

    #[derive(Resource, Default)]
    struct Total(u32);

    #[derive(Debug)]
    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("broken")
        }
    }

    impl std::error::Error for Broken {}

    fn add_one(mut total: ResMut<Total>) {
        total.0 += 1;
    }

    #[test]
    fn runs_update_last_run() {
        let mut world = World::new();
        world.init_resource::<Total>();
        let mut system = add_one.into_system();
        system.initialize(&mut world);
        assert!(system.last_run().is_none());

        system.run(&mut world);
        let first = system.last_run();
        system.run(&mut world);

        assert!(system.last_run().is_newer_than(first));
        assert_eq!(world.resource::<Total>().0, 2);
    }

    #[test]
    fn outputs_are_returned() {
        let mut world = World::new();
        world.insert_resource(Total(7));
        let out = world.run_system_once(|total: Res<Total>| total.0 + 1);
        assert_eq!(out, 8);
    }

    #[test]
    #[should_panic(expected = "Error in function system")]
    fn failing_systems_panic_in_schedules() {
        let mut world = World::new();
        world.add_systems(crate::schedule::ScheduleLabel::Update, || -> Result<(), Broken> { Err(Broken) });
        world.run_schedule(crate::schedule::ScheduleLabel::Update);
    }
}
