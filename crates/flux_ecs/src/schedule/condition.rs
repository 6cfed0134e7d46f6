use crate::resource::{Res, Resource};
use crate::system::{IntoSystem, Local, System};
use crate::tick::Tick;
use crate::world::World;

pub type BoxedCondition = Box<dyn System<Out = bool>>;

/// Anything that can gate a system: a system returning `bool`.
pub trait IntoCondition<Marker> {
    fn into_condition(self) -> BoxedCondition;
}

impl<M, S> IntoCondition<M> for S
where
    S: IntoSystem<M>,
    S::System: System<Out = bool>,
{
    fn into_condition(self) -> BoxedCondition {
        Box::new(self.into_system())
    }
}

/// Runs every condition and combines the results, so each one sees every
/// schedule run.
pub(crate) fn evaluate(conditions: &mut [BoxedCondition], world: &mut World) -> bool {
    conditions
        .iter_mut()
        .fold(true, |allowed, condition| condition.run(world) && allowed)
}

pub fn resource_exists<R: Resource>(resource: Option<Res<R>>) -> bool {
    resource.is_some()
}

/// True the first time it is evaluated, false afterwards.
pub fn run_once(mut has_run: Local<bool>) -> bool {
    !std::mem::replace(&mut *has_run, true)
}

pub struct NotCondition {
    inner: BoxedCondition,
}

impl System for NotCondition {
    type Out = bool;

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn run(&mut self, world: &mut World) -> bool {
        !self.inner.run(world)
    }

    fn initialize(&mut self, world: &mut World) {
        self.inner.initialize(world);
    }

    fn last_run(&self) -> Tick {
        self.inner.last_run()
    }

    fn rebase_ticks(&mut self, offset: u32) {
        self.inner.rebase_ticks(offset);
    }
}

/// Inverts a condition.
pub fn not<M>(condition: impl IntoCondition<M>) -> NotCondition {
    NotCondition {
        inner: condition.into_condition(),
    }
}
