use crate::query::Access;
use crate::tick::Tick;
use crate::world::World;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

pub mod function_system;
pub mod parameter;

pub use function_system::{FunctionSystem, IsFunctionSystem, SystemParamFunction};
pub use parameter::{In, Local, SystemParam, SystemParamItem};

pub trait System: 'static {
    type Out;

    fn name(&self) -> &'static str;

    fn run(&mut self, world: &mut World) -> Self::Out;

    fn initialize(&mut self, world: &mut World);

    /// The tick of the last completed run, [`Tick::NONE`] before the first.
    fn last_run(&self) -> Tick;

    fn rebase_ticks(&mut self, offset: u32);
}

pub trait IntoSystem<Marker>: Sized {
    type System: System;

    fn into_system(self) -> Self::System;
}

// A system that is already built converts to itself.
impl<T: System> IntoSystem<()> for T {
    type System = T;

    fn into_system(self) -> Self::System {
        self
    }
}

/// What a system reports back to the schedule that ran it.
pub trait SystemOutput {
    fn handle(self, system: &str);
}

impl SystemOutput for () {
    fn handle(self, _: &str) {}
}

impl<E: std::error::Error> SystemOutput for Result<(), E> {
    fn handle(self, system: &str) {
        if let Err(e) = self {
            panic!("Error in function system '{}': {}", system, e);
        }
    }
}

/// Adapts any system whose output implements [`SystemOutput`] to one that
/// returns `()`.
pub(crate) struct ReportingSystem<S: System> {
    system: S,
}

impl<S> System for ReportingSystem<S>
where
    S: System,
    S::Out: SystemOutput,
{
    type Out = ();

    fn name(&self) -> &'static str {
        self.system.name()
    }

    fn run(&mut self, world: &mut World) {
        let name = self.system.name();
        self.system.run(world).handle(name);
    }

    fn initialize(&mut self, world: &mut World) {
        self.system.initialize(world);
    }

    fn last_run(&self) -> Tick {
        self.system.last_run()
    }

    fn rebase_ticks(&mut self, offset: u32) {
        self.system.rebase_ticks(offset);
    }
}

pub(crate) type BoxedSystem<Out = ()> = Box<dyn System<Out = Out>>;

pub(crate) fn into_reporting_system<M, S>(system: S) -> BoxedSystem
where
    S: IntoSystem<M>,
    <S::System as System>::Out: SystemOutput,
{
    Box::new(ReportingSystem {
        system: system.into_system(),
    })
}

/// Bookkeeping shared by a system and its parameters.
pub struct SystemMeta {
    name: &'static str,
    access: Access,
    pub(crate) last_run: Tick,
    pub(crate) this_run: Tick,
}

impl SystemMeta {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            access: Access::default(),
            last_run: Tick::NONE,
            this_run: Tick::NONE,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub(crate) fn access_mut(&mut self) -> &mut Access {
        &mut self.access
    }

    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    pub fn this_run(&self) -> Tick {
        self.this_run
    }
}

/// Handle to a system stored in the world by
/// [`World::register_system`](crate::world::World::register_system).
pub struct SystemId<O = ()> {
    index: u32,
    _marker: PhantomData<fn() -> O>,
}

impl<O> SystemId<O> {
    pub fn index(self) -> u32 {
        self.index
    }
}

impl<O> Clone for SystemId<O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for SystemId<O> {}

impl<O> PartialEq for SystemId<O> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<O> Eq for SystemId<O> {}

impl<O> fmt::Debug for SystemId<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({})", self.index)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunSystemError {
    #[error("system {0} is not registered")]
    NotRegistered(u32),
    #[error("system {0} is already running")]
    Recursive(u32),
}

trait AnyRegisteredSystem {
    fn name(&self) -> &'static str;

    fn rebase_ticks(&mut self, offset: u32);

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

struct RegisteredSystem<O: 'static> {
    system: BoxedSystem<O>,
}

impl<O: 'static> AnyRegisteredSystem for RegisteredSystem<O> {
    fn name(&self) -> &'static str {
        self.system.name()
    }

    fn rebase_ticks(&mut self, offset: u32) {
        self.system.rebase_ticks(offset);
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Systems run on demand by id. A slot is empty while its system runs.
#[derive(Default)]
pub(crate) struct RegisteredSystems {
    systems: HashMap<u32, Option<Box<dyn AnyRegisteredSystem>>>,
    next_index: u32,
}

impl RegisteredSystems {
    pub fn register<O: 'static>(&mut self, system: BoxedSystem<O>) -> SystemId<O> {
        let index = self.next_index;
        self.next_index += 1;
        log::debug!("registered system '{}' as {index}", system.name());
        self.systems
            .insert(index, Some(Box::new(RegisteredSystem { system })));
        SystemId {
            index,
            _marker: PhantomData,
        }
    }

    pub fn remove<O>(&mut self, id: SystemId<O>) -> bool {
        self.systems.remove(&id.index).is_some()
    }

    pub fn name<O>(&self, id: SystemId<O>) -> Option<&'static str> {
        self.systems
            .get(&id.index)?
            .as_ref()
            .map(|system| system.name())
    }

    pub fn take<O: 'static>(&mut self, id: SystemId<O>) -> Result<BoxedSystem<O>, RunSystemError> {
        let slot = self
            .systems
            .get_mut(&id.index)
            .ok_or(RunSystemError::NotRegistered(id.index))?;
        let system = slot.take().ok_or(RunSystemError::Recursive(id.index))?;
        let registered = system
            .into_any()
            .downcast::<RegisteredSystem<O>>()
            .unwrap_or_else(|_| panic!("system {} was registered with another output type", id.index));
        Ok(registered.system)
    }

    /// Puts a system back after running. Does nothing if it was unregistered
    /// while it ran.
    pub fn restore<O: 'static>(&mut self, id: SystemId<O>, system: BoxedSystem<O>) {
        if let Some(slot) = self.systems.get_mut(&id.index) {
            *slot = Some(Box::new(RegisteredSystem { system }));
        }
    }

    pub fn rebase_ticks(&mut self, offset: u32) {
        for system in self.systems.values_mut().flatten() {
            system.rebase_ticks(offset);
        }
    }
}
