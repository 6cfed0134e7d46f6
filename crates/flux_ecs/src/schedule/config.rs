use crate::schedule::condition::{BoxedCondition, IntoCondition};
use crate::system::{into_reporting_system, BoxedSystem, IntoSystem, System, SystemOutput};
use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use variadics_please::all_tuples;

/// A named group of systems that can be ordered and gated as a whole.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SystemSet {
    name: &'static str,
    /// Zero for named sets; anonymous sets get a unique id.
    anonymous: u32,
}

impl SystemSet {
    pub const fn new(name: &'static str) -> Self {
        Self { name, anonymous: 0 }
    }

    pub(crate) fn anonymous() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self {
            name: "anonymous",
            anonymous: NEXT.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn before<M>(self, target: impl IntoScheduleTarget<M>) -> SetConfig {
        SetConfig::new(self).before(target)
    }

    pub fn after<M>(self, target: impl IntoScheduleTarget<M>) -> SetConfig {
        SetConfig::new(self).after(target)
    }

    pub fn run_if<M>(self, condition: impl IntoCondition<M>) -> SetConfig {
        SetConfig::new(self).run_if(condition)
    }
}

impl fmt::Debug for SystemSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.anonymous == 0 {
            write!(f, "SystemSet({})", self.name)
        } else {
            write!(f, "SystemSet(#{})", self.anonymous)
        }
    }
}

/// What a `before` or `after` constraint points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScheduleTarget {
    System { key: TypeId, name: &'static str },
    Set(SystemSet),
}

pub struct SystemTargetMarker;

/// Anything a `before` or `after` constraint can name.
///
/// A system value names every system of its type in the schedule. Copies of
/// one closure with different captures are still separate systems with their
/// own state, but ordering them against each other goes through a
/// [`SystemSet`] per copy.
pub trait IntoScheduleTarget<Marker> {
    fn into_target(self) -> ScheduleTarget;
}

impl IntoScheduleTarget<()> for SystemSet {
    fn into_target(self) -> ScheduleTarget {
        ScheduleTarget::Set(self)
    }
}

impl<M, S: IntoSystem<M>> IntoScheduleTarget<(SystemTargetMarker, M)> for S {
    fn into_target(self) -> ScheduleTarget {
        ScheduleTarget::System {
            key: TypeId::of::<S::System>(),
            name: type_name::<S::System>(),
        }
    }
}

/// One system plus the constraints attached to it.
pub struct SystemConfig {
    pub(crate) key: TypeId,
    pub(crate) system: BoxedSystem,
    pub(crate) before: Vec<ScheduleTarget>,
    pub(crate) after: Vec<ScheduleTarget>,
    pub(crate) sets: Vec<SystemSet>,
    pub(crate) conditions: Vec<BoxedCondition>,
}

/// Systems on their way into a schedule.
pub enum SystemConfigs {
    Single(SystemConfig),
    Group {
        configs: Vec<SystemConfigs>,
        chained: bool,
        before: Vec<ScheduleTarget>,
        after: Vec<ScheduleTarget>,
        sets: Vec<SystemSet>,
        /// Gate the whole group; evaluated once per run through an
        /// anonymous set.
        conditions: Vec<BoxedCondition>,
    },
}

impl SystemConfigs {
    fn group(configs: Vec<SystemConfigs>) -> Self {
        SystemConfigs::Group {
            configs,
            chained: false,
            before: Vec::new(),
            after: Vec::new(),
            sets: Vec::new(),
            conditions: Vec::new(),
        }
    }

    fn before_target(mut self, target: ScheduleTarget) -> Self {
        match &mut self {
            SystemConfigs::Single(config) => config.before.push(target),
            SystemConfigs::Group { before, .. } => before.push(target),
        }
        self
    }

    fn after_target(mut self, target: ScheduleTarget) -> Self {
        match &mut self {
            SystemConfigs::Single(config) => config.after.push(target),
            SystemConfigs::Group { after, .. } => after.push(target),
        }
        self
    }

    fn in_set_inner(mut self, set: SystemSet) -> Self {
        match &mut self {
            SystemConfigs::Single(config) => config.sets.push(set),
            SystemConfigs::Group { sets, .. } => sets.push(set),
        }
        self
    }

    fn run_if_inner(mut self, condition: BoxedCondition) -> Self {
        match &mut self {
            SystemConfigs::Single(config) => config.conditions.push(condition),
            SystemConfigs::Group { conditions, .. } => conditions.push(condition),
        }
        self
    }

    fn chain_inner(self) -> Self {
        match self {
            SystemConfigs::Group {
                configs,
                before,
                after,
                sets,
                conditions,
                ..
            } => SystemConfigs::Group {
                configs,
                chained: true,
                before,
                after,
                sets,
                conditions,
            },
            single => single,
        }
    }
}

pub trait IntoSystemConfigs<Marker>: Sized {
    fn into_configs(self) -> SystemConfigs;

    /// Runs before `target`, a system or a [`SystemSet`].
    fn before<M>(self, target: impl IntoScheduleTarget<M>) -> SystemConfigs {
        self.into_configs().before_target(target.into_target())
    }

    fn after<M>(self, target: impl IntoScheduleTarget<M>) -> SystemConfigs {
        self.into_configs().after_target(target.into_target())
    }

    fn in_set(self, set: SystemSet) -> SystemConfigs {
        self.into_configs().in_set_inner(set)
    }

    /// Skips the systems while `condition` returns `false`.
    fn run_if<M>(self, condition: impl IntoCondition<M>) -> SystemConfigs {
        self.into_configs().run_if_inner(condition.into_condition())
    }

    /// Orders the members of a tuple one after another.
    fn chain(self) -> SystemConfigs {
        self.into_configs().chain_inner()
    }
}

impl IntoSystemConfigs<()> for SystemConfigs {
    fn into_configs(self) -> SystemConfigs {
        self
    }
}

pub struct SystemConfigMarker;

impl<M, S> IntoSystemConfigs<(SystemConfigMarker, M)> for S
where
    S: IntoSystem<M>,
    <S::System as System>::Out: SystemOutput,
{
    fn into_configs(self) -> SystemConfigs {
        SystemConfigs::Single(SystemConfig {
            key: TypeId::of::<S::System>(),
            system: into_reporting_system(self),
            before: Vec::new(),
            after: Vec::new(),
            sets: Vec::new(),
            conditions: Vec::new(),
        })
    }
}

pub struct ConfigTupleMarker;

macro_rules! impl_system_configs_tuple {
    ($(($P:ident, $m:ident)),*) => {
        #[allow(non_snake_case)]
        impl<$($P, $m),*> IntoSystemConfigs<(ConfigTupleMarker, $($m,)*)> for ($($P,)*)
        where
            $($P: IntoSystemConfigs<$m>),*
        {
            fn into_configs(self) -> SystemConfigs {
                let ($($P,)*) = self;
                SystemConfigs::group(vec![$($P.into_configs(),)*])
            }
        }
    };
}

all_tuples!(impl_system_configs_tuple, 1, 15, P, m);

/// Ordering and gating of a [`SystemSet`].
pub struct SetConfig {
    pub(crate) set: SystemSet,
    pub(crate) before: Vec<ScheduleTarget>,
    pub(crate) after: Vec<ScheduleTarget>,
    pub(crate) conditions: Vec<BoxedCondition>,
}

impl SetConfig {
    pub fn new(set: SystemSet) -> Self {
        Self {
            set,
            before: Vec::new(),
            after: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn before<M>(mut self, target: impl IntoScheduleTarget<M>) -> Self {
        self.before.push(target.into_target());
        self
    }

    pub fn after<M>(mut self, target: impl IntoScheduleTarget<M>) -> Self {
        self.after.push(target.into_target());
        self
    }

    pub fn run_if<M>(mut self, condition: impl IntoCondition<M>) -> Self {
        self.conditions.push(condition.into_condition());
        self
    }
}

pub trait IntoSetConfigs {
    fn into_set_configs(self) -> Vec<SetConfig>;
}

impl IntoSetConfigs for SystemSet {
    fn into_set_configs(self) -> Vec<SetConfig> {
        vec![SetConfig::new(self)]
    }
}

impl IntoSetConfigs for SetConfig {
    fn into_set_configs(self) -> Vec<SetConfig> {
        vec![self]
    }
}

macro_rules! impl_set_configs_tuple {
    ($($S:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($S: IntoSetConfigs),*> IntoSetConfigs for ($($S,)*) {
            fn into_set_configs(self) -> Vec<SetConfig> {
                let ($($S,)*) = self;
                let mut configs = Vec::new();
                $(configs.extend($S.into_set_configs());)*
                configs
            }
        }
    };
}

all_tuples!(impl_set_configs_tuple, 1, 15, S);
