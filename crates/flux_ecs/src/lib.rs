extern crate self as flux_ecs;

pub mod archetype;
mod archetype_graph;
pub mod archetypes;
pub mod bundle;
pub mod change_detection;
mod column;
pub mod commands;
pub mod component;
pub mod entity;
pub mod event;
pub mod hierarchy;
pub mod observer;
pub mod plugin;
pub mod query;
pub mod removal_detection;
pub mod resource;
pub mod schedule;
pub mod system;
pub mod tick;
pub mod time;
pub mod world;

pub mod prelude {
    pub use crate::bundle::Bundle;
    pub use crate::change_detection::Mut;
    pub use crate::commands::{Command, Commands, EntityCommands};
    pub use crate::component::{Component, ComponentKind};
    pub use crate::entity::Entity;
    pub use crate::event::{Event, EventReader, EventWriter};
    pub use crate::hierarchy::{Child, Parent};
    pub use crate::observer::{Observer, On};
    pub use crate::plugin::Plugin;
    pub use crate::query::{Added, Changed, Has, Or, Query, QueryState, Single, With, Without};
    pub use crate::removal_detection::RemovedComponents;
    pub use crate::resource::{Res, ResMut, ResOpt, Resource};
    pub use crate::schedule::{
        not, resource_exists, run_once, IntoSystemConfigs, ScheduleLabel, SystemSet,
    };
    pub use crate::system::{In, IntoSystem, Local, System, SystemId};
    pub use crate::tick::Tick;
    pub use crate::time::{FixedTime, Time, TimeUpdateStrategy};
    pub use crate::world::World;
}
