mod condition;
mod config;
mod graph;
mod main_schedule;

pub use condition::{not, resource_exists, run_once, BoxedCondition, IntoCondition, NotCondition};
pub use config::{
    ConfigTupleMarker, IntoScheduleTarget, IntoSetConfigs, IntoSystemConfigs, ScheduleTarget, SetConfig,
    SystemConfig, SystemConfigMarker, SystemConfigs, SystemSet, SystemTargetMarker,
};
pub(crate) use main_schedule::run_main;

use crate::system::BoxedSystem;
use crate::world::World;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ScheduleLabel {
    PreStartup,
    Startup,
    PostStartup,
    /// Runs its own systems, then every frame schedule below in order.
    Main,
    First,
    PreUpdate,
    StateTransition,
    /// Runs zero or more times per frame, once per elapsed fixed step.
    FixedUpdate,
    Update,
    PostUpdate,
    PreRender,
    Render,
    PostRender,
    Last,
    Custom(&'static str),
}

impl ScheduleLabel {
    pub const STARTUP: [ScheduleLabel; 3] = [
        ScheduleLabel::PreStartup,
        ScheduleLabel::Startup,
        ScheduleLabel::PostStartup,
    ];
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleBuildError {
    #[error("schedule {schedule:?} has a dependency cycle between {systems:?}")]
    Cycle {
        schedule: ScheduleLabel,
        systems: Vec<&'static str>,
    },
}

struct SystemNode {
    key: TypeId,
    system: BoxedSystem,
    before: Vec<ScheduleTarget>,
    after: Vec<ScheduleTarget>,
    sets: Vec<SystemSet>,
    conditions: Vec<BoxedCondition>,
}

#[derive(Default)]
struct SetNode {
    before: Vec<ScheduleTarget>,
    after: Vec<ScheduleTarget>,
    conditions: Vec<BoxedCondition>,
}

/// The systems of one schedule label and the constraints between them.
pub struct Schedule {
    label: ScheduleLabel,
    nodes: Vec<SystemNode>,
    sets: HashMap<SystemSet, SetNode>,
    chains: Vec<(usize, usize)>,
    /// Cached execution order; cleared whenever the schedule changes.
    order: Option<Vec<usize>>,
}

impl Schedule {
    pub fn new(label: ScheduleLabel) -> Self {
        Self {
            label,
            nodes: Vec::new(),
            sets: HashMap::new(),
            chains: Vec::new(),
            order: None,
        }
    }

    pub fn label(&self) -> ScheduleLabel {
        self.label
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_systems(&mut self, configs: SystemConfigs) {
        self.add_configs(configs, &Inherited::default());
        self.order = None;
    }

    pub fn configure_sets(&mut self, configs: Vec<SetConfig>) {
        for config in configs {
            let node = self.sets.entry(config.set).or_default();
            node.before.extend(config.before);
            node.after.extend(config.after);
            node.conditions.extend(config.conditions);
        }
        self.order = None;
    }

    /// Adds the leaves of `configs`, returning their node indices.
    fn add_configs(&mut self, configs: SystemConfigs, inherited: &Inherited) -> Vec<usize> {
        match configs {
            SystemConfigs::Single(config) => {
                let mut sets = config.sets;
                sets.extend_from_slice(&inherited.sets);
                let mut before = config.before;
                before.extend_from_slice(&inherited.before);
                let mut after = config.after;
                after.extend_from_slice(&inherited.after);

                self.nodes.push(SystemNode {
                    key: config.key,
                    system: config.system,
                    before,
                    after,
                    sets,
                    conditions: config.conditions,
                });
                vec![self.nodes.len() - 1]
            }
            SystemConfigs::Group {
                configs,
                chained,
                before,
                after,
                mut sets,
                conditions,
            } => {
                if !conditions.is_empty() {
                    let set = SystemSet::anonymous();
                    self.sets.entry(set).or_default().conditions.extend(conditions);
                    sets.push(set);
                }
                let inherited = Inherited {
                    before: [inherited.before.as_slice(), before.as_slice()].concat(),
                    after: [inherited.after.as_slice(), after.as_slice()].concat(),
                    sets: [inherited.sets.as_slice(), sets.as_slice()].concat(),
                };

                let mut all = Vec::new();
                let mut previous: Vec<usize> = Vec::new();
                for config in configs {
                    let members = self.add_configs(config, &inherited);
                    if chained {
                        for &from in &previous {
                            for &to in &members {
                                self.chains.push((from, to));
                            }
                        }
                    }
                    all.extend_from_slice(&members);
                    previous = members;
                }
                all
            }
        }
    }

    /// Node indices a target refers to. Empty if nothing matches.
    fn resolve(&self, target: &ScheduleTarget, members: &HashMap<SystemSet, Vec<usize>>) -> Vec<usize> {
        match target {
            ScheduleTarget::System { key, .. } => self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| node.key == *key)
                .map(|(index, _)| index)
                .collect(),
            ScheduleTarget::Set(set) => members.get(set).cloned().unwrap_or_default(),
        }
    }

    fn edges(&self) -> Vec<(usize, usize)> {
        let mut members: HashMap<SystemSet, Vec<usize>> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            for &set in &node.sets {
                members.entry(set).or_default().push(index);
            }
        }

        let mut edges = self.chains.clone();
        let mut unresolved: HashSet<ScheduleTarget> = HashSet::new();
        let mut resolve = |target: &ScheduleTarget| {
            let nodes = self.resolve(target, &members);
            if nodes.is_empty() {
                unresolved.insert(*target);
            } else if nodes.len() > 1 {
                if let ScheduleTarget::System { name, .. } = target {
                    log::debug!("'{name}' names {} systems of the same type", nodes.len());
                }
            }
            nodes
        };

        for (index, node) in self.nodes.iter().enumerate() {
            for target in &node.before {
                edges.extend(resolve(target).into_iter().map(|next| (index, next)));
            }
            for target in &node.after {
                edges.extend(resolve(target).into_iter().map(|previous| (previous, index)));
            }
        }

        for (set, config) in &self.sets {
            let Some(set_members) = members.get(set) else {
                continue;
            };
            for target in &config.before {
                for next in resolve(target) {
                    edges.extend(set_members.iter().map(|&member| (member, next)));
                }
            }
            for target in &config.after {
                for previous in resolve(target) {
                    edges.extend(set_members.iter().map(|&member| (previous, member)));
                }
            }
        }

        for target in unresolved {
            log::warn!(
                "ordering constraint on {target:?} in schedule {:?} matches no system; ignoring it",
                self.label
            );
        }
        edges
    }

    /// Recomputes the execution order.
    pub fn build(&mut self) -> Result<(), ScheduleBuildError> {
        let names: Vec<&str> = self.nodes.iter().map(|node| node.system.name()).collect();
        let edges = self.edges();
        match graph::topological_order(&names, &edges) {
            Ok(order) => {
                log::debug!(
                    "schedule {:?} order: {:?}",
                    self.label,
                    order.iter().map(|&index| names[index]).collect::<Vec<_>>()
                );
                self.order = Some(order);
                Ok(())
            }
            Err(cycle) => Err(ScheduleBuildError::Cycle {
                schedule: self.label,
                systems: cycle.into_iter().map(|index| self.nodes[index].system.name()).collect(),
            }),
        }
    }

    /// System names in execution order.
    pub fn system_names(&mut self) -> Result<Vec<&'static str>, ScheduleBuildError> {
        if self.order.is_none() {
            self.build()?;
        }
        let order = self.order.as_deref().unwrap_or_default();
        Ok(order.iter().map(|&index| self.nodes[index].system.name()).collect())
    }

    /// Runs every system whose conditions hold. A cyclic schedule panics.
    pub fn run(&mut self, world: &mut World) {
        if self.order.is_none() {
            if let Err(error) = self.build() {
                panic!("{error}");
            }
        }
        let order = self.order.clone().unwrap_or_default();

        let mut set_results: HashMap<SystemSet, bool> = HashMap::new();
        for index in order {
            let node = &mut self.nodes[index];

            let mut allowed = true;
            for set in &node.sets {
                let result = match set_results.get(set) {
                    Some(&result) => result,
                    None => {
                        let result = self
                            .sets
                            .get_mut(set)
                            .is_none_or(|config| condition::evaluate(&mut config.conditions, world));
                        set_results.insert(*set, result);
                        result
                    }
                };
                allowed &= result;
            }
            allowed &= condition::evaluate(&mut node.conditions, world);

            if !allowed {
                log::trace!("skipping system '{}' in {:?}", node.system.name(), self.label);
                continue;
            }
            node.system.run(world);
        }
    }

    pub(crate) fn rebase_ticks(&mut self, offset: u32) {
        for node in &mut self.nodes {
            node.system.rebase_ticks(offset);
            for condition in &mut node.conditions {
                condition.rebase_ticks(offset);
            }
        }
        for set in self.sets.values_mut() {
            for condition in &mut set.conditions {
                condition.rebase_ticks(offset);
            }
        }
    }
}

/// Constraints a group hands down to its members.
#[derive(Default)]
struct Inherited {
    before: Vec<ScheduleTarget>,
    after: Vec<ScheduleTarget>,
    sets: Vec<SystemSet>,
}

/// Every schedule of a world, by label.
pub struct Schedules {
    schedule_map: HashMap<ScheduleLabel, Schedule>,
    running: HashSet<ScheduleLabel>,
}

impl Default for Schedules {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedules {
    pub fn new() -> Self {
        Self {
            schedule_map: HashMap::new(),
            running: HashSet::new(),
        }
    }

    fn assert_not_running(&self, label: ScheduleLabel) {
        if self.running.contains(&label) {
            panic!("schedule {label:?} cannot be changed while it is running");
        }
    }

    pub fn add_systems(&mut self, label: ScheduleLabel, configs: SystemConfigs) {
        self.assert_not_running(label);
        self.schedule_map
            .entry(label)
            .or_insert_with(|| Schedule::new(label))
            .add_systems(configs);
    }

    pub fn configure_sets(&mut self, label: ScheduleLabel, configs: Vec<SetConfig>) {
        self.assert_not_running(label);
        self.schedule_map
            .entry(label)
            .or_insert_with(|| Schedule::new(label))
            .configure_sets(configs);
    }

    pub fn get_schedule(&self, label: ScheduleLabel) -> Option<&Schedule> {
        self.schedule_map.get(&label)
    }

    pub fn get_schedule_mut(&mut self, label: ScheduleLabel) -> Option<&mut Schedule> {
        self.assert_not_running(label);
        self.schedule_map.get_mut(&label)
    }

    /// Takes a schedule out to run it. Panics if it is already running.
    pub(crate) fn take(&mut self, label: ScheduleLabel) -> Option<Schedule> {
        self.assert_not_running(label);
        let schedule = self.schedule_map.remove(&label)?;
        self.running.insert(label);
        Some(schedule)
    }

    pub(crate) fn restore(&mut self, schedule: Schedule) {
        self.running.remove(&schedule.label);
        self.schedule_map.insert(schedule.label, schedule);
    }

    pub(crate) fn rebase_ticks(&mut self, offset: u32) {
        for schedule in self.schedule_map.values_mut() {
            schedule.rebase_ticks(offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Res, ResMut, Resource};

    #[derive(Resource, Default)]
    struct Log(Vec<&'static str>);

    #[derive(Resource)]
    struct Enabled;

    fn a(mut log: ResMut<Log>) {
        log.0.push("a");
    }

    fn b(mut log: ResMut<Log>) {
        log.0.push("b");
    }

    fn c(mut log: ResMut<Log>) {
        log.0.push("c");
    }

    fn run(world: &mut World, label: ScheduleLabel) -> Vec<&'static str> {
        world.resource_mut::<Log>().0.clear();
        world.run_schedule(label);
        world.resource::<Log>().0.clone()
    }

    fn world() -> World {
        let mut world = World::new();
        world.init_resource::<Log>();
        world
    }

    #[test]
    fn unconstrained_systems_run_in_name_order() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, (c, a, b));
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["a", "b", "c"]);
    }

    #[test]
    fn before_and_after_are_respected() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, (a.after(c), b.before(c), c));
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["b", "c", "a"]);
    }

    #[test]
    fn chain_orders_members() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, (c, b, a).chain());
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["c", "b", "a"]);
    }

    #[test]
    fn sets_order_their_members() {
        const EARLY: SystemSet = SystemSet::new("early");
        const LATE: SystemSet = SystemSet::new("late");

        let mut world = world();
        world.configure_sets(ScheduleLabel::Update, EARLY.before(LATE));
        world.add_systems(ScheduleLabel::Update, (a.in_set(LATE), c.in_set(EARLY)));
        world.add_systems(ScheduleLabel::Update, b.in_set(LATE));
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["c", "a", "b"]);
    }

    #[test]
    fn copies_of_one_closure_are_separate_systems() {
        const FIRST: SystemSet = SystemSet::new("first");
        const SECOND: SystemSet = SystemSet::new("second");

        fn push(tag: &'static str) -> impl FnMut(ResMut<Log>) {
            move |mut log: ResMut<Log>| log.0.push(tag)
        }

        let mut world = world();
        world.configure_sets(ScheduleLabel::Update, SECOND.before(FIRST));
        world.add_systems(ScheduleLabel::Update, (push("x").in_set(FIRST), push("y").in_set(SECOND)));
        // A closure value names every copy of its type.
        world.add_systems(ScheduleLabel::Update, a.after(push("any")));
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["y", "x", "a"]);
    }

    #[test]
    fn conditions_skip_systems() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, (a.run_if(resource_exists::<Enabled>), b));
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["b"]);
        world.insert_resource(Enabled);
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["a", "b"]);
    }

    #[test]
    fn group_conditions_are_evaluated_once() {
        #[derive(Resource, Default)]
        struct Evaluations(u32);

        fn counted(mut evaluations: ResMut<Evaluations>) -> bool {
            evaluations.0 += 1;
            true
        }

        let mut world = world();
        world.init_resource::<Evaluations>();
        world.add_systems(ScheduleLabel::Update, (a, b, c).run_if(counted));
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["a", "b", "c"]);
        assert_eq!(world.resource::<Evaluations>().0, 1);
    }

    #[test]
    fn run_once_and_not() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, (a.run_if(run_once), b.run_if(not(run_once))));
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["a"]);
        assert_eq!(run(&mut world, ScheduleLabel::Update), vec!["b"]);
    }

    #[test]
    fn skipped_systems_consume_no_tick() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, a.run_if(not(resource_exists::<Log>)));
        let before = world.change_tick();
        world.run_schedule(ScheduleLabel::Update);
        // Only the condition ran.
        assert_eq!(world.change_tick().get(), before.get() + 1);
        assert!(world.resource::<Log>().0.is_empty());
    }

    #[test]
    #[should_panic(expected = "cycle")]
    fn cycles_are_fatal() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, (a.before(b), b.before(a)));
        world.run_schedule(ScheduleLabel::Update);
    }

    #[test]
    fn order_is_independent_of_insertion_order() {
        let mut first = Schedule::new(ScheduleLabel::Update);
        first.add_systems((a, b.after(c), c).into_configs());
        let mut second = Schedule::new(ScheduleLabel::Update);
        second.add_systems((c, b.after(c), a).into_configs());
        assert_eq!(first.system_names(), second.system_names());
    }

    #[test]
    #[should_panic(expected = "while it is running")]
    fn running_schedules_cannot_be_changed() {
        let mut world = world();
        world.add_systems(ScheduleLabel::Update, |mut commands: crate::commands::Commands| {
            commands.add(|world: &mut World| world.add_systems(ScheduleLabel::Update, a));
        });
        world.run_schedule(ScheduleLabel::Update);
    }
}
