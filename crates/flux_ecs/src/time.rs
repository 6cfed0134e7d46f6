use crate::plugin::Plugin;
use crate::resource::{Res, ResMut, Resource};
use crate::schedule::ScheduleLabel;
use crate::world::World;
use std::time::{Duration, Instant};

/// Virtual clock, advanced once per frame in [`ScheduleLabel::First`].
#[derive(Resource, Debug, Clone, Default)]
pub struct Time {
    delta: Duration,
    elapsed: Duration,
    frame: u64,
    last_update: Option<Instant>,
}

impl Time {
    /// Duration of the previous frame.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Number of frames advanced so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn advance_by(&mut self, delta: Duration) {
        self.delta = delta;
        self.elapsed += delta;
        self.frame += 1;
    }

    fn advance_to(&mut self, now: Instant) {
        let delta = self.last_update.map_or(Duration::ZERO, |last| now - last);
        self.last_update = Some(now);
        self.advance_by(delta);
    }
}

/// How [`Time`] moves forward each frame.
#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUpdateStrategy {
    /// Wall-clock time between frames.
    #[default]
    Automatic,
    /// A fixed amount per frame, for deterministic stepping.
    ManualDuration(Duration),
}

/// Accumulator driving [`ScheduleLabel::FixedUpdate`].
#[derive(Resource, Debug, Clone)]
pub struct FixedTime {
    step: Duration,
    accumulator: Duration,
    max_steps_per_frame: u32,
    steps: u64,
}

impl Default for FixedTime {
    fn default() -> Self {
        Self::new(Duration::from_micros(15_625))
    }
}

impl FixedTime {
    pub fn new(step: Duration) -> Self {
        assert!(!step.is_zero(), "the fixed timestep must be longer than zero");
        Self {
            step,
            accumulator: Duration::ZERO,
            max_steps_per_frame: 8,
            steps: 0,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    pub fn max_steps_per_frame(&self) -> u32 {
        self.max_steps_per_frame
    }

    pub fn set_max_steps_per_frame(&mut self, max_steps: u32) {
        self.max_steps_per_frame = max_steps;
    }

    /// Total fixed steps run since the world was created.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// How far the accumulator is into the next step, in `[0, 1)`.
    pub fn overstep_fraction(&self) -> f64 {
        self.accumulator.as_secs_f64() / self.step.as_secs_f64()
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta;
    }

    /// Takes as many whole steps out of the accumulator as this frame may run.
    /// Time beyond the per-frame cap is dropped.
    pub(crate) fn expend(&mut self) -> u32 {
        let mut steps = 0;
        while self.accumulator >= self.step && steps < self.max_steps_per_frame {
            self.accumulator -= self.step;
            steps += 1;
        }
        if self.accumulator >= self.step {
            let dropped = self.accumulator;
            let remainder = self.accumulator.as_nanos() % self.step.as_nanos();
            self.accumulator = Duration::from_nanos(remainder as u64);
            log::warn!(
                "fixed update fell behind by {:?}; dropping it after {steps} steps",
                dropped - self.accumulator
            );
        }
        self.steps += u64::from(steps);
        steps
    }
}

pub fn update_time(mut time: ResMut<Time>, strategy: Res<TimeUpdateStrategy>, mut fixed: ResMut<FixedTime>) {
    match *strategy {
        TimeUpdateStrategy::Automatic => time.advance_to(Instant::now()),
        TimeUpdateStrategy::ManualDuration(delta) => time.advance_by(delta),
    }
    fixed.accumulate(time.delta());
}

/// Installs the clocks and the system that advances them.
pub struct TimePlugin;

impl Plugin for TimePlugin {
    fn init(&self, world: &mut World) {
        world.init_resource::<Time>();
        world.init_resource::<TimeUpdateStrategy>();
        world.init_resource::<FixedTime>();
        world.add_systems(ScheduleLabel::First, update_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Resource, Default)]
    struct FixedRuns(u32);

    fn count_fixed(mut runs: ResMut<FixedRuns>) {
        runs.0 += 1;
    }

    fn manual_world(delta: Duration) -> World {
        let mut world = World::new();
        world.insert_resource(TimeUpdateStrategy::ManualDuration(delta));
        world.insert_resource(FixedTime::new(Duration::from_millis(10)));
        world.init_resource::<FixedRuns>();
        world.add_systems(ScheduleLabel::FixedUpdate, count_fixed);
        world
    }

    #[test]
    fn manual_strategy_advances_by_the_given_delta() {
        let mut world = manual_world(Duration::from_millis(16));
        world.update();
        world.update();
        let time = world.resource::<Time>();
        assert_eq!(time.delta(), Duration::from_millis(16));
        assert_eq!(time.elapsed(), Duration::from_millis(32));
        assert_eq!(time.frame(), 2);
    }

    #[test]
    fn fixed_update_runs_once_per_elapsed_step() {
        let mut world = manual_world(Duration::from_millis(25));
        world.update();
        assert_eq!(world.resource::<FixedRuns>().0, 2);
        world.update();
        assert_eq!(world.resource::<FixedRuns>().0, 5);
        assert_eq!(world.resource::<FixedTime>().accumulator(), Duration::ZERO);
    }

    #[test]
    fn fixed_update_is_capped_per_frame() {
        let mut world = manual_world(Duration::from_millis(1000));
        world.update();
        assert_eq!(world.resource::<FixedRuns>().0, 8);
        assert!(world.resource::<FixedTime>().accumulator() < Duration::from_millis(10));
    }

    #[test]
    fn overstep_is_a_fraction_of_a_step() {
        let mut fixed = FixedTime::new(Duration::from_millis(10));
        fixed.accumulate(Duration::from_millis(25));
        assert_eq!(fixed.expend(), 2);
        assert!((fixed.overstep_fraction() - 0.5).abs() < 1e-9);
    }
}
