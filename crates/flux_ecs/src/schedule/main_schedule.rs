use crate::schedule::ScheduleLabel;
use crate::time::FixedTime;
use crate::world::World;

const BEFORE_FIXED: [ScheduleLabel; 3] = [
    ScheduleLabel::First,
    ScheduleLabel::PreUpdate,
    ScheduleLabel::StateTransition,
];

const AFTER_FIXED: [ScheduleLabel; 6] = [
    ScheduleLabel::Update,
    ScheduleLabel::PostUpdate,
    ScheduleLabel::PreRender,
    ScheduleLabel::Render,
    ScheduleLabel::PostRender,
    ScheduleLabel::Last,
];

/// One frame: `Main`'s own systems, then every frame schedule in order, with
/// `FixedUpdate` repeated once per elapsed fixed step. Message buffers swap
/// after `Last`.
pub(crate) fn run_main(world: &mut World) {
    world.renormalise_ticks();
    world.run_schedule_systems(ScheduleLabel::Main);

    for label in BEFORE_FIXED {
        world.run_schedule_systems(label);
    }

    let steps = world.get_resource_mut::<FixedTime>().map_or(0, FixedTime::expend);
    for _ in 0..steps {
        world.run_schedule_systems(ScheduleLabel::FixedUpdate);
    }

    for label in AFTER_FIXED {
        world.run_schedule_systems(label);
    }
    world.clear_trackers();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventReader, EventWriter, Events};
    use crate::schedule::IntoSystemConfigs;
    use crate::resource::{Res, ResMut, Resource};

    #[derive(Resource, Default)]
    struct Order(Vec<ScheduleLabel>);

    #[derive(Event)]
    struct Ping;

    #[derive(Resource, Default)]
    struct Seen(Vec<usize>);

    #[test]
    fn frame_schedules_run_in_order() {
        let mut world = World::new();
        world.init_resource::<Order>();
        let labels = [
            ScheduleLabel::Last,
            ScheduleLabel::Update,
            ScheduleLabel::Main,
            ScheduleLabel::First,
            ScheduleLabel::PreRender,
            ScheduleLabel::Startup,
            ScheduleLabel::PreStartup,
        ];
        for label in labels {
            world.add_systems(label, move |mut order: ResMut<Order>| order.0.push(label));
        }

        world.update();
        world.update();

        use ScheduleLabel::*;
        assert_eq!(
            world.resource::<Order>().0,
            vec![
                PreStartup, Startup, Main, First, Update, PreRender, Last, Main, First, Update, PreRender, Last
            ]
        );
    }

    #[test]
    fn messages_live_for_two_frames() {
        let mut world = World::new();
        world.init_resource::<Seen>();
        world.add_event::<Ping>();
        world.add_systems(ScheduleLabel::Update, |events: Res<Events<Ping>>, mut seen: ResMut<Seen>| {
            seen.0.push(events.len());
        });

        world.send_event(Ping);
        for _ in 0..3 {
            world.update();
        }
        assert_eq!(world.resource::<Seen>().0, vec![1, 1, 0]);
    }

    #[derive(Resource)]
    struct Pending(u32);

    #[test]
    fn readers_see_messages_sent_after_them_next_frame() {
        fn read(mut pings: EventReader<Ping>, mut seen: ResMut<Seen>) {
            seen.0.push(pings.read().count());
        }
        fn write(mut pings: EventWriter<Ping>, mut pending: ResMut<Pending>) {
            if pending.0 > 0 {
                pending.0 -= 1;
                pings.send(Ping);
            }
        }

        let mut world = World::new();
        world.init_resource::<Seen>();
        world.insert_resource(Pending(1));
        world.add_event::<Ping>();
        world.add_systems(ScheduleLabel::Update, (read, write).chain());

        for _ in 0..3 {
            world.update();
        }
        assert_eq!(world.resource::<Seen>().0, vec![0, 1, 0]);
    }

    #[test]
    fn readers_after_the_writer_see_messages_once() {
        fn read(mut pings: EventReader<Ping>, mut seen: ResMut<Seen>) {
            seen.0.push(pings.read().count());
        }
        fn write(mut pings: EventWriter<Ping>, mut pending: ResMut<Pending>) {
            if pending.0 > 0 {
                pending.0 -= 1;
                pings.send(Ping);
            }
        }

        let mut world = World::new();
        world.init_resource::<Seen>();
        world.insert_resource(Pending(1));
        world.add_event::<Ping>();
        world.add_systems(ScheduleLabel::Update, (write, read).chain());

        for _ in 0..3 {
            world.update();
        }
        assert_eq!(world.resource::<Seen>().0, vec![1, 0, 0]);
    }
}
