use anyhow::{ensure, Context};
use flux_ecs::prelude::*;
use std::time::Duration;

#[derive(Component, Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Component, Debug, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Component, Debug, Clone, PartialEq)]
#[component(comparable)]
struct Health(u32);

#[derive(Component)]
struct Burning;

#[derive(Event, Debug)]
struct Damaged {
    amount: u32,
}

#[derive(Event)]
struct Died;

#[derive(Resource, Default)]
struct Stats {
    fixed_steps: u32,
    deaths: u32,
}

const MOVEMENT: SystemSet = SystemSet::new("movement");

fn spawn_ships(mut commands: Commands) {
    for index in 0..3 {
        let ship = commands
            .spawn((
                Position { x: index as f32, y: 0.0 },
                Velocity { x: 1.0, y: 0.5 },
                Health(30),
            ))
            .observe::<Died, _>(announce_death)
            .id();
        commands.spawn((Position { x: 0.0, y: 0.0 }, Child::new(ship)));
    }
    commands.spawn((Position { x: 10.0, y: 10.0 }, Health(5), Burning));
}

fn integrate(mut query: Query<(&mut Position, &Velocity)>, time: Res<FixedTime>, mut stats: ResMut<Stats>) {
    let dt = time.step().as_secs_f32();
    for (position, velocity) in &mut query {
        position.x += velocity.x * dt;
        position.y += velocity.y * dt;
    }
    stats.fixed_steps += 1;
}

fn burn(query: Query<Entity, With<Burning>>, mut damaged: EventWriter<Damaged>, mut commands: Commands) {
    for entity in &query {
        damaged.send(Damaged { amount: 2 });
        commands.add(move |world: &mut World| {
            if let Some(mut health) = world.get_mut::<Health>(entity) {
                health.0 = health.0.saturating_sub(2);
            }
        });
    }
}

fn log_damage(mut damaged: EventReader<Damaged>) {
    let total: u32 = damaged.read().map(|event| event.amount).sum();
    if total > 0 {
        log::debug!("{total} damage dealt this frame");
    }
}

fn report_health(query: Query<(Entity, &Health), Changed<Health>>, mut commands: Commands) {
    for (entity, health) in &query {
        log::info!("{entity} health is now {}", health.0);
        if health.0 == 0 {
            commands.trigger_targets(Died, entity);
            commands.entity(entity).despawn();
        }
    }
}

fn announce_death(died: On<Died>, mut stats: ResMut<Stats>) {
    if let Some(entity) = died.target() {
        log::info!("{entity} died");
    }
    stats.deaths += 1;
}

fn count_deaths(died: On<Died>, mut stats: ResMut<Stats>) {
    if died.target().is_some() {
        stats.deaths += 1;
    }
}

fn report_removals(mut removed: RemovedComponents<Health>) {
    for entity in removed.read() {
        log::info!("{entity} lost its health component");
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let mut world = World::new();
    world.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(16)));
    world.init_resource::<Stats>();
    world.add_event::<Damaged>();
    world.add_observer(Observer::new::<Died, _>(count_deaths));

    world.add_systems(ScheduleLabel::Startup, spawn_ships);
    world.configure_sets(ScheduleLabel::FixedUpdate, MOVEMENT.run_if(resource_exists::<Stats>));
    world.add_systems(ScheduleLabel::FixedUpdate, integrate.in_set(MOVEMENT));
    world.add_systems(ScheduleLabel::Update, (burn, log_damage, report_health).chain());
    world.add_systems(ScheduleLabel::Last, report_removals);

    for _ in 0..4 {
        world.update();
    }

    let frame = world.resource::<Time>().frame();
    let stats = world.resource::<Stats>();
    log::info!(
        "{frame} frames, {} fixed steps, {} deaths, {} entities",
        stats.fixed_steps,
        stats.deaths,
        world.entity_count()
    );
    ensure!(stats.fixed_steps > 0, "fixed update never ran");

    let positions = world
        .register_system(|query: Query<&Position, Without<Child>>| query.iter().map(|position| position.x).sum::<f32>());
    let sum = world.run_system(positions).context("summing positions")?;
    log::info!("sum of root x positions: {sum:.3}");
    Ok(())
}
