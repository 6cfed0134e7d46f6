use flux_ecs::component::{ColumnKind, Component, ComponentKind};
use flux_ecs::event::Events;
use flux_ecs::prelude::*;
use std::marker::PhantomData;

#[derive(Component)]
struct Plain(#[allow(dead_code)] u32);

#[derive(Component, Clone, PartialEq)]
#[component(comparable)]
struct Shadowed(#[allow(dead_code)] u32);

#[derive(Component, Hash)]
#[component(comparable, hashed)]
struct Label(#[allow(dead_code)] String);

#[derive(Component)]
#[component(immutable)]
struct Seed(#[allow(dead_code)] u64);

#[derive(Component)]
struct Tagged<T>(PhantomData<T>);

#[derive(Resource, Debug, PartialEq, Default)]
enum Mode {
    #[default]
    Idle,
    Running,
}

#[derive(Event)]
struct Generic<T>(#[allow(dead_code)] T);

#[test]
fn attributes_select_the_kind() {
    assert_eq!(Plain::KIND, ComponentKind::Plain);
    assert_eq!(Shadowed::KIND, ComponentKind::Comparable);
    assert_eq!(Label::KIND, ComponentKind::Comparable);
    assert_eq!(Seed::KIND, ComponentKind::Immutable);
}

#[test]
fn registry_picks_columns_from_the_derive() {
    let mut world = World::new();
    let expected = [
        (world.register_component::<Plain>(), ColumnKind::Plain),
        (world.register_component::<Shadowed>(), ColumnKind::Shadow),
        (world.register_component::<Label>(), ColumnKind::Hashed),
        (world.register_component::<Seed>(), ColumnKind::Plain),
        (world.register_component::<Tagged<u8>>(), ColumnKind::Marker),
    ];
    for (id, kind) in expected {
        assert_eq!(world.components().get_info(id).map(|info| info.column_kind), Some(kind));
    }
}

#[test]
fn generic_types_derive() {
    let mut world = World::new();
    let a = world.register_component::<Tagged<u8>>();
    let b = world.register_component::<Tagged<u16>>();
    assert_ne!(a, b);

    world.send_event(Generic(3u8));
    assert_eq!(world.resource::<Events<Generic<u8>>>().len(), 1);
}

#[test]
fn enums_derive_resource() {
    let mut world = World::new();
    world.init_resource::<Mode>();
    *world.resource_mut::<Mode>() = Mode::Running;
    assert_eq!(world.resource::<Mode>(), &Mode::Running);
}
