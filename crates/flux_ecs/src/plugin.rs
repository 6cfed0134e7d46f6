use crate::world::World;

/// A bundle of world setup: resources, systems, observers.
///
/// [`World::add_plugin`] applies each plugin type once.
pub trait Plugin: 'static {
    fn init(&self, world: &mut World);
}

impl<F: Fn(&mut World) + 'static> Plugin for F {
    fn init(&self, world: &mut World) {
        self(world)
    }
}
