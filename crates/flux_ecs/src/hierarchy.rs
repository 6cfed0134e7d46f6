use crate::component::{Component, ComponentHook};
use crate::entity::Entity;
use crate::world::World;

/// Links an entity to its parent. The parent's [`Parent`] component is kept
/// in sync automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    parent: Entity,
}

impl Child {
    pub fn new(parent: Entity) -> Self {
        Self { parent }
    }

    pub fn parent(&self) -> Entity {
        self.parent
    }
}

impl Component for Child {
    const ON_INSERT: Option<ComponentHook> = Some(add_to_parent);
    const ON_REMOVE: Option<ComponentHook> = Some(remove_from_parent);
}

/// The children of an entity, in the order they were attached.
///
/// Maintained by the world; inserting it directly panics. Despawning the
/// owner despawns every child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parent {
    children: Vec<Entity>,
}

impl Parent {
    pub fn children(&self) -> &[Entity] {
        &self.children
    }
}

impl Component for Parent {
    const RELATIONSHIP_TARGET: bool = true;

    fn related_entities(&self) -> &[Entity] {
        &self.children
    }
}

fn add_to_parent(world: &mut World, child: Entity) {
    let Some(parent) = world.get::<Child>(child).map(Child::parent) else {
        return;
    };
    if !world.contains(parent) {
        log::warn!("{child} names {parent} as its parent, but it does not exist");
        return;
    }

    match world.get_mut_untracked::<Parent>(parent) {
        Some(existing) => {
            if !existing.children.contains(&child) {
                existing.children.push(child);
            }
        }
        None => {
            world.insert_internal(
                parent,
                Parent {
                    children: vec![child],
                },
            );
        }
    }
}

fn remove_from_parent(world: &mut World, child: Entity) {
    let Some(parent) = world.get::<Child>(child).map(Child::parent) else {
        return;
    };
    let Some(existing) = world.get_mut_untracked::<Parent>(parent) else {
        return;
    };
    existing.children.retain(|&other| other != child);
    if existing.children.is_empty() {
        world.remove_internal::<Parent>(parent);
    }
}
