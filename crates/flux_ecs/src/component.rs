use crate::column::{Column, ErasedColumn};
use crate::entity::Entity;
use crate::world::World;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::mem::needs_drop;

pub use flux_ecs_macros::Component;

/// A typed piece of entity data.
///
/// The associated items classify the type for storage: `KIND` decides how the
/// component may be mutated and [`Component::change_detection`] supplies the
/// comparison used by comparable columns. `#[derive(Component)]` fills these in
/// from `#[component(comparable)]`, `#[component(comparable, hashed)]` and
/// `#[component(immutable)]`.
///
/// Whether a type is trivially hashable cannot be read from the type system,
/// so the attribute picks the column: `comparable` keeps a shadow copy and
/// `hashed` stores a 64-bit hash per row. The registry still records
/// [`ComponentInfo::is_trivially_hashable`], approximated by the type owning
/// no heap data, and logs a hint when a shadow column holds such data.
pub trait Component: Sized + 'static {
    const KIND: ComponentKind = ComponentKind::Plain;

    /// The world keeps this component up to date itself; inserting it directly
    /// is a misuse.
    const RELATIONSHIP_TARGET: bool = false;

    const ON_INSERT: Option<ComponentHook> = None;

    const ON_REMOVE: Option<ComponentHook> = None;

    fn change_detection() -> ChangeDetection<Self> {
        ChangeDetection::Off
    }

    /// Entities despawned together with the owner of this component. Only
    /// consulted for relationship targets.
    fn related_entities(&self) -> &[Entity] {
        &[]
    }
}

/// Called with the entity whose component was inserted, or is about to be
/// removed or replaced.
pub type ComponentHook = fn(&mut World, Entity);

/// Lists the entities linked to the given entity through one relationship
/// target component.
pub(crate) type RelatedEntities = fn(&World, Entity) -> Vec<Entity>;

pub type ComponentId = u16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Freely mutable, tracked only on insertion and replacement.
    Plain,
    /// Mutations are discovered by comparing against a shadow copy or hash.
    Comparable,
    /// Never handed out mutably; replacement is the only way to change it.
    Immutable,
}

/// How a comparable column notices in-place mutation.
pub enum ChangeDetection<T> {
    Off,
    Shadow {
        clone: fn(&T) -> T,
        eq: fn(&T, &T) -> bool,
    },
    Hashed {
        hash: fn(&T) -> u64,
    },
}

impl<T> ChangeDetection<T> {
    pub fn shadow() -> Self
    where
        T: Clone + PartialEq,
    {
        ChangeDetection::Shadow {
            clone: T::clone,
            eq: T::eq,
        }
    }

    pub fn hashed() -> Self
    where
        T: Hash,
    {
        ChangeDetection::Hashed {
            hash: hash_value::<T>,
        }
    }
}

fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Which column layout stores a component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Zero-sized: only add ticks are kept.
    Marker,
    /// Values plus a second copy compared after each mutating system.
    Shadow,
    /// Values plus a 64-bit hash per row.
    Hashed,
    Plain,
}

#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: &'static str,
    pub type_id: TypeId,
    pub size: usize,
    pub align: usize,
    /// Owns heap data (strings, vectors, boxes) and so cannot be compared
    /// byte for byte.
    pub has_indirection: bool,
    pub kind: ComponentKind,
    pub column_kind: ColumnKind,
    pub relationship_target: bool,
    pub(crate) on_insert: Option<ComponentHook>,
    pub(crate) on_remove: Option<ComponentHook>,
    pub(crate) related: Option<RelatedEntities>,
    new_column: fn(ColumnKind) -> Box<dyn ErasedColumn>,
}

impl ComponentInfo {
    pub fn is_trivially_hashable(&self) -> bool {
        !self.has_indirection
    }

    pub(crate) fn new_column(&self) -> Box<dyn ErasedColumn> {
        (self.new_column)(self.column_kind)
    }
}

fn new_column<T: Component>(kind: ColumnKind) -> Box<dyn ErasedColumn> {
    Box::new(Column::<T>::new(kind))
}

fn related_entities<T: Component>(world: &World, entity: Entity) -> Vec<Entity> {
    world
        .get::<T>(entity)
        .map(|component| component.related_entities().to_vec())
        .unwrap_or_default()
}

/// Assigns every component type a stable 16-bit id on first sight.
pub struct ComponentRegistry {
    type_to_id: HashMap<TypeId, ComponentId>,
    components: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            type_to_id: HashMap::new(),
            components: Vec::new(),
        }
    }

    pub fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.type_to_id.get(&type_id) {
            return id;
        }

        let id = ComponentId::try_from(self.components.len())
            .unwrap_or_else(|_| panic!("more than {} component types registered", ComponentId::MAX));
        let name = type_name::<T>();
        let column_kind = select_column_kind::<T>(name);
        if column_kind == ColumnKind::Shadow && needs_drop::<T>() {
            log::debug!("{name} owns heap data; #[component(comparable, hashed)] avoids cloning it per row");
        }

        let info = ComponentInfo {
            id,
            name,
            type_id,
            size: size_of::<T>(),
            align: align_of::<T>(),
            has_indirection: needs_drop::<T>(),
            kind: T::KIND,
            column_kind,
            relationship_target: T::RELATIONSHIP_TARGET,
            on_insert: T::ON_INSERT,
            on_remove: T::ON_REMOVE,
            related: T::RELATIONSHIP_TARGET.then_some(related_entities::<T> as RelatedEntities),
            new_column: new_column::<T>,
        };

        log::debug!("registered component {name} as {id} ({column_kind:?} column)");
        self.type_to_id.insert(type_id, id);
        self.components.push(info);
        id
    }

    pub fn get_id<T: Component>(&self) -> Option<ComponentId> {
        self.type_to_id.get(&TypeId::of::<T>()).copied()
    }

    pub fn get_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.components.get(id as usize)
    }

    /// Like [`get_info`](Self::get_info) for ids that came out of this
    /// registry.
    pub(crate) fn info(&self, id: ComponentId) -> &ComponentInfo {
        self.get_info(id)
            .unwrap_or_else(|| panic!("component id {id} is not registered"))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn select_column_kind<T: Component>(name: &str) -> ColumnKind {
    if size_of::<T>() == 0 {
        return ColumnKind::Marker;
    }
    match (T::KIND, T::change_detection()) {
        (ComponentKind::Comparable, ChangeDetection::Shadow { .. }) => ColumnKind::Shadow,
        (ComponentKind::Comparable, ChangeDetection::Hashed { .. }) => ColumnKind::Hashed,
        (ComponentKind::Comparable, ChangeDetection::Off) => {
            panic!("comparable component {name} does not provide change detection")
        }
        _ => ColumnKind::Plain,
    }
}
