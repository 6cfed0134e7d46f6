use crate::component::{ChangeDetection, ColumnKind, Component};
use crate::tick::Tick;
use std::any::Any;
use std::ptr::NonNull;

/// Type-erased view of a [`Column`], used by archetypes to move and drop rows
/// without knowing the component type.
pub(crate) trait ErasedColumn: Any {
    fn kind(&self) -> ColumnKind;

    fn len(&self) -> usize;

    /// Drops `row`, moving the last row into its place.
    fn swap_remove(&mut self, row: usize);

    /// Moves `src_row` out of `src` (swap-remove) and appends it here with its
    /// ticks. `src` must hold the same component type.
    fn import(&mut self, src: &mut dyn ErasedColumn, src_row: usize);

    /// Marks rows whose value no longer matches the shadow copy or hash.
    /// Returns how many rows changed.
    fn check_changed(&mut self, tick: Tick) -> usize;

    fn row_added(&self, row: usize) -> Tick;

    fn row_changed(&self, row: usize) -> Tick;

    fn last_added(&self) -> Tick;

    fn last_changed(&self) -> Tick;

    fn rebase_ticks(&mut self, offset: u32);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

enum Detector<T> {
    Off,
    Shadow {
        copies: Vec<T>,
        clone: fn(&T) -> T,
        eq: fn(&T, &T) -> bool,
    },
    Hashed {
        hashes: Vec<u64>,
        hash: fn(&T) -> u64,
    },
}

impl<T> Detector<T> {
    fn push(&mut self, value: &T) {
        match self {
            Detector::Off => {}
            Detector::Shadow { copies, clone, .. } => copies.push(clone(value)),
            Detector::Hashed { hashes, hash } => hashes.push(hash(value)),
        }
    }

    fn refresh(&mut self, row: usize, value: &T) {
        match self {
            Detector::Off => {}
            Detector::Shadow { copies, clone, .. } => copies[row] = clone(value),
            Detector::Hashed { hashes, hash } => hashes[row] = hash(value),
        }
    }

    /// Compares `value` against the snapshot for `row` and refreshes it.
    fn differs(&mut self, row: usize, value: &T) -> bool {
        match self {
            Detector::Off => false,
            Detector::Shadow { copies, clone, eq } => {
                if eq(&copies[row], value) {
                    false
                } else {
                    copies[row] = clone(value);
                    true
                }
            }
            Detector::Hashed { hashes, hash } => {
                let current = hash(value);
                if hashes[row] == current {
                    false
                } else {
                    hashes[row] = current;
                    true
                }
            }
        }
    }

    fn swap_remove(&mut self, row: usize) {
        match self {
            Detector::Off => {}
            Detector::Shadow { copies, .. } => {
                copies.swap_remove(row);
            }
            Detector::Hashed { hashes, .. } => {
                hashes.swap_remove(row);
            }
        }
    }

    fn truncate(&mut self, len: usize) {
        match self {
            Detector::Off => {}
            Detector::Shadow { copies, .. } => copies.truncate(len),
            Detector::Hashed { hashes, .. } => hashes.truncate(len),
        }
    }

    fn is_active(&self) -> bool {
        !matches!(self, Detector::Off)
    }
}

/// Base pointers into a column, valid until the column is next resized.
pub(crate) struct ColumnAccess<T> {
    pub values: NonNull<T>,
    pub added: NonNull<Tick>,
    pub changed: NonNull<Tick>,
}

impl<T> Clone for ColumnAccess<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ColumnAccess<T> {}

/// Dense storage for one component type inside one archetype.
///
/// Every row carries an `added` and a `changed` tick. Marker columns keep only
/// the `added` ticks and answer `changed` queries from them.
pub(crate) struct Column<T> {
    kind: ColumnKind,
    values: Vec<T>,
    detector: Detector<T>,
    added: Vec<Tick>,
    changed: Vec<Tick>,
    last_added: Tick,
    last_changed: Tick,
}

impl<T: Component> Column<T> {
    pub fn new(kind: ColumnKind) -> Self {
        let detector = match (kind, T::change_detection()) {
            (ColumnKind::Shadow, ChangeDetection::Shadow { clone, eq }) => Detector::Shadow {
                copies: Vec::new(),
                clone,
                eq,
            },
            (ColumnKind::Hashed, ChangeDetection::Hashed { hash }) => Detector::Hashed {
                hashes: Vec::new(),
                hash,
            },
            _ => Detector::Off,
        };

        Self {
            kind,
            values: Vec::new(),
            detector,
            added: Vec::new(),
            changed: Vec::new(),
            last_added: Tick::NONE,
            last_changed: Tick::NONE,
        }
    }

    fn is_marker(&self) -> bool {
        self.kind == ColumnKind::Marker
    }

    pub fn append(&mut self, tick: Tick, value: T) {
        self.detector.push(&value);
        self.values.push(value);
        self.added.push(tick);
        if !self.is_marker() {
            self.changed.push(tick);
        }
        self.last_added = self.last_added.latest(tick);
        self.last_changed = self.last_changed.latest(tick);
    }

    /// Replaces the value in `row` and stamps it as changed.
    pub fn update(&mut self, tick: Tick, row: usize, value: T) {
        self.detector.refresh(row, &value);
        self.values[row] = value;
        if !self.is_marker() {
            self.changed[row] = tick;
        }
        self.last_changed = self.last_changed.latest(tick);
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
        self.detector.truncate(len);
        self.added.truncate(len);
        self.changed.truncate(len);
    }

    pub fn get(&self, row: usize) -> Option<&T> {
        self.values.get(row)
    }

    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        self.values.get_mut(row)
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Re-checks a single row after an out-of-band mutation.
    pub fn check_row(&mut self, row: usize, tick: Tick) -> bool {
        if !self.detector.differs(row, &self.values[row]) {
            return false;
        }
        self.changed[row] = tick;
        self.last_changed = self.last_changed.latest(tick);
        true
    }

    pub fn tracks_mutation(&self) -> bool {
        self.detector.is_active()
    }

    pub fn access(&mut self) -> ColumnAccess<T> {
        let added = NonNull::new(self.added.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let changed = if self.is_marker() {
            added
        } else {
            NonNull::new(self.changed.as_mut_ptr()).unwrap_or(NonNull::dangling())
        };
        ColumnAccess {
            values: NonNull::new(self.values.as_mut_ptr()).unwrap_or(NonNull::dangling()),
            added,
            changed,
        }
    }

    /// Pointers for read-only use. Nothing may be written through them.
    pub fn read_access(&self) -> ColumnAccess<T> {
        let added = NonNull::new(self.added.as_ptr().cast_mut()).unwrap_or(NonNull::dangling());
        let changed = if self.is_marker() {
            added
        } else {
            NonNull::new(self.changed.as_ptr().cast_mut()).unwrap_or(NonNull::dangling())
        };
        ColumnAccess {
            values: NonNull::new(self.values.as_ptr().cast_mut()).unwrap_or(NonNull::dangling()),
            added,
            changed,
        }
    }
}

impl<T: Component> ErasedColumn for Column<T> {
    fn kind(&self) -> ColumnKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn swap_remove(&mut self, row: usize) {
        self.values.swap_remove(row);
        self.detector.swap_remove(row);
        self.added.swap_remove(row);
        if !self.is_marker() {
            self.changed.swap_remove(row);
        }
    }

    fn import(&mut self, src: &mut dyn ErasedColumn, src_row: usize) {
        let src = src
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .unwrap_or_else(|| panic!("column type mismatch importing {}", std::any::type_name::<T>()));

        let value = src.values.swap_remove(src_row);
        let added = src.added.swap_remove(src_row);
        let changed = if src.is_marker() {
            added
        } else {
            src.changed.swap_remove(src_row)
        };
        match (&mut self.detector, &mut src.detector) {
            (Detector::Shadow { copies, .. }, Detector::Shadow { copies: theirs, .. }) => {
                copies.push(theirs.swap_remove(src_row));
            }
            (Detector::Hashed { hashes, .. }, Detector::Hashed { hashes: theirs, .. }) => {
                hashes.push(theirs.swap_remove(src_row));
            }
            _ => {}
        }

        self.values.push(value);
        self.added.push(added);
        if !self.is_marker() {
            self.changed.push(changed);
        }
        self.last_added = self.last_added.latest(added);
        self.last_changed = self.last_changed.latest(changed);
    }

    fn check_changed(&mut self, tick: Tick) -> usize {
        if !self.detector.is_active() {
            return 0;
        }
        let mut count = 0;
        for (row, value) in self.values.iter().enumerate() {
            if self.detector.differs(row, value) {
                self.changed[row] = tick;
                count += 1;
            }
        }
        if count > 0 {
            self.last_changed = self.last_changed.latest(tick);
        }
        count
    }

    fn row_added(&self, row: usize) -> Tick {
        self.added[row]
    }

    fn row_changed(&self, row: usize) -> Tick {
        if self.is_marker() {
            self.added[row]
        } else {
            self.changed[row]
        }
    }

    fn last_added(&self) -> Tick {
        self.last_added
    }

    fn last_changed(&self) -> Tick {
        self.last_changed
    }

    fn rebase_ticks(&mut self, offset: u32) {
        for tick in self.added.iter_mut().chain(self.changed.iter_mut()) {
            tick.rebase(offset);
        }
        self.last_added.rebase(offset);
        self.last_changed.rebase(offset);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, PartialEq, Debug)]
    struct Health(u32);

    impl Component for Health {
        const KIND: ComponentKind = ComponentKind::Comparable;

        fn change_detection() -> ChangeDetection<Self> {
            ChangeDetection::shadow()
        }
    }

    #[derive(Hash)]
    struct Label(String);

    impl Component for Label {
        const KIND: ComponentKind = ComponentKind::Comparable;

        fn change_detection() -> ChangeDetection<Self> {
            ChangeDetection::hashed()
        }
    }

    struct Tag;

    impl Component for Tag {}

    struct DropCounter(Rc<Cell<usize>>);

    impl Component for DropCounter {}

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn append_records_both_ticks() {
        let mut column = Column::<Health>::new(ColumnKind::Shadow);
        column.append(Tick::new(3), Health(10));
        assert_eq!(column.row_added(0), Tick::new(3));
        assert_eq!(column.row_changed(0), Tick::new(3));
        assert_eq!(column.last_added(), Tick::new(3));
    }

    #[test]
    fn shadow_scan_marks_only_mutated_rows() {
        let mut column = Column::<Health>::new(ColumnKind::Shadow);
        column.append(Tick::new(1), Health(10));
        column.append(Tick::new(1), Health(20));
        column.append(Tick::new(1), Health(30));

        column.get_mut(1).unwrap().0 = 25;
        assert_eq!(column.check_changed(Tick::new(4)), 1);

        assert_eq!(column.row_changed(0), Tick::new(1));
        assert_eq!(column.row_changed(1), Tick::new(4));
        assert_eq!(column.row_changed(2), Tick::new(1));
        assert_eq!(column.last_changed(), Tick::new(4));

        // The shadow was refreshed, so a second scan finds nothing.
        assert_eq!(column.check_changed(Tick::new(5)), 0);
    }

    #[test]
    fn hashed_scan_detects_heap_changes() {
        let mut column = Column::<Label>::new(ColumnKind::Hashed);
        column.append(Tick::new(1), Label("a".into()));
        column.get_mut(0).unwrap().0.push('b');
        assert_eq!(column.check_changed(Tick::new(2)), 1);
        assert_eq!(column.row_changed(0), Tick::new(2));
    }

    #[test]
    fn update_refreshes_snapshot() {
        let mut column = Column::<Health>::new(ColumnKind::Shadow);
        column.append(Tick::new(1), Health(1));
        column.update(Tick::new(2), 0, Health(2));
        assert_eq!(column.row_changed(0), Tick::new(2));
        assert_eq!(column.check_changed(Tick::new(3)), 0);
    }

    #[test]
    fn swap_remove_keeps_rows_aligned() {
        let mut column = Column::<Health>::new(ColumnKind::Shadow);
        column.append(Tick::new(1), Health(1));
        column.append(Tick::new(2), Health(2));
        column.append(Tick::new(3), Health(3));
        column.swap_remove(0);

        assert_eq!(column.len(), 2);
        assert_eq!(column.get(0), Some(&Health(3)));
        assert_eq!(column.row_added(0), Tick::new(3));
    }

    #[test]
    fn import_moves_value_and_ticks() {
        let mut from = Column::<Health>::new(ColumnKind::Shadow);
        from.append(Tick::new(1), Health(1));
        from.append(Tick::new(2), Health(2));
        let mut to = Column::<Health>::new(ColumnKind::Shadow);

        to.import(&mut from, 0);

        assert_eq!(from.len(), 1);
        assert_eq!(from.get(0), Some(&Health(2)));
        assert_eq!(to.get(0), Some(&Health(1)));
        assert_eq!(to.row_added(0), Tick::new(1));
        assert_eq!(to.check_changed(Tick::new(9)), 0);
    }

    #[test]
    fn marker_column_answers_changed_from_added() {
        let mut column = Column::<Tag>::new(ColumnKind::Marker);
        column.append(Tick::new(4), Tag);
        assert_eq!(column.len(), 1);
        assert_eq!(column.row_changed(0), Tick::new(4));
        column.swap_remove(0);
        assert_eq!(column.len(), 0);
    }

    #[test]
    fn drops_values_on_remove_and_truncate() {
        let drops = Rc::new(Cell::new(0));
        let mut column = Column::<DropCounter>::new(ColumnKind::Plain);
        for _ in 0..3 {
            column.append(Tick::new(1), DropCounter(drops.clone()));
        }
        column.swap_remove(0);
        assert_eq!(drops.get(), 1);
        column.truncate(0);
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn rebase_shifts_every_tick() {
        let mut column = Column::<Health>::new(ColumnKind::Shadow);
        column.append(Tick::new(100), Health(1));
        column.rebase_ticks(60);
        assert_eq!(column.row_added(0), Tick::new(40));
        assert_eq!(column.last_changed(), Tick::new(40));
    }
}
