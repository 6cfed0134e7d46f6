use crate::column::Column;
use crate::component::Component;
use crate::tick::Tick;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Mutable access to one component handed out by
/// [`World::get_mut`](crate::world::World::get_mut).
///
/// Comparable components are re-checked against their shadow copy or hash when
/// the guard drops, so only a real modification marks the row changed.
pub struct Mut<'w, T: Component> {
    column: &'w mut Column<T>,
    row: usize,
    tick: Tick,
}

impl<'w, T: Component> Mut<'w, T> {
    pub(crate) fn new(column: &'w mut Column<T>, row: usize, tick: Tick) -> Self {
        debug_assert!(column.get(row).is_some());
        Self { column, row, tick }
    }
}

impl<T: Component> Deref for Mut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.column.get(self.row) {
            Some(value) => value,
            None => unreachable!("Mut guard outlived its row"),
        }
    }
}

impl<T: Component> DerefMut for Mut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.column.get_mut(self.row) {
            Some(value) => value,
            None => unreachable!("Mut guard outlived its row"),
        }
    }
}

impl<T: Component> Drop for Mut<'_, T> {
    fn drop(&mut self) {
        if self.column.tracks_mutation() {
            self.column.check_row(self.row, self.tick);
        }
    }
}

impl<T: Component + fmt::Debug> fmt::Debug for Mut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mut").field(&**self).finish()
    }
}
