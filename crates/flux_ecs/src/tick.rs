use std::fmt;

/// A point in world time, measured in system executions.
///
/// Ticks only move forward. [`Tick::NONE`] stands for "never" and is the
/// `last_run` of a system that has not run yet, so every row looks new to it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(u32);

impl Tick {
    pub const NONE: Tick = Tick(u32::MAX);

    /// Once the world counter passes this value the next frame rebases every
    /// stored tick.
    pub(crate) const RENORMALISE_THRESHOLD: u32 = 1 << 31;

    /// Distance kept between the rebased counter and tick zero. Ticks older
    /// than this collapse to zero.
    pub(crate) const MAX_AGE: u32 = 1 << 24;

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Whether something stamped at `self` happened after `last_run`.
    pub fn is_newer_than(self, last_run: Tick) -> bool {
        if self.is_none() {
            return false;
        }
        last_run.is_none() || self.0 > last_run.0
    }

    /// The later of two ticks, treating [`Tick::NONE`] as older than anything.
    pub(crate) fn latest(self, other: Tick) -> Tick {
        match (self.is_none(), other.is_none()) {
            (true, _) => other,
            (_, true) => self,
            _ => Tick(self.0.max(other.0)),
        }
    }

    pub(crate) fn rebase(&mut self, offset: u32) {
        if !self.is_none() {
            self.0 = self.0.saturating_sub(offset);
        }
    }

    pub(crate) fn next(self) -> Tick {
        let next = self.0 + 1;
        assert!(next != u32::MAX, "world tick counter exhausted");
        Tick(next)
    }
}

impl fmt::Debug for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("Tick(never)")
        } else {
            write!(f, "Tick({})", self.0)
        }
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
