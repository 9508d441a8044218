use std::cmp::Ordering;

use crate::EntryHandle;

/// Compares stored entries by value.
///
/// A comparator resolves handles through the payload store it was built
/// against and orders the referenced values. By convention the invalid handle
/// stands for the probe value bound to the comparator instance, so a single
/// method covers both handle-vs-handle and handle-vs-probe comparisons: to
/// look up a value that may not be stored yet, build a comparator carrying
/// that value and pass [`EntryHandle::invalid`] where the probe side goes.
///
/// # Contract
///
/// Implementations must be pure (no side effects, repeated calls agree) and
/// must define a strict total order over the live entries of one dictionary.
/// They are called concurrently from reader threads, so resolving a handle
/// must not require writer-side synchronization. An inconsistent comparator
/// is not detectable by the dictionary; it manifests as silent duplicates or
/// lost lookups.
pub trait EntryComparator {
    /// Orders the values behind `lhs` and `rhs`. Either side may be the
    /// invalid handle, which denotes the bound probe value.
    fn compare(&self, lhs: EntryHandle, rhs: EntryHandle) -> Ordering;

    /// `true` if the value behind `lhs` orders strictly before `rhs`.
    fn less(&self, lhs: EntryHandle, rhs: EntryHandle) -> bool {
        self.compare(lhs, rhs) == Ordering::Less
    }

    /// `true` if both sides resolve to equal values.
    fn matches(&self, lhs: EntryHandle, rhs: EntryHandle) -> bool {
        self.compare(lhs, rhs) == Ordering::Equal
    }
}

impl<C: EntryComparator + ?Sized> EntryComparator for &C {
    fn compare(&self, lhs: EntryHandle, rhs: EntryHandle) -> Ordering {
        (**self).compare(lhs, rhs)
    }
}
