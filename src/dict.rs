use crate::compare::EntryComparator;
use crate::generation::Generation;
use crate::memory::MemoryUsage;
use crate::tree::{FrozenView, Tree};
use crate::EntryHandle;

/// Outcome of [`UniqueStoreDictionary::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddResult {
    /// The handle now representing the value: freshly allocated on a miss,
    /// the existing one on a hit.
    pub handle: EntryHandle,
    /// `false` if the value was already present.
    pub inserted: bool,
}

/// Relocation capability supplied by the payload store during compaction.
pub trait Compactable {
    /// Moves the entry behind `old` to its compacted location and returns the
    /// new handle, or `old` itself if the entry did not move. The referenced
    /// value must be unchanged.
    fn move_entry(&mut self, old: EntryHandle) -> EntryHandle;
}

/// Malformed bulk input rejected by [`UniqueStoreDictionary::build`] before
/// any mutation happens.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// The handle and reference-count sequences must be parallel.
    #[error("handle and ref count sequences differ in length: {handles} vs {ref_counts}")]
    LengthMismatch { handles: usize, ref_counts: usize },
    /// The input must carry at least the reserved sentinel slot.
    #[error("build input is empty")]
    Empty,
}

/// A deduplicating ordered dictionary over handle-addressed entries.
///
/// The dictionary keeps exactly one handle per distinct value (as judged by
/// the caller's [`EntryComparator`]) and lets any number of reader threads
/// traverse a stable [`FrozenView`] while a single writer mutates, freezes
/// and compacts the structure. The single-writer discipline is enforced by
/// the type system: every mutating operation takes `&mut self`, while readers
/// work on cloned views handed out by the writer.
///
/// # Writer protocol
///
/// At well-defined checkpoints the owning store drives the generation
/// protocol: [`freeze`](Self::freeze) publishes a new view at the end of a
/// write batch, [`transfer_hold_lists`](Self::transfer_hold_lists) tags the
/// batch's retired nodes with the closing generation, and
/// [`trim_hold_lists`](Self::trim_hold_lists) reclaims every generation below
/// the externally certified first-still-observable bound. Passing a bound
/// that a live reader has not advanced past frees memory under that reader;
/// the dictionary has no way to detect this, so the bound's accuracy is the
/// single most safety-critical caller obligation.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::cmp::Ordering;
/// use unique_store::{EntryComparator, EntryHandle, UniqueStoreDictionary};
///
/// // A toy payload store: values in a vector, the handle offset is the slot
/// // index. Slot 0 stays reserved so that offset 0 never names a live entry.
/// // Interior mutability lets the allocation callback run while a comparator
/// // borrows the store.
/// struct Store {
///     values: RefCell<Vec<u64>>,
/// }
///
/// impl Store {
///     fn allocate(&self, value: u64) -> EntryHandle {
///         let mut values = self.values.borrow_mut();
///         values.push(value);
///         EntryHandle::new(0, (values.len() - 1) as u32)
///     }
///
///     fn get(&self, handle: EntryHandle) -> u64 {
///         self.values.borrow()[handle.offset() as usize]
///     }
/// }
///
/// struct Comparator<'a> {
///     store: &'a Store,
///     probe: u64,
/// }
///
/// impl Comparator<'_> {
///     fn resolve(&self, handle: EntryHandle) -> u64 {
///         if handle.is_valid() {
///             self.store.get(handle)
///         } else {
///             self.probe
///         }
///     }
/// }
///
/// impl EntryComparator for Comparator<'_> {
///     fn compare(&self, lhs: EntryHandle, rhs: EntryHandle) -> Ordering {
///         self.resolve(lhs).cmp(&self.resolve(rhs))
///     }
/// }
///
/// let store = Store {
///     values: RefCell::new(vec![0]),
/// };
/// let mut dict = UniqueStoreDictionary::new();
///
/// for value in [7, 3, 7, 9, 3] {
///     let comp = Comparator { store: &store, probe: value };
///     let result = dict.add(&comp, || store.allocate(value));
///     assert_eq!(store.get(result.handle), value);
/// }
/// // Duplicates collapsed: only 3, 7 and 9 were materialized.
/// assert_eq!(store.values.borrow().len(), 4);
///
/// dict.freeze();
/// let view = dict.frozen_view();
/// let values: Vec<u64> = view.iter().map(|h| store.get(h)).collect();
/// assert_eq!(values, vec![3, 7, 9]);
/// ```
pub struct UniqueStoreDictionary {
    tree: Tree<()>,
}

impl UniqueStoreDictionary {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self { tree: Tree::new() }
    }

    /// Adds the value probed by `comp`, deduplicating against the live tree.
    ///
    /// The tree is probed first; on a hit the existing handle is returned and
    /// `allocate` is never invoked, so a duplicate `add` has no allocation
    /// side effect. Only on a confirmed miss does `allocate` materialize the
    /// value in the payload store, and the returned handle is inserted at the
    /// probed position.
    pub fn add<C, F>(&mut self, comp: &C, allocate: F) -> AddResult
    where
        C: EntryComparator + ?Sized,
        F: FnOnce() -> EntryHandle,
    {
        let position = self.tree.lower_bound(EntryHandle::invalid(), comp);
        if let Some(key) = position.key() {
            if !comp.less(EntryHandle::invalid(), key) {
                return AddResult {
                    handle: key,
                    inserted: false,
                };
            }
        }
        let handle = allocate();
        debug_assert!(handle.is_valid(), "payload store returned the null handle");
        self.tree.insert(position, handle, ());
        AddResult {
            handle,
            inserted: true,
        }
    }

    /// Looks up the value probed by `comp` in the live tree. Returns the
    /// invalid handle if absent. No mutation.
    pub fn find<C>(&self, comp: &C) -> EntryHandle
    where
        C: EntryComparator + ?Sized,
    {
        let position = self.tree.lower_bound(EntryHandle::invalid(), comp);
        match position.key() {
            Some(key) if !comp.less(EntryHandle::invalid(), key) => key,
            _ => EntryHandle::invalid(),
        }
    }

    /// Unlinks `handle` from the dictionary. The caller has already decided
    /// the entry is dead (its reference count reached zero); no reference
    /// counting happens here.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is invalid or not the key the probe lands on;
    /// both are caller contract violations, not recoverable conditions.
    pub fn remove<C>(&mut self, comp: &C, handle: EntryHandle)
    where
        C: EntryComparator + ?Sized,
    {
        assert!(handle.is_valid(), "remove requires a valid handle");
        let position = self.tree.lower_bound(handle, comp);
        assert_eq!(
            position.key(),
            Some(handle),
            "remove: handle is not present in the dictionary"
        );
        self.tree.remove(position);
    }

    /// Bulk (re)population from a saved snapshot: `handles` in comparator
    /// order with parallel `ref_counts`. Slot 0 is the reserved sentinel and
    /// is skipped. Handles with a nonzero count are loaded; dead handles are
    /// routed to `on_zero_ref` so the caller can reclaim their payload
    /// instead of inserting a dead entry.
    ///
    /// The previous node set, if any, is retired through the hold protocol.
    /// Input is validated before any mutation.
    pub fn build<F>(
        &mut self,
        handles: &[EntryHandle],
        ref_counts: &[u32],
        mut on_zero_ref: F,
    ) -> Result<(), BuildError>
    where
        F: FnMut(EntryHandle),
    {
        if handles.len() != ref_counts.len() {
            return Err(BuildError::LengthMismatch {
                handles: handles.len(),
                ref_counts: ref_counts.len(),
            });
        }
        if handles.is_empty() {
            return Err(BuildError::Empty);
        }
        let mut live = Vec::with_capacity(handles.len() - 1);
        for (&handle, &ref_count) in handles[1..].iter().zip(&ref_counts[1..]) {
            if ref_count != 0 {
                live.push(handle);
            } else {
                on_zero_ref(handle);
            }
        }
        self.tree.bulk_load(&live);
        Ok(())
    }

    /// Realigns the dictionary's keys after the payload store compacted its
    /// backing storage. Walks the live tree in order and asks `compactable`
    /// for each entry's new location; relocated keys are rewritten in place
    /// after thawing the node, so any still-published frozen view keeps
    /// seeing the old handles.
    pub fn move_entries(&mut self, compactable: &mut impl Compactable) {
        let mut iter = self.tree.first();
        while iter.valid() {
            let old = self.tree.key(&iter);
            let new = compactable.move_entry(old);
            if new != old {
                self.tree.thaw(&mut iter);
                self.tree.write_key(&iter, new);
            }
            self.tree.step(&mut iter);
        }
    }

    /// Publishes the live tree as the new frozen view. O(#nodes touched
    /// since the last freeze).
    pub fn freeze(&mut self) {
        self.tree.freeze();
    }

    /// Tags everything retired during the just-closed write batch with
    /// `generation`. Generations must be non-decreasing across calls.
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.tree.transfer_hold_lists(generation);
    }

    /// Physically reclaims every hold bucket tagged with a generation below
    /// `first_still_observable`.
    ///
    /// The bound comes from the owning store's reader-epoch bookkeeping and
    /// must be non-decreasing and accurate: certifying a generation some
    /// reader still observes frees nodes under that reader's traversal.
    pub fn trim_hold_lists(&mut self, first_still_observable: Generation) {
        self.tree.trim_hold_lists(first_still_observable);
    }

    /// The snapshot published by the last [`freeze`](Self::freeze). Clones of
    /// the view are handed to reader threads.
    pub fn frozen_view(&self) -> FrozenView {
        self.tree.frozen_view()
    }

    /// Visits every key of `view` in comparator order, e.g. when saving a
    /// snapshot.
    pub fn foreach_key(&self, view: &FrozenView, visit: impl FnMut(EntryHandle)) {
        view.for_each(visit);
    }

    /// Number of unique values in the frozen view. Lags the live tree until
    /// the next freeze, which is what makes it safe to report without writer
    /// synchronization.
    pub fn num_uniques(&self) -> usize {
        self.frozen_view().len()
    }

    /// Node memory breakdown; entry payload bytes are the payload store's.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.tree.memory_usage()
    }
}

impl Default for UniqueStoreDictionary {
    fn default() -> Self {
        Self::new()
    }
}
