use std::fmt;

use smallvec::SmallVec;
use triomphe::Arc;

use super::arena::{NodeArena, NIL};
use crate::compare::EntryComparator;
use crate::EntryHandle;

/// An immutable snapshot of the dictionary, published by the last `freeze`.
///
/// A view is cheap to clone and is `Send + Sync`: the writer hands clones to
/// reader threads, which traverse and search it without any synchronization.
/// The reachable node set of a published view is never mutated; the one
/// caller obligation is the generation contract: the owning store must not
/// pass a `first_still_observable` bound to `trim_hold_lists` that a thread
/// still holding this view has not advanced past.
pub struct FrozenView<D: Copy + Default = ()> {
    arena: Arc<NodeArena<D>>,
    root: u32,
    size: u32,
}

impl<D: Copy + Default> FrozenView<D> {
    pub(crate) fn new(arena: Arc<NodeArena<D>>) -> Self {
        let (root, size) = arena.load_published();
        Self { arena, root, size }
    }

    /// Number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The first key of the snapshot that does not order before the probe
    /// bound to `comp`, or `None` when every key does. Descends from the
    /// view's captured root, so it stays answerable from reader threads
    /// while the writer mutates the live tree.
    pub fn lower_bound<C>(&self, probe: EntryHandle, comp: &C) -> Option<EntryHandle>
    where
        C: EntryComparator + ?Sized,
    {
        let mut candidate = None;
        let mut id = self.root;
        while id != NIL {
            // SAFETY: `id` is reachable from a published frozen root; such
            // slots are immutable and not recycled while this view's
            // generation may still be observed.
            let node = unsafe { self.arena.read(id) };
            if comp.less(node.key, probe) {
                id = node.right;
            } else {
                candidate = Some(node.key);
                id = node.left;
            }
        }
        candidate
    }

    /// Keyed point lookup against the snapshot: the handle whose value
    /// matches the probe bound to `comp`, or the invalid handle on a miss.
    pub fn find<C>(&self, comp: &C) -> EntryHandle
    where
        C: EntryComparator + ?Sized,
    {
        match self.lower_bound(EntryHandle::invalid(), comp) {
            Some(key) if !comp.less(EntryHandle::invalid(), key) => key,
            _ => EntryHandle::invalid(),
        }
    }

    /// Visits every key of the snapshot in comparator order.
    pub fn for_each(&self, mut visit: impl FnMut(EntryHandle)) {
        for key in self.iter() {
            visit(key);
        }
    }

    /// In-order iterator over the snapshot's keys.
    pub fn iter(&self) -> Iter<'_, D> {
        let mut iter = Iter {
            view: self,
            stack: SmallVec::new(),
        };
        iter.push_left_spine(self.root);
        iter
    }
}

impl<D: Copy + Default> Clone for FrozenView<D> {
    fn clone(&self) -> Self {
        Self {
            arena: Arc::clone(&self.arena),
            root: self.root,
            size: self.size,
        }
    }
}

impl<D: Copy + Default> fmt::Debug for FrozenView<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenView").field("len", &self.size).finish()
    }
}

/// In-order traversal of a [`FrozenView`].
pub struct Iter<'a, D: Copy + Default = ()> {
    view: &'a FrozenView<D>,
    stack: SmallVec<[u32; 24]>,
}

impl<D: Copy + Default> Iter<'_, D> {
    fn push_left_spine(&mut self, mut id: u32) {
        while id != NIL {
            self.stack.push(id);
            // SAFETY: `id` is reachable from a published frozen root; such
            // slots are immutable and not recycled while this view's
            // generation may still be observed.
            id = unsafe { self.view.arena.read(id) }.left;
        }
    }
}

impl<D: Copy + Default> Iterator for Iter<'_, D> {
    type Item = EntryHandle;

    fn next(&mut self) -> Option<EntryHandle> {
        let id = self.stack.pop()?;
        // SAFETY: as in `push_left_spine`.
        let node = unsafe { self.view.arena.read(id) };
        self.push_left_spine(node.right);
        Some(node.key)
    }
}
