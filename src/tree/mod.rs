//! The ordered node store: a copy-on-write AVL tree over arena-allocated
//! nodes.
//!
//! The tree is ordered by a caller-supplied [`EntryComparator`] and supports
//! lock-free traversal of a frozen snapshot concurrently with in-place
//! mutation of the live structure by a single writer (enforced through
//! `&mut self`). Mutating a node that was published to a frozen view clones
//! it and its ancestor path instead of touching it; superseded originals are
//! retired into generation-tagged hold lists and their slots recycled only
//! once the owning store certifies the generation unobservable.

mod arena;
mod iter;

pub use iter::{FrozenView, Iter};

use smallvec::SmallVec;
use triomphe::Arc;

use crate::compare::EntryComparator;
use crate::generation::{Generation, GenerationHoldLists};
use crate::memory::MemoryUsage;
use crate::EntryHandle;

use arena::{Node, NodeArena, CHUNK_LEN, NIL};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Dir {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug)]
struct PathEntry {
    node: u32,
    /// Edge taken out of `node` while descending. Meaningless for the last
    /// entry of a path, which is the position itself.
    dir: Dir,
}

type Path = SmallVec<[PathEntry; 24]>;

/// Result of a `lower_bound` probe: the full descent path (reused when
/// splicing an insert or a removal) plus the first node whose key is not less
/// than the probe, if any.
pub(crate) struct Position {
    path: Path,
    found: Option<(usize, EntryHandle)>,
}

impl Position {
    /// Key of the first node not less than the probe.
    pub(crate) fn key(&self) -> Option<EntryHandle> {
        self.found.map(|(_, key)| key)
    }
}

/// In-order cursor over the live tree. Only the writer holds one; compaction
/// uses it to visit and rewrite keys.
pub(crate) struct LiveIter {
    path: Path,
}

impl LiveIter {
    pub(crate) fn valid(&self) -> bool {
        !self.path.is_empty()
    }
}

pub(crate) struct Tree<D: Copy + Default = ()> {
    arena: Arc<NodeArena<D>>,
    root: u32,
    size: u32,
    /// Nodes allocated since the last freeze; marked frozen in O(#new) when
    /// the next freeze publishes them.
    to_freeze: Vec<u32>,
    /// Recycled slots, safe to overwrite.
    free: Vec<u32>,
    holds: GenerationHoldLists,
}

impl<D: Copy + Default> Tree<D> {
    pub(crate) fn new() -> Self {
        Self {
            arena: Arc::new(NodeArena::new()),
            root: NIL,
            size: 0,
            to_freeze: Vec::new(),
            free: Vec::new(),
            holds: GenerationHoldLists::new(),
        }
    }

    /// Live entry count (the frozen view may lag behind).
    pub(crate) fn len(&self) -> usize {
        self.size as usize
    }

    fn node(&self, id: u32) -> Node<D> {
        // SAFETY: `id` comes from this tree's own topology or free/hold
        // bookkeeping, which only references live slots.
        unsafe { self.arena.read(id) }
    }

    fn write(&self, id: u32, node: Node<D>) {
        // SAFETY: callers only pass ids that are not reachable from any
        // published frozen view (fresh allocations or `make_mut` results).
        unsafe { self.arena.write(id, node) }
    }

    fn height(&self, id: u32) -> u8 {
        if id == NIL {
            0
        } else {
            self.node(id).height
        }
    }

    fn alloc(&mut self, mut node: Node<D>) -> u32 {
        node.frozen = false;
        let id = self.free.pop().unwrap_or_else(|| self.arena.bump());
        self.write(id, node);
        self.to_freeze.push(id);
        id
    }

    /// Clones `id` out of frozen territory if needed and returns an id that
    /// is safe to mutate in place. A superseded original is retired.
    fn make_mut(&mut self, id: u32) -> u32 {
        let node = self.node(id);
        if !node.frozen {
            return id;
        }
        let clone = self.alloc(node);
        self.holds.retire(id);
        clone
    }

    /// Returns a removed node's slot to the free list, or retires it if a
    /// frozen view may still reach it.
    fn release(&mut self, id: u32) {
        if self.node(id).frozen {
            self.holds.retire(id);
        } else {
            self.free.push(id);
        }
    }

    /// Positions at the first node whose key is not less than `probe` under
    /// `comp`, descending from the live root. The equivalent reader-side
    /// search on a snapshot is [`FrozenView::lower_bound`].
    pub(crate) fn lower_bound<C>(&self, probe: EntryHandle, comp: &C) -> Position
    where
        C: EntryComparator + ?Sized,
    {
        let mut path = Path::new();
        let mut found = None;
        let mut cur = self.root;
        while cur != NIL {
            let node = self.node(cur);
            if comp.less(node.key, probe) {
                path.push(PathEntry {
                    node: cur,
                    dir: Dir::Right,
                });
                cur = node.right;
            } else {
                found = Some((path.len(), node.key));
                path.push(PathEntry {
                    node: cur,
                    dir: Dir::Left,
                });
                cur = node.left;
            }
        }
        Position { path, found }
    }

    /// Inserts a new node at the point `position` probed. The probe must have
    /// missed; inserting an equal key corrupts the order.
    pub(crate) fn insert(&mut self, position: Position, key: EntryHandle, data: D) {
        let leaf = self.alloc(Node {
            key,
            data,
            left: NIL,
            right: NIL,
            height: 1,
            frozen: false,
        });
        self.root = self.retrace(&position.path, leaf);
        self.size += 1;
    }

    /// Unlinks the node `position` found.
    ///
    /// # Panics
    ///
    /// Panics if the probe did not land on a node.
    pub(crate) fn remove(&mut self, position: Position) {
        let (idx, _) = position
            .found
            .expect("remove requires a present key");
        let path = position.path;
        let target = path[idx].node;
        let tnode = self.node(target);

        let child = if tnode.left == NIL {
            self.release(target);
            tnode.right
        } else if tnode.right == NIL {
            self.release(target);
            tnode.left
        } else {
            // Two children: splice out the in-order successor and move its
            // entry into the target's slot in the order.
            let mut ext = Path::new();
            let mut cur = tnode.right;
            loop {
                let node = self.node(cur);
                if node.left == NIL {
                    break;
                }
                ext.push(PathEntry {
                    node: cur,
                    dir: Dir::Left,
                });
                cur = node.left;
            }
            let snode = self.node(cur);
            self.release(cur);
            let new_right = self.retrace(&ext, snode.right);

            let id = self.make_mut(target);
            let mut node = self.node(id);
            node.key = snode.key;
            node.data = snode.data;
            node.right = new_right;
            node.height = 1 + self.height(node.left).max(self.height(node.right));
            self.write(id, node);
            self.rebalance(id)
        };

        self.root = self.retrace(&path[..idx], child);
        self.size -= 1;
    }

    /// Walks `path` bottom-up, re-linking `child` into each ancestor (cloned
    /// out of frozen territory as needed) and rebalancing. Returns the new
    /// subtree root.
    fn retrace(&mut self, path: &[PathEntry], mut child: u32) -> u32 {
        for entry in path.iter().rev() {
            let id = self.make_mut(entry.node);
            let mut node = self.node(id);
            match entry.dir {
                Dir::Left => node.left = child,
                Dir::Right => node.right = child,
            }
            node.height = 1 + self.height(node.left).max(self.height(node.right));
            self.write(id, node);
            child = self.rebalance(id);
        }
        child
    }

    fn rebalance(&mut self, id: u32) -> u32 {
        let node = self.node(id);
        let (hl, hr) = (self.height(node.left), self.height(node.right));
        if hl > hr + 1 {
            let left = self.node(node.left);
            if self.height(left.left) < self.height(left.right) {
                let new_left = self.rotate_left(node.left);
                let id = self.make_mut(id);
                let mut node = self.node(id);
                node.left = new_left;
                self.write(id, node);
                return self.rotate_right(id);
            }
            self.rotate_right(id)
        } else if hr > hl + 1 {
            let right = self.node(node.right);
            if self.height(right.right) < self.height(right.left) {
                let new_right = self.rotate_right(node.right);
                let id = self.make_mut(id);
                let mut node = self.node(id);
                node.right = new_right;
                self.write(id, node);
                return self.rotate_left(id);
            }
            self.rotate_left(id)
        } else {
            id
        }
    }

    fn rotate_right(&mut self, id: u32) -> u32 {
        let id = self.make_mut(id);
        let mut node = self.node(id);
        let pivot = self.make_mut(node.left);
        let mut pnode = self.node(pivot);
        node.left = pnode.right;
        node.height = 1 + self.height(node.left).max(self.height(node.right));
        self.write(id, node);
        pnode.right = id;
        pnode.height = 1 + self.height(pnode.left).max(node.height);
        self.write(pivot, pnode);
        pivot
    }

    fn rotate_left(&mut self, id: u32) -> u32 {
        let id = self.make_mut(id);
        let mut node = self.node(id);
        let pivot = self.make_mut(node.right);
        let mut pnode = self.node(pivot);
        node.right = pnode.left;
        node.height = 1 + self.height(node.left).max(self.height(node.right));
        self.write(id, node);
        pnode.left = id;
        pnode.height = 1 + self.height(pnode.right).max(node.height);
        self.write(pivot, pnode);
        pivot
    }

    /// Cursor at the smallest live key.
    pub(crate) fn first(&self) -> LiveIter {
        let mut iter = LiveIter { path: Path::new() };
        self.push_left_spine(&mut iter.path, self.root);
        iter
    }

    fn push_left_spine(&self, path: &mut Path, mut id: u32) {
        while id != NIL {
            path.push(PathEntry {
                node: id,
                dir: Dir::Left,
            });
            id = self.node(id).left;
        }
    }

    /// Advances the cursor to the next key in order.
    pub(crate) fn step(&self, iter: &mut LiveIter) {
        let Some(last) = iter.path.last().copied() else {
            return;
        };
        let right = self.node(last.node).right;
        if right != NIL {
            iter.path.last_mut().expect("path is non-empty").dir = Dir::Right;
            self.push_left_spine(&mut iter.path, right);
        } else {
            iter.path.pop();
            while let Some(top) = iter.path.last() {
                match top.dir {
                    Dir::Left => break,
                    Dir::Right => {
                        iter.path.pop();
                    }
                }
            }
        }
    }

    pub(crate) fn key(&self, iter: &LiveIter) -> EntryHandle {
        self.node(iter.path.last().expect("iterator is valid").node).key
    }

    /// Unshares the cursor's node (and any frozen ancestors) so its key can
    /// be rewritten in place without disturbing published views. The cursor
    /// is repointed at the clones.
    pub(crate) fn thaw(&mut self, iter: &mut LiveIter) {
        for i in 0..iter.path.len() {
            let old = iter.path[i].node;
            let new = self.make_mut(old);
            if new == old {
                continue;
            }
            iter.path[i].node = new;
            if i == 0 {
                self.root = new;
            } else {
                // The parent was processed on the previous round, so it is
                // already writable.
                let parent = iter.path[i - 1];
                let mut pnode = self.node(parent.node);
                match parent.dir {
                    Dir::Left => pnode.left = new,
                    Dir::Right => pnode.right = new,
                }
                self.write(parent.node, pnode);
            }
        }
    }

    /// Rewrites the cursor's key in place. The node must have been thawed;
    /// the new key must preserve the comparator order (compaction relocates
    /// entries without changing their values, so it always does).
    pub(crate) fn write_key(&mut self, iter: &LiveIter, key: EntryHandle) {
        let id = iter.path.last().expect("iterator is valid").node;
        let mut node = self.node(id);
        debug_assert!(!node.frozen, "write_key requires a thawed node");
        node.key = key;
        self.write(id, node);
    }

    /// Publishes the live tree as the new frozen view. O(#nodes allocated
    /// since the last freeze), never a full-tree walk.
    pub(crate) fn freeze(&mut self) {
        for id in std::mem::take(&mut self.to_freeze) {
            let mut node = self.node(id);
            node.frozen = true;
            // Not yet reachable from the previously published root, so no
            // reader can observe this write.
            self.write(id, node);
        }
        self.arena.publish(self.root, self.size);
    }

    pub(crate) fn frozen_view(&self) -> FrozenView<D> {
        FrozenView::new(Arc::clone(&self.arena))
    }

    pub(crate) fn transfer_hold_lists(&mut self, generation: Generation) {
        self.holds.transfer_hold_lists(generation);
    }

    pub(crate) fn trim_hold_lists(&mut self, first_still_observable: Generation) {
        let free = &mut self.free;
        self.holds
            .trim_hold_lists(first_still_observable, |id| free.push(id));
    }

    /// Retires every node of the live tree and rebuilds a balanced tree from
    /// strictly increasing keys in one pass.
    pub(crate) fn bulk_load(&mut self, keys: &[EntryHandle]) {
        self.retire_all();
        self.root = self.build_range(keys);
        self.size = keys.len() as u32;
    }

    fn retire_all(&mut self) {
        let mut stack: SmallVec<[u32; 24]> = SmallVec::new();
        if self.root != NIL {
            stack.push(self.root);
        }
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.left != NIL {
                stack.push(node.left);
            }
            if node.right != NIL {
                stack.push(node.right);
            }
            self.release(id);
        }
        self.root = NIL;
        self.size = 0;
    }

    fn build_range(&mut self, keys: &[EntryHandle]) -> u32 {
        if keys.is_empty() {
            return NIL;
        }
        let mid = keys.len() / 2;
        let left = self.build_range(&keys[..mid]);
        let right = self.build_range(&keys[mid + 1..]);
        let height = 1 + self.height(left).max(self.height(right));
        self.alloc(Node {
            key: keys[mid],
            data: D::default(),
            left,
            right,
            height,
            frozen: false,
        })
    }

    pub(crate) fn memory_usage(&self) -> MemoryUsage {
        let node_size = std::mem::size_of::<Node<D>>();
        MemoryUsage {
            allocated_bytes: self.arena.allocated_chunks() * CHUNK_LEN * node_size,
            used_bytes: self.arena.watermark() as usize * node_size,
            dead_bytes: self.free.len() * node_size,
            allocated_bytes_on_hold: self.holds.num_on_hold() * node_size,
        }
    }
}
