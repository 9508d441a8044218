use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::EntryHandle;

/// Node id 0 is the nil sentinel, mirroring the invalid `EntryHandle`.
pub(crate) const NIL: u32 = 0;

const CHUNK_BITS: u32 = 12;
pub(crate) const CHUNK_LEN: usize = 1 << CHUNK_BITS;
const CHUNK_MASK: u32 = (CHUNK_LEN as u32) - 1;
const MAX_CHUNKS: usize = 4096;

/// One tree entry: an entry handle key, small auxiliary data and the AVL
/// topology. Nodes are plain `Copy` data; all sharing discipline lives in the
/// arena and the tree on top of it.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Node<D> {
    pub(crate) key: EntryHandle,
    pub(crate) data: D,
    pub(crate) left: u32,
    pub(crate) right: u32,
    pub(crate) height: u8,
    /// Set at `freeze` time for every node published since the previous
    /// freeze. A frozen node may be reachable from a published view and must
    /// be cloned before any mutation.
    pub(crate) frozen: bool,
}

/// Chunked node storage with stable addresses.
///
/// Node slots live in fixed-size chunks hanging off a fixed spine of atomic
/// pointers, so a slot's address never changes once its chunk is published.
/// Readers traversing a frozen view dereference node ids concurrently with
/// the writer appending chunks and mutating unfrozen slots; the safety
/// argument is:
///
/// - chunk pointers are published with release stores before any node in the
///   chunk can become reachable from a published root;
/// - slots reachable from a published root are frozen and never written;
/// - freed slots are recycled only after `trim_hold_lists` certifies that no
///   reader can still observe the generation that retired them.
///
/// The chunks themselves are only deallocated when the arena drops, which
/// cannot happen while any `FrozenView` still holds its `Arc`.
pub(crate) struct NodeArena<D> {
    spine: Box<[AtomicPtr<UnsafeCell<Node<D>>>]>,
    /// Next never-handed-out node id; slot 0 is the reserved nil sentinel.
    len: AtomicU32,
    /// The published frozen view: `root << 32 | size`, stored as one word so
    /// readers always see a consistent pair.
    published: CachePadded<AtomicU64>,
}

// Reader threads hold the arena through `FrozenView` and only read frozen
// slots; the single writer is the only mutator. See the struct-level safety
// argument.
unsafe impl<D: Copy + Send> Send for NodeArena<D> {}
unsafe impl<D: Copy + Send + Sync> Sync for NodeArena<D> {}

impl<D: Copy + Default> NodeArena<D> {
    pub(crate) fn new() -> Self {
        let spine = (0..MAX_CHUNKS)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            spine,
            len: AtomicU32::new(1),
            published: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Total node slots handed out so far, the sentinel slot included.
    pub(crate) fn watermark(&self) -> u32 {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn allocated_chunks(&self) -> usize {
        (self.watermark() as usize + CHUNK_LEN - 1) / CHUNK_LEN
    }

    /// Hands out the next never-used node id, growing the chunk table as
    /// needed. Writer-only.
    pub(crate) fn bump(&self) -> u32 {
        let id = self.len.load(Ordering::Relaxed);
        let chunk = (id >> CHUNK_BITS) as usize;
        assert!(chunk < MAX_CHUNKS, "node arena exhausted");
        if self.spine[chunk].load(Ordering::Relaxed).is_null() {
            let mut slots: Vec<UnsafeCell<Node<D>>> = Vec::with_capacity(CHUNK_LEN);
            slots.resize_with(CHUNK_LEN, || UnsafeCell::new(Node::default()));
            let raw = Box::into_raw(slots.into_boxed_slice()) as *mut UnsafeCell<Node<D>>;
            // Publish the chunk before any node in it can become reachable
            // from a published root.
            self.spine[chunk].store(raw, Ordering::Release);
        }
        self.len.store(id + 1, Ordering::Relaxed);
        id
    }

    fn slot(&self, id: u32) -> *mut Node<D> {
        debug_assert_ne!(id, NIL, "the nil sentinel has no node");
        let chunk = (id >> CHUNK_BITS) as usize;
        let base = self.spine[chunk].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "node id {id} points into an unallocated chunk");
        // SAFETY: `base` points at a live chunk of `CHUNK_LEN` slots and the
        // offset is masked into range.
        unsafe { (*base.add((id & CHUNK_MASK) as usize)).get() }
    }

    /// Copies out node `id`.
    ///
    /// # Safety
    ///
    /// `id` must be a slot the caller may observe: owned by the writer, or
    /// reachable from a published frozen root whose generation has not been
    /// certified reclaimable.
    pub(crate) unsafe fn read(&self, id: u32) -> Node<D> {
        *self.slot(id)
    }

    /// Overwrites node `id`. Writer-only.
    ///
    /// # Safety
    ///
    /// `id` must not be reachable from any published frozen view that a
    /// reader may still hold: freshly bumped, recycled past its trim
    /// boundary, or allocated after the last freeze.
    pub(crate) unsafe fn write(&self, id: u32, node: Node<D>) {
        *self.slot(id) = node;
    }

    /// Publishes `{root, size}` as the new frozen view.
    pub(crate) fn publish(&self, root: u32, size: u32) {
        let packed = ((root as u64) << 32) | size as u64;
        self.published.store(packed, Ordering::Release);
    }

    /// The last published `{root, size}` pair.
    pub(crate) fn load_published(&self) -> (u32, u32) {
        let packed = self.published.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }
}

impl<D> Drop for NodeArena<D> {
    fn drop(&mut self) {
        for slot in self.spine.iter() {
            let raw = slot.load(Ordering::Relaxed);
            if raw.is_null() {
                continue;
            }
            // SAFETY: reconstructs the boxed slice allocated in `bump`; the
            // arena is the sole owner at drop time.
            unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(raw, CHUNK_LEN)));
            }
        }
    }
}
