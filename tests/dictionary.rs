use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use unique_store::{
    Compactable, EntryComparator, EntryHandle, FrozenView, Generation, UniqueStoreDictionary,
};

/// A minimal payload store: one vector per buffer, handle offset = slot
/// index. Slot 0 of buffer 0 stays reserved so that no live entry carries the
/// null bit pattern.
struct Store {
    buffers: Vec<Vec<u64>>,
}

impl Store {
    fn new() -> Self {
        Self {
            buffers: vec![vec![0]],
        }
    }

    fn allocate(&mut self, value: u64) -> EntryHandle {
        let buffer = self.buffers.len() - 1;
        self.buffers[buffer].push(value);
        EntryHandle::new(buffer as u32, (self.buffers[buffer].len() - 1) as u32)
    }

    fn resolve(&self, handle: EntryHandle) -> u64 {
        self.buffers[handle.buffer_id() as usize][handle.offset() as usize]
    }

    fn comparator(&self, probe: u64) -> StoreComparator<'_> {
        StoreComparator { store: self, probe }
    }
}

struct StoreComparator<'a> {
    store: &'a Store,
    probe: u64,
}

impl EntryComparator for StoreComparator<'_> {
    fn compare(&self, lhs: EntryHandle, rhs: EntryHandle) -> Ordering {
        let lhs = if lhs.is_valid() {
            self.store.resolve(lhs)
        } else {
            self.probe
        };
        let rhs = if rhs.is_valid() {
            self.store.resolve(rhs)
        } else {
            self.probe
        };
        lhs.cmp(&rhs)
    }
}

fn add(dict: &mut UniqueStoreDictionary, store: &mut Store, value: u64) -> EntryHandle {
    let existing = dict.find(&store.comparator(value));
    if existing.is_valid() {
        return existing;
    }
    let handle = store.allocate(value);
    let comp = store.comparator(value);
    let result = dict.add(&comp, || handle);
    assert!(result.inserted);
    result.handle
}

const NUM_READERS: usize = 4;
const NUM_BATCHES: u64 = 60;
const ADDS_PER_BATCH: u64 = 10;

/// A writer runs add/remove/freeze/transfer/trim cycles while reader threads
/// traverse the frozen views they were handed. Each reader publishes the
/// generation of the newest view it has fully processed; any view still
/// queued for it was grabbed at a later generation, so the writer may trim
/// strictly below `min(completed) + 1`. This is exactly the reader-epoch
/// contract the dictionary documents but cannot verify itself.
#[test]
fn concurrent_readers_see_stable_snapshots() {
    let completed: Arc<Vec<AtomicU64>> =
        Arc::new((0..NUM_READERS).map(|_| AtomicU64::new(0)).collect());

    let mut senders = Vec::new();
    let mut readers = Vec::new();
    for reader_id in 0..NUM_READERS {
        let (tx, rx): (_, Receiver<(Generation, FrozenView)>) = mpsc::channel();
        senders.push(tx);
        let completed = Arc::clone(&completed);
        readers.push(thread::spawn(move || {
            let mut snapshots_seen = 0usize;
            while let Ok((grabbed_at, view)) = rx.recv() {
                let first: Vec<EntryHandle> = view.iter().collect();
                assert_eq!(first.len(), view.len());
                // Values were added in increasing order from one buffer, so
                // comparator order implies strictly increasing offsets. A
                // torn or mutated snapshot would break this.
                for pair in first.windows(2) {
                    assert!(pair[0].offset() < pair[1].offset());
                }
                // Repeated traversals of one view are identical.
                for _ in 0..3 {
                    let again: Vec<EntryHandle> = view.iter().collect();
                    assert_eq!(again, first);
                }
                completed[reader_id].store(grabbed_at, AtomicOrdering::SeqCst);
                snapshots_seen += 1;
            }
            snapshots_seen
        }));
    }

    let mut store = Store::new();
    let mut dict = UniqueStoreDictionary::new();
    let mut next_value = 1u64;
    let mut live: Vec<u64> = Vec::new();

    for batch in 0..NUM_BATCHES {
        let generation = batch + 1;
        for _ in 0..ADDS_PER_BATCH {
            add(&mut dict, &mut store, next_value);
            live.push(next_value);
            next_value += 1;
        }
        if batch % 2 == 1 {
            for value in live.drain(..5) {
                let handle = dict.find(&store.comparator(value));
                assert!(handle.is_valid());
                dict.remove(&store.comparator(value), handle);
            }
        }

        dict.freeze();
        dict.transfer_hold_lists(generation);

        let view = dict.frozen_view();
        assert_eq!(view.len(), live.len());
        for tx in &senders {
            tx.send((generation + 1, view.clone())).unwrap();
        }

        // A generation is reclaimable once every reader has fully processed
        // some view grabbed at it or earlier.
        let first_still_observable = completed
            .iter()
            .map(|c| c.load(AtomicOrdering::SeqCst) + 1)
            .min()
            .expect("at least one reader")
            .min(generation + 1);
        dict.trim_hold_lists(first_still_observable);
    }

    drop(senders);
    for reader in readers {
        let seen = reader.join().expect("reader panicked");
        assert_eq!(seen, NUM_BATCHES as usize);
    }

    // With all readers gone the final boundary can be fully reclaimed.
    dict.transfer_hold_lists(NUM_BATCHES + 1);
    dict.trim_hold_lists(NUM_BATCHES + 2);
    assert_eq!(dict.memory_usage().allocated_bytes_on_hold, 0);

    let values: Vec<u64> = dict
        .frozen_view()
        .iter()
        .map(|h| store.resolve(h))
        .collect();
    assert_eq!(values, live);
}

/// Payload store for keyed-lookup tests: a shared immutable value table, so
/// a comparator built on a reader thread can resolve handles with no writer
/// synchronization. `table[offset]` is the entry value.
struct TableComparator<'a> {
    table: &'a [u64],
    probe: u64,
}

impl EntryComparator for TableComparator<'_> {
    fn compare(&self, lhs: EntryHandle, rhs: EntryHandle) -> Ordering {
        let lhs = if lhs.is_valid() {
            self.table[lhs.offset() as usize]
        } else {
            self.probe
        };
        let rhs = if rhs.is_valid() {
            self.table[rhs.offset() as usize]
        } else {
            self.probe
        };
        lhs.cmp(&rhs)
    }
}

fn table_handle(value: u64) -> EntryHandle {
    EntryHandle::new(0, value as u32)
}

/// A reader thread runs point lookups and lower-bound searches against an
/// old frozen view while the writer removes and adds entries underneath it.
/// The view answers for exactly the snapshot it was published with.
#[test]
fn keyed_lookups_resolve_against_an_old_view_during_writes() {
    // Identity table: a handle's offset is its value.
    let table: Arc<Vec<u64>> = Arc::new((0..=64).collect());
    let mut dict = UniqueStoreDictionary::new();
    for value in (2..=40).step_by(2) {
        let comp = TableComparator {
            table: &table,
            probe: value,
        };
        let result = dict.add(&comp, || table_handle(value));
        assert!(result.inserted);
    }
    dict.freeze();
    dict.transfer_hold_lists(1);
    let old_view = dict.frozen_view();

    let reader = {
        let view = old_view.clone();
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for _ in 0..100 {
                for value in (2..=40).step_by(2) {
                    let comp = TableComparator {
                        table: &table,
                        probe: value,
                    };
                    assert_eq!(view.find(&comp), table_handle(value));
                    // Odd probes miss and resolve to their even ceiling.
                    let comp = TableComparator {
                        table: &table,
                        probe: value - 1,
                    };
                    assert_eq!(view.find(&comp), EntryHandle::invalid());
                    assert_eq!(
                        view.lower_bound(EntryHandle::invalid(), &comp),
                        Some(table_handle(value))
                    );
                }
                let comp = TableComparator {
                    table: &table,
                    probe: 41,
                };
                assert_eq!(view.lower_bound(EntryHandle::invalid(), &comp), None);
            }
        })
    };

    // Mutate under the reader: drop the low evens, add some odds.
    for value in (2..=20).step_by(2) {
        let comp = TableComparator {
            table: &table,
            probe: value,
        };
        dict.remove(&comp, table_handle(value));
    }
    for value in (1..=9).step_by(2) {
        let comp = TableComparator {
            table: &table,
            probe: value,
        };
        assert!(dict.add(&comp, || table_handle(value)).inserted);
    }
    dict.freeze();
    dict.transfer_hold_lists(2);

    reader.join().expect("reader panicked");

    // The new view answers for the new set.
    let new_view = dict.frozen_view();
    let comp = TableComparator {
        table: &table,
        probe: 2,
    };
    assert_eq!(new_view.find(&comp), EntryHandle::invalid());
    let comp = TableComparator {
        table: &table,
        probe: 1,
    };
    assert_eq!(new_view.find(&comp), table_handle(1));

    dict.trim_hold_lists(3);
    assert_eq!(dict.memory_usage().allocated_bytes_on_hold, 0);
}

/// Relocates every entry into a fresh buffer, as a payload-store compaction
/// would after squeezing out fragmentation.
struct Relocator<'a> {
    store: &'a mut Store,
}

impl<'a> Relocator<'a> {
    fn new(store: &'a mut Store) -> Self {
        store.buffers.push(vec![0]);
        Relocator { store }
    }
}

impl Compactable for Relocator<'_> {
    fn move_entry(&mut self, old: EntryHandle) -> EntryHandle {
        let value = self.store.resolve(old);
        let buffer = self.store.buffers.len() - 1;
        self.store.buffers[buffer].push(value);
        EntryHandle::new(buffer as u32, (self.store.buffers[buffer].len() - 1) as u32)
    }
}

/// Compaction while a reader still holds the pre-compaction view: the old
/// view keeps resolving the old handles, the next freeze carries the moved
/// ones, and the hold protocol reclaims the superseded nodes afterwards.
#[test]
fn compaction_under_a_live_reader() {
    let mut store = Store::new();
    let mut dict = UniqueStoreDictionary::new();
    for value in [12, 7, 3, 20, 15, 9, 1] {
        add(&mut dict, &mut store, value);
    }
    dict.freeze();
    dict.transfer_hold_lists(1);
    let old_view = dict.frozen_view();
    let old_keys: Vec<EntryHandle> = old_view.iter().collect();

    let reader = {
        let view = old_view.clone();
        let expected = old_keys.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                assert_eq!(view.iter().collect::<Vec<_>>(), expected);
            }
        })
    };

    let mut relocator = Relocator::new(&mut store);
    dict.move_entries(&mut relocator);
    dict.freeze();
    dict.transfer_hold_lists(2);

    reader.join().expect("reader panicked");

    let new_keys: Vec<EntryHandle> = dict.frozen_view().iter().collect();
    for (old, new) in old_keys.iter().zip(&new_keys) {
        assert_eq!(new.buffer_id(), 1, "entry moved to the compacted buffer");
        assert_eq!(store.resolve(*old), store.resolve(*new));
    }
    assert_eq!(old_view.iter().collect::<Vec<_>>(), old_keys);

    dict.trim_hold_lists(3);
    assert_eq!(dict.memory_usage().allocated_bytes_on_hold, 0);
}

/// Snapshot via `foreach_key`, then rebuild a fresh dictionary with `build`,
/// dropping entries whose reference count fell to zero.
#[test]
fn save_and_rebuild_round_trip() {
    let mut store = Store::new();
    let mut dict = UniqueStoreDictionary::new();
    for value in [5, 2, 9, 4, 7] {
        add(&mut dict, &mut store, value);
    }
    dict.freeze();

    let mut saved = vec![EntryHandle::invalid()];
    let view = dict.frozen_view();
    dict.foreach_key(&view, |handle| saved.push(handle));
    assert_eq!(saved.len(), 6);

    // Entry "4" (second in comparator order) became unreferenced since the
    // save; the rebuild must route it to the callback, not the tree.
    let mut ref_counts = vec![0, 1, 1, 1, 1, 1];
    ref_counts[2] = 0;

    let mut rebuilt = UniqueStoreDictionary::new();
    let mut dropped = Vec::new();
    rebuilt
        .build(&saved, &ref_counts, |h| dropped.push(h))
        .expect("well-formed input");

    assert_eq!(dropped.len(), 1);
    assert_eq!(store.resolve(dropped[0]), 4);

    rebuilt.freeze();
    let values: Vec<u64> = rebuilt
        .frozen_view()
        .iter()
        .map(|h| store.resolve(h))
        .collect();
    assert_eq!(values, vec![2, 5, 7, 9]);
    assert_eq!(rebuilt.num_uniques(), 4);
    assert_eq!(
        rebuilt.find(&store.comparator(4)),
        EntryHandle::invalid()
    );
    assert_eq!(store.resolve(rebuilt.find(&store.comparator(7))), 7);
}
