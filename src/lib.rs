#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! A deduplicating, generation-reclaimed ordered dictionary over
//! handle-addressed entries.
//!
//! `unique-store` is the dictionary core of a storage/indexing engine: it
//! keeps exactly one physical copy of every distinct value while many
//! concurrent readers traverse a stable, lock-free snapshot and a single
//! writer mutates, compacts and reclaims the structure underneath.
//!
//! The crate owns only the mapping from [`EntryHandle`] to tree topology.
//! Entry payload bytes live in an external payload store, which hands out
//! handles through the allocation callback of
//! [`UniqueStoreDictionary::add`] and relocates them through the
//! [`Compactable`] capability during compaction. Values are ordered by a
//! caller-supplied [`EntryComparator`], so the dictionary is polymorphic over
//! the comparator capability rather than over a closed set of key types.
//!
//! # Concurrency model
//!
//! One designated writer thread owns the [`UniqueStoreDictionary`] and is the
//! sole mutator; `&mut self` on every mutating operation makes this a
//! compile-time guarantee. Reader threads receive cloned [`FrozenView`]s,
//! each an immutable snapshot published by [`UniqueStoreDictionary::freeze`].
//! Mutations never touch nodes reachable from a published view; they clone
//! the affected path instead (copy-on-write) and retire the superseded nodes
//! into generation-tagged hold lists.
//!
//! Reclamation is driven by the owning store at generation boundaries:
//! [`transfer_hold_lists`](UniqueStoreDictionary::transfer_hold_lists) tags a
//! write batch's retirements, and
//! [`trim_hold_lists`](UniqueStoreDictionary::trim_hold_lists) frees every
//! generation below an externally certified first-still-observable bound.
//! The accuracy and monotonicity of that bound is the load-bearing safety
//! obligation of the caller's reader-epoch bookkeeping; it is not verifiable
//! at this layer.
//!
//! See [`UniqueStoreDictionary`] for a worked example.

mod compare;
mod dict;
mod generation;
mod handle;
mod memory;
mod tree;

pub use compare::EntryComparator;
pub use dict::{AddResult, BuildError, Compactable, UniqueStoreDictionary};
pub use generation::Generation;
pub use handle::EntryHandle;
pub use memory::MemoryUsage;
pub use tree::{FrozenView, Iter};
