use std::collections::VecDeque;

/// Monotonically increasing epoch counter gating safe reclamation.
pub type Generation = u64;

/// Decouples "logically freed" from "physically freed".
///
/// Nodes retired by copy-on-write mutations land in a pending list. At the
/// end of a write batch the owner closes the batch with
/// [`transfer_hold_lists`](Self::transfer_hold_lists), tagging the pending
/// nodes with the batch's generation. They are released for reuse only once
/// [`trim_hold_lists`](Self::trim_hold_lists) certifies that no reader can
/// still be traversing a view from that generation.
///
/// Both the generation passed to `transfer_hold_lists` and the bound passed
/// to `trim_hold_lists` must be non-decreasing across calls. The bound comes
/// from an external reader-epoch registry; this tracker has no visibility
/// into reader state and cannot verify it.
#[derive(Debug, Default)]
pub(crate) struct GenerationHoldLists {
    pending: Vec<u32>,
    buckets: VecDeque<HoldBucket>,
    held: usize,
    #[cfg(debug_assertions)]
    last_transfer: Generation,
}

#[derive(Debug)]
struct HoldBucket {
    generation: Generation,
    nodes: Vec<u32>,
}

impl GenerationHoldLists {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a retired node for a later, generation-gated release.
    pub(crate) fn retire(&mut self, node: u32) {
        self.pending.push(node);
    }

    /// Nodes retired but not yet released, pending list included.
    pub(crate) fn num_on_hold(&self) -> usize {
        self.pending.len() + self.held
    }

    /// Closes the current write batch: everything retired since the last
    /// call is tagged with `generation`.
    pub(crate) fn transfer_hold_lists(&mut self, generation: Generation) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                generation >= self.last_transfer,
                "hold list generation went backwards: {} < {}",
                generation,
                self.last_transfer
            );
            self.last_transfer = generation;
        }
        if self.pending.is_empty() {
            return;
        }
        let nodes = std::mem::take(&mut self.pending);
        self.held += nodes.len();
        self.buckets.push_back(HoldBucket { generation, nodes });
    }

    /// Releases every bucket tagged with a generation strictly below
    /// `first_still_observable` through `release`. Later buckets are left
    /// untouched.
    pub(crate) fn trim_hold_lists(
        &mut self,
        first_still_observable: Generation,
        mut release: impl FnMut(u32),
    ) {
        #[cfg(feature = "logging")]
        let mut freed = 0usize;
        while let Some(bucket) = self.buckets.front() {
            if bucket.generation >= first_still_observable {
                break;
            }
            let bucket = self.buckets.pop_front().expect("front was just checked");
            self.held -= bucket.nodes.len();
            #[cfg(feature = "logging")]
            {
                freed += bucket.nodes.len();
            }
            for node in bucket.nodes {
                release(node);
            }
        }
        #[cfg(feature = "logging")]
        if freed > 0 {
            log::trace!(
                "trimmed {} held node(s) below generation {}",
                freed,
                first_still_observable
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GenerationHoldLists;

    #[test]
    fn trim_respects_the_observable_bound() {
        let mut holds = GenerationHoldLists::new();
        holds.retire(1);
        holds.retire(2);
        holds.transfer_hold_lists(5);
        holds.retire(3);
        holds.transfer_hold_lists(6);
        assert_eq!(holds.num_on_hold(), 3);

        let mut freed = Vec::new();
        holds.trim_hold_lists(5, |n| freed.push(n));
        assert!(freed.is_empty(), "generation 5 may still be observed");

        holds.trim_hold_lists(6, |n| freed.push(n));
        assert_eq!(freed, vec![1, 2]);
        assert_eq!(holds.num_on_hold(), 1);

        holds.trim_hold_lists(7, |n| freed.push(n));
        assert_eq!(freed, vec![1, 2, 3]);
        assert_eq!(holds.num_on_hold(), 0);
    }

    #[test]
    fn empty_batches_leave_no_bucket() {
        let mut holds = GenerationHoldLists::new();
        holds.transfer_hold_lists(1);
        holds.transfer_hold_lists(2);
        assert_eq!(holds.num_on_hold(), 0);
        holds.trim_hold_lists(10, |_| panic!("nothing was held"));
    }

    #[test]
    fn pending_nodes_are_untouched_by_trim() {
        let mut holds = GenerationHoldLists::new();
        holds.retire(9);
        holds.trim_hold_lists(100, |_| panic!("pending batch has no generation yet"));
        assert_eq!(holds.num_on_hold(), 1);
    }
}
