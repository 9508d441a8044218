/// Breakdown of the dictionary's node memory.
///
/// All figures count tree nodes only; entry payload bytes belong to the
/// external payload store and are not visible here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes reserved by the node arena (whole chunks, whether occupied or
    /// not).
    pub allocated_bytes: usize,
    /// Bytes of node slots handed out at least once (live nodes plus dead and
    /// on-hold slots).
    pub used_bytes: usize,
    /// Bytes of node slots sitting on the free list, ready for reuse.
    pub dead_bytes: usize,
    /// Bytes of retired nodes whose reclamation is still gated on a
    /// generation boundary.
    pub allocated_bytes_on_hold: usize,
}
