use std::fmt;

/// An opaque reference to one entry owned by an external payload store.
///
/// A handle packs a buffer id and an offset within that buffer into a single
/// `u32`. The all-zero bit pattern is reserved as the invalid (null) sentinel,
/// so the payload store must never hand out buffer 0, offset 0 for a live
/// entry.
///
/// Handles are produced exclusively by the payload store; the dictionary only
/// stores and compares them. Equality is bitwise identity of the packed word,
/// not value equality of the referenced entries.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryHandle(u32);

impl EntryHandle {
    /// Number of low bits used for the offset within a buffer. The remaining
    /// high bits hold the buffer id.
    pub const OFFSET_BITS: u32 = 22;

    const OFFSET_MASK: u32 = (1 << Self::OFFSET_BITS) - 1;

    /// The invalid (null) handle.
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Packs a buffer id and an offset into a handle.
    ///
    /// # Panics
    ///
    /// Panics if `offset` or `buffer_id` does not fit its bit field.
    pub fn new(buffer_id: u32, offset: u32) -> Self {
        assert!(
            offset <= Self::OFFSET_MASK,
            "offset {offset} does not fit in {} bits",
            Self::OFFSET_BITS
        );
        assert!(
            buffer_id < (1 << (32 - Self::OFFSET_BITS)),
            "buffer id {buffer_id} does not fit in {} bits",
            32 - Self::OFFSET_BITS
        );
        Self((buffer_id << Self::OFFSET_BITS) | offset)
    }

    /// Reconstructs a handle from its packed representation.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The packed representation, e.g. for saving alongside a snapshot.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// `false` for the null sentinel.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub const fn buffer_id(self) -> u32 {
        self.0 >> Self::OFFSET_BITS
    }

    pub const fn offset(self) -> u32 {
        self.0 & Self::OFFSET_MASK
    }
}

impl fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(
                f,
                "EntryHandle(buffer: {}, offset: {})",
                self.buffer_id(),
                self.offset()
            )
        } else {
            f.write_str("EntryHandle(invalid)")
        }
    }
}
