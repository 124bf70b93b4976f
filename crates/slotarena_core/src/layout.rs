//! # Arena Layout Primitives
//!
//! Shared building blocks for every structure in this crate:
//! - Index newtypes with a reserved "none" sentinel
//! - Unaligned record reads/writes at byte offsets
//! - Checked size arithmetic for `size_for`
//!
//! ## Relocation
//!
//! Nothing here stores an address. Every record is located by
//! `base_offset + index * stride`, recomputed on each access, so an arena
//! copied to a different buffer stays valid.

use bytemuck::Pod;

use crate::error::{ArenaError, ArenaResult};

/// Raw "no such slot" sentinel.
pub const NONE: u32 = 0xFFFF_FFFF;

/// Raw "slot is in use" marker stored in free-list cells.
pub const IN_USE: u32 = 0xFFFF_FFFE;

/// Largest capacity any structure accepts. Both sentinels stay out of range.
pub const MAX_CAPACITY: u32 = IN_USE - 1;

/// Header magic words, one per structure kind.
pub(crate) mod magic {
    /// [`IndexAllocator`](crate::IndexAllocator)
    pub const INDEX_ALLOCATOR: u32 = u32::from_le_bytes(*b"SAIA");
    /// [`TimedIndexAllocator`](crate::TimedIndexAllocator)
    pub const TIMED_ALLOCATOR: u32 = u32::from_le_bytes(*b"SATA");
    /// [`MultiList`](crate::MultiList)
    pub const MULTI_LIST: u32 = u32::from_le_bytes(*b"SAML");
    /// [`OrderedMultiList`](crate::OrderedMultiList)
    pub const ORDERED_LIST: u32 = u32::from_le_bytes(*b"SAOL");
    /// [`BalancedIndexTree`](crate::BalancedIndexTree)
    pub const TREE: u32 = u32::from_le_bytes(*b"SABT");
}

macro_rules! define_index {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[repr(transparent)]
            pub struct $name(u32);

            impl $name {
                /// The "no such element" sentinel.
                pub const NONE: Self = Self(NONE);

                /// Wraps a raw slot number.
                #[inline]
                #[must_use]
                pub const fn new(raw: u32) -> Self {
                    Self(raw)
                }

                /// Returns the raw slot number.
                #[inline]
                #[must_use]
                pub const fn get(self) -> u32 {
                    self.0
                }

                /// Returns `true` if this is the sentinel.
                #[inline]
                #[must_use]
                pub const fn is_none(self) -> bool {
                    self.0 == NONE
                }

                /// Returns `None` for the sentinel.
                #[inline]
                #[must_use]
                pub const fn to_option(self) -> Option<Self> {
                    if self.is_none() { None } else { Some(self) }
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::NONE
                }
            }

            impl core::fmt::Display for $name {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    if self.is_none() {
                        write!(f, "none")
                    } else {
                        write!(f, "{}", self.0)
                    }
                }
            }
        )*
    };
}

define_index!(
    /// Slot number handed out by an allocator.
    SlotIndex,
    /// Handle naming one list inside a multi-list arena.
    ListHandle,
    /// Slot of one item in a multi-list's shared item pool.
    ItemIndex,
    /// Slot of one node in a tree's node arena.
    NodeIndex,
);

/// Reads a `T` stored at `offset`, with no alignment requirement.
///
/// An out-of-bounds record means the header capacities disagree with the
/// buffer, which is corruption.
#[inline]
pub(crate) fn read<T: Pod>(buf: &[u8], offset: usize) -> ArenaResult<T> {
    let bytes = record(buf, offset, core::mem::size_of::<T>())?;
    Ok(bytemuck::pod_read_unaligned(bytes))
}

/// Writes a `T` at `offset`, with no alignment requirement.
#[inline]
pub(crate) fn write<T: Pod>(buf: &mut [u8], offset: usize, value: &T) -> ArenaResult<()> {
    let bytes = record_mut(buf, offset, core::mem::size_of::<T>())?;
    bytes.copy_from_slice(bytemuck::bytes_of(value));
    Ok(())
}

/// Borrows `len` bytes at `offset`.
#[inline]
pub(crate) fn record(buf: &[u8], offset: usize, len: usize) -> ArenaResult<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| ArenaError::corrupt("record lies outside the arena"))
}

/// Mutably borrows `len` bytes at `offset`.
#[inline]
pub(crate) fn record_mut(buf: &mut [u8], offset: usize, len: usize) -> ArenaResult<&mut [u8]> {
    match offset.checked_add(len) {
        Some(end) if end <= buf.len() => Ok(&mut buf[offset..end]),
        _ => Err(ArenaError::corrupt("record lies outside the arena")),
    }
}

/// Rounds a payload size up to the next multiple of 4 bytes.
#[inline]
pub(crate) fn round_up4(n: u32) -> ArenaResult<u32> {
    n.checked_add(3)
        .map(|v| v & !3)
        .ok_or(ArenaError::BadParameter("payload size overflows u32"))
}

/// `a + b` for sizing; overflow is a bad parameter, not a panic.
#[inline]
pub(crate) fn add(a: u32, b: u32) -> ArenaResult<u32> {
    a.checked_add(b).ok_or(ArenaError::BadParameter("arena size overflows u32"))
}

/// `a * b` for sizing; overflow is a bad parameter, not a panic.
#[inline]
pub(crate) fn mul(a: u32, b: u32) -> ArenaResult<u32> {
    a.checked_mul(b).ok_or(ArenaError::BadParameter("arena size overflows u32"))
}

/// Rejects zero and sentinel-colliding capacities.
#[inline]
pub(crate) fn check_capacity(n: u32, what: &'static str) -> ArenaResult<()> {
    if n == 0 || n > MAX_CAPACITY {
        return Err(ArenaError::BadParameter(what));
    }
    Ok(())
}

/// Checks a caller buffer against the size a structure needs.
#[inline]
pub(crate) fn check_buffer(buf: &[u8], required: u32) -> ArenaResult<()> {
    if buf.is_empty() {
        return Err(ArenaError::NotInitialized);
    }
    let required = required as usize;
    if buf.len() < required {
        return Err(ArenaError::BufferTooSmall { required, actual: buf.len() });
    }
    Ok(())
}

/// Byte offset of record `index` in an array starting at `base`.
#[inline]
pub(crate) fn slot_offset(base: usize, stride: u32, index: u32) -> usize {
    base + stride as usize * index as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_sentinel() {
        assert!(SlotIndex::NONE.is_none());
        assert!(!SlotIndex::new(0).is_none());
        assert_eq!(NodeIndex::new(MAX_CAPACITY).to_option(), Some(NodeIndex::new(MAX_CAPACITY)));
        assert_eq!(ItemIndex::default().to_option(), None);
        assert_eq!(ListHandle::new(3).to_string(), "3");
        assert_eq!(ListHandle::NONE.to_string(), "none");
    }

    #[test]
    fn test_unaligned_roundtrip() {
        let mut buf = [0u8; 11];
        write(&mut buf, 3, &0xDEAD_BEEF_u32).unwrap();
        assert_eq!(read::<u32>(&buf, 3).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_out_of_bounds_is_corruption() {
        let mut buf = [0u8; 6];
        assert!(matches!(read::<u32>(&buf, 4), Err(ArenaError::InternalInconsistency(_))));
        assert!(matches!(write(&mut buf, usize::MAX, &1u32), Err(ArenaError::InternalInconsistency(_))));
    }

    #[test]
    fn test_round_up4() {
        assert_eq!(round_up4(0).unwrap(), 0);
        assert_eq!(round_up4(1).unwrap(), 4);
        assert_eq!(round_up4(4).unwrap(), 4);
        assert_eq!(round_up4(13).unwrap(), 16);
        assert!(round_up4(u32::MAX).is_err());
    }

    #[test]
    fn test_check_buffer() {
        assert_eq!(check_buffer(&[], 4), Err(ArenaError::NotInitialized));
        assert_eq!(
            check_buffer(&[0; 3], 4),
            Err(ArenaError::BufferTooSmall { required: 4, actual: 3 })
        );
        assert!(check_buffer(&[0; 8], 4).is_ok());
    }
}
