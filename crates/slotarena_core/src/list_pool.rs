//! # Shared List-Pool Layout
//!
//! Header and region arithmetic shared by [`MultiList`](crate::MultiList) and
//! [`OrderedMultiList`](crate::OrderedMultiList). Both use the same shape:
//!
//! ```text
//! [PoolHeader: 32 bytes]
//! [list heads x list_capacity]
//! [IndexAllocator block managing the list-head slots]
//! [items x item_capacity: fixed fields + payload rounded up to 4]
//! ```
//!
//! Only the list-head record and the fixed item fields differ.

use bytemuck::{Pod, Zeroable};

use crate::allocator::IndexAllocator;
use crate::error::{ArenaError, ArenaResult};
use crate::layout::{self, SlotIndex};

/// Arena header of a list pool.
///
/// Size: 32 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct PoolHeader {
    pub magic: u32,
    pub item_capacity: u32,
    pub list_capacity: u32,
    pub payload_size: u32,
    pub stride: u32,
    pub free_head: u32,
    pub items_allocated: u32,
    _padding: u32,
}

pub(crate) const HEADER_SIZE: u32 = core::mem::size_of::<PoolHeader>() as u32;

/// Record sizes that distinguish one list-pool flavour from another.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Geometry {
    pub magic: u32,
    pub list_head_size: u32,
    /// Bytes of fixed fields at the start of every item, before the payload.
    pub item_fields: u32,
}

/// Sub-region offsets, derived from the header on every call.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Regions {
    pub lists: usize,
    pub allocator: usize,
    pub allocator_len: usize,
    pub items: usize,
    pub stride: u32,
    pub item_capacity: u32,
    pub list_capacity: u32,
    pub payload_size: u32,
    list_head_size: u32,
    item_fields: u32,
}

impl Regions {
    /// Lays out a pool and returns its regions and total size.
    pub fn compute(geometry: Geometry, items: u32, lists: u32, payload_size: u32) -> ArenaResult<(Self, u32)> {
        layout::check_capacity(items, "item capacity must be in 1..=0xFFFFFFFD")?;
        layout::check_capacity(lists, "list capacity must be in 1..=0xFFFFFFFD")?;
        if payload_size == 0 {
            return Err(ArenaError::BadParameter("payload size must be non-zero"));
        }
        let stride = layout::add(geometry.item_fields, layout::round_up4(payload_size)?)?;
        let allocator = layout::add(HEADER_SIZE, layout::mul(lists, geometry.list_head_size)?)?;
        let allocator_len = IndexAllocator::size_for(lists)?;
        let item_base = layout::add(allocator, allocator_len)?;
        let total = layout::add(item_base, layout::mul(items, stride)?)?;
        let regions = Self {
            lists: HEADER_SIZE as usize,
            allocator: allocator as usize,
            allocator_len: allocator_len as usize,
            items: item_base as usize,
            stride,
            item_capacity: items,
            list_capacity: lists,
            payload_size,
            list_head_size: geometry.list_head_size,
            item_fields: geometry.item_fields,
        };
        Ok((regions, total))
    }

    /// Recomputes the regions recorded in a live header.
    pub fn from_header(geometry: Geometry, header: &PoolHeader) -> ArenaResult<Self> {
        Self::compute(geometry, header.item_capacity, header.list_capacity, header.payload_size)
            .map(|(regions, _)| regions)
            .map_err(|_| ArenaError::corrupt("list pool header capacities damaged"))
    }

    /// Offset of the list head for `handle`.
    #[inline]
    pub fn list(&self, handle: u32) -> usize {
        layout::slot_offset(self.lists, self.list_head_size, handle)
    }

    /// Offset of item `index`.
    #[inline]
    pub fn item(&self, index: u32) -> usize {
        layout::slot_offset(self.items, self.stride, index)
    }

    /// Offset of item `index`'s payload.
    #[inline]
    pub fn payload(&self, index: u32) -> usize {
        self.item(index) + self.item_fields as usize
    }
}

/// Occupancy counters of a list pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MultiListInfo {
    /// Lists currently created.
    pub lists_allocated: u32,
    /// List handles still available.
    pub lists_available: u32,
    /// Items held across all lists.
    pub items_allocated: u32,
    /// Items left in the shared pool.
    pub items_available: u32,
}

/// Validates an existing pool for `attach`.
pub(crate) fn check_attached(bytes: &[u8], geometry: Geometry) -> ArenaResult<()> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err(ArenaError::NotInitialized);
    }
    let header: PoolHeader = layout::read(bytes, 0)?;
    if header.magic != geometry.magic {
        return Err(ArenaError::NotInitialized);
    }
    let (regions, total) =
        Regions::compute(geometry, header.item_capacity, header.list_capacity, header.payload_size)
            .map_err(|_| ArenaError::NotInitialized)?;
    if bytes.len() < total as usize
        || regions.stride != header.stride
        || header.items_allocated > header.item_capacity
    {
        return Err(ArenaError::NotInitialized);
    }
    list_slots(bytes, &regions).map_err(|_| ArenaError::NotInitialized)?;
    Ok(())
}

/// Writes a fresh header, empty list heads, the handle allocator, and a
/// free chain threading every item in ascending order. Returns the size used.
pub(crate) fn init_pool<H: Pod>(
    bytes: &mut [u8],
    geometry: Geometry,
    items: u32,
    lists: u32,
    payload_size: u32,
    empty_head: &H,
) -> ArenaResult<u32> {
    let (regions, total) = Regions::compute(geometry, items, lists, payload_size)?;
    layout::check_buffer(bytes, total)?;

    bytes[..total as usize].fill(0);
    for handle in 0..lists {
        layout::write(bytes, regions.list(handle), empty_head)?;
    }
    IndexAllocator::init(layout::record_mut(bytes, regions.allocator, regions.allocator_len)?, lists)?;
    for index in 0..items {
        let next = if index + 1 < items { index + 1 } else { layout::NONE };
        layout::write(bytes, regions.item(index), &next)?;
    }
    let header = PoolHeader {
        magic: geometry.magic,
        item_capacity: items,
        list_capacity: lists,
        payload_size,
        stride: regions.stride,
        free_head: 0,
        items_allocated: 0,
        _padding: 0,
    };
    layout::write(bytes, 0, &header)?;
    Ok(total)
}

/// Opens the embedded allocator that hands out list handles.
pub(crate) fn list_slots<'a>(bytes: &'a [u8], regions: &Regions) -> ArenaResult<IndexAllocator<&'a [u8]>> {
    let block = layout::record(bytes, regions.allocator, regions.allocator_len)?;
    IndexAllocator::attach(block).map_err(|_| ArenaError::corrupt("list handle allocator damaged"))
}

/// Mutable twin of [`list_slots`].
pub(crate) fn list_slots_mut<'a>(
    bytes: &'a mut [u8],
    regions: &Regions,
) -> ArenaResult<IndexAllocator<&'a mut [u8]>> {
    let block = layout::record_mut(bytes, regions.allocator, regions.allocator_len)?;
    IndexAllocator::attach(block).map_err(|_| ArenaError::corrupt("list handle allocator damaged"))
}

/// Fails with [`ArenaError::InvalidHandle`] unless `handle` names a live list.
pub(crate) fn check_handle(bytes: &[u8], regions: &Regions, handle: u32) -> ArenaResult<()> {
    if handle >= regions.list_capacity || !list_slots(bytes, regions)?.is_allocated(SlotIndex::new(handle))? {
        return Err(ArenaError::InvalidHandle(handle));
    }
    Ok(())
}

/// Builds the occupancy counters.
pub(crate) fn info(bytes: &[u8], header: &PoolHeader, regions: &Regions) -> ArenaResult<MultiListInfo> {
    let lists = list_slots(bytes, regions)?.info()?;
    Ok(MultiListInfo {
        lists_allocated: lists.allocated,
        lists_available: lists.available,
        items_allocated: header.items_allocated,
        items_available: header.item_capacity.saturating_sub(header.items_allocated),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: Geometry = Geometry { magic: 0x1234_5678, list_head_size: 12, item_fields: 8 };

    #[test]
    fn test_regions_are_contiguous() {
        let (r, total) = Regions::compute(GEOMETRY, 5, 2, 3).unwrap();
        assert_eq!(r.lists, 32);
        assert_eq!(r.allocator, 32 + 2 * 12);
        assert_eq!(r.allocator_len, 16 + 2 * 4);
        assert_eq!(r.items, r.allocator + r.allocator_len);
        assert_eq!(r.stride, 8 + 4);
        assert_eq!(total as usize, r.items + 5 * 12);
        assert_eq!(r.payload(1), r.items + 12 + 8);
    }

    #[test]
    fn test_init_and_check_attached() {
        let (_, total) = Regions::compute(GEOMETRY, 4, 1, 4).unwrap();
        let mut bytes = vec![0u8; total as usize];
        assert!(check_attached(&bytes, GEOMETRY).is_err());
        init_pool(&mut bytes, GEOMETRY, 4, 1, 4, &[0u32; 3]).unwrap();
        check_attached(&bytes, GEOMETRY).unwrap();

        let other = Geometry { magic: 1, ..GEOMETRY };
        assert_eq!(check_attached(&bytes, other), Err(ArenaError::NotInitialized));
        assert_eq!(check_attached(&bytes[..total as usize - 1], GEOMETRY), Err(ArenaError::NotInitialized));
    }
}
