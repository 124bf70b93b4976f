//! # Multi-List Pool
//!
//! Many independent lists of fixed-size records drawing from one shared item pool.
//!
//! ## Arena Layout
//!
//! ```text
//! [PoolHeader: 32 bytes]
//! [ListHead x list_capacity: 20 bytes each]
//! [IndexAllocator block managing the ListHead slots]
//! [Item x item_capacity: 4-byte forward link + payload rounded up to 4]
//! ```
//!
//! Items form singly-forward-linked chains. The free pool is itself such a
//! chain, so deleting a whole list splices it back in O(1).
//!
//! ## Position Cache
//!
//! Each list remembers the last position it touched and that item's slot.
//! Sequential scans and appends are O(1) amortized; random access is O(n)
//! worst case. There is no index structure beyond that.

use bytemuck::{Pod, Zeroable};

use crate::error::{ArenaError, ArenaResult};
use crate::layout::{self, magic, ItemIndex, ListHandle, SlotIndex, NONE};
use crate::list_pool::{self, Geometry, MultiListInfo, PoolHeader, Regions};

/// Position value meaning "after the last item".
pub const APPEND: u32 = NONE;

/// Per-list bookkeeping.
///
/// Size: 20 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct ListHead {
    length: u32,
    head: u32,
    tail: u32,
    cache_position: u32,
    cache_index: u32,
}

impl ListHead {
    const EMPTY: Self = Self {
        length: 0,
        head: NONE,
        tail: NONE,
        cache_position: NONE,
        cache_index: NONE,
    };

    #[inline]
    fn set_cache(&mut self, position: u32, index: u32) {
        self.cache_position = position;
        self.cache_index = index;
    }

    #[inline]
    fn clear_cache(&mut self) {
        self.cache_position = NONE;
        self.cache_index = NONE;
    }
}

const LIST_HEAD_SIZE: u32 = core::mem::size_of::<ListHead>() as u32;
const LINK_SIZE: u32 = 4;

const GEOMETRY: Geometry = Geometry {
    magic: magic::MULTI_LIST,
    list_head_size: LIST_HEAD_SIZE,
    item_fields: LINK_SIZE,
};

/// Many positional lists sharing one fixed item pool.
///
/// # Thread Safety
///
/// NOT thread-safe. Serialize access externally.
///
/// # Example
///
/// ```
/// use slotarena_core::{MultiList, APPEND};
///
/// let size = MultiList::size_for(16, 2, 4).unwrap();
/// let mut lists = MultiList::init(vec![0u8; size as usize], 16, 2, 4).unwrap();
///
/// let h = lists.create_list().unwrap();
/// lists.insert(h, APPEND, b"tail").unwrap();
/// lists.insert(h, 0, b"head").unwrap();
///
/// let item = lists.item_at(h, 1).unwrap();
/// assert_eq!(lists.payload(item).unwrap(), b"tail");
/// ```
#[derive(Debug)]
pub struct MultiList<B = Vec<u8>> {
    buf: B,
}

impl MultiList {
    /// Returns the bytes needed for the given capacities.
    ///
    /// # Errors
    ///
    /// [`ArenaError::BadParameter`] if any argument is zero or the size
    /// overflows `u32`.
    pub fn size_for(items: u32, lists: u32, payload_size: u32) -> ArenaResult<u32> {
        Regions::compute(GEOMETRY, items, lists, payload_size).map(|(_, total)| total)
    }
}

impl<B: AsRef<[u8]>> MultiList<B> {
    /// Opens a multi-list previously built with [`MultiList::init`].
    ///
    /// # Errors
    ///
    /// [`ArenaError::NotInitialized`] if the buffer does not hold one.
    pub fn attach(buf: B) -> ArenaResult<Self> {
        list_pool::check_attached(buf.as_ref(), GEOMETRY)?;
        Ok(Self { buf })
    }

    /// Releases the underlying buffer.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Returns the configured payload size in bytes.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn payload_size(&self) -> ArenaResult<u32> {
        Ok(self.header()?.payload_size)
    }

    /// Returns occupancy counters.
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub fn info(&self) -> ArenaResult<MultiListInfo> {
        let header = self.header()?;
        let regions = self.regions(&header)?;
        list_pool::info(self.buf.as_ref(), &header, &regions)
    }

    /// Returns the number of items in `list`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `list` is not a live list.
    pub fn length(&self, list: ListHandle) -> ArenaResult<u32> {
        let regions = self.regions(&self.header()?)?;
        Ok(self.list_head(&regions, list)?.length)
    }

    /// Borrows the payload of `item`.
    ///
    /// `item` must come from this arena and still be linked into a list.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `item` is outside the item pool.
    /// Stale items are not detected: an index that was removed, or whose list
    /// was deleted, still reads whatever its slot now holds.
    pub fn payload(&self, item: ItemIndex) -> ArenaResult<&[u8]> {
        let regions = self.regions(&self.header()?)?;
        if item.get() >= regions.item_capacity {
            return Err(ArenaError::InvalidHandle(item.get()));
        }
        layout::record(
            self.buf.as_ref(),
            regions.payload(item.get()),
            regions.payload_size as usize,
        )
    }

    /// Iterates `list` front to back without touching the position cache.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `list` is not a live list. Corruption
    /// found mid-walk is yielded as an item error.
    pub fn iter(&self, list: ListHandle) -> ArenaResult<ListIter<'_>> {
        let regions = self.regions(&self.header()?)?;
        let head = self.list_head(&regions, list)?;
        Ok(ListIter {
            buf: self.buf.as_ref(),
            regions,
            next: head.head,
            remaining: head.length,
        })
    }

    fn header(&self) -> ArenaResult<PoolHeader> {
        layout::read(self.buf.as_ref(), 0)
    }

    fn regions(&self, header: &PoolHeader) -> ArenaResult<Regions> {
        Regions::from_header(GEOMETRY, header)
    }

    fn list_head(&self, regions: &Regions, list: ListHandle) -> ArenaResult<ListHead> {
        list_pool::check_handle(self.buf.as_ref(), regions, list.get())?;
        layout::read(self.buf.as_ref(), regions.list(list.get()))
    }

    /// Follows the forward link of a live item.
    fn next_of(&self, regions: &Regions, index: u32) -> ArenaResult<u32> {
        if index >= regions.item_capacity {
            return Err(ArenaError::corrupt("list chain ended before its recorded length"));
        }
        layout::read(self.buf.as_ref(), regions.item(index))
    }

    /// Finds the slot at `position` (< length), using the tail or the cache
    /// when possible, and moves the cache there.
    fn locate(&self, regions: &Regions, head: &mut ListHead, position: u32) -> ArenaResult<u32> {
        let index = if position + 1 == head.length {
            head.tail
        } else {
            let (mut at, mut cur) = if head.cache_index != NONE && head.cache_position <= position {
                (head.cache_position, head.cache_index)
            } else {
                (0, head.head)
            };
            while at < position {
                cur = self.next_of(regions, cur)?;
                at += 1;
            }
            cur
        };
        if index >= regions.item_capacity {
            return Err(ArenaError::corrupt("list chain ended before its recorded length"));
        }
        head.set_cache(position, index);
        Ok(index)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> MultiList<B> {
    /// Builds an empty multi-list arena inside `buf`.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] for zero or oversized capacities
    /// - [`ArenaError::NotInitialized`] for an empty buffer
    /// - [`ArenaError::BufferTooSmall`] if `buf` is shorter than `size_for`
    pub fn init(mut buf: B, items: u32, lists: u32, payload_size: u32) -> ArenaResult<Self> {
        let total = list_pool::init_pool(buf.as_mut(), GEOMETRY, items, lists, payload_size, &ListHead::EMPTY)?;
        tracing::debug!(items, lists, payload_size, bytes = total, "multi-list initialized");
        Ok(Self { buf })
    }

    /// Creates an empty list.
    ///
    /// # Errors
    ///
    /// [`ArenaError::OutOfCapacity`] if every list handle is taken.
    pub fn create_list(&mut self) -> ArenaResult<ListHandle> {
        let regions = self.regions(&self.header()?)?;
        let slot = list_pool::list_slots_mut(self.buf.as_mut(), &regions)?.alloc()?;
        layout::write(self.buf.as_mut(), regions.list(slot.get()), &ListHead::EMPTY)?;
        Ok(ListHandle::new(slot.get()))
    }

    /// Deletes `list`, returning all of its items to the shared pool in one
    /// splice.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `list` is not a live list.
    pub fn delete_list(&mut self, list: ListHandle) -> ArenaResult<()> {
        let mut header = self.header()?;
        let regions = self.regions(&header)?;
        let head = self.list_head(&regions, list)?;

        if head.length > 0 {
            if head.tail >= regions.item_capacity || head.head >= regions.item_capacity {
                return Err(ArenaError::corrupt("non-empty list without head or tail"));
            }
            self.set_next(&regions, head.tail, header.free_head)?;
            header.free_head = head.head;
            header.items_allocated = header
                .items_allocated
                .checked_sub(head.length)
                .ok_or_else(|| ArenaError::corrupt("item count underflow"))?;
        }

        layout::write(self.buf.as_mut(), regions.list(list.get()), &ListHead::EMPTY)?;
        list_pool::list_slots_mut(self.buf.as_mut(), &regions)?.dealloc(SlotIndex::new(list.get()))?;
        self.set_header(&header)
    }

    /// Inserts an item at `position` (`0..=length`, or [`APPEND`]).
    ///
    /// `payload` is copied in and zero-padded to the payload size. Returns the
    /// new item's slot, whose payload can be rewritten with
    /// [`MultiList::payload_mut`].
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidHandle`] if `list` is not a live list
    /// - [`ArenaError::OutOfRange`] if `position > length`
    /// - [`ArenaError::BadParameter`] if `payload` is longer than the payload size
    /// - [`ArenaError::OutOfCapacity`] if the shared pool is empty
    pub fn insert(&mut self, list: ListHandle, position: u32, payload: &[u8]) -> ArenaResult<ItemIndex> {
        let mut header = self.header()?;
        let regions = self.regions(&header)?;
        let mut head = self.list_head(&regions, list)?;

        if payload.len() > regions.payload_size as usize {
            return Err(ArenaError::BadParameter("payload larger than the configured payload size"));
        }
        let position = if position == APPEND { head.length } else { position };
        if position > head.length {
            return Err(ArenaError::OutOfRange { position, length: head.length });
        }

        let index = self.take_item(&regions, &mut header)?;
        self.write_payload(&regions, index, payload)?;

        if position == head.length {
            self.set_next(&regions, index, NONE)?;
            if head.length == 0 {
                head.head = index;
            } else {
                self.set_next(&regions, head.tail, index)?;
            }
            head.tail = index;
        } else if position == 0 {
            self.set_next(&regions, index, head.head)?;
            head.head = index;
        } else {
            let pred = self.locate(&regions, &mut head, position - 1)?;
            let after = self.next_of(&regions, pred)?;
            self.set_next(&regions, index, after)?;
            self.set_next(&regions, pred, index)?;
        }

        head.length += 1;
        head.set_cache(position, index);
        self.set_list_head(&regions, list, &head)?;
        self.set_header(&header)?;
        Ok(ItemIndex::new(index))
    }

    /// Removes the item at `position` and returns it to the shared pool.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidHandle`] if `list` is not a live list
    /// - [`ArenaError::OutOfRange`] if `position >= length`
    pub fn remove(&mut self, list: ListHandle, position: u32) -> ArenaResult<()> {
        let mut header = self.header()?;
        let regions = self.regions(&header)?;
        let mut head = self.list_head(&regions, list)?;

        if position >= head.length {
            return Err(ArenaError::OutOfRange { position, length: head.length });
        }

        let victim = if position == 0 {
            let victim = head.head;
            head.head = self.next_of(&regions, victim)?;
            // Everything after the old head moves up one.
            if head.cache_index == victim || head.cache_position == 0 {
                head.clear_cache();
            } else if head.cache_index != NONE {
                head.cache_position -= 1;
            }
            victim
        } else {
            let pred = self.locate(&regions, &mut head, position - 1)?;
            let victim = self.next_of(&regions, pred)?;
            let after = self.next_of(&regions, victim)?;
            self.set_next(&regions, pred, after)?;
            if victim == head.tail {
                head.tail = pred;
            }
            victim
        };

        head.length -= 1;
        if head.length == 0 {
            head = ListHead::EMPTY;
        }
        self.set_next(&regions, victim, header.free_head)?;
        header.free_head = victim;
        header.items_allocated = header
            .items_allocated
            .checked_sub(1)
            .ok_or_else(|| ArenaError::corrupt("item count underflow"))?;

        self.set_list_head(&regions, list, &head)?;
        self.set_header(&header)
    }

    /// Returns the slot at `position` and moves the cache there.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidHandle`] if `list` is not a live list
    /// - [`ArenaError::OutOfRange`] if `position >= length`
    pub fn item_at(&mut self, list: ListHandle, position: u32) -> ArenaResult<ItemIndex> {
        let regions = self.regions(&self.header()?)?;
        let mut head = self.list_head(&regions, list)?;
        if position >= head.length {
            return Err(ArenaError::OutOfRange { position, length: head.length });
        }
        let index = self.locate(&regions, &mut head, position)?;
        self.set_list_head(&regions, list, &head)?;
        Ok(ItemIndex::new(index))
    }

    /// Appends `count` zeroed items in one pass. Returns the first new slot.
    ///
    /// All or nothing: if the pool cannot supply `count` items nothing is
    /// appended.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] if `count` is zero
    /// - [`ArenaError::OutOfCapacity`] if fewer than `count` items are free
    pub fn append_many(&mut self, list: ListHandle, count: u32) -> ArenaResult<ItemIndex> {
        self.append_run(list, count, None)
    }

    /// Appends `count` items whose payloads are consecutive
    /// `payload_size`-byte chunks of `data`.
    ///
    /// # Errors
    ///
    /// As [`MultiList::append_many`], plus [`ArenaError::BadParameter`] if
    /// `data.len() != count * payload_size`.
    pub fn append_and_set_many(&mut self, list: ListHandle, count: u32, data: &[u8]) -> ArenaResult<ItemIndex> {
        self.append_run(list, count, Some(data))
    }

    /// Overwrites the payloads of consecutive items starting at `start`.
    ///
    /// `data` holds whole payloads back to back.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] if `data` is empty or not a whole number of payloads
    /// - [`ArenaError::OutOfRange`] if the range runs past the end of the list
    pub fn set_range(&mut self, list: ListHandle, start: u32, data: &[u8]) -> ArenaResult<()> {
        let regions = self.regions(&self.header()?)?;
        let mut head = self.list_head(&regions, list)?;
        let count = range_count(&regions, &head, start, data.len())?;

        let mut index = self.locate(&regions, &mut head, start)?;
        let size = regions.payload_size as usize;
        for (k, chunk) in data.chunks_exact(size).enumerate() {
            if k > 0 {
                index = self.next_of(&regions, index)?;
            }
            self.write_payload(&regions, index, chunk)?;
        }
        head.set_cache(start + count - 1, index);
        self.set_list_head(&regions, list, &head)
    }

    /// Copies the payloads of consecutive items starting at `start` into `out`.
    ///
    /// # Errors
    ///
    /// As [`MultiList::set_range`], with `out` sized in whole payloads.
    pub fn copy_range(&mut self, list: ListHandle, start: u32, out: &mut [u8]) -> ArenaResult<()> {
        let regions = self.regions(&self.header()?)?;
        let mut head = self.list_head(&regions, list)?;
        let count = range_count(&regions, &head, start, out.len())?;

        let mut index = self.locate(&regions, &mut head, start)?;
        let size = regions.payload_size as usize;
        for (k, chunk) in out.chunks_exact_mut(size).enumerate() {
            if k > 0 {
                index = self.next_of(&regions, index)?;
            }
            let offset = regions.payload(index);
            chunk.copy_from_slice(layout::record(self.buf.as_ref(), offset, size)?);
        }
        head.set_cache(start + count - 1, index);
        self.set_list_head(&regions, list, &head)
    }

    /// Mutably borrows the payload of `item`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `item` is outside the item pool.
    /// Stale items are not detected: an index that was removed, or whose list
    /// was deleted, still reads whatever its slot now holds.
    pub fn payload_mut(&mut self, item: ItemIndex) -> ArenaResult<&mut [u8]> {
        let regions = self.regions(&self.header()?)?;
        if item.get() >= regions.item_capacity {
            return Err(ArenaError::InvalidHandle(item.get()));
        }
        layout::record_mut(
            self.buf.as_mut(),
            regions.payload(item.get()),
            regions.payload_size as usize,
        )
    }

    fn append_run(&mut self, list: ListHandle, count: u32, data: Option<&[u8]>) -> ArenaResult<ItemIndex> {
        let mut header = self.header()?;
        let regions = self.regions(&header)?;
        let mut head = self.list_head(&regions, list)?;

        if count == 0 {
            return Err(ArenaError::BadParameter("append count must be non-zero"));
        }
        let size = regions.payload_size as usize;
        if let Some(data) = data {
            if data.len() != size * count as usize {
                return Err(ArenaError::BadParameter("data must hold exactly count payloads"));
            }
        }
        if count > header.item_capacity.saturating_sub(header.items_allocated) {
            tracing::trace!(count, "multi-list pool cannot satisfy bulk append");
            return Err(ArenaError::OutOfCapacity);
        }

        // The free pool is already a chain: detach its first `count` links.
        let first = header.free_head;
        let mut last = first;
        for k in 0..count as usize {
            if k > 0 {
                last = self.next_of(&regions, last)?;
            }
            let chunk = data.map_or(&[][..], |d| &d[k * size..(k + 1) * size]);
            self.write_payload(&regions, last, chunk)?;
        }
        header.free_head = self.next_of(&regions, last)?;
        self.set_next(&regions, last, NONE)?;
        header.items_allocated += count;

        if head.length == 0 {
            head.head = first;
        } else {
            self.set_next(&regions, head.tail, first)?;
        }
        head.tail = last;
        head.length += count;
        head.set_cache(head.length - 1, last);

        self.set_list_head(&regions, list, &head)?;
        self.set_header(&header)?;
        Ok(ItemIndex::new(first))
    }

    fn take_item(&self, regions: &Regions, header: &mut PoolHeader) -> ArenaResult<u32> {
        let index = header.free_head;
        if index == NONE {
            tracing::trace!(capacity = regions.item_capacity, "multi-list item pool exhausted");
            return Err(ArenaError::OutOfCapacity);
        }
        header.free_head = self.next_of(regions, index)?;
        header.items_allocated += 1;
        Ok(index)
    }

    /// Copies `payload` into the item and zero-fills the remainder.
    fn write_payload(&mut self, regions: &Regions, index: u32, payload: &[u8]) -> ArenaResult<()> {
        let dest = layout::record_mut(
            self.buf.as_mut(),
            regions.payload(index),
            regions.payload_size as usize,
        )?;
        let (head, rest) = dest.split_at_mut(payload.len());
        head.copy_from_slice(payload);
        rest.fill(0);
        Ok(())
    }

    fn set_next(&mut self, regions: &Regions, index: u32, next: u32) -> ArenaResult<()> {
        if index >= regions.item_capacity {
            return Err(ArenaError::corrupt("link write outside the item pool"));
        }
        layout::write(self.buf.as_mut(), regions.item(index), &next)
    }

    fn set_list_head(&mut self, regions: &Regions, list: ListHandle, head: &ListHead) -> ArenaResult<()> {
        layout::write(self.buf.as_mut(), regions.list(list.get()), head)
    }

    fn set_header(&mut self, header: &PoolHeader) -> ArenaResult<()> {
        layout::write(self.buf.as_mut(), 0, header)
    }
}

/// Validates a whole-payload range and returns its item count.
fn range_count(regions: &Regions, head: &ListHead, start: u32, bytes: usize) -> ArenaResult<u32> {
    let size = regions.payload_size as usize;
    if bytes == 0 || bytes % size != 0 {
        return Err(ArenaError::BadParameter("range must hold a whole, non-zero number of payloads"));
    }
    let count = u32::try_from(bytes / size)
        .map_err(|_| ArenaError::BadParameter("range longer than any list"))?;
    match start.checked_add(count) {
        Some(end) if end <= head.length => Ok(count),
        _ => Err(ArenaError::OutOfRange { position: start, length: head.length }),
    }
}

/// Front-to-back iterator over one list.
///
/// Yields `(slot, payload)` pairs.
#[derive(Debug)]
pub struct ListIter<'a> {
    buf: &'a [u8],
    regions: Regions,
    next: u32,
    remaining: u32,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = ArenaResult<(ItemIndex, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.next;
        if index >= self.regions.item_capacity {
            self.remaining = 0;
            return Some(Err(ArenaError::corrupt("list chain ended before its recorded length")));
        }
        let offset = self.regions.item(index);
        let item = layout::read::<u32>(self.buf, offset).and_then(|next| {
            let payload = layout::record(
                self.buf,
                self.regions.payload(index),
                self.regions.payload_size as usize,
            )?;
            Ok((next, payload))
        });
        match item {
            Ok((next, payload)) => {
                self.next = next;
                self.remaining -= 1;
                Some(Ok((ItemIndex::new(index), payload)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}
