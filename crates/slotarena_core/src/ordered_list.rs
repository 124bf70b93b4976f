//! # Key-Ordered Multi-List Pool
//!
//! Same arena shape as [`MultiList`](crate::MultiList), but every item carries
//! a `u32` key and each list stays sorted by it (non-decreasing, ties kept in
//! insertion order).
//!
//! ## Item Record
//!
//! ```text
//! [next: u32][key: u32][payload rounded up to 4]
//! ```
//!
//! There is no position cache: placement depends on the key, so every
//! operation walks from the head.

use bytemuck::{Pod, Zeroable};

use crate::error::{ArenaError, ArenaResult};
use crate::layout::{self, magic, ItemIndex, ListHandle, SlotIndex, NONE};
use crate::list_pool::{self, Geometry, MultiListInfo, PoolHeader, Regions};

/// Per-list bookkeeping.
///
/// Size: 12 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct ListHead {
    length: u32,
    head: u32,
    tail: u32,
}

impl ListHead {
    const EMPTY: Self = Self { length: 0, head: NONE, tail: NONE };
}

/// Fixed fields at the start of every item.
///
/// Size: 8 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct ItemFields {
    next: u32,
    key: u32,
}

const GEOMETRY: Geometry = Geometry {
    magic: magic::ORDERED_LIST,
    list_head_size: core::mem::size_of::<ListHead>() as u32,
    item_fields: core::mem::size_of::<ItemFields>() as u32,
};

/// Result of [`OrderedMultiList::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderedInsert {
    /// The new item.
    pub item: ItemIndex,
    /// Item directly before the new one.
    pub prev: Option<ItemIndex>,
    /// Item two places before the new one.
    pub prev_prev: Option<ItemIndex>,
}

/// Neighbour keys reported by [`OrderedMultiList::remove`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderedRemove {
    /// Key of the item that preceded the removed one.
    pub prev_key: Option<u32>,
    /// Key of the item two places before the removed one.
    pub prev_prev_key: Option<u32>,
    /// Key of the item that followed the removed one.
    pub next_key: Option<u32>,
}

/// Many key-sorted lists sharing one fixed item pool.
///
/// # Thread Safety
///
/// NOT thread-safe. Serialize access externally.
///
/// # Example
///
/// ```
/// use slotarena_core::OrderedMultiList;
///
/// let size = OrderedMultiList::size_for(8, 1, 4).unwrap();
/// let mut lists = OrderedMultiList::init(vec![0u8; size as usize], 8, 1, 4).unwrap();
/// let h = lists.create_list().unwrap();
///
/// lists.insert(h, 30, b"c").unwrap();
/// let ten = lists.insert(h, 10, b"a").unwrap().item;
/// let placed = lists.insert(h, 20, b"b").unwrap();
/// assert_eq!(placed.prev, Some(ten));
/// assert_eq!(placed.prev_prev, None);
///
/// let (_, position) = lists.find(h, 30).unwrap();
/// assert_eq!(position, 2);
/// ```
#[derive(Debug)]
pub struct OrderedMultiList<B = Vec<u8>> {
    buf: B,
}

impl OrderedMultiList {
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

impl<B: AsRef<[u8]>> OrderedMultiList<B> {
    /// Opens an ordered multi-list previously built with
    /// [`OrderedMultiList::init`].
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

    /// Finds the first item with `key`, returning it and its 0-based position.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidHandle`] if `list` is not a live list
    /// - [`ArenaError::KeyNotFound`] if no item has that key
    pub fn find(&self, list: ListHandle, key: u32) -> ArenaResult<(ItemIndex, u32)> {
        let regions = self.regions(&self.header()?)?;
        let head = self.list_head(&regions, list)?;

        let mut cur = head.head;
        for position in 0..head.length {
            let fields = self.fields(&regions, cur)?;
            if fields.key == key {
                return Ok((ItemIndex::new(cur), position));
            }
            // Sorted: nothing further on can match.
            if fields.key > key {
                break;
            }
            cur = fields.next;
        }
        Err(ArenaError::KeyNotFound)
    }

    /// Returns the key stored in `item`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `item` is outside the item pool.
    /// Stale items are not detected.
    pub fn key_of(&self, item: ItemIndex) -> ArenaResult<u32> {
        let regions = self.regions(&self.header()?)?;
        check_item(&regions, item)?;
        Ok(self.fields(&regions, item.get())?.key)
    }

    /// Borrows the payload of `item`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `item` is outside the item pool.
    /// Stale items are not detected: an index that was removed, or whose list
    /// was deleted, still reads whatever its slot now holds.
    pub fn payload(&self, item: ItemIndex) -> ArenaResult<&[u8]> {
        let regions = self.regions(&self.header()?)?;
        check_item(&regions, item)?;
        layout::record(
            self.buf.as_ref(),
            regions.payload(item.get()),
            regions.payload_size as usize,
        )
    }

    /// Iterates `list` in key order.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `list` is not a live list.
    pub fn iter(&self, list: ListHandle) -> ArenaResult<OrderedIter<'_>> {
        let regions = self.regions(&self.header()?)?;
        let head = self.list_head(&regions, list)?;
        Ok(OrderedIter {
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

    fn fields(&self, regions: &Regions, index: u32) -> ArenaResult<ItemFields> {
        if index >= regions.item_capacity {
            return Err(ArenaError::corrupt("list chain ended before its recorded length"));
        }
        layout::read(self.buf.as_ref(), regions.item(index))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> OrderedMultiList<B> {
    /// Builds an empty ordered multi-list arena inside `buf`.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] for zero or oversized capacities
    /// - [`ArenaError::NotInitialized`] for an empty buffer
    /// - [`ArenaError::BufferTooSmall`] if `buf` is shorter than `size_for`
    pub fn init(mut buf: B, items: u32, lists: u32, payload_size: u32) -> ArenaResult<Self> {
        let total = list_pool::init_pool(buf.as_mut(), GEOMETRY, items, lists, payload_size, &ListHead::EMPTY)?;
        tracing::debug!(items, lists, payload_size, bytes = total, "ordered multi-list initialized");
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

    /// Deletes `list`, splicing all of its items back into the shared pool.
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
        layout::write(self.buf.as_mut(), 0, &header)
    }

    /// Inserts an item after every existing item whose key is `<= key`.
    ///
    /// `payload` is copied in and zero-padded. The two items preceding the new
    /// one are reported so callers can relink side structures without a
    /// second walk.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidHandle`] if `list` is not a live list
    /// - [`ArenaError::BadParameter`] if `payload` is longer than the payload size
    /// - [`ArenaError::OutOfCapacity`] if the shared pool is empty
    pub fn insert(&mut self, list: ListHandle, key: u32, payload: &[u8]) -> ArenaResult<OrderedInsert> {
        let mut header = self.header()?;
        let regions = self.regions(&header)?;
        let mut head = self.list_head(&regions, list)?;

        if payload.len() > regions.payload_size as usize {
            return Err(ArenaError::BadParameter("payload larger than the configured payload size"));
        }

        let mut prev = NONE;
        let mut prev_prev = NONE;
        let mut cur = head.head;
        for _ in 0..head.length {
            let fields = self.fields(&regions, cur)?;
            if fields.key > key {
                break;
            }
            prev_prev = prev;
            prev = cur;
            cur = fields.next;
        }

        let index = header.free_head;
        if index == NONE {
            tracing::trace!(capacity = regions.item_capacity, "ordered multi-list item pool exhausted");
            return Err(ArenaError::OutOfCapacity);
        }
        header.free_head = self.fields(&regions, index)?.next;
        header.items_allocated += 1;

        let next = if prev == NONE { head.head } else { self.fields(&regions, prev)?.next };
        layout::write(self.buf.as_mut(), regions.item(index), &ItemFields { next, key })?;
        self.write_payload(&regions, index, payload)?;

        if prev == NONE {
            head.head = index;
        } else {
            self.set_next(&regions, prev, index)?;
        }
        if next == NONE {
            head.tail = index;
        }
        head.length += 1;

        layout::write(self.buf.as_mut(), regions.list(list.get()), &head)?;
        layout::write(self.buf.as_mut(), 0, &header)?;
        Ok(OrderedInsert {
            item: ItemIndex::new(index),
            prev: ItemIndex::new(prev).to_option(),
            prev_prev: ItemIndex::new(prev_prev).to_option(),
        })
    }

    /// Removes the first item with `key` and reports its neighbours' keys.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidHandle`] if `list` is not a live list
    /// - [`ArenaError::KeyNotFound`] if no item has that key
    pub fn remove(&mut self, list: ListHandle, key: u32) -> ArenaResult<OrderedRemove> {
        let mut header = self.header()?;
        let regions = self.regions(&header)?;
        let mut head = self.list_head(&regions, list)?;

        let mut prev: Option<(u32, u32)> = None;
        let mut prev_prev_key = None;
        let mut cur = head.head;
        let mut found = None;
        for _ in 0..head.length {
            let fields = self.fields(&regions, cur)?;
            if fields.key == key {
                found = Some(fields);
                break;
            }
            if fields.key > key {
                break;
            }
            prev_prev_key = prev.map(|(_, k)| k);
            prev = Some((cur, fields.key));
            cur = fields.next;
        }
        let victim = found.ok_or(ArenaError::KeyNotFound)?;

        let next_key = if victim.next == NONE { None } else { Some(self.fields(&regions, victim.next)?.key) };
        match prev {
            None => head.head = victim.next,
            Some((p, _)) => self.set_next(&regions, p, victim.next)?,
        }
        if victim.next == NONE {
            head.tail = prev.map_or(NONE, |(p, _)| p);
        }
        head.length -= 1;
        if head.length == 0 {
            head = ListHead::EMPTY;
        }

        self.set_next(&regions, cur, header.free_head)?;
        header.free_head = cur;
        header.items_allocated = header
            .items_allocated
            .checked_sub(1)
            .ok_or_else(|| ArenaError::corrupt("item count underflow"))?;

        layout::write(self.buf.as_mut(), regions.list(list.get()), &head)?;
        layout::write(self.buf.as_mut(), 0, &header)?;
        Ok(OrderedRemove {
            prev_key: prev.map(|(_, k)| k),
            prev_prev_key,
            next_key,
        })
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
        check_item(&regions, item)?;
        layout::record_mut(
            self.buf.as_mut(),
            regions.payload(item.get()),
            regions.payload_size as usize,
        )
    }

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
}

fn check_item(regions: &Regions, item: ItemIndex) -> ArenaResult<()> {
    if item.get() >= regions.item_capacity {
        return Err(ArenaError::InvalidHandle(item.get()));
    }
    Ok(())
}

/// Key-order iterator over one list.
///
/// Yields `(slot, key, payload)` triples.
#[derive(Debug)]
pub struct OrderedIter<'a> {
    buf: &'a [u8],
    regions: Regions,
    next: u32,
    remaining: u32,
}

impl<'a> Iterator for OrderedIter<'a> {
    type Item = ArenaResult<(ItemIndex, u32, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.next;
        if index >= self.regions.item_capacity {
            self.remaining = 0;
            return Some(Err(ArenaError::corrupt("list chain ended before its recorded length")));
        }
        let item = layout::read::<ItemFields>(self.buf, self.regions.item(index)).and_then(|fields| {
            let payload = layout::record(
                self.buf,
                self.regions.payload(index),
                self.regions.payload_size as usize,
            )?;
            Ok((fields, payload))
        });
        match item {
            Ok((fields, payload)) => {
                self.next = fields.next;
                self.remaining -= 1;
                Some(Ok((ItemIndex::new(index), fields.key, payload)))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(items: u32, lists: u32) -> OrderedMultiList {
        let size = OrderedMultiList::size_for(items, lists, 4).unwrap();
        OrderedMultiList::init(vec![0u8; size as usize], items, lists, 4).unwrap()
    }

    fn keys(ol: &OrderedMultiList, list: ListHandle) -> Vec<u32> {
        ol.iter(list)
            .unwrap()
            .map(|item| item.map(|(_, key, _)| key))
            .collect::<ArenaResult<_>>()
            .unwrap()
    }

    #[test]
    fn test_size_for() {
        // 32 header + 12 list head + (16 + 4) allocator + 2 * (8 + 4) items
        assert_eq!(OrderedMultiList::size_for(2, 1, 3).unwrap(), 32 + 12 + 20 + 24);
        assert!(OrderedMultiList::size_for(2, 1, 0).is_err());
    }

    #[test]
    fn test_insert_keeps_keys_sorted() {
        let mut ol = arena(8, 1);
        let h = ol.create_list().unwrap();
        for key in [5, 1, 9, 3, 7] {
            ol.insert(h, key, &key.to_le_bytes()).unwrap();
        }
        assert_eq!(keys(&ol, h), vec![1, 3, 5, 7, 9]);
        assert_eq!(ol.length(h).unwrap(), 5);
    }

    #[test]
    fn test_equal_keys_go_after_existing() {
        let mut ol = arena(4, 1);
        let h = ol.create_list().unwrap();
        let first = ol.insert(h, 2, b"one").unwrap().item;
        let second = ol.insert(h, 2, b"two").unwrap();
        assert_eq!(second.prev, Some(first));

        let order: Vec<ItemIndex> = ol.iter(h).unwrap().map(|i| i.unwrap().0).collect();
        assert_eq!(order, vec![first, second.item]);
        // find returns the earlier of the two.
        assert_eq!(ol.find(h, 2).unwrap(), (first, 0));
    }

    #[test]
    fn test_insert_reports_predecessors() {
        let mut ol = arena(8, 1);
        let h = ol.create_list().unwrap();

        let a = ol.insert(h, 10, &[]).unwrap();
        assert_eq!((a.prev, a.prev_prev), (None, None));

        let b = ol.insert(h, 20, &[]).unwrap();
        assert_eq!((b.prev, b.prev_prev), (Some(a.item), None));

        let c = ol.insert(h, 30, &[]).unwrap();
        assert_eq!((c.prev, c.prev_prev), (Some(b.item), Some(a.item)));

        let front = ol.insert(h, 5, &[]).unwrap();
        assert_eq!((front.prev, front.prev_prev), (None, None));

        let mid = ol.insert(h, 25, &[]).unwrap();
        assert_eq!((mid.prev, mid.prev_prev), (Some(b.item), Some(a.item)));
    }

    #[test]
    fn test_remove_reports_neighbour_keys() {
        let mut ol = arena(8, 1);
        let h = ol.create_list().unwrap();
        for key in [10, 20, 30, 40] {
            ol.insert(h, key, &[]).unwrap();
        }

        let r = ol.remove(h, 30).unwrap();
        assert_eq!(r, OrderedRemove { prev_key: Some(20), prev_prev_key: Some(10), next_key: Some(40) });

        let r = ol.remove(h, 10).unwrap();
        assert_eq!(r, OrderedRemove { prev_key: None, prev_prev_key: None, next_key: Some(20) });

        let r = ol.remove(h, 40).unwrap();
        assert_eq!(r, OrderedRemove { prev_key: Some(20), prev_prev_key: None, next_key: None });

        assert_eq!(ol.remove(h, 99), Err(ArenaError::KeyNotFound));
        assert_eq!(keys(&ol, h), vec![20]);

        ol.remove(h, 20).unwrap();
        assert_eq!(ol.length(h).unwrap(), 0);
        // Tail was reset with the last removal: appending works again.
        ol.insert(h, 1, &[]).unwrap();
        ol.insert(h, 2, &[]).unwrap();
        assert_eq!(keys(&ol, h), vec![1, 2]);
    }

    #[test]
    fn test_find() {
        let mut ol = arena(8, 1);
        let h = ol.create_list().unwrap();
        for key in [4, 8, 15, 16, 23, 42] {
            ol.insert(h, key, &key.to_le_bytes()).unwrap();
        }
        let (item, position) = ol.find(h, 16).unwrap();
        assert_eq!(position, 3);
        assert_eq!(ol.key_of(item).unwrap(), 16);
        assert_eq!(ol.payload(item).unwrap(), 16u32.to_le_bytes());
        assert_eq!(ol.find(h, 5), Err(ArenaError::KeyNotFound));
        assert_eq!(ol.find(h, 100), Err(ArenaError::KeyNotFound));
    }

    #[test]
    fn test_lists_share_the_pool() {
        let mut ol = arena(3, 2);
        let a = ol.create_list().unwrap();
        let b = ol.create_list().unwrap();
        ol.insert(a, 1, &[]).unwrap();
        ol.insert(b, 1, &[]).unwrap();
        ol.insert(b, 2, &[]).unwrap();
        assert_eq!(ol.insert(a, 3, &[]), Err(ArenaError::OutOfCapacity));

        ol.delete_list(b).unwrap();
        assert_eq!(ol.info().unwrap().items_available, 2);
        ol.insert(a, 3, &[]).unwrap();
        assert_eq!(keys(&ol, a), vec![1, 3]);
        assert_eq!(ol.insert(b, 0, &[]), Err(ArenaError::InvalidHandle(b.get())));
    }

    #[test]
    fn test_payload_mut_and_bad_payload() {
        let mut ol = arena(2, 1);
        let h = ol.create_list().unwrap();
        let item = ol.insert(h, 7, &[1]).unwrap().item;
        assert_eq!(ol.payload(item).unwrap(), &[1, 0, 0, 0]);
        ol.payload_mut(item).unwrap()[3] = 9;
        assert_eq!(ol.payload(item).unwrap(), &[1, 0, 0, 9]);
        assert!(matches!(ol.insert(h, 1, &[0; 5]), Err(ArenaError::BadParameter(_))));
        assert_eq!(ol.key_of(ItemIndex::new(2)), Err(ArenaError::InvalidHandle(2)));
    }

    #[test]
    fn test_stale_item_reads_its_slot() {
        let mut ol = arena(2, 1);
        let h = ol.create_list().unwrap();
        let item = ol.insert(h, 5, b"abcd").unwrap().item;
        ol.remove(h, 5).unwrap();

        assert_eq!(ol.payload(item).unwrap(), b"abcd");
        assert!(ol.payload_mut(item).is_ok());

        let reused = ol.insert(h, 9, b"wxyz").unwrap().item;
        assert_eq!(reused, item);
        assert_eq!(ol.key_of(item).unwrap(), 9);
        assert_eq!(ol.payload(item).unwrap(), b"wxyz");
    }

    #[test]
    fn test_attach_rejects_other_structures() {
        let size = crate::MultiList::size_for(4, 1, 4).unwrap();
        let plain = crate::MultiList::init(vec![0u8; size as usize], 4, 1, 4).unwrap();
        assert_eq!(
            OrderedMultiList::attach(plain.into_inner()).unwrap_err(),
            ArenaError::NotInitialized
        );

        let mut ol = arena(4, 1);
        let h = ol.create_list().unwrap();
        ol.insert(h, 3, &[]).unwrap();
        let ol = OrderedMultiList::attach(ol.into_inner().into_boxed_slice()).unwrap();
        assert_eq!(ol.find(h, 3).unwrap().1, 0);
    }
}
