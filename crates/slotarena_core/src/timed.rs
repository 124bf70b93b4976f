//! # Timed Index Allocator
//!
//! An index pool whose frees can be deferred until a caller-supplied timeout.
//!
//! ## Design
//!
//! ```text
//! free list:     head -> 4 -> 1 -> NONE          (LIFO, like IndexAllocator)
//! pending queue: head -> 0 -> 3 -> 2 -> NONE     (ascending expiry)
//!                                   ^ tail
//! ```
//!
//! A deferred free parks the slot on the pending queue. Parked slots only go
//! back to the free list when an allocation finds the free list empty and
//! sweeps the queue head, or when the caller sweeps explicitly. Deferral is
//! capacity relief, not a guarantee: if nothing has expired, `alloc` fails.

use bytemuck::{Pod, Zeroable};

use crate::error::{ArenaError, ArenaResult};
use crate::layout::{self, magic, SlotIndex, NONE};
use crate::time::Timestamp;

/// Arena header for a [`TimedIndexAllocator`].
///
/// Size: 32 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct TimedHeader {
    magic: u32,
    capacity: u32,
    /// Slots held by callers (pending slots not included).
    allocated: u32,
    free_head: u32,
    pending_head: u32,
    pending_tail: u32,
    pending: u32,
    _padding: u32,
}

/// One slot record.
///
/// Size: 16 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawCell {
    state: u32,
    next: u32,
    expiry: Timestamp,
}

const HEADER_SIZE: u32 = core::mem::size_of::<TimedHeader>() as u32;
const CELL_SIZE: u32 = core::mem::size_of::<RawCell>() as u32;

const STATE_FREE: u32 = 0;
const STATE_IN_USE: u32 = 1;
const STATE_PENDING: u32 = 2;

/// Decoded slot state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimedCell {
    Free { next: u32 },
    InUse,
    Pending { next: u32, expiry: Timestamp },
}

impl TimedCell {
    fn decode(raw: RawCell) -> ArenaResult<Self> {
        match raw.state {
            STATE_FREE => Ok(Self::Free { next: raw.next }),
            STATE_IN_USE => Ok(Self::InUse),
            STATE_PENDING => Ok(Self::Pending { next: raw.next, expiry: raw.expiry }),
            _ => Err(ArenaError::corrupt("unknown timed slot state")),
        }
    }

    const fn encode(self) -> RawCell {
        match self {
            Self::Free { next } => RawCell { state: STATE_FREE, next, expiry: Timestamp::ZERO },
            Self::InUse => RawCell { state: STATE_IN_USE, next: NONE, expiry: Timestamp::ZERO },
            Self::Pending { next, expiry } => RawCell { state: STATE_PENDING, next, expiry },
        }
    }
}

/// Counters of a timed allocator.
///
/// `allocated + pending + available` always equals the capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimedInfo {
    /// Slots held by callers.
    pub allocated: u32,
    /// Slots on the free list.
    pub available: u32,
    /// Slots waiting for their expiry.
    pub pending: u32,
}

/// A free-index pool with deferred, time-ordered frees.
///
/// # Thread Safety
///
/// NOT thread-safe. Serialize access externally.
///
/// # Example
///
/// ```
/// use slotarena_core::{ArenaError, Timestamp, TimedIndexAllocator};
///
/// let size = TimedIndexAllocator::size_for(1).unwrap();
/// let mut pool = TimedIndexAllocator::init(vec![0u8; size as usize], 1).unwrap();
///
/// let slot = pool.alloc(Timestamp::ZERO).unwrap();
/// pool.dealloc_deferred(slot, Timestamp::from_low(100), Timestamp::ZERO).unwrap();
///
/// assert_eq!(pool.alloc(Timestamp::from_low(99)), Err(ArenaError::OutOfCapacity));
/// assert_eq!(pool.alloc(Timestamp::from_low(100)).unwrap(), slot);
/// ```
#[derive(Debug)]
pub struct TimedIndexAllocator<B = Vec<u8>> {
    buf: B,
}

impl TimedIndexAllocator {
    /// Returns the bytes needed for `capacity` slots.
    ///
    /// # Errors
    ///
    /// [`ArenaError::BadParameter`] for a zero or oversized capacity.
    pub fn size_for(capacity: u32) -> ArenaResult<u32> {
        layout::check_capacity(capacity, "timed allocator capacity must be in 1..=0xFFFFFFFD")?;
        layout::add(HEADER_SIZE, layout::mul(capacity, CELL_SIZE)?)
    }
}

impl<B: AsRef<[u8]>> TimedIndexAllocator<B> {
    /// Opens an allocator previously built with [`TimedIndexAllocator::init`].
    ///
    /// # Errors
    ///
    /// [`ArenaError::NotInitialized`] if the buffer does not hold one.
    pub fn attach(buf: B) -> ArenaResult<Self> {
        let bytes = buf.as_ref();
        if bytes.len() < HEADER_SIZE as usize {
            return Err(ArenaError::NotInitialized);
        }
        let header: TimedHeader = layout::read(bytes, 0)?;
        if header.magic != magic::TIMED_ALLOCATOR {
            return Err(ArenaError::NotInitialized);
        }
        let required =
            TimedIndexAllocator::size_for(header.capacity).map_err(|_| ArenaError::NotInitialized)?;
        let held = u64::from(header.allocated) + u64::from(header.pending);
        if bytes.len() < required as usize || held > u64::from(header.capacity) {
            return Err(ArenaError::NotInitialized);
        }
        Ok(Self { buf })
    }

    /// Releases the underlying buffer.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Returns the number of slots.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn capacity(&self) -> ArenaResult<u32> {
        Ok(self.header()?.capacity)
    }

    /// Returns allocation counters.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn info(&self) -> ArenaResult<TimedInfo> {
        let header = self.header()?;
        Ok(TimedInfo {
            allocated: header.allocated,
            available: header
                .capacity
                .saturating_sub(header.allocated)
                .saturating_sub(header.pending),
            pending: header.pending,
        })
    }

    /// Returns `true` if `slot` is held by a caller (not free, not pending).
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub fn is_allocated(&self, slot: SlotIndex) -> ArenaResult<bool> {
        if slot.get() >= self.header()?.capacity {
            return Ok(false);
        }
        Ok(self.cell(slot.get())? == TimedCell::InUse)
    }

    /// Returns the expiry of a pending slot, or `None` if it is not pending.
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub fn expiry_of(&self, slot: SlotIndex) -> ArenaResult<Option<Timestamp>> {
        if slot.get() >= self.header()?.capacity {
            return Ok(None);
        }
        match self.cell(slot.get())? {
            TimedCell::Pending { expiry, .. } => Ok(Some(expiry)),
            _ => Ok(None),
        }
    }

    fn header(&self) -> ArenaResult<TimedHeader> {
        layout::read(self.buf.as_ref(), 0)
    }

    fn cell(&self, index: u32) -> ArenaResult<TimedCell> {
        TimedCell::decode(layout::read(self.buf.as_ref(), cell_offset(index))?)
    }

    fn pending_cell(&self, index: u32) -> ArenaResult<(u32, Timestamp)> {
        match self.cell(index)? {
            TimedCell::Pending { next, expiry } => Ok((next, expiry)),
            _ => Err(ArenaError::corrupt("non-pending slot on the pending queue")),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TimedIndexAllocator<B> {
    /// Builds a timed allocator with `capacity` slots inside `buf`.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] for an invalid capacity
    /// - [`ArenaError::NotInitialized`] for an empty buffer
    /// - [`ArenaError::BufferTooSmall`] if `buf` is shorter than `size_for`
    pub fn init(mut buf: B, capacity: u32) -> ArenaResult<Self> {
        let required = TimedIndexAllocator::size_for(capacity)?;
        layout::check_buffer(buf.as_ref(), required)?;

        let bytes = buf.as_mut();
        bytes[..required as usize].fill(0);
        for index in 0..capacity {
            let next = if index + 1 < capacity { index + 1 } else { NONE };
            layout::write(bytes, cell_offset(index), &TimedCell::Free { next }.encode())?;
        }
        let header = TimedHeader {
            magic: magic::TIMED_ALLOCATOR,
            capacity,
            allocated: 0,
            free_head: 0,
            pending_head: NONE,
            pending_tail: NONE,
            pending: 0,
            _padding: 0,
        };
        layout::write(bytes, 0, &header)?;

        tracing::debug!(capacity, bytes = required, "timed index allocator initialized");
        Ok(Self { buf })
    }

    /// Hands out a free slot.
    ///
    /// If the free list is empty and slots are pending, the queue is swept at
    /// `now` first.
    ///
    /// # Errors
    ///
    /// [`ArenaError::OutOfCapacity`] if no slot is free after the sweep.
    pub fn alloc(&mut self, now: Timestamp) -> ArenaResult<SlotIndex> {
        let mut header = self.header()?;
        if header.free_head == NONE && header.pending_head != NONE {
            self.sweep(now)?;
            header = self.header()?;
        }
        if header.free_head == NONE {
            tracing::trace!(
                capacity = header.capacity,
                pending = header.pending,
                "timed allocator exhausted"
            );
            return Err(ArenaError::OutOfCapacity);
        }

        let index = header.free_head;
        if index >= header.capacity {
            return Err(ArenaError::corrupt("free list head out of range"));
        }
        let TimedCell::Free { next } = self.cell(index)? else {
            return Err(ArenaError::corrupt("allocated slot on the free list"));
        };
        self.set_cell(index, TimedCell::InUse)?;
        header.free_head = next;
        header.allocated += 1;
        self.set_header(&header)?;
        Ok(SlotIndex::new(index))
    }

    /// Frees `slot` immediately.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] unless `slot` is held by a caller.
    pub fn dealloc(&mut self, slot: SlotIndex) -> ArenaResult<()> {
        let mut header = self.header()?;
        self.check_in_use(&header, slot)?;
        self.push_free(&mut header, slot.get())?;
        header.allocated -= 1;
        self.set_header(&header)
    }

    /// Parks `slot` until `now + ttl`.
    ///
    /// The expiry saturates at [`Timestamp::MAX`] rather than wrapping, so an
    /// overflowing ttl never makes a slot reclaimable early.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] unless `slot` is held by a caller.
    pub fn dealloc_deferred(&mut self, slot: SlotIndex, ttl: Timestamp, now: Timestamp) -> ArenaResult<()> {
        let mut header = self.header()?;
        self.check_in_use(&header, slot)?;
        let index = slot.get();
        let expiry = now.saturating_add(ttl);

        if header.pending_tail == NONE {
            self.set_cell(index, TimedCell::Pending { next: NONE, expiry })?;
            header.pending_head = index;
            header.pending_tail = index;
        } else {
            let (_, tail_expiry) = self.pending_cell(header.pending_tail)?;
            if tail_expiry <= expiry {
                // Monotonic deadlines: O(1) append.
                self.set_pending_next(header.pending_tail, index)?;
                self.set_cell(index, TimedCell::Pending { next: NONE, expiry })?;
                header.pending_tail = index;
            } else {
                self.insert_pending_sorted(&mut header, index, expiry)?;
            }
        }

        header.allocated -= 1;
        header.pending += 1;
        self.set_header(&header)
    }

    /// Moves every pending slot whose expiry is `<= now` back to the free list.
    ///
    /// Slots are reclaimed oldest expiry first. Returns how many were reclaimed.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InternalInconsistency`] if the pending queue is damaged.
    pub fn sweep(&mut self, now: Timestamp) -> ArenaResult<u32> {
        let mut header = self.header()?;
        let mut reclaimed = 0;

        while header.pending_head != NONE {
            if reclaimed >= header.capacity {
                return Err(ArenaError::corrupt("pending queue is cyclic"));
            }
            let index = header.pending_head;
            let (next, expiry) = self.pending_cell(index)?;
            if !expiry.has_elapsed(now) {
                break;
            }
            header.pending_head = next;
            self.push_free(&mut header, index)?;
            header.pending = header
                .pending
                .checked_sub(1)
                .ok_or_else(|| ArenaError::corrupt("pending count underflow"))?;
            reclaimed += 1;
        }
        if header.pending_head == NONE {
            header.pending_tail = NONE;
        }

        self.set_header(&header)?;
        if reclaimed > 0 {
            tracing::trace!(reclaimed, now = %now, "pending slots reclaimed");
        }
        Ok(reclaimed)
    }

    /// Inserts after the last pending slot whose expiry is `<= expiry`.
    ///
    /// Only reached when `expiry` is earlier than the tail's, so the walk
    /// always stops before the end.
    fn insert_pending_sorted(&mut self, header: &mut TimedHeader, index: u32, expiry: Timestamp) -> ArenaResult<()> {
        let mut prev = NONE;
        let mut cur = header.pending_head;
        let mut steps = 0;
        while cur != NONE {
            let (next, cur_expiry) = self.pending_cell(cur)?;
            if cur_expiry > expiry {
                break;
            }
            steps += 1;
            if steps > header.capacity {
                return Err(ArenaError::corrupt("pending queue is cyclic"));
            }
            prev = cur;
            cur = next;
        }
        if cur == NONE {
            return Err(ArenaError::corrupt("pending queue tail is not the latest expiry"));
        }

        self.set_cell(index, TimedCell::Pending { next: cur, expiry })?;
        if prev == NONE {
            header.pending_head = index;
        } else {
            self.set_pending_next(prev, index)?;
        }
        Ok(())
    }

    fn check_in_use(&self, header: &TimedHeader, slot: SlotIndex) -> ArenaResult<()> {
        let index = slot.get();
        if index >= header.capacity || self.cell(index)? != TimedCell::InUse {
            return Err(ArenaError::InvalidHandle(index));
        }
        if header.allocated == 0 {
            return Err(ArenaError::corrupt("in-use slot with zero allocated count"));
        }
        Ok(())
    }

    fn push_free(&mut self, header: &mut TimedHeader, index: u32) -> ArenaResult<()> {
        self.set_cell(index, TimedCell::Free { next: header.free_head })?;
        header.free_head = index;
        Ok(())
    }

    fn set_pending_next(&mut self, index: u32, next: u32) -> ArenaResult<()> {
        let (_, expiry) = self.pending_cell(index)?;
        self.set_cell(index, TimedCell::Pending { next, expiry })
    }

    fn set_header(&mut self, header: &TimedHeader) -> ArenaResult<()> {
        layout::write(self.buf.as_mut(), 0, header)
    }

    fn set_cell(&mut self, index: u32, cell: TimedCell) -> ArenaResult<()> {
        layout::write(self.buf.as_mut(), cell_offset(index), &cell.encode())
    }
}

#[inline]
fn cell_offset(index: u32) -> usize {
    layout::slot_offset(HEADER_SIZE as usize, CELL_SIZE, index)
}
