//! # Index Allocator
//!
//! Fixed-capacity pool of slot numbers with O(1) allocate and free.

use bytemuck::{Pod, Zeroable};

use crate::error::{ArenaError, ArenaResult};
use crate::layout::{self, magic, SlotIndex, IN_USE, NONE};

/// Arena header for an [`IndexAllocator`].
///
/// Size: 16 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct AllocatorHeader {
    magic: u32,
    capacity: u32,
    allocated: u32,
    free_head: u32,
}

const HEADER_SIZE: u32 = core::mem::size_of::<AllocatorHeader>() as u32;
const CELL_SIZE: u32 = 4;

/// State of one slot, decoded from its cell word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cell {
    /// On the free list; `next` is the following free slot or `NONE`.
    Free { next: u32 },
    /// Handed out.
    InUse,
}

impl Cell {
    #[inline]
    const fn decode(word: u32) -> Self {
        if word == IN_USE {
            Self::InUse
        } else {
            Self::Free { next: word }
        }
    }

    #[inline]
    const fn encode(self) -> u32 {
        match self {
            Self::Free { next } => next,
            Self::InUse => IN_USE,
        }
    }
}

/// Allocation counters of an allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorInfo {
    /// Slots currently handed out.
    pub allocated: u32,
    /// Slots still on the free list.
    pub available: u32,
}

/// A free-index pool built inside a caller-supplied buffer.
///
/// Slots are recycled LIFO: the most recently freed slot is the next one
/// handed out. Callers must only rely on every live index being unique and
/// in range.
///
/// # Thread Safety
///
/// This allocator is NOT thread-safe. Serialize access externally.
///
/// # Example
///
/// ```
/// use slotarena_core::IndexAllocator;
///
/// let size = IndexAllocator::size_for(4).unwrap();
/// let mut pool = IndexAllocator::init(vec![0u8; size as usize], 4).unwrap();
///
/// let slot = pool.alloc().unwrap();
/// pool.dealloc(slot).unwrap();
/// assert_eq!(pool.info().unwrap().available, 4);
/// ```
#[derive(Debug)]
pub struct IndexAllocator<B = Vec<u8>> {
    buf: B,
}

impl IndexAllocator {
    /// Returns the bytes needed for `capacity` slots.
    ///
    /// # Errors
    ///
    /// [`ArenaError::BadParameter`] if `capacity` is zero, collides with the
    /// sentinels, or the size overflows `u32`.
    pub fn size_for(capacity: u32) -> ArenaResult<u32> {
        layout::check_capacity(capacity, "allocator capacity must be in 1..=0xFFFFFFFD")?;
        layout::add(HEADER_SIZE, layout::mul(capacity, CELL_SIZE)?)
    }
}

impl<B: AsRef<[u8]>> IndexAllocator<B> {
    /// Opens an allocator previously built with [`IndexAllocator::init`].
    ///
    /// The buffer may have been copied or moved since; nothing inside it
    /// depends on its address.
    ///
    /// # Errors
    ///
    /// [`ArenaError::NotInitialized`] if the buffer does not hold an allocator.
    pub fn attach(buf: B) -> ArenaResult<Self> {
        let bytes = buf.as_ref();
        if bytes.len() < HEADER_SIZE as usize {
            return Err(ArenaError::NotInitialized);
        }
        let header: AllocatorHeader = layout::read(bytes, 0)?;
        if header.magic != magic::INDEX_ALLOCATOR {
            return Err(ArenaError::NotInitialized);
        }
        let required = IndexAllocator::size_for(header.capacity).map_err(|_| ArenaError::NotInitialized)?;
        if bytes.len() < required as usize || header.allocated > header.capacity {
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

    /// Returns `(allocated, available)` counters.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn info(&self) -> ArenaResult<AllocatorInfo> {
        let header = self.header()?;
        Ok(AllocatorInfo {
            allocated: header.allocated,
            available: header.capacity.saturating_sub(header.allocated),
        })
    }

    /// Returns `true` if `slot` is currently handed out.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn is_allocated(&self, slot: SlotIndex) -> ArenaResult<bool> {
        let header = self.header()?;
        if slot.get() >= header.capacity {
            return Ok(false);
        }
        Ok(self.cell(slot.get())? == Cell::InUse)
    }

    #[inline]
    fn header(&self) -> ArenaResult<AllocatorHeader> {
        layout::read(self.buf.as_ref(), 0)
    }

    #[inline]
    fn cell(&self, index: u32) -> ArenaResult<Cell> {
        let word: u32 = layout::read(self.buf.as_ref(), cell_offset(index))?;
        Ok(Cell::decode(word))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexAllocator<B> {
    /// Builds an allocator with `capacity` slots inside `buf`.
    ///
    /// All slots start free, threaded in ascending order.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] for an invalid capacity
    /// - [`ArenaError::NotInitialized`] for an empty buffer
    /// - [`ArenaError::BufferTooSmall`] if `buf` is shorter than `size_for`
    pub fn init(mut buf: B, capacity: u32) -> ArenaResult<Self> {
        let required = IndexAllocator::size_for(capacity)?;
        layout::check_buffer(buf.as_ref(), required)?;

        let bytes = buf.as_mut();
        bytes[..required as usize].fill(0);
        let header = AllocatorHeader {
            magic: magic::INDEX_ALLOCATOR,
            capacity,
            allocated: 0,
            free_head: NONE,
        };
        layout::write(bytes, 0, &header)?;

        let mut pool = Self { buf };
        pool.rethread(capacity)?;
        tracing::debug!(capacity, bytes = required, "index allocator initialized");
        Ok(pool)
    }

    /// Hands out a free slot.
    ///
    /// This is a **O(1)** operation.
    ///
    /// # Errors
    ///
    /// [`ArenaError::OutOfCapacity`] if every slot is in use.
    pub fn alloc(&mut self) -> ArenaResult<SlotIndex> {
        let mut header = self.header()?;
        if header.free_head == NONE {
            tracing::trace!(capacity = header.capacity, "index allocator exhausted");
            return Err(ArenaError::OutOfCapacity);
        }
        if header.free_head >= header.capacity {
            return Err(ArenaError::corrupt("free list head out of range"));
        }

        let index = header.free_head;
        let Cell::Free { next } = self.cell(index)? else {
            return Err(ArenaError::corrupt("in-use slot on the free list"));
        };

        self.set_cell(index, Cell::InUse)?;
        header.free_head = next;
        header.allocated += 1;
        self.set_header(&header)?;
        Ok(SlotIndex::new(index))
    }

    /// Returns `slot` to the pool.
    ///
    /// This is a **O(1)** operation.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `slot` is out of range or already free.
    pub fn dealloc(&mut self, slot: SlotIndex) -> ArenaResult<()> {
        let mut header = self.header()?;
        let index = slot.get();
        if index >= header.capacity || self.cell(index)? != Cell::InUse {
            return Err(ArenaError::InvalidHandle(index));
        }
        if header.allocated == 0 {
            return Err(ArenaError::corrupt("in-use slot with zero allocated count"));
        }

        self.set_cell(index, Cell::Free { next: header.free_head })?;
        header.free_head = index;
        header.allocated -= 1;
        self.set_header(&header)
    }

    /// Frees every slot at once, restoring the state right after `init`.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn reset(&mut self) -> ArenaResult<()> {
        let capacity = self.header()?.capacity;
        self.rethread(capacity)
    }

    fn rethread(&mut self, capacity: u32) -> ArenaResult<()> {
        for index in 0..capacity {
            let next = if index + 1 < capacity { index + 1 } else { NONE };
            self.set_cell(index, Cell::Free { next })?;
        }
        let mut header = self.header()?;
        header.free_head = 0;
        header.allocated = 0;
        self.set_header(&header)
    }

    #[inline]
    fn set_header(&mut self, header: &AllocatorHeader) -> ArenaResult<()> {
        layout::write(self.buf.as_mut(), 0, header)
    }

    #[inline]
    fn set_cell(&mut self, index: u32, cell: Cell) -> ArenaResult<()> {
        layout::write(self.buf.as_mut(), cell_offset(index), &cell.encode())
    }
}

#[inline]
fn cell_offset(index: u32) -> usize {
    layout::slot_offset(HEADER_SIZE as usize, CELL_SIZE, index)
}
