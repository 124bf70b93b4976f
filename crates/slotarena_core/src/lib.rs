//! # SLOTARENA Core
//!
//! Collection structures that live entirely inside one caller-supplied buffer.
//!
//! ## Structures
//!
//! - [`IndexAllocator`] - free-index pool, O(1) alloc/free
//! - [`TimedIndexAllocator`] - index pool with deferred, time-ordered release
//! - [`MultiList`] - many positional lists over one shared item pool
//! - [`OrderedMultiList`] - many key-sorted lists over one shared item pool
//! - [`BalancedIndexTree`] - AVL tree over a fixed node arena
//!
//! ## Design Principles
//!
//! 1. **Caller-owned memory** - `size_for` says how many bytes, the caller
//!    allocates them, `init` builds the structure in place. Nothing grows.
//! 2. **Indices, not pointers** - every link is a `u32` slot number. Offsets
//!    are recomputed from the header on each call, so a buffer can be copied
//!    elsewhere and reopened with `attach`.
//! 3. **Any byte buffer** - `Vec<u8>`, `Box<[u8]>`, `&mut [u8]`; no alignment
//!    requirement.
//! 4. **Loud corruption** - a broken invariant surfaces as
//!    [`ArenaError::InternalInconsistency`] and is logged, never papered over.
//!
//! ## Thread Safety
//!
//! No structure locks. Wrap shared arenas in [`Serialized`].
//!
//! ## Example
//!
//! ```
//! use slotarena_core::{ArenaResult, IndexAllocator};
//!
//! fn demo() -> ArenaResult<()> {
//!     let size = IndexAllocator::size_for(4)?;
//!     let mut pool = IndexAllocator::init(vec![0u8; size as usize], 4)?;
//!
//!     let a = pool.alloc()?;
//!     let b = pool.alloc()?;
//!     assert_ne!(a, b);
//!
//!     // Relocate: the bytes are the whole state.
//!     let bytes = pool.into_inner();
//!     let mut pool = IndexAllocator::attach(bytes.into_boxed_slice())?;
//!     pool.dealloc(a)?;
//!     assert_eq!(pool.alloc()?, a);
//!     Ok(())
//! }
//! demo().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod allocator;
pub mod config;
pub mod error;
mod layout;
mod list_pool;
pub mod multi_list;
pub mod ordered_list;
pub mod sync;
pub mod time;
pub mod timed;
pub mod tree;

pub use allocator::{AllocatorInfo, IndexAllocator};
pub use config::{AllocatorConfig, ArenaConfig, ListPoolConfig, TreeConfig};
pub use error::{ArenaError, ArenaResult};
pub use layout::{ItemIndex, ListHandle, NodeIndex, SlotIndex, IN_USE, MAX_CAPACITY, NONE};
pub use list_pool::MultiListInfo;
pub use multi_list::{ListIter, MultiList, APPEND};
pub use ordered_list::{OrderedInsert, OrderedIter, OrderedMultiList, OrderedRemove};
pub use sync::Serialized;
pub use time::Timestamp;
pub use timed::{TimedIndexAllocator, TimedInfo};
pub use tree::{BalancedIndexTree, Predecessor, TreeIter};
