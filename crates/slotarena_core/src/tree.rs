//! # Balanced Index Tree
//!
//! AVL tree over a fixed arena of nodes. Every node carries a fixed-size key
//! and a fixed-size data block; rebalancing only rewrites child links, so a
//! node keeps its [`NodeIndex`] (and its key and data bytes) for as long as
//! it stays in the tree.
//!
//! ## Arena Layout
//!
//! ```text
//! [TreeHeader: 32 bytes]
//! [Node x capacity: 16-byte links + key rounded up to 4 + data rounded up to 4]
//! ```
//!
//! ## Key Order
//!
//! Keys compare as raw byte strings (lexicographic, like `memcmp`). Encode
//! integers big-endian to get numeric order.
//!
//! ## Determinism
//!
//! No hashing, no randomness: a given sequence of operations on a given
//! capacity always produces the same shape.

use std::cmp::Ordering;

use bytemuck::{Pod, Zeroable};

use crate::error::{ArenaError, ArenaResult};
use crate::layout::{self, magic, NodeIndex, NONE};

/// Arena header for a [`BalancedIndexTree`].
///
/// Size: 32 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct TreeHeader {
    magic: u32,
    capacity: u32,
    key_size: u32,
    data_size: u32,
    stride: u32,
    root: u32,
    free_head: u32,
    count: u32,
}

const HEADER_SIZE: u32 = core::mem::size_of::<TreeHeader>() as u32;

/// Link words at the start of every node.
///
/// Size: 16 bytes
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawNode {
    state: u32,
    left: u32,
    right: u32,
    depth: u32,
}

const NODE_FIELDS: u32 = core::mem::size_of::<RawNode>() as u32;

const STATE_FREE: u32 = 0;
const STATE_LIVE: u32 = 1;

/// Child links and subtree depth of a live node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Links {
    left: u32,
    right: u32,
    depth: u32,
}

/// State of one node slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    /// On the free list; `next` is the following free node or `NONE`.
    Free { next: u32 },
    /// Linked into the tree.
    Live(Links),
}

impl Node {
    fn decode(raw: RawNode) -> ArenaResult<Self> {
        match raw.state {
            STATE_FREE => Ok(Self::Free { next: raw.left }),
            STATE_LIVE => Ok(Self::Live(Links { left: raw.left, right: raw.right, depth: raw.depth })),
            _ => Err(ArenaError::corrupt("unknown tree node state")),
        }
    }

    fn encode(self) -> RawNode {
        match self {
            Self::Free { next } => RawNode { state: STATE_FREE, left: next, right: NONE, depth: 0 },
            Self::Live(l) => RawNode { state: STATE_LIVE, left: l.left, right: l.right, depth: l.depth },
        }
    }
}

/// What lies below a key that [`BalancedIndexTree::find_or_add_with_prev`]
/// looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predecessor {
    /// The tree held no nodes at all before the call.
    EmptyTree,
    /// The tree had nodes, but none with a smaller key.
    NoSmallerKey,
    /// Node holding the largest key strictly below the looked-up key.
    Node(NodeIndex),
}

/// Record geometry derived from the header.
#[derive(Clone, Copy, Debug)]
struct Shape {
    capacity: u32,
    key_size: u32,
    data_size: u32,
    stride: u32,
}

impl Shape {
    fn compute(capacity: u32, key_size: u32, data_size: u32) -> ArenaResult<(Self, u32)> {
        layout::check_capacity(capacity, "tree capacity must be in 1..=0xFFFFFFFD")?;
        if key_size == 0 {
            return Err(ArenaError::BadParameter("key size must be non-zero"));
        }
        let stride = layout::add(
            NODE_FIELDS,
            layout::add(layout::round_up4(key_size)?, layout::round_up4(data_size)?)?,
        )?;
        let total = layout::add(HEADER_SIZE, layout::mul(capacity, stride)?)?;
        Ok((Self { capacity, key_size, data_size, stride }, total))
    }

    #[inline]
    fn node(&self, index: u32) -> usize {
        layout::slot_offset(HEADER_SIZE as usize, self.stride, index)
    }

    #[inline]
    fn key(&self, index: u32) -> usize {
        self.node(index) + NODE_FIELDS as usize
    }

    #[inline]
    fn data(&self, index: u32) -> usize {
        // round_up4 already succeeded in `compute`.
        self.key(index) + ((self.key_size as usize + 3) & !3)
    }
}

/// AVL tree with fixed-size keys and data inside a caller-supplied buffer.
///
/// # Performance
///
/// - add, remove, query: **O(log n)**
/// - first: **O(log n)**
/// - iteration: **O(log n)** per step, no allocation
///
/// # Thread Safety
///
/// NOT thread-safe. Serialize access externally.
///
/// # Example
///
/// ```
/// use slotarena_core::BalancedIndexTree;
///
/// let size = BalancedIndexTree::size_for(8, 4, 4).unwrap();
/// let mut tree = BalancedIndexTree::init(vec![0u8; size as usize], 8, 4, 4).unwrap();
///
/// for key in [5u32, 3, 8, 1, 4] {
///     let node = tree.add(&key.to_be_bytes()).unwrap();
///     tree.data_mut(node).unwrap().copy_from_slice(&(key * 10).to_le_bytes());
/// }
/// let (key, node) = tree.first().unwrap();
/// assert_eq!(key, 1u32.to_be_bytes());
/// assert_eq!(tree.data(node).unwrap(), 10u32.to_le_bytes());
/// assert_eq!(tree.depth().unwrap(), 3);
/// ```
#[derive(Debug)]
pub struct BalancedIndexTree<B = Vec<u8>> {
    buf: B,
}

impl BalancedIndexTree {
    /// Returns the bytes needed for `capacity` nodes.
    ///
    /// `data_size` may be zero for a key-only set.
    ///
    /// # Errors
    ///
    /// [`ArenaError::BadParameter`] if `capacity` or `key_size` is zero,
    /// `capacity` collides with the sentinels, or the size overflows `u32`.
    pub fn size_for(capacity: u32, key_size: u32, data_size: u32) -> ArenaResult<u32> {
        Shape::compute(capacity, key_size, data_size).map(|(_, total)| total)
    }
}

impl<B: AsRef<[u8]>> BalancedIndexTree<B> {
    /// Opens a tree previously built with [`BalancedIndexTree::init`].
    ///
    /// # Errors
    ///
    /// [`ArenaError::NotInitialized`] if the buffer does not hold a tree.
    pub fn attach(buf: B) -> ArenaResult<Self> {
        let bytes = buf.as_ref();
        if bytes.len() < HEADER_SIZE as usize {
            return Err(ArenaError::NotInitialized);
        }
        let header: TreeHeader = layout::read(bytes, 0)?;
        if header.magic != magic::TREE {
            return Err(ArenaError::NotInitialized);
        }
        let (shape, total) = Shape::compute(header.capacity, header.key_size, header.data_size)
            .map_err(|_| ArenaError::NotInitialized)?;
        if bytes.len() < total as usize
            || shape.stride != header.stride
            || header.count > header.capacity
            || (header.root != NONE && header.root >= header.capacity)
        {
            return Err(ArenaError::NotInitialized);
        }
        Ok(Self { buf })
    }

    /// Releases the underlying buffer.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Returns the number of nodes in the tree.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn len(&self) -> ArenaResult<u32> {
        Ok(self.header()?.count)
    }

    /// Returns `true` if the tree holds no nodes.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn is_empty(&self) -> ArenaResult<bool> {
        Ok(self.header()?.root == NONE)
    }

    /// Returns the node capacity.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn capacity(&self) -> ArenaResult<u32> {
        Ok(self.header()?.capacity)
    }

    /// Returns the root node, if any.
    ///
    /// # Errors
    ///
    /// Propagates header read failures.
    pub fn root(&self) -> ArenaResult<Option<NodeIndex>> {
        Ok(NodeIndex::new(self.header()?.root).to_option())
    }

    /// Returns the height of the tree; 0 when empty.
    ///
    /// # Errors
    ///
    /// Propagates read failures.
    pub fn depth(&self) -> ArenaResult<u32> {
        let (header, shape) = self.load()?;
        self.depth_of(&shape, header.root)
    }

    /// Finds the node holding `key`.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] if `key` is not exactly the key size
    /// - [`ArenaError::KeyNotFound`] if no node holds it
    pub fn query(&self, key: &[u8]) -> ArenaResult<NodeIndex> {
        let (header, shape) = self.load()?;
        check_key(&shape, key)?;
        let mut cur = header.root;
        while cur != NONE {
            let links = self.links(&shape, cur)?;
            cur = match key.cmp(self.key_bytes(&shape, cur)?) {
                Ordering::Less => links.left,
                Ordering::Greater => links.right,
                Ordering::Equal => return Ok(NodeIndex::new(cur)),
            };
        }
        Err(ArenaError::KeyNotFound)
    }

    /// Returns the smallest key and its node.
    ///
    /// # Errors
    ///
    /// [`ArenaError::OutOfCapacity`] if the tree has no nodes, the same kind
    /// [`BalancedIndexTree::add`] reports when no node is free.
    pub fn first(&self) -> ArenaResult<(&[u8], NodeIndex)> {
        let (header, shape) = self.load()?;
        if header.root == NONE {
            return Err(ArenaError::OutOfCapacity);
        }
        let node = self.leftmost(&shape, header.root)?;
        Ok((self.key_bytes(&shape, node)?, NodeIndex::new(node)))
    }

    /// Borrows the key of a live node.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `node` is not in the tree.
    pub fn key(&self, node: NodeIndex) -> ArenaResult<&[u8]> {
        let (_, shape) = self.load()?;
        self.check_live(&shape, node)?;
        self.key_bytes(&shape, node.get())
    }

    /// Borrows the data block of a live node.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `node` is not in the tree.
    pub fn data(&self, node: NodeIndex) -> ArenaResult<&[u8]> {
        let (_, shape) = self.load()?;
        self.check_live(&shape, node)?;
        layout::record(self.buf.as_ref(), shape.data(node.get()), shape.data_size as usize)
    }

    /// Returns the `(left, right)` children of a live node.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `node` is not in the tree.
    pub fn children(&self, node: NodeIndex) -> ArenaResult<(Option<NodeIndex>, Option<NodeIndex>)> {
        let (_, shape) = self.load()?;
        let links = self.check_live(&shape, node)?;
        Ok((NodeIndex::new(links.left).to_option(), NodeIndex::new(links.right).to_option()))
    }

    /// Returns the height of the subtree rooted at `node` (a leaf is 1).
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `node` is not in the tree.
    pub fn node_depth(&self, node: NodeIndex) -> ArenaResult<u32> {
        let (_, shape) = self.load()?;
        Ok(self.check_live(&shape, node)?.depth)
    }

    /// Iterates nodes in ascending key order.
    ///
    /// # Errors
    ///
    /// Propagates header read failures. Corruption found mid-walk is yielded
    /// as an item error.
    pub fn iter(&self) -> ArenaResult<TreeIter<'_, B>> {
        let (header, shape) = self.load()?;
        let next = if header.root == NONE { NONE } else { self.leftmost(&shape, header.root)? };
        Ok(TreeIter {
            tree: self,
            shape,
            root: header.root,
            next,
            remaining: header.count,
        })
    }

    /// Checks every structural invariant: strict key order, AVL balance,
    /// stored depths, live states, and the node count.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InternalInconsistency`] on the first violation found.
    pub fn validate(&self) -> ArenaResult<()> {
        let (header, shape) = self.load()?;
        let mut visited = 0u32;
        self.validate_subtree(&shape, header.root, None, None, &mut visited)?;
        if visited != header.count {
            return Err(ArenaError::corrupt("tree node count disagrees with header"));
        }
        Ok(())
    }

    fn header(&self) -> ArenaResult<TreeHeader> {
        layout::read(self.buf.as_ref(), 0)
    }

    fn load(&self) -> ArenaResult<(TreeHeader, Shape)> {
        let header = self.header()?;
        let (shape, _) = Shape::compute(header.capacity, header.key_size, header.data_size)
            .map_err(|_| ArenaError::corrupt("tree header capacities damaged"))?;
        Ok((header, shape))
    }

    fn node(&self, shape: &Shape, index: u32) -> ArenaResult<Node> {
        if index >= shape.capacity {
            return Err(ArenaError::corrupt("tree link outside the node arena"));
        }
        Node::decode(layout::read(self.buf.as_ref(), shape.node(index))?)
    }

    /// Links of a node the tree structure says is live.
    fn links(&self, shape: &Shape, index: u32) -> ArenaResult<Links> {
        match self.node(shape, index)? {
            Node::Live(links) => Ok(links),
            Node::Free { .. } => Err(ArenaError::corrupt("tree links to a free node")),
        }
    }

    /// Links of a caller-supplied node, which may be stale.
    fn check_live(&self, shape: &Shape, node: NodeIndex) -> ArenaResult<Links> {
        if node.get() >= shape.capacity {
            return Err(ArenaError::InvalidHandle(node.get()));
        }
        match self.node(shape, node.get())? {
            Node::Live(links) => Ok(links),
            Node::Free { .. } => Err(ArenaError::InvalidHandle(node.get())),
        }
    }

    fn depth_of(&self, shape: &Shape, index: u32) -> ArenaResult<u32> {
        if index == NONE {
            return Ok(0);
        }
        Ok(self.links(shape, index)?.depth)
    }

    fn key_bytes(&self, shape: &Shape, index: u32) -> ArenaResult<&[u8]> {
        layout::record(self.buf.as_ref(), shape.key(index), shape.key_size as usize)
    }

    fn leftmost(&self, shape: &Shape, mut index: u32) -> ArenaResult<u32> {
        let mut steps = 0;
        loop {
            let left = self.links(shape, index)?.left;
            if left == NONE {
                return Ok(index);
            }
            steps += 1;
            if steps > shape.capacity {
                return Err(ArenaError::corrupt("cycle in tree links"));
            }
            index = left;
        }
    }

    fn rightmost(&self, shape: &Shape, mut index: u32) -> ArenaResult<u32> {
        let mut steps = 0;
        loop {
            let right = self.links(shape, index)?.right;
            if right == NONE {
                return Ok(index);
            }
            steps += 1;
            if steps > shape.capacity {
                return Err(ArenaError::corrupt("cycle in tree links"));
            }
            index = right;
        }
    }

    /// In-order successor of `index`, found by descending from the root.
    fn successor(&self, shape: &Shape, root: u32, index: u32) -> ArenaResult<u32> {
        let right = self.links(shape, index)?.right;
        if right != NONE {
            return self.leftmost(shape, right);
        }
        let key = self.key_bytes(shape, index)?;
        let mut best = NONE;
        let mut cur = root;
        while cur != NONE {
            let links = self.links(shape, cur)?;
            if key < self.key_bytes(shape, cur)? {
                best = cur;
                cur = links.left;
            } else {
                cur = links.right;
            }
        }
        Ok(best)
    }

    /// Finds `key`, and the node with the largest key strictly below it.
    fn search_with_prev(&self, shape: &Shape, root: u32, key: &[u8]) -> ArenaResult<(Option<u32>, Predecessor)> {
        if root == NONE {
            return Ok((None, Predecessor::EmptyTree));
        }
        let mut prev = NONE;
        let mut cur = root;
        while cur != NONE {
            let links = self.links(shape, cur)?;
            match key.cmp(self.key_bytes(shape, cur)?) {
                Ordering::Less => cur = links.left,
                Ordering::Greater => {
                    prev = cur;
                    cur = links.right;
                }
                Ordering::Equal => {
                    if links.left != NONE {
                        prev = self.rightmost(shape, links.left)?;
                    }
                    return Ok((Some(cur), predecessor(prev)));
                }
            }
        }
        Ok((None, predecessor(prev)))
    }

    /// Returns the subtree's depth after checking it against the stored one.
    fn validate_subtree(
        &self,
        shape: &Shape,
        index: u32,
        low: Option<u32>,
        high: Option<u32>,
        visited: &mut u32,
    ) -> ArenaResult<u32> {
        if index == NONE {
            return Ok(0);
        }
        *visited += 1;
        if *visited > shape.capacity {
            return Err(ArenaError::corrupt("cycle in tree links"));
        }
        let links = self.links(shape, index)?;
        let key = self.key_bytes(shape, index)?;
        if let Some(low) = low {
            if self.key_bytes(shape, low)? >= key {
                return Err(ArenaError::corrupt("tree keys out of order"));
            }
        }
        if let Some(high) = high {
            if self.key_bytes(shape, high)? <= key {
                return Err(ArenaError::corrupt("tree keys out of order"));
            }
        }
        let left = self.validate_subtree(shape, links.left, low, Some(index), visited)?;
        let right = self.validate_subtree(shape, links.right, Some(index), high, visited)?;
        if left.abs_diff(right) > 1 {
            return Err(ArenaError::corrupt("tree node out of balance"));
        }
        let depth = 1 + left.max(right);
        if depth != links.depth {
            return Err(ArenaError::corrupt("stored tree depth is stale"));
        }
        Ok(depth)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BalancedIndexTree<B> {
    /// Builds an empty tree inside `buf`.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] for zero or oversized parameters
    /// - [`ArenaError::NotInitialized`] for an empty buffer
    /// - [`ArenaError::BufferTooSmall`] if `buf` is shorter than `size_for`
    pub fn init(mut buf: B, capacity: u32, key_size: u32, data_size: u32) -> ArenaResult<Self> {
        let (shape, total) = Shape::compute(capacity, key_size, data_size)?;
        let bytes = buf.as_mut();
        layout::check_buffer(bytes, total)?;

        bytes[..total as usize].fill(0);
        for index in 0..capacity {
            let next = if index + 1 < capacity { index + 1 } else { NONE };
            layout::write(bytes, shape.node(index), &Node::Free { next }.encode())?;
        }
        let header = TreeHeader {
            magic: magic::TREE,
            capacity,
            key_size,
            data_size,
            stride: shape.stride,
            root: NONE,
            free_head: 0,
            count: 0,
        };
        layout::write(bytes, 0, &header)?;

        tracing::debug!(capacity, key_size, data_size, bytes = total, "balanced index tree initialized");
        Ok(Self { buf })
    }

    /// Inserts `key` with a zeroed data block and returns its node.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] if `key` is not exactly the key size
    /// - [`ArenaError::DuplicateKey`] if `key` is already present
    /// - [`ArenaError::OutOfCapacity`] if every node is in use
    pub fn add(&mut self, key: &[u8]) -> ArenaResult<NodeIndex> {
        let (mut header, shape) = self.load()?;
        check_key(&shape, key)?;
        let start = header.root;
        let (root, added) = self.insert_at(&shape, &mut header, start, key)?;
        header.root = root;
        header.count += 1;
        self.set_header(&header)?;
        Ok(NodeIndex::new(added))
    }

    /// Removes the node holding `key`.
    ///
    /// A node with two children is replaced by its in-order predecessor,
    /// which is relinked in place; no key or data bytes move.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::BadParameter`] if `key` is not exactly the key size
    /// - [`ArenaError::KeyNotFound`] if no node holds it
    pub fn remove(&mut self, key: &[u8]) -> ArenaResult<()> {
        let (mut header, shape) = self.load()?;
        check_key(&shape, key)?;
        let (root, removed) = self.remove_at(&shape, header.root, key)?;
        header.root = root;
        self.set_node(&shape, removed, Node::Free { next: header.free_head })?;
        header.free_head = removed;
        header.count = header
            .count
            .checked_sub(1)
            .ok_or_else(|| ArenaError::corrupt("tree node count underflow"))?;
        self.set_header(&header)
    }

    /// Returns the node for `key`, inserting it if absent.
    ///
    /// The flag is `true` when a node was created.
    ///
    /// # Errors
    ///
    /// As [`BalancedIndexTree::add`], except that an existing key is not an
    /// error.
    pub fn find_or_add(&mut self, key: &[u8]) -> ArenaResult<(NodeIndex, bool)> {
        match self.query(key) {
            Ok(node) => Ok((node, false)),
            Err(ArenaError::KeyNotFound) => Ok((self.add(key)?, true)),
            Err(e) => Err(e),
        }
    }

    /// [`BalancedIndexTree::find_or_add`] that also reports the node with the
    /// largest key strictly below `key`.
    ///
    /// # Errors
    ///
    /// As [`BalancedIndexTree::find_or_add`].
    pub fn find_or_add_with_prev(&mut self, key: &[u8]) -> ArenaResult<(NodeIndex, bool, Predecessor)> {
        let (header, shape) = self.load()?;
        check_key(&shape, key)?;
        let (found, prev) = self.search_with_prev(&shape, header.root, key)?;
        match found {
            Some(node) => Ok((NodeIndex::new(node), false, prev)),
            None => Ok((self.add(key)?, true, prev)),
        }
    }

    /// Mutably borrows the data block of a live node.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidHandle`] if `node` is not in the tree.
    pub fn data_mut(&mut self, node: NodeIndex) -> ArenaResult<&mut [u8]> {
        let (_, shape) = self.load()?;
        self.check_live(&shape, node)?;
        layout::record_mut(self.buf.as_mut(), shape.data(node.get()), shape.data_size as usize)
    }

    /// Inserts below `index`; returns the new subtree root and the new node.
    fn insert_at(&mut self, shape: &Shape, header: &mut TreeHeader, index: u32, key: &[u8]) -> ArenaResult<(u32, u32)> {
        if index == NONE {
            let node = self.take_node(shape, header, key)?;
            return Ok((node, node));
        }
        let mut links = self.links(shape, index)?;
        let order = key.cmp(self.key_bytes(shape, index)?);
        let added = match order {
            Ordering::Less => {
                let (child, added) = self.insert_at(shape, header, links.left, key)?;
                links.left = child;
                added
            }
            Ordering::Greater => {
                let (child, added) = self.insert_at(shape, header, links.right, key)?;
                links.right = child;
                added
            }
            Ordering::Equal => return Err(ArenaError::DuplicateKey),
        };
        self.set_links(shape, index, links)?;
        Ok((self.rebalance(shape, index)?, added))
    }

    /// Unlinks `key` below `index`; returns the new subtree root and the
    /// unlinked node.
    fn remove_at(&mut self, shape: &Shape, index: u32, key: &[u8]) -> ArenaResult<(u32, u32)> {
        if index == NONE {
            return Err(ArenaError::KeyNotFound);
        }
        let mut links = self.links(shape, index)?;
        let order = key.cmp(self.key_bytes(shape, index)?);
        let removed = match order {
            Ordering::Less => {
                let (child, removed) = self.remove_at(shape, links.left, key)?;
                links.left = child;
                removed
            }
            Ordering::Greater => {
                let (child, removed) = self.remove_at(shape, links.right, key)?;
                links.right = child;
                removed
            }
            Ordering::Equal => {
                if links.left == NONE {
                    return Ok((links.right, index));
                }
                if links.right == NONE {
                    return Ok((links.left, index));
                }
                let (left, pred) = self.detach_max(shape, links.left)?;
                self.set_links(shape, pred, Links { left, right: links.right, depth: 0 })?;
                return Ok((self.rebalance(shape, pred)?, index));
            }
        };
        self.set_links(shape, index, links)?;
        Ok((self.rebalance(shape, index)?, removed))
    }

    /// Unlinks the rightmost node below `index`; returns the new subtree root
    /// and the unlinked node.
    fn detach_max(&mut self, shape: &Shape, index: u32) -> ArenaResult<(u32, u32)> {
        let mut links = self.links(shape, index)?;
        if links.right == NONE {
            return Ok((links.left, index));
        }
        let (right, max) = self.detach_max(shape, links.right)?;
        links.right = right;
        self.set_links(shape, index, links)?;
        Ok((self.rebalance(shape, index)?, max))
    }

    /// Refreshes the depth of `index` and rotates if its children differ by
    /// more than one. Returns the subtree's new root.
    fn rebalance(&mut self, shape: &Shape, index: u32) -> ArenaResult<u32> {
        let links = self.update_depth(shape, index)?;
        let left = self.depth_of(shape, links.left)?;
        let right = self.depth_of(shape, links.right)?;

        if left > right + 1 {
            let child = self.links(shape, links.left)?;
            // Inside-heavy: turn it into outside-heavy first.
            if self.depth_of(shape, child.left)? < self.depth_of(shape, child.right)? {
                let pivot = self.rotate_left(shape, links.left)?;
                self.set_links(shape, index, Links { left: pivot, ..links })?;
            }
            return self.rotate_right(shape, index);
        }
        if right > left + 1 {
            let child = self.links(shape, links.right)?;
            if self.depth_of(shape, child.right)? < self.depth_of(shape, child.left)? {
                let pivot = self.rotate_right(shape, links.right)?;
                self.set_links(shape, index, Links { right: pivot, ..links })?;
            }
            return self.rotate_left(shape, index);
        }
        Ok(index)
    }

    fn rotate_left(&mut self, shape: &Shape, index: u32) -> ArenaResult<u32> {
        let mut top = self.links(shape, index)?;
        let pivot = top.right;
        let mut raised = self.links(shape, pivot)?;
        top.right = raised.left;
        raised.left = index;
        self.set_links(shape, index, top)?;
        self.update_depth(shape, index)?;
        self.set_links(shape, pivot, raised)?;
        self.update_depth(shape, pivot)?;
        Ok(pivot)
    }

    fn rotate_right(&mut self, shape: &Shape, index: u32) -> ArenaResult<u32> {
        let mut top = self.links(shape, index)?;
        let pivot = top.left;
        let mut raised = self.links(shape, pivot)?;
        top.left = raised.right;
        raised.right = index;
        self.set_links(shape, index, top)?;
        self.update_depth(shape, index)?;
        self.set_links(shape, pivot, raised)?;
        self.update_depth(shape, pivot)?;
        Ok(pivot)
    }

    fn update_depth(&mut self, shape: &Shape, index: u32) -> ArenaResult<Links> {
        let mut links = self.links(shape, index)?;
        links.depth = 1 + self.depth_of(shape, links.left)?.max(self.depth_of(shape, links.right)?);
        self.set_links(shape, index, links)?;
        Ok(links)
    }

    fn take_node(&mut self, shape: &Shape, header: &mut TreeHeader, key: &[u8]) -> ArenaResult<u32> {
        let index = header.free_head;
        if index == NONE {
            tracing::trace!(capacity = shape.capacity, "tree node arena exhausted");
            return Err(ArenaError::OutOfCapacity);
        }
        header.free_head = match self.node(shape, index)? {
            Node::Free { next } => next,
            Node::Live(_) => return Err(ArenaError::corrupt("tree free list reaches a live node")),
        };
        self.set_links(shape, index, Links { left: NONE, right: NONE, depth: 1 })?;
        layout::record_mut(self.buf.as_mut(), shape.key(index), shape.key_size as usize)?.copy_from_slice(key);
        layout::record_mut(self.buf.as_mut(), shape.data(index), shape.data_size as usize)?.fill(0);
        Ok(index)
    }

    fn set_links(&mut self, shape: &Shape, index: u32, links: Links) -> ArenaResult<()> {
        self.set_node(shape, index, Node::Live(links))
    }

    fn set_node(&mut self, shape: &Shape, index: u32, node: Node) -> ArenaResult<()> {
        if index >= shape.capacity {
            return Err(ArenaError::corrupt("tree link outside the node arena"));
        }
        layout::write(self.buf.as_mut(), shape.node(index), &node.encode())
    }

    fn set_header(&mut self, header: &TreeHeader) -> ArenaResult<()> {
        layout::write(self.buf.as_mut(), 0, header)
    }
}

fn check_key(shape: &Shape, key: &[u8]) -> ArenaResult<()> {
    if key.len() != shape.key_size as usize {
        return Err(ArenaError::BadParameter("key length must equal the configured key size"));
    }
    Ok(())
}

fn predecessor(index: u32) -> Predecessor {
    if index == NONE {
        Predecessor::NoSmallerKey
    } else {
        Predecessor::Node(NodeIndex::new(index))
    }
}

/// In-order iterator over a [`BalancedIndexTree`].
///
/// Yields `(node, key, data)` triples.
#[derive(Debug)]
pub struct TreeIter<'a, B> {
    tree: &'a BalancedIndexTree<B>,
    shape: Shape,
    root: u32,
    next: u32,
    remaining: u32,
}

impl<'a, B: AsRef<[u8]>> Iterator for TreeIter<'a, B> {
    type Item = ArenaResult<(NodeIndex, &'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NONE {
            return None;
        }
        let index = self.next;
        let step = self.remaining.checked_sub(1).map_or_else(
            || Err(ArenaError::corrupt("tree holds more nodes than its count")),
            |remaining| {
                let tree = self.tree;
                let key = tree.key_bytes(&self.shape, index)?;
                let data = layout::record(tree.buf.as_ref(), self.shape.data(index), self.shape.data_size as usize)?;
                let next = tree.successor(&self.shape, self.root, index)?;
                Ok((remaining, next, key, data))
            },
        );
        match step {
            Ok((remaining, next, key, data)) => {
                self.remaining = remaining;
                self.next = next;
                Some(Ok((NodeIndex::new(index), key, data)))
            }
            Err(e) => {
                self.next = NONE;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(capacity: u32) -> BalancedIndexTree {
        let size = BalancedIndexTree::size_for(capacity, 4, 4).unwrap();
        BalancedIndexTree::init(vec![0u8; size as usize], capacity, 4, 4).unwrap()
    }

    fn k(v: u32) -> [u8; 4] {
        v.to_be_bytes()
    }

    fn key_of(t: &BalancedIndexTree, node: Option<NodeIndex>) -> Option<u32> {
        node.map(|n| {
            let bytes = t.key(n).unwrap();
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        })
    }

    fn keys(t: &BalancedIndexTree) -> Vec<u32> {
        t.iter()
            .unwrap()
            .map(|item| item.map(|(_, key, _)| u32::from_be_bytes([key[0], key[1], key[2], key[3]])))
            .collect::<ArenaResult<_>>()
            .unwrap()
    }

    /// `(key, left key, right key)` for the root and its children.
    fn top(t: &BalancedIndexTree) -> (Option<u32>, Option<u32>, Option<u32>) {
        let root = t.root().unwrap();
        let (left, right) = root.map(|r| t.children(r).unwrap()).unwrap_or((None, None));
        (key_of(t, root), key_of(t, left), key_of(t, right))
    }

    #[test]
    fn test_size_for() {
        assert_eq!(BalancedIndexTree::size_for(2, 4, 3).unwrap(), 32 + 2 * (16 + 4 + 4));
        assert_eq!(BalancedIndexTree::size_for(1, 1, 0).unwrap(), 32 + 16 + 4);
        assert!(BalancedIndexTree::size_for(0, 4, 4).is_err());
        assert!(BalancedIndexTree::size_for(4, 0, 4).is_err());
        assert!(BalancedIndexTree::size_for(u32::MAX, 4, 4).is_err());
    }

    #[test]
    fn test_five_key_scenario() {
        let mut t = tree(8);
        for v in [5, 3, 8, 1, 4] {
            t.add(&k(v)).unwrap();
        }
        assert_eq!(t.depth().unwrap(), 3);
        assert_eq!(top(&t), (Some(5), Some(3), Some(8)));
        let (key, node) = t.first().unwrap();
        assert_eq!(key, k(1));
        assert_eq!(t.query(&k(1)).unwrap(), node);
        assert_eq!(keys(&t), vec![1, 3, 4, 5, 8]);
        t.validate().unwrap();
    }

    #[test]
    fn test_ascending_inserts_build_perfect_tree() {
        let mut t = tree(7);
        for v in 1..=7 {
            t.add(&k(v)).unwrap();
            t.validate().unwrap();
        }
        assert_eq!(top(&t), (Some(4), Some(2), Some(6)));
        assert_eq!(t.depth().unwrap(), 3);
        assert_eq!(t.len().unwrap(), 7);
    }

    #[test]
    fn test_double_rotation() {
        let mut t = tree(4);
        t.add(&k(3)).unwrap();
        t.add(&k(1)).unwrap();
        t.add(&k(2)).unwrap();
        assert_eq!(top(&t), (Some(2), Some(1), Some(3)));

        let mut t = tree(4);
        t.add(&k(1)).unwrap();
        t.add(&k(3)).unwrap();
        t.add(&k(2)).unwrap();
        assert_eq!(top(&t), (Some(2), Some(1), Some(3)));
        t.validate().unwrap();
    }

    #[test]
    fn test_remove_two_children_uses_predecessor() {
        let mut t = tree(7);
        for v in 1..=7 {
            let node = t.add(&k(v)).unwrap();
            t.data_mut(node).unwrap().copy_from_slice(&(v * 100).to_le_bytes());
        }
        let three = t.query(&k(3)).unwrap();
        t.remove(&k(4)).unwrap();

        assert_eq!(top(&t), (Some(3), Some(2), Some(6)));
        // The predecessor kept its slot and its data.
        assert_eq!(t.root().unwrap(), Some(three));
        assert_eq!(t.data(three).unwrap(), 300u32.to_le_bytes());
        assert_eq!(t.query(&k(4)), Err(ArenaError::KeyNotFound));
        assert_eq!(keys(&t), vec![1, 2, 3, 5, 6, 7]);
        t.validate().unwrap();
    }

    #[test]
    fn test_remove_rebalances() {
        let mut t = tree(8);
        for v in [5, 3, 8, 1, 4] {
            t.add(&k(v)).unwrap();
        }
        t.remove(&k(8)).unwrap();
        assert_eq!(top(&t), (Some(3), Some(1), Some(5)));
        let five = t.query(&k(5)).unwrap();
        assert_eq!(key_of(&t, t.children(five).unwrap().0), Some(4));
        t.validate().unwrap();
    }

    #[test]
    fn test_add_links_from_current_root() {
        let mut t = tree(4);
        let first = t.add(&k(20)).unwrap();
        assert_eq!(t.root().unwrap(), Some(first));
        assert_eq!(t.len().unwrap(), 1);

        t.add(&k(10)).unwrap();
        t.add(&k(30)).unwrap();
        assert_eq!(top(&t), (Some(20), Some(10), Some(30)));
        assert_eq!(t.len().unwrap(), 3);
        t.validate().unwrap();
    }

    #[test]
    fn test_first_on_empty_tree_matches_exhaustion_kind() {
        let mut t = tree(1);
        assert_eq!(t.first().unwrap_err(), ArenaError::OutOfCapacity);

        t.add(&k(7)).unwrap();
        assert_eq!(t.add(&k(8)).unwrap_err(), ArenaError::OutOfCapacity);
        t.remove(&k(7)).unwrap();
        assert_eq!(t.first().unwrap_err(), ArenaError::OutOfCapacity);
    }

    #[test]
    fn test_errors() {
        let mut t = tree(2);
        assert_eq!(t.first().unwrap_err(), ArenaError::OutOfCapacity);
        assert_eq!(t.remove(&k(1)), Err(ArenaError::KeyNotFound));
        assert!(matches!(t.add(&[1, 2]), Err(ArenaError::BadParameter(_))));

        t.add(&k(1)).unwrap();
        assert_eq!(t.add(&k(1)), Err(ArenaError::DuplicateKey));
        t.add(&k(2)).unwrap();
        assert_eq!(t.add(&k(3)), Err(ArenaError::OutOfCapacity));
        // A duplicate is still reported as such when full.
        assert_eq!(t.add(&k(2)), Err(ArenaError::DuplicateKey));
        assert_eq!(t.len().unwrap(), 2);
        t.validate().unwrap();
    }

    #[test]
    fn test_stale_nodes_are_rejected() {
        let mut t = tree(4);
        let node = t.add(&k(9)).unwrap();
        t.remove(&k(9)).unwrap();
        assert!(t.is_empty().unwrap());
        assert_eq!(t.data(node), Err(ArenaError::InvalidHandle(node.get())));
        assert_eq!(t.key(NodeIndex::new(40)), Err(ArenaError::InvalidHandle(40)));

        // Freed nodes are reused LIFO.
        assert_eq!(t.add(&k(7)).unwrap(), node);
        assert_eq!(t.data(node).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_find_or_add() {
        let mut t = tree(4);
        let (a, created) = t.find_or_add(&k(10)).unwrap();
        assert!(created);
        let (b, created) = t.find_or_add(&k(10)).unwrap();
        assert!(!created);
        assert_eq!(a, b);
    }

    #[test]
    fn test_predecessor_sentinels() {
        let mut t = tree(8);
        let (ten, created, prev) = t.find_or_add_with_prev(&k(10)).unwrap();
        assert!(created);
        assert_eq!(prev, Predecessor::EmptyTree);

        let (five, _, prev) = t.find_or_add_with_prev(&k(5)).unwrap();
        assert_eq!(prev, Predecessor::NoSmallerKey);

        let (twenty, _, prev) = t.find_or_add_with_prev(&k(20)).unwrap();
        assert_eq!(prev, Predecessor::Node(ten));

        let (_, _, prev) = t.find_or_add_with_prev(&k(15)).unwrap();
        assert_eq!(prev, Predecessor::Node(ten));

        // Existing keys report their own predecessor too.
        let (node, created, prev) = t.find_or_add_with_prev(&k(10)).unwrap();
        assert_eq!((node, created, prev), (ten, false, Predecessor::Node(five)));
        let (node, created, prev) = t.find_or_add_with_prev(&k(5)).unwrap();
        assert_eq!((node, created, prev), (five, false, Predecessor::NoSmallerKey));
        let (_, _, prev) = t.find_or_add_with_prev(&k(25)).unwrap();
        assert_eq!(prev, Predecessor::Node(twenty));
        t.validate().unwrap();
    }

    #[test]
    fn test_byte_order_keys() {
        let mut t = tree(4);
        // Big-endian: 256 sorts after 1 even though its first byte is smaller.
        t.add(&k(256)).unwrap();
        t.add(&k(1)).unwrap();
        assert_eq!(t.first().unwrap().0, k(1));
    }

    #[test]
    fn test_attach_after_copy() {
        let mut t = tree(8);
        for v in [4, 2, 6] {
            t.add(&k(v)).unwrap();
        }
        let mut moved = vec![0u8; 1];
        moved.extend_from_slice(&t.into_inner());
        let mut t = BalancedIndexTree::attach(&mut moved[1..]).unwrap();
        t.add(&k(5)).unwrap();
        t.validate().unwrap();
        assert_eq!(t.len().unwrap(), 4);

        assert_eq!(BalancedIndexTree::attach(vec![0u8; 64]).unwrap_err(), ArenaError::NotInitialized);
    }

    #[test]
    fn test_validate_detects_damage() {
        let mut t = tree(4);
        for v in [2, 1, 3] {
            t.add(&k(v)).unwrap();
        }
        let mut bytes = t.into_inner();
        // Overwrite the stored depth of node 0 (the root).
        bytes[32 + 12..32 + 16].copy_from_slice(&9u32.to_ne_bytes());
        let t = BalancedIndexTree::attach(bytes).unwrap();
        assert!(matches!(t.validate(), Err(ArenaError::InternalInconsistency(_))));
    }
}
