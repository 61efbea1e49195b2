use log::warn;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use solana_program::pubkey::Pubkey;
use static_assertions::{const_assert, const_assert_eq};
use std::mem::size_of;

use crate::matching::Side;

pub type NodeHandle = u32;

pub const MAX_ORDERTREE_NODES: usize = 1024; // NOTE: this cannot be larger than u32::MAX
const_assert!(MAX_ORDERTREE_NODES <= u32::MAX as usize);

/// Sentinel stored in `LeafNode::peg_limit` when a pegged order has no limit.
pub const NO_PEG_LIMIT: i64 = -1;

#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NodeTag {
    Uninitialized = 0,
    InnerNode = 1,
    LeafNode = 2,
    FreeNode = 3,
    LastFreeNode = 4,
}

/// Branching node of the critbit tree.
///
/// Every leaf below `children[0]` has the critical bit (the bit right after the
/// shared prefix) unset, every leaf below `children[1]` has it set. That makes
/// `children[0]` the lower-keyed subtree.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InnerNode {
    /// number of highest `key` bits that all children share
    pub prefix_len: u32,
    /// only the top `prefix_len` bits are relevant
    pub key: u128,
    pub children: [NodeHandle; 2],
    /// earliest expiry timestamp of each child subtree, maintained for pruning
    pub child_earliest_expiry: [u64; 2],
}

impl InnerNode {
    pub fn new(prefix_len: u32, key: u128) -> Self {
        Self { prefix_len, key, children: [0; 2], child_earliest_expiry: [u64::MAX; 2] }
    }

    /// Child that a search for `search_key` continues into, and whether the
    /// critical bit of `search_key` is set.
    pub fn walk_down(&self, search_key: u128) -> (NodeHandle, bool) {
        let crit_bit_mask = (1u128 << 127) >> self.prefix_len;
        let crit_bit = (search_key & crit_bit_mask) != 0;
        (self.children[crit_bit as usize], crit_bit)
    }

    pub fn earliest_expiry(&self) -> u64 {
        self.child_earliest_expiry[0].min(self.child_earliest_expiry[1])
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// index of the order in the owner's open orders account
    pub owner_slot: u8,
    /// seconds after `timestamp` until the order expires, 0 means never
    pub time_in_force: u16,
    /// price data in the upper 64 bits, sequence number in the lower 64 bits
    pub key: u128,
    pub owner: Pubkey,
    /// remaining size in base lots
    pub quantity: i64,
    /// placement time in seconds
    pub timestamp: u64,
    /// worst price a pegged order accepts, `NO_PEG_LIMIT` if unlimited
    pub peg_limit: i64,
    pub client_order_id: u64,
}

impl LeafNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_slot: u8,
        key: u128,
        owner: Pubkey,
        quantity: i64,
        timestamp: u64,
        time_in_force: u16,
        peg_limit: i64,
        client_order_id: u64,
    ) -> Self {
        Self {
            owner_slot,
            time_in_force,
            key,
            owner,
            quantity,
            timestamp,
            peg_limit,
            client_order_id,
        }
    }

    /// For fixed orders this is the price in lots, for oracle pegged orders
    /// the biased price offset (see `utils::oracle_pegged_price_offset`).
    #[inline(always)]
    pub fn price_data(&self) -> u64 {
        (self.key >> 64) as u64
    }

    /// Time at which the order expires, `u64::MAX` if it never does.
    #[inline(always)]
    pub fn expiry(&self) -> u64 {
        if self.time_in_force == 0 {
            u64::MAX
        } else {
            self.timestamp.saturating_add(self.time_in_force as u64)
        }
    }

    #[inline(always)]
    pub fn is_expired(&self, now_ts: u64) -> bool {
        self.time_in_force > 0 && now_ts >= self.expiry()
    }

    #[inline(always)]
    pub fn has_peg_limit(&self) -> bool {
        self.peg_limit != NO_PEG_LIMIT
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FreeNode {
    pub next: NodeHandle,
}

/// One arena slot. The variant is the node tag; payloads are only reachable
/// through the variant that owns them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AnyNode {
    #[default]
    Uninitialized,
    Inner(InnerNode),
    Leaf(LeafNode),
    Free(FreeNode),
    LastFree(FreeNode),
}

pub enum NodeRef<'a> {
    Inner(&'a InnerNode),
    Leaf(&'a LeafNode),
}

impl AnyNode {
    pub fn tag(&self) -> NodeTag {
        match self {
            AnyNode::Uninitialized => NodeTag::Uninitialized,
            AnyNode::Inner(_) => NodeTag::InnerNode,
            AnyNode::Leaf(_) => NodeTag::LeafNode,
            AnyNode::Free(_) => NodeTag::FreeNode,
            AnyNode::LastFree(_) => NodeTag::LastFreeNode,
        }
    }

    pub fn key(&self) -> Option<u128> {
        match self.case()? {
            NodeRef::Inner(inner) => Some(inner.key),
            NodeRef::Leaf(leaf) => Some(leaf.key),
        }
    }

    pub fn children(&self) -> Option<[NodeHandle; 2]> {
        match self.case()? {
            NodeRef::Inner(&InnerNode { children, .. }) => Some(children),
            NodeRef::Leaf(_) => None,
        }
    }

    pub fn case(&self) -> Option<NodeRef<'_>> {
        match self {
            AnyNode::Inner(inner) => Some(NodeRef::Inner(inner)),
            AnyNode::Leaf(leaf) => Some(NodeRef::Leaf(leaf)),
            _ => None,
        }
    }

    #[inline]
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self.case() {
            Some(NodeRef::Leaf(leaf_ref)) => Some(leaf_ref),
            _ => None,
        }
    }

    #[inline]
    pub fn as_inner(&self) -> Option<&InnerNode> {
        match self.case() {
            Some(NodeRef::Inner(inner_ref)) => Some(inner_ref),
            _ => None,
        }
    }
}

impl From<InnerNode> for AnyNode {
    fn from(inner: InnerNode) -> Self {
        AnyNode::Inner(inner)
    }
}

impl From<LeafNode> for AnyNode {
    fn from(leaf: LeafNode) -> Self {
        AnyNode::Leaf(leaf)
    }
}

/// Decides the iteration direction of a tree: bids are walked from the highest
/// key down, asks from the lowest key up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OrderTreeType {
    Bids = 0,
    Asks = 1,
}

impl OrderTreeType {
    pub fn side(&self) -> Side {
        match self {
            OrderTreeType::Bids => Side::Bid,
            OrderTreeType::Asks => Side::Ask,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct OrderTreeRoot {
    pub maybe_node: NodeHandle,
    pub leaf_count: u32,
}
const_assert_eq!(size_of::<OrderTreeRoot>(), 8);

impl OrderTreeRoot {
    pub fn node(&self) -> Option<NodeHandle> {
        if self.leaf_count == 0 {
            None
        } else {
            Some(self.maybe_node)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }
}

/// Fixed capacity node arena shared by all trees of one book side.
///
/// The snapshot is produced by the state loader; nothing in this crate writes
/// to it.
#[derive(Clone)]
pub struct OrderTreeNodes {
    pub order_tree_type: OrderTreeType,
    pub bump_index: u32,
    pub free_list_len: u32,
    pub free_list_head: NodeHandle,
    pub nodes: [AnyNode; MAX_ORDERTREE_NODES],
}

impl OrderTreeNodes {
    pub fn new(order_tree_type: OrderTreeType) -> Self {
        Self {
            order_tree_type,
            bump_index: 0,
            free_list_len: 0,
            free_list_head: 0,
            nodes: [AnyNode::Uninitialized; MAX_ORDERTREE_NODES],
        }
    }

    pub fn order_tree_type(&self) -> OrderTreeType {
        self.order_tree_type
    }

    /// Node behind `handle` if the slot holds an inner node or a leaf.
    ///
    /// Free, uninitialized and out of range slots return None, which is how
    /// stale handles are caught.
    pub fn node(&self, handle: NodeHandle) -> Option<&AnyNode> {
        let node = self.nodes.get(handle as usize)?;
        match node.tag() {
            NodeTag::InnerNode | NodeTag::LeafNode => Some(node),
            _ => None,
        }
    }

    pub fn iter(&self, root: &OrderTreeRoot) -> OrderTreeIter<'_> {
        OrderTreeIter::new(self, root)
    }
}

/// In-order walk over one tree, best key first for the tree's side.
///
/// Uses an explicit stack of the inner nodes whose second child is still
/// pending, so the walk never recurses.
pub struct OrderTreeIter<'a> {
    order_tree: &'a OrderTreeNodes,
    stack: Vec<&'a InnerNode>,
    next_leaf: Option<(NodeHandle, &'a LeafNode)>,
    /// child index visited first, 1 for bids and 0 for asks
    left: usize,
    right: usize,
    yielded: usize,
}

impl<'a> OrderTreeIter<'a> {
    pub fn new(order_tree: &'a OrderTreeNodes, root: &OrderTreeRoot) -> Self {
        let (left, right) =
            if order_tree.order_tree_type() == OrderTreeType::Bids { (1, 0) } else { (0, 1) };
        let mut iter =
            Self { order_tree, stack: Vec::new(), next_leaf: None, left, right, yielded: 0 };
        if let Some(r) = root.node() {
            iter.next_leaf = iter.find_leftmost_leaf(r);
        }
        iter
    }

    pub fn side(&self) -> Side {
        if self.left == 1 {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    pub fn peek(&self) -> Option<(NodeHandle, &'a LeafNode)> {
        self.next_leaf
    }

    fn find_leftmost_leaf(&mut self, start: NodeHandle) -> Option<(NodeHandle, &'a LeafNode)> {
        let mut current = start;
        loop {
            // a well formed tree can never be deeper than the arena is large
            if self.stack.len() >= MAX_ORDERTREE_NODES {
                warn!("order tree deeper than the node arena, stopping at handle {}", current);
                return None;
            }
            let node = match self.order_tree.node(current) {
                Some(node) => node,
                None => {
                    warn!("stale node handle {} in order tree, stopping iteration", current);
                    return None;
                }
            };
            match node.case()? {
                NodeRef::Inner(inner) => {
                    self.stack.push(inner);
                    current = inner.children[self.left];
                }
                NodeRef::Leaf(leaf) => return Some((current, leaf)),
            }
        }
    }
}

impl<'a> Iterator for OrderTreeIter<'a> {
    type Item = (NodeHandle, &'a LeafNode);

    fn next(&mut self) -> Option<Self::Item> {
        let current_leaf = self.next_leaf?;
        self.yielded += 1;

        self.next_leaf = if self.yielded >= MAX_ORDERTREE_NODES {
            None
        } else {
            match self.stack.pop() {
                None => None,
                Some(inner) => {
                    let start = inner.children[self.right];
                    self.find_leftmost_leaf(start)
                }
            }
        };

        Some(current_leaf)
    }
}
