use solana_program::pubkey::Pubkey;
use thiserror::Error;

use pegbook::bookside::{BookSide, BookSideOrderTree};
use pegbook::critbit::{
    AnyNode, FreeNode, InnerNode, LeafNode, NodeHandle, NodeRef, OrderTreeNodes, OrderTreeRoot,
    OrderTreeType, NO_PEG_LIMIT,
};
use pegbook::matching::{Orderbook, Side};
use pegbook::state::Market;
use pegbook::utils::{fixed_price_data, new_node_key, oracle_pegged_price_data};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BuilderError {
    #[error("order tree is out of space")]
    OutOfSpace,
    #[error("free list entry {0} is not a free node")]
    CorruptFreeList(NodeHandle),
    #[error("handle {0} does not point at a tree node")]
    StaleHandle(NodeHandle),
    #[error("price {0} is not a valid fixed price")]
    InvalidPrice(i64),
}

pub fn setup_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn market(base_lot_size: i64, quote_lot_size: i64, maker_fee: i64, taker_fee: i64) -> Market {
    Market {
        name: *b"TEST-PERP\0\0\0\0\0\0\0",
        base_decimals: 6,
        quote_decimals: 6,
        time_expiry: 0,
        base_mint: Pubkey::new_unique(),
        quote_mint: Pubkey::new_unique(),
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
        quote_lot_size,
        base_lot_size,
        seq_num: 0,
        maker_fee,
        taker_fee,
    }
}

fn insert_node(nodes: &mut OrderTreeNodes, node: AnyNode) -> Result<NodeHandle, BuilderError> {
    if nodes.free_list_len == 0 {
        if nodes.bump_index as usize == nodes.nodes.len() {
            return Err(BuilderError::OutOfSpace);
        }
        let handle = nodes.bump_index;
        nodes.bump_index += 1;
        nodes.nodes[handle as usize] = node;
        return Ok(handle);
    }

    let handle = nodes.free_list_head;
    let next = match nodes.nodes.get(handle as usize) {
        Some(AnyNode::Free(FreeNode { next })) | Some(AnyNode::LastFree(FreeNode { next })) => {
            *next
        }
        _ => return Err(BuilderError::CorruptFreeList(handle)),
    };
    nodes.free_list_head = next;
    nodes.free_list_len -= 1;
    nodes.nodes[handle as usize] = node;
    Ok(handle)
}

fn remove_node(nodes: &mut OrderTreeNodes, handle: NodeHandle) -> Option<AnyNode> {
    let val = *nodes.node(handle)?;
    let free = FreeNode { next: nodes.free_list_head };
    nodes.nodes[handle as usize] =
        if nodes.free_list_len == 0 { AnyNode::LastFree(free) } else { AnyNode::Free(free) };
    nodes.free_list_len += 1;
    nodes.free_list_head = handle;
    Some(val)
}

fn subtree_expiry(node: &AnyNode) -> u64 {
    match node {
        AnyNode::Inner(inner) => inner.earliest_expiry(),
        AnyNode::Leaf(leaf) => leaf.expiry(),
        _ => u64::MAX,
    }
}

/// Inserts `new_leaf` into the tree at `root`. A leaf with the same key is
/// replaced and returned.
pub fn insert_leaf(
    nodes: &mut OrderTreeNodes,
    root: &mut OrderTreeRoot,
    new_leaf: &LeafNode,
) -> Result<(NodeHandle, Option<LeafNode>), BuilderError> {
    let mut parent_handle = match root.node() {
        Some(handle) => handle,
        None => {
            let handle = insert_node(nodes, (*new_leaf).into())?;
            root.maybe_node = handle;
            root.leaf_count = 1;
            return Ok((handle, None));
        }
    };
    let new_leaf_expiry = new_leaf.expiry();

    loop {
        let parent_contents =
            *nodes.node(parent_handle).ok_or(BuilderError::StaleHandle(parent_handle))?;
        let parent_key = parent_contents.key().ok_or(BuilderError::StaleHandle(parent_handle))?;
        if parent_key == new_leaf.key {
            if let AnyNode::Leaf(old_leaf) = parent_contents {
                nodes.nodes[parent_handle as usize] = (*new_leaf).into();
                return Ok((parent_handle, Some(old_leaf)));
            }
        }

        let shared_prefix_len = (parent_key ^ new_leaf.key).leading_zeros();
        if let AnyNode::Inner(inner) = parent_contents {
            if shared_prefix_len >= inner.prefix_len {
                let (child, crit_bit) = inner.walk_down(new_leaf.key);
                if let AnyNode::Inner(parent) = &mut nodes.nodes[parent_handle as usize] {
                    let expiry = &mut parent.child_earliest_expiry[crit_bit as usize];
                    *expiry = (*expiry).min(new_leaf_expiry);
                }
                parent_handle = child;
                continue;
            }
        }

        // the new leaf branches off here: move the current node down and put
        // an inner node for the shared prefix in its slot
        let crit_bit_mask = (1u128 << 127) >> shared_prefix_len;
        let new_leaf_crit_bit = (crit_bit_mask & new_leaf.key) != 0;
        let old_parent_crit_bit = !new_leaf_crit_bit;

        let new_leaf_handle = insert_node(nodes, (*new_leaf).into())?;
        let moved_parent_handle = match insert_node(nodes, parent_contents) {
            Ok(handle) => handle,
            Err(err) => {
                remove_node(nodes, new_leaf_handle);
                return Err(err);
            }
        };

        let mut new_parent = InnerNode::new(shared_prefix_len, new_leaf.key);
        new_parent.children[new_leaf_crit_bit as usize] = new_leaf_handle;
        new_parent.children[old_parent_crit_bit as usize] = moved_parent_handle;
        new_parent.child_earliest_expiry[new_leaf_crit_bit as usize] = new_leaf_expiry;
        new_parent.child_earliest_expiry[old_parent_crit_bit as usize] =
            subtree_expiry(&parent_contents);
        nodes.nodes[parent_handle as usize] = new_parent.into();
        root.leaf_count += 1;
        return Ok((new_leaf_handle, None));
    }
}

/// Removes the leaf with `search_key`, returning its slot (and its parent's)
/// to the free list.
pub fn remove_by_key(
    nodes: &mut OrderTreeNodes,
    root: &mut OrderTreeRoot,
    search_key: u128,
) -> Option<LeafNode> {
    let mut parent_handle = root.node()?;
    let (mut child_handle, mut crit_bit) = match nodes.node(parent_handle)?.case()? {
        NodeRef::Leaf(&leaf) if leaf.key == search_key => {
            root.maybe_node = 0;
            root.leaf_count = 0;
            remove_node(nodes, parent_handle);
            return Some(leaf);
        }
        NodeRef::Leaf(_) => return None,
        NodeRef::Inner(inner) => inner.walk_down(search_key),
    };

    let leaf = loop {
        match *nodes.node(child_handle)? {
            AnyNode::Inner(inner) => {
                let (grandchild_handle, grandchild_crit_bit) = inner.walk_down(search_key);
                parent_handle = child_handle;
                child_handle = grandchild_handle;
                crit_bit = grandchild_crit_bit;
            }
            AnyNode::Leaf(leaf) if leaf.key == search_key => break leaf,
            _ => return None,
        }
    };

    // the sibling takes over the parent's slot
    let other_child_handle = nodes.node(parent_handle)?.children()?[!crit_bit as usize];
    let other_child = remove_node(nodes, other_child_handle)?;
    nodes.nodes[parent_handle as usize] = other_child;
    remove_node(nodes, child_handle);
    root.leaf_count -= 1;
    Some(leaf)
}

/// Order parameters that don't depend on which tree the order goes into.
#[derive(Debug, Copy, Clone)]
pub struct OrderCookie {
    pub owner: Pubkey,
    pub quantity: i64,
    pub timestamp: u64,
    pub time_in_force: u16,
    pub peg_limit: i64,
}

impl OrderCookie {
    pub fn new(quantity: i64) -> Self {
        Self {
            owner: Pubkey::new_unique(),
            quantity,
            timestamp: 0,
            time_in_force: 0,
            peg_limit: NO_PEG_LIMIT,
        }
    }

    pub fn owner(mut self, owner: Pubkey) -> Self {
        self.owner = owner;
        self
    }

    pub fn expiring(mut self, timestamp: u64, time_in_force: u16) -> Self {
        self.timestamp = timestamp;
        self.time_in_force = time_in_force;
        self
    }

    pub fn peg_limit(mut self, peg_limit: i64) -> Self {
        self.peg_limit = peg_limit;
        self
    }
}

/// A book side that orders can be added to, with sequence numbers handed out
/// in placement order.
pub struct BookSideCookie {
    pub book_side: BookSide,
    pub seq_num: u64,
}

impl BookSideCookie {
    pub fn new(side: Side) -> Self {
        let order_tree_type = match side {
            Side::Bid => OrderTreeType::Bids,
            Side::Ask => OrderTreeType::Asks,
        };
        Self { book_side: BookSide::new(order_tree_type), seq_num: 0 }
    }

    pub fn side(&self) -> Side {
        self.book_side.side()
    }

    pub fn add_fixed(
        &mut self,
        price_lots: i64,
        order: OrderCookie,
    ) -> Result<LeafNode, BuilderError> {
        let price_data = fixed_price_data(price_lots).ok_or(BuilderError::InvalidPrice(price_lots))?;
        self.add_order(BookSideOrderTree::Fixed, price_data, order)
    }

    pub fn add_pegged(
        &mut self,
        price_offset_lots: i64,
        order: OrderCookie,
    ) -> Result<LeafNode, BuilderError> {
        let price_data = oracle_pegged_price_data(price_offset_lots);
        self.add_order(BookSideOrderTree::OraclePegged, price_data, order)
    }

    /// Inserts a raw price data value, bypassing fixed price validation.
    pub fn add_order(
        &mut self,
        component: BookSideOrderTree,
        price_data: u64,
        order: OrderCookie,
    ) -> Result<LeafNode, BuilderError> {
        self.seq_num += 1;
        let key = new_node_key(self.side(), price_data, self.seq_num);
        let leaf = LeafNode::new(
            0,
            key,
            order.owner,
            order.quantity,
            order.timestamp,
            order.time_in_force,
            order.peg_limit,
            self.seq_num,
        );
        let book_side = &mut self.book_side;
        insert_leaf(&mut book_side.nodes, &mut book_side.roots[component as usize], &leaf)?;
        Ok(leaf)
    }

    pub fn remove(&mut self, component: BookSideOrderTree, key: u128) -> Option<LeafNode> {
        let book_side = &mut self.book_side;
        remove_by_key(&mut book_side.nodes, &mut book_side.roots[component as usize], key)
    }
}

pub fn orderbook<'a>(bids: &'a BookSideCookie, asks: &'a BookSideCookie) -> Orderbook<'a> {
    Orderbook { bids: &bids.book_side, asks: &asks.book_side }
}
