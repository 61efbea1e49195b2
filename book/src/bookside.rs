use log::trace;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::critbit::{
    AnyNode, LeafNode, NodeHandle, OrderTreeIter, OrderTreeNodes, OrderTreeRoot, OrderTreeType,
};
use crate::matching::Side;
use crate::utils::{fixed_price_lots, oracle_pegged_price_offset};

#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BookSideOrderTree {
    Fixed = 0,
    OraclePegged = 1,
}

/// Identifies a leaf by its arena slot and the tree it hangs in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BookSideOrderHandle {
    pub node: NodeHandle,
    pub order_tree: BookSideOrderTree,
}

/// One side of the book: a fixed price tree and an oracle pegged tree, both
/// allocated from the same node arena.
#[derive(Clone)]
pub struct BookSide {
    pub roots: [OrderTreeRoot; 2],
    pub nodes: OrderTreeNodes,
}

impl BookSide {
    pub fn new(order_tree_type: OrderTreeType) -> Self {
        Self { roots: [OrderTreeRoot::default(); 2], nodes: OrderTreeNodes::new(order_tree_type) }
    }

    pub fn side(&self) -> Side {
        self.nodes.order_tree_type().side()
    }

    pub fn root(&self, component: BookSideOrderTree) -> &OrderTreeRoot {
        &self.roots[component as usize]
    }

    pub fn leaf_count(&self) -> u32 {
        self.roots.iter().fold(0u32, |count, root| count.saturating_add(root.leaf_count))
    }

    pub fn is_empty(&self) -> bool {
        self.roots.iter().all(OrderTreeRoot::is_empty)
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&AnyNode> {
        self.nodes.node(handle)
    }

    /// Every order in priority order, including expired ones and pegged
    /// orders outside their peg limit. Pegged orders are only included when
    /// an oracle price is given.
    pub fn iter_all_including_invalid(
        &self,
        now_ts: u64,
        oracle_price_lots: Option<i64>,
    ) -> BookSideIter<'_> {
        BookSideIter::new(
            self.nodes.iter(self.root(BookSideOrderTree::Fixed)),
            self.nodes.iter(self.root(BookSideOrderTree::OraclePegged)),
            now_ts,
            oracle_price_lots,
        )
    }

    /// Orders that can be matched right now, in priority order.
    pub fn iter_valid(
        &self,
        now_ts: u64,
        oracle_price_lots: Option<i64>,
    ) -> impl Iterator<Item = BookSideIterItem<'_>> {
        self.iter_all_including_invalid(now_ts, oracle_price_lots)
            .filter(|item| item.is_valid() && !item.expired)
    }

    pub fn best_price(&self, now_ts: u64, oracle_price_lots: Option<i64>) -> Option<i64> {
        self.iter_valid(now_ts, oracle_price_lots).next().map(|item| item.price_lots)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OrderState {
    Valid,
    /// pegged order whose price is past its peg limit
    Invalid,
    /// pegged order whose price is not representable, never yielded
    Skipped,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BookSideIterItem<'a> {
    pub handle: BookSideOrderHandle,
    pub node: &'a LeafNode,
    pub price_lots: i64,
    pub state: OrderState,
    /// whether the order's time in force had lapsed at the iterator's `now_ts`
    pub expired: bool,
}

impl<'a> BookSideIterItem<'a> {
    pub fn is_valid(&self) -> bool {
        self.state == OrderState::Valid
    }

    /// Key the item is ranked by. Pegged orders get their live price packed
    /// over the stored offset so they compare directly with fixed keys.
    pub fn key(&self) -> u128 {
        match self.handle.order_tree {
            BookSideOrderTree::Fixed => self.node.key,
            BookSideOrderTree::OraclePegged => key_for_fixed_price(self.node.key, self.price_lots),
        }
    }
}

/// Merges the fixed and oracle pegged trees of one book side into a single
/// priority ordered sequence.
pub struct BookSideIter<'a> {
    fixed_iter: OrderTreeIter<'a>,
    oracle_pegged_iter: OrderTreeIter<'a>,
    now_ts: u64,
    oracle_price_lots: Option<i64>,
}

impl<'a> BookSideIter<'a> {
    pub fn new(
        fixed_iter: OrderTreeIter<'a>,
        oracle_pegged_iter: OrderTreeIter<'a>,
        now_ts: u64,
        oracle_price_lots: Option<i64>,
    ) -> Self {
        Self { fixed_iter, oracle_pegged_iter, now_ts, oracle_price_lots }
    }

    pub fn side(&self) -> Side {
        self.fixed_iter.side()
    }

    /// Best pegged order that has a usable price, advancing past the ones
    /// that don't.
    fn next_oracle_pegged(&mut self, oracle_price_lots: i64) -> Option<BookSideIterItem<'a>> {
        let side = self.side();
        loop {
            let (handle, node) = self.oracle_pegged_iter.peek()?;
            let (state, price_lots) = oracle_pegged_price(oracle_price_lots, node, side);
            if state != OrderState::Skipped {
                return Some(BookSideIterItem {
                    handle: BookSideOrderHandle {
                        node: handle,
                        order_tree: BookSideOrderTree::OraclePegged,
                    },
                    node,
                    price_lots,
                    state,
                    expired: node.is_expired(self.now_ts),
                });
            }
            trace!(
                "skipping oracle pegged order {} at oracle price {}: price {} out of range",
                handle,
                oracle_price_lots,
                price_lots
            );
            self.oracle_pegged_iter.next();
        }
    }
}

impl<'a> Iterator for BookSideIter<'a> {
    type Item = BookSideIterItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let side = self.side();
        let oracle_pegged = match self.oracle_price_lots {
            Some(oracle_price_lots) => self.next_oracle_pegged(oracle_price_lots),
            None => None,
        };
        let fixed = self.fixed_iter.peek().map(|fixed| fixed_to_result(fixed, self.now_ts));

        let better = rank_orders(side, fixed, oracle_pegged)?;
        match better.handle.order_tree {
            BookSideOrderTree::Fixed => self.fixed_iter.next(),
            BookSideOrderTree::OraclePegged => self.oracle_pegged_iter.next(),
        };
        Some(better)
    }
}

/// Live price of an oracle pegged order and whether it can be matched.
///
/// Prices outside `1..i64::MAX` are Skipped (reported clamped to at least 1),
/// prices past the order's peg limit are Invalid.
pub fn oracle_pegged_price(oracle_price_lots: i64, node: &LeafNode, side: Side) -> (OrderState, i64) {
    let price_offset = oracle_pegged_price_offset(node.price_data());
    let price = oracle_price_lots.saturating_add(price_offset);
    if (1..i64::MAX).contains(&price) {
        if node.has_peg_limit() && side.is_price_better(price, node.peg_limit) {
            return (OrderState::Invalid, price);
        }
        return (OrderState::Valid, price);
    }
    (OrderState::Skipped, price.max(1))
}

/// Replaces the price data of `key` with `price_lots`, keeping the sequence
/// number bits.
pub fn key_for_fixed_price(key: u128, price_lots: i64) -> u128 {
    let upper = (price_lots as u64 as u128) << 64;
    let lower = key as u64 as u128;
    upper | lower
}

fn fixed_to_result((handle, node): (NodeHandle, &LeafNode), now_ts: u64) -> BookSideIterItem<'_> {
    let (state, price_lots) = match fixed_price_lots(node.price_data()) {
        Some(price_lots) => (OrderState::Valid, price_lots),
        None => (OrderState::Invalid, node.price_data().min(i64::MAX as u64) as i64),
    };
    BookSideIterItem {
        handle: BookSideOrderHandle { node: handle, order_tree: BookSideOrderTree::Fixed },
        node,
        price_lots,
        state,
        expired: node.is_expired(now_ts),
    }
}

/// Picks the item that comes first for `side`: the larger key for bids, the
/// smaller for asks. On equal keys the pegged order wins.
fn rank_orders<'a>(
    side: Side,
    fixed: Option<BookSideIterItem<'a>>,
    oracle_pegged: Option<BookSideIterItem<'a>>,
) -> Option<BookSideIterItem<'a>> {
    match (fixed, oracle_pegged) {
        (Some(f), Some(o)) => {
            let is_better = match side {
                Side::Bid => f.key() > o.key(),
                Side::Ask => f.key() < o.key(),
            };
            if is_better {
                Some(f)
            } else {
                Some(o)
            }
        }
        (None, Some(o)) => Some(o),
        (Some(f), None) => Some(f),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critbit::{InnerNode, NO_PEG_LIMIT};
    use crate::utils::{fixed_price_data, new_node_key, oracle_pegged_price_data};
    use solana_program::pubkey::Pubkey;

    /// Hangs `leaves` (sorted by key) off a chain of inner nodes. Not a critbit
    /// layout, but a valid search tree, which is all iteration relies on.
    fn add_tree(book_side: &mut BookSide, component: BookSideOrderTree, mut leaves: Vec<LeafNode>) {
        leaves.sort_by_key(|leaf| leaf.key);
        let mut alloc = |node: AnyNode| {
            let handle = book_side.nodes.bump_index;
            book_side.nodes.nodes[handle as usize] = node;
            book_side.nodes.bump_index += 1;
            handle
        };
        let count = leaves.len() as u32;
        let mut subtree = match leaves.pop() {
            Some(leaf) => alloc(leaf.into()),
            None => return,
        };
        while let Some(leaf) = leaves.pop() {
            let left = alloc(leaf.into());
            let mut inner = InnerNode::new(0, leaf.key);
            inner.children = [left, subtree];
            subtree = alloc(inner.into());
        }
        book_side.roots[component as usize] = OrderTreeRoot { maybe_node: subtree, leaf_count: count };
    }

    fn fixed_leaf(side: Side, price_lots: i64, seq_num: u64) -> LeafNode {
        let key = new_node_key(side, fixed_price_data(price_lots).unwrap(), seq_num);
        LeafNode::new(0, key, Pubkey::new_unique(), 10, 0, 0, NO_PEG_LIMIT, seq_num)
    }

    fn pegged_leaf(side: Side, offset: i64, peg_limit: i64, seq_num: u64) -> LeafNode {
        let key = new_node_key(side, oracle_pegged_price_data(offset), seq_num);
        LeafNode::new(0, key, Pubkey::new_unique(), 10, 0, 0, peg_limit, seq_num)
    }

    fn prices(iter: impl Iterator<Item = BookSideIterItem<'static>>) -> Vec<i64> {
        iter.map(|item| item.price_lots).collect()
    }

    fn leak(book_side: BookSide) -> &'static BookSide {
        Box::leak(Box::new(book_side))
    }

    #[test]
    fn test_oracle_pegged_price_states() {
        let side = Side::Bid;
        let node = pegged_leaf(side, -50, NO_PEG_LIMIT, 1);
        assert_eq!(oracle_pegged_price(100, &node, side), (OrderState::Valid, 50));
        assert_eq!(oracle_pegged_price(50, &node, side), (OrderState::Skipped, 1));
        assert_eq!(oracle_pegged_price(10, &node, side), (OrderState::Skipped, 1));

        let node = pegged_leaf(side, 10, NO_PEG_LIMIT, 1);
        assert_eq!(oracle_pegged_price(i64::MAX - 10, &node, side).0, OrderState::Skipped);
        assert_eq!(oracle_pegged_price(i64::MAX - 11, &node, side).0, OrderState::Valid);
        assert_eq!(oracle_pegged_price(i64::MAX, &node, side), (OrderState::Skipped, i64::MAX));

        let node = pegged_leaf(side, i64::MIN, NO_PEG_LIMIT, 1);
        assert_eq!(oracle_pegged_price(i64::MIN, &node, side), (OrderState::Skipped, 1));
    }

    #[test]
    fn test_oracle_pegged_price_respects_peg_limit() {
        let bid = pegged_leaf(Side::Bid, 5, 104, 1);
        assert_eq!(oracle_pegged_price(99, &bid, Side::Bid), (OrderState::Valid, 104));
        assert_eq!(oracle_pegged_price(100, &bid, Side::Bid), (OrderState::Invalid, 105));

        let ask = pegged_leaf(Side::Ask, -5, 96, 1);
        assert_eq!(oracle_pegged_price(101, &ask, Side::Ask), (OrderState::Valid, 96));
        assert_eq!(oracle_pegged_price(100, &ask, Side::Ask), (OrderState::Invalid, 95));
    }

    #[test]
    fn test_key_for_fixed_price_keeps_sequence_bits() {
        let key = new_node_key(Side::Ask, oracle_pegged_price_data(-3), 77);
        let packed = key_for_fixed_price(key, 12);
        assert_eq!(packed >> 64, 12);
        assert_eq!(packed as u64, 77);
    }

    #[test]
    fn test_merge_asks_lowest_price_first() {
        let mut asks = BookSide::new(OrderTreeType::Asks);
        add_tree(
            &mut asks,
            BookSideOrderTree::Fixed,
            vec![fixed_leaf(Side::Ask, 60, 1), fixed_leaf(Side::Ask, 40, 2)],
        );
        add_tree(
            &mut asks,
            BookSideOrderTree::OraclePegged,
            vec![pegged_leaf(Side::Ask, -50, NO_PEG_LIMIT, 3), pegged_leaf(Side::Ask, 0, NO_PEG_LIMIT, 4)],
        );
        let asks = leak(asks);
        assert_eq!(asks.leaf_count(), 4);

        let items: Vec<_> = asks.iter_all_including_invalid(0, Some(100)).collect();
        let order: Vec<_> = items.iter().map(|i| (i.handle.order_tree, i.price_lots)).collect();
        assert_eq!(
            order,
            vec![
                (BookSideOrderTree::Fixed, 40),
                (BookSideOrderTree::OraclePegged, 50),
                (BookSideOrderTree::Fixed, 60),
                (BookSideOrderTree::OraclePegged, 100),
            ]
        );
        assert!(items.windows(2).all(|w| w[0].key() <= w[1].key()));
    }

    #[test]
    fn test_merge_bids_highest_price_first() {
        let mut bids = BookSide::new(OrderTreeType::Bids);
        add_tree(
            &mut bids,
            BookSideOrderTree::Fixed,
            vec![fixed_leaf(Side::Bid, 90, 1), fixed_leaf(Side::Bid, 110, 2)],
        );
        add_tree(
            &mut bids,
            BookSideOrderTree::OraclePegged,
            vec![pegged_leaf(Side::Bid, 0, NO_PEG_LIMIT, 3), pegged_leaf(Side::Bid, 20, NO_PEG_LIMIT, 4)],
        );
        let bids = leak(bids);
        assert_eq!(bids.side(), Side::Bid);
        assert_eq!(prices(bids.iter_all_including_invalid(0, Some(100))), vec![120, 110, 100, 90]);

        let items: Vec<_> = bids.iter_all_including_invalid(0, Some(100)).collect();
        assert!(items.windows(2).all(|w| w[0].key() >= w[1].key()));
    }

    #[test]
    fn test_pegged_orders_ignored_without_oracle_price() {
        let mut asks = BookSide::new(OrderTreeType::Asks);
        add_tree(&mut asks, BookSideOrderTree::Fixed, vec![fixed_leaf(Side::Ask, 60, 1)]);
        add_tree(
            &mut asks,
            BookSideOrderTree::OraclePegged,
            vec![pegged_leaf(Side::Ask, -50, NO_PEG_LIMIT, 2)],
        );
        let asks = leak(asks);
        assert_eq!(prices(asks.iter_all_including_invalid(0, None)), vec![60]);
    }

    #[test]
    fn test_skipped_pegged_orders_are_never_yielded() {
        let mut bids = BookSide::new(OrderTreeType::Bids);
        add_tree(
            &mut bids,
            BookSideOrderTree::OraclePegged,
            vec![
                pegged_leaf(Side::Bid, -200, NO_PEG_LIMIT, 1),
                pegged_leaf(Side::Bid, -100, NO_PEG_LIMIT, 2),
                pegged_leaf(Side::Bid, -30, NO_PEG_LIMIT, 3),
                pegged_leaf(Side::Bid, -150, NO_PEG_LIMIT, 4),
            ],
        );
        add_tree(&mut bids, BookSideOrderTree::Fixed, vec![fixed_leaf(Side::Bid, 5, 5)]);
        let bids = leak(bids);
        // only the -30 offset is representable at an oracle price of 100
        assert_eq!(prices(bids.iter_all_including_invalid(0, Some(100))), vec![70, 5]);
    }

    #[test]
    fn test_valid_order_after_skipped_one_is_not_lost() {
        let mut asks = BookSide::new(OrderTreeType::Asks);
        add_tree(
            &mut asks,
            BookSideOrderTree::OraclePegged,
            vec![
                pegged_leaf(Side::Ask, -500, NO_PEG_LIMIT, 1),
                pegged_leaf(Side::Ask, -10, NO_PEG_LIMIT, 2),
                pegged_leaf(Side::Ask, 10, NO_PEG_LIMIT, 3),
            ],
        );
        let asks = leak(asks);
        assert_eq!(prices(asks.iter_all_including_invalid(0, Some(100))), vec![90, 110]);
    }

    #[test]
    fn test_iter_valid_filters_invalid_and_expired() {
        let mut asks = BookSide::new(OrderTreeType::Asks);
        let mut expiring = fixed_leaf(Side::Ask, 10, 1);
        expiring.timestamp = 100;
        expiring.time_in_force = 10;
        add_tree(
            &mut asks,
            BookSideOrderTree::Fixed,
            vec![expiring, fixed_leaf(Side::Ask, 30, 2)],
        );
        add_tree(
            &mut asks,
            BookSideOrderTree::OraclePegged,
            vec![pegged_leaf(Side::Ask, -80, 25, 3)],
        );
        let asks = leak(asks);

        let all: Vec<_> = asks.iter_all_including_invalid(110, Some(100)).collect();
        assert_eq!(all.len(), 3);
        assert!(all[0].expired && all[0].is_valid());
        assert_eq!((all[1].price_lots, all[1].state), (20, OrderState::Invalid));

        assert_eq!(prices(asks.iter_valid(110, Some(100))), vec![30]);
        assert_eq!(asks.best_price(110, Some(100)), Some(30));
        assert_eq!(asks.best_price(109, Some(100)), Some(10));
    }

    #[test]
    fn test_fixed_order_with_bad_price_data_is_invalid() {
        let mut asks = BookSide::new(OrderTreeType::Asks);
        let mut zero = fixed_leaf(Side::Ask, 1, 1);
        zero.key = new_node_key(Side::Ask, 0, 1);
        add_tree(&mut asks, BookSideOrderTree::Fixed, vec![zero]);
        let asks = leak(asks);

        let item = asks.iter_all_including_invalid(0, None).next().unwrap();
        assert_eq!(item.state, OrderState::Invalid);
        assert_eq!(asks.best_price(0, None), None);
    }

    #[test]
    fn test_empty_book_side() {
        let bids = BookSide::new(OrderTreeType::Bids);
        assert!(bids.is_empty());
        assert_eq!(bids.iter_all_including_invalid(0, Some(10)).count(), 0);
        assert_eq!(BookSideOrderTree::try_from(1u8).unwrap(), BookSideOrderTree::OraclePegged);
    }
}
