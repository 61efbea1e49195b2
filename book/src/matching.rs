use log::{debug, trace};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

use crate::bookside::BookSide;
use crate::error::{check_assert, BookErrorCode, BookResult, SourceFileId};
use crate::state::Market;

declare_check_assert_macros!(SourceFileId::Matching);

/// Upper bound on the resting orders a single take can fill.
pub const MAXIMUM_TAKEN_ORDERS: u8 = 45;
/// Owners of skipped (expired or invalid) orders reported per take.
pub const DROP_EXPIRED_ORDER_LIMIT: usize = 5;
/// Owners of filled orders reported per take.
pub const FILL_EVENT_REMAINING_LIMIT: usize = 5;

#[derive(
    Eq, PartialEq, Copy, Clone, TryFromPrimitive, IntoPrimitive, Debug, Serialize, Deserialize,
)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum Side {
    Bid = 0,
    Ask = 1,
}

impl Side {
    pub fn invert_side(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Is `lhs` a better price than `rhs` for an order on this side?
    pub fn is_price_better(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Side::Bid => lhs > rhs,
            Side::Ask => lhs < rhs,
        }
    }
}

/// Read-only view of both sides of a market's book.
#[derive(Clone, Copy)]
pub struct Orderbook<'a> {
    pub bids: &'a BookSide,
    pub asks: &'a BookSide,
}

impl<'a> Orderbook<'a> {
    pub fn bookside(&self, side: Side) -> &'a BookSide {
        match side {
            Side::Bid => self.bids,
            Side::Ask => self.asks,
        }
    }

    /// Best matchable price resting on `side`.
    pub fn best_price(&self, side: Side, now_ts: u64, oracle_price_lots: Option<i64>) -> Option<i64> {
        self.bookside(side).best_price(now_ts, oracle_price_lots)
    }
}

/// Native amounts a taker would receive or pay, plus the maker rebates the fills
/// would generate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amounts {
    pub total_base_taken_native: u64,
    pub total_quote_taken_native: u64,
    pub fee: u64,
    pub not_enough_liquidity: bool,
}

/// Owners a take would touch, each list capped at five entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedAccounts {
    /// owners of expired or invalid orders passed over
    pub dropped_expired: Vec<Pubkey>,
    /// owners of orders that would receive a fill
    pub filled: Vec<Pubkey>,
}

/// Result of walking the opposing book side, in lots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookIteration {
    pub total_base_lots_taken: i64,
    pub total_quote_lots_taken: i64,
    /// rebates owed to makers, native quote
    pub makers_rebates: u64,
    pub not_enough_liquidity: bool,
    pub orders_matched: u8,
    pub accounts: MatchedAccounts,
}

/// Walks the book side opposite to `side` and fills against it, without
/// touching the book.
///
/// Bid takers have taker fees deducted from `max_quote_lots_including_fees`
/// before matching. Expired and invalid orders are passed over without using
/// up one of the `MAXIMUM_TAKEN_ORDERS` match slots.
pub fn iterate_book(
    book: &Orderbook,
    side: Side,
    max_base_lots: i64,
    max_quote_lots_including_fees: i64,
    market: &Market,
    oracle_price_lots: Option<i64>,
    now_ts: u64,
) -> BookResult<BookIteration> {
    check!(max_base_lots >= 0, BookErrorCode::InvalidInputLots)?;
    check!(max_quote_lots_including_fees >= 0, BookErrorCode::InvalidInputLots)?;

    let order_max_base_lots = max_base_lots;
    let order_max_quote_lots = match side {
        Side::Bid => market.subtract_taker_fees(max_quote_lots_including_fees),
        Side::Ask => max_quote_lots_including_fees,
    };

    let mut remaining_base_lots = order_max_base_lots;
    let mut remaining_quote_lots = order_max_quote_lots;
    let mut limit = MAXIMUM_TAKEN_ORDERS;
    let mut makers_rebates: u64 = 0;
    let mut accounts = MatchedAccounts::default();

    let opposing_bookside = book.bookside(side.invert_side());
    for best_opposing in opposing_bookside.iter_all_including_invalid(now_ts, oracle_price_lots) {
        if best_opposing.expired || !best_opposing.is_valid() {
            trace!(
                "passing over order {} of {}: expired {} state {:?}",
                best_opposing.handle.node,
                best_opposing.node.owner,
                best_opposing.expired,
                best_opposing.state
            );
            if accounts.dropped_expired.len() < DROP_EXPIRED_ORDER_LIMIT {
                accounts.dropped_expired.push(best_opposing.node.owner);
            }
            continue;
        }

        if remaining_base_lots == 0 || remaining_quote_lots == 0 || limit == 0 {
            break;
        }

        let best_opposing_price = best_opposing.price_lots;
        let max_match_by_quote = remaining_quote_lots / best_opposing_price;
        if max_match_by_quote == 0 {
            break;
        }

        let match_base_lots = remaining_base_lots
            .min(best_opposing.node.quantity.max(0))
            .min(max_match_by_quote);
        let match_quote_lots = match_base_lots * best_opposing_price;

        let match_quote_native = market.quote_lots_to_native(match_quote_lots);
        makers_rebates = makers_rebates.saturating_add(market.maker_rebate_floor(match_quote_native));

        remaining_base_lots -= match_base_lots;
        remaining_quote_lots -= match_quote_lots;
        limit -= 1;

        if accounts.filled.len() < FILL_EVENT_REMAINING_LIMIT {
            accounts.filled.push(best_opposing.node.owner);
        }
    }

    let not_enough_liquidity = match side {
        Side::Ask => remaining_base_lots != 0,
        Side::Bid => remaining_quote_lots != 0,
    };
    let iteration = BookIteration {
        total_base_lots_taken: order_max_base_lots - remaining_base_lots,
        total_quote_lots_taken: order_max_quote_lots - remaining_quote_lots,
        makers_rebates,
        not_enough_liquidity,
        orders_matched: MAXIMUM_TAKEN_ORDERS - limit,
        accounts,
    };
    debug!(
        "{:?} take matched {} orders: {} base lots, {} quote lots, not enough liquidity {}",
        side,
        iteration.orders_matched,
        iteration.total_base_lots_taken,
        iteration.total_quote_lots_taken,
        iteration.not_enough_liquidity
    );
    Ok(iteration)
}

/// Simulates a market take of up to `max_base_lots` base and
/// `max_quote_lots_including_fees` quote against `book`.
///
/// `oracle_price` is the native/native oracle price; pegged orders are
/// ignored when it is None. It has to convert to a whole number of lots.
pub fn simulate_take(
    book: &Orderbook,
    side: Side,
    max_base_lots: i64,
    max_quote_lots_including_fees: i64,
    market: &Market,
    oracle_price: Option<Decimal>,
    now_ts: u64,
) -> BookResult<(Amounts, MatchedAccounts)> {
    let oracle_price_lots =
        oracle_price.map(|price| market.native_price_to_lot(price)).transpose()?;
    let iteration = iterate_book(
        book,
        side,
        max_base_lots,
        max_quote_lots_including_fees,
        market,
        oracle_price_lots,
        now_ts,
    )?;

    let amounts = Amounts {
        total_base_taken_native: market.base_lots_to_native(iteration.total_base_lots_taken),
        total_quote_taken_native: market.quote_lots_to_native(iteration.total_quote_lots_taken),
        fee: iteration.makers_rebates,
        not_enough_liquidity: iteration.not_enough_liquidity,
    };
    Ok((amounts, iteration.accounts))
}

/// Amounts a take would produce, see `simulate_take`.
pub fn amounts_from_book(
    book: &Orderbook,
    side: Side,
    max_base_lots: i64,
    max_quote_lots_including_fees: i64,
    market: &Market,
    oracle_price: Option<Decimal>,
    now_ts: u64,
) -> BookResult<Amounts> {
    simulate_take(
        book,
        side,
        max_base_lots,
        max_quote_lots_including_fees,
        market,
        oracle_price,
        now_ts,
    )
    .map(|(amounts, _)| amounts)
}
