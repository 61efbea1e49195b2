use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use solana_program::pubkey::Pubkey;

use crate::error::{check_assert, BookErrorCode, BookResult, SourceFileId};

declare_check_assert_macros!(SourceFileId::State);

/// Fees are expressed in parts per million.
pub const FEES_SCALE_FACTOR: i128 = 1_000_000;

/// Read-only market configuration handed over by the state loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    /// Name. Trailing zero bytes are ignored.
    pub name: [u8; 16],

    /// Number of decimals used for the base token.
    ///
    /// Used to convert the oracle's price into a native/native price.
    pub base_decimals: u8,
    pub quote_decimals: u8,

    /// No expiry = 0. Market will expire and no trading allowed after time_expiry
    pub time_expiry: i64,

    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,

    /// Address of the BookSide account for bids
    pub bids: Pubkey,
    /// Address of the BookSide account for asks
    pub asks: Pubkey,

    /// Number of quote native in a quote lot. Must be a power of 10.
    ///
    /// A lot price of 1 becomes a native price of quote_lot_size/base_lot_size.
    pub quote_lot_size: i64,

    /// Number of base native in a base lot. Must be a power of 10.
    pub base_lot_size: i64,

    /// Total number of orders seen
    pub seq_num: u64,

    /// Fee (in 10^-6) when matching maker orders.
    /// maker_fee < 0 it means some of the taker_fees goes to the maker
    /// maker_fee > 0, it means no taker_fee to the maker, and maker fee goes to the referral
    pub maker_fee: i64,
    /// Fee (in 10^-6) for taker orders, always >= 0.
    pub taker_fee: i64,
}

impl Market {
    /// Largest base lot amount whose native value fits an i64.
    pub fn max_base_lots(&self) -> i64 {
        i64::MAX / self.base_lot_size
    }

    /// Largest quote lot amount whose native value fits an i64.
    pub fn max_quote_lots(&self) -> i64 {
        i64::MAX / self.quote_lot_size
    }

    pub fn base_lots_to_native(&self, base_lots: i64) -> u64 {
        (base_lots.max(0) as u64).saturating_mul(self.base_lot_size as u64)
    }

    pub fn quote_lots_to_native(&self, quote_lots: i64) -> u64 {
        (quote_lots.max(0) as u64).saturating_mul(self.quote_lot_size as u64)
    }

    /// Converts a native/native oracle price to a price in lots.
    ///
    /// The conversion has to be exact: a price that does not land on a whole
    /// number of quote lots per base lot is rejected.
    pub fn native_price_to_lot(&self, price: Decimal) -> BookResult<i64> {
        let invalid = || throw_err!(BookErrorCode::InvalidOraclePrice);
        let native = price.checked_mul(Decimal::from(self.base_lot_size)).ok_or_else(invalid)?;
        let quote_lot_size = Decimal::from(self.quote_lot_size);

        check!(native.fract().is_zero(), BookErrorCode::InvalidOraclePrice)?;
        let remainder = native.checked_rem(quote_lot_size).ok_or_else(invalid)?;
        check!(remainder.is_zero(), BookErrorCode::InvalidOraclePrice)?;

        native.checked_div(quote_lot_size).and_then(|lots| lots.to_i64()).ok_or_else(invalid)
    }

    /// Largest quote amount that, once taker fees are added, stays within
    /// `quote`. Rounds down.
    pub fn subtract_taker_fees(&self, quote: i64) -> i64 {
        let reduced =
            (quote as i128) * FEES_SCALE_FACTOR / (FEES_SCALE_FACTOR + self.taker_fee as i128);
        reduced as i64
    }

    /// Rebate credited to makers for a fill of `amount` native quote.
    ///
    /// Positive maker fees go to referrers, so there is nothing to rebate.
    pub fn maker_rebate_floor(&self, amount: u64) -> u64 {
        if self.maker_fee > 0 {
            0
        } else {
            self.unsigned_maker_fees_floor(amount)
        }
    }

    pub fn unsigned_maker_fees_floor(&self, amount: u64) -> u64 {
        let fees = (amount as u128) * (self.maker_fee.unsigned_abs() as u128)
            / (FEES_SCALE_FACTOR as u128);
        u64::try_from(fees).unwrap_or(u64::MAX)
    }
}
