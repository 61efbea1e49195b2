use crate::matching::Side;

/// Added to a signed peg offset so that unsigned comparison of the stored
/// price data orders offsets the same way signed comparison would.
const PEG_OFFSET_BIAS: u64 = u64::MAX / 2 + 1;

/// Packs price data and a sequence number into a tree key.
///
/// Bids store the complement of the sequence number: bid trees are walked
/// from the highest key down, so the complement keeps earlier orders first
/// within one price level on both sides.
pub fn new_node_key(side: Side, price_data: u64, seq_num: u64) -> u128 {
    let seq_num = if side == Side::Bid { !seq_num } else { seq_num };
    let upper = (price_data as u128) << 64;
    upper | (seq_num as u128)
}

/// Price data of a fixed order, None for prices below one lot.
pub fn fixed_price_data(price_lots: i64) -> Option<u64> {
    if price_lots >= 1 {
        Some(price_lots as u64)
    } else {
        None
    }
}

/// Inverse of `fixed_price_data`, None when the data is outside `1..=i64::MAX`.
pub fn fixed_price_lots(price_data: u64) -> Option<i64> {
    if price_data >= 1 && price_data <= i64::MAX as u64 {
        Some(price_data as i64)
    } else {
        None
    }
}

pub fn oracle_pegged_price_data(price_offset_lots: i64) -> u64 {
    (price_offset_lots as u64).wrapping_add(PEG_OFFSET_BIAS)
}

pub fn oracle_pegged_price_offset(price_data: u64) -> i64 {
    price_data.wrapping_sub(PEG_OFFSET_BIAS) as i64
}
