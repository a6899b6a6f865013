//! Id minting and composite key helpers

use bech32::Bech32m;
use uuid7::uuid7;

pub const USER_HRP: &str = "user_";
pub const LINK_HRP: &str = "link_";
pub const EXCHANGE_HRP: &str = "exch_";
pub const MESSAGE_HRP: &str = "msg_";
pub const RATING_HRP: &str = "rate_";

/// Mint a unique record id: uuid7 payload, bech32-encoded under one of
/// the crate's fixed prefixes. The prefixes above are valid hrps and a
/// uuid payload is far below the bech32 length limit.
pub fn mint_id(hrp: &'static str) -> String {
    let hrp = bech32::Hrp::parse_unchecked(hrp);
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .expect("uuid payload fits the bech32 length limit")
}

/// Uniqueness key for the (rater, exchange) rating constraint. Lives in its
/// own tree so the constraint can be enforced inside the same transaction
/// that inserts the rating.
pub fn rating_key(rater_id: &str, exchange_id: &str) -> String {
    format!("{rater_id}:{exchange_id}")
}
