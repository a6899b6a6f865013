//! Core engine for a peer-to-peer referral link exchange marketplace.
//!
//! Users post referral links, browse each other's offers, negotiate swaps
//! over an in-app messaging channel and rate counterparties once a swap is
//! done. The authoritative piece is the exchange lifecycle
//! (`pending -> accepted -> completed/cancelled`) together with the
//! reputation ledger it gates; everything is persisted in a sled store
//! behind [`store::Store`].

pub mod blob;
pub mod eligibility;
pub mod error;
pub mod exchange;
pub mod links;
pub mod messaging;
pub mod push;
pub mod record;
pub mod reputation;
pub mod session;
pub mod store;
pub mod utils;
