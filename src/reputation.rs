//! Reputation ledger: append-only ratings and the trust score they drive.

use crate::error::{Result, ValidationError};
use crate::record::{ExchangeStatus, Rating, TimeStamp};
use crate::session::Session;
use crate::store::Store;
use crate::utils;
use std::sync::Arc;

pub const STARTING_SCORE: i64 = 100;
pub const SCORE_MIN: i64 = 0;
pub const SCORE_MAX: i64 = 100;
pub const COMPLETED_DELTA: i64 = 5;
pub const NOT_COMPLETED_DELTA: i64 = -10;

pub fn delta_for(completed: bool) -> i64 {
    if completed {
        COMPLETED_DELTA
    } else {
        NOT_COMPLETED_DELTA
    }
}

pub fn clamp_score(score: i64) -> i64 {
    score.clamp(SCORE_MIN, SCORE_MAX)
}

/// What one rating does to a score, clamp included.
pub fn apply_delta(score: i64, completed: bool) -> i64 {
    clamp_score(score + delta_for(completed))
}

pub struct Ledger {
    store: Arc<Store>,
}

impl Ledger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Record a completion verdict for a counterparty. The rating insert,
    /// the (rater, exchange) uniqueness key and the rated user's score
    /// update are applied by the store as one atomic unit; a duplicate
    /// pair fails with `DuplicateRating` and changes nothing.
    pub fn submit_rating(
        &self,
        session: &Session,
        rated_user_id: &str,
        exchange_id: Option<&str>,
        completed: bool,
        notes: Option<&str>,
    ) -> Result<Rating> {
        let rater = self.store.require_active_user(&session.user_id)?;

        if rater.id == rated_user_id {
            return Err(ValidationError::SelfRating.into());
        }

        if let Some(exchange_id) = exchange_id {
            let exchange = self.store.require_exchange(exchange_id)?;
            if exchange.status == ExchangeStatus::Cancelled {
                return Err(ValidationError::ExchangeNotRatable.into());
            }
            // The rater must be on the exchange and the rated user must be
            // the counterpart.
            match exchange.counterpart_of(&rater.id) {
                Some(counterpart) if counterpart == rated_user_id => {}
                _ => return Err(ValidationError::NotAParty.into()),
            }
        }

        let rating = Rating {
            id: utils::mint_id(utils::RATING_HRP),
            rated_user_id: rated_user_id.to_string(),
            rater_user_id: rater.id.clone(),
            exchange_id: exchange_id.map(str::to_string),
            completed_their_part: completed,
            notes: notes.map(str::to_string).filter(|s| !s.is_empty()),
            created_at: TimeStamp::new(),
        };

        let rated = self.store.record_rating(&rating, delta_for(completed))?;
        log::info!(
            "rating {} by {} on {}: completed={} score now {}",
            rating.id,
            rater.id,
            rated_user_id,
            completed,
            rated.reputation_score
        );

        Ok(rating)
    }

    /// Ratings received by a user, newest first.
    pub fn history_for(&self, user_id: &str) -> Result<Vec<Rating>> {
        let mut ratings = self
            .store
            .scan_ratings(|r| r.rated_user_id == user_id)?;
        ratings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(ratings)
    }

    /// Ratings a user has handed out.
    pub fn ratings_by(&self, rater_id: &str) -> Result<Vec<Rating>> {
        self.store.scan_ratings(|r| r.rater_user_id == rater_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_and_clamp() {
        assert_eq!(apply_delta(100, true), 100);
        assert_eq!(apply_delta(90, true), 95);
        assert_eq!(apply_delta(100, false), 90);
        assert_eq!(apply_delta(5, false), 0);
        assert_eq!(apply_delta(0, false), 0);
    }
}
