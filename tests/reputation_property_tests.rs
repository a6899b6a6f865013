//! Property-based tests for the reputation score arithmetic and the
//! rating eligibility picker
//!
//! Both are pure functions, so proptest can sweep them without touching a
//! database. Score arithmetic feeds every rating the ledger records;
//! the picker decides which exchange a one-click rating binds to.

use linkswap::{
    eligibility::pick_eligible,
    record::{Exchange, ExchangeStatus, TimeStamp},
    reputation::{
        COMPLETED_DELTA, NOT_COMPLETED_DELTA, SCORE_MAX, SCORE_MIN, apply_delta, clamp_score,
        delta_for,
    },
};
use proptest::prelude::*;
use std::collections::HashSet;

// These property tests cover:
//
// 1. Scores never escape [SCORE_MIN, SCORE_MAX]
// 2. Completed ratings never lower a score, failed ones never raise it
// 3. Clamping is idempotent and in-range scores pass through untouched
// 4. The picker never returns a rated or foreign candidate
// 5. The picker's choice is maximal by (updated_at, created_at)
//
// What these tests DON'T cover (deliberately):
//
// - The atomic rating + score transaction (integration scenarios)
// - Session and party validation on rating submission (service layer)
//

fn status_strategy() -> impl Strategy<Value = ExchangeStatus> {
    prop_oneof![
        Just(ExchangeStatus::Pending),
        Just(ExchangeStatus::Accepted),
        Just(ExchangeStatus::Completed),
    ]
}

/// Exchanges between one fixed pair with generated timestamps, ids
/// `exch_0..exch_n`.
fn candidate_strategy() -> impl Strategy<Value = Vec<Exchange>> {
    prop::collection::vec(
        (0u32..1000, 0u32..1000, status_strategy()),
        0..=8,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (created, updated, status))| Exchange {
                id: format!("exch_{i}"),
                requester_link_id: "link_a".to_string(),
                provider_link_id: "link_b".to_string(),
                requester_user_id: "user_a".to_string(),
                provider_user_id: "user_b".to_string(),
                status,
                notes: None,
                created_at: TimeStamp::new_with(2025, 1, 1, 0, created % 60, created / 60),
                updated_at: TimeStamp::new_with(2025, 1, 2, 0, updated % 60, updated / 60),
            })
            .collect()
    })
}

/// Mark a random subset of `exch_0..exch_8` as already rated.
fn rated_strategy() -> impl Strategy<Value = HashSet<String>> {
    prop::collection::hash_set((0u32..8).prop_map(|i| format!("exch_{i}")), 0..=6)
}

proptest! {
    /// Whatever the starting score, one rating lands inside the band.
    #[test]
    fn scores_stay_in_band(score in -500i64..600, completed in any::<bool>()) {
        let next = apply_delta(score, completed);
        prop_assert!((SCORE_MIN..=SCORE_MAX).contains(&next));
    }

    /// A completed verdict never lowers a clamped score, a failed one
    /// never raises it.
    #[test]
    fn delta_direction_matches_verdict(score in SCORE_MIN..=SCORE_MAX, completed in any::<bool>()) {
        let next = apply_delta(score, completed);
        if completed {
            prop_assert!(next >= score);
            prop_assert!(next - score <= COMPLETED_DELTA);
        } else {
            prop_assert!(next <= score);
            prop_assert!(score - next <= -NOT_COMPLETED_DELTA);
        }
    }

    /// Clamping twice is clamping once, and in-range values are untouched.
    #[test]
    fn clamp_is_idempotent(score in -500i64..600) {
        let once = clamp_score(score);
        prop_assert_eq!(clamp_score(once), once);
        if (SCORE_MIN..=SCORE_MAX).contains(&score) {
            prop_assert_eq!(once, score);
        }
    }

    /// The verdict deltas are exactly the two published constants.
    #[test]
    fn delta_for_is_total(completed in any::<bool>()) {
        let delta = delta_for(completed);
        prop_assert_eq!(delta, if completed { COMPLETED_DELTA } else { NOT_COMPLETED_DELTA });
    }

    /// The picker never offers a candidate the viewer already rated, and
    /// returns `None` exactly when everything is rated (or empty).
    #[test]
    fn picker_skips_rated(candidates in candidate_strategy(), rated in rated_strategy()) {
        let unrated = candidates.iter().filter(|e| !rated.contains(&e.id)).count();
        match pick_eligible(candidates, &rated) {
            Some(picked) => {
                prop_assert!(unrated > 0);
                prop_assert!(!rated.contains(&picked.id));
            }
            None => prop_assert_eq!(unrated, 0),
        }
    }

    /// The pick is maximal: no surviving candidate sorts after it by
    /// (updated_at, created_at).
    #[test]
    fn picker_prefers_most_recent(candidates in candidate_strategy(), rated in rated_strategy()) {
        if let Some(picked) = pick_eligible(candidates.clone(), &rated) {
            for other in candidates.iter().filter(|e| !rated.contains(&e.id)) {
                let ordering = other
                    .updated_at
                    .cmp(&picked.updated_at)
                    .then(other.created_at.cmp(&picked.created_at));
                prop_assert!(ordering != std::cmp::Ordering::Greater);
            }
        }
    }
}
