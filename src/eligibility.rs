//! Rating eligibility resolver.
//!
//! For a viewer looking at a counterpart's conversation, decide which
//! exchange (if any) a new one-click rating would apply to. Re-run on
//! every render; reads only, no caching.

use crate::error::Result;
use crate::record::{Exchange, ExchangeStatus};
use crate::store::Store;
use std::collections::HashSet;

/// Candidates are every non-cancelled exchange between the pair, minus
/// those the viewer has already rated; of the remainder the most recently
/// updated wins (tie-break on creation time). Pending exchanges count as
/// ratable, matching the live behaviour of the marketplace this models.
pub fn eligible_exchange_to_rate(
    store: &Store,
    viewer_id: &str,
    other_user_id: &str,
) -> Result<Option<Exchange>> {
    let candidates = store.scan_exchanges(|e| {
        e.is_between(viewer_id, other_user_id) && e.status != ExchangeStatus::Cancelled
    })?;

    let rated: HashSet<String> = store
        .scan_ratings(|r| r.rater_user_id == viewer_id)?
        .into_iter()
        .filter_map(|r| r.exchange_id)
        .collect();

    Ok(pick_eligible(candidates, &rated))
}

/// Pure selection over an already-filtered candidate set.
pub fn pick_eligible(candidates: Vec<Exchange>, rated: &HashSet<String>) -> Option<Exchange> {
    candidates
        .into_iter()
        .filter(|e| !rated.contains(&e.id))
        .max_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then(a.created_at.cmp(&b.created_at))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TimeStamp;
    use crate::utils;

    fn exchange(requester: &str, provider: &str, status: ExchangeStatus) -> Exchange {
        let now = TimeStamp::new();
        Exchange {
            id: utils::mint_id(utils::EXCHANGE_HRP),
            requester_link_id: utils::mint_id(utils::LINK_HRP),
            provider_link_id: utils::mint_id(utils::LINK_HRP),
            requester_user_id: requester.to_string(),
            provider_user_id: provider.to_string(),
            status,
            notes: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn rated_exchanges_are_never_offered() {
        let a = exchange("u1", "u2", ExchangeStatus::Completed);
        let b = exchange("u1", "u2", ExchangeStatus::Completed);

        let mut rated = HashSet::new();
        rated.insert(b.id.clone());

        let picked = pick_eligible(vec![a.clone(), b], &rated).unwrap();
        assert_eq!(picked.id, a.id);
    }

    #[test]
    fn most_recently_updated_wins() {
        let mut older = exchange("u1", "u2", ExchangeStatus::Accepted);
        older.updated_at = TimeStamp::new_with(2025, 1, 1, 0, 0, 0);
        let mut newer = exchange("u1", "u2", ExchangeStatus::Accepted);
        newer.updated_at = TimeStamp::new_with(2025, 6, 1, 0, 0, 0);

        let picked = pick_eligible(vec![older, newer.clone()], &HashSet::new()).unwrap();
        assert_eq!(picked.id, newer.id);
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert!(pick_eligible(vec![], &HashSet::new()).is_none());
    }
}
