//! Referral link operations: publish, browse, owner mutations, soft
//! delete.

use crate::error::{MarketError, Result};
use crate::record::{LinkDraft, LinkStatus, ReferralLink, TimeStamp};
use crate::session::Session;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Links {
    store: Arc<Store>,
}

impl Links {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Publish a validated draft under the caller's ownership.
    pub fn publish(&self, session: &Session, draft: LinkDraft) -> Result<ReferralLink> {
        let owner = self.store.require_active_user(&session.user_id)?;
        let link = draft
            .validate_and_build(&owner.id)
            .map_err(MarketError::Validation)?;
        self.store.put_link(&link)?;

        log::info!("link {} published by {}", link.id, owner.id);
        Ok(link)
    }

    /// The browse view: every offerable link, ranked by the owner's
    /// reputation so trustworthy counterparties surface first, newest
    /// first within a score.
    pub fn browse(&self) -> Result<Vec<ReferralLink>> {
        let links = self.store.scan_links(|l| l.is_offerable())?;

        let mut scores: HashMap<String, i64> = HashMap::new();
        for link in &links {
            if !scores.contains_key(&link.user_id) {
                let score = self
                    .store
                    .get_user(&link.user_id)?
                    .map_or(0, |u| u.reputation_score);
                scores.insert(link.user_id.clone(), score);
            }
        }

        let mut links = links;
        links.sort_by(|a, b| {
            scores[&b.user_id]
                .cmp(&scores[&a.user_id])
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(links)
    }

    /// The caller's own links, soft-deleted ones excluded, newest first.
    pub fn mine(&self, session: &Session) -> Result<Vec<ReferralLink>> {
        let owner = self.store.require_active_user(&session.user_id)?;
        let mut links = self
            .store
            .scan_links(|l| l.user_id == owner.id && !l.is_deleted())?;
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(links)
    }

    /// Owner-only status change (active / paused / fulfilled).
    pub fn set_status(
        &self,
        session: &Session,
        link_id: &str,
        status: LinkStatus,
    ) -> Result<ReferralLink> {
        let owner = self.store.require_active_user(&session.user_id)?;
        let link = self.store.require_link(link_id)?;
        if link.user_id != owner.id {
            return Err(MarketError::Unauthenticated);
        }

        // swap loop: a concurrent counter bump on this link must survive
        self.store.update_link(link_id, |link| {
            link.status = status;
            link.updated_at = TimeStamp::new();
        })
    }

    /// Soft delete by the owner or an admin. The record stays for audit
    /// with who removed it and why.
    pub fn soft_delete(
        &self,
        session: &Session,
        link_id: &str,
        reason: &str,
    ) -> Result<ReferralLink> {
        let actor = self.store.require_active_user(&session.user_id)?;
        let link = self.store.require_link(link_id)?;
        if link.user_id != actor.id && !actor.is_admin {
            return Err(MarketError::Unauthenticated);
        }

        let link = self.store.update_link(link_id, |link| {
            link.deleted_at = Some(TimeStamp::new());
            link.deleted_by = Some(actor.id.clone());
            link.delete_reason = Some(reason.to_string()).filter(|s| !s.is_empty());
            link.updated_at = TimeStamp::new();
        })?;

        log::info!("link {} soft-deleted by {}", link_id, actor.id);
        Ok(link)
    }
}
