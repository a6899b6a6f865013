//! Exchange lifecycle state machine and its service layer.
//!
//! `pending -> accepted -> completed` with `cancelled` reachable from both
//! non-terminal states. The pure transition table lives in
//! [`plan_transition`]; the service wraps it with actor resolution, the
//! store's compare-and-swap and the notification messages each transition
//! owes the counterparty.

use crate::error::{MarketError, Result, ValidationError};
use crate::record::{
    Exchange, ExchangeStatus, Message, MessageMeta, ReferralLink, Role, TimeStamp, User,
};
use crate::session::Session;
use crate::store::Store;
use crate::utils;
use std::sync::Arc;

/// The four mutations a party can ask for on an existing exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAction {
    Accept,
    Decline,
    Cancel,
    Complete,
}

impl SwapAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapAction::Accept => "accept",
            SwapAction::Decline => "decline",
            SwapAction::Cancel => "cancel",
            SwapAction::Complete => "complete",
        }
    }
}

/// The authoritative transition table. Everything outside it is an
/// `InvalidTransition`; in particular nothing ever re-enters `pending`
/// and the terminal states admit no action at all.
pub fn plan_transition(
    status: ExchangeStatus,
    role: Role,
    action: SwapAction,
) -> Result<ExchangeStatus> {
    use ExchangeStatus::*;

    let next = match (action, role, status) {
        (SwapAction::Accept, Role::Provider, Pending) => Accepted,
        (SwapAction::Decline, Role::Provider, Pending) => Cancelled,
        (SwapAction::Cancel, _, Pending | Accepted) => Cancelled,
        (SwapAction::Complete, _, Accepted) => Completed,
        _ => {
            return Err(MarketError::InvalidTransition {
                status,
                action: action.as_str(),
            });
        }
    };
    Ok(next)
}

pub struct ExchangeDesk {
    store: Arc<Store>,
}

impl ExchangeDesk {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Browse flow: open a pending exchange between the requester's link
    /// and the provider's link, and notify the provider with an actionable
    /// request message. Both records are written in one transaction.
    pub fn request(
        &self,
        session: &Session,
        requester_link_id: &str,
        provider_link_id: &str,
        notes: Option<&str>,
    ) -> Result<(Exchange, Message)> {
        let requester = self.store.require_active_user(&session.user_id)?;

        let requester_link = self.store.require_link(requester_link_id)?;
        let provider_link = self.store.require_link(provider_link_id)?;

        if requester_link.user_id != requester.id {
            return Err(MarketError::NotFound(
                "referral link",
                requester_link_id.to_string(),
            ));
        }
        if provider_link.user_id == requester.id {
            return Err(ValidationError::SelfExchange.into());
        }
        if !requester_link.is_offerable() || !provider_link.is_offerable() {
            return Err(ValidationError::LinkNotActive.into());
        }

        let now = TimeStamp::new();
        let exchange = Exchange {
            id: utils::mint_id(utils::EXCHANGE_HRP),
            requester_link_id: requester_link.id.clone(),
            provider_link_id: provider_link.id.clone(),
            requester_user_id: requester.id.clone(),
            provider_user_id: provider_link.user_id.clone(),
            status: ExchangeStatus::Pending,
            notes: notes.map(str::to_string).filter(|s| !s.is_empty()),
            created_at: now.clone(),
            updated_at: now,
        };

        let message = request_message(&requester, &requester_link, &provider_link, &exchange);
        self.store.create_exchange_with_message(&exchange, &message)?;

        log::info!(
            "exchange {} requested by {} against {}",
            exchange.id,
            requester.id,
            provider_link.user_id
        );
        Ok((exchange, message))
    }

    /// Provider accepts a pending request.
    pub fn accept(&self, session: &Session, exchange_id: &str) -> Result<Exchange> {
        self.transition(session, exchange_id, SwapAction::Accept)
    }

    /// Provider declines a pending request.
    pub fn decline(&self, session: &Session, exchange_id: &str) -> Result<Exchange> {
        self.transition(session, exchange_id, SwapAction::Decline)
    }

    /// Either party backs out of a pending or accepted exchange.
    pub fn cancel(&self, session: &Session, exchange_id: &str) -> Result<Exchange> {
        self.transition(session, exchange_id, SwapAction::Cancel)
    }

    /// Either party declares the accepted swap done. Rating becomes
    /// available to both sides through the eligibility resolver.
    pub fn complete(&self, session: &Session, exchange_id: &str) -> Result<Exchange> {
        self.transition(session, exchange_id, SwapAction::Complete)
    }

    fn transition(
        &self,
        session: &Session,
        exchange_id: &str,
        action: SwapAction,
    ) -> Result<Exchange> {
        let actor = self.store.require_active_user(&session.user_id)?;
        let observed = self.store.require_exchange(exchange_id)?;

        // A non-party (including a requester trying to accept their own
        // request) is a rejected transition, not a missing record.
        let role = observed
            .role_of(&actor.id)
            .ok_or(MarketError::InvalidTransition {
                status: observed.status,
                action: action.as_str(),
            })?;
        let next = plan_transition(observed.status, role, action)?;

        let updated =
            self.store
                .transition_exchange(exchange_id, observed.status, next, action.as_str())?;

        log::info!(
            "exchange {} moved {:?} -> {:?} by {} ({})",
            exchange_id,
            observed.status,
            next,
            actor.id,
            action.as_str()
        );

        // Side effects run strictly after the swap has been applied, so a
        // rejected transition never emits a message.
        match action {
            SwapAction::Accept => {
                let msg = update_message(
                    &actor,
                    &updated.requester_user_id,
                    "Exchange Request Accepted",
                    &updated,
                );
                self.store.put_message(&msg)?;
            }
            SwapAction::Decline => {
                let msg = update_message(
                    &actor,
                    &updated.requester_user_id,
                    "Exchange Request Declined",
                    &updated,
                );
                self.store.put_message(&msg)?;
            }
            SwapAction::Cancel => {
                if let Some(other) = updated.counterpart_of(&actor.id) {
                    let msg = update_message(&actor, other, "Exchange Cancelled", &updated);
                    self.store.put_message(&msg)?;
                }
            }
            SwapAction::Complete => {
                self.bump_link_counters(&updated)?;
            }
        }

        Ok(updated)
    }

    // A completed exchange is the one event that consummates both offers.
    // Counter bumps go through the store's swap loop so they cannot drop
    // (or be dropped by) a concurrent owner write on the same link.
    fn bump_link_counters(&self, exchange: &Exchange) -> Result<()> {
        for link_id in [&exchange.requester_link_id, &exchange.provider_link_id] {
            match self.store.update_link(link_id, |link| {
                link.total_exchanges += 1;
                link.updated_at = TimeStamp::new();
            }) {
                Ok(_) | Err(MarketError::NotFound(..)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn request_message(
    requester: &User,
    requester_link: &ReferralLink,
    provider_link: &ReferralLink,
    exchange: &Exchange,
) -> Message {
    let mut content = format!(
        "**New Exchange Request**\n\n{} wants to swap referral links with you!\n\n\
         **Exchange Details:**\n\
         - Their link: {}\n\
         - Your link: {}",
        requester.display_name(),
        requester_link.service_name,
        provider_link.service_name,
    );
    if let Some(notes) = &exchange.notes {
        content.push_str(&format!("\n- Message: \"{notes}\""));
    }
    content.push_str(&format!(
        "\n\n**Links:**\n- Their referral: {}\n- Your referral: {}",
        requester_link.referral_url, provider_link.referral_url,
    ));

    Message {
        id: utils::mint_id(utils::MESSAGE_HRP),
        sender_id: requester.id.clone(),
        receiver_id: provider_link.user_id.clone(),
        content,
        proof_url: None,
        is_read: false,
        metadata: Some(MessageMeta::Request {
            exchange_id: exchange.id.clone(),
            requester_link_id: requester_link.id.clone(),
            provider_link_id: provider_link.id.clone(),
        }),
        created_at: TimeStamp::new(),
    }
}

fn update_message(sender: &User, receiver_id: &str, headline: &str, exchange: &Exchange) -> Message {
    Message {
        id: utils::mint_id(utils::MESSAGE_HRP),
        sender_id: sender.id.clone(),
        receiver_id: receiver_id.to_string(),
        content: format!("**{}**\n\nby {}", headline, sender.display_name()),
        proof_url: None,
        is_read: false,
        metadata: Some(MessageMeta::Update {
            exchange_id: exchange.id.clone(),
            status: exchange.status,
        }),
        created_at: TimeStamp::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_is_provider_only() {
        let err = plan_transition(ExchangeStatus::Pending, Role::Requester, SwapAction::Accept)
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));

        let next = plan_transition(ExchangeStatus::Pending, Role::Provider, SwapAction::Accept)
            .unwrap();
        assert_eq!(next, ExchangeStatus::Accepted);
    }

    #[test]
    fn terminal_states_reject_everything() {
        for status in [ExchangeStatus::Completed, ExchangeStatus::Cancelled] {
            for role in [Role::Requester, Role::Provider] {
                for action in [
                    SwapAction::Accept,
                    SwapAction::Decline,
                    SwapAction::Cancel,
                    SwapAction::Complete,
                ] {
                    assert!(plan_transition(status, role, action).is_err());
                }
            }
        }
    }
}
