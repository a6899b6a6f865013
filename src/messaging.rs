//! Messaging: sending, conversation grouping, read state, and the
//! derivation of actionable controls from the live exchange.
//!
//! A message's stored metadata only identifies the exchange it talks
//! about. Which buttons the viewer may see is recomputed against the live
//! exchange every time ([`actions_for`]) — messages are immutable once
//! sent, exchanges are not, and two rapid accept/decline races would
//! otherwise leave stale controls on screen.

use crate::error::{MarketError, Result, ValidationError};
use crate::record::{Exchange, ExchangeStatus, Message, MessageMeta, TimeStamp, User};
use crate::session::Session;
use crate::store::Store;
use crate::utils;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Accept,
    Decline,
    SendProof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVariant {
    Default,
    Destructive,
}

/// A control the viewer's client may render under a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub label: &'static str,
    pub variant: ActionVariant,
}

const ACCEPT: Action = Action {
    kind: ActionKind::Accept,
    label: "Accept Exchange",
    variant: ActionVariant::Default,
};
const DECLINE: Action = Action {
    kind: ActionKind::Decline,
    label: "Decline",
    variant: ActionVariant::Destructive,
};
const SEND_PROOF: Action = Action {
    kind: ActionKind::SendProof,
    label: "Send Proof Screenshot",
    variant: ActionVariant::Default,
};

/// Derive the controls a viewer may use for a message, from the LIVE
/// exchange. A snapshot that no longer matches the live state yields
/// nothing, which is how stale accept/decline buttons disappear after a
/// race.
pub fn actions_for(meta: &MessageMeta, live: &Exchange, viewer_id: &str) -> Vec<Action> {
    if meta.exchange_id() != live.id {
        return Vec::new();
    }

    match meta {
        MessageMeta::Request { .. } => {
            if live.status == ExchangeStatus::Pending && viewer_id == live.provider_user_id {
                vec![ACCEPT, DECLINE]
            } else {
                Vec::new()
            }
        }
        MessageMeta::Update { .. } | MessageMeta::ProofRequest { .. } => {
            if live.status == ExchangeStatus::Accepted && live.role_of(viewer_id).is_some() {
                vec![SEND_PROOF]
            } else {
                Vec::new()
            }
        }
    }
}

/// One conversation from the viewer's perspective: chronological messages
/// and how many of them the viewer has not read.
#[derive(Debug)]
pub struct Conversation {
    pub other_user_id: String,
    pub messages: Vec<Message>,
    pub unread: usize,
}

/// Group a viewer's messages by counterpart. Messages within a
/// conversation are ascending for display; the conversation list itself is
/// ordered by most recent message first. Messages not involving the viewer
/// are skipped.
pub fn group_by_conversation(viewer_id: &str, messages: Vec<Message>) -> Vec<Conversation> {
    let mut grouped: HashMap<String, Vec<Message>> = HashMap::new();
    for message in messages {
        if message.sender_id != viewer_id && message.receiver_id != viewer_id {
            continue;
        }
        let other = message.other_party(viewer_id).to_string();
        grouped.entry(other).or_default().push(message);
    }

    let mut conversations: Vec<Conversation> = grouped
        .into_iter()
        .map(|(other_user_id, mut messages)| {
            messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            let unread = messages
                .iter()
                .filter(|m| m.receiver_id == viewer_id && !m.is_read)
                .count();
            Conversation {
                other_user_id,
                messages,
                unread,
            }
        })
        .collect();

    conversations.sort_by(|a, b| {
        let last_a = a.messages.last().map(|m| &m.created_at);
        let last_b = b.messages.last().map(|m| &m.created_at);
        last_b.cmp(&last_a)
    });
    conversations
}

/// Out-of-band signal for an incoming message (sound, banner, OS toast —
/// whatever the platform offers). Fire and forget: a sink that can't
/// deliver must swallow the failure, never block message flow.
pub trait NotificationSink {
    fn notify(&self, title: &str, body: &str);
}

/// The permission-denied case.
pub struct SilentSink;

impl NotificationSink for SilentSink {
    fn notify(&self, _title: &str, _body: &str) {}
}

/// Format and emit the side-channel notification for a freshly received
/// message: sender's display name plus a 50-character preview.
pub fn notify_incoming(sink: &dyn NotificationSink, sender: Option<&User>, message: &Message) {
    let name = sender.map(User::display_name).unwrap_or("Someone");
    let preview: String = message.content.chars().take(50).collect();
    let body = if message.content.chars().count() > 50 {
        format!("{preview}...")
    } else {
        preview
    };
    sink.notify(&format!("New message from {name}"), &body);
}

pub struct Mailbox {
    store: Arc<Store>,
}

impl Mailbox {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Plain chat message.
    pub fn send(&self, session: &Session, receiver_id: &str, content: &str) -> Result<Message> {
        let sender = self.store.require_active_user(&session.user_id)?;
        self.store.require_user(receiver_id)?;

        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let message = Message {
            id: utils::mint_id(utils::MESSAGE_HRP),
            sender_id: sender.id,
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            proof_url: None,
            is_read: false,
            metadata: None,
            created_at: TimeStamp::new(),
        };
        self.store.put_message(&message)?;
        Ok(message)
    }

    /// Attach proof of a completed referral signup to an accepted
    /// exchange. Only a party may send proof, and only while the exchange
    /// is accepted.
    pub fn send_proof(
        &self,
        session: &Session,
        exchange_id: &str,
        proof_url: &str,
    ) -> Result<Message> {
        let sender = self.store.require_active_user(&session.user_id)?;
        let exchange = self.store.require_exchange(exchange_id)?;

        let receiver_id = match exchange.counterpart_of(&sender.id) {
            Some(other) if exchange.status == ExchangeStatus::Accepted => other.to_string(),
            _ => {
                return Err(MarketError::InvalidTransition {
                    status: exchange.status,
                    action: "send proof for",
                });
            }
        };

        let message = Message {
            id: utils::mint_id(utils::MESSAGE_HRP),
            sender_id: sender.id,
            receiver_id,
            content: "Proof screenshot sent. I've completed my part - please review \
                      and send your proof as well."
                .to_string(),
            proof_url: Some(proof_url.to_string()),
            is_read: false,
            metadata: Some(MessageMeta::ProofRequest {
                exchange_id: exchange.id.clone(),
            }),
            created_at: TimeStamp::new(),
        };
        self.store.put_message(&message)?;
        Ok(message)
    }

    /// Everything the viewer sent or received, newest first.
    pub fn inbox(&self, session: &Session) -> Result<Vec<Message>> {
        let viewer = self.store.require_active_user(&session.user_id)?;
        let mut messages = self
            .store
            .scan_messages(|m| m.sender_id == viewer.id || m.receiver_id == viewer.id)?;
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(messages)
    }

    /// The viewer's conversations, grouped and ordered for display.
    pub fn conversations(&self, session: &Session) -> Result<Vec<Conversation>> {
        let viewer_id = session.user_id.clone();
        let messages = self.inbox(session)?;
        Ok(group_by_conversation(&viewer_id, messages))
    }

    /// Opening a conversation marks that counterpart's messages read —
    /// only theirs, never a global mark-all. Returns how many flipped.
    pub fn mark_conversation_read(&self, session: &Session, other_user_id: &str) -> Result<usize> {
        let viewer = self.store.require_active_user(&session.user_id)?;
        let unread = self.store.scan_messages(|m| {
            m.receiver_id == viewer.id && m.sender_id == other_user_id && !m.is_read
        })?;

        let count = unread.len();
        for mut message in unread {
            message.is_read = true;
            self.store.put_message(&message)?;
        }
        Ok(count)
    }
}
