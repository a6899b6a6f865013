//! Smoke screen unit tests for the marketplace core components.
//!
//! These are unit tests that span the codebase, testing behavior in
//! isolation from the integration scenarios. They are intended as a
//! smoke-screen and generally cover the happy path plus the first layer
//! of rejections.

use linkswap::{
    error::{MarketError, ValidationError},
    links::Links,
    messaging::{
        ActionKind, Mailbox, NotificationSink, actions_for, group_by_conversation,
        notify_incoming,
    },
    record::{
        Exchange, ExchangeStatus, LinkDraft, LinkStatus, Message, MessageMeta, TimeStamp,
        normalize_username, validate_username,
    },
    session::{Accounts, ProfileUpdate},
    store::Store,
    utils,
};
use std::sync::Arc;
use tempfile::tempdir;

fn open_store(name: &str) -> (Arc<Store>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join(name)).unwrap());
    (store, dir)
}

// UTILS MODULE TESTS
mod utils_tests {
    use super::*;

    #[test]
    fn minted_ids_carry_their_prefix() {
        let user_id = utils::mint_id(utils::USER_HRP);
        let link_id = utils::mint_id(utils::LINK_HRP);

        assert!(user_id.starts_with("user_1"));
        assert!(link_id.starts_with("link_1"));
        assert_ne!(utils::mint_id(utils::USER_HRP), user_id);
    }

    #[test]
    fn rating_key_is_pairwise() {
        assert_eq!(utils::rating_key("u1", "e1"), "u1:e1");
        assert_ne!(utils::rating_key("u1", "e2"), utils::rating_key("u1", "e1"));
    }
}

// RECORD / USERNAME TESTS
mod record_tests {
    use super::*;

    #[test]
    fn too_short_usernames_are_rejected() {
        assert!(matches!(
            validate_username("ab"),
            Err(ValidationError::UsernameTooShort)
        ));
    }

    #[test]
    fn uppercase_is_rejected_until_normalized() {
        assert!(matches!(
            validate_username("John_Doe1"),
            Err(ValidationError::UsernameBadChars)
        ));
        assert!(validate_username(&normalize_username("John_Doe1")).is_ok());
    }

    #[test]
    fn draft_builder_trims_and_fills_defaults() {
        let link = LinkDraft::new()
            .set_service_name("  Monzo  ")
            .set_referral_url("https://monzo.com/ref")
            .set_description("a fiver")
            .set_what_i_get("")
            .validate_and_build("user_abc")
            .unwrap();

        assert_eq!(link.service_name, "Monzo");
        assert_eq!(link.status, LinkStatus::Active);
        assert_eq!(link.what_i_get, None);
        assert!(!link.is_deleted());
    }
}

// SESSION / PROFILE TESTS
mod session_tests {
    use super::*;

    #[test]
    fn sign_up_starts_at_full_trust() {
        let (store, _dir) = open_store("signup.db");
        let accounts = Accounts::new(store);

        let (user, session) = accounts.sign_up("dana@example.com", Some("Dana")).unwrap();
        assert_eq!(user.reputation_score, 100);
        assert_eq!(user.total_ratings, 0);
        assert_eq!(session.user_id, user.id);
    }

    #[test]
    fn username_uniqueness_is_enforced() {
        let (store, _dir) = open_store("usernames.db");
        let accounts = Accounts::new(store);

        let (_, first) = accounts.sign_up("a@example.com", None).unwrap();
        let (_, second) = accounts.sign_up("b@example.com", None).unwrap();

        accounts
            .update_profile(
                &first,
                ProfileUpdate {
                    username: Some("John_Doe1"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!accounts.is_username_available("john_doe1").unwrap());

        let err = accounts
            .update_profile(
                &second,
                ProfileUpdate {
                    username: Some("JOHN_doe1"),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::Validation(ValidationError::UsernameTaken)
        ));
    }

    #[test]
    fn banned_users_lose_their_session() {
        let (store, _dir) = open_store("bans.db");
        let accounts = Accounts::new(store.clone());

        let (admin_user, admin) = accounts.sign_up("admin@example.com", None).unwrap();
        let mut admin_user = admin_user;
        admin_user.is_admin = true;
        store.put_user(&admin_user).unwrap();

        let (target, target_session) = accounts.sign_up("spammer@example.com", None).unwrap();
        accounts.ban_user(&admin, &target.id, "spam").unwrap();

        let err = accounts.current_user(&target_session).unwrap_err();
        assert!(matches!(err, MarketError::Unauthenticated));

        accounts.unban_user(&admin, &target.id).unwrap();
        assert!(accounts.current_user(&target_session).is_ok());
    }

    #[test]
    fn heartbeat_touches_last_active() {
        let (store, _dir) = open_store("heartbeat.db");
        let accounts = Accounts::new(store.clone());

        let (user, session) = accounts.sign_up("hb@example.com", None).unwrap();
        assert!(user.last_active.is_none());

        accounts.heartbeat(&session).unwrap();
        assert!(store.require_user(&user.id).unwrap().last_active.is_some());
    }
}

// LINKS TESTS
mod links_tests {
    use super::*;

    #[test]
    fn browse_hides_paused_and_deleted_links() {
        let (store, _dir) = open_store("browse.db");
        let accounts = Accounts::new(store.clone());
        let links = Links::new(store);

        let (_, owner) = accounts.sign_up("owner@example.com", None).unwrap();

        let active = links
            .publish(
                &owner,
                LinkDraft::new()
                    .set_service_name("Monzo")
                    .set_referral_url("https://monzo.com/r")
                    .set_description("a fiver"),
            )
            .unwrap();
        let paused = links
            .publish(
                &owner,
                LinkDraft::new()
                    .set_service_name("Revolut")
                    .set_referral_url("https://revolut.com/r")
                    .set_description("a tenner"),
            )
            .unwrap();
        let deleted = links
            .publish(
                &owner,
                LinkDraft::new()
                    .set_service_name("N26")
                    .set_referral_url("https://n26.com/r")
                    .set_description("nothing much"),
            )
            .unwrap();

        links.set_status(&owner, &paused.id, LinkStatus::Paused).unwrap();
        links.soft_delete(&owner, &deleted.id, "outdated").unwrap();

        let visible = links.browse().unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, active.id);

        // owner still sees the paused link under "mine", not the deleted
        // one
        let mine = links.mine(&owner).unwrap();
        assert_eq!(mine.len(), 2);
    }

    #[test]
    fn browse_ranks_by_owner_reputation() {
        let (store, _dir) = open_store("browse_rank.db");
        let accounts = Accounts::new(store.clone());
        let links = Links::new(store.clone());

        let (high_user, high) = accounts.sign_up("high@example.com", None).unwrap();
        let (low_user, low) = accounts.sign_up("low@example.com", None).unwrap();

        // published first, so a recency-only ordering would bury it
        let high_link = links
            .publish(
                &high,
                LinkDraft::new()
                    .set_service_name("Monzo")
                    .set_referral_url("https://monzo.com/r")
                    .set_description("a fiver"),
            )
            .unwrap();
        let low_link = links
            .publish(
                &low,
                LinkDraft::new()
                    .set_service_name("Revolut")
                    .set_referral_url("https://revolut.com/r")
                    .set_description("a tenner"),
            )
            .unwrap();

        store
            .update_user(&low_user.id, |u| u.reputation_score = 40)
            .unwrap();

        let visible = links.browse().unwrap();
        assert_eq!(visible[0].id, high_link.id);
        assert_eq!(visible[1].id, low_link.id);
        assert_eq!(
            store.require_user(&high_user.id).unwrap().reputation_score,
            100
        );
    }

    #[test]
    fn only_the_owner_mutates_a_link() {
        let (store, _dir) = open_store("ownership.db");
        let accounts = Accounts::new(store.clone());
        let links = Links::new(store);

        let (_, owner) = accounts.sign_up("owner@example.com", None).unwrap();
        let (_, stranger) = accounts.sign_up("other@example.com", None).unwrap();

        let link = links
            .publish(
                &owner,
                LinkDraft::new()
                    .set_service_name("Monzo")
                    .set_referral_url("https://monzo.com/r")
                    .set_description("a fiver"),
            )
            .unwrap();

        let err = links
            .set_status(&stranger, &link.id, LinkStatus::Fulfilled)
            .unwrap_err();
        assert!(matches!(err, MarketError::Unauthenticated));
    }
}

// MESSAGING TESTS
mod messaging_tests {
    use super::*;
    use std::cell::RefCell;

    fn message(id: &str, from: &str, to: &str, read: bool, at: TimeStamp<chrono::Utc>) -> Message {
        Message {
            id: id.to_string(),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            content: format!("hello from {from}"),
            proof_url: None,
            is_read: read,
            metadata: None,
            created_at: at,
        }
    }

    #[test]
    fn grouping_orders_conversations_by_recency() {
        let t1 = TimeStamp::new_with(2025, 3, 1, 9, 0, 0);
        let t2 = TimeStamp::new_with(2025, 3, 1, 10, 0, 0);
        let t3 = TimeStamp::new_with(2025, 3, 1, 11, 0, 0);

        let messages = vec![
            message("m1", "bob", "alice", false, t1.clone()),
            message("m2", "alice", "carol", true, t3),
            message("m3", "alice", "bob", true, t2),
            // not alice's conversation at all
            message("m4", "bob", "carol", false, t1),
        ];

        let conversations = group_by_conversation("alice", messages);
        assert_eq!(conversations.len(), 2);
        // carol's thread has the most recent message
        assert_eq!(conversations[0].other_user_id, "carol");
        assert_eq!(conversations[1].other_user_id, "bob");

        let bob_thread = &conversations[1];
        assert_eq!(bob_thread.unread, 1);
        // ascending within the conversation
        assert_eq!(bob_thread.messages[0].id, "m1");
        assert_eq!(bob_thread.messages[1].id, "m3");
    }

    #[test]
    fn mark_read_is_scoped_to_one_counterpart() {
        let (store, _dir) = open_store("mark_read.db");
        let accounts = Accounts::new(store.clone());
        let mailbox = Mailbox::new(store);

        let (alice, alice_s) = accounts.sign_up("alice@example.com", None).unwrap();
        let (bob, bob_s) = accounts.sign_up("bob@example.com", None).unwrap();
        let (carol, carol_s) = accounts.sign_up("carol@example.com", None).unwrap();

        mailbox.send(&bob_s, &alice.id, "hi from bob").unwrap();
        mailbox.send(&carol_s, &alice.id, "hi from carol").unwrap();

        let flipped = mailbox.mark_conversation_read(&alice_s, &bob.id).unwrap();
        assert_eq!(flipped, 1);

        let conversations = mailbox.conversations(&alice_s).unwrap();
        let carol_thread = conversations
            .iter()
            .find(|c| c.other_user_id == carol.id)
            .unwrap();
        assert_eq!(carol_thread.unread, 1);
        let bob_thread = conversations
            .iter()
            .find(|c| c.other_user_id == bob.id)
            .unwrap();
        assert_eq!(bob_thread.unread, 0);
    }

    #[test]
    fn empty_messages_are_rejected() {
        let (store, _dir) = open_store("empty_msg.db");
        let accounts = Accounts::new(store.clone());
        let mailbox = Mailbox::new(store);

        let (_, alice) = accounts.sign_up("alice@example.com", None).unwrap();
        let (bob, _) = accounts.sign_up("bob@example.com", None).unwrap();

        let err = mailbox.send(&alice, &bob.id, "   ").unwrap_err();
        assert!(matches!(
            err,
            MarketError::Validation(ValidationError::EmptyMessage)
        ));
    }

    #[test]
    fn stale_request_snapshot_yields_no_actions() {
        let now = TimeStamp::new();
        let exchange = Exchange {
            id: "exch_x".to_string(),
            requester_link_id: "link_a".to_string(),
            provider_link_id: "link_b".to_string(),
            requester_user_id: "alice".to_string(),
            provider_user_id: "bob".to_string(),
            status: ExchangeStatus::Cancelled,
            notes: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let meta = MessageMeta::Request {
            exchange_id: "exch_x".to_string(),
            requester_link_id: "link_a".to_string(),
            provider_link_id: "link_b".to_string(),
        };

        // the message still says "request", but the live exchange moved on
        assert!(actions_for(&meta, &exchange, "bob").is_empty());

        // and a pending request never offers controls to the requester
        let mut pending = exchange.clone();
        pending.status = ExchangeStatus::Pending;
        assert!(actions_for(&meta, &pending, "alice").is_empty());
        assert_eq!(
            actions_for(&meta, &pending, "bob")
                .iter()
                .map(|a| a.kind)
                .collect::<Vec<_>>(),
            vec![ActionKind::Accept, ActionKind::Decline]
        );
    }

    struct Recorder(RefCell<Vec<(String, String)>>);

    impl NotificationSink for Recorder {
        fn notify(&self, title: &str, body: &str) {
            self.0.borrow_mut().push((title.to_string(), body.to_string()));
        }
    }

    #[test]
    fn incoming_notifications_use_name_and_preview() {
        let long_body = "x".repeat(80);
        let msg = message("m1", "bob", "alice", false, TimeStamp::new());
        let mut msg = msg;
        msg.content = long_body;

        let sink = Recorder(RefCell::new(Vec::new()));
        notify_incoming(&sink, None, &msg);

        let recorded = sink.0.into_inner();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "New message from Someone");
        assert_eq!(recorded[0].1.chars().count(), 53); // 50 + "..."
    }
}
