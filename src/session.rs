//! Sessions and user profile operations.
//!
//! Every core operation takes the acting user's session explicitly; there
//! is no ambient current-user lookup anywhere in the crate.

use crate::error::{MarketError, Result, ValidationError};
use crate::record::{TimeStamp, User, normalize_username, validate_username};
use crate::store::Store;
use crate::utils;
use std::sync::Arc;

/// An authenticated principal. Produced by sign-up here; a real deployment
/// would mint it from the auth provider's session token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
}

impl Session {
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
        }
    }
}

/// Fields a user may change on their own profile.
#[derive(Default)]
pub struct ProfileUpdate<'a> {
    pub full_name: Option<&'a str>,
    pub username: Option<&'a str>,
}

pub struct Accounts {
    store: Arc<Store>,
}

impl Accounts {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create a profile with the defaults a fresh account carries: full
    /// trust score, no ratings.
    pub fn sign_up(&self, email: &str, full_name: Option<&str>) -> Result<(User, Session)> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ValidationError::MissingField("email").into());
        }

        let now = TimeStamp::new();
        let user = User {
            id: utils::mint_id(utils::USER_HRP),
            email: email.to_string(),
            full_name: full_name.map(str::to_string).filter(|s| !s.is_empty()),
            username: None,
            reputation_score: crate::reputation::STARTING_SCORE,
            total_ratings: 0,
            last_active: None,
            is_admin: false,
            is_banned: false,
            ban_reason: None,
            banned_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.put_user(&user)?;

        log::info!("signed up {} ({})", user.id, user.email);
        let session = Session::for_user(&user);
        Ok((user, session))
    }

    /// Resolve the session to its user. Banned or missing profiles refuse
    /// the session.
    pub fn current_user(&self, session: &Session) -> Result<User> {
        self.store.require_active_user(&session.user_id)
    }

    /// Update the caller's own profile. Usernames are lowercased before
    /// validation, so "John_Doe1" lands as "john_doe1" if that is free.
    pub fn update_profile(&self, session: &Session, update: ProfileUpdate<'_>) -> Result<User> {
        let user = self.current_user(session)?;

        let username = match update.username {
            Some(raw) => {
                let username = normalize_username(raw);
                validate_username(&username).map_err(MarketError::Validation)?;
                if user.username.as_deref() != Some(&username)
                    && !self.is_username_available(&username)?
                {
                    return Err(ValidationError::UsernameTaken.into());
                }
                Some(username)
            }
            None => None,
        };

        // merge only the profile fields; the reputation ledger may be
        // writing score/total_ratings on this record concurrently
        self.store.update_user(&user.id, |user| {
            if let Some(full_name) = update.full_name {
                user.full_name = Some(full_name.trim().to_string()).filter(|s| !s.is_empty());
            }
            if let Some(username) = &username {
                user.username = Some(username.clone());
            }
            user.updated_at = TimeStamp::new();
        })
    }

    pub fn is_username_available(&self, username: &str) -> Result<bool> {
        Ok(self.store.find_user_by_username(username)?.is_none())
    }

    /// Presence heartbeat; bumps `last_active` and nothing else.
    pub fn heartbeat(&self, session: &Session) -> Result<()> {
        self.current_user(session)?;
        self.store.update_user(&session.user_id, |user| {
            user.last_active = Some(TimeStamp::new());
        })?;
        Ok(())
    }

    /// Admin moderation: ban a user with a recorded reason.
    pub fn ban_user(&self, admin: &Session, user_id: &str, reason: &str) -> Result<User> {
        self.require_admin(admin)?;

        let user = self.store.update_user(user_id, |user| {
            user.is_banned = true;
            user.ban_reason = Some(reason.to_string());
            user.banned_at = Some(TimeStamp::new());
            user.updated_at = TimeStamp::new();
        })?;

        log::warn!("user {} banned: {}", user_id, reason);
        Ok(user)
    }

    pub fn unban_user(&self, admin: &Session, user_id: &str) -> Result<User> {
        self.require_admin(admin)?;

        self.store.update_user(user_id, |user| {
            user.is_banned = false;
            user.ban_reason = None;
            user.banned_at = None;
            user.updated_at = TimeStamp::new();
        })
    }

    fn require_admin(&self, session: &Session) -> Result<User> {
        let user = self.current_user(session)?;
        if !user.is_admin {
            return Err(MarketError::Unauthenticated);
        }
        Ok(user)
    }
}
