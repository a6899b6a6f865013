//! Sled-backed persistence gateway.
//!
//! One tree per record type, records encoded as CBOR. The two
//! concurrency-sensitive writes live here: exchange transitions go through
//! a compare-and-swap so a lost race surfaces as `InvalidTransition`, and
//! rating submission runs as a single multi-tree transaction so the rating
//! insert, the uniqueness key and the score update land together or not at
//! all.

use crate::error::{MarketError, Result};
use crate::record::{Exchange, ExchangeStatus, Message, Rating, ReferralLink, TimeStamp, User};
use crate::reputation;
use crate::utils;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use std::sync::Arc;

pub struct Store {
    #[allow(dead_code)]
    db: Arc<sled::Db>,
    users: sled::Tree,
    links: sled::Tree,
    exchanges: sled::Tree,
    messages: sled::Tree,
    ratings: sled::Tree,
    // (rater, exchange) uniqueness keys, written inside the rating
    // transaction
    rating_keys: sled::Tree,
    blobs: sled::Tree,
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| MarketError::Codec(e.to_string()))
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| MarketError::Codec(e.to_string()))
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::with_db(Arc::new(db))
    }

    pub fn with_db(db: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            users: db.open_tree("users")?,
            links: db.open_tree("referral_links")?,
            exchanges: db.open_tree("exchanges")?,
            messages: db.open_tree("messages")?,
            ratings: db.open_tree("ratings")?,
            rating_keys: db.open_tree("rating_keys")?,
            blobs: db.open_tree("blobs")?,
            db,
        })
    }

    fn read<T>(&self, tree: &sled::Tree, id: &str) -> Result<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: minicbor::Encode<()>>(&self, tree: &sled::Tree, id: &str, value: &T) -> Result<()> {
        tree.insert(id.as_bytes(), encode(value)?)?;
        Ok(())
    }

    /// Read-modify-write under a compare-and-swap retry loop. The closure
    /// is re-applied to a fresh read whenever another writer lands first,
    /// so a stale snapshot never overwrites fields it did not change.
    fn update<T, F>(&self, tree: &sled::Tree, label: &'static str, id: &str, mut mutate: F) -> Result<T>
    where
        T: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>,
        F: FnMut(&mut T),
    {
        loop {
            let current = tree
                .get(id.as_bytes())?
                .ok_or_else(|| MarketError::NotFound(label, id.to_string()))?;
            let mut record: T = decode(&current)?;
            mutate(&mut record);
            let next = encode(&record)?;

            match tree.compare_and_swap(id.as_bytes(), Some(&current), Some(next))? {
                Ok(()) => return Ok(record),
                Err(_) => continue,
            }
        }
    }

    fn scan<T, F>(&self, tree: &sled::Tree, mut keep: F) -> Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
        F: FnMut(&T) -> bool,
    {
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let record: T = decode(&bytes)?;
            if keep(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    // USERS

    pub fn put_user(&self, user: &User) -> Result<()> {
        self.write(&self.users, &user.id, user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.read(&self.users, id)
    }

    pub fn require_user(&self, id: &str) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| MarketError::NotFound("user", id.to_string()))
    }

    /// Resolve the acting user behind a session id. A missing profile and a
    /// banned one both refuse the session.
    pub fn require_active_user(&self, id: &str) -> Result<User> {
        let user = self.get_user(id)?.ok_or(MarketError::Unauthenticated)?;
        if user.is_banned {
            return Err(MarketError::Unauthenticated);
        }
        Ok(user)
    }

    /// Field-level user mutation. Profile-side writers go through here so
    /// they can never clobber a score update the rating transaction
    /// applied after their read.
    pub fn update_user<F>(&self, id: &str, mutate: F) -> Result<User>
    where
        F: FnMut(&mut User),
    {
        self.update(&self.users, "user", id, mutate)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.scan(&self.users, |_| true)
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .scan(&self.users, |u: &User| {
                u.username.as_deref() == Some(username)
            })?
            .into_iter()
            .next())
    }

    // REFERRAL LINKS

    pub fn put_link(&self, link: &ReferralLink) -> Result<()> {
        self.write(&self.links, &link.id, link)
    }

    pub fn get_link(&self, id: &str) -> Result<Option<ReferralLink>> {
        self.read(&self.links, id)
    }

    pub fn require_link(&self, id: &str) -> Result<ReferralLink> {
        self.get_link(id)?
            .ok_or_else(|| MarketError::NotFound("referral link", id.to_string()))
    }

    /// Field-level link mutation; the counter bump on completion and the
    /// owner's status writes race each other, so both go through the swap
    /// loop.
    pub fn update_link<F>(&self, id: &str, mutate: F) -> Result<ReferralLink>
    where
        F: FnMut(&mut ReferralLink),
    {
        self.update(&self.links, "referral link", id, mutate)
    }

    pub fn scan_links<F>(&self, keep: F) -> Result<Vec<ReferralLink>>
    where
        F: FnMut(&ReferralLink) -> bool,
    {
        self.scan(&self.links, keep)
    }

    // EXCHANGES

    pub fn get_exchange(&self, id: &str) -> Result<Option<Exchange>> {
        self.read(&self.exchanges, id)
    }

    pub fn require_exchange(&self, id: &str) -> Result<Exchange> {
        self.get_exchange(id)?
            .ok_or_else(|| MarketError::NotFound("exchange", id.to_string()))
    }

    pub fn scan_exchanges<F>(&self, keep: F) -> Result<Vec<Exchange>>
    where
        F: FnMut(&Exchange) -> bool,
    {
        self.scan(&self.exchanges, keep)
    }

    /// Insert a new exchange together with its request message in one
    /// transaction, so a browse-flow request never leaves a half-created
    /// pair behind.
    pub fn create_exchange_with_message(
        &self,
        exchange: &Exchange,
        message: &Message,
    ) -> Result<()> {
        let exchange_bytes = encode(exchange)?;
        let message_bytes = encode(message)?;

        let result: std::result::Result<(), TransactionError<MarketError>> =
            (&self.exchanges, &self.messages).transaction(|(exchanges, messages)| {
                exchanges.insert(exchange.id.as_bytes(), exchange_bytes.clone())?;
                messages.insert(message.id.as_bytes(), message_bytes.clone())?;
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    /// Conditionally move an exchange from `expected` to `next`. The swap
    /// compares the stored bytes, so two racing writers cannot both apply:
    /// the loser observes the winner's state and fails with
    /// `InvalidTransition` instead of silently re-applying.
    pub fn transition_exchange(
        &self,
        exchange_id: &str,
        expected: ExchangeStatus,
        next: ExchangeStatus,
        action: &'static str,
    ) -> Result<Exchange> {
        let current_bytes = self
            .exchanges
            .get(exchange_id.as_bytes())?
            .ok_or_else(|| MarketError::NotFound("exchange", exchange_id.to_string()))?;
        let mut exchange: Exchange = decode(&current_bytes)?;

        if exchange.status != expected {
            return Err(MarketError::InvalidTransition {
                status: exchange.status,
                action,
            });
        }

        exchange.status = next;
        exchange.updated_at = TimeStamp::new();
        let next_bytes = encode(&exchange)?;

        match self.exchanges.compare_and_swap(
            exchange_id.as_bytes(),
            Some(&current_bytes),
            Some(next_bytes),
        )? {
            Ok(()) => Ok(exchange),
            Err(_) => {
                // lost the race: report whatever state won
                let winner: Exchange = self.require_exchange(exchange_id)?;
                Err(MarketError::InvalidTransition {
                    status: winner.status,
                    action,
                })
            }
        }
    }

    // MESSAGES

    pub fn put_message(&self, message: &Message) -> Result<()> {
        self.write(&self.messages, &message.id, message)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.read(&self.messages, id)
    }

    pub fn scan_messages<F>(&self, keep: F) -> Result<Vec<Message>>
    where
        F: FnMut(&Message) -> bool,
    {
        self.scan(&self.messages, keep)
    }

    // RATINGS

    pub fn scan_ratings<F>(&self, keep: F) -> Result<Vec<Rating>>
    where
        F: FnMut(&Rating) -> bool,
    {
        self.scan(&self.ratings, keep)
    }

    /// Persist a rating and mutate the rated user's trust signal as one
    /// atomic unit. Duplicate (rater, exchange) pairs abort the whole
    /// transaction, so a near-simultaneous second submission can never
    /// slip in between a check and an insert.
    pub fn record_rating(&self, rating: &Rating, delta: i64) -> Result<User> {
        let rating_bytes = encode(rating)?;

        let result: std::result::Result<User, TransactionError<MarketError>> =
            (&self.ratings, &self.rating_keys, &self.users).transaction(
                |(ratings, keys, users)| {
                    if let Some(exchange_id) = &rating.exchange_id {
                        let key = utils::rating_key(&rating.rater_user_id, exchange_id);
                        if keys.get(key.as_bytes())?.is_some() {
                            return Err(ConflictableTransactionError::Abort(
                                MarketError::DuplicateRating {
                                    rater_id: rating.rater_user_id.clone(),
                                    exchange_id: exchange_id.clone(),
                                },
                            ));
                        }
                        keys.insert(key.as_bytes(), rating.id.as_bytes())?;
                    }

                    ratings.insert(rating.id.as_bytes(), rating_bytes.clone())?;

                    let user_bytes =
                        users.get(rating.rated_user_id.as_bytes())?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(MarketError::NotFound(
                                "user",
                                rating.rated_user_id.clone(),
                            ))
                        })?;
                    let mut user: User =
                        decode(&user_bytes).map_err(ConflictableTransactionError::Abort)?;

                    user.reputation_score = reputation::clamp_score(user.reputation_score + delta);
                    user.total_ratings += 1;
                    user.updated_at = TimeStamp::new();

                    let updated =
                        encode(&user).map_err(ConflictableTransactionError::Abort)?;
                    users.insert(rating.rated_user_id.as_bytes(), updated)?;

                    Ok(user)
                },
            );

        match result {
            Ok(user) => Ok(user),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    // BLOBS

    pub fn put_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key.as_bytes())?.map(|ivec| ivec.to_vec()))
    }

    pub fn remove_blob(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.remove(key.as_bytes())?.is_some())
    }

    // tree handles for the change feeds in `push`
    pub(crate) fn messages_tree(&self) -> &sled::Tree {
        &self.messages
    }

    pub(crate) fn exchanges_tree(&self) -> &sled::Tree {
        &self.exchanges
    }
}
