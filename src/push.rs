//! Change feeds over the store's trees.
//!
//! At-least-once delivery, and no ordering guarantee between feeds on
//! different record types — a consumer that sees a message event must not
//! assume the matching exchange event has already arrived (or ever
//! arrives first). The feed is a cache-invalidation signal; authoritative
//! state is always re-read from the store.

use crate::error::Result;
use crate::record::{Exchange, Message};
use crate::store::{Store, decode};
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Insert or update — sled reports both as one event.
    Upsert,
    Delete,
}

#[derive(Debug)]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub key: String,
    /// The record after the change; `None` for deletes.
    pub record: Option<T>,
}

/// Blocking iterator of changes on one record type.
pub struct Feed<T> {
    inner: sled::Subscriber,
    _marker: PhantomData<T>,
}

impl<T> Feed<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    fn convert(event: sled::Event) -> Result<Change<T>> {
        match event {
            sled::Event::Insert { key, value } => Ok(Change {
                kind: ChangeKind::Upsert,
                key: String::from_utf8_lossy(&key).into_owned(),
                record: Some(decode(&value)?),
            }),
            sled::Event::Remove { key } => Ok(Change {
                kind: ChangeKind::Delete,
                key: String::from_utf8_lossy(&key).into_owned(),
                record: None,
            }),
        }
    }

    /// Like `next`, but gives up after `timeout` instead of blocking.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Result<Change<T>>> {
        match self.inner.next_timeout(timeout) {
            Ok(event) => Some(Self::convert(event)),
            Err(_) => None,
        }
    }
}

impl<T> Iterator for Feed<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    type Item = Result<Change<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.inner.next()?;
        Some(Self::convert(event))
    }
}

impl Store {
    /// Every change to any message record.
    pub fn watch_messages(&self) -> Feed<Message> {
        Feed {
            inner: self.messages_tree().watch_prefix(vec![]),
            _marker: PhantomData,
        }
    }

    /// Every change to any exchange record.
    pub fn watch_exchanges(&self) -> Feed<Exchange> {
        Feed {
            inner: self.exchanges_tree().watch_prefix(vec![]),
            _marker: PhantomData,
        }
    }
}
