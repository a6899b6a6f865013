//! Content-addressed storage for proof screenshots.
//!
//! Uploads are keyed `owner/sha256(bytes)` and handed back as a stable
//! public URL, which is what gets embedded in a proof message's
//! `proof_url`.

use crate::error::{MarketError, Result, ValidationError};
use crate::session::Session;
use crate::store::Store;
use std::sync::Arc;

const URL_PREFIX: &str = "blob://proof-images/";

pub struct ProofStore {
    store: Arc<Store>,
}

impl ProofStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Store the bytes and return their public URL. Re-uploading identical
    /// content is idempotent by construction.
    pub fn upload(&self, session: &Session, bytes: &[u8]) -> Result<String> {
        let owner = self.store.require_active_user(&session.user_id)?;

        let digest = sha256::digest(bytes);
        let key = format!("{}/{}", owner.id, digest);
        self.store.put_blob(&key, bytes)?;

        Ok(format!("{URL_PREFIX}{key}"))
    }

    pub fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let key = parse_key(url)?;
        self.store.get_blob(key)
    }

    /// Only the uploader may remove their proof image.
    pub fn remove(&self, session: &Session, url: &str) -> Result<bool> {
        let owner = self.store.require_active_user(&session.user_id)?;
        let key = parse_key(url)?;
        if !key.starts_with(&format!("{}/", owner.id)) {
            return Err(MarketError::Unauthenticated);
        }
        self.store.remove_blob(key)
    }
}

fn parse_key(url: &str) -> Result<&str> {
    url.strip_prefix(URL_PREFIX)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ValidationError::InvalidUrl.into())
}
