//! Marketplace records and their storage encoding
use crate::error::ValidationError;
use crate::utils;
use chrono::{DateTime, TimeZone, Utc};

/// Timestamp newtype so records can carry chrono datetimes through the
/// CBOR codec (encoded as i64 nanoseconds).
#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Comparisons delegate to the inner DateTime rather than deriving, which
// would demand Ord on the timezone marker itself.
impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Identity plus trust signal. `reputation_score` is only ever mutated by
/// the reputation ledger; nothing else writes it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct User {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded with the user_ prefix
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub full_name: Option<String>,
    #[n(3)]
    pub username: Option<String>, // unique, lowercase, >=3 chars, [a-z0-9_]+
    #[n(4)]
    pub reputation_score: i64, // clamped to [0, 100]
    #[n(5)]
    pub total_ratings: u64,
    #[n(6)]
    pub last_active: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub is_admin: bool,
    #[n(8)]
    pub is_banned: bool,
    #[n(9)]
    pub ban_reason: Option<String>,
    #[n(10)]
    pub banned_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub updated_at: TimeStamp<Utc>,
}

impl User {
    /// Display name fallback chain used in messages and notifications.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.email)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Paused,
    #[n(2)]
    Fulfilled,
}

/// An offer: a shareable referral URL with what each side gets out of it.
/// Owned exclusively by its creating user; removal is a soft delete.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ReferralLink {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub service_name: String,
    #[n(3)]
    pub referral_url: String,
    #[n(4)]
    pub description: String, // what the viewer gets
    #[n(5)]
    pub what_i_get: Option<String>, // what the owner gets
    #[n(6)]
    pub logo_url: Option<String>,
    #[n(7)]
    pub status: LinkStatus,
    #[n(8)]
    pub total_exchanges: u64,
    #[n(9)]
    pub deleted_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub deleted_by: Option<String>,
    #[n(11)]
    pub delete_reason: Option<String>,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub updated_at: TimeStamp<Utc>,
}

impl ReferralLink {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
    /// A link can back a new exchange only while active and not deleted.
    pub fn is_offerable(&self) -> bool {
        self.status == LinkStatus::Active && !self.is_deleted()
    }
}

/// Draft for a new referral link, validated on build.
#[derive(Default)]
pub struct LinkDraft {
    service_name: Option<String>,
    referral_url: Option<String>,
    description: Option<String>,
    what_i_get: Option<String>,
    logo_url: Option<String>,
}

impl LinkDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.trim().to_string());
        self
    }
    pub fn set_referral_url(mut self, url: &str) -> Self {
        self.referral_url = Some(url.trim().to_string());
        self
    }
    pub fn set_description(mut self, text: &str) -> Self {
        self.description = Some(text.trim().to_string());
        self
    }
    pub fn set_what_i_get(mut self, text: &str) -> Self {
        self.what_i_get = Some(text.trim().to_string());
        self
    }
    pub fn set_logo_url(mut self, url: &str) -> Self {
        self.logo_url = Some(url.trim().to_string());
        self
    }

    // Checks required fields, then produces the stored record.
    pub fn validate_and_build(self, owner_id: &str) -> Result<ReferralLink, ValidationError> {
        let service_name = match self.service_name.filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => return Err(ValidationError::MissingField("service_name")),
        };
        let referral_url = match self.referral_url.filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => return Err(ValidationError::MissingField("referral_url")),
        };
        if !referral_url.contains("://") {
            return Err(ValidationError::InvalidUrl);
        }
        let description = match self.description.filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => return Err(ValidationError::MissingField("description")),
        };

        let now = TimeStamp::new();
        Ok(ReferralLink {
            id: utils::mint_id(utils::LINK_HRP),
            user_id: owner_id.to_string(),
            service_name,
            referral_url,
            description,
            what_i_get: self.what_i_get.filter(|s| !s.is_empty()),
            logo_url: self.logo_url.filter(|s| !s.is_empty()),
            status: LinkStatus::Active,
            total_exchanges: 0,
            deleted_at: None,
            deleted_by: None,
            delete_reason: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Completed,
    #[n(3)]
    Cancelled,
}

impl ExchangeStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeStatus::Completed | ExchangeStatus::Cancelled)
    }
}

/// Which side of an exchange a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Requester,
    Provider,
}

/// The negotiation unit linking two users' referral links. The only record
/// mutated by two different principals, so transitions go through the
/// store's compare-and-swap path.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Exchange {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub requester_link_id: String,
    #[n(2)]
    pub provider_link_id: String,
    #[n(3)]
    pub requester_user_id: String,
    #[n(4)]
    pub provider_user_id: String,
    #[n(5)]
    pub status: ExchangeStatus,
    #[n(6)]
    pub notes: Option<String>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

impl Exchange {
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if user_id == self.requester_user_id {
            Some(Role::Requester)
        } else if user_id == self.provider_user_id {
            Some(Role::Provider)
        } else {
            None
        }
    }
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        match self.role_of(user_id)? {
            Role::Requester => Some(&self.provider_user_id),
            Role::Provider => Some(&self.requester_user_id),
        }
    }
    /// True when the exchange is between exactly this pair, in either
    /// orientation.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.requester_user_id == a && self.provider_user_id == b)
            || (self.requester_user_id == b && self.provider_user_id == a)
    }
}

/// Structured payload a message can carry. The stored snapshot identifies
/// the exchange; which controls the recipient may render is derived from
/// the live exchange at view time, never from this snapshot.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub enum MessageMeta {
    #[n(0)]
    Request {
        #[n(0)]
        exchange_id: String,
        #[n(1)]
        requester_link_id: String,
        #[n(2)]
        provider_link_id: String,
    },
    #[n(1)]
    Update {
        #[n(0)]
        exchange_id: String,
        #[n(1)]
        status: ExchangeStatus,
    },
    #[n(2)]
    ProofRequest {
        #[n(0)]
        exchange_id: String,
    },
}

impl MessageMeta {
    pub fn exchange_id(&self) -> &str {
        match self {
            MessageMeta::Request { exchange_id, .. }
            | MessageMeta::Update { exchange_id, .. }
            | MessageMeta::ProofRequest { exchange_id } => exchange_id,
        }
    }
}

/// A conversation entry. Immutable once sent except for the read flag.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Message {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub sender_id: String,
    #[n(2)]
    pub receiver_id: String,
    #[n(3)]
    pub content: String,
    #[n(4)]
    pub proof_url: Option<String>,
    #[n(5)]
    pub is_read: bool,
    #[n(6)]
    pub metadata: Option<MessageMeta>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

impl Message {
    pub fn other_party<'a>(&'a self, viewer_id: &str) -> &'a str {
        if self.sender_id == viewer_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// A one-time completion verdict. Append-only; never mutated or deleted.
/// `exchange_id` is None only for legacy ratings predating exchange
/// tracking.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Rating {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub rated_user_id: String,
    #[n(2)]
    pub rater_user_id: String,
    #[n(3)]
    pub exchange_id: Option<String>,
    #[n(4)]
    pub completed_their_part: bool,
    #[n(5)]
    pub notes: Option<String>,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

/// Lowercase a raw username the way the profile form does before any
/// validation runs.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Validate an already-normalized username: at least 3 characters, drawn
/// from [a-z0-9_].
pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    if name.chars().count() < 3 {
        return Err(ValidationError::UsernameTooShort);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::UsernameBadChars);
    }
    Ok(())
}
