use crate::record::ExchangeStatus;

/// Failures surfaced by the marketplace core. Everything a caller can
/// observe maps onto one of these classes; transport failures against the
/// store come through as [`MarketError::Storage`].
#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("no authenticated session")]
    Unauthenticated,
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
    #[error("cannot {action} an exchange in state {status:?}")]
    InvalidTransition {
        status: ExchangeStatus,
        action: &'static str,
    },
    #[error("exchange {exchange_id} was already rated by {rater_id}")]
    DuplicateRating {
        rater_id: String,
        exchange_id: String,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("username must be at least 3 characters")]
    UsernameTooShort,
    #[error("username may only contain a-z, 0-9 and underscores")]
    UsernameBadChars,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("referral url must be scheme-qualified")]
    InvalidUrl,
    #[error("cannot open an exchange against your own link")]
    SelfExchange,
    #[error("referral link is not active")]
    LinkNotActive,
    #[error("cannot rate yourself")]
    SelfRating,
    #[error("rater is not a party to this exchange")]
    NotAParty,
    #[error("a cancelled exchange cannot be rated")]
    ExchangeNotRatable,
    #[error("message content must not be empty")]
    EmptyMessage,
}

pub type Result<T> = std::result::Result<T, MarketError>;
