use rust_decimal::Decimal;
use thiserror::Error;

use crate::oracle::OracleError;

pub type Result<T> = std::result::Result<T, TradeError>;

/// Per-request failures of the ledger core. None of these are fatal to
/// the process; each is scoped to the request that triggered it.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("unknown symbol")]
    InvalidSymbol,

    #[error("share quantity must be a positive integer")]
    InvalidQuantity,

    #[error("insufficient funds : need {cost}, have {cash}")]
    InsufficientFunds { cost: Decimal, cash: Decimal },

    #[error("insufficient shares : requested {requested}, holding {held}")]
    InsufficientShares { requested: u64, held: u64 },

    #[error("no shares of that symbol held")]
    NoSuchHolding,

    #[error("no such user")]
    NotFound,

    #[error("username already taken")]
    UsernameTaken,

    #[error("quote service unavailable : {0}")]
    OracleUnavailable(String),

    #[error("storage failure : {0}")]
    Storage(String),
}

impl From<OracleError> for TradeError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::UnknownSymbol => TradeError::InvalidSymbol,
            OracleError::Unavailable(msg) => TradeError::OracleUnavailable(msg),
        }
    }
}
