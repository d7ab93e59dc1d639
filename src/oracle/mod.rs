use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod simulated;

/// A quote as returned by the price oracle. `price` is the live price
/// and fluctuates between calls; the oracle is the sole price source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Error)]
pub enum OracleError {
    /// The ticker does not exist. Distinct from `Unavailable` : a dead
    /// quote service does not mean the symbol is bad.
    #[error("unknown symbol")]
    UnknownSymbol,

    #[error("quote service unavailable : {0}")]
    Unavailable(String),
}

pub trait PriceOracle {
    async fn lookup(&self, symbol: &str) -> Result<Quote, OracleError>;
}
