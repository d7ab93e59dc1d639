use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;

use super::{OracleError, PriceOracle, Quote};

/// In-memory stand-in for the real quote service. Optionally drifts
/// every returned price by up to +/-2% so repeated lookups behave like
/// a live market. With drift off the oracle is deterministic, which is
/// what the tests rely on.
#[derive(Clone, Debug, Default)]
pub struct SimulatedOracle {
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    drift: bool,
}

impl SimulatedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small seeded listing with price drift, used by the demo binary.
    pub fn with_default_listing() -> Self {
        let seed = [
            ("AAPL", "Apple Inc.", dec!(150.00)),
            ("AMZN", "Amazon.com Inc.", dec!(185.50)),
            ("GOOG", "Alphabet Inc.", dec!(172.25)),
            ("MSFT", "Microsoft Corporation", dec!(410.10)),
            ("NFLX", "Netflix Inc.", dec!(645.80)),
        ];
        let quotes: HashMap<String, Quote> = seed
            .into_iter()
            .map(|(symbol, name, price)| {
                (
                    symbol.to_owned(),
                    Quote {
                        symbol: symbol.to_owned(),
                        name: name.to_owned(),
                        price,
                    },
                )
            })
            .collect();
        Self {
            quotes: Arc::new(RwLock::new(quotes)),
            drift: true,
        }
    }

    pub async fn insert(&self, quote: Quote) {
        let mut quotes = self.quotes.write().await;
        quotes.insert(quote.symbol.to_uppercase(), quote);
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut quotes = self.quotes.write().await;
        if let Some(quote) = quotes.get_mut(&symbol.to_uppercase()) {
            quote.price = price;
        }
    }

    /// Delist a symbol; subsequent lookups fail with `UnknownSymbol`.
    pub async fn remove(&self, symbol: &str) {
        let mut quotes = self.quotes.write().await;
        quotes.remove(&symbol.to_uppercase());
    }
}

impl PriceOracle for SimulatedOracle {
    async fn lookup(&self, symbol: &str) -> Result<Quote, OracleError> {
        let quotes = self.quotes.read().await;
        let mut quote = quotes
            .get(&symbol.trim().to_uppercase())
            .cloned()
            .ok_or(OracleError::UnknownSymbol)?;
        if self.drift {
            let bps: i64 = rand::random_range(-200..=200);
            quote.price = (quote.price * (Decimal::ONE + Decimal::new(bps, 4))).round_dp(2);
        }
        Ok(quote)
    }
}
