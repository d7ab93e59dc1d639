use std::collections::BTreeMap;

use futures::future;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::ledger::Ledger;
use crate::oracle::PriceOracle;

/// One priced line of a portfolio. `price`/`value` are `None` when the
/// oracle could not price the symbol at view time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub shares: u64,
    pub price: Option<Decimal>,
    pub value: Option<Decimal>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PortfolioView {
    pub username: String,
    pub cash: Decimal,
    pub positions: Vec<Position>,
    /// Sum of priced positions only; informational, excludes cash.
    pub total_value: Decimal,
    /// Set when at least one held symbol could not be priced. The rest
    /// of the view is still usable; unpriced positions are excluded
    /// from `total_value`.
    pub incomplete: bool,
}

/// Re-prices the user's holdings at live oracle prices. Read-only and
/// uncached : prices are fetched fresh on every call, concurrently per
/// symbol, with no ledger lock held during the lookups.
pub async fn portfolio<O: PriceOracle>(
    ledger: &Ledger,
    oracle: &O,
    username: &str,
) -> Result<PortfolioView> {
    let (cash, holdings) = {
        let state = ledger.read().await;
        (state.cash(username)?, state.holdings(username))
    };

    // the store keeps one row per (user, symbol); sum anyway rather than
    // trust that here
    let mut by_symbol: BTreeMap<String, u64> = BTreeMap::new();
    for holding in holdings {
        *by_symbol.entry(holding.symbol).or_default() += holding.shares;
    }

    let quotes = future::join_all(by_symbol.keys().map(|symbol| oracle.lookup(symbol))).await;

    let mut positions = Vec::with_capacity(by_symbol.len());
    let mut total_value = Decimal::ZERO;
    let mut incomplete = false;
    for ((symbol, shares), quote) in by_symbol.into_iter().zip(quotes) {
        match quote {
            Ok(quote) => {
                let value = Decimal::from(shares) * quote.price;
                total_value += value;
                positions.push(Position {
                    symbol,
                    shares,
                    price: Some(quote.price),
                    value: Some(value),
                });
            }
            Err(err) => {
                warn!("could not price {} for {} : {}", symbol, username, err);
                incomplete = true;
                positions.push(Position {
                    symbol,
                    shares,
                    price: None,
                    value: None,
                });
            }
        }
    }

    Ok(PortfolioView {
        username: username.to_owned(),
        cash,
        positions,
        total_value,
        incomplete,
    })
}
