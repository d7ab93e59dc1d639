use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{Result, TradeError};
use crate::ledger::{HistoryEntry, Ledger, TradeSide};
use crate::oracle::{PriceOracle, Quote};
use crate::portfolio::{self, PortfolioView};

/// Validates and executes buy/sell requests against the ledger and the
/// price oracle. Callers arrive pre-authenticated with a resolved
/// username; the engine never authenticates.
///
/// Every trade runs as `validate -> price -> commit`. The oracle call is
/// network-bound and happens before any lock is taken; the commit phase
/// then holds the ledger's write guard for its whole read-modify-write,
/// which serializes concurrent trades and re-validates funds/shares
/// against the state as it is at commit time. All checks inside the
/// guard precede all mutations, so a failed trade mutates nothing.
#[derive(Clone, Debug)]
pub struct TradeEngine<O: PriceOracle> {
    ledger: Ledger,
    oracle: O,
}

/// Post-trade state returned to the caller: the updated cash balance,
/// the updated holding, and what the trade executed at.
#[derive(Clone, Debug, PartialEq)]
pub struct TradeReceipt {
    pub symbol: String,
    pub shares: u64,
    /// Untruncated execution price, as recorded in history.
    pub price: Decimal,
    /// Cash moved by the trade : `floor(price) * requested shares`.
    pub cost: Decimal,
    pub cash: Decimal,
}

impl<O: PriceOracle> TradeEngine<O> {
    pub fn new(ledger: Ledger, oracle: O) -> Self {
        Self { ledger, oracle }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote> {
        let symbol = symbol.trim().to_uppercase();
        Ok(self.oracle.lookup(&symbol).await?)
    }

    pub async fn buy(&self, username: &str, symbol: &str, shares: u64) -> Result<TradeReceipt> {
        if shares < 1 {
            return Err(TradeError::InvalidQuantity);
        }
        let delta = i64::try_from(shares).map_err(|_| TradeError::InvalidQuantity)?;
        let symbol = symbol.trim().to_uppercase();

        let quote = self.oracle.lookup(&symbol).await?;
        // costing policy : prices are truncated to whole currency units,
        // so cash always moves by an integral amount per share
        let cost = quote
            .price
            .trunc()
            .checked_mul(Decimal::from(shares))
            .ok_or(TradeError::InvalidQuantity)?;

        let mut state = self.ledger.write().await;
        let cash = state.cash(username)?;
        if cost > cash.trunc() {
            return Err(TradeError::InsufficientFunds { cost, cash });
        }
        state
            .shares(username, &symbol)
            .checked_add(shares)
            .ok_or(TradeError::InvalidQuantity)?;

        let cash = state.adjust_cash(username, -cost)?;
        let held = state.upsert_holding(username, &symbol, delta)?;
        state.append_history(HistoryEntry {
            username: username.to_owned(),
            symbol: symbol.clone(),
            shares,
            side: TradeSide::Buy,
            price: quote.price,
            time: Utc::now(),
        });
        drop(state);

        info!(
            "BUY {} x{} for {} : {} now holds {} (cash {})",
            symbol, shares, cost, username, held, cash
        );
        Ok(TradeReceipt {
            symbol,
            shares: held,
            price: quote.price,
            cost,
            cash,
        })
    }

    pub async fn sell(&self, username: &str, symbol: &str, shares: u64) -> Result<TradeReceipt> {
        if shares < 1 {
            return Err(TradeError::InvalidQuantity);
        }
        let delta = i64::try_from(shares).map_err(|_| TradeError::InvalidQuantity)?;
        let symbol = symbol.trim().to_uppercase();

        // cheap precheck so a user selling what they do not hold is told
        // so without an oracle round trip
        {
            let state = self.ledger.read().await;
            state.user(username)?;
            check_position(state.shares(username, &symbol), shares)?;
        }

        let quote = self.oracle.lookup(&symbol).await?;
        let proceeds = quote
            .price
            .trunc()
            .checked_mul(Decimal::from(shares))
            .ok_or(TradeError::InvalidQuantity)?;

        let mut state = self.ledger.write().await;
        // a concurrent sell may have drained the holding since the precheck
        check_position(state.shares(username, &symbol), shares)?;

        let held = state.upsert_holding(username, &symbol, -delta)?;
        let cash = state.adjust_cash(username, proceeds)?;
        state.append_history(HistoryEntry {
            username: username.to_owned(),
            symbol: symbol.clone(),
            shares,
            side: TradeSide::Sell,
            price: quote.price,
            time: Utc::now(),
        });
        drop(state);

        info!(
            "SELL {} x{} for {} : {} now holds {} (cash {})",
            symbol, shares, proceeds, username, held, cash
        );
        Ok(TradeReceipt {
            symbol,
            shares: held,
            price: quote.price,
            cost: proceeds,
            cash,
        })
    }

    /// Read-only valuation of the user's holdings at live prices.
    pub async fn portfolio(&self, username: &str) -> Result<PortfolioView> {
        portfolio::portfolio(&self.ledger, &self.oracle, username).await
    }
}

fn check_position(held: u64, requested: u64) -> Result<()> {
    if held == 0 {
        return Err(TradeError::NoSuchHolding);
    }
    if requested > held {
        return Err(TradeError::InsufficientShares { requested, held });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::simulated::SimulatedOracle;
    use crate::oracle::OracleError;
    use rust_decimal_macros::dec;

    /// Oracle whose transport is down : every lookup fails with
    /// `Unavailable`, never `UnknownSymbol`.
    #[derive(Clone)]
    struct DownOracle;

    impl PriceOracle for DownOracle {
        async fn lookup(&self, _symbol: &str) -> std::result::Result<Quote, OracleError> {
            Err(OracleError::Unavailable("connection refused".to_owned()))
        }
    }

    /// Oracle that only answers the exact symbol it was built with.
    #[derive(Clone)]
    struct ExactSymbolOracle(Quote);

    impl PriceOracle for ExactSymbolOracle {
        async fn lookup(&self, symbol: &str) -> std::result::Result<Quote, OracleError> {
            if symbol == self.0.symbol {
                Ok(self.0.clone())
            } else {
                Err(OracleError::UnknownSymbol)
            }
        }
    }

    async fn engine_with(quotes: &[(&str, Decimal)]) -> TradeEngine<SimulatedOracle> {
        let oracle = SimulatedOracle::new();
        for (symbol, price) in quotes {
            oracle
                .insert(Quote {
                    symbol: (*symbol).to_owned(),
                    name: format!("{symbol} Inc."),
                    price: *price,
                })
                .await;
        }
        let engine = TradeEngine::new(Ledger::new(), oracle);
        engine.ledger().register_user("alice", "hash").await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_buy_sell_scenario() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;

        let receipt = engine.buy("alice", "AAPL", 10).await.unwrap();
        assert_eq!(receipt.cash, dec!(8500));
        assert_eq!(receipt.shares, 10);
        assert_eq!(receipt.cost, dec!(1500));
        assert_eq!(engine.ledger().history("alice").await.len(), 1);

        engine.oracle.set_price("AAPL", dec!(160.00)).await;
        let receipt = engine.sell("alice", "AAPL", 5).await.unwrap();
        assert_eq!(receipt.cash, dec!(9300));
        assert_eq!(receipt.shares, 5);
        assert_eq!(engine.ledger().history("alice").await.len(), 2);

        let err = engine.sell("alice", "AAPL", 10).await.unwrap_err();
        assert!(matches!(
            err,
            TradeError::InsufficientShares {
                requested: 10,
                held: 5
            }
        ));
        // failed sell leaves everything untouched
        assert_eq!(engine.ledger().cash("alice").await.unwrap(), dec!(9300));
        assert_eq!(engine.ledger().history("alice").await.len(), 2);
    }

    #[tokio::test]
    async fn test_buy_unknown_symbol() {
        let engine = engine_with(&[]).await;
        assert!(matches!(
            engine.buy("alice", "ZZZZ", 1).await,
            Err(TradeError::InvalidSymbol)
        ));
        assert_eq!(engine.ledger().cash("alice").await.unwrap(), dec!(10000));
        assert!(engine.ledger().history("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;
        assert!(matches!(
            engine.buy("alice", "AAPL", 0).await,
            Err(TradeError::InvalidQuantity)
        ));
        assert!(matches!(
            engine.sell("alice", "AAPL", 0).await,
            Err(TradeError::InvalidQuantity)
        ));
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;
        let err = engine.buy("alice", "AAPL", 67).await.unwrap_err();
        assert!(matches!(err, TradeError::InsufficientFunds { .. }));
        assert_eq!(engine.ledger().cash("alice").await.unwrap(), dec!(10000));
        assert_eq!(engine.ledger().holdings("alice").await.len(), 0);
        assert!(engine.ledger().history("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_sell_without_holding() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;
        assert!(matches!(
            engine.sell("alice", "AAPL", 1).await,
            Err(TradeError::NoSuchHolding)
        ));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;
        assert!(matches!(
            engine.buy("ghost", "AAPL", 1).await,
            Err(TradeError::NotFound)
        ));
        assert!(matches!(
            engine.sell("ghost", "AAPL", 1).await,
            Err(TradeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_fractional_price_truncated_for_cost_only() {
        let engine = engine_with(&[("AAPL", dec!(150.75))]).await;

        let receipt = engine.buy("alice", "AAPL", 10).await.unwrap();
        // costing floors the price, the log keeps it exact
        assert_eq!(receipt.cost, dec!(1500));
        assert_eq!(receipt.cash, dec!(8500));
        let history = engine.ledger().history("alice").await;
        assert_eq!(history[0].price, dec!(150.75));
    }

    #[tokio::test]
    async fn test_funds_check_truncates_cash() {
        let engine = engine_with(&[("AAPL", dec!(100.50))]).await;
        {
            let mut state = engine.ledger().write().await;
            state.adjust_cash("alice", dec!(-9899.01)).unwrap();
        }
        // cash 100.99 covers a truncated cost of 100
        let receipt = engine.buy("alice", "AAPL", 1).await.unwrap();
        assert_eq!(receipt.cost, dec!(100));
        assert_eq!(receipt.cash, dec!(0.99));
    }

    #[tokio::test]
    async fn test_symbol_is_normalized() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;
        engine.buy("alice", "aapl", 3).await.unwrap();
        engine.buy("alice", " AAPL ", 2).await.unwrap();

        let holdings = engine.ledger().holdings("alice").await;
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].symbol, "AAPL");
        assert_eq!(holdings[0].shares, 5);
    }

    #[tokio::test]
    async fn test_history_records_both_sides() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;
        engine.buy("alice", "AAPL", 10).await.unwrap();
        engine.sell("alice", "AAPL", 4).await.unwrap();

        let history = engine.ledger().history("alice").await;
        assert_eq!(history.len(), 2);
        // newest first
        assert_eq!(history[0].side, TradeSide::Sell);
        assert_eq!(history[0].shares, 4);
        assert_eq!(history[1].side, TradeSide::Buy);
        assert_eq!(history[1].shares, 10);
        assert!(history[1].time <= history[0].time);
    }

    #[tokio::test]
    async fn test_unavailable_oracle_fails_buy_without_mutation() {
        let engine = TradeEngine::new(Ledger::new(), DownOracle);
        engine.ledger().register_user("alice", "hash").await.unwrap();

        let err = engine.buy("alice", "AAPL", 1).await.unwrap_err();
        // a dead quote service is not the same as a bad ticker
        assert!(matches!(err, TradeError::OracleUnavailable(_)));
        assert_eq!(engine.ledger().cash("alice").await.unwrap(), dec!(10000));
        assert!(engine.ledger().holdings("alice").await.is_empty());
        assert!(engine.ledger().history("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_oracle_fails_sell_without_mutation() {
        let engine = TradeEngine::new(Ledger::new(), DownOracle);
        {
            let mut state = engine.ledger().write().await;
            state.register_user("alice", "hash").unwrap();
            state.upsert_holding("alice", "AAPL", 10).unwrap();
        }

        let err = engine.sell("alice", "AAPL", 5).await.unwrap_err();
        assert!(matches!(err, TradeError::OracleUnavailable(_)));
        let state = engine.ledger().read().await;
        assert_eq!(state.shares("alice", "AAPL"), 10);
        assert_eq!(state.cash("alice").unwrap(), dec!(10000));
        assert!(state.history("alice").is_empty());
    }

    #[tokio::test]
    async fn test_quote_normalizes_symbol() {
        let engine = TradeEngine::new(
            Ledger::new(),
            ExactSymbolOracle(Quote {
                symbol: "AAPL".to_owned(),
                name: "Apple Inc.".to_owned(),
                price: dec!(150.00),
            }),
        );

        let quote = engine.quote(" aapl ").await.unwrap();
        assert_eq!(quote.symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_overflowing_cost_rejected() {
        let engine = engine_with(&[("AAPL", Decimal::MAX)]).await;

        let err = engine.buy("alice", "AAPL", 2).await.unwrap_err();
        assert!(matches!(err, TradeError::InvalidQuantity));
        assert_eq!(engine.ledger().cash("alice").await.unwrap(), dec!(10000));
        assert!(engine.ledger().history("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_buys_do_not_lose_updates() {
        let engine = engine_with(&[("AAPL", dec!(150.00))]).await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.buy("alice", "AAPL", 1).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let state = engine.ledger().read().await;
        assert_eq!(state.shares("alice", "AAPL"), 20);
        assert_eq!(state.cash("alice").unwrap(), dec!(10000) - dec!(150) * dec!(20));
        assert_eq!(state.history("alice").len(), 20);
    }

    #[tokio::test]
    async fn test_concurrent_sells_cannot_oversell() {
        let engine = engine_with(&[("AAPL", dec!(100.00))]).await;
        engine.buy("alice", "AAPL", 10).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.sell("alice", "AAPL", 4).await
            }));
        }
        let mut sold = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                sold += 4;
            }
        }

        // exactly two of the five 4-share sells can fit in 10 shares
        assert_eq!(sold, 8);
        let state = engine.ledger().read().await;
        assert_eq!(state.shares("alice", "AAPL"), 2);
        assert_eq!(state.cash("alice").unwrap(), dec!(10000) - dec!(1000) + dec!(800));
        // one history row per successful trade only
        assert_eq!(state.history("alice").len(), 3);
    }
}
