use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{Result, TradeError};

/// Cash granted to every user at registration.
pub const STARTING_CASH: Decimal = dec!(10000);

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Opaque to the ledger; hashing belongs to the auth layer.
    pub password_hash: String,
    pub cash: Decimal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Holding {
    pub username: String,
    pub symbol: String,
    pub shares: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub username: String,
    pub symbol: String,
    pub shares: u64,
    pub side: TradeSide,
    /// Untruncated oracle price at execution time.
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// The three ledger entities. All mutating primitives take `&mut self`,
/// so a trade engine holding the write guard composes any number of them
/// into one atomic unit; readers see either none or all of its writes.
///
/// Holdings are keyed by `(username, symbol)` with the row hard-deleted
/// when shares reach zero, so a stored row always has shares > 0.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LedgerState {
    users: HashMap<String, User>,
    holdings: HashMap<String, HashMap<String, u64>>,
    history: Vec<HistoryEntry>,
}

impl LedgerState {
    pub fn register_user(&mut self, username: &str, password_hash: &str) -> Result<User> {
        if self.users.contains_key(username) {
            return Err(TradeError::UsernameTaken);
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
            cash: STARTING_CASH,
        };
        self.users.insert(username.to_owned(), user.clone());
        Ok(user)
    }

    pub fn user(&self, username: &str) -> Result<&User> {
        self.users.get(username).ok_or(TradeError::NotFound)
    }

    pub fn cash(&self, username: &str) -> Result<Decimal> {
        Ok(self.user(username)?.cash)
    }

    /// Applies `delta` to the user's cash, rejecting any adjustment that
    /// would leave the balance negative. Returns the new balance.
    pub fn adjust_cash(&mut self, username: &str, delta: Decimal) -> Result<Decimal> {
        let user = self.users.get_mut(username).ok_or(TradeError::NotFound)?;
        let next = user.cash + delta;
        if next < Decimal::ZERO {
            return Err(TradeError::InsufficientFunds {
                cost: -delta,
                cash: user.cash,
            });
        }
        user.cash = next;
        Ok(next)
    }

    /// Current share count; an absent row reads as zero.
    pub fn shares(&self, username: &str, symbol: &str) -> u64 {
        self.holdings
            .get(username)
            .and_then(|rows| rows.get(symbol))
            .copied()
            .unwrap_or(0)
    }

    /// Applies `delta` shares to the `(username, symbol)` row, creating it
    /// on first buy and removing it when the count reaches zero. Returns
    /// the new share count.
    pub fn upsert_holding(&mut self, username: &str, symbol: &str, delta: i64) -> Result<u64> {
        let held = self.shares(username, symbol);
        let next = if delta >= 0 {
            held.checked_add(delta as u64)
                .ok_or(TradeError::InvalidQuantity)?
        } else {
            let requested = delta.unsigned_abs();
            if requested > held {
                return Err(TradeError::InsufficientShares { requested, held });
            }
            held - requested
        };

        let rows = self.holdings.entry(username.to_owned()).or_default();
        if next == 0 {
            rows.remove(symbol);
            if rows.is_empty() {
                self.holdings.remove(username);
            }
        } else {
            rows.insert(symbol.to_owned(), next);
        }
        Ok(next)
    }

    /// Appends to the trade log. Timestamps are clamped to be
    /// non-decreasing in insertion order.
    pub fn append_history(&mut self, mut entry: HistoryEntry) {
        if let Some(last) = self.history.last() {
            if entry.time < last.time {
                entry.time = last.time;
            }
        }
        self.history.push(entry);
    }

    /// All of the user's holdings, sorted by symbol for stable display.
    pub fn holdings(&self, username: &str) -> Vec<Holding> {
        let mut rows: Vec<Holding> = self
            .holdings
            .get(username)
            .map(|rows| {
                rows.iter()
                    .map(|(symbol, shares)| Holding {
                        username: username.to_owned(),
                        symbol: symbol.clone(),
                        shares: *shares,
                    })
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        rows
    }

    /// The user's trade log, newest first.
    pub fn history(&self, username: &str) -> Vec<HistoryEntry> {
        self.history
            .iter()
            .rev()
            .filter(|entry| entry.username == username)
            .cloned()
            .collect()
    }
}

/// Handle to the shared ledger. Cloning is cheap and clones observe the
/// same state. Single-call accessors lock internally; the trade engine
/// takes `write()` once and runs its whole commit phase under that guard.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    state: Arc<RwLock<LedgerState>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().await
    }

    pub async fn register_user(&self, username: &str, password_hash: &str) -> Result<User> {
        self.state.write().await.register_user(username, password_hash)
    }

    pub async fn user(&self, username: &str) -> Result<User> {
        self.state.read().await.user(username).cloned()
    }

    pub async fn cash(&self, username: &str) -> Result<Decimal> {
        self.state.read().await.cash(username)
    }

    pub async fn holdings(&self, username: &str) -> Vec<Holding> {
        self.state.read().await.holdings(username)
    }

    pub async fn history(&self, username: &str) -> Vec<HistoryEntry> {
        self.state.read().await.history(username)
    }

    /// Restores a ledger from a JSON snapshot written by [`Ledger::save`].
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| TradeError::Storage(err.to_string()))?;
        let state: LedgerState =
            serde_json::from_slice(&bytes).map_err(|err| TradeError::Storage(err.to_string()))?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
        })
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.state.read().await;
        let json = serde_json::to_vec_pretty(&*state)
            .map_err(|err| TradeError::Storage(err.to_string()))?;
        drop(state);
        tokio::fs::write(path, json)
            .await
            .map_err(|err| TradeError::Storage(err.to_string()))
    }
}
