use serde::{Deserialize, Serialize};

use super::bet::BetId;

/// Opaque user identifier, unique within an exchange.
pub type UserId = String;

/// A user account as held by the monetary ledger.
///
/// `balance` only changes through ledger operations; `bets` is append-only
/// until the exchange is cleaned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub balance: u64,
    /// Placement order; read back newest first via `Ledger::bets`.
    pub bets: Vec<BetId>,
}

impl Account {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            balance: 0,
            bets: Vec::new(),
        }
    }
}

/// Public view of a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    pub balance: u64,
}
