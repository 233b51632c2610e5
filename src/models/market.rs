use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque market identifier, unique within an exchange. Markets are keyed
/// by name everywhere: registry, snapshots and listings.
pub type MarketId = String;

/// Market lifecycle status.
///
/// Transitions are `Active -> {Frozen, Cancelled, Settled}` and
/// `Frozen -> {Cancelled, Settled}`; `Cancelled` and `Settled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Frozen,
    Cancelled,
    Settled(bool),
}

impl MarketStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, MarketStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Cancelled | MarketStatus::Settled(_))
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Active => write!(f, "active"),
            MarketStatus::Frozen => write!(f, "frozen"),
            MarketStatus::Cancelled => write!(f, "cancelled"),
            MarketStatus::Settled(result) => write!(f, "settled({result})"),
        }
    }
}

/// Descriptive state of a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub id: MarketId,
    pub description: String,
    pub status: MarketStatus,
    /// Creation time in epoch milliseconds. Informational only; ordering
    /// never depends on wall-clock time.
    pub created_at: i64,
}
