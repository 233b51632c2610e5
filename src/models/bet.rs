use std::fmt;

use serde::{Deserialize, Serialize};

use super::market::MarketId;
use super::user::UserId;

/// Bet identifier: the owning user, the market and an exchange-wide
/// strictly monotonic counter. The counter doubles as the insertion-order
/// tie-break inside the order book, which makes book reconstruction after a
/// restart deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BetId {
    pub user: UserId,
    pub market: MarketId,
    pub counter: u64,
}

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.market, self.user, self.counter)
    }
}

/// Bet side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetSide {
    /// Bets the outcome occurs; commits `stake` units.
    Back,
    /// Bets the outcome does not occur; commits `stake` units of liability.
    Lay,
}

impl fmt::Display for BetSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetSide::Back => write!(f, "back"),
            BetSide::Lay => write!(f, "lay"),
        }
    }
}

/// Bet lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Active,
    /// User cancelled a bet that had no matched portion.
    Cancelled,
    /// The whole market was cancelled; stake refunded in full.
    MarketCancelled,
    /// The market settled with the given outcome.
    MarketSettled(bool),
}

/// One matched slice of a bet.
///
/// `back_stake` is the stake the back side committed in this match and
/// `lay_liability` is the liability the lay side committed; both amounts
/// are recorded on each counterparty so settlement can pay per portion and
/// the figures survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPortion {
    pub counterparty: BetId,
    pub back_stake: u64,
    pub lay_liability: u64,
}

/// A bet record as stored by a market engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub side: BetSide,
    /// Decimal odds scaled by 100; always strictly greater than 100.
    pub odds: u32,
    pub original_stake: u64,
    pub remaining_stake: u64,
    pub matched: Vec<MatchedPortion>,
    pub status: BetStatus,
    /// Placement time in epoch milliseconds, informational only.
    pub placed_at: i64,
}

impl Bet {
    pub fn new(id: BetId, side: BetSide, stake: u64, odds: u32) -> Self {
        Self {
            id,
            side,
            odds,
            original_stake: stake,
            remaining_stake: stake,
            matched: Vec::new(),
            status: BetStatus::Active,
            placed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn user(&self) -> &str {
        &self.id.user
    }

    pub fn is_active(&self) -> bool {
        self.status == BetStatus::Active
    }

    /// The units this bet itself committed into its matched portions:
    /// back stakes for a back, liabilities for a lay.
    pub fn matched_contribution(&self) -> u64 {
        match self.side {
            BetSide::Back => self.matched.iter().map(|p| p.back_stake).sum(),
            BetSide::Lay => self.matched.iter().map(|p| p.lay_liability).sum(),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet_id(counter: u64) -> BetId {
        BetId {
            user: "u1".to_string(),
            market: "m1".to_string(),
            counter,
        }
    }

    #[test]
    fn display_formats() {
        assert_eq!(bet_id(7).to_string(), "m1/u1#7");
        assert_eq!(BetSide::Lay.to_string(), "lay");
    }

    #[test]
    fn matched_contribution_follows_side() {
        let portion = MatchedPortion {
            counterparty: bet_id(2),
            back_stake: 200,
            lay_liability: 100,
        };
        let mut back = Bet::new(bet_id(1), BetSide::Back, 1000, 150);
        back.matched.push(portion.clone());
        let mut lay = Bet::new(bet_id(3), BetSide::Lay, 500, 150);
        lay.matched.push(portion);

        assert_eq!(back.matched_contribution(), 200);
        assert_eq!(lay.matched_contribution(), 100);
    }

    #[test]
    fn serde_round_trip() {
        let mut bet = Bet::new(bet_id(4), BetSide::Back, 300, 134);
        bet.matched.push(MatchedPortion {
            counterparty: bet_id(5),
            back_stake: 294,
            lay_liability: 100,
        });
        let json = serde_json::to_string(&bet).expect("serialize");
        let back: Bet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, bet.id);
        assert_eq!(back.matched, bet.matched);
        assert_eq!(back.status, BetStatus::Active);
    }
}
