//! Market engine.
//!
//! Owns the order book and the bet records of one market. The engine is a
//! synchronous single-writer state machine; the actor task drives it one
//! command at a time. Placement, cancellation, lifecycle transitions and
//! the settlement arithmetic all live here.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::ExchangeError;
use crate::models::{
    Bet, BetId, BetSide, BetStatus, MarketId, MarketInfo, MarketStatus, UserId,
};
use crate::store::MarketSnapshot;

use super::matching::{self, Fill};
use super::orderbook::OrderBook;

pub struct MarketEngine {
    info: MarketInfo,
    book: OrderBook,
    bets: HashMap<BetId, Bet>,
}

impl MarketEngine {
    pub fn new(id: MarketId, description: String) -> Self {
        Self {
            info: MarketInfo {
                id,
                description,
                status: MarketStatus::Active,
                created_at: Utc::now().timestamp_millis(),
            },
            book: OrderBook::new(),
            bets: HashMap::new(),
        }
    }

    /// Rebuild a market from its snapshot. Active bets with remaining stake
    /// re-enter the book in counter order, which reproduces the
    /// (odds, insertion) order of the pre-restart book.
    pub fn restore(snapshot: MarketSnapshot) -> Self {
        let mut ordered: Vec<Bet> = snapshot
            .backs
            .into_iter()
            .chain(snapshot.lays)
            .collect();
        ordered.sort_by_key(|b| b.id.counter);

        let mut book = OrderBook::new();
        let mut bets = HashMap::new();
        for bet in ordered {
            if bet.is_active() && bet.remaining_stake > 0 {
                book.insert(bet.side, bet.odds, bet.id.clone());
            }
            bets.insert(bet.id.clone(), bet);
        }

        Self {
            info: snapshot.info,
            book,
            bets,
        }
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        let mut backs: Vec<Bet> = self
            .bets
            .values()
            .filter(|b| b.side == BetSide::Back)
            .cloned()
            .collect();
        backs.sort_by_key(|b| b.id.counter);
        let mut lays: Vec<Bet> = self
            .bets
            .values()
            .filter(|b| b.side == BetSide::Lay)
            .cloned()
            .collect();
        lays.sort_by_key(|b| b.id.counter);

        MarketSnapshot {
            info: self.info.clone(),
            backs,
            lays,
        }
    }

    pub fn info(&self) -> MarketInfo {
        self.info.clone()
    }

    // ------------------------------------------------------------------
    // Placement & cancellation
    // ------------------------------------------------------------------

    /// Record a bet and insert it into the book. The caller has already
    /// withdrawn the stake from the owner's account.
    pub fn place(&mut self, bet: Bet) -> Result<BetId, ExchangeError> {
        if !self.info.status.is_active() {
            return Err(ExchangeError::InvalidState(format!(
                "market {} is {}, not accepting bets",
                self.info.id, self.info.status
            )));
        }
        if bet.original_stake == 0 {
            return Err(ExchangeError::InvalidAmount(
                "stake must be positive".to_string(),
            ));
        }
        if bet.odds <= 100 {
            return Err(ExchangeError::InvalidAmount(format!(
                "odds must exceed 100, got {}",
                bet.odds
            )));
        }
        if self.bets.contains_key(&bet.id) {
            return Err(ExchangeError::DuplicateId(format!("bet {}", bet.id)));
        }

        let id = bet.id.clone();
        self.book.insert(bet.side, bet.odds, id.clone());
        debug!(
            bet = %id,
            side = %bet.side,
            stake = bet.original_stake,
            odds = bet.odds,
            "bet placed"
        );
        self.bets.insert(id.clone(), bet);
        Ok(id)
    }

    /// Return the unmatched remainder for refunding and drop the bet from
    /// the book. The matched portion stays live; the bet only becomes
    /// `Cancelled` when nothing was ever matched. Calling this on a bet
    /// with no remaining stake is a no-op returning zero.
    pub fn cancel_unmatched(&mut self, id: &BetId) -> Result<(UserId, u64), ExchangeError> {
        if self.info.status.is_terminal() {
            return Err(ExchangeError::InvalidState(format!(
                "market {} is {}",
                self.info.id, self.info.status
            )));
        }
        let bet = self
            .bets
            .get_mut(id)
            .ok_or_else(|| ExchangeError::NotFound(format!("bet {id}")))?;

        let refund = bet.remaining_stake;
        if refund > 0 {
            self.book.remove(bet.side, bet.odds, id);
            bet.remaining_stake = 0;
        }
        if bet.matched.is_empty() && bet.status == BetStatus::Active {
            bet.status = BetStatus::Cancelled;
        }
        debug!(bet = %id, refund, "unmatched stake cancelled");
        Ok((bet.user().to_string(), refund))
    }

    /// Refund everything the bet still holds in the market: the unmatched
    /// remainder plus its own side of every matched portion. Equals the
    /// original stake unless the unmatched part was cancelled earlier.
    /// Only valid once the market is cancelled.
    pub fn cancel_whole(&mut self, id: &BetId) -> Result<(UserId, u64), ExchangeError> {
        if self.info.status != MarketStatus::Cancelled {
            return Err(ExchangeError::InvalidState(format!(
                "market {} is {}, not cancelled",
                self.info.id, self.info.status
            )));
        }
        let bet = self
            .bets
            .get_mut(id)
            .ok_or_else(|| ExchangeError::NotFound(format!("bet {id}")))?;

        let refund = bet.remaining_stake + bet.matched_contribution();
        if bet.remaining_stake > 0 {
            self.book.remove(bet.side, bet.odds, id);
            bet.remaining_stake = 0;
        }
        bet.matched.clear();
        if bet.status == BetStatus::Active {
            bet.status = BetStatus::MarketCancelled;
        }
        debug!(bet = %id, refund, "bet refunded in whole");
        Ok((bet.user().to_string(), refund))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Freeze the market. Returns every bet id so the supervisor can refund
    /// the unmatched remainders; matched portions stay live until
    /// settlement.
    pub fn freeze(&mut self) -> Result<Vec<BetId>, ExchangeError> {
        if self.info.status != MarketStatus::Active {
            return Err(ExchangeError::InvalidState(format!(
                "market {} is {}, cannot freeze",
                self.info.id, self.info.status
            )));
        }
        self.info.status = MarketStatus::Frozen;
        info!(market = %self.info.id, "market frozen");
        Ok(self.bet_ids())
    }

    /// Cancel the market. Returns every bet id so the supervisor can refund
    /// stakes in whole.
    pub fn cancel(&mut self) -> Result<Vec<BetId>, ExchangeError> {
        if self.info.status.is_terminal() {
            return Err(ExchangeError::InvalidState(format!(
                "market {} is already {}",
                self.info.id, self.info.status
            )));
        }
        self.info.status = MarketStatus::Cancelled;
        info!(market = %self.info.id, "market cancelled");
        Ok(self.bet_ids())
    }

    /// Settle the market with the realised outcome. Returns every bet id so
    /// the supervisor can collect and credit payouts.
    pub fn settle(&mut self, result: bool) -> Result<Vec<BetId>, ExchangeError> {
        if self.info.status.is_terminal() {
            return Err(ExchangeError::InvalidState(format!(
                "market {} is already {}",
                self.info.id, self.info.status
            )));
        }
        self.info.status = MarketStatus::Settled(result);
        info!(market = %self.info.id, result, "market settled");
        Ok(self.bet_ids())
    }

    /// Compute the payout owed to one bet under the settled outcome, mark
    /// it settled and zero its stakes. A second call pays nothing.
    ///
    /// A winning back collects `floor(odds * stake / 100)` per matched
    /// portion plus its unmatched remainder; a winning lay collects the
    /// back stake it absorbed plus its own liability per portion, plus its
    /// unmatched remainder. Losers keep only the unmatched remainder.
    pub fn settle_payout(&mut self, id: &BetId) -> Result<(UserId, u64), ExchangeError> {
        let result = match self.info.status {
            MarketStatus::Settled(result) => result,
            _ => {
                return Err(ExchangeError::InvalidState(format!(
                    "market {} is {}, not settled",
                    self.info.id, self.info.status
                )))
            }
        };
        let bet = self
            .bets
            .get_mut(id)
            .ok_or_else(|| ExchangeError::NotFound(format!("bet {id}")))?;

        if bet.status != BetStatus::Active {
            return Ok((bet.user().to_string(), 0));
        }

        let odds = bet.odds as u128;
        let matched: u64 = match (bet.side, result) {
            (BetSide::Back, true) => bet
                .matched
                .iter()
                .map(|p| (p.back_stake as u128 * odds / 100) as u64)
                .sum(),
            (BetSide::Lay, false) => bet
                .matched
                .iter()
                .map(|p| p.back_stake + p.lay_liability)
                .sum(),
            _ => 0,
        };
        let payout = matched + bet.remaining_stake;

        if bet.remaining_stake > 0 {
            self.book.remove(bet.side, bet.odds, id);
            bet.remaining_stake = 0;
        }
        bet.status = BetStatus::MarketSettled(result);
        debug!(bet = %id, payout, result, "bet settled");
        Ok((bet.user().to_string(), payout))
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    /// Run the matching loop. Refused once the market is terminal; a frozen
    /// market has an empty book, so the loop is a no-op there.
    pub fn run_match(&mut self) -> Result<Vec<Fill>, ExchangeError> {
        if self.info.status.is_terminal() {
            return Err(ExchangeError::InvalidState(format!(
                "market {} is {}",
                self.info.id, self.info.status
            )));
        }
        Ok(matching::run(&mut self.book, &mut self.bets))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every bet id of the market, counter-ordered.
    pub fn bets(&self) -> Vec<BetId> {
        self.bet_ids()
    }

    pub fn bet(&self, id: &BetId) -> Result<Bet, ExchangeError> {
        self.bets
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("bet {id}")))
    }

    /// Unmatched backs as `(odds, id)` in book order: odds ascending, FIFO
    /// within a level.
    pub fn pending_backs(&self) -> Vec<(u32, BetId)> {
        self.book
            .backs()
            .filter(|(_, id)| self.has_remaining(id))
            .map(|(odds, id)| (odds, id.clone()))
            .collect()
    }

    /// Unmatched lays as `(odds, id)` in book order: odds descending, FIFO
    /// within a level.
    pub fn pending_lays(&self) -> Vec<(u32, BetId)> {
        self.book
            .lays()
            .filter(|(_, id)| self.has_remaining(id))
            .map(|(odds, id)| (odds, id.clone()))
            .collect()
    }

    fn has_remaining(&self, id: &BetId) -> bool {
        self.bets
            .get(id)
            .map(|b| b.remaining_stake > 0)
            .unwrap_or(false)
    }

    fn bet_ids(&self) -> Vec<BetId> {
        let mut ids: Vec<BetId> = self.bets.keys().cloned().collect();
        ids.sort_by_key(|id| id.counter);
        ids
    }

    /// Units the market currently holds in custody: remaining stakes plus
    /// both sides of every live matched portion (counted once, on the back).
    #[cfg(test)]
    pub(crate) fn custody(&self) -> u64 {
        self.bets
            .values()
            .map(|b| {
                let portions = if b.side == BetSide::Back {
                    b.matched
                        .iter()
                        .map(|p| p.back_stake + p.lay_liability)
                        .sum::<u64>()
                } else {
                    0
                };
                b.remaining_stake + portions
            })
            .sum()
    }
}
