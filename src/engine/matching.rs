//! Matching algorithm.
//!
//! Iterative loop over the two order-book heads. A cross exists while the
//! best back's odds do not exceed the best lay's odds, and every match is
//! priced at the resting back's quoted odds (time priority). All divisions
//! truncate; sub-unit drift stays with the exchange and is never
//! re-credited.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{Bet, BetId, MatchedPortion};

use super::orderbook::OrderBook;

/// One back/lay fill produced by the matching loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub back: BetId,
    pub lay: BetId,
    /// Stake the back side committed in this fill.
    pub back_stake: u64,
    /// Liability the lay side committed in this fill.
    pub lay_liability: u64,
}

fn is_live(bet: Option<&Bet>) -> bool {
    bet.map(|b| b.is_active() && b.remaining_stake > 0)
        .unwrap_or(false)
}

/// Run the matching loop to completion over `book`, mutating the affected
/// bet records in `bets`. Returns the fills in match order.
pub(crate) fn run(book: &mut OrderBook, bets: &mut HashMap<BetId, Bet>) -> Vec<Fill> {
    let mut fills = Vec::new();

    loop {
        // Drop stale heads: matched away, cancelled, or otherwise emptied.
        let Some(back_id) = book.best_back().cloned() else {
            break;
        };
        if !is_live(bets.get(&back_id)) {
            book.pop_best_back();
            continue;
        }
        let Some(lay_id) = book.best_lay().cloned() else {
            break;
        };
        if !is_live(bets.get(&lay_id)) {
            book.pop_best_lay();
            continue;
        }

        let Some(mut back) = bets.remove(&back_id) else {
            break;
        };
        let Some(mut lay) = bets.remove(&lay_id) else {
            bets.insert(back_id, back);
            break;
        };

        if back.odds > lay.odds {
            // No cross.
            bets.insert(back_id, back);
            bets.insert(lay_id, lay);
            break;
        }

        let o = back.odds as u128;
        let b = back.remaining_stake as u128;
        let need = lay.remaining_stake as u128;
        // Maximum lay liability this back can absorb at its own odds.
        let cap = b * o / 100 - b;

        let (back_stake, lay_liability) = if cap >= need {
            // The lay is fully consumed.
            let consumed_back = (need * 100 / (o - 100)) as u64;
            let lay_liability = lay.remaining_stake;
            back.remaining_stake -= consumed_back;
            lay.remaining_stake = 0;
            book.pop_best_lay();
            if back.remaining_stake == 0 {
                book.pop_best_back();
            }
            (consumed_back, lay_liability)
        } else {
            // The back is fully consumed; the lay absorbs its liability.
            let consumed_lay = (b * (o - 100) / 100) as u64;
            let back_stake = back.remaining_stake;
            back.remaining_stake = 0;
            lay.remaining_stake -= consumed_lay;
            book.pop_best_back();
            (back_stake, consumed_lay)
        };

        back.matched.push(MatchedPortion {
            counterparty: lay_id.clone(),
            back_stake,
            lay_liability,
        });
        lay.matched.push(MatchedPortion {
            counterparty: back_id.clone(),
            back_stake,
            lay_liability,
        });

        debug!(
            back = %back_id,
            lay = %lay_id,
            odds = back.odds,
            back_stake,
            lay_liability,
            "bets matched"
        );

        fills.push(Fill {
            back: back_id.clone(),
            lay: lay_id.clone(),
            back_stake,
            lay_liability,
        });
        bets.insert(back_id, back);
        bets.insert(lay_id, lay);
    }

    fills
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BetSide, BetStatus};

    fn bet(user: &str, counter: u64, side: BetSide, stake: u64, odds: u32) -> Bet {
        Bet::new(
            BetId {
                user: user.to_string(),
                market: "m1".to_string(),
                counter,
            },
            side,
            stake,
            odds,
        )
    }

    fn setup(entries: Vec<Bet>) -> (OrderBook, HashMap<BetId, Bet>) {
        let mut book = OrderBook::new();
        let mut bets = HashMap::new();
        for b in entries {
            book.insert(b.side, b.odds, b.id.clone());
            bets.insert(b.id.clone(), b);
        }
        (book, bets)
    }

    #[test]
    fn exact_cross_consumes_both_heads() {
        let (mut book, mut bets) = setup(vec![
            bet("u1", 1, BetSide::Back, 1000, 150),
            bet("u1", 2, BetSide::Back, 1000, 153),
            bet("u2", 3, BetSide::Lay, 500, 140),
            bet("u2", 4, BetSide::Lay, 500, 150),
        ]);

        let fills = run(&mut book, &mut bets);

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].back_stake, 1000);
        assert_eq!(fills[0].lay_liability, 500);

        let back = &bets[&fills[0].back];
        let lay = &bets[&fills[0].lay];
        assert_eq!(back.id.counter, 1);
        assert_eq!(lay.id.counter, 4);
        assert_eq!(back.remaining_stake, 0);
        assert_eq!(lay.remaining_stake, 0);
        assert_eq!(back.matched[0].counterparty, lay.id);
        assert_eq!(lay.matched[0].counterparty, back.id);
    }

    #[test]
    fn partial_cross_leaves_lay_remainder() {
        let (mut book, mut bets) = setup(vec![
            bet("u1", 1, BetSide::Back, 1000, 150),
            bet("u1", 2, BetSide::Back, 1000, 153),
            bet("u2", 3, BetSide::Lay, 1000, 140),
            bet("u2", 4, BetSide::Lay, 1000, 150),
        ]);

        let fills = run(&mut book, &mut bets);

        // bb1 (1000@150) can only absorb 500 of liability; the 150 lay keeps
        // the rest and the 153 back never crosses the remaining 140 lay.
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].back_stake, 1000);
        assert_eq!(fills[0].lay_liability, 500);
        assert_eq!(bets[&fills[0].back].remaining_stake, 0);
        assert_eq!(bets[&fills[0].lay].remaining_stake, 500);
    }

    #[test]
    fn no_cross_when_back_odds_exceed_lay_odds() {
        let (mut book, mut bets) = setup(vec![
            bet("u1", 1, BetSide::Back, 1000, 160),
            bet("u2", 2, BetSide::Lay, 1000, 150),
        ]);

        let fills = run(&mut book, &mut bets);
        assert!(fills.is_empty());
        assert_eq!(bets.values().filter(|b| b.matched.is_empty()).count(), 2);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn one_lay_sweeps_several_backs() {
        let (mut book, mut bets) = setup(vec![
            bet("u1", 1, BetSide::Back, 400, 150),
            bet("u3", 2, BetSide::Back, 400, 150),
            bet("u2", 3, BetSide::Lay, 1000, 150),
        ]);

        let fills = run(&mut book, &mut bets);

        // Each back absorbs 200 of liability; the lay keeps 600 unmatched.
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].back.counter, 1);
        assert_eq!(fills[1].back.counter, 2);
        assert_eq!(fills[0].lay_liability, 200);
        assert_eq!(fills[1].lay_liability, 200);
        let lay = &bets[&fills[0].lay];
        assert_eq!(lay.remaining_stake, 600);
        assert_eq!(lay.matched.len(), 2);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn stale_heads_are_dropped() {
        let (mut book, mut bets) = setup(vec![
            bet("u1", 1, BetSide::Back, 1000, 150),
            bet("u2", 2, BetSide::Lay, 500, 150),
        ]);
        // Simulate a cancelled head left in the book.
        if let Some(b) = bets.get_mut(&BetId {
            user: "u1".to_string(),
            market: "m1".to_string(),
            counter: 1,
        }) {
            b.status = BetStatus::Cancelled;
            b.remaining_stake = 0;
        }

        let fills = run(&mut book, &mut bets);
        assert!(fills.is_empty());
        // The stale back was evicted, the lay stays resting.
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn truncation_drift_stays_bounded() {
        // cap = floor(300*134/100) - 300 = 102 >= 100, so the lay is fully
        // consumed: consumed_back = floor(100*100/34) = 294.
        let (mut book, mut bets) = setup(vec![
            bet("u1", 1, BetSide::Back, 300, 134),
            bet("u2", 2, BetSide::Lay, 100, 134),
        ]);

        let fills = run(&mut book, &mut bets);

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].back_stake, 294);
        assert_eq!(fills[0].lay_liability, 100);
        assert_eq!(bets[&fills[0].back].remaining_stake, 6);
        assert_eq!(bets[&fills[0].lay].remaining_stake, 0);
        // A winning back would collect floor(134*294/100) = 393 out of the
        // 394 units committed; the odd unit accrues to the exchange.
        assert_eq!(134u64 * 294 / 100, 393);
    }
}
