//! Market actor task.
//!
//! Every market engine runs on a dedicated tokio task and receives commands
//! through an mpsc channel; replies travel back on oneshot channels. The
//! channel is the single-writer serialisation point for the market: callers
//! observe operations in arrival order, and a status transition performed by
//! `freeze`/`cancel`/`settle` is visible to any later command before the
//! supervisor starts its refund loop. Dropping every handle stops the task.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ExchangeError;
use crate::models::{Bet, BetId, MarketInfo, UserId};
use crate::store::MarketSnapshot;

use super::market::MarketEngine;
use super::matching::Fill;

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

enum MarketCmd {
    Place(Box<Bet>, Reply<Result<BetId, ExchangeError>>),
    CancelUnmatched(BetId, Reply<Result<(UserId, u64), ExchangeError>>),
    CancelWhole(BetId, Reply<Result<(UserId, u64), ExchangeError>>),
    SettlePayout(BetId, Reply<Result<(UserId, u64), ExchangeError>>),
    Freeze(Reply<Result<Vec<BetId>, ExchangeError>>),
    Cancel(Reply<Result<Vec<BetId>, ExchangeError>>),
    Settle(bool, Reply<Result<Vec<BetId>, ExchangeError>>),
    Match(Reply<Result<Vec<Fill>, ExchangeError>>),
    Info(Reply<MarketInfo>),
    Bets(Reply<Vec<BetId>>),
    PendingBacks(Reply<Vec<(u32, BetId)>>),
    PendingLays(Reply<Vec<(u32, BetId)>>),
    BetGet(BetId, Reply<Result<Bet, ExchangeError>>),
    Snapshot(Reply<MarketSnapshot>),
}

/// Cloneable handle to one market's task.
#[derive(Clone)]
pub struct MarketHandle {
    tx: mpsc::Sender<MarketCmd>,
}

impl MarketHandle {
    /// Move the engine onto its own task and return the handle.
    pub fn spawn(mut engine: MarketEngine) -> Self {
        let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
        let market = engine.info().id;
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                dispatch(&mut engine, cmd);
            }
            debug!(market = %market, "market task stopped");
        });
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> MarketCmd,
    ) -> Result<T, ExchangeError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| ExchangeError::Internal("market task unavailable".to_string()))?;
        rx.await
            .map_err(|_| ExchangeError::Internal("market task dropped its reply".to_string()))
    }

    pub async fn place(&self, bet: Bet) -> Result<BetId, ExchangeError> {
        self.request(|tx| MarketCmd::Place(Box::new(bet), tx)).await?
    }

    pub async fn cancel_unmatched(&self, id: BetId) -> Result<(UserId, u64), ExchangeError> {
        self.request(|tx| MarketCmd::CancelUnmatched(id, tx)).await?
    }

    pub async fn cancel_whole(&self, id: BetId) -> Result<(UserId, u64), ExchangeError> {
        self.request(|tx| MarketCmd::CancelWhole(id, tx)).await?
    }

    pub async fn settle_payout(&self, id: BetId) -> Result<(UserId, u64), ExchangeError> {
        self.request(|tx| MarketCmd::SettlePayout(id, tx)).await?
    }

    pub async fn freeze(&self) -> Result<Vec<BetId>, ExchangeError> {
        self.request(MarketCmd::Freeze).await?
    }

    pub async fn cancel(&self) -> Result<Vec<BetId>, ExchangeError> {
        self.request(MarketCmd::Cancel).await?
    }

    pub async fn settle(&self, result: bool) -> Result<Vec<BetId>, ExchangeError> {
        self.request(|tx| MarketCmd::Settle(result, tx)).await?
    }

    pub async fn run_match(&self) -> Result<Vec<Fill>, ExchangeError> {
        self.request(MarketCmd::Match).await?
    }

    pub async fn info(&self) -> Result<MarketInfo, ExchangeError> {
        self.request(MarketCmd::Info).await
    }

    pub async fn bets(&self) -> Result<Vec<BetId>, ExchangeError> {
        self.request(MarketCmd::Bets).await
    }

    pub async fn pending_backs(&self) -> Result<Vec<(u32, BetId)>, ExchangeError> {
        self.request(MarketCmd::PendingBacks).await
    }

    pub async fn pending_lays(&self) -> Result<Vec<(u32, BetId)>, ExchangeError> {
        self.request(MarketCmd::PendingLays).await
    }

    pub async fn bet_get(&self, id: BetId) -> Result<Bet, ExchangeError> {
        self.request(|tx| MarketCmd::BetGet(id, tx)).await?
    }

    pub async fn snapshot(&self) -> Result<MarketSnapshot, ExchangeError> {
        self.request(MarketCmd::Snapshot).await
    }
}

fn dispatch(engine: &mut MarketEngine, cmd: MarketCmd) {
    // A dropped receiver means the caller gave up waiting; nothing to do.
    match cmd {
        MarketCmd::Place(bet, reply) => {
            let _ = reply.send(engine.place(*bet));
        }
        MarketCmd::CancelUnmatched(id, reply) => {
            let _ = reply.send(engine.cancel_unmatched(&id));
        }
        MarketCmd::CancelWhole(id, reply) => {
            let _ = reply.send(engine.cancel_whole(&id));
        }
        MarketCmd::SettlePayout(id, reply) => {
            let _ = reply.send(engine.settle_payout(&id));
        }
        MarketCmd::Freeze(reply) => {
            let _ = reply.send(engine.freeze());
        }
        MarketCmd::Cancel(reply) => {
            let _ = reply.send(engine.cancel());
        }
        MarketCmd::Settle(result, reply) => {
            let _ = reply.send(engine.settle(result));
        }
        MarketCmd::Match(reply) => {
            let _ = reply.send(engine.run_match());
        }
        MarketCmd::Info(reply) => {
            let _ = reply.send(engine.info());
        }
        MarketCmd::Bets(reply) => {
            let _ = reply.send(engine.bets());
        }
        MarketCmd::PendingBacks(reply) => {
            let _ = reply.send(engine.pending_backs());
        }
        MarketCmd::PendingLays(reply) => {
            let _ = reply.send(engine.pending_lays());
        }
        MarketCmd::BetGet(id, reply) => {
            let _ = reply.send(engine.bet(&id));
        }
        MarketCmd::Snapshot(reply) => {
            let _ = reply.send(engine.snapshot());
        }
    }
}
