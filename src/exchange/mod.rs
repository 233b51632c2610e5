//! Exchange supervisor.
//!
//! The supervisor owns the monetary ledger, the market registry and the
//! exchange-wide bet counter, and routes every public operation. Markets
//! run as independent tasks (parallel markets, single writer within each);
//! the ledger is mutated only here, one operation at a time.
//!
//! [`ExchangeServer`] is the top-level owner: it holds the snapshot store
//! and at most one running [`Exchange`], providing the `start` / `stop` /
//! `clean` lifecycle of the public API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::engine::{MarketEngine, MarketHandle};
use crate::error::ExchangeError;
use crate::ledger::Ledger;
use crate::models::{Bet, BetId, BetSide, MarketId, MarketInfo, UserInfo};
use crate::store::{ExchangeSnapshot, FileStore, SnapshotStore};

/// A running exchange: ledger, market registry, bet counter, store.
pub struct Exchange {
    name: String,
    ledger: Mutex<Ledger>,
    markets: DashMap<MarketId, MarketHandle>,
    counter: AtomicU64,
    store: Arc<dyn SnapshotStore>,
}

impl Exchange {
    /// Bring an exchange up, restoring state when the store has a snapshot
    /// under this name.
    pub(crate) fn boot(name: &str, store: Arc<dyn SnapshotStore>) -> Result<Self, ExchangeError> {
        match store.load(name)? {
            Some(snapshot) => {
                info!(
                    exchange = name,
                    markets = snapshot.markets.len(),
                    users = snapshot.users.len(),
                    counter = snapshot.counter,
                    "restoring exchange from snapshot"
                );
                let markets = DashMap::new();
                for market in snapshot.markets {
                    let id = market.info.id.clone();
                    markets.insert(id, MarketHandle::spawn(MarketEngine::restore(market)));
                }
                Ok(Self {
                    name: name.to_string(),
                    ledger: Mutex::new(Ledger::restore(snapshot.users)),
                    markets,
                    counter: AtomicU64::new(snapshot.counter),
                    store,
                })
            }
            None => {
                info!(exchange = name, "starting empty exchange");
                Ok(Self {
                    name: name.to_string(),
                    ledger: Mutex::new(Ledger::new()),
                    markets: DashMap::new(),
                    counter: AtomicU64::new(0),
                    store,
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collect the full exchange state and write it to the store.
    pub(crate) async fn persist(&self) -> Result<(), ExchangeError> {
        let mut handles: Vec<(MarketId, MarketHandle)> = self
            .markets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        let snapshots = join_all(handles.iter().map(|(_, handle)| handle.snapshot())).await;
        let mut markets = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            markets.push(snapshot?);
        }

        let snapshot = ExchangeSnapshot {
            users: self.ledger.lock().accounts(),
            counter: self.counter.load(Ordering::SeqCst),
            markets,
        };
        self.store.save(&self.name, &snapshot)?;
        info!(exchange = %self.name, "state snapshot written");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn user_create(&self, id: &str, name: &str) -> Result<(), ExchangeError> {
        self.ledger.lock().create(id, name)
    }

    pub fn user_deposit(&self, id: &str, amount: u64) -> Result<(), ExchangeError> {
        self.ledger.lock().deposit(id, amount)
    }

    pub fn user_withdraw(&self, id: &str, amount: u64) -> Result<(), ExchangeError> {
        self.ledger.lock().withdraw(id, amount)
    }

    pub fn user_get(&self, id: &str) -> Result<UserInfo, ExchangeError> {
        self.ledger.lock().get(id)
    }

    /// Bet ids placed by the user, newest first.
    pub fn user_bets(&self, id: &str) -> Result<Vec<BetId>, ExchangeError> {
        self.ledger.lock().bets(id)
    }

    // ------------------------------------------------------------------
    // Markets
    // ------------------------------------------------------------------

    pub fn market_create(&self, name: &str, description: &str) -> Result<MarketId, ExchangeError> {
        match self.markets.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ExchangeError::DuplicateId(format!("market {name}")))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(MarketHandle::spawn(MarketEngine::new(
                    name.to_string(),
                    description.to_string(),
                )));
                info!(market = name, "market created");
                Ok(name.to_string())
            }
        }
    }

    fn market(&self, id: &str) -> Result<MarketHandle, ExchangeError> {
        self.markets
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ExchangeError::NotFound(format!("market {id}")))
    }

    /// All market ids, name-ordered.
    pub fn market_list(&self) -> Vec<MarketId> {
        let mut ids: Vec<MarketId> = self.markets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Markets still accepting bets, name-ordered.
    pub async fn market_list_active(&self) -> Vec<MarketId> {
        let mut entries: Vec<(MarketId, MarketHandle)> = self
            .markets
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let infos = join_all(entries.iter().map(|(_, handle)| handle.info())).await;
        entries
            .into_iter()
            .zip(infos)
            .filter_map(|((id, _), info)| match info {
                Ok(info) if info.status.is_active() => Some(id),
                Ok(_) => None,
                Err(e) => {
                    warn!(market = %id, error = %e, "skipping unreachable market");
                    None
                }
            })
            .collect()
    }

    pub async fn market_get(&self, id: &str) -> Result<MarketInfo, ExchangeError> {
        self.market(id)?.info().await
    }

    pub async fn market_bets(&self, id: &str) -> Result<Vec<BetId>, ExchangeError> {
        self.market(id)?.bets().await
    }

    pub async fn market_pending_backs(&self, id: &str) -> Result<Vec<(u32, BetId)>, ExchangeError> {
        self.market(id)?.pending_backs().await
    }

    pub async fn market_pending_lays(&self, id: &str) -> Result<Vec<(u32, BetId)>, ExchangeError> {
        self.market(id)?.pending_lays().await
    }

    pub async fn market_match(&self, id: &str) -> Result<(), ExchangeError> {
        let fills = self.market(id)?.run_match().await?;
        debug!(market = id, fills = fills.len(), "matching pass finished");
        Ok(())
    }

    /// Freeze a market: the status flips inside the market task, then every
    /// unmatched remainder is returned to its owner. Matched portions stay
    /// live until settlement.
    pub async fn market_freeze(&self, id: &str) -> Result<(), ExchangeError> {
        let market = self.market(id)?;
        let bets = market.freeze().await?;
        let mut refunded = 0u64;
        for bet_id in bets {
            match market.cancel_unmatched(bet_id.clone()).await {
                Ok((user, amount)) => {
                    self.credit_or_warn(&user, amount, &bet_id);
                    refunded += amount;
                }
                Err(e) => warn!(bet = %bet_id, error = %e, "skipping unmatched refund"),
            }
        }
        info!(market = id, refunded, "market frozen, unmatched stakes returned");
        Ok(())
    }

    /// Cancel a market: all stakes (matched and unmatched) come back whole.
    pub async fn market_cancel(&self, id: &str) -> Result<(), ExchangeError> {
        let market = self.market(id)?;
        let bets = market.cancel().await?;
        let mut refunded = 0u64;
        for bet_id in bets {
            match market.cancel_whole(bet_id.clone()).await {
                Ok((user, amount)) => {
                    self.credit_or_warn(&user, amount, &bet_id);
                    refunded += amount;
                }
                Err(e) => warn!(bet = %bet_id, error = %e, "skipping whole refund"),
            }
        }
        info!(market = id, refunded, "market cancelled, stakes returned");
        Ok(())
    }

    /// Settle a market with the realised outcome and credit every payout.
    pub async fn market_settle(&self, id: &str, result: bool) -> Result<(), ExchangeError> {
        let market = self.market(id)?;
        let bets = market.settle(result).await?;
        let mut paid = 0u64;
        for bet_id in bets {
            match market.settle_payout(bet_id.clone()).await {
                Ok((user, amount)) => {
                    self.credit_or_warn(&user, amount, &bet_id);
                    paid += amount;
                }
                Err(e) => warn!(bet = %bet_id, error = %e, "skipping payout"),
            }
        }
        info!(market = id, result, paid, "market settled, payouts credited");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bets
    // ------------------------------------------------------------------

    pub async fn bet_back(
        &self,
        user: &str,
        market: &str,
        stake: u64,
        odds: u32,
    ) -> Result<BetId, ExchangeError> {
        self.place_bet(user, market, BetSide::Back, stake, odds).await
    }

    pub async fn bet_lay(
        &self,
        user: &str,
        market: &str,
        stake: u64,
        odds: u32,
    ) -> Result<BetId, ExchangeError> {
        self.place_bet(user, market, BetSide::Lay, stake, odds).await
    }

    async fn place_bet(
        &self,
        user: &str,
        market_id: &str,
        side: BetSide,
        stake: u64,
        odds: u32,
    ) -> Result<BetId, ExchangeError> {
        if stake == 0 {
            return Err(ExchangeError::InvalidAmount(
                "stake must be positive".to_string(),
            ));
        }
        if odds <= 100 {
            return Err(ExchangeError::InvalidAmount(format!(
                "odds must exceed 100, got {odds}"
            )));
        }
        let market = self.market(market_id)?;

        // The stake moves out of the account before the market sees the
        // bet; any refusal downstream puts it straight back.
        self.ledger.lock().withdraw(user, stake)?;
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let bet_id = BetId {
            user: user.to_string(),
            market: market_id.to_string(),
            counter,
        };
        let bet = Bet::new(bet_id.clone(), side, stake, odds);

        match market.place(bet).await {
            Ok(id) => {
                self.ledger.lock().append_bet(user, id.clone())?;
                debug!(bet = %id, side = %side, stake, odds, "bet accepted");
                Ok(id)
            }
            Err(e) => {
                self.credit_or_warn(user, stake, &bet_id);
                Err(e)
            }
        }
    }

    /// Cancel the unmatched part of a bet and refund it. Calling this again
    /// afterwards credits nothing.
    pub async fn bet_cancel(&self, id: &BetId) -> Result<(), ExchangeError> {
        let market = self.market(&id.market)?;
        let (user, refund) = market.cancel_unmatched(id.clone()).await?;
        if refund > 0 {
            self.ledger.lock().credit(&user, refund)?;
        }
        debug!(bet = %id, refund, "bet cancelled");
        Ok(())
    }

    pub async fn bet_get(&self, id: &BetId) -> Result<Bet, ExchangeError> {
        self.market(&id.market)?.bet_get(id.clone()).await
    }

    // ------------------------------------------------------------------

    /// Credit a refund or payout. A failing credit is logged and skipped:
    /// the owner placed a bet, so the account exists, and aborting the loop
    /// midway would strand every later refund.
    fn credit_or_warn(&self, user: &str, amount: u64, bet: &BetId) {
        if amount == 0 {
            return;
        }
        if let Err(e) = self.ledger.lock().credit(user, amount) {
            warn!(bet = %bet, user, amount, error = %e, "failed to credit user");
        }
    }
}

/// Top-level owner of the snapshot store and at most one running exchange.
pub struct ExchangeServer {
    store: Arc<dyn SnapshotStore>,
    running: Option<Arc<Exchange>>,
}

impl ExchangeServer {
    /// Server backed by a file store under the configured data directory.
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        Ok(Self::with_store(Arc::new(FileStore::open(
            config.data_dir.clone(),
        )?)))
    }

    /// Server over an arbitrary snapshot store.
    pub fn with_store(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            running: None,
        }
    }

    /// Server configured from the environment.
    pub fn from_env() -> Result<Self, ExchangeError> {
        Self::new(&ExchangeConfig::load()?)
    }

    /// Start the named exchange, restoring persisted state when present.
    pub async fn start(&mut self, name: &str) -> Result<String, ExchangeError> {
        if let Some(running) = &self.running {
            return Err(ExchangeError::AlreadyRunning(running.name().to_string()));
        }
        let exchange = Exchange::boot(name, self.store.clone())?;
        self.running = Some(Arc::new(exchange));
        Ok(name.to_string())
    }

    /// Snapshot state and stop the running exchange.
    pub async fn stop(&mut self) -> Result<(), ExchangeError> {
        let exchange = self
            .running
            .take()
            .ok_or_else(|| ExchangeError::InvalidState("no exchange is running".to_string()))?;
        exchange.persist().await?;
        info!(exchange = %exchange.name(), "exchange stopped");
        Ok(())
    }

    /// Discard in-memory state for the named exchange (when it is the one
    /// running) and delete its snapshot.
    pub async fn clean(&mut self, name: &str) -> Result<String, ExchangeError> {
        if self
            .running
            .as_ref()
            .map(|e| e.name() == name)
            .unwrap_or(false)
        {
            self.running = None;
        }
        self.store.delete(name)?;
        info!(exchange = name, "exchange state cleaned");
        Ok(name.to_string())
    }

    /// The running exchange, for direct routing.
    pub fn exchange(&self) -> Result<&Exchange, ExchangeError> {
        self.running
            .as_deref()
            .ok_or_else(|| ExchangeError::InvalidState("no exchange is running".to_string()))
    }

    // ------------------------------------------------------------------
    // Routed operations
    // ------------------------------------------------------------------

    pub fn user_create(&self, id: &str, name: &str) -> Result<(), ExchangeError> {
        self.exchange()?.user_create(id, name)
    }

    pub fn user_deposit(&self, id: &str, amount: u64) -> Result<(), ExchangeError> {
        self.exchange()?.user_deposit(id, amount)
    }

    pub fn user_withdraw(&self, id: &str, amount: u64) -> Result<(), ExchangeError> {
        self.exchange()?.user_withdraw(id, amount)
    }

    pub fn user_get(&self, id: &str) -> Result<UserInfo, ExchangeError> {
        self.exchange()?.user_get(id)
    }

    pub fn user_bets(&self, id: &str) -> Result<Vec<BetId>, ExchangeError> {
        self.exchange()?.user_bets(id)
    }

    pub fn market_create(&self, name: &str, description: &str) -> Result<MarketId, ExchangeError> {
        self.exchange()?.market_create(name, description)
    }

    pub fn market_list(&self) -> Result<Vec<MarketId>, ExchangeError> {
        Ok(self.exchange()?.market_list())
    }

    pub async fn market_list_active(&self) -> Result<Vec<MarketId>, ExchangeError> {
        Ok(self.exchange()?.market_list_active().await)
    }

    pub async fn market_get(&self, id: &str) -> Result<MarketInfo, ExchangeError> {
        self.exchange()?.market_get(id).await
    }

    pub async fn market_bets(&self, id: &str) -> Result<Vec<BetId>, ExchangeError> {
        self.exchange()?.market_bets(id).await
    }

    pub async fn market_pending_backs(&self, id: &str) -> Result<Vec<(u32, BetId)>, ExchangeError> {
        self.exchange()?.market_pending_backs(id).await
    }

    pub async fn market_pending_lays(&self, id: &str) -> Result<Vec<(u32, BetId)>, ExchangeError> {
        self.exchange()?.market_pending_lays(id).await
    }

    pub async fn market_match(&self, id: &str) -> Result<(), ExchangeError> {
        self.exchange()?.market_match(id).await
    }

    pub async fn market_freeze(&self, id: &str) -> Result<(), ExchangeError> {
        self.exchange()?.market_freeze(id).await
    }

    pub async fn market_cancel(&self, id: &str) -> Result<(), ExchangeError> {
        self.exchange()?.market_cancel(id).await
    }

    pub async fn market_settle(&self, id: &str, result: bool) -> Result<(), ExchangeError> {
        self.exchange()?.market_settle(id, result).await
    }

    pub async fn bet_back(
        &self,
        user: &str,
        market: &str,
        stake: u64,
        odds: u32,
    ) -> Result<BetId, ExchangeError> {
        self.exchange()?.bet_back(user, market, stake, odds).await
    }

    pub async fn bet_lay(
        &self,
        user: &str,
        market: &str,
        stake: u64,
        odds: u32,
    ) -> Result<BetId, ExchangeError> {
        self.exchange()?.bet_lay(user, market, stake, odds).await
    }

    pub async fn bet_cancel(&self, id: &BetId) -> Result<(), ExchangeError> {
        self.exchange()?.bet_cancel(id).await
    }

    pub async fn bet_get(&self, id: &BetId) -> Result<Bet, ExchangeError> {
        self.exchange()?.bet_get(id).await
    }
}
