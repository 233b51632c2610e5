//! Monetary ledger.
//!
//! Single-writer table of user accounts. All money movement between users
//! and bets flows through here; the supervisor owns the ledger and
//! serialises access, so each operation is atomic with respect to a single
//! user.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::ExchangeError;
use crate::models::{Account, BetId, UserId, UserInfo};

#[derive(Debug, Default)]
pub struct Ledger {
    accounts: HashMap<UserId, Account>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger from a snapshot.
    pub fn restore(accounts: BTreeMap<UserId, Account>) -> Self {
        Self {
            accounts: accounts.into_iter().collect(),
        }
    }

    /// Export all accounts, name-ordered, for snapshotting.
    pub fn accounts(&self) -> BTreeMap<UserId, Account> {
        self.accounts
            .iter()
            .map(|(id, account)| (id.clone(), account.clone()))
            .collect()
    }

    pub fn create(&mut self, id: &str, name: &str) -> Result<(), ExchangeError> {
        if self.accounts.contains_key(id) {
            return Err(ExchangeError::DuplicateId(format!("user {id}")));
        }
        self.accounts.insert(id.to_string(), Account::new(name));
        debug!(user = id, name, "user created");
        Ok(())
    }

    /// Deposit must be strictly positive.
    pub fn deposit(&mut self, id: &str, amount: u64) -> Result<(), ExchangeError> {
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount(
                "deposit must be positive".to_string(),
            ));
        }
        let account = self.account_mut(id)?;
        account.balance = account.balance.checked_add(amount).ok_or_else(|| {
            ExchangeError::InvalidAmount(format!("deposit of {amount} overflows balance"))
        })?;
        debug!(user = id, amount, balance = account.balance, "deposit");
        Ok(())
    }

    /// Withdrawal must be strictly positive and covered by the balance.
    pub fn withdraw(&mut self, id: &str, amount: u64) -> Result<(), ExchangeError> {
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount(
                "withdrawal must be positive".to_string(),
            ));
        }
        let account = self.account_mut(id)?;
        if amount > account.balance {
            return Err(ExchangeError::InvalidAmount(format!(
                "withdrawal of {amount} exceeds balance {}",
                account.balance
            )));
        }
        account.balance -= amount;
        debug!(user = id, amount, balance = account.balance, "withdrawal");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<UserInfo, ExchangeError> {
        let account = self
            .accounts
            .get(id)
            .ok_or_else(|| ExchangeError::NotFound(format!("user {id}")))?;
        Ok(UserInfo {
            id: id.to_string(),
            name: account.name.clone(),
            balance: account.balance,
        })
    }

    /// Bet ids placed by the user, newest first.
    pub fn bets(&self, id: &str) -> Result<Vec<BetId>, ExchangeError> {
        let account = self
            .accounts
            .get(id)
            .ok_or_else(|| ExchangeError::NotFound(format!("user {id}")))?;
        Ok(account.bets.iter().rev().cloned().collect())
    }

    /// Record a placed bet against its owner.
    pub fn append_bet(&mut self, id: &str, bet: BetId) -> Result<(), ExchangeError> {
        self.account_mut(id)?.bets.push(bet);
        Ok(())
    }

    /// Credit refunds and payouts. Unlike `deposit` a zero amount is a
    /// no-op: refund loops hit already-empty bets and must stay idempotent.
    pub(crate) fn credit(&mut self, id: &str, amount: u64) -> Result<(), ExchangeError> {
        if amount == 0 {
            return Ok(());
        }
        let account = self.account_mut(id)?;
        account.balance = account.balance.checked_add(amount).ok_or_else(|| {
            ExchangeError::InvalidAmount(format!("credit of {amount} overflows balance"))
        })?;
        debug!(user = id, amount, balance = account.balance, "credit");
        Ok(())
    }

    fn account_mut(&mut self, id: &str) -> Result<&mut Account, ExchangeError> {
        self.accounts
            .get_mut(id)
            .ok_or_else(|| ExchangeError::NotFound(format!("user {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketId;

    fn bet_id(user: &str, counter: u64) -> BetId {
        BetId {
            user: user.to_string(),
            market: MarketId::from("m1"),
            counter,
        }
    }

    #[test]
    fn create_rejects_duplicates() {
        let mut ledger = Ledger::new();
        ledger.create("u1", "Alice").expect("first create");
        assert!(matches!(
            ledger.create("u1", "Alice again"),
            Err(ExchangeError::DuplicateId(_))
        ));
    }

    #[test]
    fn deposit_and_withdraw() {
        let mut ledger = Ledger::new();
        ledger.create("u1", "Alice").expect("create");
        ledger.deposit("u1", 2000).expect("deposit");
        ledger.withdraw("u1", 500).expect("withdraw");
        assert_eq!(ledger.get("u1").expect("get").balance, 1500);
    }

    #[test]
    fn zero_amounts_are_invalid() {
        let mut ledger = Ledger::new();
        ledger.create("u1", "Alice").expect("create");
        assert!(matches!(
            ledger.deposit("u1", 0),
            Err(ExchangeError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.withdraw("u1", 0),
            Err(ExchangeError::InvalidAmount(_))
        ));
    }

    #[test]
    fn overdraft_is_rejected() {
        let mut ledger = Ledger::new();
        ledger.create("u1", "Alice").expect("create");
        ledger.deposit("u1", 100).expect("deposit");
        assert!(matches!(
            ledger.withdraw("u1", 101),
            Err(ExchangeError::InvalidAmount(_))
        ));
        assert_eq!(ledger.get("u1").expect("get").balance, 100);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let mut ledger = Ledger::new();
        assert!(matches!(
            ledger.deposit("ghost", 1),
            Err(ExchangeError::NotFound(_))
        ));
        assert!(matches!(ledger.get("ghost"), Err(ExchangeError::NotFound(_))));
    }

    #[test]
    fn bets_come_back_newest_first() {
        let mut ledger = Ledger::new();
        ledger.create("u1", "Alice").expect("create");
        ledger.append_bet("u1", bet_id("u1", 1)).expect("append");
        ledger.append_bet("u1", bet_id("u1", 2)).expect("append");
        ledger.append_bet("u1", bet_id("u1", 3)).expect("append");

        let counters: Vec<u64> = ledger
            .bets("u1")
            .expect("bets")
            .into_iter()
            .map(|b| b.counter)
            .collect();
        assert_eq!(counters, vec![3, 2, 1]);
    }

    #[test]
    fn credit_zero_is_a_no_op() {
        let mut ledger = Ledger::new();
        ledger.create("u1", "Alice").expect("create");
        ledger.credit("u1", 0).expect("zero credit");
        assert_eq!(ledger.get("u1").expect("get").balance, 0);
    }

    #[test]
    fn restore_round_trips_accounts() {
        let mut ledger = Ledger::new();
        ledger.create("u1", "Alice").expect("create");
        ledger.deposit("u1", 750).expect("deposit");
        ledger.append_bet("u1", bet_id("u1", 1)).expect("append");

        let restored = Ledger::restore(ledger.accounts());
        assert_eq!(restored.get("u1").expect("get").balance, 750);
        assert_eq!(restored.bets("u1").expect("bets").len(), 1);
    }
}
