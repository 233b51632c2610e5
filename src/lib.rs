//! betmatch — peer-to-peer betting exchange engine.
//!
//! Users with monetary accounts place opposing back and lay bets on
//! binary-outcome markets; the exchange matches counterparties, settles
//! positions once the outcome is known and conserves money down to the
//! minor unit. Profits come from matching, never from taking positions.
//!
//! # Architecture
//!
//! ```text
//! ExchangeServer (start/stop/clean, snapshot store)
//!   └→ Exchange (supervisor)
//!        ├→ Ledger (user accounts, single writer)
//!        ├→ bet counter (exchange-wide, monotonic)
//!        └→ market tasks (one per market, single writer each)
//!             └→ MarketEngine (order book + bet records + settlement)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use betmatch::{ExchangeConfig, ExchangeServer};
//!
//! # async fn demo() -> Result<(), betmatch::ExchangeError> {
//! let mut server = ExchangeServer::new(&ExchangeConfig::with_data_dir("./data"))?;
//! server.start("main").await?;
//!
//! server.user_create("alice", "Alice")?;
//! server.user_deposit("alice", 2000)?;
//! let market = server.market_create("rain-tomorrow", "Will it rain tomorrow?")?;
//!
//! let bet = server.bet_back("alice", &market, 1000, 150).await?;
//! server.market_match(&market).await?;
//! server.market_settle(&market, true).await?;
//!
//! println!("{} -> {:?}", bet, server.user_get("alice")?);
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Money is integer minor units throughout; odds are decimal multipliers
//! scaled by 100 (`150` means 1.50). All truncation follows the matching
//! rules in [`engine`], with sub-unit drift accruing to the exchange.

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod models;
pub mod store;

pub use config::ExchangeConfig;
pub use error::ExchangeError;
pub use exchange::{Exchange, ExchangeServer};
pub use models::{
    Bet, BetId, BetSide, BetStatus, MarketId, MarketInfo, MarketStatus, MatchedPortion, UserId,
    UserInfo,
};
pub use store::{ExchangeSnapshot, FileStore, MarketSnapshot, SnapshotStore, StoreError};
