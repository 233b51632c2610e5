//! Market engine module.
//!
//! One engine per market, one task per engine.
//!
//! # Architecture
//!
//! ```text
//! Exchange (supervisor)
//!   ├→ Ledger (user balances, supervisor-owned)
//!   └→ MarketHandle (per market)
//!        └→ market task
//!             └→ MarketEngine
//!                  ├→ OrderBook (backs asc / lays desc, FIFO)
//!                  └→ bet records
//! ```
//!
//! The supervisor routes every public operation. Placement withdraws the
//! stake first and then hands the bet to the market task; lifecycle
//! transitions (`freeze`/`cancel`/`settle`) flip the market status inside
//! the task and return the bet list, after which the supervisor runs the
//! ledger refund/payout loop. Matching is a pure routine over the two book
//! heads, priced at the resting back's odds.

mod actor;
mod market;
mod matching;
mod orderbook;

pub use actor::MarketHandle;
pub use market::MarketEngine;
pub use matching::Fill;
pub use orderbook::OrderBook;
