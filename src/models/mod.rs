pub mod bet;
pub mod market;
pub mod user;

pub use bet::{Bet, BetId, BetSide, BetStatus, MatchedPortion};
pub use market::{MarketId, MarketInfo, MarketStatus};
pub use user::{Account, UserId, UserInfo};
