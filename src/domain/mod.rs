//! Core business entities for the BTC UP/DOWN prediction market.

pub mod bet;
pub mod errors;
pub mod market;
pub mod mm;
pub mod user;

pub use bet::{Bet, BetStatus};
pub use errors::DomainError;
pub use market::{Direction, Market, MarketStatus, MarketSummary, PriceSource};
pub use mm::MmPosition;
pub use user::{
    Transaction, TxKind, User, UserRole, Wallet, WithdrawRequest, WithdrawStatus,
};
