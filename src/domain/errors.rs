use thiserror::Error;

/// Sentinel errors for the settlement core. Handlers compare these by
/// variant (via `downcast_ref` on an `anyhow::Error`) and map them onto
/// one of four response families: validation, conflict, authorisation,
/// transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DomainError {
    // ── Validation ──
    #[error("bet amount is below the minimum")]
    BetTooSmall,
    #[error("invalid bet direction: must be UP or DOWN")]
    InvalidDirection,
    #[error("withdrawal amount is below the minimum")]
    BelowMinWithdraw,
    #[error("IBAN is malformed")]
    InvalidIban,
    #[error("amount must be positive")]
    NonPositiveAmount,

    // ── Conflict ──
    #[error("market not found")]
    MarketNotFound,
    #[error("market is not open for betting")]
    MarketNotOpen,
    #[error("no open market available")]
    NoOpenMarket,
    #[error("bet is not active")]
    BetNotActive,
    #[error("email address is already registered")]
    EmailTaken,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("withdraw request not found")]
    WithdrawNotFound,
    #[error("withdraw request already reviewed")]
    WithdrawAlreadyReviewed,

    // ── Authorisation ──
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: insufficient permissions")]
    Forbidden,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("token has expired")]
    TokenExpired,
    #[error("token is invalid")]
    TokenInvalid,
    #[error("user account is inactive")]
    UserInactive,

    // ── Wallet ──
    #[error("insufficient wallet balance")]
    InsufficientBalance,
    #[error("wallet not found")]
    WalletNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("daily withdrawal limit exceeded")]
    WithdrawLimitExceeded,

    // ── Market maker ──
    #[error("market maker reserve is below minimum threshold")]
    MmReserveInsufficient,
    #[error("market maker daily loss limit exceeded")]
    MmDailyLossExceeded,

    // ── Transient ──
    #[error("all price sources are down")]
    AllSourcesDown,
}

impl DomainError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::BetTooSmall
                | DomainError::InvalidDirection
                | DomainError::BelowMinWithdraw
                | DomainError::InvalidIban
                | DomainError::NonPositiveAmount
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::MarketNotFound
                | DomainError::NoOpenMarket
                | DomainError::UserNotFound
                | DomainError::WalletNotFound
                | DomainError::WithdrawNotFound
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::MarketNotOpen
                | DomainError::BetNotActive
                | DomainError::EmailTaken
                | DomainError::UsernameTaken
                | DomainError::WithdrawAlreadyReviewed
                | DomainError::InsufficientBalance
                | DomainError::WithdrawLimitExceeded
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            DomainError::Unauthorized
                | DomainError::Forbidden
                | DomainError::InvalidCredentials
                | DomainError::TokenExpired
                | DomainError::TokenInvalid
                | DomainError::UserInactive
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::AllSourcesDown)
    }
}
