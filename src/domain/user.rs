use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Back-office access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
    Risk,
    Finance,
    Ops,
    Readonly,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
            UserRole::Risk => "risk",
            UserRole::Finance => "finance",
            UserRole::Ops => "ops",
            UserRole::Readonly => "readonly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            "risk" => Some(UserRole::Risk),
            "finance" => Some(UserRole::Finance),
            "ops" => Some(UserRole::Ops),
            "readonly" => Some(UserRole::Readonly),
            _ => None,
        }
    }

    /// Every non-standard role may enter the back-office.
    pub fn can_access_backoffice(&self) -> bool {
        *self != UserRole::User
    }

    pub fn is_admin(&self) -> bool {
        *self == UserRole::Admin
    }
}

/// A registered account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// TRY balance holder. Either owned by exactly one user, or the single
/// platform market-maker wallet (`wallet_type = 'platform_mm'`, no user).
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub wallet_type: Option<String>,
    pub balance: Decimal,
    /// Reserved funds; `balance − locked` is spendable.
    pub locked: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn available(&self) -> Decimal {
        self.balance - self.locked
    }
}

/// Audit classification for a wallet balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdraw,
    BetLock,
    BetUnlock,
    Payout,
    Cashout,
    Commission,
    Refund,
    Bonus,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::Withdraw => "withdraw",
            TxKind::BetLock => "bet_lock",
            TxKind::BetUnlock => "bet_unlock",
            TxKind::Payout => "payout",
            TxKind::Cashout => "cashout",
            TxKind::Commission => "commission",
            TxKind::Refund => "refund",
            TxKind::Bonus => "bonus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TxKind::Deposit),
            "withdraw" => Some(TxKind::Withdraw),
            "bet_lock" => Some(TxKind::BetLock),
            "bet_unlock" => Some(TxKind::BetUnlock),
            "payout" => Some(TxKind::Payout),
            "cashout" => Some(TxKind::Cashout),
            "commission" => Some(TxKind::Commission),
            "refund" => Some(TxKind::Refund),
            "bonus" => Some(TxKind::Bonus),
            _ => None,
        }
    }
}

/// Immutable audit record. Exactly one row is written for every wallet
/// mutation, inside the same transaction as the mutation itself.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: TxKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    /// Bet or market this movement refers to, when applicable.
    pub ref_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl WithdrawStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawStatus::Pending => "pending",
            WithdrawStatus::Approved => "approved",
            WithdrawStatus::Rejected => "rejected",
            WithdrawStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WithdrawStatus::Pending),
            "approved" => Some(WithdrawStatus::Approved),
            "rejected" => Some(WithdrawStatus::Rejected),
            "completed" => Some(WithdrawStatus::Completed),
            _ => None,
        }
    }
}

/// A recorded withdrawal request. Review happens in the back-office; no
/// fiat transfer is executed here.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub status: WithdrawStatus,
    pub iban: String,
    pub note: String,
    pub reviewed_by: Option<Uuid>,
    pub review_note: String,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}
