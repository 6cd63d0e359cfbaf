//! Wallet rows and the immutable audit trail.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{DomainError, Transaction, TxKind, Wallet};

use super::{decimal_col, opt_uuid_col, time_col, uuid_col};

const PLATFORM_WALLET_TYPE: &str = "platform_mm";

fn map_wallet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        id: uuid_col(row, 0)?,
        user_id: opt_uuid_col(row, 1)?,
        wallet_type: row.get(2)?,
        balance: decimal_col(row, 3)?,
        locked: decimal_col(row, 4)?,
        created_at: time_col(row, 5)?,
        updated_at: time_col(row, 6)?,
    })
}

const WALLET_COLS: &str =
    "id, user_id, wallet_type, balance, locked, created_at, updated_at";

/// Create the singleton platform MM wallet if it does not exist yet.
pub fn ensure_platform_wallet(conn: &Connection) -> Result<()> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM wallets WHERE wallet_type = ?1",
            [PLATFORM_WALLET_TYPE],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO wallets (id, user_id, wallet_type, balance, locked, created_at, updated_at)
             VALUES (?1, NULL, ?2, '0', '0', ?3, ?3)",
            params![Uuid::new_v4().to_string(), PLATFORM_WALLET_TYPE, now],
        )?;
    }
    Ok(())
}

pub fn create_for_user(conn: &Connection, user_id: Uuid, now: DateTime<Utc>) -> Result<Wallet> {
    let wallet = Wallet {
        id: Uuid::new_v4(),
        user_id: Some(user_id),
        wallet_type: None,
        balance: Decimal::ZERO,
        locked: Decimal::ZERO,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO wallets (id, user_id, wallet_type, balance, locked, created_at, updated_at)
         VALUES (?1, ?2, NULL, '0', '0', ?3, ?3)",
        params![
            wallet.id.to_string(),
            user_id.to_string(),
            now.to_rfc3339()
        ],
    )?;
    Ok(wallet)
}

pub fn get_by_user(conn: &Connection, user_id: Uuid) -> Result<Wallet> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {WALLET_COLS} FROM wallets WHERE user_id = ?1"
    ))?;
    stmt.query_row([user_id.to_string()], map_wallet)
        .optional()?
        .ok_or_else(|| DomainError::WalletNotFound.into())
}

pub fn get_platform(conn: &Connection) -> Result<Wallet> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {WALLET_COLS} FROM wallets WHERE wallet_type = ?1"
    ))?;
    stmt.query_row([PLATFORM_WALLET_TYPE], map_wallet)
        .optional()?
        .ok_or_else(|| DomainError::WalletNotFound.into())
}

/// Deduct from a user wallet, failing with `InsufficientBalance` when the
/// available balance (`balance − locked`) would go negative. Returns the
/// wallet state prior to the deduction for audit pairing.
pub fn deduct_balance(conn: &Connection, user_id: Uuid, amount: Decimal) -> Result<Wallet> {
    let wallet = get_by_user(conn, user_id)?;
    if wallet.available() < amount {
        return Err(DomainError::InsufficientBalance.into());
    }
    write_balance(conn, wallet.id, wallet.balance - amount)?;
    Ok(wallet)
}

/// Credit a user wallet. Returns the pre-credit wallet state.
pub fn add_balance(conn: &Connection, user_id: Uuid, amount: Decimal) -> Result<Wallet> {
    let wallet = get_by_user(conn, user_id)?;
    write_balance(conn, wallet.id, wallet.balance + amount)?;
    Ok(wallet)
}

/// Deduct from the platform MM wallet; the full balance must remain
/// non-negative. Returns the pre-deduction wallet state.
pub fn deduct_platform_balance(conn: &Connection, amount: Decimal) -> Result<Wallet> {
    let wallet = get_platform(conn)?;
    if wallet.balance < amount {
        return Err(DomainError::InsufficientBalance.into());
    }
    write_balance(conn, wallet.id, wallet.balance - amount)?;
    Ok(wallet)
}

/// Credit the platform MM wallet. Returns the pre-credit wallet state.
pub fn add_platform_balance(conn: &Connection, amount: Decimal) -> Result<Wallet> {
    let wallet = get_platform(conn)?;
    write_balance(conn, wallet.id, wallet.balance + amount)?;
    Ok(wallet)
}

fn write_balance(conn: &Connection, wallet_id: Uuid, new_balance: Decimal) -> Result<()> {
    conn.execute(
        "UPDATE wallets SET balance = ?1, updated_at = ?2 WHERE id = ?3",
        params![
            new_balance.to_string(),
            Utc::now().to_rfc3339(),
            wallet_id.to_string()
        ],
    )?;
    Ok(())
}

/// Append an audit entry. Must be called inside the same transaction as the
/// balance mutation it records.
pub fn log_transaction(conn: &Connection, txn: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO wallet_transactions
            (id, wallet_id, kind, amount, balance_before, balance_after, ref_id, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            txn.id.to_string(),
            txn.wallet_id.to_string(),
            txn.kind.as_str(),
            txn.amount.to_string(),
            txn.balance_before.to_string(),
            txn.balance_after.to_string(),
            txn.ref_id.map(|id| id.to_string()),
            txn.description,
            txn.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Convenience: build and append the audit entry for a wallet that moved
/// from `before.balance` by `delta` (positive = credit, negative = debit).
pub fn audit(
    conn: &Connection,
    before: &Wallet,
    kind: TxKind,
    delta: Decimal,
    ref_id: Option<Uuid>,
    description: String,
) -> Result<()> {
    log_transaction(
        conn,
        &Transaction {
            id: Uuid::new_v4(),
            wallet_id: before.id,
            kind,
            amount: delta.abs(),
            balance_before: before.balance,
            balance_after: before.balance + delta,
            ref_id,
            description,
            created_at: Utc::now(),
        },
    )
}

fn map_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let kind_raw: String = row.get(2)?;
    Ok(Transaction {
        id: uuid_col(row, 0)?,
        wallet_id: uuid_col(row, 1)?,
        kind: TxKind::parse(&kind_raw).unwrap_or(TxKind::Deposit),
        amount: decimal_col(row, 3)?,
        balance_before: decimal_col(row, 4)?,
        balance_after: decimal_col(row, 5)?,
        ref_id: opt_uuid_col(row, 6)?,
        description: row.get(7)?,
        created_at: time_col(row, 8)?,
    })
}

const TX_COLS: &str =
    "id, wallet_id, kind, amount, balance_before, balance_after, ref_id, description, created_at";

pub fn transactions_for_user(
    conn: &Connection,
    user_id: Uuid,
    limit: usize,
    offset: usize,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TX_COLS} FROM wallet_transactions
         WHERE wallet_id = (SELECT id FROM wallets WHERE user_id = ?1)
         ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(
        params![user_id.to_string(), limit as i64, offset as i64],
        map_transaction,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn transactions_for_wallet(
    conn: &Connection,
    wallet_id: Uuid,
    limit: usize,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TX_COLS} FROM wallet_transactions
         WHERE wallet_id = ?1 ORDER BY created_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![wallet_id.to_string(), limit as i64], map_transaction)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
