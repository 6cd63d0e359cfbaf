//! Withdrawal request rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{DomainError, WithdrawRequest, WithdrawStatus};

use super::{day_start, decimal_col, opt_time_col, opt_uuid_col, time_col, uuid_col};

const REQUEST_COLS: &str = "id, user_id, amount, status, iban, note, reviewed_by, review_note, \
     requested_at, reviewed_at";

fn map_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<WithdrawRequest> {
    let status_raw: String = row.get(3)?;
    Ok(WithdrawRequest {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        amount: decimal_col(row, 2)?,
        status: WithdrawStatus::parse(&status_raw).unwrap_or(WithdrawStatus::Pending),
        iban: row.get(4)?,
        note: row.get(5)?,
        reviewed_by: opt_uuid_col(row, 6)?,
        review_note: row.get(7)?,
        requested_at: time_col(row, 8)?,
        reviewed_at: opt_time_col(row, 9)?,
    })
}

pub fn insert(conn: &Connection, req: &WithdrawRequest) -> Result<()> {
    conn.execute(
        "INSERT INTO withdraw_requests
            (id, user_id, amount, status, iban, note, requested_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            req.id.to_string(),
            req.user_id.to_string(),
            req.amount.to_string(),
            req.status.as_str(),
            req.iban,
            req.note,
            req.requested_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: Uuid) -> Result<WithdrawRequest> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {REQUEST_COLS} FROM withdraw_requests WHERE id = ?1"
    ))?;
    stmt.query_row([id.to_string()], map_request)
        .optional()?
        .ok_or_else(|| DomainError::WithdrawNotFound.into())
}

pub fn list(
    conn: &Connection,
    status: Option<WithdrawStatus>,
    limit: usize,
    offset: usize,
) -> Result<Vec<WithdrawRequest>> {
    match status {
        Some(status) => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {REQUEST_COLS} FROM withdraw_requests WHERE status = ?1
                 ORDER BY requested_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![status.as_str(), limit as i64, offset as i64],
                map_request,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        }
        None => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {REQUEST_COLS} FROM withdraw_requests
                 ORDER BY requested_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], map_request)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        }
    }
}

/// Record a review decision. Only pending requests can be reviewed.
pub fn review(
    conn: &Connection,
    id: Uuid,
    status: WithdrawStatus,
    reviewer: Uuid,
    review_note: &str,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE withdraw_requests
         SET status = ?1, reviewed_by = ?2, review_note = ?3, reviewed_at = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![
            status.as_str(),
            reviewer.to_string(),
            review_note,
            Utc::now().to_rfc3339(),
            id.to_string()
        ],
    )?;
    if n == 0 {
        // Distinguish missing from already-reviewed for the operator.
        get_by_id(conn, id)?;
        return Err(DomainError::WithdrawAlreadyReviewed.into());
    }
    Ok(())
}

/// Today's cumulative withdrawal amount for a user across every request
/// that still holds (or already moved) funds: pending, approved, completed.
pub fn daily_total(conn: &Connection, user_id: Uuid, now: DateTime<Utc>) -> Result<Decimal> {
    let mut stmt = conn.prepare_cached(
        "SELECT amount FROM withdraw_requests
         WHERE user_id = ?1 AND requested_at >= ?2 AND status != 'rejected'",
    )?;
    let rows = stmt.query_map(
        params![user_id.to_string(), day_start(now).to_rfc3339()],
        |row| decimal_col(row, 0),
    )?;
    let mut total = Decimal::ZERO;
    for amount in rows {
        total += amount?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{users, Ledger};
    use rust_decimal_macros::dec;

    fn request(user_id: Uuid, amount: Decimal) -> WithdrawRequest {
        WithdrawRequest {
            id: Uuid::new_v4(),
            user_id,
            amount,
            status: WithdrawStatus::Pending,
            iban: "TR330006100519786457841326".into(),
            note: String::new(),
            reviewed_by: None,
            review_note: String::new(),
            requested_at: Utc::now(),
            reviewed_at: None,
        }
    }

    #[tokio::test]
    async fn review_only_once() {
        let ledger = Ledger::open_in_memory().unwrap();
        let conn = ledger.lock().await;
        let user = users::create(
            &conn,
            "w@example.com",
            "withdrawer",
            "hash",
            crate::domain::UserRole::User,
        )
        .unwrap();
        let admin = users::create(
            &conn,
            "admin@example.com",
            "admin",
            "hash",
            crate::domain::UserRole::Admin,
        )
        .unwrap();

        let req = request(user.id, dec!(100));
        insert(&conn, &req).unwrap();

        review(&conn, req.id, WithdrawStatus::Approved, admin.id, "ok").unwrap();
        let err =
            review(&conn, req.id, WithdrawStatus::Rejected, admin.id, "again").unwrap_err();
        assert_eq!(
            err.downcast_ref::<DomainError>(),
            Some(&DomainError::WithdrawAlreadyReviewed)
        );
        assert_eq!(
            get_by_id(&conn, req.id).unwrap().status,
            WithdrawStatus::Approved
        );
    }

    #[tokio::test]
    async fn daily_total_skips_rejected() {
        let ledger = Ledger::open_in_memory().unwrap();
        let conn = ledger.lock().await;
        let user = users::create(
            &conn,
            "w@example.com",
            "withdrawer",
            "hash",
            crate::domain::UserRole::User,
        )
        .unwrap();
        let admin = users::create(
            &conn,
            "admin@example.com",
            "admin",
            "hash",
            crate::domain::UserRole::Admin,
        )
        .unwrap();

        let first = request(user.id, dec!(100));
        let second = request(user.id, dec!(40));
        insert(&conn, &first).unwrap();
        insert(&conn, &second).unwrap();
        review(&conn, second.id, WithdrawStatus::Rejected, admin.id, "no").unwrap();

        assert_eq!(daily_total(&conn, user.id, Utc::now()).unwrap(), dec!(100));
    }
}
