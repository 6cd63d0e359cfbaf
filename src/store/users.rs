//! User account rows. The wallet row is created in the same transaction as
//! the user so no account ever exists without one.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::domain::{DomainError, User, UserRole};

use super::{time_col, uuid_col, wallets};

const USER_COLS: &str =
    "id, email, username, password_hash, role, is_active, created_at, updated_at";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_raw: String = row.get(4)?;
    Ok(User {
        id: uuid_col(row, 0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        role: UserRole::parse(&role_raw).unwrap_or(UserRole::User),
        is_active: row.get::<_, i64>(5)? == 1,
        created_at: time_col(row, 6)?,
        updated_at: time_col(row, 7)?,
    })
}

/// Insert a user plus their wallet. Duplicate email/username surface as the
/// matching sentinel.
pub fn create(
    conn: &Connection,
    email: &str,
    username: &str,
    password_hash: &str,
    role: UserRole,
) -> Result<User> {
    if get_by_email(conn, email)?.is_some() {
        return Err(DomainError::EmailTaken.into());
    }
    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE username = ?1",
            [username],
            |row| row.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(DomainError::UsernameTaken.into());
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        role,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO users (id, email, username, password_hash, role, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![
            user.id.to_string(),
            user.email,
            user.username,
            user.password_hash,
            user.role.as_str(),
            now.to_rfc3339(),
        ],
    )?;
    wallets::create_for_user(conn, user.id, now)?;
    Ok(user)
}

pub fn get_by_id(conn: &Connection, id: Uuid) -> Result<User> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {USER_COLS} FROM users WHERE id = ?1"))?;
    stmt.query_row([id.to_string()], map_user)
        .optional()?
        .ok_or_else(|| DomainError::UserNotFound.into())
}

pub fn get_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {USER_COLS} FROM users WHERE email = ?1"))?;
    Ok(stmt.query_row([email], map_user).optional()?)
}

pub fn set_role(conn: &Connection, user_id: Uuid, role: UserRole) -> Result<()> {
    let n = conn.execute(
        "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
        params![
            role.as_str(),
            Utc::now().to_rfc3339(),
            user_id.to_string()
        ],
    )?;
    if n == 0 {
        return Err(DomainError::UserNotFound.into());
    }
    Ok(())
}

pub fn set_active(conn: &Connection, user_id: Uuid, active: bool) -> Result<()> {
    let n = conn.execute(
        "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
        params![
            active as i64,
            Utc::now().to_rfc3339(),
            user_id.to_string()
        ],
    )?;
    if n == 0 {
        return Err(DomainError::UserNotFound.into());
    }
    Ok(())
}
