use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use circle_types::models::UserSummary;

use crate::models::{NewUser, UserRow, timestamp};

const USER_COLUMNS: &str = "id, username, email, password, first_name, last_name, \
     date_of_birth, avatar, about_me, is_private, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        date_of_birth: row.get(6)?,
        avatar: row.get(7)?,
        about_me: row.get(8)?,
        is_private: row.get(9)?,
        created_at: timestamp(row, 10)?,
    })
}

/// Map `id, username, first_name, last_name, avatar` starting at `offset`.
pub(crate) fn summary_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        first_name: row.get(offset + 2)?,
        last_name: row.get(offset + 3)?,
        avatar: row.get(offset + 4)?,
    })
}

pub fn insert(conn: &Connection, user: &NewUser<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, email, password, first_name, last_name,
                            date_of_birth, avatar, about_me, is_private)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user.username,
            user.email,
            user.password_hash,
            user.first_name,
            user.last_name,
            user.date_of_birth,
            user.avatar,
            user.about_me,
            user.is_private,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Either identifier is already in use as a username or an email. Both
/// columns are checked because login accepts either one.
pub fn login_taken(conn: &Connection, username: &str, email: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users
         WHERE username IN (?1, ?2) OR email IN (?1, ?2)",
        params![username, email],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub fn by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], user_from_row).optional()?)
}

/// Look a user up by username or by email.
pub fn by_login(conn: &Connection, login: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?1");
    Ok(conn.query_row(&sql, [login], user_from_row).optional()?)
}

pub fn exists(conn: &Connection, id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        [id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub fn summary(conn: &Connection, id: i64) -> Result<Option<UserSummary>> {
    Ok(conn
        .query_row(
            "SELECT id, username, first_name, last_name, avatar FROM users WHERE id = ?1",
            [id],
            |row| summary_from_row(row, 0),
        )
        .optional()?)
}

/// Only the fields that are `Some` are changed.
pub fn update_profile(
    conn: &Connection,
    id: i64,
    avatar: Option<&str>,
    about_me: Option<&str>,
    is_private: Option<bool>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE users SET
            avatar = COALESCE(?2, avatar),
            about_me = COALESCE(?3, about_me),
            is_private = COALESCE(?4, is_private)
         WHERE id = ?1",
        params![id, avatar, about_me, is_private],
    )?)
}

/// Usernames starting with `prefix`, excluding `exclude`. `%` and `_` in the
/// prefix match literally.
pub fn search_prefix(
    conn: &Connection,
    prefix: &str,
    exclude: i64,
    limit: u32,
) -> Result<Vec<UserSummary>> {
    let escaped = prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let mut stmt = conn.prepare(
        "SELECT id, username, first_name, last_name, avatar FROM users
         WHERE username LIKE ?1 || '%' ESCAPE '\\' AND id != ?2
         ORDER BY username
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![escaped, exclude, limit], |row| summary_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
