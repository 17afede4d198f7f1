//! Database row types. Where a row maps one-to-one onto an API model the
//! query modules return the `circle-types` model directly; the types here
//! carry columns that never leave the server or that only feed decisions.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use circle_types::models::{ChatKind, GroupRole, MembershipStatus, UserProfile, UserSummary};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub avatar: String,
    pub about_me: String,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            avatar: self.avatar.clone(),
        }
    }

    pub fn into_profile(self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            date_of_birth: self.date_of_birth,
            avatar: self.avatar,
            about_me: self.about_me,
            is_private: self.is_private,
            created_at: self.created_at,
        }
    }
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub date_of_birth: &'a str,
    pub avatar: &'a str,
    pub about_me: &'a str,
    pub is_private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRow {
    pub group_id: i64,
    pub user_id: i64,
    pub role: GroupRole,
    pub status: MembershipStatus,
}

impl MemberRow {
    pub fn is_accepted(&self) -> bool {
        self.status == MembershipStatus::Accepted
    }

    /// Accepted creator or admin.
    pub fn is_manager(&self) -> bool {
        self.is_accepted() && self.role >= GroupRole::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRow {
    pub id: i64,
    pub kind: ChatKind,
    pub group_id: Option<i64>,
}

pub struct NewPost<'a> {
    pub author_id: i64,
    pub title: &'a str,
    pub content: &'a str,
    pub media: &'a str,
    pub privacy: i64,
    pub group_id: Option<i64>,
}

pub struct NewNotification<'a> {
    pub to_user_id: i64,
    pub from_user_id: Option<i64>,
    pub kind: &'a str,
    pub content: &'a str,
    pub group_id: Option<i64>,
}

// -- Column helpers --

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

/// Timestamps are written as `%Y-%m-%dT%H:%M:%fZ`; plain `datetime('now')`
/// output is accepted as well.
pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
        Ok(naive) => Ok(naive.and_utc()),
        Err(e) => {
            let msg = format!("bad timestamp {raw:?}: {e}");
            Err(conversion_error(idx, msg))
        }
    }
}

/// Read a TEXT column and decode it with `parse`.
pub(crate) fn enum_col<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    match parse(&raw) {
        Some(value) => Ok(value),
        None => {
            let msg = format!("unexpected value {raw:?}");
            Err(conversion_error(idx, msg))
        }
    }
}
