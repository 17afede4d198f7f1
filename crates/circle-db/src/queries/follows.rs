use std::collections::HashSet;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use circle_types::models::{FollowEdge, FollowStatus, UserSummary};

use crate::models::{enum_col, timestamp};
use crate::queries::users::summary_from_row;

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<FollowEdge> {
    Ok(FollowEdge {
        id: row.get(0)?,
        follower_id: row.get(1)?,
        followed_id: row.get(2)?,
        status: enum_col(row, 3, FollowStatus::parse)?,
        created_at: timestamp(row, 4)?,
    })
}

pub fn find(conn: &Connection, follower_id: i64, followed_id: i64) -> Result<Option<FollowEdge>> {
    Ok(conn
        .query_row(
            "SELECT id, follower_id, followed_id, status, created_at FROM followers
             WHERE follower_id = ?1 AND followed_id = ?2",
            params![follower_id, followed_id],
            edge_from_row,
        )
        .optional()?)
}

pub fn by_id(conn: &Connection, id: i64) -> Result<Option<FollowEdge>> {
    Ok(conn
        .query_row(
            "SELECT id, follower_id, followed_id, status, created_at FROM followers WHERE id = ?1",
            [id],
            edge_from_row,
        )
        .optional()?)
}

pub fn insert(
    conn: &Connection,
    follower_id: i64,
    followed_id: i64,
    status: FollowStatus,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO followers (follower_id, followed_id, status) VALUES (?1, ?2, ?3)",
        params![follower_id, followed_id, status.as_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_status(conn: &Connection, id: i64, status: FollowStatus) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE followers SET status = ?2 WHERE id = ?1",
        params![id, status.as_str()],
    )?)
}

pub fn delete(conn: &Connection, follower_id: i64, followed_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM followers WHERE follower_id = ?1 AND followed_id = ?2",
        params![follower_id, followed_id],
    )?)
}

/// True iff an accepted edge exists from `a` to `b` or from `b` to `a`.
pub fn accepted_either_way(conn: &Connection, a: i64, b: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM followers
         WHERE status = 'accepted'
           AND ((follower_id = ?1 AND followed_id = ?2)
                OR (follower_id = ?2 AND followed_id = ?1))",
        params![a, b],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Ids of users `user_id` follows with an accepted edge.
pub fn accepted_followees(conn: &Connection, user_id: i64) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare(
        "SELECT followed_id FROM followers WHERE follower_id = ?1 AND status = 'accepted'",
    )?;
    let ids = stmt
        .query_map([user_id], |r| r.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(ids)
}

pub fn followers_of(conn: &Connection, user_id: i64) -> Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.avatar
         FROM followers f JOIN users u ON u.id = f.follower_id
         WHERE f.followed_id = ?1 AND f.status = 'accepted'
         ORDER BY u.username",
    )?;
    let rows = stmt
        .query_map([user_id], |row| summary_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn following_of(conn: &Connection, user_id: i64) -> Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.avatar
         FROM followers f JOIN users u ON u.id = f.followed_id
         WHERE f.follower_id = ?1 AND f.status = 'accepted'
         ORDER BY u.username",
    )?;
    let rows = stmt
        .query_map([user_id], |row| summary_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Pending requests addressed to `user_id`, oldest first, as (edge id, requester).
pub fn pending_for(conn: &Connection, user_id: i64) -> Result<Vec<(i64, UserSummary)>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, u.id, u.username, u.first_name, u.last_name, u.avatar
         FROM followers f JOIN users u ON u.id = f.follower_id
         WHERE f.followed_id = ?1 AND f.status = 'pending'
         ORDER BY f.id",
    )?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok((row.get(0)?, summary_from_row(row, 1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::migrate;
    use crate::queries::users::fixtures::user;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn one_edge_per_ordered_pair() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", false);

        insert(&conn, a, b, FollowStatus::Pending).unwrap();
        assert!(insert(&conn, a, b, FollowStatus::Accepted).is_err());
        // The reverse direction is a different pair.
        insert(&conn, b, a, FollowStatus::Pending).unwrap();
    }

    #[test]
    fn self_follow_is_rejected_by_schema() {
        let conn = conn();
        let a = user(&conn, "a", false);
        assert!(insert(&conn, a, a, FollowStatus::Accepted).is_err());
    }

    #[test]
    fn accepted_either_way_ignores_pending() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", false);

        let id = insert(&conn, a, b, FollowStatus::Pending).unwrap();
        assert!(!accepted_either_way(&conn, a, b).unwrap());

        set_status(&conn, id, FollowStatus::Accepted).unwrap();
        assert!(accepted_either_way(&conn, a, b).unwrap());
        assert!(accepted_either_way(&conn, b, a).unwrap());
        assert_eq!(followers_of(&conn, b).unwrap()[0].id, a);
        assert_eq!(following_of(&conn, a).unwrap()[0].id, b);
    }
}
