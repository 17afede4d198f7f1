use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};

use circle_types::models::Notification;

use crate::models::{NewNotification, timestamp};

const NOTIFICATION_SELECT: &str = "SELECT n.id, n.to_user_id, n.from_user_id, n.content,
            n.type, n.group_id, g.title, n.is_read, n.created_at
     FROM notifications n LEFT JOIN groups g ON g.id = n.group_id";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        to_user_id: row.get(1)?,
        from_user_id: row.get(2)?,
        content: row.get(3)?,
        kind: row.get(4)?,
        group_id: row.get(5)?,
        group_title: row.get(6)?,
        read: row.get(7)?,
        created_at: timestamp(row, 8)?,
    })
}

/// Insert an unread notification and return it as stored.
pub fn insert(conn: &Connection, n: &NewNotification<'_>) -> Result<Notification> {
    conn.execute(
        "INSERT INTO notifications (to_user_id, from_user_id, content, type, group_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![n.to_user_id, n.from_user_id, n.content, n.kind, n.group_id],
    )?;
    let id = conn.last_insert_rowid();
    let sql = format!("{NOTIFICATION_SELECT} WHERE n.id = ?1");
    conn.query_row(&sql, [id], notification_from_row)
        .map_err(|e| anyhow!("notification {} vanished after insert: {}", id, e))
}

/// Unread notifications for `user_id`, newest first.
pub fn unread_for(conn: &Connection, user_id: i64, limit: u32) -> Result<Vec<Notification>> {
    let sql = format!(
        "{NOTIFICATION_SELECT} WHERE n.to_user_id = ?1 AND n.is_read = 0
         ORDER BY n.created_at DESC, n.id DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, limit], notification_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mark an unread notification owned by `user_id` as read. Returns the
/// number of rows changed: 0 when it is missing, not theirs, or already read.
pub fn mark_read(conn: &Connection, id: i64, user_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND to_user_id = ?2 AND is_read = 0",
        params![id, user_id],
    )?)
}

/// Delete the user's notifications of one kind about one group. Used once
/// the thing they announced has been resolved.
pub fn delete_for_group(
    conn: &Connection,
    user_id: i64,
    kind: &str,
    group_id: i64,
) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM notifications WHERE to_user_id = ?1 AND type = ?2 AND group_id = ?3",
        params![user_id, kind, group_id],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::migrate;
    use crate::queries::groups;
    use crate::queries::users::fixtures::user;

    #[test]
    fn unread_is_newest_first_with_group_titles() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", false);
        let gid = groups::insert(&conn, b, "Chess", "").unwrap();

        let first = insert(
            &conn,
            &NewNotification {
                to_user_id: a,
                from_user_id: Some(b),
                kind: "follow_request",
                content: "hi",
                group_id: None,
            },
        )
        .unwrap();
        let second = insert(
            &conn,
            &NewNotification {
                to_user_id: a,
                from_user_id: Some(b),
                kind: "group_invitation",
                content: "join",
                group_id: Some(gid),
            },
        )
        .unwrap();
        assert!(!second.read);

        let list = unread_for(&conn, a, 50).unwrap();
        let ids: Vec<i64> = list.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(list[0].group_title.as_deref(), Some("Chess"));

        assert_eq!(mark_read(&conn, first.id, b).unwrap(), 0);
        assert_eq!(mark_read(&conn, first.id, a).unwrap(), 1);
        assert_eq!(mark_read(&conn, first.id, a).unwrap(), 0);
        assert_eq!(unread_for(&conn, a, 50).unwrap().len(), 1);
    }

    #[test]
    fn delete_for_group_is_scoped() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", false);
        let chess = groups::insert(&conn, b, "Chess", "").unwrap();
        let go = groups::insert(&conn, b, "Go", "").unwrap();
        for (to, gid) in [(a, chess), (a, go), (b, chess)] {
            let note = NewNotification {
                to_user_id: to,
                from_user_id: None,
                kind: "group_invitation",
                content: "join",
                group_id: Some(gid),
            };
            insert(&conn, &note).unwrap();
        }

        let removed = delete_for_group(&conn, a, "group_invitation", chess).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(delete_for_group(&conn, a, "group_event", go).unwrap(), 0);
        let left = unread_for(&conn, a, 50).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].group_id, Some(go));
        assert_eq!(unread_for(&conn, b, 50).unwrap().len(), 1);
    }
}
