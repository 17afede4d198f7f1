use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use circle_types::models::{ChatKind, ChatMessage, UserSummary};

use crate::models::{ChatRow, enum_col, timestamp};
use crate::queries::users::summary_from_row;

const MESSAGE_SELECT: &str = "SELECT m.id, m.chat_id, m.sender_id, m.recipient_id,
            m.content, m.status, m.message_type, u.username, m.created_at
     FROM chat_messages m JOIN users u ON u.id = m.sender_id";

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        kind: enum_col(row, 1, ChatKind::parse)?,
        group_id: row.get(2)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        content: row.get(4)?,
        status: row.get(5)?,
        message_type: row.get(6)?,
        sender_name: row.get(7)?,
        created_at: timestamp(row, 8)?,
    })
}

pub fn by_id(conn: &Connection, id: i64) -> Result<Option<ChatRow>> {
    Ok(conn
        .query_row(
            "SELECT id, kind, group_id FROM chats WHERE id = ?1",
            [id],
            chat_from_row,
        )
        .optional()?)
}

/// The direct chat whose two participants are `a` and `b`, if any.
pub fn find_direct(conn: &Connection, a: i64, b: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT c.id FROM chats c
             JOIN chat_participants pa ON pa.chat_id = c.id AND pa.user_id = ?1
             JOIN chat_participants pb ON pb.chat_id = c.id AND pb.user_id = ?2
             WHERE c.kind = 'direct'
             ORDER BY c.id
             LIMIT 1",
            params![a, b],
            |r| r.get(0),
        )
        .optional()?)
}

/// Create a direct chat with exactly `a` and `b` as participants. Two
/// statements; run it inside the caller's transaction.
pub fn create_direct(conn: &Connection, a: i64, b: i64) -> Result<i64> {
    conn.execute("INSERT INTO chats (kind) VALUES ('direct')", [])?;
    let chat_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2), (?1, ?3)",
        params![chat_id, a, b],
    )?;
    Ok(chat_id)
}

/// Group chats have no participant rows; membership comes from the group.
pub fn create_group_chat(conn: &Connection, group_id: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO chats (kind, group_id) VALUES ('group', ?1)",
        [group_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn group_chat_id(conn: &Connection, group_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM chats WHERE group_id = ?1",
            [group_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Direct participation or accepted membership of the chat's group.
pub fn is_participant(conn: &Connection, chat: &ChatRow, user_id: i64) -> Result<bool> {
    let count: i64 = match chat.kind {
        ChatKind::Direct => conn.query_row(
            "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
            params![chat.id, user_id],
            |r| r.get(0),
        )?,
        ChatKind::Group => conn.query_row(
            "SELECT COUNT(*) FROM group_members
             WHERE group_id = ?1 AND user_id = ?2 AND status = 'accepted'",
            params![chat.group_id, user_id],
            |r| r.get(0),
        )?,
    };
    Ok(count > 0)
}

pub fn participants(conn: &Connection, chat: &ChatRow) -> Result<Vec<UserSummary>> {
    let sql = match chat.kind {
        ChatKind::Direct => {
            "SELECT u.id, u.username, u.first_name, u.last_name, u.avatar
             FROM chat_participants p JOIN users u ON u.id = p.user_id
             WHERE p.chat_id = ?1
             ORDER BY u.id"
        }
        ChatKind::Group => {
            "SELECT u.id, u.username, u.first_name, u.last_name, u.avatar
             FROM group_members m JOIN users u ON u.id = m.user_id
             WHERE m.group_id = ?1 AND m.status = 'accepted'
             ORDER BY u.id"
        }
    };
    let key = match chat.kind {
        ChatKind::Direct => chat.id,
        ChatKind::Group => chat.group_id.unwrap_or_default(),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([key], |row| summary_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The other participant of a direct chat.
pub fn direct_peer(conn: &Connection, chat_id: i64, user_id: i64) -> Result<Option<UserSummary>> {
    Ok(conn
        .query_row(
            "SELECT u.id, u.username, u.first_name, u.last_name, u.avatar
             FROM chat_participants p JOIN users u ON u.id = p.user_id
             WHERE p.chat_id = ?1 AND p.user_id != ?2",
            params![chat_id, user_id],
            |row| summary_from_row(row, 0),
        )
        .optional()?)
}

/// Direct chats the user participates in plus the chats of groups they are
/// an accepted member of, most recently active first.
pub fn chats_for(conn: &Connection, user_id: i64) -> Result<Vec<ChatRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.kind, c.group_id FROM chats c
         WHERE c.id IN (SELECT chat_id FROM chat_participants WHERE user_id = ?1)
            OR c.group_id IN (SELECT group_id FROM group_members
                              WHERE user_id = ?1 AND status = 'accepted')
         ORDER BY COALESCE((SELECT MAX(m.id) FROM chat_messages m WHERE m.chat_id = c.id), 0) DESC,
                  c.id DESC",
    )?;
    let rows = stmt
        .query_map([user_id], chat_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_message(
    conn: &Connection,
    chat_id: i64,
    sender_id: i64,
    recipient_id: Option<i64>,
    content: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO chat_messages (chat_id, sender_id, recipient_id, content)
         VALUES (?1, ?2, ?3, ?4)",
        params![chat_id, sender_id, recipient_id, content],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn message_by_id(conn: &Connection, id: i64) -> Result<Option<ChatMessage>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    Ok(conn.query_row(&sql, [id], message_from_row).optional()?)
}

pub fn last_message(conn: &Connection, chat_id: i64) -> Result<Option<ChatMessage>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.chat_id = ?1 ORDER BY m.id DESC LIMIT 1");
    Ok(conn
        .query_row(&sql, [chat_id], message_from_row)
        .optional()?)
}

/// Up to `limit` messages older than `before` (a message id), returned in
/// ascending order.
pub fn history(
    conn: &Connection,
    chat_id: i64,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<ChatMessage>> {
    let sql = format!(
        "{MESSAGE_SELECT} WHERE m.chat_id = ?1 AND (?2 IS NULL OR m.id < ?2)
         ORDER BY m.id DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params![chat_id, before, limit], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.reverse();
    Ok(rows)
}

/// Messages from other users newer than the user's read marker.
pub fn unread_count(conn: &Connection, chat_id: i64, user_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM chat_messages m
         WHERE m.chat_id = ?1 AND m.sender_id != ?2
           AND m.id > COALESCE(
               (SELECT last_read_id FROM chat_reads WHERE chat_id = ?1 AND user_id = ?2), 0)",
        params![chat_id, user_id],
        |r| r.get(0),
    )?)
}

/// Move the user's read marker forward to `upto` (never backwards) and mark
/// direct messages addressed to them up to that id as read. Returns how many
/// messages changed status.
pub fn mark_read(conn: &Connection, chat_id: i64, user_id: i64, upto: i64) -> Result<usize> {
    conn.execute(
        "INSERT INTO chat_reads (chat_id, user_id, last_read_id) VALUES (?1, ?2, ?3)
         ON CONFLICT (chat_id, user_id)
         DO UPDATE SET last_read_id = MAX(last_read_id, excluded.last_read_id)",
        params![chat_id, user_id, upto],
    )?;
    Ok(conn.execute(
        "UPDATE chat_messages SET status = 'read'
         WHERE chat_id = ?1 AND recipient_id = ?2 AND id <= ?3 AND status != 'read'",
        params![chat_id, user_id, upto],
    )?)
}

/// Id of the newest message in the chat.
pub fn latest_message_id(conn: &Connection, chat_id: i64) -> Result<Option<i64>> {
    Ok(conn.query_row(
        "SELECT MAX(id) FROM chat_messages WHERE chat_id = ?1",
        [chat_id],
        |r| r.get(0),
    )?)
}
