use std::collections::{HashMap, HashSet};

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use circle_types::models::{
    Group, GroupEvent, GroupInvitation, GroupMember, GroupRole, InvitationStatus,
    MembershipStatus, RsvpResponse,
};

use crate::models::{MemberRow, enum_col, timestamp};
use crate::queries::users::summary_from_row;

const GROUP_SELECT: &str = "SELECT g.id, g.creator_id, g.title, g.description,
            (SELECT c.id FROM chats c WHERE c.group_id = g.id),
            (SELECT COUNT(*) FROM group_members m
             WHERE m.group_id = g.id AND m.status = 'accepted'),
            g.created_at
     FROM groups g";

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        chat_id: row.get(4)?,
        member_count: row.get(5)?,
        created_at: timestamp(row, 6)?,
    })
}

fn member_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        group_id: row.get(0)?,
        user_id: row.get(1)?,
        role: enum_col(row, 2, GroupRole::parse)?,
        status: enum_col(row, 3, MembershipStatus::parse)?,
    })
}

fn invitation_from_row(row: &Row<'_>) -> rusqlite::Result<GroupInvitation> {
    Ok(GroupInvitation {
        id: row.get(0)?,
        group_id: row.get(1)?,
        group_title: row.get(2)?,
        inviter_id: row.get(3)?,
        invitee_id: row.get(4)?,
        status: enum_col(row, 5, InvitationStatus::parse)?,
        created_at: timestamp(row, 6)?,
    })
}

// -- Groups --

pub fn insert(conn: &Connection, creator_id: i64, title: &str, description: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO groups (creator_id, title, description) VALUES (?1, ?2, ?3)",
        params![creator_id, title, description],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn by_id(conn: &Connection, id: i64) -> Result<Option<Group>> {
    let sql = format!("{GROUP_SELECT} WHERE g.id = ?1");
    Ok(conn.query_row(&sql, [id], group_from_row).optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<Group>> {
    let sql = format!("{GROUP_SELECT} ORDER BY g.created_at DESC, g.id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update(
    conn: &Connection,
    id: i64,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE groups SET title = COALESCE(?2, title), description = COALESCE(?3, description)
         WHERE id = ?1",
        params![id, title, description],
    )?)
}

/// Members, posts, invitations, events and the group chat go with it
/// through `ON DELETE CASCADE`.
pub fn delete(conn: &Connection, id: i64) -> Result<usize> {
    Ok(conn.execute("DELETE FROM groups WHERE id = ?1", [id])?)
}

// -- Members --

pub fn member(conn: &Connection, group_id: i64, user_id: i64) -> Result<Option<MemberRow>> {
    Ok(conn
        .query_row(
            "SELECT group_id, user_id, role, status FROM group_members
             WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
            member_row,
        )
        .optional()?)
}

pub fn insert_member(
    conn: &Connection,
    group_id: i64,
    user_id: i64,
    role: GroupRole,
    status: MembershipStatus,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group_members (group_id, user_id, role, status) VALUES (?1, ?2, ?3, ?4)",
        params![group_id, user_id, role.as_str(), status.as_str()],
    )?;
    Ok(())
}

pub fn set_member_status(
    conn: &Connection,
    group_id: i64,
    user_id: i64,
    status: MembershipStatus,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE group_members SET status = ?3 WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id, status.as_str()],
    )?)
}

pub fn set_member_role(
    conn: &Connection,
    group_id: i64,
    user_id: i64,
    role: GroupRole,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE group_members SET role = ?3 WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id, role.as_str()],
    )?)
}

pub fn delete_member(conn: &Connection, group_id: i64, user_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id],
    )?)
}

/// Members with the given status, creator first then admins then members.
pub fn members(
    conn: &Connection,
    group_id: i64,
    status: MembershipStatus,
) -> Result<Vec<GroupMember>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.avatar,
                m.role, m.status, m.created_at
         FROM group_members m JOIN users u ON u.id = m.user_id
         WHERE m.group_id = ?1 AND m.status = ?2
         ORDER BY CASE m.role WHEN 'creator' THEN 0 WHEN 'admin' THEN 1 ELSE 2 END, m.created_at",
    )?;
    let rows = stmt
        .query_map(params![group_id, status.as_str()], |row| {
            Ok(GroupMember {
                user: summary_from_row(row, 0)?,
                role: enum_col(row, 5, GroupRole::parse)?,
                status: enum_col(row, 6, MembershipStatus::parse)?,
                joined_at: timestamp(row, 7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn accepted_member_ids(conn: &Connection, group_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM group_members WHERE group_id = ?1 AND status = 'accepted'",
    )?;
    let ids = stmt
        .query_map([group_id], |r| r.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Accepted creator and admins.
pub fn manager_ids(conn: &Connection, group_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM group_members
         WHERE group_id = ?1 AND status = 'accepted' AND role IN ('creator', 'admin')",
    )?;
    let ids = stmt
        .query_map([group_id], |r| r.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Groups in which `user_id` is an accepted member.
pub fn accepted_group_ids(conn: &Connection, user_id: i64) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare(
        "SELECT group_id FROM group_members WHERE user_id = ?1 AND status = 'accepted'",
    )?;
    let ids = stmt
        .query_map([user_id], |r| r.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(ids)
}

/// Every membership row of `user_id`, keyed by group.
pub fn memberships_of(conn: &Connection, user_id: i64) -> Result<HashMap<i64, MemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, user_id, role, status FROM group_members WHERE user_id = ?1",
    )?;
    let rows = stmt
        .query_map([user_id], |row| member_row(row).map(|m| (m.group_id, m)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

// -- Invitations --

const INVITATION_SELECT: &str = "SELECT i.id, i.group_id, g.title, i.inviter_id,
            i.invitee_id, i.status, i.created_at
     FROM group_invitations i JOIN groups g ON g.id = i.group_id";

pub fn insert_invitation(
    conn: &Connection,
    group_id: i64,
    inviter_id: i64,
    invitee_id: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO group_invitations (group_id, inviter_id, invitee_id, status)
         VALUES (?1, ?2, ?3, 'pending')",
        params![group_id, inviter_id, invitee_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn invitation_by_id(conn: &Connection, id: i64) -> Result<Option<GroupInvitation>> {
    let sql = format!("{INVITATION_SELECT} WHERE i.id = ?1");
    Ok(conn.query_row(&sql, [id], invitation_from_row).optional()?)
}

pub fn pending_invitation(
    conn: &Connection,
    group_id: i64,
    invitee_id: i64,
) -> Result<Option<GroupInvitation>> {
    let sql = format!(
        "{INVITATION_SELECT} WHERE i.group_id = ?1 AND i.invitee_id = ?2 AND i.status = 'pending'"
    );
    Ok(conn
        .query_row(&sql, params![group_id, invitee_id], invitation_from_row)
        .optional()?)
}

/// Transition a pending invitation. Returns 0 when it was already resolved.
pub fn resolve_invitation(conn: &Connection, id: i64, status: InvitationStatus) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE group_invitations SET status = ?2 WHERE id = ?1 AND status = 'pending'",
        params![id, status.as_str()],
    )?)
}

pub fn pending_invitations_for(conn: &Connection, invitee_id: i64) -> Result<Vec<GroupInvitation>> {
    let sql = format!(
        "{INVITATION_SELECT} WHERE i.invitee_id = ?1 AND i.status = 'pending' ORDER BY i.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([invitee_id], invitation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Events --

const EVENT_SELECT: &str = "SELECT e.id, e.group_id, e.creator_id, e.title,
            e.description, e.event_date,
            (SELECT COUNT(*) FROM group_event_rsvp r
             WHERE r.event_id = e.id AND r.response = 'going'),
            (SELECT COUNT(*) FROM group_event_rsvp r
             WHERE r.event_id = e.id AND r.response = 'not_going'),
            (SELECT r.response FROM group_event_rsvp r
             WHERE r.event_id = e.id AND r.user_id = ?1),
            e.created_at
     FROM group_events e";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<GroupEvent> {
    let mine: Option<String> = row.get(8)?;
    Ok(GroupEvent {
        id: row.get(0)?,
        group_id: row.get(1)?,
        creator_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        event_date: row.get(5)?,
        going: row.get(6)?,
        not_going: row.get(7)?,
        my_response: mine.as_deref().and_then(RsvpResponse::parse),
        created_at: timestamp(row, 9)?,
    })
}

pub fn insert_event(
    conn: &Connection,
    group_id: i64,
    creator_id: i64,
    title: &str,
    description: &str,
    event_date: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO group_events (group_id, creator_id, title, description, event_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![group_id, creator_id, title, description, event_date],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Event with RSVP counts and `viewer_id`'s own response.
pub fn event_by_id(conn: &Connection, id: i64, viewer_id: i64) -> Result<Option<GroupEvent>> {
    let sql = format!("{EVENT_SELECT} WHERE e.id = ?2");
    Ok(conn
        .query_row(&sql, params![viewer_id, id], event_from_row)
        .optional()?)
}

pub fn events_for(conn: &Connection, group_id: i64, viewer_id: i64) -> Result<Vec<GroupEvent>> {
    let sql = format!("{EVENT_SELECT} WHERE e.group_id = ?2 ORDER BY e.event_date, e.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![viewer_id, group_id], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn upsert_rsvp(
    conn: &Connection,
    event_id: i64,
    user_id: i64,
    response: RsvpResponse,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group_event_rsvp (event_id, user_id, response) VALUES (?1, ?2, ?3)
         ON CONFLICT (event_id, user_id) DO UPDATE SET response = excluded.response",
        params![event_id, user_id, response.as_str()],
    )?;
    Ok(())
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
    fn delete_cascades_to_members_invitations_and_events() {
        let conn = conn();
        let owner = user(&conn, "owner", false);
        let guest = user(&conn, "guest", false);
        let gid = insert(&conn, owner, "Chess", "").unwrap();
        insert_member(
            &conn,
            gid,
            owner,
            GroupRole::Creator,
            MembershipStatus::Accepted,
        )
        .unwrap();
        insert_invitation(&conn, gid, owner, guest).unwrap();
        let eid = insert_event(&conn, gid, owner, "Meetup", "", "2026-01-01").unwrap();
        upsert_rsvp(&conn, eid, owner, RsvpResponse::Going).unwrap();

        assert_eq!(delete(&conn, gid).unwrap(), 1);
        for table in ["group_members", "group_invitations", "group_events", "group_event_rsvp"] {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(n, 0, "{table} not emptied");
        }
    }

    #[test]
    fn rsvp_upsert_moves_counts() {
        let conn = conn();
        let owner = user(&conn, "owner", false);
        let gid = insert(&conn, owner, "Chess", "").unwrap();
        let eid = insert_event(&conn, gid, owner, "Meetup", "", "2026-01-01").unwrap();

        upsert_rsvp(&conn, eid, owner, RsvpResponse::Going).unwrap();
        let e = event_by_id(&conn, eid, owner).unwrap().unwrap();
        assert_eq!((e.going, e.not_going), (1, 0));
        assert_eq!(e.my_response, Some(RsvpResponse::Going));

        upsert_rsvp(&conn, eid, owner, RsvpResponse::NotGoing).unwrap();
        let e = event_by_id(&conn, eid, owner).unwrap().unwrap();
        assert_eq!((e.going, e.not_going), (0, 1));
    }

    #[test]
    fn resolving_twice_touches_nothing() {
        let conn = conn();
        let owner = user(&conn, "owner", false);
        let guest = user(&conn, "guest", false);
        let gid = insert(&conn, owner, "Chess", "").unwrap();
        let iid = insert_invitation(&conn, gid, owner, guest).unwrap();

        let accepted = resolve_invitation(&conn, iid, InvitationStatus::Accepted).unwrap();
        assert_eq!(accepted, 1);
        let rejected = resolve_invitation(&conn, iid, InvitationStatus::Rejected).unwrap();
        assert_eq!(rejected, 0);
        let inv = invitation_by_id(&conn, iid).unwrap().unwrap();
        assert_eq!(inv.status, InvitationStatus::Accepted);
        assert_eq!(inv.group_title, "Chess");
    }
}
