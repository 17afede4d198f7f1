use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

/// One schema step. Applied in lexical order of `name`; `down` reverses it.
pub struct Migration {
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000001_create_users",
        up: "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                first_name      TEXT NOT NULL,
                last_name       TEXT NOT NULL,
                date_of_birth   TEXT NOT NULL,
                avatar          TEXT NOT NULL DEFAULT '',
                about_me        TEXT NOT NULL DEFAULT '',
                is_private      INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
        ",
        down: "DROP TABLE users;",
    },
    Migration {
        name: "000002_create_followers",
        up: "
            CREATE TABLE followers (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                follower_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                followed_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status          TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE (follower_id, followed_id),
                CHECK (follower_id != followed_id)
            );
            CREATE INDEX idx_followers_followed ON followers(followed_id, status);
        ",
        down: "DROP TABLE followers;",
    },
    Migration {
        name: "000003_create_groups",
        up: "
            CREATE TABLE groups (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                creator_id      INTEGER NOT NULL REFERENCES users(id),
                title           TEXT NOT NULL,
                description     TEXT NOT NULL DEFAULT '',
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE TABLE group_members (
                group_id        INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role            TEXT NOT NULL CHECK (role IN ('creator', 'admin', 'member')),
                status          TEXT NOT NULL CHECK (status IN ('pending', 'accepted')),
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (group_id, user_id)
            );
            CREATE TABLE group_invitations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id        INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                inviter_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                invitee_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status          TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE INDEX idx_group_invitations_invitee ON group_invitations(invitee_id, status);
        ",
        down: "
            DROP TABLE group_invitations;
            DROP TABLE group_members;
            DROP TABLE groups;
        ",
    },
    Migration {
        name: "000004_create_posts",
        up: "
            CREATE TABLE posts (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title           TEXT NOT NULL,
                content         TEXT NOT NULL,
                media           TEXT NOT NULL DEFAULT '',
                privacy         INTEGER NOT NULL CHECK (privacy IN (1, 2, 3)),
                group_id        INTEGER REFERENCES groups(id) ON DELETE CASCADE,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE INDEX idx_posts_group ON posts(group_id, created_at);
            CREATE TABLE post_private_views (
                post_id         INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (post_id, user_id)
            );
            CREATE TABLE comments (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id         INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                author_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content         TEXT NOT NULL,
                media           TEXT NOT NULL DEFAULT '',
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE INDEX idx_comments_post ON comments(post_id, created_at);
        ",
        down: "
            DROP TABLE comments;
            DROP TABLE post_private_views;
            DROP TABLE posts;
        ",
    },
    Migration {
        name: "000005_create_group_events",
        up: "
            CREATE TABLE group_events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id        INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                creator_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title           TEXT NOT NULL,
                description     TEXT NOT NULL DEFAULT '',
                event_date      TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE TABLE group_event_rsvp (
                event_id        INTEGER NOT NULL REFERENCES group_events(id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                response        TEXT NOT NULL CHECK (response IN ('going', 'not_going')),
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (event_id, user_id)
            );
        ",
        down: "
            DROP TABLE group_event_rsvp;
            DROP TABLE group_events;
        ",
    },
    Migration {
        name: "000006_create_chats",
        up: "
            CREATE TABLE chats (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                kind            TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
                group_id        INTEGER UNIQUE REFERENCES groups(id) ON DELETE CASCADE,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE TABLE chat_participants (
                chat_id         INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (chat_id, user_id)
            );
            CREATE INDEX idx_chat_participants_user ON chat_participants(user_id);
            CREATE TABLE chat_messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id         INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                sender_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient_id    INTEGER REFERENCES users(id) ON DELETE CASCADE,
                content         TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'sent' CHECK (status IN ('sent', 'delivered', 'read')),
                message_type    TEXT NOT NULL DEFAULT 'text',
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE INDEX idx_chat_messages_chat ON chat_messages(chat_id, id);
            CREATE TABLE chat_reads (
                chat_id         INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                last_read_id    INTEGER NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );
        ",
        down: "
            DROP TABLE chat_reads;
            DROP TABLE chat_messages;
            DROP TABLE chat_participants;
            DROP TABLE chats;
        ",
    },
    Migration {
        name: "000007_create_notifications",
        up: "
            CREATE TABLE notifications (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                to_user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                from_user_id    INTEGER REFERENCES users(id) ON DELETE SET NULL,
                content         TEXT NOT NULL,
                type            TEXT NOT NULL,
                group_id        INTEGER REFERENCES groups(id) ON DELETE SET NULL,
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE INDEX idx_notifications_unread ON notifications(to_user_id, is_read, id);
        ",
        down: "DROP TABLE notifications;",
    },
];

/// Tables in dependency order (children after parents).
pub const TABLES: &[&str] = &[
    "users",
    "followers",
    "groups",
    "group_members",
    "group_invitations",
    "posts",
    "post_private_views",
    "comments",
    "group_events",
    "group_event_rsvp",
    "chats",
    "chat_participants",
    "chat_messages",
    "chat_reads",
    "notifications",
];

fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name        TEXT PRIMARY KEY,
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}

fn is_applied(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE name = ?1",
        [name],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Apply every pending up-migration. Returns how many were applied.
pub fn migrate(conn: &Connection) -> Result<usize> {
    ensure_ledger(conn)?;

    let mut ordered: Vec<&Migration> = MIGRATIONS.iter().collect();
    ordered.sort_by_key(|m| m.name);

    let mut applied = 0;
    for m in ordered {
        if is_applied(conn, m.name)? {
            continue;
        }

        info!("Applying migration {}", m.name);
        let tx = conn.unchecked_transaction()?;
        match tx.execute_batch(m.up) {
            Ok(()) => {}
            Err(e) if e.to_string().contains("already exists") => {
                warn!("Migration {}: {} (continuing)", m.name, e);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("migration {} failed", m.name));
            }
        }
        tx.execute("INSERT INTO schema_migrations (name) VALUES (?1)", [m.name])?;
        tx.commit()?;
        applied += 1;
    }

    if applied > 0 {
        info!("Database migrations complete ({} applied)", applied);
    }
    Ok(applied)
}

/// Apply down-migrations in reverse order. Returns how many were reverted.
pub fn rollback(conn: &Connection) -> Result<usize> {
    ensure_ledger(conn)?;

    let mut ordered: Vec<&Migration> = MIGRATIONS.iter().collect();
    ordered.sort_by_key(|m| std::cmp::Reverse(m.name));

    let mut reverted = 0;
    for m in ordered {
        info!("Reverting migration {}", m.name);
        let tx = conn.unchecked_transaction()?;
        match tx.execute_batch(m.down) {
            Ok(()) => {}
            Err(e) if e.to_string().contains("no such table") => {
                warn!("Rollback {}: {} (continuing)", m.name, e);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("rollback {} failed", m.name));
            }
        }
        let removed = tx.execute("DELETE FROM schema_migrations WHERE name = ?1", [m.name])?;
        tx.commit()?;
        reverted += removed;
    }

    info!("Rollback complete ({} reverted)", reverted);
    Ok(reverted)
}

/// Delete every row from every table, keeping the schema.
pub fn flush(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for table in TABLES.iter().rev() {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }
    reset_sequences(&tx)?;
    tx.commit()?;
    info!("Flushed all tables");
    Ok(())
}

/// Restart AUTOINCREMENT counters. The sequence table only exists once an
/// AUTOINCREMENT table has been created.
fn reset_sequences(conn: &Connection) -> Result<()> {
    match conn.execute("DELETE FROM sqlite_sequence", []) {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("no such table") => Ok(()),
        Err(e) => Err(e).context("failed to reset sqlite_sequence"),
    }
}

/// Row count per table, in `TABLES` order.
pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    TABLES
        .iter()
        .map(|table| -> Result<(&'static str, i64)> {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            Ok((*table, count))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = memory();
        assert_eq!(migrate(&conn).unwrap(), MIGRATIONS.len());
        assert_eq!(migrate(&conn).unwrap(), 0);
        assert!(table_counts(&conn).unwrap().iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn tolerates_existing_tables() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY);")
            .unwrap();
        // The first migration collides with the hand-made table but the rest apply.
        migrate(&conn).unwrap();
        let recorded: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(recorded, MIGRATIONS.len() as i64);
    }

    #[test]
    fn rollback_drops_everything_and_tolerates_missing_tables() {
        let conn = memory();
        migrate(&conn).unwrap();
        conn.execute_batch("DROP TABLE notifications;").unwrap();

        assert_eq!(rollback(&conn).unwrap(), MIGRATIONS.len());
        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'users'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(remaining, 0);

        // Second rollback finds nothing to drop.
        assert_eq!(rollback(&conn).unwrap(), 0);
    }

    #[test]
    fn flush_keeps_schema() {
        let conn = memory();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (username, email, password, first_name, last_name, date_of_birth)
             VALUES ('ada', 'a@x', 'h', 'A', 'B', '1815-12-10')",
            [],
        )
        .unwrap();
        flush(&conn).unwrap();
        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts[0], ("users", 0));

        // Autoincrement counters restart.
        conn.execute(
            "INSERT INTO users (username, email, password, first_name, last_name, date_of_birth)
             VALUES ('grace', 'g@x', 'h', 'G', 'H', '1906-12-09')",
            [],
        )
        .unwrap();
        assert_eq!(conn.last_insert_rowid(), 1);
    }

    #[test]
    fn sequence_reset_tolerates_missing_table_only() {
        let conn = memory();
        reset_sequences(&conn).unwrap();

        migrate(&conn).unwrap();
        reset_sequences(&conn).unwrap();

        conn.execute_batch("PRAGMA query_only = ON;").unwrap();
        assert!(reset_sequences(&conn).is_err());
    }
}
