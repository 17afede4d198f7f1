use std::collections::HashSet;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use circle_types::models::{Comment, Post, PostPrivacy};

use crate::models::{NewPost, timestamp};

const POST_SELECT: &str = "SELECT p.id, p.author_id, u.username, u.avatar, p.title, p.content,
            p.media, p.privacy, p.group_id, p.created_at
     FROM posts p JOIN users u ON u.id = p.author_id";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let privacy: i64 = row.get(7)?;
    Ok(Post {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_name: row.get(2)?,
        author_avatar: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        media: row.get(6)?,
        privacy: PostPrivacy::try_from(privacy).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Integer, e.into())
        })?,
        group_id: row.get(8)?,
        created_at: timestamp(row, 9)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        author_avatar: row.get(4)?,
        content: row.get(5)?,
        media: row.get(6)?,
        created_at: timestamp(row, 7)?,
    })
}

pub fn insert(conn: &Connection, post: &NewPost<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO posts (author_id, title, content, media, privacy, group_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![post.author_id, post.title, post.content, post.media, post.privacy, post.group_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record explicit viewers of a private post. Duplicates are ignored.
pub fn grant_views(conn: &Connection, post_id: i64, user_ids: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO post_private_views (post_id, user_id)
         VALUES (?1, ?2)",
    )?;
    for user_id in user_ids {
        stmt.execute(params![post_id, user_id])?;
    }
    Ok(())
}

pub fn by_id(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let sql = format!("{POST_SELECT} WHERE p.id = ?1");
    Ok(conn.query_row(&sql, [id], post_from_row).optional()?)
}

/// All posts, newest first. Callers filter with the visibility predicate.
pub fn list_all(conn: &Connection) -> Result<Vec<Post>> {
    let sql = format!("{POST_SELECT} ORDER BY p.created_at DESC, p.id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], post_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_for_group(conn: &Connection, group_id: i64) -> Result<Vec<Post>> {
    let sql = format!("{POST_SELECT} WHERE p.group_id = ?1 ORDER BY p.created_at DESC, p.id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([group_id], post_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ids of private posts `user_id` was explicitly granted.
pub fn granted_post_ids(conn: &Connection, user_id: i64) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT post_id FROM post_private_views WHERE user_id = ?1")?;
    let ids = stmt
        .query_map([user_id], |r| r.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(ids)
}

// -- Comments --

pub fn insert_comment(
    conn: &Connection,
    post_id: i64,
    author_id: i64,
    content: &str,
    media: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO comments (post_id, author_id, content, media) VALUES (?1, ?2, ?3, ?4)",
        params![post_id, author_id, content, media],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn comment_by_id(conn: &Connection, id: i64) -> Result<Option<Comment>> {
    Ok(conn
        .query_row(
            "SELECT c.id, c.post_id, c.author_id, u.username, u.avatar,
                    c.content, c.media, c.created_at
             FROM comments c JOIN users u ON u.id = c.author_id
             WHERE c.id = ?1",
            [id],
            comment_from_row,
        )
        .optional()?)
}

/// Comments on a post, oldest first.
pub fn comments_for(conn: &Connection, post_id: i64) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.post_id, c.author_id, u.username, u.avatar, c.content, c.media, c.created_at
         FROM comments c JOIN users u ON u.id = c.author_id
         WHERE c.post_id = ?1
         ORDER BY c.created_at, c.id",
    )?;
    let rows = stmt
        .query_map([post_id], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
