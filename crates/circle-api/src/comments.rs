use axum::{Extension, Json, extract::State, response::IntoResponse};

use circle_db::Connection;
use circle_db::queries::posts;
use circle_types::api::CreateCommentRequest;
use circle_types::models::Comment;

use crate::error::ApiError;
use crate::extract::{JsonBody, PathParams};
use crate::middleware::Caller;
use crate::state::{self, AppState};
use crate::visibility::visible_post;

/// Comment on a post the author can see.
pub fn create(
    conn: &Connection,
    author_id: i64,
    post_id: i64,
    content: &str,
    media: &str,
) -> Result<Comment, ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::missing("content"));
    }
    let post = visible_post(conn, author_id, post_id)?;
    let id = posts::insert_comment(conn, post.id, author_id, content, media)?;
    posts::comment_by_id(conn, id)?.ok_or(ApiError::Internal)
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post_id = req.post_id.ok_or_else(|| ApiError::missing("post_id"))?;
    let comment = state::commit(&state, move |conn, _| {
        create(conn, caller.id, post_id, &req.content, &req.media)
    })
    .await?;
    Ok(Json(comment))
}

/// Comments inherit the visibility of their post.
pub async fn list_comments(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(post_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| {
        let post = visible_post(conn, caller.id, post_id)?;
        Ok(posts::comments_for(conn, post.id)?)
    })
    .await?;
    Ok(Json(list))
}
