use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde::Serialize;

use circle_db::Connection;
use circle_db::models::NewPost;
use circle_db::queries::{groups, posts, users};
use circle_types::api::CreatePostRequest;
use circle_types::models::{Comment, Post, PostPrivacy};

use crate::error::ApiError;
use crate::extract::{JsonBody, PathParams};
use crate::middleware::Caller;
use crate::state::{self, AppState};
use crate::visibility::{ViewerContext, can_view, visible_post};

#[derive(Debug, Serialize)]
pub struct PostDetails {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
}

/// Validate and store a post. Group posts require accepted membership;
/// private posts record their explicit viewers.
pub fn create(
    conn: &Connection,
    author_id: i64,
    req: &CreatePostRequest,
    group_id: Option<i64>,
) -> Result<Post, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::missing("title"));
    }
    if req.content.trim().is_empty() {
        return Err(ApiError::missing("content"));
    }
    let privacy = PostPrivacy::try_from(req.privacy).map_err(ApiError::BadRequest)?;

    if let Some(gid) = group_id {
        groups::by_id(conn, gid)?.ok_or_else(|| ApiError::not_found("Group not found"))?;
        let member = groups::member(conn, gid, author_id)?;
        if !member.is_some_and(|m| m.is_accepted()) {
            return Err(ApiError::forbidden("Only group members can post"));
        }
    }

    let post_id = posts::insert(
        conn,
        &NewPost {
            author_id,
            title: req.title.trim(),
            content: &req.content,
            media: &req.media,
            privacy: privacy.into(),
            group_id,
        },
    )?;

    if privacy == PostPrivacy::Private {
        let mut viewers = Vec::with_capacity(req.selected_users.len());
        for &user_id in &req.selected_users {
            if user_id != author_id && users::exists(conn, user_id)? {
                viewers.push(user_id);
            }
        }
        posts::grant_views(conn, post_id, &viewers)?;
    }

    posts::by_id(conn, post_id)?.ok_or(ApiError::Internal)
}

/// Feed of non-group posts the viewer may see, newest first.
pub fn feed(conn: &Connection, viewer_id: i64) -> Result<Vec<Post>, ApiError> {
    let ctx = ViewerContext::load(conn, viewer_id)?;
    Ok(posts::list_all(conn)?
        .into_iter()
        .filter(|p| p.group_id.is_none() && can_view(&ctx, p))
        .collect())
}

// -- Handlers --

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| feed(conn, caller.id)).await?;
    Ok(Json(list))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state::commit(&state, move |conn, _| {
        let group_id = req.group_id;
        create(conn, caller.id, &req, group_id)
    })
    .await?;
    Ok(Json(post))
}

pub async fn get_post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(post_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state::read(&state, move |conn| visible_post(conn, caller.id, post_id)).await?;
    Ok(Json(post))
}

pub async fn get_post_details(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(post_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state::read(&state, move |conn| {
        let post = visible_post(conn, caller.id, post_id)?;
        let comments = posts::comments_for(conn, post.id)?;
        Ok(PostDetails { post, comments })
    })
    .await?;
    Ok(Json(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{conn, user};
    use circle_db::queries::follows;
    use circle_types::models::FollowStatus;

    fn req(privacy: i64, selected: Vec<i64>) -> CreatePostRequest {
        CreatePostRequest {
            title: "Hello".into(),
            content: "World".into(),
            privacy,
            selected_users: selected,
            ..Default::default()
        }
    }

    #[test]
    fn feed_applies_visibility() {
        let conn = conn();
        let author = user(&conn, "author", false);
        let fan = user(&conn, "fan", false);
        let stranger = user(&conn, "stranger", false);
        follows::insert(&conn, fan, author, FollowStatus::Accepted).unwrap();

        let public = create(&conn, author, &req(1, vec![]), None).unwrap();
        let followers = create(&conn, author, &req(2, vec![]), None).unwrap();
        let private = create(&conn, author, &req(3, vec![stranger]), None).unwrap();

        let ids = |viewer| {
            let posts = feed(&conn, viewer).unwrap();
            posts.into_iter().map(|p| p.id).collect::<Vec<_>>()
        };
        assert_eq!(ids(author), vec![private.id, followers.id, public.id]);
        assert_eq!(ids(fan), vec![followers.id, public.id]);
        assert_eq!(ids(stranger), vec![private.id, public.id]);
    }

    #[test]
    fn rejects_missing_fields_and_bad_privacy() {
        let conn = conn();
        let author = user(&conn, "author", false);

        let mut no_title = req(1, vec![]);
        no_title.title.clear();
        assert_eq!(
            create(&conn, author, &no_title, None).unwrap_err().to_string(),
            "title is required"
        );
        let bad_privacy = req(9, vec![]);
        assert!(matches!(
            create(&conn, author, &bad_privacy, None),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn group_posts_need_membership() {
        let conn = conn();
        let author = user(&conn, "author", false);
        let gid = groups::insert(&conn, author, "G", "").unwrap();
        let body = req(1, vec![]);
        assert!(matches!(
            create(&conn, author, &body, Some(gid)),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            create(&conn, author, &body, Some(404)),
            Err(ApiError::NotFound(_))
        ));
    }
}
