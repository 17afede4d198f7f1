//! Profiles. Personal fields and connections of a private account are only
//! shown to its accepted followers.

use axum::{Extension, Json, extract::State, response::IntoResponse};

use circle_db::Connection;
use circle_db::queries::{follows, users};
use circle_types::api::{PendingFollow, ProfileView, UpdateProfileRequest};

use crate::error::ApiError;
use crate::extract::{JsonBody, PathParams};
use crate::follows::{can_see_profile, status};
use crate::middleware::Caller;
use crate::state::{self, AppState};

pub fn profile(conn: &Connection, viewer_id: i64, owner_id: i64) -> Result<ProfileView, ApiError> {
    let row = users::by_id(conn, owner_id)?.ok_or_else(|| ApiError::not_found("User not found"))?;
    let visible = can_see_profile(conn, viewer_id, owner_id)?;
    let is_self = viewer_id == owner_id;

    let (followers, following) = if visible {
        (follows::followers_of(conn, owner_id)?, follows::following_of(conn, owner_id)?)
    } else {
        (Vec::new(), Vec::new())
    };
    let pending_requests = if is_self {
        follows::pending_for(conn, owner_id)?
            .into_iter()
            .map(|(id, follower)| PendingFollow { id, follower })
            .collect()
    } else {
        Vec::new()
    };
    let follow_status = if is_self { None } else { status(conn, viewer_id, owner_id)? };

    Ok(ProfileView {
        user: row.summary(),
        is_private: row.is_private,
        restricted: !visible,
        email: visible.then(|| row.email.clone()),
        date_of_birth: visible.then(|| row.date_of_birth.clone()),
        about_me: visible.then(|| row.about_me.clone()),
        followers,
        following,
        follow_status,
        pending_requests,
    })
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(user_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state::read(&state, move |conn| profile(conn, caller.id, user_id)).await?;
    Ok(Json(view))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state::commit(&state, move |conn, _| {
        users::update_profile(
            conn,
            caller.id,
            req.avatar.as_deref(),
            req.about_me.as_deref(),
            req.is_private,
        )?;
        users::by_id(conn, caller.id)?
            .map(|row| row.into_profile())
            .ok_or_else(|| ApiError::not_found("User not found"))
    })
    .await?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{conn, user};
    use circle_types::models::FollowStatus;

    #[test]
    fn private_profile_is_restricted_to_accepted_followers() {
        let conn = conn();
        let owner = user(&conn, "owner", true);
        let fan = user(&conn, "fan", false);

        let view = profile(&conn, fan, owner).unwrap();
        assert!(view.restricted);
        assert!(view.email.is_none());
        assert!(view.followers.is_empty());

        let edge = follows::insert(&conn, fan, owner, FollowStatus::Pending).unwrap();
        let own = profile(&conn, owner, owner).unwrap();
        assert!(!own.restricted);
        assert_eq!(own.pending_requests.len(), 1);
        assert_eq!(own.pending_requests[0].id, edge);

        follows::set_status(&conn, edge, FollowStatus::Accepted).unwrap();
        let view = profile(&conn, fan, owner).unwrap();
        assert!(!view.restricted);
        assert_eq!(view.email.as_deref(), Some("owner@example.com"));
        assert_eq!(view.follow_status, Some(FollowStatus::Accepted));
        assert_eq!(view.followers.len(), 1);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let conn = conn();
        let me = user(&conn, "me", false);
        assert!(matches!(
            profile(&conn, me, 999),
            Err(ApiError::NotFound(_))
        ));
    }
}
