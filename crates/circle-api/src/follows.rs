//! Directed follow graph with pending/accepted/rejected edges.
//!
//! Following a public account is accepted immediately; following a private
//! one leaves a pending edge that only the followed user can resolve.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;

use circle_db::Connection;
use circle_db::queries::{follows, users};
use circle_types::api::{
    FollowRequest, FollowResponse, FollowStatusRequest, FollowStatusResponse,
    HandleFollowRequest, MessageResponse,
};
use circle_types::models::{Decision, FollowEdge, FollowStatus, NotificationKind, UserSummary};

use crate::error::ApiError;
use crate::extract::{JsonBody, PathParams};
use crate::middleware::Caller;
use crate::notifications;
use crate::outbox::Outbox;
use crate::state::{self, AppState};

/// Ask to follow `followed_id`. Repeating a pending or accepted request
/// returns the existing edge unchanged; a rejected edge is re-opened in
/// place so the pair never has more than one row.
pub fn request(
    conn: &Connection,
    outbox: &mut Outbox,
    follower: &Caller,
    followed_id: i64,
) -> Result<FollowEdge, ApiError> {
    if follower.id == followed_id {
        return Err(ApiError::bad_request("You cannot follow yourself"));
    }
    let target =
        users::by_id(conn, followed_id)?.ok_or_else(|| ApiError::not_found("User not found"))?;
    let status = if target.is_private {
        FollowStatus::Pending
    } else {
        FollowStatus::Accepted
    };

    let id = match follows::find(conn, follower.id, followed_id)? {
        Some(edge) if edge.status != FollowStatus::Rejected => return Ok(edge),
        Some(edge) => {
            follows::set_status(conn, edge.id, status)?;
            edge.id
        }
        None => follows::insert(conn, follower.id, followed_id, status)?,
    };

    if status == FollowStatus::Pending {
        notifications::emit(
            conn,
            outbox,
            followed_id,
            NotificationKind::FollowRequest,
            &format!("{} wants to follow you", follower.username),
            Some(follower.id),
            None,
        )?;
    }

    info!(
        "{} -> {} follow edge {} is {}",
        follower.id,
        followed_id,
        id,
        status.as_str()
    );
    follows::by_id(conn, id)?.ok_or(ApiError::Internal)
}

/// Resolve a pending edge addressed to `caller`.
pub fn respond(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    edge_id: i64,
    decision: Decision,
) -> Result<FollowEdge, ApiError> {
    let edge = follows::by_id(conn, edge_id)?
        .ok_or_else(|| ApiError::not_found("Follow request not found"))?;
    if edge.followed_id != caller.id {
        return Err(ApiError::forbidden("Not your follow request"));
    }
    if edge.status != FollowStatus::Pending {
        return Err(ApiError::conflict("Follow request already processed"));
    }

    let status = match decision {
        Decision::Accept => FollowStatus::Accepted,
        Decision::Reject => FollowStatus::Rejected,
    };
    follows::set_status(conn, edge.id, status)?;

    if decision == Decision::Accept {
        notifications::emit(
            conn,
            outbox,
            edge.follower_id,
            NotificationKind::FollowAccepted,
            &format!("{} accepted your follow request", caller.username),
            Some(caller.id),
            None,
        )?;
    }

    Ok(FollowEdge { status, ..edge })
}

/// Remove the edge whatever its status. Returns whether one existed.
pub fn unfollow(conn: &Connection, follower_id: i64, followed_id: i64) -> Result<bool, ApiError> {
    Ok(follows::delete(conn, follower_id, followed_id)? > 0)
}

pub fn status(conn: &Connection, from: i64, to: i64) -> Result<Option<FollowStatus>, ApiError> {
    Ok(follows::find(conn, from, to)?.map(|e| e.status))
}

/// True iff an accepted edge exists in either direction.
pub fn mutual_or_following(conn: &Connection, a: i64, b: i64) -> Result<bool, ApiError> {
    Ok(follows::accepted_either_way(conn, a, b)?)
}

/// Whether `viewer` may see the personal details and connections of `owner`.
pub fn can_see_profile(conn: &Connection, viewer: i64, owner: i64) -> Result<bool, ApiError> {
    if viewer == owner {
        return Ok(true);
    }
    let owner_row =
        users::by_id(conn, owner)?.ok_or_else(|| ApiError::not_found("User not found"))?;
    if !owner_row.is_private {
        return Ok(true);
    }
    Ok(status(conn, viewer, owner)? == Some(FollowStatus::Accepted))
}

// -- Handlers --

pub async fn follow(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<FollowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let followed_id = req
        .followed_id
        .ok_or_else(|| ApiError::missing("followed_id"))?;
    if req.follower_id.is_some_and(|id| id != caller.id) {
        return Err(ApiError::forbidden(
            "Cannot follow on behalf of another user",
        ));
    }

    let edge = state::commit(&state, move |conn, outbox| {
        request(conn, outbox, &caller, followed_id)
    })
    .await?;
    let message = match edge.status {
        FollowStatus::Accepted => "Now following",
        _ => "Request sent",
    };
    Ok(Json(FollowResponse {
        message: message.to_string(),
        id: edge.id,
        status: edge.status,
    }))
}

pub async fn unfollow_user(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<FollowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let followed_id = req
        .followed_id
        .ok_or_else(|| ApiError::missing("followed_id"))?;
    let removed = state::commit(&state, move |conn, _| {
        unfollow(conn, caller.id, followed_id)
    })
    .await?;
    let message = if removed { "Unfollowed" } else { "Not following" };
    Ok(Json(MessageResponse::new(message)))
}

pub async fn handle_request(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<HandleFollowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let edge_id = req.id.ok_or_else(|| ApiError::missing("id"))?;
    if req.status.is_empty() {
        return Err(ApiError::missing("status"));
    }
    let decision = Decision::parse(&req.status)
        .ok_or_else(|| ApiError::bad_request("status must be accept or reject"))?;

    let edge = state::commit(&state, move |conn, outbox| {
        respond(conn, outbox, &caller, edge_id, decision)
    })
    .await?;
    Ok(Json(edge))
}

pub async fn follow_status(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<FollowStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let other = req.user_id.ok_or_else(|| ApiError::missing("user_id"))?;
    let resp = state::read(&state, move |conn| {
        Ok(FollowStatusResponse {
            status: status(conn, caller.id, other)?,
            followed_by: status(conn, other, caller.id)?,
        })
    })
    .await?;
    Ok(Json(resp))
}

async fn connections(
    state: &AppState,
    caller: Caller,
    user_id: i64,
    list: fn(&Connection, i64) -> anyhow::Result<Vec<UserSummary>>,
) -> Result<Vec<UserSummary>, ApiError> {
    state::read(state, move |conn| {
        if !can_see_profile(conn, caller.id, user_id)? {
            return Err(ApiError::forbidden("This profile is private"));
        }
        Ok(list(conn, user_id)?)
    })
    .await
}

pub async fn followers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(user_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let list = connections(&state, caller, user_id, follows::followers_of).await?;
    Ok(Json(list))
}

pub async fn following(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(user_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let list = connections(&state, caller, user_id, follows::following_of).await?;
    Ok(Json(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{conn, user};

    fn caller(id: i64, name: &str) -> Caller {
        Caller {
            id,
            username: name.to_string(),
        }
    }

    #[test]
    fn repeated_request_returns_same_edge() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", true);
        let mut outbox = Outbox::default();

        let first = request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();
        let second = request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, FollowStatus::Pending);
        // Only the first request notified.
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn public_target_is_accepted_without_notification() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", false);
        let mut outbox = Outbox::default();

        let edge = request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();
        assert_eq!(edge.status, FollowStatus::Accepted);
        assert!(outbox.is_empty());
        assert!(mutual_or_following(&conn, b, a).unwrap());
    }

    #[test]
    fn cannot_follow_self_or_ghost() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let mut outbox = Outbox::default();

        assert!(matches!(
            request(&conn, &mut outbox, &caller(a, "a"), a),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            request(&conn, &mut outbox, &caller(a, "a"), 999),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn only_the_followed_user_resolves_once() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", true);
        let c = user(&conn, "c", false);
        let mut outbox = Outbox::default();
        let (owner, stranger) = (caller(b, "b"), caller(c, "c"));
        let edge = request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();

        assert!(matches!(
            respond(&conn, &mut outbox, &stranger, edge.id, Decision::Accept),
            Err(ApiError::Forbidden(_))
        ));

        let accepted = respond(&conn, &mut outbox, &owner, edge.id, Decision::Accept).unwrap();
        assert_eq!(accepted.status, FollowStatus::Accepted);
        assert_eq!(status(&conn, a, b).unwrap(), Some(FollowStatus::Accepted));

        assert!(matches!(
            respond(&conn, &mut outbox, &owner, edge.id, Decision::Reject),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn rejected_edge_reopens_in_place() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", true);
        let mut outbox = Outbox::default();
        let owner = caller(b, "b");

        let edge = request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();
        respond(&conn, &mut outbox, &owner, edge.id, Decision::Reject).unwrap();
        assert!(!mutual_or_following(&conn, a, b).unwrap());

        let again = request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();
        assert_eq!(again.id, edge.id);
        assert_eq!(again.status, FollowStatus::Pending);
    }

    #[test]
    fn unfollow_removes_pending_edges_too() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", true);
        let mut outbox = Outbox::default();

        request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();
        assert!(unfollow(&conn, a, b).unwrap());
        assert!(!unfollow(&conn, a, b).unwrap());
        assert_eq!(status(&conn, a, b).unwrap(), None);
    }

    #[test]
    fn private_profile_needs_accepted_follow() {
        let conn = conn();
        let a = user(&conn, "a", false);
        let b = user(&conn, "b", true);
        let mut outbox = Outbox::default();
        let owner = caller(b, "b");

        assert!(can_see_profile(&conn, b, a).unwrap());
        assert!(!can_see_profile(&conn, a, b).unwrap());

        let edge = request(&conn, &mut outbox, &caller(a, "a"), b).unwrap();
        assert!(!can_see_profile(&conn, a, b).unwrap());
        respond(&conn, &mut outbox, &owner, edge.id, Decision::Accept).unwrap();
        assert!(can_see_profile(&conn, a, b).unwrap());
    }
}
