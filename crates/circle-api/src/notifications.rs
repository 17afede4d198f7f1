use axum::{Extension, Json, extract::State, response::IntoResponse};

use circle_db::Connection;
use circle_db::models::NewNotification;
use circle_db::queries::notifications;
use circle_types::api::MessageResponse;
use circle_types::events::{Envelope, GatewayEvent};
use circle_types::models::NotificationKind;

use crate::error::ApiError;
use crate::extract::PathParams;
use crate::middleware::Caller;
use crate::outbox::Outbox;
use crate::state::{self, AppState};

const UNREAD_LIMIT: u32 = 50;

/// Store an unread notification for `to` and queue its live delivery.
pub fn emit(
    conn: &Connection,
    outbox: &mut Outbox,
    to: i64,
    kind: NotificationKind,
    content: &str,
    from: Option<i64>,
    group_id: Option<i64>,
) -> Result<(), ApiError> {
    let stored = notifications::insert(
        conn,
        &NewNotification {
            to_user_id: to,
            from_user_id: from,
            kind: kind.as_str(),
            content,
            group_id,
        },
    )?;

    let mut envelope = Envelope::new(GatewayEvent::Notification(stored));
    if let Some(gid) = group_id {
        envelope = envelope.in_group(gid);
    }
    outbox.push([to], envelope);
    Ok(())
}

pub async fn list_unread(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| {
        Ok(notifications::unread_for(conn, caller.id, UNREAD_LIMIT)?)
    })
    .await?;
    Ok(Json(list))
}

/// Only the recipient can mark a notification, and only while it is unread.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state::commit(&state, move |conn, _| {
        match notifications::mark_read(conn, id, caller.id)? {
            0 => Err(ApiError::not_found("Notification not found")),
            _ => Ok(()),
        }
    })
    .await?;
    Ok(Json(MessageResponse::new("Notification marked as read")))
}
