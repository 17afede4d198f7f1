use axum::{Extension, Json, extract::State, response::IntoResponse};

use circle_db::Connection;
use circle_db::queries::users;
use circle_types::api::{ExploreEntry, ExploreRequest};

use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::follows::status;
use crate::middleware::Caller;
use crate::state::{self, AppState};

const EXPLORE_LIMIT: u32 = 20;

/// Users whose username starts with `search`, with the caller's follow status
/// towards each. The caller is never listed.
pub fn search(
    conn: &Connection,
    caller_id: i64,
    prefix: &str,
) -> Result<Vec<ExploreEntry>, ApiError> {
    users::search_prefix(conn, prefix.trim(), caller_id, EXPLORE_LIMIT)?
        .into_iter()
        .map(|user| {
            let follow_status = status(conn, caller_id, user.id)?;
            Ok(ExploreEntry {
                user,
                follow_status,
            })
        })
        .collect()
}

pub async fn explore(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<ExploreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| {
        search(conn, caller.id, &req.search)
    })
    .await?;
    Ok(Json(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{conn, user};
    use circle_db::queries::follows;
    use circle_types::models::FollowStatus;

    #[test]
    fn prefix_search_carries_follow_status() {
        let conn = conn();
        let me = user(&conn, "alice", false);
        let alan = user(&conn, "alan", false);
        user(&conn, "albert", true);
        user(&conn, "bob", false);
        follows::insert(&conn, me, alan, FollowStatus::Accepted).unwrap();

        let found = search(&conn, me, "al").unwrap();
        let names: Vec<_> = found.iter().map(|e| e.user.username.as_str()).collect();
        assert_eq!(names, ["alan", "albert"]);
        assert_eq!(found[0].follow_status, Some(FollowStatus::Accepted));
        assert_eq!(found[1].follow_status, None);
    }
}
