use axum::{
    Json, Router, middleware,
    routing::{delete, get, patch, post, put},
};
use serde_json::{Value, json};

use crate::middleware::require_session;
use crate::state::AppState;
use crate::{auth, chat, comments, explore, follows, groups, notifications, posts, users, ws};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// The full HTTP surface. Everything except the auth routes and `/health`
/// requires a session cookie.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/user/current", get(auth::current_user))
        .route("/health", get(health));

    let protected_routes = Router::new()
        // Users & follows
        .route("/user/{id}", get(users::get_profile))
        .route("/user/profile", put(users::update_profile))
        .route("/user/follow-status", post(follows::follow_status))
        .route("/explore", post(explore::explore))
        .route("/follow", post(follows::follow))
        .route("/unfollow", post(follows::unfollow_user))
        .route("/follow/handle-request", patch(follows::handle_request))
        .route("/follower/{id}", get(follows::followers))
        .route("/following/{id}", get(follows::following))
        // Posts
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route("/posts/{id}", get(posts::get_post))
        .route("/posts/{id}/details", get(posts::get_post_details))
        .route("/comments", post(comments::create_comment))
        .route("/comments/{post_id}", get(comments::list_comments))
        // Groups
        .route(
            "/groups",
            get(groups::list_groups).post(groups::create_group),
        )
        .route("/groups/invitation", post(groups::invite_member))
        .route(
            "/groups/invitation/{id}/{action}",
            post(groups::respond_invitation),
        )
        .route("/groups/invitations", get(groups::my_invitations))
        .route(
            "/groups/events/{event_id}/respond",
            post(groups::respond_event),
        )
        .route(
            "/groups/{id}",
            get(groups::get_group)
                .put(groups::update_group)
                .delete(groups::delete_group),
        )
        .route("/groups/{id}/members", get(groups::list_members))
        .route(
            "/groups/{id}/members/{member_id}",
            delete(groups::delete_member),
        )
        .route(
            "/groups/{id}/members/{member_id}/role",
            put(groups::set_member_role),
        )
        .route("/groups/{id}/role", get(groups::get_role))
        .route("/groups/{id}/leave", post(groups::leave_group))
        .route("/groups/{id}/join", post(groups::join_group))
        .route("/groups/{id}/requests", get(groups::list_requests))
        .route(
            "/groups/{id}/requests/{user_id}/{action}",
            post(groups::respond_join_request),
        )
        .route(
            "/groups/{id}/posts",
            get(groups::list_group_posts).post(groups::create_group_post),
        )
        .route(
            "/groups/{id}/posts/{post_id}/comments",
            post(groups::create_group_post_comment),
        )
        .route(
            "/groups/{id}/events",
            get(groups::list_events).post(groups::create_group_event),
        )
        // Chat
        .route("/chats", get(chat::list_chats))
        .route("/chat/direct", post(chat::create_direct_chat))
        .route("/chat", post(chat::send_message))
        .route("/chats/{id}/participants", get(chat::list_participants))
        .route(
            "/chats/{id}/messages",
            get(chat::chat_history).post(chat::post_message),
        )
        .route("/chats/{id}/read", post(chat::mark_read))
        .route(
            "/messages/{user_id}/{contact_id}",
            get(chat::direct_history),
        )
        // Notifications
        .route("/notifications", get(notifications::list_unread))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        // Real-time
        .route("/ws", get(ws::ws_upgrade))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
