use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::chat::ChatCommands;
use crate::middleware::Caller;
use crate::state::AppState;

/// Upgrade to the real-time gateway. Sits behind the session gate, so the
/// socket is only admitted for a resolved caller.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    let commands = ChatCommands::new(state);
    ws.on_upgrade(move |socket| {
        circle_gateway::handle_connection(socket, hub, caller.id, caller.username, commands)
    })
}
