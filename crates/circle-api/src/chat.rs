//! Direct and group messaging.
//!
//! A message is persisted first and then published to the chat's
//! participants through the outbox. Recipients without a live connection
//! get a stored notification instead. Direct messaging requires an accepted
//! follow in either direction, checked on every send.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use circle_db::Connection;
use circle_db::models::ChatRow;
use circle_db::queries::{chats, groups, users};
use circle_gateway::CommandSink;
use circle_types::api::{
    ChatHandle, DirectChatRequest, HistoryQuery, MessageResponse, SendDirectRequest,
    SendMessageRequest,
};
use circle_types::events::{ClientCommand, Envelope, GatewayEvent};
use circle_types::models::{ChatKind, ChatMessage, ChatPeer, ChatSummary, NotificationKind};

use crate::error::ApiError;
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::follows::mutual_or_following;
use crate::middleware::Caller;
use crate::notifications::emit;
use crate::outbox::Outbox;
use crate::state::{self, AppState};

const DEFAULT_HISTORY: u32 = 50;
const MAX_HISTORY: u32 = 200;
const PREVIEW_CHARS: usize = 50;

/// Users connected to the gateway, sampled before a send.
pub type Online = HashSet<i64>;

fn load_chat(conn: &Connection, chat_id: i64) -> Result<ChatRow, ApiError> {
    chats::by_id(conn, chat_id)?.ok_or_else(|| ApiError::not_found("Chat not found"))
}

fn require_participant(conn: &Connection, chat_id: i64, user_id: i64) -> Result<ChatRow, ApiError> {
    let chat = load_chat(conn, chat_id)?;
    if !chats::is_participant(conn, &chat, user_id)? {
        return Err(ApiError::forbidden(
            "You are not a participant of this chat",
        ));
    }
    Ok(chat)
}

fn message_body(content: &str) -> Result<&str, ApiError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::missing("content"));
    }
    Ok(content)
}

fn preview(message: &ChatMessage) -> String {
    let mut chars = message.content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    let body = if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    };
    format!("{}: {}", message.sender_name, body)
}

/// The direct chat between the two users, created on first use.
pub fn open_direct(conn: &Connection, caller_id: i64, peer_id: i64) -> Result<i64, ApiError> {
    if caller_id == peer_id {
        return Err(ApiError::bad_request("You cannot chat with yourself"));
    }
    if !users::exists(conn, peer_id)? {
        return Err(ApiError::not_found("User not found"));
    }
    if !mutual_or_following(conn, caller_id, peer_id)? {
        return Err(ApiError::forbidden("No follow relationship exists"));
    }
    match chats::find_direct(conn, caller_id, peer_id)? {
        Some(id) => Ok(id),
        None => Ok(chats::create_direct(conn, caller_id, peer_id)?),
    }
}

/// Persist a direct message and publish it to both ends. An offline
/// recipient gets a `chat_message` notification.
pub fn send_direct(
    conn: &Connection,
    outbox: &mut Outbox,
    online: &Online,
    sender_id: i64,
    recipient_id: i64,
    content: &str,
) -> Result<ChatMessage, ApiError> {
    let content = message_body(content)?;
    let chat_id = open_direct(conn, sender_id, recipient_id)?;
    let id = chats::insert_message(conn, chat_id, sender_id, Some(recipient_id), content)?;
    let message = chats::message_by_id(conn, id)?.ok_or(ApiError::Internal)?;

    if !online.contains(&recipient_id) {
        emit(
            conn,
            outbox,
            recipient_id,
            NotificationKind::ChatMessage,
            &preview(&message),
            Some(sender_id),
            None,
        )?;
    }
    outbox.push(
        [recipient_id, sender_id],
        Envelope::new(GatewayEvent::ChatMessage(message.clone())).in_room(chat_id),
    );
    Ok(message)
}

/// Persist a message in a group's chat and publish it to accepted members.
/// Offline members other than the sender get a `group_message` notification.
pub fn send_group(
    conn: &Connection,
    outbox: &mut Outbox,
    online: &Online,
    sender_id: i64,
    group_id: i64,
    content: &str,
) -> Result<ChatMessage, ApiError> {
    let content = message_body(content)?;
    let chat_id = chats::group_chat_id(conn, group_id)?
        .ok_or_else(|| ApiError::not_found("Group not found"))?;
    let member = groups::member(conn, group_id, sender_id)?;
    if !member.is_some_and(|m| m.is_accepted()) {
        return Err(ApiError::forbidden("You are not a member of this group"));
    }

    let id = chats::insert_message(conn, chat_id, sender_id, None, content)?;
    let message = chats::message_by_id(conn, id)?.ok_or(ApiError::Internal)?;
    let members = groups::accepted_member_ids(conn, group_id)?;

    let text = preview(&message);
    for &member in &members {
        if member == sender_id || online.contains(&member) {
            continue;
        }
        emit(
            conn,
            outbox,
            member,
            NotificationKind::GroupMessage,
            &text,
            Some(sender_id),
            Some(group_id),
        )?;
    }
    outbox.push(
        members,
        Envelope::new(GatewayEvent::GroupMessage(message.clone()))
            .in_room(chat_id)
            .in_group(group_id),
    );
    Ok(message)
}

/// Send into an existing chat by id, whatever its kind.
pub fn send_to_chat(
    conn: &Connection,
    outbox: &mut Outbox,
    online: &Online,
    sender_id: i64,
    chat_id: i64,
    content: &str,
) -> Result<ChatMessage, ApiError> {
    let chat = require_participant(conn, chat_id, sender_id)?;
    match (chat.kind, chat.group_id) {
        (ChatKind::Group, Some(group_id)) => {
            send_group(conn, outbox, online, sender_id, group_id, content)
        }
        (ChatKind::Group, None) => Err(ApiError::Internal),
        (ChatKind::Direct, _) => {
            let peer = chats::direct_peer(conn, chat_id, sender_id)?
                .ok_or_else(|| ApiError::not_found("Chat not found"))?;
            send_direct(conn, outbox, online, sender_id, peer.id, content)
        }
    }
}

pub fn summaries(conn: &Connection, user_id: i64) -> Result<Vec<ChatSummary>, ApiError> {
    chats::chats_for(conn, user_id)?
        .into_iter()
        .map(|chat| {
            let peer = match chat.kind {
                ChatKind::Direct => chats::direct_peer(conn, chat.id, user_id)?,
                ChatKind::Group => None,
            };
            Ok(ChatSummary {
                id: chat.id,
                kind: chat.kind,
                group_id: chat.group_id,
                peer: peer.map(ChatPeer::from),
                last_message: chats::last_message(conn, chat.id)?,
                unread_count: chats::unread_count(conn, chat.id, user_id)?,
            })
        })
        .collect()
}

/// One page of history. Reading a page advances the reader's marker to the
/// newest message in it.
pub fn read_page(
    conn: &Connection,
    reader_id: i64,
    chat_id: i64,
    query: &HistoryQuery,
) -> Result<Vec<ChatMessage>, ApiError> {
    let mut messages = chats::history(conn, chat_id, page(query), query.before)?;
    if let Some(newest) = messages.last().map(|m| m.id) {
        chats::mark_read(conn, chat_id, reader_id, newest)?;
        for m in messages.iter_mut().filter(|m| m.recipient_id == Some(reader_id)) {
            m.status = "read".to_string();
        }
    }
    Ok(messages)
}

/// Mark everything in the chat as read for the caller.
pub fn mark_chat_read(conn: &Connection, reader_id: i64, chat_id: i64) -> Result<(), ApiError> {
    require_participant(conn, chat_id, reader_id)?;
    if let Some(latest) = chats::latest_message_id(conn, chat_id)? {
        chats::mark_read(conn, chat_id, reader_id, latest)?;
    }
    Ok(())
}

fn page(query: &HistoryQuery) -> u32 {
    query.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY)
}

// -- WebSocket commands --

/// Routes chat commands from the gateway through the same
/// persist-then-publish path as the HTTP handlers.
pub struct ChatCommands {
    pub state: AppState,
}

impl ChatCommands {
    pub fn new(state: AppState) -> Arc<Self> {
        Arc::new(Self { state })
    }
}

impl CommandSink for ChatCommands {
    fn handle(&self, user_id: i64, command: ClientCommand) -> BoxFuture<'static, ()> {
        let state = self.state.clone();
        Box::pin(async move {
            let result = match command {
                ClientCommand::ChatMessage {
                    recipient_id,
                    content,
                } => {
                    let online = state.hub.online_users().await;
                    state::commit(&state, move |conn, outbox| {
                        send_direct(conn, outbox, &online, user_id, recipient_id, &content)
                    })
                    .await
                }
                ClientCommand::GroupMessage { group_id, content } => {
                    let online = state.hub.online_users().await;
                    state::commit(&state, move |conn, outbox| {
                        send_group(conn, outbox, &online, user_id, group_id, &content)
                    })
                    .await
                }
                ClientCommand::Ping => return,
            };
            match result {
                Ok(message) => debug!("User {} sent message {} over gateway", user_id, message.id),
                Err(e) => warn!("Gateway message from user {} rejected: {}", user_id, e),
            }
        })
    }
}

// -- Handlers --

pub async fn create_direct_chat(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<DirectChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let peer_id = req.user_id.ok_or_else(|| ApiError::missing("userId"))?;
    let id = state::commit(&state, move |conn, _| open_direct(conn, caller.id, peer_id)).await?;
    Ok(Json(ChatHandle { id }))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| summaries(conn, caller.id)).await?;
    Ok(Json(list))
}

pub async fn list_participants(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(chat_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let list: Vec<ChatPeer> = state::read(&state, move |conn| {
        let chat = require_participant(conn, chat_id, caller.id)?;
        let peers = chats::participants(conn, &chat)?;
        Ok(peers.into_iter().map(ChatPeer::from).collect())
    })
    .await?;
    Ok(Json(list))
}

pub async fn chat_history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(chat_id): PathParams<i64>,
    QueryParams(query): QueryParams<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state::commit(&state, move |conn, _| {
        require_participant(conn, chat_id, caller.id)?;
        read_page(conn, caller.id, chat_id, &query)
    })
    .await?;
    Ok(Json(messages))
}

/// `POST /chats/{id}/read`
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(chat_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state::commit(&state, move |conn, _| {
        mark_chat_read(conn, caller.id, chat_id)
    })
    .await?;
    Ok(Json(MessageResponse::new("Chat marked as read")))
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(chat_id): PathParams<i64>,
    JsonBody(req): JsonBody<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let online = state.hub.online_users().await;
    let message = state::commit(&state, move |conn, outbox| {
        send_to_chat(conn, outbox, &online, caller.id, chat_id, &req.content)
    })
    .await?;
    Ok(Json(message))
}

/// `POST /chat`: direct message addressed by recipient.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<SendDirectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recipient_id = req
        .recipient_id
        .ok_or_else(|| ApiError::missing("recipientId"))?;
    let online = state.hub.online_users().await;
    let message = state::commit(&state, move |conn, outbox| {
        send_direct(conn, outbox, &online, caller.id, recipient_id, &req.content)
    })
    .await?;
    Ok(Json(message))
}

/// `GET /messages/{userId}/{contactId}`: history of the caller's direct chat
/// with a contact. Empty when the two never talked.
pub async fn direct_history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams((user_id, contact_id)): PathParams<(i64, i64)>,
    QueryParams(query): QueryParams<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id != caller.id {
        return Err(ApiError::forbidden("You can only read your own messages"));
    }
    let messages = state::commit(&state, move |conn, _| {
        match chats::find_direct(conn, user_id, contact_id)? {
            Some(chat_id) => read_page(conn, user_id, chat_id, &query),
            None => Ok(Vec::new()),
        }
    })
    .await?;
    Ok(Json(messages))
}
