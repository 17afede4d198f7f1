//! Group authority: ownership, roles, invitations, join requests, events.
//!
//! Roles rank creator > admin > member. The creator alone changes roles and
//! deletes the group; creator and admins manage membership; any accepted
//! member may invite, post and create events.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;

use circle_db::Connection;
use circle_db::models::MemberRow;
use circle_db::queries::{chats, groups, notifications, posts, users};
use circle_types::api::{
    CreateCommentRequest, CreateEventRequest, CreateGroupRequest, CreatePostRequest,
    GroupListing, InviteRequest, MessageResponse, RoleResponse, RsvpRequest, UpdateGroupRequest,
    UpdateRoleRequest,
};
use circle_types::events::{Envelope, GatewayEvent, RsvpUpdate};
use circle_types::models::{
    Decision, Group, GroupEvent, GroupInvitation, GroupMember, GroupRole, InvitationStatus,
    MembershipStatus, NotificationKind, Post, RsvpResponse,
};

use crate::comments;
use crate::error::ApiError;
use crate::extract::{JsonBody, PathParams};
use crate::middleware::Caller;
use crate::notifications::emit;
use crate::outbox::Outbox;
use crate::posts as post_service;
use crate::state::{self, AppState};

fn load_group(conn: &Connection, group_id: i64) -> Result<Group, ApiError> {
    groups::by_id(conn, group_id)?.ok_or_else(|| ApiError::not_found("Group not found"))
}

fn require_member(conn: &Connection, group_id: i64, user_id: i64) -> Result<MemberRow, ApiError> {
    match groups::member(conn, group_id, user_id)? {
        Some(m) if m.is_accepted() => Ok(m),
        _ => Err(ApiError::forbidden("You are not a member of this group")),
    }
}

fn require_manager(conn: &Connection, group_id: i64, user_id: i64) -> Result<MemberRow, ApiError> {
    match groups::member(conn, group_id, user_id)? {
        Some(m) if m.is_manager() => Ok(m),
        _ => Err(ApiError::forbidden("Only group admins can do this")),
    }
}

fn parse_decision(action: &str) -> Result<Decision, ApiError> {
    Decision::parse(action).ok_or_else(|| ApiError::bad_request("action must be accept or reject"))
}

// -- Lifecycle --

/// Create a group with the caller as its accepted creator and open its chat.
pub fn create(
    conn: &Connection,
    creator_id: i64,
    title: &str,
    description: &str,
) -> Result<Group, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::missing("title"));
    }
    let group_id = groups::insert(conn, creator_id, title, description)?;
    groups::insert_member(
        conn,
        group_id,
        creator_id,
        GroupRole::Creator,
        MembershipStatus::Accepted,
    )?;
    chats::create_group_chat(conn, group_id)?;
    info!("User {} created group {} ({})", creator_id, group_id, title);
    load_group(conn, group_id)
}

pub fn update(
    conn: &Connection,
    caller_id: i64,
    group_id: i64,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<Group, ApiError> {
    load_group(conn, group_id)?;
    require_manager(conn, group_id, caller_id)?;
    let title = title.map(str::trim);
    if title.is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("title cannot be empty"));
    }
    groups::update(conn, group_id, title, description)?;
    load_group(conn, group_id)
}

/// Creator only. Members, posts, invitations, events and the chat cascade.
pub fn delete(conn: &Connection, caller_id: i64, group_id: i64) -> Result<(), ApiError> {
    let group = load_group(conn, group_id)?;
    if group.creator_id != caller_id {
        return Err(ApiError::forbidden("Only the creator can delete the group"));
    }
    groups::delete(conn, group_id)?;
    info!("User {} deleted group {}", caller_id, group_id);
    Ok(())
}

fn listing(group: Group, member: Option<MemberRow>) -> GroupListing {
    GroupListing {
        group,
        role: member.map(|m| m.role),
        membership: member.map(|m| m.status),
    }
}

pub fn list_for(conn: &Connection, caller_id: i64) -> Result<Vec<GroupListing>, ApiError> {
    let memberships = groups::memberships_of(conn, caller_id)?;
    Ok(groups::list(conn)?
        .into_iter()
        .map(|g| {
            let member = memberships.get(&g.id).copied();
            listing(g, member)
        })
        .collect())
}

// -- Membership & roles --

/// Creator only. Promotes a member to admin or demotes an admin.
pub fn update_role(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    group_id: i64,
    target_id: i64,
    role: GroupRole,
) -> Result<GroupRole, ApiError> {
    let group = load_group(conn, group_id)?;
    let actor = require_member(conn, group_id, caller.id)?;
    if actor.role != GroupRole::Creator {
        return Err(ApiError::forbidden("Only the creator can change roles"));
    }
    if role == GroupRole::Creator {
        return Err(ApiError::bad_request("The creator role cannot be assigned"));
    }
    if target_id == caller.id {
        return Err(ApiError::bad_request("The creator role cannot be changed"));
    }
    let target = groups::member(conn, group_id, target_id)?
        .filter(MemberRow::is_accepted)
        .ok_or_else(|| ApiError::not_found("Member not found"))?;
    if target.role == role {
        return Ok(role);
    }

    groups::set_member_role(conn, group_id, target_id, role)?;
    emit(
        conn,
        outbox,
        target_id,
        NotificationKind::GroupRoleUpdated,
        &format!("You are now {} of {}", role.as_str(), group.title),
        Some(caller.id),
        Some(group_id),
    )?;
    Ok(role)
}

/// Creator removes anyone but themself; admins remove plain members.
pub fn remove_member(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    group_id: i64,
    target_id: i64,
) -> Result<(), ApiError> {
    let group = load_group(conn, group_id)?;
    let actor = require_manager(conn, group_id, caller.id)?;
    if target_id == caller.id {
        return Err(ApiError::bad_request("Use leave to exit the group"));
    }
    let target = groups::member(conn, group_id, target_id)?
        .ok_or_else(|| ApiError::not_found("Member not found"))?;
    if target.role == GroupRole::Creator {
        return Err(ApiError::forbidden("The creator cannot be removed"));
    }
    if actor.role == GroupRole::Admin && target.role == GroupRole::Admin {
        return Err(ApiError::forbidden("Admins can only remove members"));
    }

    groups::delete_member(conn, group_id, target_id)?;
    emit(
        conn,
        outbox,
        target_id,
        NotificationKind::GroupRemoved,
        &format!("You were removed from {}", group.title),
        Some(caller.id),
        Some(group_id),
    )?;
    Ok(())
}

pub fn leave(conn: &Connection, caller_id: i64, group_id: i64) -> Result<(), ApiError> {
    load_group(conn, group_id)?;
    let member = groups::member(conn, group_id, caller_id)?
        .ok_or_else(|| ApiError::not_found("You are not a member of this group"))?;
    if member.role == GroupRole::Creator {
        return Err(ApiError::bad_request("The creator cannot leave the group"));
    }
    groups::delete_member(conn, group_id, caller_id)?;
    Ok(())
}

// -- Invitations --

/// Any accepted member may invite someone who is not a member, has no
/// pending join request and has no pending invitation.
pub fn invite(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    group_id: i64,
    invitee_id: i64,
) -> Result<GroupInvitation, ApiError> {
    let group = load_group(conn, group_id)?;
    require_member(conn, group_id, caller.id)?;
    if invitee_id == caller.id {
        return Err(ApiError::bad_request("You cannot invite yourself"));
    }
    if !users::exists(conn, invitee_id)? {
        return Err(ApiError::not_found("User not found"));
    }
    match groups::member(conn, group_id, invitee_id)? {
        Some(m) if m.is_accepted() => return Err(ApiError::conflict("User is already a member")),
        Some(_) => return Err(ApiError::conflict("User already requested to join")),
        None => {}
    }
    if groups::pending_invitation(conn, group_id, invitee_id)?.is_some() {
        return Err(ApiError::conflict("User is already invited"));
    }

    let id = groups::insert_invitation(conn, group_id, caller.id, invitee_id)?;
    emit(
        conn,
        outbox,
        invitee_id,
        NotificationKind::GroupInvitation,
        &format!("{} invited you to join {}", caller.username, group.title),
        Some(caller.id),
        Some(group_id),
    )?;
    groups::invitation_by_id(conn, id)?.ok_or(ApiError::Internal)
}

/// The invitee accepts or declines; a group admin may only revoke.
pub fn handle_invitation(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    invitation_id: i64,
    decision: Decision,
) -> Result<GroupInvitation, ApiError> {
    let inv = groups::invitation_by_id(conn, invitation_id)?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    let is_invitee = inv.invitee_id == caller.id;
    if !is_invitee {
        let manager =
            groups::member(conn, inv.group_id, caller.id)?.is_some_and(|m| m.is_manager());
        if !manager {
            return Err(ApiError::forbidden("Not your invitation"));
        }
        if decision == Decision::Accept {
            return Err(ApiError::forbidden(
                "Only the invited user can accept an invitation",
            ));
        }
    }
    if inv.status != InvitationStatus::Pending {
        return Err(ApiError::conflict("Invitation already processed"));
    }

    let status = match decision {
        Decision::Accept => InvitationStatus::Accepted,
        Decision::Reject => InvitationStatus::Rejected,
    };
    if groups::resolve_invitation(conn, inv.id, status)? == 0 {
        return Err(ApiError::conflict("Invitation already processed"));
    }
    notifications::delete_for_group(
        conn,
        inv.invitee_id,
        NotificationKind::GroupInvitation.as_str(),
        inv.group_id,
    )?;

    match (decision, is_invitee) {
        (Decision::Accept, _) => {
            match groups::member(conn, inv.group_id, caller.id)? {
                Some(m) if m.is_accepted() => {}
                Some(_) => {
                    groups::set_member_status(
                        conn,
                        inv.group_id,
                        caller.id,
                        MembershipStatus::Accepted,
                    )?;
                }
                None => {
                    groups::insert_member(
                        conn,
                        inv.group_id,
                        caller.id,
                        GroupRole::Member,
                        MembershipStatus::Accepted,
                    )?;
                }
            }
            emit(
                conn,
                outbox,
                inv.inviter_id,
                NotificationKind::GroupInvitationAccepted,
                &format!(
                    "{} accepted your invitation to {}",
                    caller.username, inv.group_title
                ),
                Some(caller.id),
                Some(inv.group_id),
            )?;
        }
        (Decision::Reject, true) => {
            emit(
                conn,
                outbox,
                inv.inviter_id,
                NotificationKind::GroupInvitationRejected,
                &format!(
                    "{} declined your invitation to {}",
                    caller.username, inv.group_title
                ),
                Some(caller.id),
                Some(inv.group_id),
            )?;
        }
        (Decision::Reject, false) => {
            emit(
                conn,
                outbox,
                inv.invitee_id,
                NotificationKind::GroupInvitationRejected,
                &format!("Your invitation to {} was withdrawn", inv.group_title),
                Some(caller.id),
                Some(inv.group_id),
            )?;
        }
    }

    Ok(GroupInvitation { status, ..inv })
}

// -- Join requests --

pub fn request_join(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    group_id: i64,
) -> Result<(), ApiError> {
    let group = load_group(conn, group_id)?;
    match groups::member(conn, group_id, caller.id)? {
        Some(m) if m.is_accepted() => return Err(ApiError::conflict("You are already a member")),
        Some(_) => return Err(ApiError::conflict("Join request already pending")),
        None => {}
    }
    if groups::pending_invitation(conn, group_id, caller.id)?.is_some() {
        return Err(ApiError::conflict(
            "You have a pending invitation to this group",
        ));
    }

    groups::insert_member(
        conn,
        group_id,
        caller.id,
        GroupRole::Member,
        MembershipStatus::Pending,
    )?;
    for manager in groups::manager_ids(conn, group_id)? {
        emit(
            conn,
            outbox,
            manager,
            NotificationKind::GroupJoinRequest,
            &format!("{} wants to join {}", caller.username, group.title),
            Some(caller.id),
            Some(group_id),
        )?;
    }
    Ok(())
}

pub fn pending_requests(
    conn: &Connection,
    caller_id: i64,
    group_id: i64,
) -> Result<Vec<GroupMember>, ApiError> {
    load_group(conn, group_id)?;
    require_manager(conn, group_id, caller_id)?;
    Ok(groups::members(conn, group_id, MembershipStatus::Pending)?)
}

/// Accept turns the pending row into a membership; reject deletes it.
pub fn handle_join_request(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    group_id: i64,
    user_id: i64,
    decision: Decision,
) -> Result<(), ApiError> {
    let group = load_group(conn, group_id)?;
    require_manager(conn, group_id, caller.id)?;
    let request = groups::member(conn, group_id, user_id)?
        .ok_or_else(|| ApiError::not_found("Join request not found"))?;
    if request.is_accepted() {
        return Err(ApiError::conflict("Join request already processed"));
    }

    let (kind, content) = match decision {
        Decision::Accept => {
            groups::set_member_status(conn, group_id, user_id, MembershipStatus::Accepted)?;
            let content = format!("Your request to join {} was accepted", group.title);
            (NotificationKind::GroupJoinAccepted, content)
        }
        Decision::Reject => {
            groups::delete_member(conn, group_id, user_id)?;
            let content = format!("Your request to join {} was declined", group.title);
            (NotificationKind::GroupJoinRejected, content)
        }
    };
    emit(
        conn,
        outbox,
        user_id,
        kind,
        &content,
        Some(caller.id),
        Some(group_id),
    )
}

// -- Events --

pub fn create_event(
    conn: &Connection,
    outbox: &mut Outbox,
    caller: &Caller,
    group_id: i64,
    req: &CreateEventRequest,
) -> Result<GroupEvent, ApiError> {
    let group = load_group(conn, group_id)?;
    require_member(conn, group_id, caller.id)?;
    if req.title.trim().is_empty() {
        return Err(ApiError::missing("title"));
    }
    if req.event_date.trim().is_empty() {
        return Err(ApiError::missing("event_date"));
    }

    let event_id = groups::insert_event(
        conn,
        group_id,
        caller.id,
        req.title.trim(),
        &req.description,
        req.event_date.trim(),
    )?;
    for member in groups::accepted_member_ids(conn, group_id)? {
        if member == caller.id {
            continue;
        }
        emit(
            conn,
            outbox,
            member,
            NotificationKind::GroupEvent,
            &format!("New event in {}: {}", group.title, req.title.trim()),
            Some(caller.id),
            Some(group_id),
        )?;
    }
    groups::event_by_id(conn, event_id, caller.id)?.ok_or(ApiError::Internal)
}

/// Record the caller's response and publish fresh counts to the group.
pub fn rsvp(
    conn: &Connection,
    outbox: &mut Outbox,
    caller_id: i64,
    event_id: i64,
    response: RsvpResponse,
) -> Result<GroupEvent, ApiError> {
    let event = groups::event_by_id(conn, event_id, caller_id)?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;
    require_member(conn, event.group_id, caller_id)?;

    groups::upsert_rsvp(conn, event_id, caller_id, response)?;
    let event = groups::event_by_id(conn, event_id, caller_id)?.ok_or(ApiError::Internal)?;

    let update = RsvpUpdate {
        event_id,
        group_id: event.group_id,
        user_id: caller_id,
        response,
        going: event.going,
        not_going: event.not_going,
    };
    outbox.push(
        groups::accepted_member_ids(conn, event.group_id)?,
        Envelope::new(GatewayEvent::EventRsvp(update)).in_group(event.group_id),
    );
    Ok(event)
}

// -- Handlers --

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| list_for(conn, caller.id)).await?;
    Ok(Json(list))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state::commit(&state, move |conn, _| {
        create(conn, caller.id, &req.title, &req.description)
    })
    .await?;
    Ok(Json(group))
}

pub async fn get_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state::read(&state, move |conn| {
        let group = load_group(conn, group_id)?;
        let member = groups::member(conn, group_id, caller.id)?;
        Ok(listing(group, member))
    })
    .await?;
    Ok(Json(group))
}

pub async fn update_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
    JsonBody(req): JsonBody<UpdateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state::commit(&state, move |conn, _| {
        update(
            conn,
            caller.id,
            group_id,
            req.title.as_deref(),
            req.description.as_deref(),
        )
    })
    .await?;
    Ok(Json(group))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state::commit(&state, move |conn, _| delete(conn, caller.id, group_id)).await?;
    Ok(Json(MessageResponse::new("Group deleted")))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(_caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let members = state::read(&state, move |conn| {
        load_group(conn, group_id)?;
        Ok(groups::members(conn, group_id, MembershipStatus::Accepted)?)
    })
    .await?;
    Ok(Json(members))
}

pub async fn get_role(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = state::read(&state, move |conn| {
        load_group(conn, group_id)?;
        let member = groups::member(conn, group_id, caller.id)?;
        Ok(RoleResponse {
            role: member.map(|m| m.role),
            status: member.map(|m| m.status),
        })
    })
    .await?;
    Ok(Json(resp))
}

pub async fn set_member_role(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams((group_id, member_id)): PathParams<(i64, i64)>,
    JsonBody(req): JsonBody<UpdateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = state::commit(&state, move |conn, outbox| {
        update_role(conn, outbox, &caller, group_id, member_id, req.role)
    })
    .await?;
    Ok(Json(RoleResponse {
        role: Some(role),
        status: Some(MembershipStatus::Accepted),
    }))
}

pub async fn delete_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams((group_id, member_id)): PathParams<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state::commit(&state, move |conn, outbox| {
        remove_member(conn, outbox, &caller, group_id, member_id)
    })
    .await?;
    Ok(Json(MessageResponse::new("Member removed")))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state::commit(&state, move |conn, _| leave(conn, caller.id, group_id)).await?;
    Ok(Json(MessageResponse::new("Left group")))
}

pub async fn invite_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(req): JsonBody<InviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group_id = req.group_id.ok_or_else(|| ApiError::missing("group_id"))?;
    let user_id = req.user_id.ok_or_else(|| ApiError::missing("user_id"))?;
    let invitation = state::commit(&state, move |conn, outbox| {
        invite(conn, outbox, &caller, group_id, user_id)
    })
    .await?;
    Ok(Json(invitation))
}

pub async fn respond_invitation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams((invitation_id, action)): PathParams<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = parse_decision(&action)?;
    let invitation = state::commit(&state, move |conn, outbox| {
        handle_invitation(conn, outbox, &caller, invitation_id, decision)
    })
    .await?;
    Ok(Json(invitation))
}

pub async fn my_invitations(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| {
        Ok(groups::pending_invitations_for(conn, caller.id)?)
    })
    .await?;
    Ok(Json(list))
}

pub async fn join_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state::commit(&state, move |conn, outbox| {
        request_join(conn, outbox, &caller, group_id)
    })
    .await?;
    Ok(Json(MessageResponse::new("Join request sent")))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| {
        pending_requests(conn, caller.id, group_id)
    })
    .await?;
    Ok(Json(list))
}

pub async fn respond_join_request(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams((group_id, user_id, action)): PathParams<(i64, i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = parse_decision(&action)?;
    state::commit(&state, move |conn, outbox| {
        handle_join_request(conn, outbox, &caller, group_id, user_id, decision)
    })
    .await?;
    let message = match decision {
        Decision::Accept => "Join request accepted",
        Decision::Reject => "Join request rejected",
    };
    Ok(Json(MessageResponse::new(message)))
}

pub async fn list_group_posts(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let list: Vec<Post> = state::read(&state, move |conn| {
        load_group(conn, group_id)?;
        require_member(conn, group_id, caller.id)?;
        Ok(posts::list_for_group(conn, group_id)?)
    })
    .await?;
    Ok(Json(list))
}

pub async fn create_group_post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
    JsonBody(req): JsonBody<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state::commit(&state, move |conn, _| {
        post_service::create(conn, caller.id, &req, Some(group_id))
    })
    .await?;
    Ok(Json(post))
}

pub async fn create_group_post_comment(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams((group_id, post_id)): PathParams<(i64, i64)>,
    JsonBody(req): JsonBody<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state::commit(&state, move |conn, _| {
        let post =
            posts::by_id(conn, post_id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
        if post.group_id != Some(group_id) {
            return Err(ApiError::not_found("Post not found"));
        }
        comments::create(conn, caller.id, post_id, &req.content, &req.media)
    })
    .await?;
    Ok(Json(comment))
}

pub async fn list_events(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let list = state::read(&state, move |conn| {
        load_group(conn, group_id)?;
        require_member(conn, group_id, caller.id)?;
        Ok(groups::events_for(conn, group_id, caller.id)?)
    })
    .await?;
    Ok(Json(list))
}

pub async fn create_group_event(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(group_id): PathParams<i64>,
    JsonBody(req): JsonBody<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state::commit(&state, move |conn, outbox| {
        create_event(conn, outbox, &caller, group_id, &req)
    })
    .await?;
    Ok(Json(event))
}

pub async fn respond_event(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    PathParams(event_id): PathParams<i64>,
    JsonBody(req): JsonBody<RsvpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state::commit(&state, move |conn, outbox| {
        rsvp(conn, outbox, caller.id, event_id, req.response)
    })
    .await?;
    Ok(Json(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{conn, user};

    struct Fixture {
        conn: Connection,
        owner: Caller,
        admin: Caller,
        member: Caller,
        outsider: Caller,
        group_id: i64,
    }

    fn caller(conn: &Connection, name: &str) -> Caller {
        Caller {
            id: user(conn, name, false),
            username: name.to_string(),
        }
    }

    /// Group with creator `owner`, admin `admin`, member `member`.
    fn fixture() -> Fixture {
        let conn = conn();
        let owner = caller(&conn, "owner");
        let admin = caller(&conn, "admin");
        let member = caller(&conn, "member");
        let outsider = caller(&conn, "outsider");
        let group = create(&conn, owner.id, "Chess", "club").unwrap();
        groups::insert_member(
            &conn,
            group.id,
            admin.id,
            GroupRole::Admin,
            MembershipStatus::Accepted,
        )
        .unwrap();
        groups::insert_member(
            &conn,
            group.id,
            member.id,
            GroupRole::Member,
            MembershipStatus::Accepted,
        )
        .unwrap();
        Fixture {
            conn,
            owner,
            admin,
            member,
            outsider,
            group_id: group.id,
        }
    }

    #[test]
    fn create_sets_creator_and_chat() {
        let f = fixture();
        let group = load_group(&f.conn, f.group_id).unwrap();
        assert_eq!(group.creator_id, f.owner.id);
        assert_eq!(group.member_count, 3);
        assert!(group.chat_id.is_some());
        let m = groups::member(&f.conn, f.group_id, f.owner.id)
            .unwrap()
            .unwrap();
        assert_eq!(m.role, GroupRole::Creator);
    }

    #[test]
    fn only_creator_changes_roles() {
        let f = fixture();
        let mut outbox = Outbox::default();

        assert!(matches!(
            update_role(
                &f.conn,
                &mut outbox,
                &f.admin,
                f.group_id,
                f.member.id,
                GroupRole::Admin,
            ),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            update_role(
                &f.conn,
                &mut outbox,
                &f.owner,
                f.group_id,
                f.member.id,
                GroupRole::Creator,
            ),
            Err(ApiError::BadRequest(_))
        ));

        update_role(
            &f.conn,
            &mut outbox,
            &f.owner,
            f.group_id,
            f.member.id,
            GroupRole::Admin,
        )
        .unwrap();
        let m = groups::member(&f.conn, f.group_id, f.member.id)
            .unwrap()
            .unwrap();
        assert_eq!(m.role, GroupRole::Admin);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn removal_respects_rank() {
        let f = fixture();
        let mut outbox = Outbox::default();

        assert!(matches!(
            remove_member(&f.conn, &mut outbox, &f.admin, f.group_id, f.owner.id),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            remove_member(&f.conn, &mut outbox, &f.member, f.group_id, f.admin.id),
            Err(ApiError::Forbidden(_))
        ));

        remove_member(&f.conn, &mut outbox, &f.admin, f.group_id, f.member.id).unwrap();
        remove_member(&f.conn, &mut outbox, &f.owner, f.group_id, f.admin.id).unwrap();
        assert_eq!(load_group(&f.conn, f.group_id).unwrap().member_count, 1);
    }

    #[test]
    fn creator_cannot_leave_but_members_can() {
        let f = fixture();
        assert!(matches!(
            leave(&f.conn, f.owner.id, f.group_id),
            Err(ApiError::BadRequest(_))
        ));
        leave(&f.conn, f.member.id, f.group_id).unwrap();
        assert!(matches!(
            leave(&f.conn, f.member.id, f.group_id),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn invitation_flow_is_terminal() {
        let f = fixture();
        let mut outbox = Outbox::default();

        assert!(matches!(
            invite(&f.conn, &mut outbox, &f.outsider, f.group_id, f.owner.id),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            invite(&f.conn, &mut outbox, &f.member, f.group_id, f.admin.id),
            Err(ApiError::Conflict(_))
        ));

        let inv = invite(&f.conn, &mut outbox, &f.member, f.group_id, f.outsider.id).unwrap();
        assert!(matches!(
            invite(&f.conn, &mut outbox, &f.owner, f.group_id, f.outsider.id),
            Err(ApiError::Conflict(_))
        ));

        // An admin may revoke but never accept on the invitee's behalf.
        assert!(matches!(
            handle_invitation(&f.conn, &mut outbox, &f.admin, inv.id, Decision::Accept),
            Err(ApiError::Forbidden(_))
        ));

        let pending = notifications::unread_for(&f.conn, f.outsider.id, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, "group_invitation");

        let done = handle_invitation(&f.conn, &mut outbox, &f.outsider, inv.id, Decision::Accept)
            .unwrap();
        assert_eq!(done.status, InvitationStatus::Accepted);
        assert!(require_member(&f.conn, f.group_id, f.outsider.id).is_ok());
        // The invite notification goes away with the invitation.
        let left = notifications::unread_for(&f.conn, f.outsider.id, 10).unwrap();
        assert!(left.is_empty());

        assert!(matches!(
            handle_invitation(&f.conn, &mut outbox, &f.outsider, inv.id, Decision::Reject),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn join_request_notifies_managers_and_resolves_once() {
        let f = fixture();
        let mut outbox = Outbox::default();

        request_join(&f.conn, &mut outbox, &f.outsider, f.group_id).unwrap();
        // Creator and admin are told.
        assert_eq!(outbox.len(), 2);
        assert!(matches!(
            request_join(&f.conn, &mut outbox, &f.outsider, f.group_id),
            Err(ApiError::Conflict(_))
        ));

        assert!(matches!(
            pending_requests(&f.conn, f.member.id, f.group_id),
            Err(ApiError::Forbidden(_))
        ));
        let requests = pending_requests(&f.conn, f.admin.id, f.group_id).unwrap();
        assert_eq!(requests.len(), 1);

        handle_join_request(
            &f.conn,
            &mut outbox,
            &f.admin,
            f.group_id,
            f.outsider.id,
            Decision::Accept,
        )
        .unwrap();
        assert!(matches!(
            handle_join_request(
                &f.conn,
                &mut outbox,
                &f.admin,
                f.group_id,
                f.outsider.id,
                Decision::Reject,
            ),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn rejected_join_request_is_gone() {
        let f = fixture();
        let mut outbox = Outbox::default();
        request_join(&f.conn, &mut outbox, &f.outsider, f.group_id).unwrap();
        handle_join_request(
            &f.conn,
            &mut outbox,
            &f.owner,
            f.group_id,
            f.outsider.id,
            Decision::Reject,
        )
        .unwrap();
        let row = groups::member(&f.conn, f.group_id, f.outsider.id).unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn rsvp_publishes_counts_to_members() {
        let f = fixture();
        let mut outbox = Outbox::default();
        let req = CreateEventRequest {
            title: "Tournament".into(),
            description: String::new(),
            event_date: "2026-12-01T18:00".into(),
        };
        let event = create_event(&f.conn, &mut outbox, &f.member, f.group_id, &req).unwrap();
        // Everyone but the creator of the event hears about it.
        assert_eq!(outbox.len(), 2);

        let mut outbox = Outbox::default();
        let updated = rsvp(
            &f.conn,
            &mut outbox,
            f.admin.id,
            event.id,
            RsvpResponse::Going,
        )
        .unwrap();
        assert_eq!(updated.going, 1);
        assert_eq!(updated.my_response, Some(RsvpResponse::Going));
        assert_eq!(outbox.len(), 1);

        assert!(matches!(
            rsvp(
                &f.conn,
                &mut outbox,
                f.outsider.id,
                event.id,
                RsvpResponse::Going,
            ),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn delete_is_creator_only() {
        let f = fixture();
        assert!(matches!(
            delete(&f.conn, f.admin.id, f.group_id),
            Err(ApiError::Forbidden(_))
        ));
        delete(&f.conn, f.owner.id, f.group_id).unwrap();
        assert!(matches!(
            load_group(&f.conn, f.group_id),
            Err(ApiError::NotFound(_))
        ));
    }
}
