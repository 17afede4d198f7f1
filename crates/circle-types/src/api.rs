use serde::{Deserialize, Serialize};

use crate::models::{
    FollowStatus, GroupRole, MembershipStatus, RsvpResponse, UserSummary,
};

// -- Auth --

/// Required fields default to empty so the handler can name the first one
/// that is missing instead of surfacing a serde error.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub about_me: String,
    #[serde(default)]
    pub is_private: bool,
}

/// `username` may hold either the username or the email address.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// -- Users --

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub avatar: Option<String>,
    pub about_me: Option<String>,
    pub is_private: Option<bool>,
}

/// Another user's profile as seen by the caller. Personal fields are
/// withheld when the profile is private and the caller is not an accepted
/// follower.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub user: UserSummary,
    pub is_private: bool,
    pub restricted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_me: Option<String>,
    pub followers: Vec<UserSummary>,
    pub following: Vec<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_status: Option<FollowStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending_requests: Vec<PendingFollow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingFollow {
    pub id: i64,
    pub follower: UserSummary,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExploreRequest {
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExploreEntry {
    #[serde(flatten)]
    pub user: UserSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_status: Option<FollowStatus>,
}

// -- Follows --

#[derive(Debug, Default, Deserialize)]
pub struct FollowRequest {
    pub follower_id: Option<i64>,
    pub followed_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowResponse {
    pub message: String,
    pub id: i64,
    pub status: FollowStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct HandleFollowRequest {
    pub id: Option<i64>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FollowStatusRequest {
    #[serde(alias = "userId", alias = "followed_id")]
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowStatusResponse {
    /// Caller -> user.
    pub status: Option<FollowStatus>,
    /// User -> caller.
    pub followed_by: Option<FollowStatus>,
}

// -- Posts --

#[derive(Debug, Default, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media: String,
    #[serde(default = "default_privacy")]
    pub privacy: i64,
    #[serde(default, alias = "selectedUsers")]
    pub selected_users: Vec<i64>,
    pub group_id: Option<i64>,
}

fn default_privacy() -> i64 {
    1
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCommentRequest {
    pub post_id: Option<i64>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media: String,
}

// -- Groups --

#[derive(Debug, Default, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGroupRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupListing {
    #[serde(flatten)]
    pub group: crate::models::Group,
    pub role: Option<GroupRole>,
    pub membership: Option<MembershipStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleResponse {
    pub role: Option<GroupRole>,
    pub status: Option<MembershipStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: GroupRole,
}

#[derive(Debug, Default, Deserialize)]
pub struct InviteRequest {
    #[serde(alias = "groupId")]
    pub group_id: Option<i64>,
    #[serde(alias = "userId")]
    pub user_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateEventRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub event_date: String,
}

#[derive(Debug, Deserialize)]
pub struct RsvpRequest {
    pub response: RsvpResponse,
}

// -- Chat --

#[derive(Debug, Default, Deserialize)]
pub struct DirectChatRequest {
    #[serde(alias = "userId")]
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatHandle {
    pub id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendDirectRequest {
    #[serde(alias = "recipientId")]
    pub recipient_id: Option<i64>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
}

/// `?limit=&before=` paging for chat history. `before` is a message id.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub before: Option<i64>,
}
