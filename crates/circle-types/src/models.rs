use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Enums --

/// State of a directed follow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FollowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowStatus::Pending => "pending",
            FollowStatus::Accepted => "accepted",
            FollowStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FollowStatus::Pending),
            "accepted" => Some(FollowStatus::Accepted),
            "rejected" => Some(FollowStatus::Rejected),
            _ => None,
        }
    }
}

/// Accept or reject, as sent by clients for follow requests, invitations
/// and join requests. Case-insensitive; past-tense forms are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "accepted" => Some(Decision::Accept),
            "reject" | "rejected" => Some(Decision::Reject),
            _ => None,
        }
    }
}

/// Post audience. Serialized as the integers 1, 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PostPrivacy {
    Public,
    Followers,
    Private,
}

impl TryFrom<i64> for PostPrivacy {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PostPrivacy::Public),
            2 => Ok(PostPrivacy::Followers),
            3 => Ok(PostPrivacy::Private),
            other => Err(format!("invalid privacy level {other}")),
        }
    }
}

impl From<PostPrivacy> for i64 {
    fn from(p: PostPrivacy) -> i64 {
        match p {
            PostPrivacy::Public => 1,
            PostPrivacy::Followers => 2,
            PostPrivacy::Private => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Member,
    Admin,
    Creator,
}

impl GroupRole {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupRole::Member => "member",
            GroupRole::Admin => "admin",
            GroupRole::Creator => "creator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(GroupRole::Member),
            "admin" => Some(GroupRole::Admin),
            "creator" => Some(GroupRole::Creator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Accepted,
}

impl MembershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipStatus::Pending => "pending",
            MembershipStatus::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MembershipStatus::Pending),
            "accepted" => Some(MembershipStatus::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvitationStatus::Pending),
            "accepted" => Some(InvitationStatus::Accepted),
            "rejected" => Some(InvitationStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpResponse {
    Going,
    NotGoing,
}

impl RsvpResponse {
    pub fn as_str(self) -> &'static str {
        match self {
            RsvpResponse::Going => "going",
            RsvpResponse::NotGoing => "not_going",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "going" => Some(RsvpResponse::Going),
            "not_going" => Some(RsvpResponse::NotGoing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Direct => "direct",
            ChatKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ChatKind::Direct),
            "group" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

/// Notification categories written by the domain services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FollowRequest,
    FollowAccepted,
    GroupInvitation,
    GroupInvitationAccepted,
    GroupInvitationRejected,
    GroupJoinRequest,
    GroupJoinAccepted,
    GroupJoinRejected,
    GroupRemoved,
    GroupRoleUpdated,
    GroupEvent,
    ChatMessage,
    GroupMessage,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::FollowRequest => "follow_request",
            NotificationKind::FollowAccepted => "follow_accepted",
            NotificationKind::GroupInvitation => "group_invitation",
            NotificationKind::GroupInvitationAccepted => "group_invitation_accepted",
            NotificationKind::GroupInvitationRejected => "group_invitation_rejected",
            NotificationKind::GroupJoinRequest => "group_join_request",
            NotificationKind::GroupJoinAccepted => "group_join_accepted",
            NotificationKind::GroupJoinRejected => "group_join_rejected",
            NotificationKind::GroupRemoved => "group_removed",
            NotificationKind::GroupRoleUpdated => "group_role_updated",
            NotificationKind::GroupEvent => "group_event",
            NotificationKind::ChatMessage => "chat_message",
            NotificationKind::GroupMessage => "group_message",
        }
    }
}

// -- Users --

/// Full profile, only ever returned to the account owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub avatar: String,
    pub about_me: String,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
}

// -- Follows --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowEdge {
    pub id: i64,
    pub follower_id: i64,
    pub followed_id: i64,
    pub status: FollowStatus,
    pub created_at: DateTime<Utc>,
}

// -- Posts --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub author_avatar: String,
    pub title: String,
    pub content: String,
    pub media: String,
    pub privacy: PostPrivacy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub author_avatar: String,
    pub content: String,
    pub media: String,
    pub created_at: DateTime<Utc>,
}

// -- Groups --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub creator_id: i64,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    #[serde(flatten)]
    pub user: UserSummary,
    pub role: GroupRole,
    pub status: MembershipStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInvitation {
    pub id: i64,
    pub group_id: i64,
    pub group_title: String,
    pub inviter_id: i64,
    pub invitee_id: i64,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEvent {
    pub id: i64,
    pub group_id: i64,
    pub creator_id: i64,
    pub title: String,
    pub description: String,
    pub event_date: String,
    pub going: i64,
    pub not_going: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_response: Option<RsvpResponse>,
    pub created_at: DateTime<Utc>,
}

// -- Chat --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<i64>,
    pub content: String,
    pub status: String,
    pub message_type: String,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
}

/// A user as it appears inside chat payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPeer {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
}

impl From<UserSummary> for ChatPeer {
    fn from(u: UserSummary) -> Self {
        ChatPeer {
            id: u.id,
            username: u.username,
            first_name: u.first_name,
            last_name: u.last_name,
            avatar: u.avatar,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: i64,
    pub kind: ChatKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<ChatPeer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ChatMessage>,
    /// Messages from others past the caller's read marker.
    pub unread_count: i64,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub to_user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<i64>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_title: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
