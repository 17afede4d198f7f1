use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Notification, RsvpResponse};

/// Events pushed to clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Sent once the connection is registered
    Ready { user_id: i64, username: String },

    /// A direct message addressed to the receiving user
    ChatMessage(ChatMessage),

    /// A message posted in a group chat the receiving user belongs to
    GroupMessage(ChatMessage),

    /// A freshly written notification row
    Notification(Notification),

    /// RSVP counts changed for a group event
    EventRsvp(RsvpUpdate),

    /// Reply to a client `ping`
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpUpdate {
    pub event_id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub response: RsvpResponse,
    pub going: i64,
    pub not_going: i64,
}

/// Wire envelope: `{type, data, roomId?, groupId?}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: GatewayEvent,
    #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
}

impl Envelope {
    pub fn new(event: GatewayEvent) -> Self {
        Self {
            event,
            room_id: None,
            group_id: None,
        }
    }

    pub fn in_room(mut self, room_id: i64) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn in_group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }
}

impl From<GatewayEvent> for Envelope {
    fn from(event: GatewayEvent) -> Self {
        Envelope::new(event)
    }
}

/// Commands sent by clients over the WebSocket gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    ChatMessage {
        #[serde(rename = "recipientId")]
        recipient_id: i64,
        content: String,
    },
    GroupMessage {
        #[serde(rename = "groupId")]
        group_id: i64,
        content: String,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> ChatMessage {
        ChatMessage {
            id: 9,
            chat_id: 3,
            sender_id: 6,
            recipient_id: Some(5),
            content: "hello".into(),
            status: "sent".into(),
            message_type: "text".into(),
            sender_name: "frank".into(),
            created_at: chrono::DateTime::from_timestamp(0, 0).unwrap_or_default(),
        }
    }

    #[test]
    fn envelope_flattens_event_and_room() {
        let env = Envelope::new(GatewayEvent::ChatMessage(message()));
        let env = env.in_room(3);
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["roomId"], 3);
        assert_eq!(value["data"]["senderId"], 6);
        assert_eq!(value["data"]["content"], "hello");
        assert!(value.get("groupId").is_none());
    }

    #[test]
    fn pong_has_no_data() {
        let env = Envelope::new(GatewayEvent::Pong);
        let value = serde_json::to_value(env).unwrap();
        assert_eq!(value, json!({ "type": "pong" }));
    }

    #[test]
    fn parses_client_commands() {
        let cmd: ClientCommand = serde_json::from_value(json!({
            "type": "chat_message",
            "data": { "recipientId": 4, "content": "yo" }
        }))
        .unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::ChatMessage { recipient_id, .. } if recipient_id == 4
        ));

        let ping: ClientCommand = serde_json::from_value(json!({ "type": "ping" })).unwrap();
        assert!(matches!(ping, ClientCommand::Ping));

        let unknown = serde_json::from_value::<ClientCommand>(json!({ "type": "shout" }));
        assert!(unknown.is_err());
    }
}
