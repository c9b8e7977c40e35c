//! Wire envelope exchanged with clients and carried on the bus
//!
//! `{"action": ..., "message": ..., "target": {id, name, private} | null,
//! "sender": {id, name} | null}`. A frame may hold several envelopes, one
//! per line.

use serde::{Deserialize, Serialize};

use crate::core::identity::Identifiable;
use crate::error::Result;

/// Every action understood by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    SendMessage,
    JoinRoom,
    LeaveRoom,
    JoinRoomPrivate,
    UserJoin,
    UserLeft,
    RoomJoined,
}

/// Room reference as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private: bool,
}

impl Identifiable for RoomRef {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

/// Sender reference as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl UserRef {
    pub fn of(identity: &dyn Identifiable) -> Self {
        Self {
            id: identity.id().to_string(),
            name: identity.display_name().to_string(),
        }
    }
}

impl Identifiable for UserRef {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub action: Action,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: Option<RoomRef>,
    #[serde(default)]
    pub sender: Option<UserRef>,
}

impl Message {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            message: String::new(),
            target: None,
            sender: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.message = text.into();
        self
    }

    pub fn with_target(mut self, target: RoomRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_sender(mut self, sender: UserRef) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Serialize to a single-line JSON payload
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one envelope. Any decoded sender is untrusted.
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Replace whatever sender the peer claimed with the server-resolved one
    pub fn stamp_sender(&mut self, identity: &dyn Identifiable) {
        self.sender = Some(UserRef::of(identity));
    }

    /// Id of the room this message addresses, if any
    pub fn target_id(&self) -> Option<&str> {
        self.target
            .as_ref()
            .map(|t| t.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Split a text frame into its non-empty lines
pub fn frame_lines(frame: &str) -> impl Iterator<Item = &str> {
    frame.lines().map(str::trim).filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_actions_use_kebab_case_names() {
        let names: Vec<String> = [
            Action::SendMessage,
            Action::JoinRoom,
            Action::LeaveRoom,
            Action::JoinRoomPrivate,
            Action::UserJoin,
            Action::UserLeft,
            Action::RoomJoined,
        ]
        .iter()
        .map(|a| serde_json::to_value(a).unwrap().as_str().unwrap().to_string())
        .collect();

        assert_eq!(
            names,
            vec![
                "send-message",
                "join-room",
                "leave-room",
                "join-room-private",
                "user-join",
                "user-left",
                "room-joined"
            ]
        );
    }

    #[test]
    fn test_decode_client_frame() {
        let msg = Message::decode(
            r#"{"action":"send-message","message":"hello","target":{"id":"r1","name":"general"}}"#,
        )
        .unwrap();

        assert_eq!(msg.action, Action::SendMessage);
        assert_eq!(msg.message, "hello");
        assert_eq!(msg.target_id(), Some("r1"));
        assert!(!msg.target.unwrap().private);
        assert!(msg.sender.is_none());
    }

    #[test]
    fn test_decode_tolerates_missing_optional_fields() {
        let msg = Message::decode(r#"{"action":"join-room"}"#).unwrap();
        assert_eq!(msg.action, Action::JoinRoom);
        assert!(msg.message.is_empty());
        assert!(msg.target_id().is_none());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(Message::decode(r#"{"action":"drop-tables","message":""}"#).is_err());
        assert!(Message::decode("not json").is_err());
    }

    #[test]
    fn test_claimed_sender_is_replaced() {
        let mut msg = Message::decode(
            r#"{"action":"send-message","message":"hi","sender":{"id":"admin","name":"root"}}"#,
        )
        .unwrap();

        let real = UserRef {
            id: "u-7".to_string(),
            name: "mallory".to_string(),
        };
        msg.stamp_sender(&real);

        assert_eq!(msg.sender, Some(real));
    }

    #[test]
    fn test_encode_matches_wire_schema() {
        let msg = Message::new(Action::RoomJoined).with_target(RoomRef {
            id: "r1".to_string(),
            name: "general".to_string(),
            private: false,
        });

        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "room-joined",
                "message": "",
                "target": {"id": "r1", "name": "general", "private": false},
                "sender": null
            })
        );
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let original = Message::new(Action::SendMessage)
            .with_text("multi\nline text")
            .with_target(RoomRef {
                id: "r9".to_string(),
                name: "ops".to_string(),
                private: true,
            })
            .with_sender(UserRef {
                id: "u1".to_string(),
                name: "alice".to_string(),
            });

        let decoded = Message::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_frame_lines_skip_blank_lines() {
        let frame = "{\"a\":1}\n\n{\"b\":2}\n";
        let lines: Vec<&str> = frame_lines(frame).collect();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }
}
