use serde::{Deserialize, Serialize};
use std::fmt;

/// ICE server entry as entered by the user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Which side of the manual offer/answer exchange we are.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

/// The two logical channels multiplexed over one peer connection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Chat,
    Control,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Chat, ChannelKind::Control];

    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Control => "control",
        }
    }

    /// Exact, case-sensitive label match. Anything else is an unsolicited channel.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "chat" => Some(ChannelKind::Chat),
            "control" => Some(ChannelKind::Control),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transport-local handle for a data channel, independent of its label.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

/// Raw frame as delivered by a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}
