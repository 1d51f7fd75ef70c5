//! Typed unsolicited events
//!
//! Raw event frames are mapped into a closed set of variants at the protocol
//! boundary; downstream code never touches the key-value bag for the event
//! kinds it actually acts on.

use crate::protocol::Message;

/// `ChannelState` value reported once a channel is answered
pub const CHANNEL_STATE_ANSWERED: &str = "6";

/// An unsolicited event received from the manager interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// A new channel came into existence
    NewChannel {
        /// Backend-assigned unique id for the channel's call
        unique_id: String,
        /// Channel resource name, used to address later commands
        channel: String,
        /// Caller address, when the channel carries one
        caller_id_num: Option<String>,
        /// Dialed extension, when the channel carries one
        exten: Option<String>,
    },
    /// A channel changed state
    NewState {
        unique_id: String,
        channel: String,
        /// Raw `ChannelState` value; `"6"` means answered
        channel_state: String,
    },
    /// A channel hung up
    Hangup {
        unique_id: String,
        channel: String,
        /// Hangup cause code, when reported
        cause: Option<String>,
    },
    /// Any event kind this client does not act on
    Other {
        name: String,
        fields: Vec<(String, String)>,
    },
}

impl ManagerEvent {
    /// Map a raw event frame into a typed variant.
    ///
    /// Returns `None` when the frame carries no `Event` field, or when a
    /// recognized event kind is missing its mandatory identifiers.
    pub fn from_message(message: &Message) -> Option<Self> {
        let name = message.event_name()?;
        let event = match name {
            "Newchannel" => Self::NewChannel {
                unique_id: message.get("Uniqueid")?.to_string(),
                channel: message.get("Channel")?.to_string(),
                caller_id_num: message
                    .get("CallerIDNum")
                    .filter(|v| !v.is_empty() && *v != "<unknown>")
                    .map(str::to_string),
                exten: message
                    .get("Exten")
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            },
            "Newstate" => Self::NewState {
                unique_id: message.get("Uniqueid")?.to_string(),
                channel: message.get("Channel")?.to_string(),
                channel_state: message.get("ChannelState").unwrap_or_default().to_string(),
            },
            "Hangup" => Self::Hangup {
                unique_id: message.get("Uniqueid")?.to_string(),
                channel: message.get("Channel")?.to_string(),
                cause: message.get("Cause").map(str::to_string),
            },
            _ => Self::Other {
                name: name.to_string(),
                fields: message.fields().to_vec(),
            },
        };
        Some(event)
    }

    /// Whether this is a state change into the answered state
    pub fn is_answered(&self) -> bool {
        matches!(
            self,
            Self::NewState { channel_state, .. } if channel_state == CHANNEL_STATE_ANSWERED
        )
    }

    /// The backend call id this event refers to, when it has one
    pub fn unique_id(&self) -> Option<&str> {
        match self {
            Self::NewChannel { unique_id, .. }
            | Self::NewState { unique_id, .. }
            | Self::Hangup { unique_id, .. } => Some(unique_id),
            Self::Other { .. } => None,
        }
    }
}
