//! Wire framing for the manager interface
//!
//! The manager protocol is line-oriented: each message is a series of
//! `Key: Value` lines terminated by `\r\n`, with a blank line (`\r\n\r\n`)
//! closing the message. A message carrying an `ActionID` that matches an
//! outstanding command is a response; a message carrying an `Event` field is
//! an unsolicited event. Everything here operates on complete frames only —
//! [`MessageBuffer`] owns the partial-read handling.

use bytes::{Buf, BytesMut};
use tracing::debug;

/// Field name carrying the correlation identifier
pub const ACTION_ID_FIELD: &str = "ActionID";
/// Field name identifying an unsolicited event
pub const EVENT_FIELD: &str = "Event";
/// Field name carrying the success/error disposition of a response
pub const RESPONSE_FIELD: &str = "Response";

const FRAME_TERMINATOR: &[u8] = b"\r\n\r\n";

/// One complete protocol message: an ordered list of key/value fields.
///
/// Field lookup is case-insensitive (the wire format is not strict about
/// header casing); serialization preserves insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    fields: Vec<(String, String)>,
}

impl Message {
    /// Create an empty message
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// First value for the given key, case-insensitive
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// The correlation identifier, if present
    pub fn action_id(&self) -> Option<&str> {
        self.get(ACTION_ID_FIELD)
    }

    /// The event name, if this is an unsolicited event
    pub fn event_name(&self) -> Option<&str> {
        self.get(EVENT_FIELD)
    }

    /// All fields in wire order
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Parse one complete frame (without its terminating blank line).
    ///
    /// Lines without a `:` separator are skipped; the connection banner the
    /// PBX prints before the first frame falls out here.
    pub fn parse(raw: &str) -> Self {
        let mut message = Message::new();
        for line in raw.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((key, value)) => message.push(key.trim(), value.trim()),
                None => debug!(line, "skipping malformed protocol line"),
            }
        }
        message
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

/// A response frame matched to a submitted action
#[derive(Debug, Clone)]
pub struct ManagerResponse {
    message: Message,
}

impl ManagerResponse {
    pub(crate) fn new(message: Message) -> Self {
        Self { message }
    }

    /// Whether the manager reported success
    pub fn is_success(&self) -> bool {
        self.message
            .get(RESPONSE_FIELD)
            .is_some_and(|v| v.eq_ignore_ascii_case("Success"))
    }

    /// The human-readable `Message` field, if any
    pub fn message_text(&self) -> Option<&str> {
        self.message.get("Message")
    }

    /// Field access on the underlying frame
    pub fn get(&self, key: &str) -> Option<&str> {
        self.message.get(key)
    }

    /// The underlying frame
    pub fn message(&self) -> &Message {
        &self.message
    }
}

/// Serialize an outbound action frame.
///
/// Wire layout is fixed: the `Action` line, one line per parameter, the
/// `ActionID` line, then the terminating blank line.
pub fn serialize_action(action: &str, params: &[(&str, &str)], action_id: &str) -> Vec<u8> {
    let mut out = String::with_capacity(64 + params.len() * 24);
    out.push_str("Action: ");
    out.push_str(action);
    out.push_str("\r\n");
    for (key, value) in params {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("ActionID: ");
    out.push_str(action_id);
    out.push_str("\r\n\r\n");
    out.into_bytes()
}

/// Accumulates raw socket bytes and yields only complete frames.
///
/// Partial messages are never parsed: bytes stay buffered until the
/// `\r\n\r\n` boundary is observed.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    buf: BytesMut,
}

impl MessageBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes read from the socket
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if one is buffered
    pub fn next_message(&mut self) -> Option<Message> {
        let end = find_terminator(&self.buf)?;
        let frame = self.buf.split_to(end);
        self.buf.advance(FRAME_TERMINATOR.len());
        let raw = String::from_utf8_lossy(&frame);
        Some(Message::parse(&raw))
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_TERMINATOR.len())
        .position(|w| w == FRAME_TERMINATOR)
}
