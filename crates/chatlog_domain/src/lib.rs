#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid character {ch:?} in room name: {name}")]
	InvalidChar { name: String, ch: char },
}

/// Chat room (IRC channel) identifier.
///
/// Stored lowercase and without the leading `#`; `channel()` gives the wire form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
	/// Normalize and validate a room name (`"#Foo"`, `" foo "` and `"foo"` are the same room).
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		let trimmed = name.trim();
		let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}

		if let Some(ch) = trimmed
			.chars()
			.find(|c| c.is_whitespace() || c.is_control() || matches!(c, ',' | ':' | '#'))
		{
			return Err(ParseIdError::InvalidChar {
				name: trimmed.to_string(),
				ch,
			});
		}

		Ok(Self(trimmed.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// IRC channel form (`#name`).
	pub fn channel(&self) -> String {
		format!("#{}", self.0)
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s)
	}
}

impl TryFrom<String> for RoomId {
	type Error = ParseIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		RoomId::new(value)
	}
}

impl From<RoomId> for String {
	fn from(value: RoomId) -> Self {
		value.0
	}
}

/// One parsed and normalized chat line, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub room: RoomId,

	/// Sender login; empty when the frame carried no sender.
	pub author: String,

	/// Normalized text; may be empty.
	pub text: String,

	/// Receipt time at millisecond precision.
	pub observed_at: DateTime<Utc>,
}

impl ChatMessage {
	pub fn new(room: RoomId, author: impl Into<String>, text: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
		Self {
			room,
			author: author.into(),
			text: text.into(),
			observed_at: truncate_to_millis(observed_at),
		}
	}
}

/// Drop sub-millisecond precision.
pub fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
	DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn room_id_normalizes_case_and_hash() {
		let a = RoomId::new("#SomeChannel").unwrap();
		let b = RoomId::new("  somechannel ").unwrap();
		assert_eq!(a, b);
		assert_eq!(a.as_str(), "somechannel");
		assert_eq!(a.channel(), "#somechannel");
		assert_eq!(a.to_string(), "somechannel");
	}

	#[test]
	fn rejects_empty_and_invalid_room_names() {
		assert_eq!(RoomId::new(""), Err(ParseIdError::Empty));
		assert_eq!(RoomId::new("  # "), Err(ParseIdError::Empty));
		assert!(RoomId::new("two words").is_err());
		assert!(RoomId::new("a,b").is_err());
		assert!(RoomId::new("##double").is_err());
		assert!("bad\r\nJOIN #x".parse::<RoomId>().is_err());
	}

	#[test]
	fn room_id_serde_validates() {
		let room: RoomId = serde_json::from_str("\"#Foo\"").unwrap();
		assert_eq!(room.as_str(), "foo");
		assert_eq!(serde_json::to_string(&room).unwrap(), "\"foo\"");
		assert!(serde_json::from_str::<RoomId>("\"\"").is_err());
	}

	#[test]
	fn chat_message_truncates_to_millis() {
		let t = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
		let msg = ChatMessage::new(RoomId::new("room").unwrap(), "alice", "hi", t);
		assert_eq!(msg.observed_at.timestamp_subsec_nanos(), 123_000_000);
		assert_eq!(msg.observed_at.timestamp_millis(), t.timestamp_millis());
	}
}
