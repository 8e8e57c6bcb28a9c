#![forbid(unsafe_code)]

pub mod command;
pub mod frame;
pub mod lines;
pub mod normalize;

pub use command::{
	DEFAULT_NICKNAME, DEFAULT_PASSWORD, Handshake, KEEPALIVE_PROBE, KEEPALIVE_REPLY, LINE_TERMINATOR, is_keepalive_probe,
	terminate_line,
};
pub use frame::{CHAT_COMMAND, RawChatFrame, parse_frames, parse_line};
pub use lines::{DEFAULT_MAX_LINE_BYTES, LineBuffer};
pub use normalize::{TRAILER_MARKER, normalize_text};

/// Well-known chat endpoint defaults.
pub mod endpoint {
	/// Plaintext Twitch chat host.
	pub const DEFAULT_HOST: &str = "irc.chat.twitch.tv";
	/// Plaintext IRC port.
	pub const DEFAULT_PORT: u16 = 6667;
}
