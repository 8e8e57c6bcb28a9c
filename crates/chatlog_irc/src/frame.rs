#![forbid(unsafe_code)]

/// IRC command carrying chat messages.
pub const CHAT_COMMAND: &str = "PRIVMSG";

/// Sender and raw (not yet normalized) text of one chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChatFrame {
	pub author: String,
	pub text: String,
}

impl RawChatFrame {
	pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
		Self {
			author: author.into(),
			text: text.into(),
		}
	}
}

/// Extract every chat frame from a buffer of CRLF-separated lines.
///
/// Lines that are not chat messages (pings, joins, numerics, garbage) are skipped.
pub fn parse_frames(buffer: &str) -> Vec<RawChatFrame> {
	buffer.split('\n').filter_map(parse_line).collect()
}

/// Parse a single protocol line.
///
/// Accepted shape: `[@tags ][:nick!user@host ]PRIVMSG <target> [:]<text>`.
/// A prefix without `!` (or no prefix at all) yields an empty author.
pub fn parse_line(line: &str) -> Option<RawChatFrame> {
	let mut rest = line.trim_end_matches(['\r', '\n']);

	if let Some(tagged) = rest.strip_prefix('@') {
		let (_tags, after) = tagged.split_once(' ')?;
		rest = after.trim_start_matches(' ');
	}

	let mut author = "";
	if let Some(prefixed) = rest.strip_prefix(':') {
		let (prefix, after) = prefixed.split_once(' ')?;
		author = prefix.split_once('!').map(|(nick, _)| nick).unwrap_or("");
		rest = after.trim_start_matches(' ');
	}

	let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));
	if !command.eq_ignore_ascii_case(CHAT_COMMAND) {
		return None;
	}

	let params = params.trim_start_matches(' ');
	let (target, trailing) = params.split_once(' ').unwrap_or((params, ""));
	if target.is_empty() || target.starts_with(':') {
		return None;
	}

	let trailing = trailing.trim_start_matches(' ');
	let text = trailing.strip_prefix(':').unwrap_or(trailing);

	Some(RawChatFrame::new(author, text))
}
