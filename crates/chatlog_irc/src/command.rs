#![forbid(unsafe_code)]

/// Line terminator for every outbound and inbound line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Anonymous, read-only login: the server ignores the password for `justinfan*` nicks.
pub const DEFAULT_PASSWORD: &str = "oauth:placeholder";
pub const DEFAULT_NICKNAME: &str = "justinfan12345";

/// Server liveness probe prefix.
pub const KEEPALIVE_PROBE: &str = "PING";
/// Reply the server expects to a probe (without terminator).
pub const KEEPALIVE_REPLY: &str = "PONG :tmi.twitch.tv";

/// Whether a line is a keep-alive probe that must be answered.
#[inline]
pub fn is_keepalive_probe(line: &str) -> bool {
	line.starts_with(KEEPALIVE_PROBE)
}

/// Append the CRLF terminator, dropping any embedded line breaks.
pub fn terminate_line(line: &str) -> String {
	let mut out = String::with_capacity(line.len() + LINE_TERMINATOR.len());
	out.extend(line.chars().filter(|c| !matches!(c, '\r' | '\n')));
	out.push_str(LINE_TERMINATOR);
	out
}

/// Registration sequence sent right after connecting.
#[derive(Debug, Clone, Copy)]
pub struct Handshake<'a> {
	pub password: &'a str,
	pub nickname: &'a str,
	/// Channel in wire form (`#name`).
	pub channel: &'a str,
}

impl Handshake<'_> {
	/// `PASS`, `NICK`, `JOIN` in that order, each terminated and meant to be written separately.
	pub fn lines(&self) -> [String; 3] {
		[
			terminate_line(&format!("PASS {}", self.password)),
			terminate_line(&format!("NICK {}", self.nickname)),
			terminate_line(&format!("JOIN {}", self.channel)),
		]
	}
}
