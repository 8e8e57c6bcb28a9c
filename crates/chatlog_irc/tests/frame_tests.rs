use chatlog_irc::{
	KEEPALIVE_REPLY, LineBuffer, RawChatFrame, TRAILER_MARKER, is_keepalive_probe, normalize_text, parse_frames,
	parse_line, terminate_line,
};
use proptest::prelude::*;

#[test]
fn chat_line_yields_author_and_text() {
	let frames = parse_frames(":alice!x@x PRIVMSG #room :hello\r\n");
	assert_eq!(frames, vec![RawChatFrame::new("alice", "hello")]);
}

#[test]
fn buffer_without_chat_lines_is_empty() {
	let buf = ":tmi.twitch.tv 001 justinfan12345 :Welcome, GLHF!\r\n\
		:tmi.twitch.tv 376 justinfan12345 :>\r\n\
		:justinfan12345!justinfan12345@justinfan12345.tmi.twitch.tv JOIN #room\r\n\
		PING :tmi.twitch.tv\r\n";
	assert!(parse_frames(buf).is_empty());
}

#[test]
fn trailer_marker_is_removed_after_parsing() {
	let line = format!(":alice!x@x PRIVMSG #room :hello there {TRAILER_MARKER}abc \r\n");
	let frame = parse_line(&line).expect("chat frame");
	assert_eq!(normalize_text(&frame.text), "hello there");
}

#[test]
fn line_buffer_feeds_parser_across_reads() {
	let wire = b":a!a@a PRIVMSG #r :first\r\nPING :tmi.twitch.tv\r\n:b!b@b PRIVMSG #r :sec";
	let mut lb = LineBuffer::default();

	let mut probes = 0;
	let mut frames = Vec::new();
	for chunk in [&wire[..10], &wire[10..40], &wire[40..]] {
		for line in lb.push(chunk) {
			if is_keepalive_probe(&line) {
				probes += 1;
			} else if let Some(frame) = parse_line(&line) {
				frames.push(frame);
			}
		}
	}

	assert_eq!(probes, 1);
	assert_eq!(frames, vec![RawChatFrame::new("a", "first")]);
	assert!(lb.pending_len() > 0, "unterminated second message stays pending");

	let tail = lb.push(b"ond\r\n");
	assert_eq!(tail.len(), 1);
	assert_eq!(parse_line(&tail[0]), Some(RawChatFrame::new("b", "second")));
}

#[test]
fn keepalive_reply_is_a_single_terminated_line() {
	let reply = terminate_line(KEEPALIVE_REPLY);
	assert!(reply.ends_with("\r\n"));
	assert_eq!(reply.matches("\r\n").count(), 1);
}

proptest! {
	#[test]
	fn parser_never_panics(input in "\\PC{0,256}") {
		let _ = parse_frames(&input);
	}

	#[test]
	fn parsed_text_survives_arbitrary_colons(nick in "[a-z0-9_]{1,25}", text in "[ -~]{0,200}") {
		let line = format!(":{nick}!{nick}@{nick}.tmi.twitch.tv PRIVMSG #room :{text}\r\n");
		let frames = parse_frames(&line);
		prop_assert_eq!(frames, vec![RawChatFrame::new(nick, text)]);
	}

	#[test]
	fn normalizer_output_is_a_fixed_point(body in "[^\u{E0000}]{0,64}", nonce in "\\PC{0,16}") {
		let once = normalize_text(&format!("{body}{TRAILER_MARKER}{nonce}")).to_string();
		prop_assert_eq!(normalize_text(&once), once.as_str());
		prop_assert!(!once.contains(TRAILER_MARKER));
	}
}
