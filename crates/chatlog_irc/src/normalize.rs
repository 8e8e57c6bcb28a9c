#![forbid(unsafe_code)]

/// Invisible tag code point some clients append with a per-message nonce.
pub const TRAILER_MARKER: char = '\u{E0000}';

/// Strip the invisible trailer (from its last occurrence onward) and surrounding whitespace.
///
/// Empty output is valid. Output without a marker is a fixed point.
pub fn normalize_text(raw: &str) -> &str {
	let text = match raw.rfind(TRAILER_MARKER) {
		Some(idx) => &raw[..idx],
		None => raw,
	};
	text.trim()
}
