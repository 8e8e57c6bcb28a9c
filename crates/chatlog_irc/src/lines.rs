#![forbid(unsafe_code)]

use bytes::BytesMut;

/// Default cap for a pending (unterminated) line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024;

/// Reassembles CRLF-terminated lines across socket reads.
///
/// Reads may end mid-line or mid-codepoint; bytes are held until the terminator arrives.
/// An unterminated line that grows past `max_line_bytes` is discarded up to its terminator.
#[derive(Debug)]
pub struct LineBuffer {
	buf: BytesMut,
	max_line_bytes: usize,
	discarding: bool,
	dropped_lines: u64,
}

impl LineBuffer {
	pub fn new(max_line_bytes: usize) -> Self {
		Self {
			buf: BytesMut::new(),
			max_line_bytes: max_line_bytes.max(1),
			discarding: false,
			dropped_lines: 0,
		}
	}

	/// Append `data` and return every line it completed, terminators stripped.
	pub fn push(&mut self, data: &[u8]) -> Vec<String> {
		self.buf.extend_from_slice(data);

		let mut lines = Vec::new();
		while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
			let raw = self.buf.split_to(pos + 1);
			if self.discarding {
				self.discarding = false;
				continue;
			}

			let mut line = &raw[..pos];
			if let Some(stripped) = line.strip_suffix(b"\r") {
				line = stripped;
			}
			if line.is_empty() {
				continue;
			}
			lines.push(String::from_utf8_lossy(line).into_owned());
		}

		if self.buf.len() > self.max_line_bytes {
			self.buf.clear();
			if !self.discarding {
				self.discarding = true;
				self.dropped_lines += 1;
			}
		}

		lines
	}

	/// Bytes waiting for a terminator.
	pub fn pending_len(&self) -> usize {
		self.buf.len()
	}

	/// Number of oversized lines discarded so far.
	pub fn dropped_lines(&self) -> u64 {
		self.dropped_lines
	}
}

impl Default for LineBuffer {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_LINE_BYTES)
	}
}
