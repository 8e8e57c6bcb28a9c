#![forbid(unsafe_code)]

pub mod endpoint {
	/// Parsed `host:port` chat endpoint, optionally written as `irc://host:port`.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct ChatEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl ChatEndpoint {
		pub const SCHEME: &'static str = "irc://";

		pub fn new(host: impl Into<String>, port: u16) -> Self {
			Self {
				host: host.into(),
				port,
			}
		}

		/// Returns `host:port` (IPv6 stays bracketed), suitable for `TcpStream::connect`.
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Parse `host:port` or `irc://host:port`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected host:port)".to_string());
			}

			let rest = s.strip_prefix(Self::SCHEME).unwrap_or(s);
			if rest.contains("://") {
				return Err(format!("unsupported endpoint scheme (expected irc://host:port): {s}"));
			}

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!(
					"invalid endpoint (expected host:port without path/query/fragment): {s}"
				));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected host:port): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected host:port): {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!(
					"invalid endpoint host (IPv6 must be bracketed like [::1]:6667): {s}"
				));
			}

			let port: u16 = port_str
				.trim()
				.parse()
				.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			if port == 0 {
				return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
			}

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	impl std::fmt::Display for ChatEndpoint {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.write_str(&self.hostport())
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_dns_hostname() {
			let e = ChatEndpoint::parse("irc.chat.twitch.tv:6667").unwrap();
			assert_eq!(e.host, "irc.chat.twitch.tv");
			assert_eq!(e.port, 6667);
			assert_eq!(e.hostport(), "irc.chat.twitch.tv:6667");
		}

		#[test]
		fn accepts_irc_scheme() {
			let e = ChatEndpoint::parse("irc://127.0.0.1:16667").unwrap();
			assert_eq!(e, ChatEndpoint::new("127.0.0.1", 16667));
			assert_eq!(e.to_string(), "127.0.0.1:16667");
		}

		#[test]
		fn parses_bracketed_ipv6() {
			let e = ChatEndpoint::parse("[::1]:6667").unwrap();
			assert_eq!(e.host, "[::1]");
			assert_eq!(e.hostport(), "[::1]:6667");
		}

		#[test]
		fn rejects_unbracketed_ipv6() {
			let err = ChatEndpoint::parse("::1:6667").unwrap_err();
			assert!(err.to_lowercase().contains("ipv6"));
		}

		#[test]
		fn rejects_other_schemes_and_paths() {
			assert!(ChatEndpoint::parse("wss://irc-ws.chat.twitch.tv:443").is_err());
			assert!(ChatEndpoint::parse("irc://host:6667/").is_err());
			assert!(ChatEndpoint::parse("irc://host:6667?x=y").is_err());
		}

		#[test]
		fn rejects_port_zero_and_missing_port() {
			assert!(ChatEndpoint::parse("127.0.0.1:0").is_err());
			assert!(ChatEndpoint::parse("127.0.0.1").is_err());
			assert!(ChatEndpoint::parse("   ").is_err());
		}
	}
}
