#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chatlog_domain::ChatMessage;
use chatlog_irc::{DEFAULT_MAX_LINE_BYTES, DEFAULT_NICKNAME, DEFAULT_PASSWORD};
use chatlog_util::endpoint::ChatEndpoint;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use crate::config::SecretString;
use crate::server::store::{MessageSession, MessageStore};
use crate::server::worker::WorkerConfig;

pub(crate) const TEST_WAIT: Duration = Duration::from_secs(3);

pub(crate) fn worker_config(endpoint: ChatEndpoint) -> WorkerConfig {
	WorkerConfig {
		endpoint,
		nickname: DEFAULT_NICKNAME.to_string(),
		password: SecretString::new(DEFAULT_PASSWORD),
		read_buffer_size: 2048,
		max_line_bytes: DEFAULT_MAX_LINE_BYTES,
		connect_timeout: Duration::from_secs(2),
		idle_timeout: Duration::from_secs(30),
	}
}

/// Poll `cond` until it holds or the test deadline passes.
pub(crate) async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
	let deadline = Instant::now() + TEST_WAIT;
	while !cond() {
		assert!(Instant::now() < deadline, "timed out waiting for {what}");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

#[derive(Default)]
struct MemoryInner {
	messages: Mutex<Vec<ChatMessage>>,
	open_sessions: AtomicUsize,
	sessions_opened: AtomicUsize,
	fail_inserts: AtomicBool,
}

/// In-memory store that tracks how many sessions are currently held.
#[derive(Clone, Default)]
pub(crate) struct MemoryMessageStore {
	inner: Arc<MemoryInner>,
}

impl MemoryMessageStore {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Every insert fails.
	pub(crate) fn failing() -> Self {
		let store = Self::default();
		store.inner.fail_inserts.store(true, Ordering::SeqCst);
		store
	}

	pub(crate) fn messages(&self) -> Vec<ChatMessage> {
		self.inner.messages.lock().unwrap().clone()
	}

	pub(crate) fn open_sessions(&self) -> usize {
		self.inner.open_sessions.load(Ordering::SeqCst)
	}

	pub(crate) fn sessions_opened(&self) -> usize {
		self.inner.sessions_opened.load(Ordering::SeqCst)
	}
}

#[async_trait::async_trait]
impl MessageStore for MemoryMessageStore {
	async fn open_session(&self) -> anyhow::Result<Box<dyn MessageSession>> {
		self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
		self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(MemorySession {
			inner: Arc::clone(&self.inner),
		}))
	}
}

struct MemorySession {
	inner: Arc<MemoryInner>,
}

#[async_trait::async_trait]
impl MessageSession for MemorySession {
	async fn insert(&mut self, msg: &ChatMessage) -> anyhow::Result<()> {
		if self.inner.fail_inserts.load(Ordering::SeqCst) {
			anyhow::bail!("database unavailable");
		}
		self.inner.messages.lock().unwrap().push(msg.clone());
		Ok(())
	}

	async fn close(self: Box<Self>) {}
}

impl Drop for MemorySession {
	fn drop(&mut self) {
		self.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Loopback chat server that lets a test script the peer side.
pub(crate) struct FakeIrcServer {
	listener: TcpListener,
}

impl FakeIrcServer {
	pub(crate) async fn bind() -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake irc server");
		Self { listener }
	}

	pub(crate) fn endpoint(&self) -> ChatEndpoint {
		let addr = self.listener.local_addr().expect("local addr");
		ChatEndpoint::new(addr.ip().to_string(), addr.port())
	}

	pub(crate) async fn accept(&self) -> FakeConnection {
		self.try_accept(TEST_WAIT).await.expect("worker never connected")
	}

	pub(crate) async fn try_accept(&self, wait: Duration) -> Option<FakeConnection> {
		let (stream, _addr) = timeout(wait, self.listener.accept()).await.ok()?.ok()?;
		let (read, write) = stream.into_split();
		Some(FakeConnection {
			reader: BufReader::new(read),
			writer: write,
		})
	}
}

pub(crate) struct FakeConnection {
	reader: BufReader<OwnedReadHalf>,
	writer: OwnedWriteHalf,
}

impl FakeConnection {
	/// Next line without its terminator; `None` once the worker closed its side.
	pub(crate) async fn read_line(&mut self) -> Option<String> {
		let mut line = String::new();
		match timeout(TEST_WAIT, self.reader.read_line(&mut line)).await {
			Ok(Ok(0)) | Ok(Err(_)) => None,
			Ok(Ok(_)) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
			Err(_) => panic!("timed out reading from worker"),
		}
	}

	/// PASS, NICK and JOIN lines as sent by the worker.
	pub(crate) async fn read_handshake(&mut self) -> Vec<String> {
		let mut lines = Vec::with_capacity(3);
		for _ in 0..3 {
			lines.push(self.read_line().await.expect("handshake line"));
		}
		lines
	}

	pub(crate) async fn send(&mut self, data: &str) {
		self.writer.write_all(data.as_bytes()).await.expect("write to worker");
	}

	pub(crate) async fn expect_eof(&mut self) {
		if let Some(line) = self.read_line().await {
			panic!("expected EOF, worker sent {line:?}");
		}
	}

	pub(crate) async fn close(mut self) {
		let _ = self.writer.shutdown().await;
	}
}
