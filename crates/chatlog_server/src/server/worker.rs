#![forbid(unsafe_code)]

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chatlog_domain::{ChatMessage, RoomId};
use chatlog_irc::{Handshake, KEEPALIVE_REPLY, LineBuffer, is_keepalive_probe, normalize_text, parse_frames, terminate_line};
use chatlog_util::endpoint::ChatEndpoint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{IrcSettings, SecretString};
use crate::server::store::{MessageSession, MessageStore};
use crate::util::time::ObservedClock;

/// Connection parameters shared by every room worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
	pub endpoint: ChatEndpoint,
	pub nickname: String,
	pub password: SecretString,
	pub read_buffer_size: usize,
	pub max_line_bytes: usize,
	pub connect_timeout: Duration,
	pub idle_timeout: Duration,
}

impl From<&IrcSettings> for WorkerConfig {
	fn from(irc: &IrcSettings) -> Self {
		Self {
			endpoint: irc.endpoint.clone(),
			nickname: irc.nickname.clone(),
			password: irc.password.clone(),
			read_buffer_size: irc.read_buffer_size.max(1),
			max_line_bytes: irc.max_line_bytes,
			connect_timeout: irc.connect_timeout,
			idle_timeout: irc.idle_timeout,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
	Connecting,
	Handshaking,
	Listening,
	Draining,
	Closed,
	Errored,
}

impl WorkerState {
	pub fn as_str(self) -> &'static str {
		match self {
			WorkerState::Connecting => "connecting",
			WorkerState::Handshaking => "handshaking",
			WorkerState::Listening => "listening",
			WorkerState::Draining => "draining",
			WorkerState::Closed => "closed",
			WorkerState::Errored => "errored",
		}
	}
}

impl fmt::Display for WorkerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Fatal to the worker that raised it, never to its siblings.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
	#[error("connection error while {stage}: {source}")]
	Connection {
		stage: &'static str,
		#[source]
		source: io::Error,
	},

	#[error("persistence error: {0:#}")]
	Persistence(anyhow::Error),

	#[error("worker task failed: {0}")]
	Task(String),
}

impl WorkerError {
	fn connection(stage: &'static str, source: io::Error) -> Self {
		WorkerError::Connection { stage, source }
	}
}

/// How a worker ended. Cloned to every waiter.
#[derive(Debug, Clone)]
pub enum WorkerExit {
	Closed,
	Errored(Arc<WorkerError>),
}

impl WorkerExit {
	pub fn state(&self) -> WorkerState {
		match self {
			WorkerExit::Closed => WorkerState::Closed,
			WorkerExit::Errored(_) => WorkerState::Errored,
		}
	}

	pub fn error(&self) -> Option<&WorkerError> {
		match self {
			WorkerExit::Closed => None,
			WorkerExit::Errored(e) => Some(e),
		}
	}
}

/// Lifecycle event published on every worker transition.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
	pub room: RoomId,
	pub state: WorkerState,
	pub detail: String,
	pub last_error: Option<String>,
	pub time: DateTime<Utc>,
}

/// Publishes a worker's state on its watch channel and the supervisor-wide status broadcast.
#[derive(Debug, Clone)]
pub(crate) struct StatusReporter {
	room: RoomId,
	state_tx: Arc<watch::Sender<WorkerState>>,
	status_tx: broadcast::Sender<WorkerStatus>,
}

impl StatusReporter {
	pub(crate) fn new(
		room: RoomId,
		state_tx: Arc<watch::Sender<WorkerState>>,
		status_tx: broadcast::Sender<WorkerStatus>,
	) -> Self {
		Self {
			room,
			state_tx,
			status_tx,
		}
	}

	pub(crate) fn report(&self, state: WorkerState, detail: impl Into<String>, last_error: Option<String>) {
		self.state_tx.send_replace(state);
		// no subscribers is fine
		let _ = self.status_tx.send(WorkerStatus {
			room: self.room.clone(),
			state,
			detail: detail.into(),
			last_error,
			time: Utc::now(),
		});
	}

	pub(crate) fn report_exit(&self, exit: &WorkerExit) {
		match exit {
			WorkerExit::Closed => self.report(WorkerState::Closed, "worker closed", None),
			WorkerExit::Errored(e) => self.report(WorkerState::Errored, "worker failed", Some(e.to_string())),
		}
	}
}

/// Ingests one room until cancelled or a fatal error.
pub struct RoomWorker {
	room: RoomId,
	cfg: Arc<WorkerConfig>,
	store: Arc<dyn MessageStore>,
	cancel: CancellationToken,
	reporter: StatusReporter,
}

impl RoomWorker {
	pub(crate) fn new(
		room: RoomId,
		cfg: Arc<WorkerConfig>,
		store: Arc<dyn MessageStore>,
		cancel: CancellationToken,
		reporter: StatusReporter,
	) -> Self {
		Self {
			room,
			cfg,
			store,
			cancel,
			reporter,
		}
	}

	/// Run to completion. Socket and database session are released before this returns.
	pub async fn run(self) -> WorkerExit {
		let session_id = uuid::Uuid::new_v4();
		let span = info_span!("room_worker", room = %self.room, %session_id);
		async move {
			let exit = match self.run_inner().await {
				Ok(()) => WorkerExit::Closed,
				Err(e) => {
					metrics::counter!("chatlog_worker_errors_total", "room" => self.room.to_string()).increment(1);
					error!(room = %self.room, error = %e, "room worker failed");
					WorkerExit::Errored(Arc::new(e))
				}
			};
			self.reporter.report_exit(&exit);
			info!(state = %exit.state(), "room worker finished");
			exit
		}
		.instrument(span)
		.await
	}

	async fn run_inner(&self) -> Result<(), WorkerError> {
		self.reporter.report(
			WorkerState::Connecting,
			format!("connecting to {}", self.cfg.endpoint),
			None,
		);

		let hostport = self.cfg.endpoint.hostport();
		let connected = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => {
				debug!("cancelled while connecting");
				return Ok(());
			}
			res = timeout(self.cfg.connect_timeout, TcpStream::connect(hostport.as_str())) => res,
		};
		let mut stream = match connected {
			Ok(Ok(stream)) => stream,
			Ok(Err(e)) => return Err(WorkerError::connection("connecting", e)),
			Err(_) => {
				return Err(WorkerError::connection(
					"connecting",
					io::Error::new(
						io::ErrorKind::TimedOut,
						format!("connect timed out after {:?}", self.cfg.connect_timeout),
					),
				));
			}
		};
		if let Err(e) = stream.set_nodelay(true) {
			debug!(error = %e, "failed to set TCP_NODELAY");
		}

		let result = self.session(&mut stream).await;

		let _ = stream.shutdown().await;
		drop(stream);
		debug!("socket released");

		result
	}

	async fn session(&self, stream: &mut TcpStream) -> Result<(), WorkerError> {
		self.reporter.report(WorkerState::Handshaking, "sending registration", None);
		self.handshake(stream).await?;

		let mut session = self.store.open_session().await.map_err(WorkerError::Persistence)?;

		self.reporter.report(
			WorkerState::Listening,
			format!("joined {}", self.room.channel()),
			None,
		);
		info!(endpoint = %self.cfg.endpoint, "listening for chat");

		let result = self.listen(stream, session.as_mut()).await;

		if result.is_ok() {
			self.reporter.report(WorkerState::Draining, "stop requested", None);
		}
		session.close().await;

		result
	}

	async fn handshake<S>(&self, stream: &mut S) -> Result<(), WorkerError>
	where
		S: AsyncWrite + Unpin,
	{
		let channel = self.room.channel();
		let handshake = Handshake {
			password: self.cfg.password.expose(),
			nickname: &self.cfg.nickname,
			channel: &channel,
		};

		for line in handshake.lines() {
			stream
				.write_all(line.as_bytes())
				.await
				.map_err(|e| WorkerError::connection("handshaking", e))?;
		}
		Ok(())
	}

	/// Read/dispatch loop. `Ok(())` means cancellation was observed.
	async fn listen<S>(&self, stream: &mut S, session: &mut dyn MessageSession) -> Result<(), WorkerError>
	where
		S: AsyncRead + AsyncWrite + Unpin,
	{
		let mut buf = vec![0u8; self.cfg.read_buffer_size.max(1)];
		let mut lines = LineBuffer::new(self.cfg.max_line_bytes);
		let mut clock = ObservedClock::new();
		let room_label = self.room.to_string();

		loop {
			let read = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return Ok(()),
				res = timeout(self.cfg.idle_timeout, stream.read(&mut buf)) => res,
			};

			let n = match read {
				Ok(Ok(0)) => {
					return Err(WorkerError::connection(
						"reading",
						io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection"),
					));
				}
				Ok(Ok(n)) => n,
				Ok(Err(e)) => return Err(WorkerError::connection("reading", e)),
				Err(_) => {
					return Err(WorkerError::connection(
						"reading",
						io::Error::new(
							io::ErrorKind::TimedOut,
							format!("no traffic for {:?}", self.cfg.idle_timeout),
						),
					));
				}
			};

			if self.cancel.is_cancelled() {
				debug!(bytes = n, "cancelled; discarding last read");
				return Ok(());
			}

			let dropped_before = lines.dropped_lines();
			let complete = lines.push(&buf[..n]);
			let dropped = lines.dropped_lines() - dropped_before;
			if dropped > 0 {
				metrics::counter!("chatlog_oversized_lines_total", "room" => room_label.clone()).increment(dropped);
				warn!(dropped, max_line_bytes = self.cfg.max_line_bytes, "discarded oversized line");
			}

			for line in complete {
				if is_keepalive_probe(&line) {
					stream
						.write_all(terminate_line(KEEPALIVE_REPLY).as_bytes())
						.await
						.map_err(|e| WorkerError::connection("answering keep-alive", e))?;
					metrics::counter!("chatlog_keepalive_replies_total", "room" => room_label.clone()).increment(1);
					debug!("answered keep-alive");
					continue;
				}

				for frame in parse_frames(&line) {
					let msg = ChatMessage::new(
						self.room.clone(),
						frame.author,
						normalize_text(&frame.text),
						clock.now(),
					);
					session.insert(&msg).await.map_err(WorkerError::Persistence)?;
					metrics::counter!("chatlog_messages_persisted_total", "room" => room_label.clone()).increment(1);
				}
			}
		}
	}
}
