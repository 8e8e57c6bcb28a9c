#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chatlog_domain::RoomId;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::supervisor::{Supervisor, SupervisorError};

const ROOMS_PATH: &str = "/rooms";

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn mark_not_ready(&self) {
		self.ready.store(false, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

/// Body and status of a control response, before it is wrapped for hyper.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
	pub status: StatusCode,
	pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
	Text(&'static str),
	Json(serde_json::Value),
}

impl Reply {
	fn text(status: StatusCode, text: &'static str) -> Self {
		Self {
			status,
			body: Body::Text(text),
		}
	}

	fn json(status: StatusCode, value: serde_json::Value) -> Self {
		Self {
			status,
			body: Body::Json(value),
		}
	}

	fn failure(status: StatusCode, error: impl ToString) -> Self {
		Self::json(status, json!({ "ok": false, "error": error.to_string() }))
	}

	fn into_response(self) -> Response<Full<Bytes>> {
		let (content_type, bytes) = match self.body {
			Body::Text(text) => ("text/plain; charset=utf-8", Bytes::from_static(text.as_bytes())),
			Body::Json(value) => ("application/json", Bytes::from(value.to_string())),
		};

		let mut resp = Response::new(Full::new(bytes));
		*resp.status_mut() = self.status;
		resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
		resp
	}
}

/// Serve health probes and room control until `shutdown` fires.
pub async fn spawn_control_server(
	bind: SocketAddr,
	supervisor: Supervisor,
	health: HealthState,
	shutdown: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
	let listener = TcpListener::bind(bind).await?;
	let local = listener.local_addr()?;

	let task = tokio::spawn(async move {
		if let Err(err) = run_control_server(listener, supervisor, health, shutdown).await {
			warn!(error = %err, "control server stopped");
		}
	});

	Ok((local, task))
}

async fn run_control_server(
	listener: TcpListener,
	supervisor: Supervisor,
	health: HealthState,
	shutdown: CancellationToken,
) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = tokio::select! {
			_ = shutdown.cancelled() => {
				info!("control server shutting down");
				return Ok(());
			}
			accepted = listener.accept() => accepted?,
		};

		let io = TokioIo::new(stream);
		let supervisor = supervisor.clone();
		let health = health.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_request(req, supervisor.clone(), health.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "control connection error");
			}
		});
	}
}

async fn handle_request(
	req: Request<Incoming>,
	supervisor: Supervisor,
	health: HealthState,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let reply = route(req.method(), req.uri().path(), &supervisor, &health).await;
	debug!(method = %req.method(), path = %req.uri().path(), status = %reply.status, "control request");
	Ok(reply.into_response())
}

/// Dispatch one control request.
pub async fn route(method: &Method, path: &str, supervisor: &Supervisor, health: &HealthState) -> Reply {
	match path {
		"/healthz" => {
			if method != Method::GET {
				return Reply::text(StatusCode::METHOD_NOT_ALLOWED, "");
			}
			Reply::text(StatusCode::OK, "ok")
		}
		"/readyz" => {
			if method != Method::GET {
				return Reply::text(StatusCode::METHOD_NOT_ALLOWED, "");
			}
			if health.is_ready() && !supervisor.is_shutting_down() {
				Reply::text(StatusCode::OK, "ready")
			} else {
				Reply::text(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
			}
		}
		ROOMS_PATH | "/rooms/" => {
			if method != Method::GET {
				return Reply::failure(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
			}
			let rooms = supervisor.list_rooms().await;
			Reply::json(StatusCode::OK, json!({ "ok": true, "rooms": rooms }))
		}
		_ => {
			let Some(name) = path.strip_prefix("/rooms/") else {
				return Reply::failure(StatusCode::NOT_FOUND, "not found");
			};

			let room = match RoomId::new(name) {
				Ok(room) => room,
				Err(e) => return Reply::failure(StatusCode::BAD_REQUEST, e),
			};

			match *method {
				Method::GET => {
					let active = supervisor.is_active(&room).await;
					Reply::json(StatusCode::OK, json!({ "ok": true, "room": room, "active": active }))
				}
				Method::POST => start_room(supervisor, room).await,
				Method::DELETE => stop_room(supervisor, room).await,
				_ => Reply::failure(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
			}
		}
	}
}

async fn start_room(supervisor: &Supervisor, room: RoomId) -> Reply {
	match supervisor.start(room.clone()).await {
		Ok(()) => Reply::json(StatusCode::ACCEPTED, json!({ "ok": true, "room": room })),
		Err(e @ SupervisorError::AlreadyActive(_)) => Reply::failure(StatusCode::CONFLICT, e),
		Err(e @ SupervisorError::ShuttingDown) => Reply::failure(StatusCode::SERVICE_UNAVAILABLE, e),
		Err(e @ SupervisorError::NotActive(_)) => Reply::failure(StatusCode::INTERNAL_SERVER_ERROR, e),
	}
}

async fn stop_room(supervisor: &Supervisor, room: RoomId) -> Reply {
	match supervisor.stop(&room).await {
		Ok(exit) => Reply::json(
			StatusCode::OK,
			json!({
				"ok": true,
				"room": room,
				"state": exit.state(),
				"exit_error": exit.error().map(|e| e.to_string()),
			}),
		),
		Err(e @ SupervisorError::NotActive(_)) => Reply::failure(StatusCode::NOT_FOUND, e),
		Err(e) => Reply::failure(StatusCode::SERVICE_UNAVAILABLE, e),
	}
}
