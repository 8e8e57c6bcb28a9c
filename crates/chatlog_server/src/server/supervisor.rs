#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chatlog_domain::RoomId;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::store::MessageStore;
use crate::server::worker::{RoomWorker, StatusReporter, WorkerConfig, WorkerError, WorkerExit, WorkerState, WorkerStatus};
use crate::util::time::unix_ms_now;

/// Capacity of the `WorkerStatus` broadcast channel.
pub const DEFAULT_STATUS_BROADCAST_CAPACITY: usize = 1_024;

pub type StatusBroadcastRx = broadcast::Receiver<WorkerStatus>;

type Completion = Shared<BoxFuture<'static, WorkerExit>>;
type Registry = Arc<RwLock<HashMap<RoomId, WorkerHandle>>>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
	#[error("room {0} already has an active worker")]
	AlreadyActive(RoomId),

	#[error("room {0} has no active worker")]
	NotActive(RoomId),

	#[error("supervisor is shutting down")]
	ShuttingDown,
}

/// Registry entry for one live worker.
struct WorkerHandle {
	generation: u64,
	cancel: CancellationToken,
	completion: Completion,
	state: watch::Receiver<WorkerState>,
	started_at_ms: i64,
}

/// Control-surface view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStatus {
	pub room: RoomId,
	pub state: WorkerState,
	pub started_at_ms: i64,
}

/// Owns every room worker: at most one per room.
#[derive(Clone)]
pub struct Supervisor {
	cfg: Arc<WorkerConfig>,
	store: Arc<dyn MessageStore>,
	registry: Registry,
	next_generation: Arc<AtomicU64>,
	closed: Arc<AtomicBool>,
	status_tx: broadcast::Sender<WorkerStatus>,
}

impl Supervisor {
	pub fn new(cfg: WorkerConfig, store: Arc<dyn MessageStore>) -> Self {
		let (status_tx, _status_rx) = broadcast::channel(DEFAULT_STATUS_BROADCAST_CAPACITY);
		Self {
			cfg: Arc::new(cfg),
			store,
			registry: Arc::new(RwLock::new(HashMap::new())),
			next_generation: Arc::new(AtomicU64::new(1)),
			closed: Arc::new(AtomicBool::new(false)),
			status_tx,
		}
	}

	pub fn subscribe_status(&self) -> StatusBroadcastRx {
		self.status_tx.subscribe()
	}

	/// Spawn a worker for `room`. Returns once it is registered, not once it is connected.
	pub async fn start(&self, room: RoomId) -> Result<(), SupervisorError> {
		let mut registry = self.registry.write().await;

		if self.closed.load(Ordering::Acquire) {
			return Err(SupervisorError::ShuttingDown);
		}
		if registry.contains_key(&room) {
			debug!(room = %room, "start rejected: already active");
			return Err(SupervisorError::AlreadyActive(room));
		}

		let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
		let cancel = CancellationToken::new();
		let (state_tx, state_rx) = watch::channel(WorkerState::Connecting);
		let reporter = StatusReporter::new(room.clone(), Arc::new(state_tx), self.status_tx.clone());

		let worker = RoomWorker::new(
			room.clone(),
			Arc::clone(&self.cfg),
			Arc::clone(&self.store),
			cancel.clone(),
			reporter.clone(),
		);
		let task = tokio::spawn(worker.run());

		// The monitor needs the write lock we hold, so it cannot unregister before the insert below.
		let (done_tx, done_rx) = oneshot::channel::<WorkerExit>();
		let registry_ref = Arc::clone(&self.registry);
		let monitor_room = room.clone();
		tokio::spawn(async move {
			let exit = match task.await {
				Ok(exit) => exit,
				Err(e) => {
					let exit = WorkerExit::Errored(Arc::new(WorkerError::Task(e.to_string())));
					metrics::counter!("chatlog_worker_errors_total", "room" => monitor_room.to_string()).increment(1);
					warn!(room = %monitor_room, error = %e, "room worker task aborted");
					reporter.report_exit(&exit);
					exit
				}
			};

			remove_generation(&registry_ref, &monitor_room, generation).await;
			metrics::gauge!("chatlog_workers_active").decrement(1.0);
			let _ = done_tx.send(exit);
		});

		let completion: Completion = done_rx
			.map(|res| {
				res.unwrap_or_else(|_| WorkerExit::Errored(Arc::new(WorkerError::Task("worker monitor dropped".to_string()))))
			})
			.boxed()
			.shared();

		registry.insert(
			room.clone(),
			WorkerHandle {
				generation,
				cancel,
				completion,
				state: state_rx,
				started_at_ms: unix_ms_now(),
			},
		);
		metrics::gauge!("chatlog_workers_active").increment(1.0);
		info!(room = %room, generation, "room worker started");

		Ok(())
	}

	/// Cancel the room's worker and wait until it has released its resources.
	pub async fn stop(&self, room: &RoomId) -> Result<WorkerExit, SupervisorError> {
		let (generation, cancel, completion) = {
			let registry = self.registry.read().await;
			let Some(handle) = registry.get(room) else {
				return Err(SupervisorError::NotActive(room.clone()));
			};
			(handle.generation, handle.cancel.clone(), handle.completion.clone())
		};

		cancel.cancel();
		let exit = completion.await;
		remove_generation(&self.registry, room, generation).await;

		info!(room = %room, state = %exit.state(), "room worker stopped");
		Ok(exit)
	}

	/// Refuse new starts, cancel every worker, and wait for all of them.
	pub async fn shutdown(&self) {
		let completions: Vec<(RoomId, Completion)> = {
			let registry = self.registry.write().await;
			self.closed.store(true, Ordering::Release);
			registry
				.iter()
				.map(|(room, handle)| {
					handle.cancel.cancel();
					(room.clone(), handle.completion.clone())
				})
				.collect()
		};

		info!(workers = completions.len(), "shutting down room workers");
		let exits = futures::future::join_all(completions.into_iter().map(|(room, c)| c.map(move |exit| (room, exit)))).await;
		for (room, exit) in exits {
			if let Some(e) = exit.error() {
				warn!(room = %room, error = %e, "room worker ended with error during shutdown");
			}
		}

		self.registry.write().await.clear();
		info!("all room workers stopped");
	}

	pub fn is_shutting_down(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub async fn is_active(&self, room: &RoomId) -> bool {
		self.registry.read().await.contains_key(room)
	}

	/// Snapshot of every registered worker, sorted by room.
	pub async fn list_rooms(&self) -> Vec<RoomStatus> {
		let registry = self.registry.read().await;
		let mut rooms: Vec<RoomStatus> = registry
			.iter()
			.map(|(room, handle)| RoomStatus {
				room: room.clone(),
				state: *handle.state.borrow(),
				started_at_ms: handle.started_at_ms,
			})
			.collect();
		rooms.sort_by(|a, b| a.room.cmp(&b.room));
		rooms
	}
}

async fn remove_generation(registry: &Registry, room: &RoomId, generation: u64) {
	let mut registry = registry.write().await;
	if registry.get(room).is_some_and(|h| h.generation == generation) {
		registry.remove(room);
		debug!(room = %room, generation, "room worker unregistered");
	}
}
